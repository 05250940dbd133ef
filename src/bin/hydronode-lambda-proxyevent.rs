//! "Proxy event" version of the HydroNode Lambda implementations.
//!
//! This executable defines a server that expects to be interacted with
//! according to AWS API Gateway's "proxy event" protocol. This adds an
//! additional layer of complexity beyond simple JSON-in, JSON-out. The "bare"
//! version of the server is simpler and is more useful for local testing.
//!
//! All of our APIs are GETs, so the request "payload" that we hand to the
//! services is built from the query string.

use lambda_http::{run, service_fn, Error, Request, RequestExt};

use hydronode_lambda::Services;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let svcs = Services::init().await?;
    let ref_svcs = &svcs;

    run(service_fn(|req: Request| async move {
        let arn = req.lambda_context().invoked_function_arn;
        ref_svcs.dispatch_http(arn, &req).await
    }))
    .await?;
    Ok(())
}
