//! "Bare" version of the HydroNode Lambda implementations.
//!
//! This executable defines a server that takes and returns plain JSON. It's
//! easy to interact with locally, and it's what the scheduled cache-warming
//! job is deployed as. Responses use API Gateway's proxy-integration shape
//! (`statusCode`, `headers`, `body`) so that callers see the same thing as
//! with the "proxy event" version.

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;

use hydronode_lambda::Services;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let svcs = Services::init().await?;
    let ref_svcs = &svcs;

    run(service_fn(|event: LambdaEvent<Value>| async move {
        let (payload, context) = event.into_parts();
        let resp = ref_svcs
            .dispatch(context.invoked_function_arn, Some(payload))
            .await?;
        Ok::<_, Error>(resp.to_proxy_value())
    }))
    .await?;
    Ok(())
}
