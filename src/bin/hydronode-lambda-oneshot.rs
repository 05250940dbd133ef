//! "Oneshot" version of the HydroNode Lambda implementations.
//!
//! This executable runs one API function, based on arguments given on the
//! command line.

use lambda_runtime::Error;
use serde_json::{json, Value};
use std::env;

use hydronode_lambda::Services;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let mut args = env::args();
    args.next(); // skip argv[0]

    let arn = args.next().ok_or_else(|| -> Error {
        "first argument should be ARN to use (getAggregatedData, storeCache, getAggregate, listCacheKeys)"
            .into()
    })?;

    let json_text = args
        .next()
        .ok_or_else(|| -> Error { "second argument should be JSON payload text".into() })?;
    let payload: Value = serde_json::from_str(&json_text)?;

    let svcs = Services::init().await?;
    let resp = svcs.dispatch(arn, Some(payload)).await?;

    let out = json!({ "statusCode": resp.status, "body": resp.body });
    serde_json::to_writer(std::io::stdout().lock(), &out)?;
    Ok(())
}
