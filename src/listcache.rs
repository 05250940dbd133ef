//! Debugging aid: list every key currently in the cache.

use lambda_runtime::tracing;
use serde_json::{json, Value};

use crate::{
    cache::{list_all_keys, CacheStore},
    error::Result,
};

pub async fn handler(cache: &dyn CacheStore) -> Result<Value> {
    let keys = list_all_keys(cache).await?;
    tracing::info!("found {} cache keys", keys.len());
    Ok(json!({ "count": keys.len(), "keys": keys }))
}
