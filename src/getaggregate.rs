//! The cached aggregate lookup API.
//!
//! Reads back whatever the batch job stored for a (node, metric, timeframe).
//! No Athena involved, so this is the fast path for the dashboards.

use lambda_runtime::tracing;
use serde_json::{json, Value};

use crate::{
    api::Params,
    cache::{cache_key, CacheStore},
    error::{Result, ServiceError},
    planner::validate_id,
    timeframe::Timeframe,
};

pub async fn handler(params: Params, cache: &dyn CacheStore) -> Result<Value> {
    let (Some(node_id), Some(metric_id), Some(timeframe)) = (
        params.get("nodeId"),
        params.get("metricType"),
        params.get("timeframe"),
    ) else {
        tracing::warn!("missing parameters");
        return Err(ServiceError::validation(
            "'nodeId', 'metricType' and 'timeframe' must all be given",
        ));
    };

    validate_id("nodeId", &node_id)?;
    validate_id("metricType", &metric_id)?;
    let timeframe: Timeframe = timeframe.parse()?;

    let key = cache_key(&node_id, &metric_id, timeframe);
    tracing::info!("looking up cache key {key}");

    let Some(text) = cache.get(&key).await? else {
        tracing::warn!("no data for cache key {key}");
        return Err(ServiceError::not_found(format!(
            "no cached data for {node_id}, {metric_id}, {timeframe}"
        )));
    };

    let data: Value = serde_json::from_str(&text)?;
    Ok(json!({ "data": data }))
}
