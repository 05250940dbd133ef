//! The on-demand aggregated data API.
//!
//! Given a node, a metric type and a timeframe, run the partition-pruned
//! aggregate query against Athena right now and hand back the rows. This is
//! slow (tens of seconds is typical), which is why the dashboard normally
//! reads from the cache that `storecache` fills instead.

use lambda_runtime::tracing;
use serde_json::{json, Value};

use crate::{
    api::Params,
    athena::QueryEngine,
    error::{Result, ServiceError},
    planner::{fetch_aggregates, PlannerSettings},
    timeframe::Timeframe,
};

pub async fn handler(
    params: Params,
    engine: &dyn QueryEngine,
    settings: &PlannerSettings,
) -> Result<Value> {
    let node_id = params.require("node-id")?;
    let metric_id = params.require("type")?;
    let timeframe: Timeframe = params.get("timeframe").unwrap_or_default().parse()?;

    tracing::info!("aggregated data request: node={node_id} type={metric_id} timeframe={timeframe}");

    let data = fetch_aggregates(engine, settings, timeframe, &node_id, &metric_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("no partitions found"))?;

    Ok(json!({ "data": data }))
}
