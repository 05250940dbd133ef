//! The cache-warming batch job.
//!
//! Runs on a schedule rather than behind the API. For every node and every
//! metric type we know about, and for each timeframe, run the same query that
//! the on-demand API would run and park the result in the cache under
//! `athena_data_{node}_{metric}_{timeframe}`.
//!
//! Combinations are processed one after another. A failure in one of them is
//! logged and counted but doesn't stop the rest; only failing to enumerate
//! nodes or metrics aborts the run.

use lambda_runtime::tracing;
use serde::Serialize;
use serde_json::Value;

use crate::{
    athena::QueryEngine,
    cache::{cache_key, CacheStore},
    error::Result,
    planner::{fetch_aggregates, list_metric_ids, list_node_ids, PlannerSettings},
    timeframe::Timeframe,
};

#[derive(Debug, Default, Serialize)]
pub struct Summary {
    pub stored: usize,
    pub skipped: usize,
    pub failed: usize,
    pub keys: Vec<String>,
}

pub async fn handler(
    engine: &dyn QueryEngine,
    cache: &dyn CacheStore,
    settings: &PlannerSettings,
) -> Result<Value> {
    let summary = warm_cache(engine, cache, settings).await?;
    Ok(serde_json::to_value(summary)?)
}

pub async fn warm_cache(
    engine: &dyn QueryEngine,
    cache: &dyn CacheStore,
    settings: &PlannerSettings,
) -> Result<Summary> {
    let node_ids = list_node_ids(engine, settings).await?;
    let metric_ids = list_metric_ids(engine, settings).await?;
    tracing::info!(
        "warming cache for {} nodes x {} metrics",
        node_ids.len(),
        metric_ids.len()
    );

    let mut summary = Summary::default();

    for node_id in &node_ids {
        for metric_id in &metric_ids {
            for tf in Timeframe::ALL {
                match store_one(engine, cache, settings, tf, node_id, metric_id).await {
                    Ok(Some(key)) => {
                        summary.stored += 1;
                        summary.keys.push(key);
                    }

                    Ok(None) => {
                        tracing::info!("no partitions for node {node_id} and timeframe {tf}");
                        summary.skipped += 1;
                    }

                    Err(e) => {
                        tracing::error!("failed to cache {node_id}/{metric_id}/{tf}: {e}");
                        summary.failed += 1;
                    }
                }
            }
        }
    }

    tracing::info!(
        "cache warm done: {} stored, {} skipped, {} failed",
        summary.stored,
        summary.skipped,
        summary.failed
    );
    Ok(summary)
}

async fn store_one(
    engine: &dyn QueryEngine,
    cache: &dyn CacheStore,
    settings: &PlannerSettings,
    tf: Timeframe,
    node_id: &str,
    metric_id: &str,
) -> Result<Option<String>> {
    let Some(data) = fetch_aggregates(engine, settings, tf, node_id, metric_id).await? else {
        return Ok(None);
    };

    let key = cache_key(node_id, metric_id, tf);
    cache.set(&key, &serde_json::to_string(&data)?).await?;
    tracing::info!("stored {} rows under {key}", data.len());
    Ok(Some(key))
}
