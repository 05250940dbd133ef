//! The partition-aware aggregate query planner.
//!
//! Both the on-demand API and the cache-warming batch job go through here:
//! find the newest partition for a node, work out which periods to scan,
//! build the partition-pruned query, run it, and collect the rows.
//!
//! Node and metric IDs come straight from API callers, so they never go into
//! the SQL text. They are bound through Athena execution parameters instead.
//! The only things we write into the text ourselves are table and column
//! names from our own tables and the digit strings of generated periods.

use lambda_runtime::tracing;

use crate::{
    athena::{quote_ident, quote_literal, BoundQuery, QueryEngine},
    error::{Result, ServiceError},
    poller::{run_query, PollSettings, Record},
    timeframe::{Anchors, PartitionMarker, Period, Timeframe},
};

const MAX_ID_LEN: usize = 128;

/// Everything the planner needs besides the engine itself.
#[derive(Clone, Debug)]
pub struct PlannerSettings {
    pub database: String,
    pub poll: PollSettings,
    pub anchors: Anchors,
}

/// Basic sanity checks on a caller-supplied identifier.
pub fn validate_id(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ServiceError::validation(format!("'{what}' is missing")));
    }

    if value.chars().count() > MAX_ID_LEN {
        return Err(ServiceError::validation(format!(
            "'{what}' is longer than {MAX_ID_LEN} characters"
        )));
    }

    if value.chars().any(char::is_control) {
        return Err(ServiceError::validation(format!(
            "'{what}' contains control characters"
        )));
    }

    Ok(())
}

fn table_ref(database: &str, tf: Timeframe) -> String {
    format!("{}.{}", quote_ident(database), tf.table())
}

/// `SELECT MAX(year) AS max_year, ...` for one node.
pub fn partition_discovery_query(database: &str, tf: Timeframe, node_id: &str) -> BoundQuery {
    let max_cols = tf
        .date_columns()
        .iter()
        .map(|c| format!("MAX({c}) AS max_{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    BoundQuery::new(format!(
        "SELECT {max_cols} FROM {} WHERE hydronode = ?",
        table_ref(database, tf)
    ))
    .bind_str(node_id)
}

/// The OR-of-ANDs predicate that selects exactly `periods`.
///
/// Period components are our own zero-padded numbers; anything else
/// indicates a bug upstream of here, and is rejected rather than written into
/// the query.
pub fn partition_filter(tf: Timeframe, periods: &[Period]) -> Result<String> {
    let cols = tf.date_columns();
    let mut terms = Vec::with_capacity(periods.len());

    for p in periods {
        let comps = p.components();

        if comps.len() != cols.len() {
            return Err(ServiceError::upstream(
                "bad partition filter",
                format!("period {p:?} does not match {tf} granularity"),
            ));
        }

        if comps
            .iter()
            .any(|(_, v)| v.is_empty() || !v.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(ServiceError::upstream(
                "bad partition filter",
                format!("non-numeric period {p:?}"),
            ));
        }

        let conj = comps
            .iter()
            .map(|(c, v)| format!("{c}={}", quote_literal(v)))
            .collect::<Vec<_>>()
            .join(" AND ");
        terms.push(format!("({conj})"));
    }

    if terms.is_empty() {
        return Err(ServiceError::upstream(
            "bad partition filter",
            "no periods to select",
        ));
    }

    Ok(terms.join(" OR "))
}

pub fn build_data_query(
    database: &str,
    tf: Timeframe,
    node_id: &str,
    metric_id: &str,
    periods: &[Period],
) -> Result<BoundQuery> {
    validate_id("node-id", node_id)?;
    validate_id("type", metric_id)?;

    let filter = partition_filter(tf, periods)?;
    let cols = tf.date_columns().join(", ");

    let sql = format!(
        "SELECT hydronode, {cols}, avg_value AS value \
         FROM {} \
         WHERE hydronode = ? \
         AND \"sensor-id\" = ? \
         AND ({filter}) \
         ORDER BY {cols} ASC",
        table_ref(database, tf)
    );

    Ok(BoundQuery::new(sql).bind_str(node_id).bind_str(metric_id))
}

/// Find the newest partition for a node, or `None` if the node has no data
/// at this granularity.
pub async fn discover_latest_partition(
    engine: &dyn QueryEngine,
    settings: &PlannerSettings,
    tf: Timeframe,
    node_id: &str,
) -> Result<Option<PartitionMarker>> {
    validate_id("node-id", node_id)?;

    let q = partition_discovery_query(&settings.database, tf, node_id);
    let records = run_query(engine, &q, &settings.poll).await?;
    tracing::info!("partition results: {records:?}");

    // MAX() over no rows is still one row, just full of NULLs.
    Ok(records.into_iter().next().and_then(|mut rec| {
        let max_year = rec.remove("max_year")?;
        Some(PartitionMarker {
            max_year,
            max_month: rec.remove("max_month"),
            max_day: rec.remove("max_day"),
        })
    }))
}

/// The full plan-and-run sequence for one (timeframe, node, metric).
///
/// Returns `None` without running the data query if the node has no
/// partitions.
pub async fn fetch_aggregates(
    engine: &dyn QueryEngine,
    settings: &PlannerSettings,
    tf: Timeframe,
    node_id: &str,
    metric_id: &str,
) -> Result<Option<Vec<Record>>> {
    validate_id("type", metric_id)?;

    let Some(marker) = discover_latest_partition(engine, settings, tf, node_id).await? else {
        return Ok(None);
    };
    tracing::info!("latest partition: {marker:?}");

    let anchor = settings.anchors.anchor_date(tf, &marker)?;
    let periods = tf.periods(anchor);
    tracing::info!("generated periods: {periods:?}");

    let q = build_data_query(&settings.database, tf, node_id, metric_id, &periods)?;
    let data = run_query(engine, &q, &settings.poll).await?;
    tracing::info!("got {} rows for {node_id}/{metric_id}/{tf}", data.len());
    Ok(Some(data))
}

/// `SELECT DISTINCT` over one column of the daily table.
async fn distinct_values(
    engine: &dyn QueryEngine,
    settings: &PlannerSettings,
    column: &str,
) -> Result<Vec<String>> {
    let q = BoundQuery::new(format!(
        "SELECT DISTINCT {} FROM {}",
        quote_ident(column),
        table_ref(&settings.database, Timeframe::Days)
    ));

    Ok(run_query(engine, &q, &settings.poll)
        .await?
        .into_iter()
        .filter_map(|mut rec| rec.remove(column))
        .collect())
}

pub async fn list_node_ids(engine: &dyn QueryEngine, settings: &PlannerSettings) -> Result<Vec<String>> {
    distinct_values(engine, settings, "hydronode").await
}

pub async fn list_metric_ids(
    engine: &dyn QueryEngine,
    settings: &PlannerSettings,
) -> Result<Vec<String>> {
    distinct_values(engine, settings, "sensor-id").await
}

#[cfg(test)]
pub(crate) fn test_settings() -> PlannerSettings {
    PlannerSettings {
        database: "data-lake-database-0".to_owned(),
        poll: PollSettings::default(),
        anchors: Anchors::default(),
    }
}
