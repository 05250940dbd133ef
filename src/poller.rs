//! Waiting for query jobs and reading back their results.

use lambda_runtime::tracing;
use std::{collections::BTreeMap, time::Duration};
use tokio::time::{sleep, Instant};

use crate::{
    athena::{JobState, QueryEngine},
    error::{Result, ServiceError},
};

/// One result row, keyed by column name. NULL cells are left out.
pub type Record = BTreeMap<String, String>;

#[derive(Clone, Copy, Debug)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(300),
        }
    }
}

/// Block until the job leaves the QUEUED/RUNNING states.
///
/// We sleep before every status check, since a freshly submitted query is
/// never done yet. If the job is still pending once `max_wait` has elapsed we
/// ask Athena to stop it and bail out with `QueryTimeout`.
pub async fn wait_for_completion(
    engine: &dyn QueryEngine,
    job_id: &str,
    poll: &PollSettings,
) -> Result<()> {
    let started = Instant::now();

    loop {
        sleep(poll.interval).await;

        let status = engine.query_status(job_id).await?;
        tracing::info!("status for {job_id}: {:?}", status.state);

        match status.state {
            JobState::Succeeded => return Ok(()),

            state if state.is_pending() => {}

            // FAILED or CANCELLED
            state => {
                let reason = status
                    .reason
                    .unwrap_or_else(|| format!("query {state:?} with no reason given"));
                tracing::error!("Athena query {job_id} failed: {reason}");
                return Err(ServiceError::QueryExecution { reason });
            }
        }

        let waited = started.elapsed();

        if waited >= poll.max_wait {
            tracing::warn!("giving up on Athena query {job_id} after {waited:?}");

            if let Err(e) = engine.stop_query(job_id).await {
                tracing::warn!("failed to stop timed-out query {job_id}: {e}");
            }

            return Err(ServiceError::QueryTimeout {
                job_id: job_id.to_owned(),
                waited,
            });
        }
    }
}

/// Lazily walk the pages of a finished query, yielding one record at a time.
///
/// The first row of the first page names the columns; no other page repeats
/// it. Once exhausted the pager stays exhausted.
pub struct ResultPager<'a> {
    engine: &'a dyn QueryEngine,
    job_id: String,
    header: Option<Vec<String>>,
    buffer: std::vec::IntoIter<Vec<Option<String>>>,
    next_token: Option<String>,
    fetched_any: bool,
}

impl<'a> ResultPager<'a> {
    pub fn new<S: Into<String>>(engine: &'a dyn QueryEngine, job_id: S) -> Self {
        ResultPager {
            engine,
            job_id: job_id.into(),
            header: None,
            buffer: Vec::new().into_iter(),
            next_token: None,
            fetched_any: false,
        }
    }

    /// Fetch the next page if there is one. Returns false when the results are
    /// used up.
    async fn fill(&mut self) -> Result<bool> {
        if self.fetched_any && self.next_token.is_none() {
            return Ok(false);
        }

        let page = self
            .engine
            .results_page(&self.job_id, self.next_token.take())
            .await?;
        self.fetched_any = true;
        self.next_token = page.next_token;

        let mut rows = page.rows.into_iter();

        if self.header.is_none() {
            let Some(header) = rows.next() else {
                // Not even a header: an empty result set.
                self.next_token = None;
                return Ok(false);
            };

            self.header = Some(
                header
                    .into_iter()
                    .enumerate()
                    .map(|(i, name)| name.unwrap_or_else(|| format!("_col{i}")))
                    .collect(),
            );
        }

        self.buffer = rows.collect::<Vec<_>>().into_iter();
        Ok(true)
    }

    pub async fn try_next(&mut self) -> Result<Option<Record>> {
        loop {
            if let Some(row) = self.buffer.next() {
                let header = self.header.as_deref().unwrap_or_default();
                let record = header
                    .iter()
                    .zip(row)
                    .filter_map(|(name, cell)| cell.map(|v| (name.clone(), v)))
                    .collect();
                return Ok(Some(record));
            }

            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    pub async fn collect_all(mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();

        while let Some(rec) = self.try_next().await? {
            records.push(rec);
        }

        Ok(records)
    }
}

/// Submit, wait, and read everything back.
pub async fn run_query(
    engine: &dyn QueryEngine,
    query: &crate::athena::BoundQuery,
    poll: &PollSettings,
) -> Result<Vec<Record>> {
    let job_id = engine.start_query(query).await?;
    tracing::info!("QueryExecutionId: {job_id}");
    wait_for_completion(engine, &job_id, poll).await?;
    ResultPager::new(engine, job_id).collect_all().await
}
