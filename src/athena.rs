//! The asynchronous query engine that sits under the planner.
//!
//! Athena works on a submit/poll/fetch protocol: we hand it SQL, get back an
//! execution ID, poll that ID until the query settles, and then page through
//! the results. The `QueryEngine` trait captures exactly that surface so that
//! the planner can be exercised against an in-memory engine in the tests.

use async_trait::async_trait;
use aws_sdk_athena::{
    error::DisplayErrorContext,
    types::{QueryExecutionContext, QueryExecutionState, ResultConfiguration},
};
use lambda_runtime::tracing;

use crate::error::{Result, ServiceError};

/// SQL text plus the values for its `?` placeholders, in order. Each value is
/// already a rendered SQL literal, which is what Athena's execution
/// parameters expect.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub params: Vec<String>,
}

impl BoundQuery {
    pub fn new<S: Into<String>>(sql: S) -> Self {
        BoundQuery {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Bind a string value to the next placeholder.
    pub fn bind_str(mut self, value: &str) -> Self {
        self.params.push(quote_literal(value));
        self
    }
}

/// Render `value` as a single-quoted SQL string literal.
pub fn quote_literal(value: &str) -> String {
    let mut s = String::with_capacity(value.len() + 2);
    s.push('\'');

    for c in value.chars() {
        if c == '\'' {
            s.push('\'');
        }
        s.push(c);
    }

    s.push('\'');
    s
}

/// Render `name` as a double-quoted SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Running)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobStatus {
    pub state: JobState,
    pub reason: Option<String>,
}

/// One page of raw result rows. A `None` cell is an SQL NULL.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResultPage {
    pub rows: Vec<Vec<Option<String>>>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Submit a query and return its execution ID.
    async fn start_query(&self, query: &BoundQuery) -> Result<String>;

    async fn query_status(&self, job_id: &str) -> Result<JobStatus>;

    async fn results_page(&self, job_id: &str, next_token: Option<String>) -> Result<ResultPage>;

    /// Ask the engine to abandon a query.
    async fn stop_query(&self, job_id: &str) -> Result<()>;
}

/// The real thing.
#[derive(Clone, Debug)]
pub struct AthenaEngine {
    client: aws_sdk_athena::Client,
    database: String,
    output_location: String,
}

impl AthenaEngine {
    pub fn new(client: aws_sdk_athena::Client, database: String, output_location: String) -> Self {
        AthenaEngine {
            client,
            database,
            output_location,
        }
    }
}

fn sdk_error<E>(context: &str, err: E) -> ServiceError
where
    E: std::error::Error,
{
    ServiceError::upstream(context, DisplayErrorContext(err))
}

#[async_trait]
impl QueryEngine for AthenaEngine {
    async fn start_query(&self, query: &BoundQuery) -> Result<String> {
        tracing::info!(sql = %query.sql, params = ?query.params, "starting Athena query");

        let params = if query.params.is_empty() {
            None
        } else {
            Some(query.params.clone())
        };

        let resp = self
            .client
            .start_query_execution()
            .query_string(&query.sql)
            .set_execution_parameters(params)
            .query_execution_context(
                QueryExecutionContext::builder()
                    .database(&self.database)
                    .build(),
            )
            .result_configuration(
                ResultConfiguration::builder()
                    .output_location(&self.output_location)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error("failed to start Athena query", e))?;

        resp.query_execution_id()
            .map(str::to_owned)
            .ok_or_else(|| ServiceError::upstream("failed to start Athena query", "no execution ID returned"))
    }

    async fn query_status(&self, job_id: &str) -> Result<JobStatus> {
        let resp = self
            .client
            .get_query_execution()
            .query_execution_id(job_id)
            .send()
            .await
            .map_err(|e| sdk_error("failed to get Athena query status", e))?;

        let status = resp
            .query_execution()
            .and_then(|qe| qe.status())
            .ok_or_else(|| ServiceError::upstream("failed to get Athena query status", "response has no status"))?;

        let state = match status.state() {
            Some(QueryExecutionState::Queued) => JobState::Queued,
            Some(QueryExecutionState::Running) => JobState::Running,
            Some(QueryExecutionState::Succeeded) => JobState::Succeeded,
            Some(QueryExecutionState::Failed) => JobState::Failed,
            Some(QueryExecutionState::Cancelled) => JobState::Cancelled,
            other => {
                return Err(ServiceError::upstream(
                    "failed to get Athena query status",
                    format!("unexpected query state {other:?}"),
                ))
            }
        };

        Ok(JobStatus {
            state,
            reason: status.state_change_reason().map(str::to_owned),
        })
    }

    async fn results_page(&self, job_id: &str, next_token: Option<String>) -> Result<ResultPage> {
        let resp = self
            .client
            .get_query_results()
            .query_execution_id(job_id)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| sdk_error("failed to fetch Athena query results", e))?;

        let rows = resp
            .result_set()
            .map(|rs| {
                rs.rows()
                    .iter()
                    .map(|row| {
                        row.data()
                            .iter()
                            .map(|datum| datum.var_char_value().map(str::to_owned))
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ResultPage {
            rows,
            next_token: resp.next_token().map(str::to_owned),
        })
    }

    async fn stop_query(&self, job_id: &str) -> Result<()> {
        self.client
            .stop_query_execution()
            .query_execution_id(job_id)
            .send()
            .await
            .map_err(|e| sdk_error("failed to stop Athena query", e))?;
        Ok(())
    }
}
