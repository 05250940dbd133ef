//! Error types shared by all of the HydroNode services.
//!
//! Every failure that can come out of a handler is one of these variants, and
//! the dispatcher turns each of them into an HTTP-style response. Upstream
//! failures (SDK errors, Redis hiccups, garbage from the engine) are logged
//! in full but only surface to the caller as a generic server error.

use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Athena query failed: {reason}")]
    QueryExecution { reason: String },

    #[error("Athena query {job_id} still running after {waited:?}")]
    QueryTimeout { job_id: String, waited: Duration },

    #[error("{context}: {message}")]
    Upstream { context: String, message: String },
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

impl ServiceError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        ServiceError::Validation(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        ServiceError::NotFound(msg.into())
    }

    /// Wrap a collaborator failure. `context` says what we were doing; the
    /// error is flattened into text because the SDK error types aren't
    /// `'static`-friendly across our trait boundaries.
    pub fn upstream<C: Into<String>, E: std::fmt::Display>(context: C, err: E) -> Self {
        ServiceError::Upstream {
            context: context.into(),
            message: err.to_string(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::QueryExecution { .. } => 500,
            ServiceError::QueryTimeout { .. } => 504,
            ServiceError::Upstream { .. } => 500,
        }
    }

    /// The JSON body that the caller gets to see.
    pub fn body(&self) -> Value {
        match self {
            ServiceError::Validation(msg) | ServiceError::NotFound(msg) => json!({ "error": msg }),
            ServiceError::QueryExecution { reason } => json!({
                "error": "query execution failed",
                "details": reason,
            }),
            ServiceError::QueryTimeout { .. } => json!({
                "error": "query timed out",
                "details": self.to_string(),
            }),
            ServiceError::Upstream { .. } => json!({ "error": "Internal server error" }),
        }
    }
}

impl From<redis::RedisError> for ServiceError {
    fn from(e: redis::RedisError) -> Self {
        ServiceError::upstream("cache operation failed", e)
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::upstream("JSON (de)serialization failed", e)
    }
}
