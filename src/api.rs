//! Request parameter extraction and response shaping shared by the handlers.
//!
//! Handlers see a JSON payload. When we run behind API Gateway the proxy
//! binary flattens the query string into that payload; when invoked directly
//! the payload may be a flat object, or a full proxy event that still has its
//! `queryStringParameters` member.

use lambda_http::{http, Body, Response};
use serde_json::{json, Map, Value};

use crate::error::{Result, ServiceError};

pub const CORS_HEADERS: [(&str, &str); 4] = [
    ("Content-Type", "application/json"),
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET,OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type"),
];

#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        ApiResponse { status: 200, body }
    }

    /// The answer to a CORS preflight.
    pub fn preflight() -> Self {
        ApiResponse::ok(json!({}))
    }

    /// The API Gateway proxy-integration shape: status, headers, and the body
    /// as a JSON string.
    pub fn to_proxy_value(&self) -> Value {
        let headers: Map<String, Value> = CORS_HEADERS
            .iter()
            .map(|(k, v)| ((*k).to_owned(), Value::from(*v)))
            .collect();

        json!({
            "statusCode": self.status,
            "headers": headers,
            "body": self.body.to_string(),
        })
    }
}

/// Build an HTTP response for the proxy-event server.
pub fn to_http(resp: &ApiResponse) -> std::result::Result<Response<Body>, http::Error> {
    let mut builder = Response::builder().status(resp.status);

    for (name, value) in CORS_HEADERS {
        builder = builder.header(name, value);
    }

    builder.body(Body::Text(resp.body.to_string()))
}

/// All of our APIs are GETs, so the payload handed to the services is just
/// the query string as a flat object.
pub fn payload_from_query<'a, I>(pairs: I) -> Value
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    Value::Object(
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_owned(), Value::from(v)))
            .collect(),
    )
}

impl From<&ServiceError> for ApiResponse {
    fn from(e: &ServiceError) -> Self {
        ApiResponse {
            status: e.status_code(),
            body: e.body(),
        }
    }
}

/// The string parameters of a request.
#[derive(Debug, Default)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn from_payload(payload: Option<Value>) -> Result<Self> {
        let mut obj = match payload {
            None | Some(Value::Null) => return Ok(Params::default()),
            Some(Value::Object(o)) => o,
            Some(_) => {
                return Err(ServiceError::validation(
                    "request payload must be a JSON object",
                ))
            }
        };

        match obj.remove("queryStringParameters") {
            Some(Value::Object(qs)) => Ok(Params(qs)),
            // A proxy event without any query string.
            Some(Value::Null) => Ok(Params::default()),
            _ => Ok(Params(obj)),
        }
    }

    /// Get a non-empty string parameter. Numbers are accepted and stringified
    /// since direct invocations tend to send them unquoted.
    pub fn get(&self, name: &str) -> Option<String> {
        match self.0.get(name)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn require(&self, name: &str) -> Result<String> {
        self.get(name)
            .ok_or_else(|| ServiceError::validation(format!("'{name}' is missing")))
    }
}
