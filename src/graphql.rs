//! Minimal GraphQL transport for the upstream endpoint
//!
//! Executes a named operation (query or mutation) as an HTTP POST and hands
//! back the parsed response. Well-formed GraphQL error responses are returned
//! as data for the caller to branch on; only transport-level faults (timeout,
//! connection refused, malformed JSON) surface as `Err`.

use crate::error::{BridgeError, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde_json::{Value, json};
use std::time::Duration;

/// A single error entry from a GraphQL `errors` list
#[derive(Debug, Clone)]
pub struct GraphqlError {
    pub message: String,
    pub error_code: Option<String>,
    pub path: Vec<String>,
}

/// Parsed GraphQL response: data, errors, or both (partial data)
#[derive(Debug, Clone, Default)]
pub struct GraphqlResponse {
    pub data: Option<Value>,
    pub errors: Vec<GraphqlError>,
}

impl GraphqlResponse {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Error code of the first error entry, if upstream supplied one
    pub fn first_error_code(&self) -> Option<&str> {
        self.errors.first().and_then(|e| e.error_code.as_deref())
    }

    /// Whether any error entry carries the given upstream error code
    pub fn has_error_code(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.error_code.as_deref() == Some(code))
    }

    /// Joined error messages for logging and error reporting
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn from_body(body: Value) -> Self {
        let errors = body
            .get("errors")
            .and_then(|e| e.as_array())
            .map(|entries| entries.iter().map(parse_error_entry).collect())
            .unwrap_or_default();
        let data = body.get("data").filter(|d| !d.is_null()).cloned();
        Self { data, errors }
    }
}

fn parse_error_entry(entry: &Value) -> GraphqlError {
    let message = entry
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("Unknown error")
        .to_string();
    let error_code = entry
        .get("extensions")
        .and_then(|x| x.get("errorCode"))
        .and_then(|c| c.as_str())
        .map(|c| c.to_string());
    let path = entry
        .get("path")
        .and_then(|p| p.as_array())
        .map(|segments| {
            segments
                .iter()
                .filter_map(|s| s.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();
    GraphqlError {
        message,
        error_code,
        path,
    }
}

/// HTTP client bound to one GraphQL endpoint
pub struct GraphqlClient {
    http: reqwest::Client,
    endpoint: String,
}

impl GraphqlClient {
    /// Create a client for the given endpoint with a per-request timeout
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }

    /// Execute one operation. `token` is attached as the authorization header
    /// when present (the upstream expects the raw Kraken token, no scheme
    /// prefix).
    pub async fn execute(
        &self,
        query: &str,
        variables: Value,
        token: Option<&str>,
    ) -> Result<GraphqlResponse> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, concat!("octobridge/", env!("CARGO_PKG_VERSION")))
            .json(&json!({ "query": query, "variables": variables }));

        if let Some(token) = token {
            request = request.header(AUTHORIZATION, token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BridgeError::auth(format!(
                "Upstream rejected request: {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(BridgeError::network(format!(
                "Upstream returned HTTP {}",
                status
            )));
        }

        let body: Value = response.json().await?;
        Ok(GraphqlResponse::from_body(body))
    }
}
