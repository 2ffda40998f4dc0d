//! Stepdeck Workflow Client
//!
//! The Execution Client Adapter: a typed wrapper over the remote workflow
//! service's primitives (start, stop, redrive, describe, list, history).
//!
//! The crate is layered:
//! - [`WorkflowApi`]: one attempt per primitive, implemented by the HTTP
//!   transport [`WorkflowClient`] and by the in-memory fake used in tests
//! - [`ExecutionAdapter`]: retry with backoff and jitter for throttled and
//!   transient failures, plus a hard deadline per call
//! - [`secrets`] and [`artifacts`]: credential resolution at startup and read
//!   access to execution artifacts in object storage
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stepdeck_client::{ExecutionAdapter, RetryPolicy, WorkflowClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), stepdeck_client::RemoteError> {
//!     let client = WorkflowClient::new("http://localhost:8083");
//!     let adapter = ExecutionAdapter::new(Arc::new(client), RetryPolicy::default());
//!
//!     let execution = adapter
//!         .describe_execution("arn:aws:states:eu-west-1:123456789012:execution:reviews:run")
//!         .await?;
//!     println!("{} is {}", execution.name, execution.status());
//!     Ok(())
//! }
//! ```

mod adapter;
pub mod api;
pub mod artifacts;
pub mod error;
mod executions;
pub mod retry;
pub mod secrets;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod wire;

pub use adapter::{ExecutionAdapter, RecentExecutions};
pub use api::WorkflowApi;
pub use error::{RemoteError, RemoteErrorKind, Result};
pub use retry::RetryPolicy;
pub use secrets::Credentials;

use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Content type of the workflow service's JSON protocol
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// Target prefix naming the service in every request
const TARGET_PREFIX: &str = "AWSStepFunctions";

/// HTTP transport for the workflow service
///
/// Speaks the service's JSON protocol against a single endpoint: every operation
/// is a POST naming the operation in the `X-Amz-Target` header. Request signing is
/// expected to happen in front of the endpoint (a signing proxy or a local
/// emulator); resolved credentials are attached as a bearer token.
#[derive(Debug, Clone)]
pub struct WorkflowClient {
    /// Endpoint URL (e.g., "http://localhost:8083")
    base_url: String,
    /// HTTP client instance
    client: Client,
    credentials: Option<Credentials>,
}

impl WorkflowClient {
    /// Create a new workflow client
    ///
    /// # Arguments
    /// * `base_url` - The endpoint of the workflow API (e.g., "http://localhost:8083")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new workflow client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            credentials: None,
        }
    }

    /// Attach credentials sent with every request
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Get the endpoint URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue one protocol call and decode its response
    async fn call<I: Serialize, O: DeserializeOwned>(&self, operation: &str, input: &I) -> Result<O> {
        let mut request = self
            .client
            .post(format!("{}/", self.base_url))
            .header("X-Amz-Target", format!("{}.{}", TARGET_PREFIX, operation))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(serde_json::to_vec(input).map_err(|e| {
                RemoteError::Unknown(format!("Failed to encode {} request: {}", operation, e))
            })?);

        if let Some(credentials) = &self.credentials {
            request = request.bearer_auth(credentials.token());
        }

        let response = request.send().await?;
        self.handle_response(operation, response).await
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    ///
    /// Error bodies carry a `__type` naming the failure, which decides how the
    /// error is classified (and therefore whether it is retried).
    async fn handle_response<T: DeserializeOwned>(
        &self,
        operation: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.bytes().await?;
        // Some operations answer with an empty body on success
        let body: &[u8] = if body.is_empty() { b"{}" } else { &body };

        if !status.is_success() {
            let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
            let error_type = parsed
                .as_ref()
                .and_then(|v| v.get("__type"))
                .and_then(|v| v.as_str());
            let message = parsed
                .as_ref()
                .and_then(|v| v.get("message").or_else(|| v.get("Message")))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
            return Err(RemoteError::from_api(status.as_u16(), error_type, message));
        }

        serde_json::from_slice(body).map_err(|e| {
            RemoteError::Malformed(format!("Failed to parse {} response: {}", operation, e))
        })
    }
}
