//! HTTP backend that program runs can be delegated to.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ToolError;

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Submit a program and return the backend's JSON reply verbatim.
    async fn run_program(&self, program: &str, parameters: &Value) -> Result<Value, ToolError>;
}

/// `POST {base_url}/programs/run` with a JSON body.
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::Upstream(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_error(&self, err: reqwest::Error) -> ToolError {
        if err.is_timeout() {
            ToolError::Upstream(format!("no reply within {} ms", self.timeout.as_millis()))
        } else {
            ToolError::Upstream(err.to_string())
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn run_program(&self, program: &str, parameters: &Value) -> Result<Value, ToolError> {
        let url = format!("{}/programs/run", self.base_url);
        tracing::debug!(%url, "delegating program run upstream");

        let response = self
            .client
            .post(&url)
            .json(&json!({ "program": program, "parameters": parameters }))
            .send()
            .await
            .map_err(|e| self.map_error(e))?
            .error_for_status()
            .map_err(|e| self.map_error(e))?;

        response.json::<Value>().await.map_err(|e| self.map_error(e))
    }
}
