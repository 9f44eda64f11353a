//! reqwest-backed remote client.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, instrument};

use super::protocols::{
    JobClient, RemoteCaller, RemoteRequest, RemoteResponse, StatusResponse, SubmissionResponse,
};
use crate::config::HttpConfig;
use crate::errors::{ConfigError, RemoteError};

/// HTTP client for both synchronous calls and the async job API.
#[derive(Debug, Clone)]
pub struct HttpJobClient {
    client: reqwest::Client,
    submit_url: String,
}

impl HttpJobClient {
    /// Creates a client that submits jobs to `submit_url`.
    pub fn new(submit_url: impl Into<String>, config: &HttpConfig) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ConfigError::new("http.headers", e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ConfigError::new("http.headers", e.to_string()))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout()?)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::new("http", e.to_string()))?;

        Ok(Self {
            client,
            submit_url: submit_url.into(),
        })
    }

    /// Returns the submission endpoint.
    #[must_use]
    pub fn submit_url(&self) -> &str {
        &self.submit_url
    }
}

fn transport_error(e: &reqwest::Error) -> RemoteError {
    RemoteError {
        status: e.status().map(|s| s.as_u16()),
        message: e.to_string(),
    }
}

async fn checked(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body
    };
    Err(RemoteError::with_status(status.as_u16(), message))
}

#[async_trait]
impl RemoteCaller for HttpJobClient {
    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn call(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        let response = self
            .client
            .get(&request.url)
            .query(&request.query)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let response = checked(response).await?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| transport_error(&e))?;
        debug!(status, bytes = body.len(), "Remote call completed");
        Ok(RemoteResponse { status, body })
    }
}

#[async_trait]
impl JobClient for HttpJobClient {
    #[instrument(skip(self, payload), fields(url = %self.submit_url))]
    async fn submit(&self, payload: &serde_json::Value) -> Result<SubmissionResponse, RemoteError> {
        let response = self
            .client
            .post(&self.submit_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        checked(response)
            .await?
            .json::<SubmissionResponse>()
            .await
            .map_err(|e| transport_error(&e))
    }

    #[instrument(skip(self))]
    async fn check_status(&self, status_url: &str) -> Result<StatusResponse, RemoteError> {
        let response = self
            .client
            .get(status_url)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        checked(response)
            .await?
            .json::<StatusResponse>()
            .await
            .map_err(|e| transport_error(&e))
    }
}
