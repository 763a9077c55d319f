//! HTTP client wrapper with transient-failure retry
//!
//! Every upstream call goes through [`ApiHandler`]. A 200/201 response is
//! parsed as JSON and returned. A 500 whose JSON `error` field carries the
//! upstream's connection-reset marker is retried with the exact same
//! request. Any other status fails with [`GatewayError::Http`] carrying the
//! status, URL and response body.

use std::time::Duration;

use popframe_core::{GatewayError, RetryPolicy};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;

/// Marker the upstream puts in its error field when a peer reset the
/// connection under load.
pub const TRANSIENT_MARKER: &str = "reset by peer";

/// Message attached to every upstream failure.
pub const FAILURE_MESSAGE: &str = "Couldn't get data from API";

/// Optional request parts. Reused verbatim on every retry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Outcome of one attempt.
enum Attempt {
    Ready(Value),
    Transient(Value),
}

/// Client for one upstream base URL.
#[derive(Debug, Clone)]
pub struct ApiHandler {
    base_url: String,
    timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl ApiHandler {
    /// Create a handler for `base_url`.
    ///
    /// # Arguments
    /// * `timeout` - Per-request timeout for sessions this handler creates;
    ///   `None` keeps the transport default
    /// * `retry` - Bounds on the transient retry loop
    pub fn new(base_url: impl AsRef<str>, timeout: Option<Duration>, retry: RetryPolicy) -> Self {
        Self {
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
            timeout,
            retry,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a new connection session with this handler's timeout.
    pub fn session(&self) -> Result<Client, GatewayError> {
        let mut builder = Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder.build().map_err(|e| GatewayError::Transport {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })
    }

    pub async fn get(&self, endpoint: &str, options: &RequestOptions) -> Result<Value, GatewayError> {
        self.request(Method::GET, endpoint, options, None).await
    }

    pub async fn post(&self, endpoint: &str, options: &RequestOptions) -> Result<Value, GatewayError> {
        self.request(Method::POST, endpoint, options, None).await
    }

    pub async fn put(&self, endpoint: &str, options: &RequestOptions) -> Result<Value, GatewayError> {
        self.request(Method::PUT, endpoint, options, None).await
    }

    pub async fn delete(&self, endpoint: &str, options: &RequestOptions) -> Result<Value, GatewayError> {
        self.request(Method::DELETE, endpoint, options, None).await
    }

    /// Issue a request, reusing `session` when given or scoping a fresh one
    /// to this call otherwise.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        options: &RequestOptions,
        session: Option<&Client>,
    ) -> Result<Value, GatewayError> {
        match session {
            Some(client) => self.send(client, method, endpoint, options).await,
            None => {
                let scoped = self.session()?;
                self.send(&scoped, method, endpoint, options).await
            }
        }
    }

    async fn send(
        &self,
        client: &Client,
        method: Method,
        endpoint: &str,
        options: &RequestOptions,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut retries: u32 = 0;

        loop {
            let mut request = client.request(method.clone(), &url);
            if !options.query.is_empty() {
                request = request.query(&options.query);
            }
            for (name, value) in &options.headers {
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &options.body {
                request = request.json(body);
            }

            let response = request.send().await.map_err(|e| GatewayError::Transport {
                url: url.clone(),
                reason: e.to_string(),
            })?;

            match classify(&url, response).await? {
                Attempt::Ready(value) => return Ok(value),
                Attempt::Transient(body) => {
                    retries += 1;
                    if self.retry.max_transient_retries.is_some_and(|max| retries > max) {
                        tracing::error!(%url, %method, retries, "Transient upstream failures exhausted retry budget");
                        return Err(GatewayError::Http {
                            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                            message: FAILURE_MESSAGE.to_string(),
                            url,
                            body,
                        });
                    }
                    tracing::warn!(%url, %method, attempt = retries, "Upstream reset the connection, retrying");
                    if !self.retry.backoff().is_zero() {
                        tokio::time::sleep(self.retry.backoff()).await;
                    }
                }
            }
        }
    }
}

async fn classify(url: &str, response: reqwest::Response) -> Result<Attempt, GatewayError> {
    let status = response.status();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("json"));

    let text = response.text().await.map_err(|e| GatewayError::Transport {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if status == StatusCode::OK || status == StatusCode::CREATED {
        return serde_json::from_str(&text)
            .map(Attempt::Ready)
            .map_err(|e| GatewayError::Decode {
                url: url.to_string(),
                reason: e.to_string(),
                body: text,
            });
    }

    // only JSON-typed bodies are parsed; anything else is kept as raw text
    let body = if is_json {
        serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text))
    } else {
        Value::String(text)
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR && is_json && signals_reset(&body) {
        return Ok(Attempt::Transient(body));
    }

    Err(GatewayError::Http {
        status: status.as_u16(),
        message: FAILURE_MESSAGE.to_string(),
        url: url.to_string(),
        body,
    })
}

fn signals_reset(body: &Value) -> bool {
    match body.get("error") {
        Some(Value::String(message)) => message.contains(TRANSIENT_MARKER),
        Some(other) => other.to_string().contains(TRANSIENT_MARKER),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let handler = ApiHandler::new("http://urban.local/", None, RetryPolicy::default());
        assert_eq!(handler.base_url(), "http://urban.local");
    }

    #[test]
    fn test_request_options_builder() {
        let options = RequestOptions::new()
            .with_query("parent_id", 12639)
            .with_header("accept", "application/json")
            .with_body(json!({"a": 1}));
        assert_eq!(options.query, vec![("parent_id".to_string(), "12639".to_string())]);
        assert_eq!(options.headers.len(), 1);
        assert_eq!(options.body, Some(json!({"a": 1})));
    }

    #[test]
    fn test_signals_reset() {
        assert!(signals_reset(&json!({"error": "Connection reset by peer"})));
        assert!(signals_reset(&json!({"error": {"detail": "reset by peer"}})));
        assert!(!signals_reset(&json!({"error": "division by zero"})));
        assert!(!signals_reset(&json!({"detail": "reset by peer"})));
        assert!(!signals_reset(&json!("reset by peer")));
    }
}
