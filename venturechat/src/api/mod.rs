//! REST backfill client.
//!
//! The realtime gateway only pushes what happens while you are connected;
//! message history and the contact directory come from REST endpoints.
//! [`ApiClient`] wraps a `reqwest` client with the base URL, bearer token,
//! and request timeout from [`SessionConfig`](crate::config::SessionConfig).

pub mod contacts;
pub mod history;

use std::time::Duration;

/// Errors from the REST backfill endpoints.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("request failed with status {0}")]
    Status(u16),

    /// The request never completed (connect, timeout, DNS).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The response body did not match the expected shape.
    #[error("malformed response: {0}")]
    Decode(#[source] serde_json::Error),
}

/// HTTP client for the backfill endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Builds a client against the given base URL.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            http,
            base_url,
            auth_token,
        })
    }

    /// Issues a GET and decodes the JSON body, mapping HTTP failures to
    /// [`FetchError::Status`].
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.http.get(&url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(FetchError::Decode)
    }
}
