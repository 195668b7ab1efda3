//! Shared HTTP client for the brewpass backend.
//!
//! Every request goes out through [`ApiClient`], which applies whatever
//! bearer credential the [`Authenticator`] currently carries.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use super::{ApiError, Authenticator};

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the brewpass backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling,
/// and the Authenticator handle shares its slot.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    auth: Authenticator,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration, auth: Authenticator) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for an API path
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Raw client, for the few requests that must not carry the ambient header
    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Check if response is successful, returning an error with body if not.
    pub(crate) async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Decode a JSON body, reporting decode failures as invalid responses
    /// rather than transport errors.
    pub(crate) async fn parse_json<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<Response, ApiError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.auth.apply(build()).send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    /// Authenticated GET returning decoded JSON
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        let response = self.send_with_retry(&url, || self.client.get(&url)).await?;
        Self::parse_json(response, &url).await
    }

    /// Authenticated POST with a JSON body, returning decoded JSON
    pub async fn post_json<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let url = self.url(path);
        let response = self
            .send_with_retry(&url, || self.client.post(&url).json(body))
            .await?;
        Self::parse_json(response, &url).await
    }
}
