// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Low-level HTTP client shared by the query service client and the object
//! store backend.
//!
//! This module provides:
//! - Connection pooling
//! - Automatic retry with exponential backoff on transient statuses
//! - A pluggable [`RequestSigner`] applied to every attempt
//! - Configurable timeouts

use crate::config::DriverInfo;
use crate::error::{Result, ResultsErrorHelper};
use reqwest::{Client, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Connection timeout duration.
    pub connect_timeout: Duration,
    /// Read timeout duration.
    pub read_timeout: Duration,
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay between retry attempts (doubles each retry).
    pub retry_delay: Duration,
    /// Maximum number of idle connections per host.
    pub max_connections_per_host: usize,
    /// Overrides the user agent derived from [`DriverInfo`].
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            max_retries: 5,
            retry_delay: Duration::from_millis(1500),
            max_connections_per_host: 100,
            user_agent: None,
        }
    }
}

/// Signs outgoing requests.
///
/// Credential resolution lives outside this crate; implementations add
/// whatever headers their scheme needs. Called once per attempt, so
/// time-dependent signatures stay fresh across retries.
pub trait RequestSigner: Send + Sync + std::fmt::Debug {
    fn sign(&self, request: &mut Request) -> Result<()>;
}

/// Leaves requests untouched. Used for pre-signed URLs and local endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsigned;

impl RequestSigner for Unsigned {
    fn sign(&self, _request: &mut Request) -> Result<()> {
        Ok(())
    }
}

/// HTTP client for the query service and object store endpoints.
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    signer: Arc<dyn RequestSigner>,
}

impl HttpClient {
    /// Creates a new HTTP client; the user agent comes from `driver` unless
    /// the config overrides it.
    pub fn new(
        config: HttpClientConfig,
        driver: &DriverInfo,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self> {
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| driver.user_agent());

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .pool_max_idle_per_host(config.max_connections_per_host)
            .user_agent(user_agent)
            .build()
            .map_err(|e| {
                ResultsErrorHelper::io().message(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            config,
            signer,
        })
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Returns the underlying reqwest client for building requests.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Execute a request with signing and automatic retry.
    ///
    /// Retries are performed for connect/timeout errors and for 429, 502,
    /// 503 and 504 responses. Other failures are returned immediately, with
    /// 404 mapped to `NotFound` and 412 to `PreconditionFailed`.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let mut attempts = 0;
        let mut last_error: Option<String> = None;

        loop {
            attempts += 1;

            let mut attempt = request.try_clone().ok_or_else(|| {
                ResultsErrorHelper::invalid_argument()
                    .message("Request body cannot be replayed for retries")
            })?;
            self.signer.sign(&mut attempt)?;

            debug!(
                "Executing {} {} (attempt {}/{})",
                attempt.method(),
                attempt.url(),
                attempts,
                self.config.max_retries + 1
            );

            match self.client.execute(attempt).await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if Self::is_retryable_status(status) && attempts <= self.config.max_retries {
                        last_error = Some(format!("HTTP {}", status.as_u16()));
                        warn!(
                            "Request failed with {} (attempt {}/{}), retrying...",
                            status,
                            attempts,
                            self.config.max_retries + 1
                        );
                        self.wait_for_retry(attempts).await;
                        continue;
                    }

                    let error_body = response.text().await.unwrap_or_default();
                    return Err(status_error(status, &error_body));
                }
                Err(e) => {
                    if Self::is_retryable_error(&e) && attempts <= self.config.max_retries {
                        last_error = Some(e.to_string());
                        warn!(
                            "Request failed with error (attempt {}/{}): {}, retrying...",
                            attempts,
                            self.config.max_retries + 1,
                            e
                        );
                        self.wait_for_retry(attempts).await;
                        continue;
                    }

                    let builder = if e.is_timeout() {
                        ResultsErrorHelper::timeout()
                    } else {
                        ResultsErrorHelper::io()
                    };
                    return Err(builder
                        .message(format!(
                            "HTTP request failed after {} attempts: {}",
                            attempts,
                            last_error.unwrap_or_else(|| e.to_string())
                        ))
                        .with_source(e));
                }
            }
        }
    }

    /// Check if the HTTP status code indicates a retryable error.
    fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
                | StatusCode::BAD_GATEWAY
        )
    }

    /// Check if the request error is retryable.
    fn is_retryable_error(error: &reqwest::Error) -> bool {
        error.is_timeout() || error.is_connect() || error.is_request()
    }

    /// Wait with exponential backoff before retry.
    async fn wait_for_retry(&self, attempt: u32) {
        let delay = self.config.retry_delay * 2u32.saturating_pow(attempt.saturating_sub(1));
        debug!("Waiting {:?} before retry", delay);
        sleep(delay).await;
    }
}

/// Map a non-success status to an error.
pub(crate) fn status_error(status: StatusCode, body: &str) -> crate::error::Error {
    let builder = match status {
        StatusCode::NOT_FOUND => ResultsErrorHelper::not_found(),
        StatusCode::PRECONDITION_FAILED => ResultsErrorHelper::precondition_failed(),
        StatusCode::REQUEST_TIMEOUT => ResultsErrorHelper::timeout(),
        _ => ResultsErrorHelper::io(),
    };
    builder.message(format!("HTTP {} - {}", status.as_u16(), body))
}
