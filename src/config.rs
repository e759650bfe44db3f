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

//! Client configuration.
//!
//! [`ClientConfig`] aggregates every tunable of the crate. It can be built in
//! code or from string properties:
//!
//! | Property | Default | Description |
//! |--------|---------|-------------|
//! | `athena.endpoint` | none | Query service endpoint URL |
//! | `athena.s3_endpoint` | none | Object store endpoint URL |
//! | `athena.database` | none | Default database for submitted queries |
//! | `athena.workgroup` | none | Workgroup for submitted queries |
//! | `athena.output_location` | none | `s3://` prefix for result files |
//! | `athena.result_backend` | `paginated` | `paginated`, `prefetch`, or `s3` |
//! | `athena.fetch_size` | 1000 | Rows per page, at most 1000 |
//! | `athena.fetch_timeout_ms` | 10000 | Timeout for one page fetch |
//! | `athena.poll.interval_ms` | 100 | First delay between status checks |
//! | `athena.poll.max_interval_ms` | 5000 | Delay cap for backoff |
//! | `athena.poll.backoff` | true | Multiplicative backoff vs. fixed delay |
//! | `athena.poll.backoff_factor` | 2 | Backoff multiplier |
//! | `athena.fetch.max_retries` | 5 | Resume attempts for an object download |
//! | `athena.fetch.retry_delay_ms` | 100 | Base delay between resume attempts |
//! | `athena.fetch.chunk_buffer` | 16 | Chunks buffered between fetcher and consumer |
//! | `athena.fetch.low_watermark_bytes` | 1048576 | Refill threshold of the byte reader |
//! | `athena.fetch.read_timeout_ms` | 60000 | Wait limit for one chunk |
//! | `athena.http.connect_timeout_ms` | 30000 | HTTP connect timeout |
//! | `athena.http.read_timeout_ms` | 60000 | HTTP request timeout |
//! | `athena.http.max_retries` | 5 | Retries for transient HTTP statuses |
//! | `athena.log_level` | unset | Log level, `OFF` disables logging |
//! | `athena.log_file` | unset | Log file path, stderr if unset |

use crate::client::HttpClientConfig;
use crate::error::{Result, ResultsErrorHelper};
use crate::logging::LogConfig;
use crate::polling::{DelayPolicy, DEFAULT_BACKOFF_FACTOR};
use std::time::Duration;

/// Largest page the paginated result API accepts.
pub const MAX_FETCH_SIZE: u32 = 1000;

/// Suffix of the column metadata object stored next to a result file.
pub const METADATA_SUFFIX: &str = ".metadata";

/// Name and version of the embedding application, used in the user agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    pub name: String,
    pub version: String,
}

impl Default for DriverInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl DriverInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

/// Which Result implementation a completed query is read through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultBackend {
    /// Page by page through the result API, fetching on demand.
    #[default]
    Paginated,
    /// Page by page, fetching page N+1 while page N is consumed.
    PrefetchingPaginated,
    /// Stream the CSV result file from the object store.
    ObjectStore,
}

impl ResultBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "paginated" | "pagination" => Some(ResultBackend::Paginated),
            "prefetch" | "prefetching" => Some(ResultBackend::PrefetchingPaginated),
            "s3" | "object_store" => Some(ResultBackend::ObjectStore),
            _ => None,
        }
    }
}

/// Settings for result readers.
#[derive(Debug, Clone)]
pub struct ResultConfig {
    pub backend: ResultBackend,
    /// Rows requested per page; at most [`MAX_FETCH_SIZE`].
    pub fetch_size: u32,
    /// Upper bound on one page fetch.
    pub fetch_timeout: Duration,
}

impl Default for ResultConfig {
    fn default() -> Self {
        Self {
            backend: ResultBackend::default(),
            fetch_size: MAX_FETCH_SIZE,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Settings for resumable object downloads.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Resume attempts after a mid-stream failure.
    pub max_retries: u32,
    /// Base delay before a resume; attempt `n` sleeps `retry_delay * n`.
    pub retry_delay: Duration,
    /// Capacity of the chunk channel between the fetch task and its consumer.
    pub chunk_buffer: usize,
    /// The byte reader requests more chunks when its buffer drops below this.
    pub low_watermark_bytes: usize,
    /// Longest wait for a single chunk before the read times out.
    pub read_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(100),
            chunk_buffer: 16,
            low_watermark_bytes: 1024 * 1024,
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Defaults applied to submitted queries.
#[derive(Debug, Clone, Default)]
pub struct QueryDefaults {
    pub database: Option<String>,
    pub workgroup: Option<String>,
    pub output_location: Option<String>,
}

/// Complete client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub endpoint: Option<String>,
    pub object_store_endpoint: Option<String>,
    pub query: QueryDefaults,
    pub http: HttpClientConfig,
    pub polling: DelayPolicy,
    pub result: ResultConfig,
    pub fetch: FetchConfig,
    pub log: LogConfig,
    pub driver: DriverInfo,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from `athena.*` properties.
    ///
    /// Keys outside the `athena.` namespace are ignored; unknown or malformed
    /// `athena.*` keys are rejected.
    pub fn from_properties<'a, I>(properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in properties {
            if key.starts_with("athena.") {
                config.set_property(key, value)?;
            }
        }
        Ok(config)
    }

    /// Apply one property.
    pub fn set_property(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "athena.endpoint" => self.endpoint = Some(value.to_string()),
            "athena.s3_endpoint" => self.object_store_endpoint = Some(value.to_string()),
            "athena.database" => self.query.database = Some(value.to_string()),
            "athena.workgroup" => self.query.workgroup = Some(value.to_string()),
            "athena.output_location" => self.query.output_location = Some(value.to_string()),

            "athena.result_backend" => {
                self.result.backend =
                    ResultBackend::parse(value).ok_or_else(|| invalid_value(key, value))?;
            }
            "athena.fetch_size" => {
                let size = parse_int(key, value)? as u64;
                if size == 0 || size > MAX_FETCH_SIZE as u64 {
                    return Err(ResultsErrorHelper::invalid_argument().message(format!(
                        "{} must be between 1 and {}, got {}",
                        key, MAX_FETCH_SIZE, value
                    )));
                }
                self.result.fetch_size = size as u32;
            }
            "athena.fetch_timeout_ms" => self.result.fetch_timeout = parse_millis(key, value)?,

            "athena.poll.interval_ms" => {
                let interval = parse_millis(key, value)?;
                self.polling = match self.polling {
                    DelayPolicy::Fixed(_) => DelayPolicy::Fixed(interval),
                    DelayPolicy::Backoff { factor, max, .. } => DelayPolicy::Backoff {
                        initial: interval,
                        factor,
                        max,
                    },
                };
            }
            "athena.poll.max_interval_ms" => {
                let cap = parse_millis(key, value)?;
                if let DelayPolicy::Backoff { max, .. } = &mut self.polling {
                    *max = cap;
                }
            }
            "athena.poll.backoff" => {
                let enabled = parse_bool(key, value)?;
                self.polling = match (&self.polling, enabled) {
                    (DelayPolicy::Backoff { initial, .. }, false) => DelayPolicy::Fixed(*initial),
                    (DelayPolicy::Fixed(initial), true) => DelayPolicy::Backoff {
                        initial: *initial,
                        factor: DEFAULT_BACKOFF_FACTOR,
                        max: Duration::from_secs(5),
                    },
                    (policy, _) => policy.clone(),
                };
            }
            "athena.poll.backoff_factor" => {
                let value = parse_int(key, value)? as u32;
                if let DelayPolicy::Backoff { factor, .. } = &mut self.polling {
                    *factor = value.max(1);
                }
            }

            "athena.fetch.max_retries" => self.fetch.max_retries = parse_int(key, value)? as u32,
            "athena.fetch.retry_delay_ms" => self.fetch.retry_delay = parse_millis(key, value)?,
            "athena.fetch.chunk_buffer" => {
                self.fetch.chunk_buffer = (parse_int(key, value)? as usize).max(1)
            }
            "athena.fetch.low_watermark_bytes" => {
                self.fetch.low_watermark_bytes = parse_int(key, value)? as usize
            }
            "athena.fetch.read_timeout_ms" => self.fetch.read_timeout = parse_millis(key, value)?,

            "athena.http.connect_timeout_ms" => {
                self.http.connect_timeout = parse_millis(key, value)?
            }
            "athena.http.read_timeout_ms" => self.http.read_timeout = parse_millis(key, value)?,
            "athena.http.max_retries" => self.http.max_retries = parse_int(key, value)? as u32,

            "athena.log_level" => self.log.level = Some(value.to_string()),
            "athena.log_file" => self.log.file = Some(value.to_string()),

            _ => {
                return Err(ResultsErrorHelper::invalid_argument()
                    .message(format!("Unknown property: {}", key)));
            }
        }
        Ok(())
    }
}

fn invalid_value(key: &str, value: &str) -> crate::error::Error {
    ResultsErrorHelper::invalid_argument().message(format!("Invalid value for {}: {}", key, value))
}

/// Parse a boolean property value.
fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid_value(key, value)),
    }
}

/// Parse a non-negative integer property value.
fn parse_int(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| invalid_value(key, value))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    parse_int(key, value).map(Duration::from_millis)
}
