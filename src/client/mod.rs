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

//! Clients for the query execution service.
//!
//! This module provides:
//! - `QueryExecutionClient` trait: submit/status/results/stop operations
//! - `HttpClient`: low-level HTTP client with retry logic
//! - `AthenaClient`: implementation over the Athena JSON 1.1 protocol

pub mod athena;
pub mod http;

use crate::error::Result;
use crate::types::{ExecutionHandle, QueryStatus, ResultPage};
use async_trait::async_trait;

pub use athena::AthenaClient;
pub use http::{HttpClient, HttpClientConfig, RequestSigner, Unsigned};

/// Parameters of a query submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub query: String,
    pub database: Option<String>,
    pub workgroup: Option<String>,
    /// `s3://` prefix the service writes the result file under.
    pub output_location: Option<String>,
    /// Makes resubmission idempotent. A random token is used when unset.
    pub idempotency_token: Option<String>,
}

impl SubmitRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Abstract interface for the asynchronous query service.
///
/// Implementations handle the protocol; result readers and the executor only
/// see these four operations.
#[async_trait]
pub trait QueryExecutionClient: Send + Sync + std::fmt::Debug {
    /// Submit a query and return its handle without waiting for it to run.
    async fn submit(&self, request: &SubmitRequest) -> Result<ExecutionHandle>;

    /// Current state of a submitted query.
    async fn get_status(&self, handle: &ExecutionHandle) -> Result<QueryStatus>;

    /// One page of results. `next_token` is `None` for the first page.
    async fn get_result_page(
        &self,
        handle: &ExecutionHandle,
        next_token: Option<&str>,
        max_rows: u32,
    ) -> Result<ResultPage>;

    /// Ask the service to stop a running query.
    async fn stop(&self, handle: &ExecutionHandle) -> Result<()>;
}
