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

//! Result retrieval for Amazon Athena.
//!
//! A query is submitted to the service, polled until it reaches a terminal
//! state, and its rows are then read through one of several backends that
//! share the [`QueryResult`] cursor contract.
//!
//! ## Overview
//!
//! - [`PollingStrategy`] - waits for completion with fixed or backoff delays
//! - [`PaginatedResult`] - rows through `GetQueryResults`, optionally
//!   prefetching the next page
//! - [`ObjectStoreResult`] - rows streamed from the CSV result file
//! - [`ResumableObjectFetcher`] - object downloads that resume mid-stream
//! - [`QueryExecutor`] - submit, wait and open a reader in one place
//!
//! ## Example
//!
//! ```ignore
//! use athena_results::{ClientConfig, QueryExecutor, SubmitRequest, Unsigned};
//! use std::sync::Arc;
//!
//! let config = ClientConfig::from_properties([
//!     ("athena.endpoint", "https://athena.us-east-1.amazonaws.com"),
//!     ("athena.output_location", "s3://my-results/athena/"),
//!     ("athena.result_backend", "prefetch"),
//! ])?;
//! let executor = QueryExecutor::from_config(&config, Arc::new(Unsigned), runtime.handle().clone())?;
//!
//! let status = runtime
//!     .block_on(executor.execute(SubmitRequest::new("SELECT * FROM events")))?
//!     .expect("not interrupted");
//! let mut result = executor.open_result(&status)?;
//! while result.next()? {
//!     println!("{:?}", result.string_value(0)?);
//! }
//! ```
//!
//! See [`config`] for the full list of `athena.*` properties.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod object_store;
pub mod polling;
pub mod reader;
pub mod types;

// Re-export main types
pub use config::{ClientConfig, DriverInfo, ResultBackend};
pub use error::{Error, ErrorKind, Result, ResultsErrorHelper};
pub use execution::{status_check, QueryExecutor};
pub use polling::{DelayPolicy, PollOutcome, PollingStrategy};
pub use reader::fetch::{ObjectByteReader, ResumableObjectFetcher, StreamSignal};
pub use reader::{
    ObjectStoreResult, PageLoadTrigger, PaginatedResult, QueryResult, ResultReaderFactory,
};

// Re-export client types for advanced users
pub use client::{
    AthenaClient, HttpClient, HttpClientConfig, QueryExecutionClient, RequestSigner,
    SubmitRequest, Unsigned,
};
pub use object_store::{GetObjectRequest, GetObjectResponse, HttpObjectStore, ObjectStoreClient};
