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

//! Result readers for completed queries.
//!
//! This module provides:
//! - `QueryResult`: the forward-only row cursor every backend implements
//! - `PaginatedResult`: rows from the paginated result API, optionally
//!   prefetching the next page
//! - `ObjectStoreResult`: rows streamed from the CSV result file
//! - `ResultReaderFactory`: picks a backend from configuration

pub mod fetch;
pub mod object_store;
pub mod paginated;

use crate::client::QueryExecutionClient;
use crate::config::{FetchConfig, ResultBackend, ResultConfig};
use crate::error::{Result, ResultsErrorHelper};
use crate::object_store::ObjectStoreClient;
use crate::types::{QueryState, QueryStatus, RowPosition, Schema};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use object_store::ObjectStoreResult;
pub use paginated::{PageLoadTrigger, PaginatedResult};

/// Forward-only cursor over the rows of a completed query.
///
/// All methods block the calling thread while network I/O is outstanding,
/// so they must not be called from inside an async context.
pub trait QueryResult: Send + std::fmt::Debug {
    /// Column descriptors. Loads the first batch of data if needed.
    fn metadata(&mut self) -> Result<Schema>;

    /// Advance to the next row. Returns `false` once past the last row, and
    /// keeps returning `false` afterwards.
    fn next(&mut self) -> Result<bool>;

    /// 1-based number of the current row; 0 before the first `next`.
    fn row_number(&self) -> u64;

    /// Raw text of column `index` (0-based) in the current row; `None` is NULL.
    fn string_value(&self, index: usize) -> Result<Option<&str>>;

    fn position(&self) -> RowPosition;

    /// Rows fetched per request, or `None` if the backend is unbounded.
    fn fetch_size(&self) -> Option<u32>;

    /// Change the rows fetched per request. Rejects 0 and values above
    /// [`crate::config::MAX_FETCH_SIZE`].
    fn update_fetch_size(&mut self, size: u32) -> Result<()>;

    /// Token that interrupts a blocked call from another thread. The call
    /// returns `Interrupted` without advancing the cursor.
    fn interrupt_token(&self) -> CancellationToken;

    /// Replace a cancelled interrupt token so the cursor can be used again.
    /// Tokens handed out earlier no longer affect this cursor.
    fn clear_interrupt(&mut self);
}

/// Position of a cursor from its counters.
///
/// `AfterLast` wins over everything, then `BeforeFirst`, then `Last`, so a
/// single-row result reports `Last` rather than `First`.
pub(crate) fn derive_position(row_number: u64, after_last: bool, is_last: bool) -> RowPosition {
    if after_last {
        RowPosition::AfterLast
    } else if row_number == 0 {
        RowPosition::BeforeFirst
    } else if is_last {
        RowPosition::Last
    } else if row_number == 1 {
        RowPosition::First
    } else {
        RowPosition::Middle
    }
}

/// Validated accessor shared by the readers.
pub(crate) fn column_value(row: Option<&[Option<String>]>, index: usize) -> Result<Option<&str>> {
    let row = row.ok_or_else(|| {
        ResultsErrorHelper::invalid_state().message("No current row; call next() first")
    })?;
    let value = row.get(index).ok_or_else(|| {
        ResultsErrorHelper::invalid_argument().message(format!(
            "Column index {} out of range for row of {} columns",
            index,
            row.len()
        ))
    })?;
    Ok(value.as_deref())
}

/// Factory that creates the configured reader for a completed query.
#[derive(Debug)]
pub struct ResultReaderFactory {
    client: Arc<dyn QueryExecutionClient>,
    store: Option<Arc<dyn ObjectStoreClient>>,
    result_config: ResultConfig,
    fetch_config: FetchConfig,
    runtime_handle: tokio::runtime::Handle,
}

impl ResultReaderFactory {
    pub fn new(
        client: Arc<dyn QueryExecutionClient>,
        result_config: ResultConfig,
        fetch_config: FetchConfig,
        runtime_handle: tokio::runtime::Handle,
    ) -> Self {
        Self {
            client,
            store: None,
            result_config,
            fetch_config,
            runtime_handle,
        }
    }

    /// Object store used by the `ObjectStore` backend.
    pub fn with_object_store(mut self, store: Arc<dyn ObjectStoreClient>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn backend(&self) -> ResultBackend {
        self.result_config.backend
    }

    /// Create a reader for a query in its final state, with its own
    /// interrupt token.
    pub fn create_reader(&self, status: &QueryStatus) -> Result<Box<dyn QueryResult>> {
        self.create_interruptible_reader(status, CancellationToken::new())
    }

    /// Create a reader whose blocking calls are interrupted by `interrupt`.
    pub fn create_interruptible_reader(
        &self,
        status: &QueryStatus,
        interrupt: CancellationToken,
    ) -> Result<Box<dyn QueryResult>> {
        match status.state {
            QueryState::Succeeded => {}
            QueryState::Queued | QueryState::Running => {
                return Err(ResultsErrorHelper::invalid_state().message(format!(
                    "Query {} is still executing. Poll for completion first.",
                    status.handle
                )));
            }
            QueryState::Failed => {
                return Err(ResultsErrorHelper::query_failed()
                    .message(status.reason.clone().unwrap_or_default()));
            }
            QueryState::Cancelled => {
                return Err(ResultsErrorHelper::query_canceled()
                    .message(status.reason.clone().unwrap_or_default()));
            }
        }

        debug!(
            "Creating {:?} reader for query {}",
            self.result_config.backend, status.handle
        );

        match self.result_config.backend {
            ResultBackend::Paginated => Ok(Box::new(self.paginated(
                status,
                PageLoadTrigger::OnDemand,
                interrupt,
            )?)),
            ResultBackend::PrefetchingPaginated => Ok(Box::new(self.paginated(
                status,
                PageLoadTrigger::Eager,
                interrupt,
            )?)),
            ResultBackend::ObjectStore => {
                let store = self.store.clone().ok_or_else(|| {
                    ResultsErrorHelper::invalid_state()
                        .message("Object store backend selected but no object store configured")
                })?;
                let output_location = status.output_location.as_deref().ok_or_else(|| {
                    ResultsErrorHelper::invalid_state().message(format!(
                        "Query {} reported no output location",
                        status.handle
                    ))
                })?;
                Ok(Box::new(
                    ObjectStoreResult::new(
                        store,
                        output_location,
                        self.fetch_config.clone(),
                        self.runtime_handle.clone(),
                    )?
                    .with_interrupt(interrupt),
                ))
            }
        }
    }

    fn paginated(
        &self,
        status: &QueryStatus,
        trigger: PageLoadTrigger,
        interrupt: CancellationToken,
    ) -> Result<PaginatedResult> {
        let mut result = PaginatedResult::new(
            Arc::clone(&self.client),
            status.handle.clone(),
            trigger,
            self.runtime_handle.clone(),
        )
        .with_fetch_timeout(self.result_config.fetch_timeout);
        result.set_interrupt(interrupt);
        result.update_fetch_size(self.result_config.fetch_size)?;
        Ok(result)
    }
}
