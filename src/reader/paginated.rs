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

//! Rows from the paginated result API.
//!
//! One implementation serves both loading strategies:
//!
//! | Trigger | Next page requested |
//! |---|---|
//! | `OnDemand` | when the current page is exhausted |
//! | `Eager` | as soon as the current page is loaded |
//!
//! At most one page request is in flight. A request that was interrupted or
//! outlived the fetch timeout is kept and awaited again by the next call
//! instead of being reissued, so a continuation token is never requested
//! twice.
//!
//! The first row of the first page repeats the column labels and is dropped.

use crate::client::QueryExecutionClient;
use crate::config::MAX_FETCH_SIZE;
use crate::error::{Error, Result, ResultsErrorHelper};
use crate::reader::{column_value, derive_position, QueryResult};
use crate::types::{ExecutionHandle, RawRow, ResultPage, RowPosition, Schema};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// When the next page is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLoadTrigger {
    OnDemand,
    Eager,
}

/// A page request in flight, with the token it was issued for.
#[derive(Debug)]
struct PendingPage {
    token: Option<String>,
    task: JoinHandle<Result<ResultPage>>,
}

pub struct PaginatedResult {
    client: Arc<dyn QueryExecutionClient>,
    handle: ExecutionHandle,
    trigger: PageLoadTrigger,
    runtime: Handle,
    fetch_size: u32,
    fetch_timeout: Duration,
    interrupt: CancellationToken,
    schema: Option<Schema>,
    rows: VecDeque<RawRow>,
    current: Option<RawRow>,
    next_token: Option<String>,
    first_page_loaded: bool,
    pending: Option<PendingPage>,
    row_number: u64,
    after_last: bool,
}

impl std::fmt::Debug for PaginatedResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedResult")
            .field("handle", &self.handle)
            .field("trigger", &self.trigger)
            .field("fetch_size", &self.fetch_size)
            .field("row_number", &self.row_number)
            .field("buffered_rows", &self.rows.len())
            .field("has_next_token", &self.next_token.is_some())
            .field("pending", &self.pending.is_some())
            .field("after_last", &self.after_last)
            .finish()
    }
}

impl PaginatedResult {
    pub fn new(
        client: Arc<dyn QueryExecutionClient>,
        handle: ExecutionHandle,
        trigger: PageLoadTrigger,
        runtime: Handle,
    ) -> Self {
        Self {
            client,
            handle,
            trigger,
            runtime,
            fetch_size: MAX_FETCH_SIZE,
            fetch_timeout: Duration::from_secs(10),
            interrupt: CancellationToken::new(),
            schema: None,
            rows: VecDeque::new(),
            current: None,
            next_token: None,
            first_page_loaded: false,
            pending: None,
            row_number: 0,
            after_last: false,
        }
    }

    /// Upper bound on waiting for one page.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Replace the interrupt token. Cancelling it makes a blocked call return
    /// `Interrupted`; call [`QueryResult::clear_interrupt`] or install a
    /// fresh token before calling again.
    pub fn set_interrupt(&mut self, interrupt: CancellationToken) {
        self.interrupt = interrupt;
    }

    pub fn trigger(&self) -> PageLoadTrigger {
        self.trigger
    }

    /// Whether a page request is in flight.
    pub fn has_pending_fetch(&self) -> bool {
        self.pending.is_some()
    }

    fn spawn_fetch(&self, token: Option<String>) -> PendingPage {
        debug!(
            "Requesting result page for {} (token: {}, max rows: {})",
            self.handle,
            token.as_deref().unwrap_or("<first>"),
            self.fetch_size
        );

        let client = Arc::clone(&self.client);
        let handle = self.handle.clone();
        let max_rows = self.fetch_size;
        let request_token = token.clone();
        let task = self.runtime.spawn(async move {
            client
                .get_result_page(&handle, request_token.as_deref(), max_rows)
                .await
        });

        PendingPage { token, task }
    }

    /// Start the next page request early if one is due.
    fn prefetch(&mut self) {
        if self.trigger != PageLoadTrigger::Eager || self.pending.is_some() {
            return;
        }
        if let Some(token) = self.next_token.take() {
            self.pending = Some(self.spawn_fetch(Some(token)));
        }
    }

    /// Load the next page into the row buffer. Returns `false` when there are
    /// no more pages.
    fn load_next_page(&mut self) -> Result<bool> {
        let pending = match self.pending.take() {
            Some(pending) => pending,
            None => {
                if self.first_page_loaded && self.next_token.is_none() {
                    return Ok(false);
                }
                let token = self.next_token.take();
                self.spawn_fetch(token)
            }
        };

        let page = self.await_page(pending)?;
        self.absorb(page);
        self.prefetch();
        Ok(true)
    }

    fn await_page(&mut self, mut pending: PendingPage) -> Result<ResultPage> {
        let interrupt = self.interrupt.clone();
        let timeout = self.fetch_timeout;

        let outcome = self.runtime.block_on(async {
            tokio::select! {
                biased;
                _ = interrupt.cancelled() => None,
                joined = tokio::time::timeout(timeout, &mut pending.task) => Some(joined),
            }
        });

        match outcome {
            None => {
                debug!("Page fetch for {} interrupted; keeping request", self.handle);
                self.pending = Some(pending);
                Err(ResultsErrorHelper::interrupted()
                    .message(format!("Interrupted while fetching results of {}", self.handle)))
            }
            Some(Err(_)) => {
                warn!(
                    "Page fetch for {} timed out after {:?}; keeping request",
                    self.handle, timeout
                );
                self.pending = Some(pending);
                Err(ResultsErrorHelper::timeout().message(format!(
                    "Fetching results of {} timed out after {:?}",
                    self.handle, timeout
                )))
            }
            Some(Ok(Err(join_error))) => {
                self.next_token = pending.token;
                Err(ResultsErrorHelper::io()
                    .message(format!("Page fetch task failed: {}", join_error))
                    .with_source(join_error))
            }
            Some(Ok(Ok(Err(e)))) => {
                self.next_token = pending.token;
                Err(Error::new(
                    e.kind(),
                    format!("Failed to fetch results of {}: {}", self.handle, e.message()),
                )
                .with_source(e))
            }
            Some(Ok(Ok(Ok(page)))) => Ok(page),
        }
    }

    fn absorb(&mut self, page: ResultPage) {
        if self.schema.is_none() {
            self.schema = Some(Schema::from(page.columns));
        }

        let mut rows = VecDeque::from(page.rows);
        if !self.first_page_loaded {
            rows.pop_front();
            self.first_page_loaded = true;
        }
        debug!(
            "Loaded {} rows for {} (more pages: {})",
            rows.len(),
            self.handle,
            page.next_token.is_some()
        );

        self.rows = rows;
        self.next_token = page.next_token;
    }

    fn is_last(&self) -> bool {
        let no_more_pages =
            self.first_page_loaded && self.next_token.is_none() && self.pending.is_none();
        match self.trigger {
            PageLoadTrigger::OnDemand => no_more_pages && self.rows.is_empty(),
            // Reported as soon as the final page is loaded.
            PageLoadTrigger::Eager => no_more_pages,
        }
    }
}

impl QueryResult for PaginatedResult {
    fn metadata(&mut self) -> Result<Schema> {
        if self.schema.is_none() {
            self.load_next_page()?;
        }
        self.schema.clone().ok_or_else(|| {
            ResultsErrorHelper::invalid_state()
                .message(format!("No column metadata returned for {}", self.handle))
        })
    }

    fn next(&mut self) -> Result<bool> {
        if self.after_last {
            return Ok(false);
        }

        loop {
            if let Some(row) = self.rows.pop_front() {
                self.current = Some(row);
                self.row_number += 1;
                return Ok(true);
            }
            if !self.load_next_page()? {
                self.current = None;
                self.after_last = true;
                return Ok(false);
            }
        }
    }

    fn row_number(&self) -> u64 {
        self.row_number
    }

    fn string_value(&self, index: usize) -> Result<Option<&str>> {
        column_value(self.current.as_deref(), index)
    }

    fn position(&self) -> RowPosition {
        derive_position(self.row_number, self.after_last, self.is_last())
    }

    fn fetch_size(&self) -> Option<u32> {
        Some(self.fetch_size)
    }

    fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    fn clear_interrupt(&mut self) {
        if self.interrupt.is_cancelled() {
            self.interrupt = CancellationToken::new();
        }
    }

    fn update_fetch_size(&mut self, size: u32) -> Result<()> {
        if size == 0 || size > MAX_FETCH_SIZE {
            return Err(ResultsErrorHelper::invalid_argument().message(format!(
                "Fetch size must be between 1 and {}, got {}",
                MAX_FETCH_SIZE, size
            )));
        }
        self.fetch_size = size;
        Ok(())
    }
}

impl Drop for PaginatedResult {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
        }
    }
}
