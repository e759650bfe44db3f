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

//! Rows read straight from the CSV result file in the object store.
//!
//! On first access the reader downloads `<key>.metadata` to build the
//! schema, then streams `<key>` through the CSV parser. The reader stays one
//! row ahead of the caller so it can tell when the current row is the last.
//!
//! A failed download is terminal: `next` keeps returning the failure and the
//! cursor never moves to `AfterLast`. The interrupt token is honoured while
//! the column metadata loads and on entry to `next`; reads of the CSV body
//! are bounded by the read timeout instead.

use crate::codec::{parse_column_metadata, CsvRowReader};
use crate::config::{FetchConfig, MAX_FETCH_SIZE, METADATA_SUFFIX};
use crate::error::{Error, Result, ResultsErrorHelper};
use crate::object_store::ObjectStoreClient;
use crate::reader::fetch::{ObjectByteReader, ResumableObjectFetcher};
use crate::reader::{column_value, derive_position, QueryResult};
use crate::types::{ObjectLocation, RawRow, RowPosition, Schema};
use std::io::BufReader;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type CsvSource = CsvRowReader<BufReader<ObjectByteReader>>;

pub struct ObjectStoreResult {
    store: Arc<dyn ObjectStoreClient>,
    location: ObjectLocation,
    config: FetchConfig,
    runtime: Handle,
    schema: Option<Schema>,
    csv: Option<CsvSource>,
    current: Option<RawRow>,
    lookahead: Option<RawRow>,
    /// A read error hit while looking ahead; reported by the next `next`.
    deferred: Option<Error>,
    /// Terminal failure, reported again by every later `next`.
    failed: Option<Error>,
    interrupt: CancellationToken,
    row_number: u64,
    after_last: bool,
}

impl std::fmt::Debug for ObjectStoreResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreResult")
            .field("location", &self.location)
            .field("opened", &self.csv.is_some())
            .field("row_number", &self.row_number)
            .field("after_last", &self.after_last)
            .field("failed", &self.failed.is_some())
            .finish()
    }
}

impl ObjectStoreResult {
    /// `output_location` is the `s3://bucket/key` the query wrote its result to.
    pub fn new(
        store: Arc<dyn ObjectStoreClient>,
        output_location: &str,
        config: FetchConfig,
        runtime: Handle,
    ) -> Result<Self> {
        Ok(Self {
            store,
            location: ObjectLocation::parse(output_location)?,
            config,
            runtime,
            schema: None,
            csv: None,
            current: None,
            lookahead: None,
            deferred: None,
            failed: None,
            interrupt: CancellationToken::new(),
            row_number: 0,
            after_last: false,
        })
    }

    /// Token that interrupts a blocked metadata load.
    pub fn with_interrupt(mut self, interrupt: CancellationToken) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn location(&self) -> &ObjectLocation {
        &self.location
    }

    fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.is_cancelled() {
            return Err(ResultsErrorHelper::interrupted()
                .message(format!("Interrupted while reading {}", self.location)));
        }
        Ok(())
    }

    fn fail(&mut self, error: Error) -> Error {
        warn!(
            "Reading {} failed after {} rows: {}",
            self.location, self.row_number, error
        );
        self.current = None;
        self.lookahead = None;
        self.csv = None;
        self.failed = Some(error.repeat());
        error
    }

    fn open(&mut self) -> Result<()> {
        if self.schema.is_some() {
            return Ok(());
        }

        let metadata_location = self.location.with_key_suffix(METADATA_SUFFIX);
        debug!("Loading column metadata from {}", metadata_location);
        let fetcher = ResumableObjectFetcher::new(
            Arc::clone(&self.store),
            metadata_location.clone(),
            &self.config,
            self.runtime.clone(),
        );
        let timeout = self.config.read_timeout;
        let interrupt = self.interrupt.clone();
        let loaded = self.runtime.block_on(async {
            tokio::select! {
                biased;
                _ = interrupt.cancelled() => None,
                loaded = tokio::time::timeout(timeout, fetcher.fetch_all()) => Some(loaded),
            }
        });
        let blob = match loaded {
            None => {
                return Err(ResultsErrorHelper::interrupted().message(format!(
                    "Interrupted while loading {}",
                    metadata_location
                )));
            }
            Some(loaded) => loaded.map_err(|_| {
                ResultsErrorHelper::timeout().message(format!(
                    "Loading {} timed out after {:?}",
                    metadata_location, timeout
                ))
            })??,
        };

        let columns = parse_column_metadata(blob)?;
        debug!("{} has {} columns", self.location, columns.len());

        let bytes = ObjectByteReader::new(
            Arc::clone(&self.store),
            self.location.clone(),
            self.config.clone(),
            self.runtime.clone(),
        );
        let mut csv = CsvRowReader::new(BufReader::new(bytes), columns.len());

        // Header row repeating the column labels.
        csv.next_row()?;
        self.lookahead = csv.next_row()?;

        self.schema = Some(Schema::from(columns));
        self.csv = Some(csv);
        Ok(())
    }

    fn read_ahead(&mut self) {
        let Some(csv) = self.csv.as_mut() else {
            return;
        };
        match csv.next_row() {
            Ok(row) => self.lookahead = row,
            Err(e) => self.deferred = Some(e),
        }
    }
}

impl QueryResult for ObjectStoreResult {
    fn metadata(&mut self) -> Result<Schema> {
        if self.schema.is_none() {
            self.check_interrupt()?;
        }
        self.open()?;
        self.schema.clone().ok_or_else(|| {
            ResultsErrorHelper::invalid_state()
                .message(format!("No column metadata for {}", self.location))
        })
    }

    fn next(&mut self) -> Result<bool> {
        if let Some(ref failed) = self.failed {
            return Err(failed.repeat());
        }
        if self.after_last {
            return Ok(false);
        }
        self.check_interrupt()?;
        self.open()?;
        if let Some(e) = self.deferred.take() {
            return Err(self.fail(e));
        }

        match self.lookahead.take() {
            Some(row) => {
                self.current = Some(row);
                self.row_number += 1;
                self.read_ahead();
                Ok(true)
            }
            None => {
                debug!("{} exhausted after {} rows", self.location, self.row_number);
                self.current = None;
                self.after_last = true;
                self.csv = None;
                Ok(false)
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
        if self.failed.is_some() {
            return derive_position(self.row_number, false, false);
        }
        let is_last = self.csv.is_some() && self.lookahead.is_none() && self.deferred.is_none();
        derive_position(self.row_number, self.after_last, is_last)
    }

    /// The whole file is streamed, so there is no page size.
    fn fetch_size(&self) -> Option<u32> {
        None
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
        Ok(())
    }
}
