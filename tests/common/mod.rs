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

//! In-memory query service and object store used by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use athena_results::config::FetchConfig;
use athena_results::error::{Error, ErrorKind, Result, ResultsErrorHelper};
use athena_results::types::{
    ColumnDescriptor, ExecutionHandle, ObjectLocation, QueryState, QueryStatus, RawRow,
    ResultPage,
};
use athena_results::{
    GetObjectRequest, GetObjectResponse, ObjectStoreClient, QueryExecutionClient, SubmitRequest,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

// =============================================================================
// Object store
// =============================================================================

/// Failure injected into one GET, in call order.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// The body fails after this many bytes of the requested range.
    FailAfter(usize),
    /// The GET itself fails with this kind.
    FailOpen(ErrorKind),
}

#[derive(Debug)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<ObjectLocation, (Bytes, String)>>,
    chunk_size: usize,
    faults: Mutex<VecDeque<Option<Fault>>>,
    requests: Mutex<Vec<GetObjectRequest>>,
    cancelled_bodies: Arc<AtomicUsize>,
}

impl MemoryObjectStore {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            chunk_size,
            faults: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            cancelled_bodies: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn put(&self, location: &ObjectLocation, data: impl Into<Bytes>, etag: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(location.clone(), (data.into(), etag.to_string()));
    }

    /// Faults applied to the next GETs, one entry per call.
    pub fn with_faults(self, faults: Vec<Option<Fault>>) -> Self {
        *self.faults.lock().unwrap() = faults.into();
        self
    }

    pub fn requests(&self) -> Vec<GetObjectRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Bodies dropped before they were fully consumed.
    pub fn cancelled_bodies(&self) -> usize {
        self.cancelled_bodies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStoreClient for MemoryObjectStore {
    async fn get_object(&self, request: GetObjectRequest) -> Result<GetObjectResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let fault = self.faults.lock().unwrap().pop_front().flatten();

        if let Some(Fault::FailOpen(kind)) = fault {
            return Err(Error::new(kind, "injected open failure"));
        }

        let (data, etag) = self
            .objects
            .lock()
            .unwrap()
            .get(&request.location)
            .cloned()
            .ok_or_else(|| {
                ResultsErrorHelper::not_found()
                    .message(format!("No such key: {}", request.location))
            })?;

        if let Some(ref expected) = request.if_match {
            if *expected != etag {
                return Err(ResultsErrorHelper::precondition_failed()
                    .message(format!("ETag {} does not match {}", expected, etag)));
            }
        }

        let start = request.range_start.unwrap_or(0) as usize;
        let range = data.slice(start.min(data.len())..);
        let content_length = range.len() as u64;

        let limit = match fault {
            Some(Fault::FailAfter(n)) => n.min(range.len()),
            _ => range.len(),
        };
        let mut items: VecDeque<Result<Bytes>> = VecDeque::new();
        let mut offset = 0;
        while offset < limit {
            let end = (offset + self.chunk_size).min(limit);
            items.push_back(Ok(range.slice(offset..end)));
            offset = end;
        }
        if let Some(Fault::FailAfter(_)) = fault {
            items.push_back(Err(ResultsErrorHelper::io().message("connection reset by peer")));
        }

        Ok(GetObjectResponse {
            etag: Some(etag),
            content_length: Some(content_length),
            body: MockBody {
                items,
                cancelled: Arc::clone(&self.cancelled_bodies),
            }
            .boxed(),
        })
    }
}

struct MockBody {
    items: VecDeque<Result<Bytes>>,
    cancelled: Arc<AtomicUsize>,
}

impl Stream for MockBody {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.items.pop_front())
    }
}

impl Drop for MockBody {
    fn drop(&mut self) {
        if !self.items.is_empty() {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub fn test_fetch_config() -> FetchConfig {
    FetchConfig {
        max_retries: 3,
        retry_delay: Duration::from_millis(1),
        chunk_buffer: 4,
        low_watermark_bytes: 128,
        read_timeout: Duration::from_secs(5),
    }
}

/// Deterministic, non-repeating-looking payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// =============================================================================
// Metadata encoding
// =============================================================================

fn varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn text_field(buf: &mut Vec<u8>, number: u64, text: &str) {
    varint(buf, (number << 3) | 2);
    varint(buf, text.len() as u64);
    buf.extend_from_slice(text.as_bytes());
}

fn int_field(buf: &mut Vec<u8>, number: u64, value: u64) {
    varint(buf, number << 3);
    varint(buf, value);
}

/// Encode a `.metadata` blob for `(name, type, nullable code)` columns.
pub fn metadata_blob(columns: &[(&str, &str, u64)]) -> Vec<u8> {
    let mut blob = Vec::new();
    for (name, type_name, nullable) in columns {
        let mut column = Vec::new();
        text_field(&mut column, 1, "hive");
        text_field(&mut column, 4, name);
        text_field(&mut column, 5, name);
        text_field(&mut column, 6, type_name);
        int_field(&mut column, 9, *nullable);
        int_field(&mut column, 10, 1);

        varint(&mut blob, (1 << 3) | 2);
        varint(&mut blob, column.len() as u64);
        blob.extend_from_slice(&column);
    }
    blob
}

// =============================================================================
// Query service
// =============================================================================

#[derive(Debug)]
pub struct ScriptedQueryClient {
    states: Mutex<VecDeque<(QueryState, Option<String>)>>,
    columns: Vec<ColumnDescriptor>,
    /// Header row followed by the data rows.
    rows: Vec<RawRow>,
    output_location: Option<String>,
    page_delay: Duration,
    page_error: Option<ErrorKind>,
    pub page_calls: Mutex<Vec<(Option<String>, u32)>>,
    pub submitted: Mutex<Vec<SubmitRequest>>,
    pub status_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    /// While set, every status is RUNNING and the script is not consumed.
    pub hold_running: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedQueryClient {
    /// A result with columns `n` and `label` and rows `1..=row_count`.
    pub fn with_rows(row_count: usize) -> Self {
        let columns = ["n", "label"]
            .iter()
            .map(|name| ColumnDescriptor {
                name: name.to_string(),
                label: name.to_string(),
                declared_type: "varchar".to_string(),
                ..Default::default()
            })
            .collect();

        let mut rows: Vec<RawRow> = vec![vec![Some("n".to_string()), Some("label".to_string())]];
        for i in 1..=row_count {
            let label = if i % 2 == 0 {
                None
            } else {
                Some(format!("row {}", i))
            };
            rows.push(vec![Some(i.to_string()), label]);
        }

        Self {
            states: Mutex::new(VecDeque::from(vec![(QueryState::Succeeded, None)])),
            columns,
            rows,
            output_location: None,
            page_delay: Duration::ZERO,
            page_error: None,
            page_calls: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            status_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            hold_running: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Status sequence reported by `get_status`; the last entry repeats.
    pub fn with_states(self, states: Vec<(QueryState, Option<&str>)>) -> Self {
        *self.states.lock().unwrap() = states
            .into_iter()
            .map(|(state, reason)| (state, reason.map(str::to_string)))
            .collect();
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_page_error(mut self, kind: ErrorKind) -> Self {
        self.page_error = Some(kind);
        self
    }

    pub fn with_output_location(mut self, location: &str) -> Self {
        self.output_location = Some(location.to_string());
        self
    }

    pub fn page_tokens(&self) -> Vec<Option<String>> {
        self.page_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(token, _)| token.clone())
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutionClient for ScriptedQueryClient {
    async fn submit(&self, request: &SubmitRequest) -> Result<ExecutionHandle> {
        self.submitted.lock().unwrap().push(request.clone());
        Ok(ExecutionHandle::new("query-1"))
    }

    async fn get_status(&self, handle: &ExecutionHandle) -> Result<QueryStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_running.load(Ordering::SeqCst) {
            return Ok(QueryStatus {
                handle: handle.clone(),
                state: QueryState::Running,
                reason: None,
                output_location: None,
            });
        }
        let (state, reason) = {
            let mut states = self.states.lock().unwrap();
            if states.len() > 1 {
                states.pop_front().unwrap()
            } else {
                states.front().cloned().unwrap()
            }
        };
        Ok(QueryStatus {
            handle: handle.clone(),
            state,
            reason,
            output_location: self.output_location.clone(),
        })
    }

    async fn get_result_page(
        &self,
        _handle: &ExecutionHandle,
        next_token: Option<&str>,
        max_rows: u32,
    ) -> Result<ResultPage> {
        self.page_calls
            .lock()
            .unwrap()
            .push((next_token.map(str::to_string), max_rows));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(kind) = self.page_error {
            return Err(Error::new(kind, "InternalServerException: try again"));
        }

        let offset: usize = match next_token {
            None => 0,
            Some(token) => token
                .strip_prefix("page-")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| ResultsErrorHelper::invalid_argument().message("bad token"))?,
        };
        let end = (offset + max_rows as usize).min(self.rows.len());

        Ok(ResultPage {
            columns: if offset == 0 {
                self.columns.clone()
            } else {
                Vec::new()
            },
            rows: self.rows[offset..end].to_vec(),
            next_token: (end < self.rows.len()).then(|| format!("page-{}", end)),
        })
    }

    async fn stop(&self, _handle: &ExecutionHandle) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Value of column `n` for every remaining row of `result`.
pub fn drain_numbers(result: &mut dyn athena_results::QueryResult) -> Vec<String> {
    let mut values = Vec::new();
    while result.next().unwrap() {
        values.push(result.string_value(0).unwrap().unwrap().to_string());
    }
    values
}
