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

//! Resumable, demand-driven object download.
//!
//! A [`ResumableObjectFetcher`] spawns one task per subscription. The task
//! owns all mutable fetch state and talks to the consumer through two
//! channels:
//!
//! ```text
//! FetchSubscription ── request(n) ──> [control, unbounded] ──> FetchTask
//! FetchSubscription <── signals ───── [chunks, bounded]   <── FetchTask ── GET ──> store
//! ```
//!
//! The task only polls the upstream body while the consumer has outstanding
//! demand (counted in chunks). If the body fails after a response was
//! received, the task re-requests `bytes=<delivered>-` with `If-Match` set to
//! the first response's ETag and keeps delivering to the same consumer.
//! Every subscription ends with exactly one `Complete` or `Error` signal,
//! unless it is cancelled, in which case it ends silently.

use crate::config::FetchConfig;
use crate::error::{Error, ErrorKind, Result, ResultsErrorHelper};
use crate::object_store::{GetObjectRequest, GetObjectResponse, ObjectStoreClient};
use crate::types::ObjectLocation;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Signal delivered to a subscriber, in order.
#[derive(Debug)]
pub enum StreamSignal {
    Chunk(Bytes),
    Complete,
    Error(Error),
}

/// Streams one object to a single subscriber, resuming after mid-stream
/// failures.
pub struct ResumableObjectFetcher {
    store: Arc<dyn ObjectStoreClient>,
    location: ObjectLocation,
    runtime: Handle,
    max_retries: u32,
    retry_delay: Duration,
    chunk_buffer: usize,
    start_offset: u64,
    if_match: Option<String>,
    subscribed: AtomicBool,
}

impl std::fmt::Debug for ResumableObjectFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumableObjectFetcher")
            .field("location", &self.location)
            .field("max_retries", &self.max_retries)
            .field("start_offset", &self.start_offset)
            .field("if_match", &self.if_match)
            .finish()
    }
}

impl ResumableObjectFetcher {
    pub fn new(
        store: Arc<dyn ObjectStoreClient>,
        location: ObjectLocation,
        config: &FetchConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            store,
            location,
            runtime,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            chunk_buffer: config.chunk_buffer.max(1),
            start_offset: 0,
            if_match: None,
            subscribed: AtomicBool::new(false),
        }
    }

    /// Override the resume budget from the config.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Continue an earlier download at `offset`, requiring the object to
    /// still carry `etag`.
    pub fn resume_from(mut self, offset: u64, etag: Option<String>) -> Self {
        self.start_offset = offset;
        self.if_match = etag;
        self
    }

    pub fn location(&self) -> &ObjectLocation {
        &self.location
    }

    /// Start the download. Only one subscription is allowed per fetcher; a
    /// second call fails with `InvalidState` and leaves the first untouched.
    pub fn subscribe(&self) -> Result<FetchSubscription> {
        if self.subscribed.swap(true, Ordering::AcqRel) {
            return Err(ResultsErrorHelper::invalid_state().message(format!(
                "Fetch of {} already has a subscriber",
                self.location
            )));
        }

        let (chunk_tx, chunk_rx) = mpsc::channel(self.chunk_buffer);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (etag_tx, etag_rx) = watch::channel(self.if_match.clone());
        let cancel = CancellationToken::new();
        let responded = Arc::new(AtomicBool::new(false));

        let task = FetchTask {
            store: Arc::clone(&self.store),
            location: self.location.clone(),
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            chunks: chunk_tx,
            control: control_rx,
            etag_tx,
            cancel: cancel.clone(),
            responded_flag: Arc::clone(&responded),
            state: RetryState {
                demand: 0,
                bytes_delivered: self.start_offset,
                retries_remaining: self.max_retries,
                etag: self.if_match.clone(),
                end: None,
                responded: false,
                failures: Vec::new(),
            },
        };

        debug!(
            "Starting fetch of {} at offset {}",
            self.location, self.start_offset
        );
        self.runtime.spawn(task.run());

        Ok(FetchSubscription {
            chunks: chunk_rx,
            control: control_tx,
            etag: etag_rx,
            cancel,
            responded,
            terminated: false,
        })
    }

    /// Subscribe and collect the whole object.
    pub async fn fetch_all(&self) -> Result<Bytes> {
        let mut subscription = self.subscribe()?;
        let mut data = BytesMut::new();
        subscription.request(self.chunk_buffer as u64)?;

        loop {
            match subscription.next_signal().await {
                Some(StreamSignal::Chunk(chunk)) => {
                    data.extend_from_slice(&chunk);
                    subscription.request(1)?;
                }
                Some(StreamSignal::Complete) => return Ok(data.freeze()),
                Some(StreamSignal::Error(e)) => return Err(e),
                None => {
                    return Err(ResultsErrorHelper::io().message(format!(
                        "Fetch of {} ended without completing",
                        self.location
                    )));
                }
            }
        }
    }
}

/// Consumer side of a fetch. Dropping it cancels the fetch.
#[derive(Debug)]
pub struct FetchSubscription {
    chunks: mpsc::Receiver<StreamSignal>,
    control: mpsc::UnboundedSender<u64>,
    etag: watch::Receiver<Option<String>>,
    cancel: CancellationToken,
    responded: Arc<AtomicBool>,
    terminated: bool,
}

impl FetchSubscription {
    /// Allow `n` more chunks to be delivered.
    pub fn request(&self, n: u64) -> Result<()> {
        if n == 0 {
            return Err(ResultsErrorHelper::invalid_argument()
                .message("Requested chunk count must be positive"));
        }
        // A finished task has dropped its receiver; demand after the end is moot.
        let _ = self.control.send(n);
        Ok(())
    }

    /// Next signal, or `None` after a terminal signal or cancellation.
    pub async fn next_signal(&mut self) -> Option<StreamSignal> {
        if self.terminated || self.cancel.is_cancelled() {
            return None;
        }

        let signal = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            signal = self.chunks.recv() => signal,
        };
        if !matches!(signal, Some(StreamSignal::Chunk(_))) {
            self.terminated = true;
        }
        signal
    }

    /// Stop the fetch. No chunks or retries follow.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// ETag of the object, once the first response has arrived.
    pub fn etag(&self) -> Option<String> {
        self.etag.borrow().clone()
    }

    /// Whether the store has answered at least one GET successfully, even if
    /// no chunk was delivered before the body failed.
    pub fn has_response(&self) -> bool {
        self.responded.load(Ordering::Acquire)
    }
}

impl Drop for FetchSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct RetryState {
    /// Outstanding chunk demand; persists across resumes.
    demand: u64,
    /// Absolute offset of the next byte to deliver.
    bytes_delivered: u64,
    retries_remaining: u32,
    etag: Option<String>,
    /// Absolute object length, from the first response.
    end: Option<u64>,
    responded: bool,
    failures: Vec<Error>,
}

enum PumpOutcome {
    Completed,
    Cancelled,
    Failed(Error),
}

struct FetchTask {
    store: Arc<dyn ObjectStoreClient>,
    location: ObjectLocation,
    max_retries: u32,
    retry_delay: Duration,
    chunks: mpsc::Sender<StreamSignal>,
    control: mpsc::UnboundedReceiver<u64>,
    etag_tx: watch::Sender<Option<String>>,
    cancel: CancellationToken,
    responded_flag: Arc<AtomicBool>,
    state: RetryState,
}

impl FetchTask {
    async fn run(mut self) {
        match self.drive().await {
            Ok(true) => {
                debug!(
                    "Fetch of {} complete at {} bytes",
                    self.location, self.state.bytes_delivered
                );
                self.deliver(StreamSignal::Complete).await;
            }
            Ok(false) => {
                debug!(
                    "Fetch of {} cancelled at offset {}",
                    self.location, self.state.bytes_delivered
                );
            }
            Err(e) => {
                warn!("Fetch of {} failed: {}", self.location, e);
                self.deliver(StreamSignal::Error(e)).await;
            }
        }
    }

    /// Returns `Ok(true)` on completion and `Ok(false)` on cancellation.
    async fn drive(&mut self) -> Result<bool> {
        loop {
            let request = GetObjectRequest {
                location: self.location.clone(),
                range_start: (self.state.bytes_delivered > 0).then_some(self.state.bytes_delivered),
                if_match: self.state.etag.clone(),
            };

            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(false),
                result = self.store.get_object(request) => result,
            };

            let response = match opened.and_then(|response| self.accept(response)) {
                Ok(response) => response,
                Err(e) => {
                    let e = self.with_context(e);
                    if !self.state.responded {
                        return Err(e);
                    }
                    if !self.prepare_retry(e).await? {
                        return Ok(false);
                    }
                    continue;
                }
            };

            match self.pump(response.body).await {
                PumpOutcome::Completed => return Ok(true),
                PumpOutcome::Cancelled => return Ok(false),
                PumpOutcome::Failed(e) => {
                    if !self.prepare_retry(e).await? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Record the first response's ETag and length; reject a changed ETag.
    fn accept(&mut self, response: GetObjectResponse) -> Result<GetObjectResponse> {
        if let (Some(expected), Some(actual)) = (&self.state.etag, &response.etag) {
            if expected != actual {
                return Err(ResultsErrorHelper::precondition_failed().message(format!(
                    "ETag changed from {} to {}",
                    expected, actual
                )));
            }
        }

        if self.state.etag.is_none() {
            self.state.etag = response.etag.clone();
            self.etag_tx.send_replace(response.etag.clone());
        }
        if self.state.end.is_none() {
            self.state.end = response
                .content_length
                .map(|len| self.state.bytes_delivered + len);
        }
        self.state.responded = true;
        self.responded_flag.store(true, Ordering::Release);
        Ok(response)
    }

    async fn pump(&mut self, mut body: BoxStream<'static, Result<Bytes>>) -> PumpOutcome {
        loop {
            if self
                .state
                .end
                .is_some_and(|end| self.state.bytes_delivered >= end)
            {
                return PumpOutcome::Completed;
            }
            if !self.await_demand().await {
                return PumpOutcome::Cancelled;
            }

            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PumpOutcome::Cancelled,
                item = body.next() => item,
            };

            match item {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    let len = chunk.len() as u64;
                    if !self.deliver(StreamSignal::Chunk(chunk)).await {
                        return PumpOutcome::Cancelled;
                    }
                    self.state.bytes_delivered += len;
                    self.state.demand -= 1;
                }
                Some(Err(e)) => return PumpOutcome::Failed(self.with_context(e)),
                None => {
                    return match self.state.end {
                        Some(end) if self.state.bytes_delivered < end => {
                            PumpOutcome::Failed(ResultsErrorHelper::io().message(format!(
                                "Body of {} ended at offset {} of {}",
                                self.location, self.state.bytes_delivered, end
                            )))
                        }
                        _ => PumpOutcome::Completed,
                    };
                }
            }
        }
    }

    /// Wait until the consumer has demand. `false` if cancelled meanwhile.
    async fn await_demand(&mut self) -> bool {
        while let Ok(n) = self.control.try_recv() {
            self.state.demand = self.state.demand.saturating_add(n);
        }

        while self.state.demand == 0 {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                message = self.control.recv() => match message {
                    Some(n) => self.state.demand = self.state.demand.saturating_add(n),
                    None => return false,
                },
            }
        }
        true
    }

    /// Decide whether to resume after `error`; sleeps before resuming.
    ///
    /// `Ok(false)` means the fetch was cancelled during the sleep.
    async fn prepare_retry(&mut self, error: Error) -> Result<bool> {
        if error.kind() == ErrorKind::PreconditionFailed || self.state.retries_remaining == 0 {
            let earlier = std::mem::take(&mut self.state.failures);
            return Err(error.with_suppressed(earlier));
        }

        self.state.retries_remaining -= 1;
        let attempt = self.max_retries - self.state.retries_remaining;
        warn!(
            "Fetch of {} interrupted at offset {}: {} (resume {}/{})",
            self.location,
            self.state.bytes_delivered,
            error.message(),
            attempt,
            self.max_retries
        );
        self.state.failures.push(error);

        let delay = self.retry_delay * attempt;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(false),
            _ = tokio::time::sleep(delay) => Ok(true),
        }
    }

    fn with_context(&self, error: Error) -> Error {
        let message = format!(
            "GET {} at offset {}: {}",
            self.location,
            self.state.bytes_delivered,
            error.message()
        );
        Error::new(error.kind(), message).with_source(error)
    }

    /// Send a signal, giving up if the consumer cancels or goes away.
    async fn deliver(&self, signal: StreamSignal) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.chunks.send(signal) => sent.is_ok(),
        }
    }
}
