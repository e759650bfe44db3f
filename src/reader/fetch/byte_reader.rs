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

//! Blocking `std::io::Read` over a resumable object download.
//!
//! The reader keeps a queue of received chunks and asks the fetch task for
//! more whenever the queued volume drops below a low watermark. When the
//! download fails mid-stream, queued bytes are discarded and a new fetch is
//! started at the reader's position with the captured ETag. Each underlying
//! fetch runs with no internal resume budget; the reader owns the budget.
//!
//! Once the download fails for good, every later read returns the same
//! error; the reader never reports end of data after a failure.
//!
//! Must not be used from inside an async context: reads block on the runtime
//! handle.

use crate::config::FetchConfig;
use crate::error::{Error, ErrorKind, Result, ResultsErrorHelper};
use crate::object_store::ObjectStoreClient;
use crate::reader::fetch::resumable::{FetchSubscription, ResumableObjectFetcher, StreamSignal};
use crate::types::ObjectLocation;
use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::io::Read;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

pub struct ObjectByteReader {
    store: Arc<dyn ObjectStoreClient>,
    location: ObjectLocation,
    config: FetchConfig,
    runtime: Handle,
    subscription: Option<FetchSubscription>,
    queue: VecDeque<Bytes>,
    queued_bytes: usize,
    /// Bytes handed to the caller so far.
    position: u64,
    /// Chunks requested from the current subscription and not yet received.
    outstanding: u64,
    etag: Option<String>,
    /// Whether the store has answered a GET; failures before that are not
    /// resumed.
    responded: bool,
    retries_remaining: u32,
    failures: Vec<Error>,
    finished: bool,
    failed: Option<Error>,
}

impl std::fmt::Debug for ObjectByteReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectByteReader")
            .field("location", &self.location)
            .field("position", &self.position)
            .field("queued_bytes", &self.queued_bytes)
            .field("finished", &self.finished)
            .finish()
    }
}

impl ObjectByteReader {
    pub fn new(
        store: Arc<dyn ObjectStoreClient>,
        location: ObjectLocation,
        config: FetchConfig,
        runtime: Handle,
    ) -> Self {
        let retries_remaining = config.max_retries;
        Self {
            store,
            location,
            config,
            runtime,
            subscription: None,
            queue: VecDeque::new(),
            queued_bytes: 0,
            position: 0,
            outstanding: 0,
            etag: None,
            responded: false,
            retries_remaining,
            failures: Vec::new(),
            finished: false,
            failed: None,
        }
    }

    /// Bytes returned to the caller so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Whether the download ended with an error.
    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    fn start_fetch(&mut self) -> Result<()> {
        let fetcher = ResumableObjectFetcher::new(
            Arc::clone(&self.store),
            self.location.clone(),
            &self.config,
            self.runtime.clone(),
        )
        .with_max_retries(0)
        .resume_from(self.position, self.etag.clone());

        self.subscription = Some(fetcher.subscribe()?);
        self.outstanding = 0;
        Ok(())
    }

    /// Ask for more chunks if the queue is below the low watermark and no
    /// request is pending.
    fn replenish(&mut self) -> Result<()> {
        if self.finished || self.failed.is_some() || self.outstanding > 0 {
            return Ok(());
        }
        if self.queued_bytes >= self.config.low_watermark_bytes && !self.queue.is_empty() {
            return Ok(());
        }
        if self.subscription.is_none() {
            self.start_fetch()?;
        }
        if let Some(ref subscription) = self.subscription {
            let batch = self.config.chunk_buffer.max(1) as u64;
            subscription.request(batch)?;
            self.outstanding = batch;
        }
        Ok(())
    }

    /// Block until the next signal of the current subscription.
    fn next_signal(&mut self) -> Result<Option<StreamSignal>> {
        let timeout = self.config.read_timeout;
        let Some(subscription) = self.subscription.as_mut() else {
            return Ok(None);
        };

        self.runtime
            .block_on(async { tokio::time::timeout(timeout, subscription.next_signal()).await })
            .map_err(|_| {
                ResultsErrorHelper::timeout().message(format!(
                    "No data from {} within {:?}",
                    self.location, timeout
                ))
            })
    }

    /// Pick up the ETag and response state published by the fetch task.
    fn observe_response(&mut self) {
        let Some(ref subscription) = self.subscription else {
            return;
        };
        if subscription.has_response() {
            self.responded = true;
        }
        if self.etag.is_none() {
            self.etag = subscription.etag();
        }
    }

    /// Pull one signal and fold it into the queue.
    fn fill(&mut self) -> Result<()> {
        self.replenish()?;

        let signal = self.next_signal()?;
        self.observe_response();
        match signal {
            Some(StreamSignal::Chunk(chunk)) => {
                self.outstanding = self.outstanding.saturating_sub(1);
                self.queued_bytes += chunk.len();
                self.queue.push_back(chunk);
                Ok(())
            }
            Some(StreamSignal::Complete) => {
                debug!(
                    "Read {} to the end at {} bytes",
                    self.location,
                    self.position + self.queued_bytes as u64
                );
                self.finished = true;
                self.subscription = None;
                Ok(())
            }
            Some(StreamSignal::Error(e)) => self.resume_after(e),
            None => self.resume_after(ResultsErrorHelper::io().message(format!(
                "Download of {} stopped without a terminal signal",
                self.location
            ))),
        }
    }

    /// Discard queued bytes and restart at the reader position.
    fn resume_after(&mut self, error: Error) -> Result<()> {
        self.subscription = None;

        if !self.responded
            || error.kind() == ErrorKind::PreconditionFailed
            || self.retries_remaining == 0
        {
            let earlier = std::mem::take(&mut self.failures);
            self.queue.clear();
            self.queued_bytes = 0;
            self.failed = Some(error.repeat());
            return Err(error.with_suppressed(earlier));
        }

        self.retries_remaining -= 1;
        warn!(
            "Read of {} failed at offset {}, resuming ({} retries left): {}",
            self.location,
            self.position,
            self.retries_remaining,
            error.message()
        );
        self.failures.push(error);
        self.queue.clear();
        self.queued_bytes = 0;

        let attempt = self.config.max_retries - self.retries_remaining;
        let delay = self.config.retry_delay * attempt;
        self.runtime.block_on(tokio::time::sleep(delay));
        self.start_fetch()
    }
}

impl Read for ObjectByteReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if let Some(ref failed) = self.failed {
            return Err(failed.repeat().into());
        }

        while self.queue.is_empty() {
            if self.finished {
                return Ok(0);
            }
            self.fill()?;
        }

        let Some(front) = self.queue.front_mut() else {
            return Ok(0);
        };
        let n = front.len().min(buf.len());
        buf[..n].copy_from_slice(&front[..n]);
        front.advance(n);
        if front.is_empty() {
            self.queue.pop_front();
        }

        self.queued_bytes -= n;
        self.position += n as u64;
        self.replenish()?;
        Ok(n)
    }
}

