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

//! Resumable object download tests.
//!
//! These run the fetcher and the blocking byte reader against an in-memory
//! object store that can cut a body short, fail a GET, or change the object
//! between requests.
//!
//! ```text
//! MemoryObjectStore ──GET(range, If-Match)──▶ ResumableObjectFetcher
//!                                                   │ Chunk / Complete / Error
//!                                                   ▼
//!                                             FetchSubscription ──▶ ObjectByteReader
//! ```

mod common;

use athena_results::error::{Error, ErrorKind};
use athena_results::types::ObjectLocation;
use athena_results::{ObjectByteReader, ObjectStoreClient, ResumableObjectFetcher, StreamSignal};
use common::{payload, test_fetch_config, Fault, MemoryObjectStore};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

// =============================================================================
// Test Helpers
// =============================================================================

fn location() -> ObjectLocation {
    ObjectLocation::new("results", "query-1.csv")
}

fn store_with(data: &[u8], faults: Vec<Option<Fault>>) -> Arc<MemoryObjectStore> {
    let store = MemoryObjectStore::new(64).with_faults(faults);
    store.put(&location(), data.to_vec(), "etag-1");
    Arc::new(store)
}

fn fetcher(store: &Arc<MemoryObjectStore>, max_retries: u32) -> ResumableObjectFetcher {
    ResumableObjectFetcher::new(
        Arc::clone(store) as Arc<dyn ObjectStoreClient>,
        location(),
        &test_fetch_config(),
        Handle::current(),
    )
    .with_max_retries(max_retries)
}

// =============================================================================
// ResumableObjectFetcher
// =============================================================================

#[tokio::test]
async fn test_failures_within_budget_reconstruct_exact_bytes() {
    let data = payload(1000);
    let store = store_with(
        &data,
        vec![Some(Fault::FailAfter(300)), Some(Fault::FailAfter(250)), None],
    );

    let bytes = fetcher(&store, 3).fetch_all().await.unwrap();
    assert_eq!(bytes.as_ref(), data.as_slice());

    let requests = store.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].range_start, None);
    assert_eq!(requests[0].if_match, None);
    // Resumes start at the bytes already delivered and pin the first ETag.
    assert_eq!(requests[1].range_start, Some(300));
    assert_eq!(requests[1].if_match.as_deref(), Some("etag-1"));
    assert_eq!(requests[2].range_start, Some(550));
    assert_eq!(requests[2].if_match.as_deref(), Some("etag-1"));
}

#[tokio::test]
async fn test_exhausted_budget_reports_one_error_with_earlier_failures() {
    let data = payload(1000);
    let store = store_with(
        &data,
        vec![
            Some(Fault::FailAfter(100)),
            Some(Fault::FailAfter(100)),
            Some(Fault::FailAfter(100)),
        ],
    );

    let fetcher = fetcher(&store, 2);
    let mut subscription = fetcher.subscribe().unwrap();
    subscription.request(1000).unwrap();

    let mut delivered = 0;
    let mut errors: Vec<Error> = Vec::new();
    let mut completed = false;
    while let Some(signal) = subscription.next_signal().await {
        match signal {
            StreamSignal::Chunk(chunk) => delivered += chunk.len(),
            StreamSignal::Complete => completed = true,
            StreamSignal::Error(e) => errors.push(e),
        }
    }

    assert!(!completed);
    assert_eq!(delivered, 300);
    assert_eq!(errors.len(), 1);
    let error = &errors[0];
    assert_eq!(error.kind(), ErrorKind::Io);
    assert!(error.message().contains("offset 300"), "{}", error.message());
    assert_eq!(error.suppressed().len(), 2);
    assert_eq!(store.requests().len(), 3);
}

#[tokio::test]
async fn test_failure_before_first_response_is_not_resumed() {
    let store = store_with(&payload(200), vec![Some(Fault::FailOpen(ErrorKind::Io))]);

    let err = fetcher(&store, 5).fetch_all().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(err.suppressed().is_empty());
    assert_eq!(store.requests().len(), 1);
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let store = Arc::new(MemoryObjectStore::new(64));
    let err = fetcher(&store, 5).fetch_all().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_object_replaced_mid_download_fails_without_further_retries() {
    let data = payload(500);
    let store = store_with(&data, vec![Some(Fault::FailAfter(100))]);

    let fetcher = fetcher(&store, 5);
    let mut subscription = fetcher.subscribe().unwrap();
    subscription.request(1).unwrap();
    assert!(matches!(
        subscription.next_signal().await,
        Some(StreamSignal::Chunk(chunk)) if chunk.len() == 64
    ));
    assert_eq!(subscription.etag().as_deref(), Some("etag-1"));

    // The object is rewritten before the resumed request goes out.
    store.put(&location(), payload(800), "etag-2");
    subscription.request(100).unwrap();

    let mut terminal = None;
    while let Some(signal) = subscription.next_signal().await {
        if !matches!(signal, StreamSignal::Chunk(_)) {
            terminal = Some(signal);
        }
    }

    match terminal {
        Some(StreamSignal::Error(e)) => {
            assert_eq!(e.kind(), ErrorKind::PreconditionFailed);
            assert_eq!(e.suppressed().len(), 1);
        }
        other => panic!("expected precondition failure, got {:?}", other),
    }
    let requests = store.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].if_match.as_deref(), Some("etag-1"));
}

#[tokio::test]
async fn test_chunks_wait_for_demand() {
    let store = store_with(&payload(640), vec![]);
    let fetcher = fetcher(&store, 0);
    let mut subscription = fetcher.subscribe().unwrap();

    subscription.request(1).unwrap();
    assert!(matches!(
        subscription.next_signal().await,
        Some(StreamSignal::Chunk(_))
    ));

    let idle = tokio::time::timeout(Duration::from_millis(50), subscription.next_signal()).await;
    assert!(idle.is_err(), "no chunk may arrive without demand");

    subscription.request(1).unwrap();
    assert!(matches!(
        subscription.next_signal().await,
        Some(StreamSignal::Chunk(_))
    ));
}

#[tokio::test]
async fn test_zero_demand_is_rejected() {
    let store = store_with(&payload(10), vec![]);
    let fetcher = fetcher(&store, 0);
    let subscription = fetcher.subscribe().unwrap();

    let err = subscription.request(0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn test_cancel_mid_stream_releases_body_once() {
    let store = store_with(&payload(1000), vec![]);
    let fetcher = fetcher(&store, 3);
    let mut subscription = fetcher.subscribe().unwrap();

    subscription.request(2).unwrap();
    for _ in 0..2 {
        assert!(matches!(
            subscription.next_signal().await,
            Some(StreamSignal::Chunk(_))
        ));
    }

    subscription.cancel();
    assert!(subscription.is_cancelled());
    assert!(subscription.next_signal().await.is_none());

    for _ in 0..100 {
        if store.cancelled_bodies() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(store.cancelled_bodies(), 1);

    // Demand after cancel is accepted but nothing follows.
    subscription.request(10).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(subscription.next_signal().await.is_none());
    assert_eq!(store.requests().len(), 1);
    assert_eq!(store.cancelled_bodies(), 1);
}

#[tokio::test]
async fn test_second_subscriber_is_rejected() {
    let store = store_with(&payload(100), vec![]);
    let fetcher = fetcher(&store, 0);

    let mut first = fetcher.subscribe().unwrap();
    let err = fetcher.subscribe().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    // The first subscription is unaffected.
    first.request(10).unwrap();
    let mut total = 0;
    loop {
        match first.next_signal().await {
            Some(StreamSignal::Chunk(chunk)) => total += chunk.len(),
            Some(StreamSignal::Complete) => break,
            other => panic!("unexpected signal {:?}", other),
        }
    }
    assert_eq!(total, 100);
}

// =============================================================================
// ObjectByteReader
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_byte_reader_resumes_from_read_position() {
    let data = payload(2000);
    let store = store_with(
        &data,
        vec![Some(Fault::FailAfter(300)), Some(Fault::FailAfter(500)), None],
    );
    let reader_store = Arc::clone(&store) as Arc<dyn ObjectStoreClient>;
    let handle = Handle::current();

    let read = tokio::task::spawn_blocking(move || {
        let mut reader = ObjectByteReader::new(reader_store, location(), test_fetch_config(), handle);
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok::<_, std::io::Error>((out, reader.position()))
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(read.0, data);
    assert_eq!(read.1, 2000);

    let requests = store.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].if_match, None);
    let mut last_start = 0;
    for request in &requests[1..] {
        assert_eq!(request.if_match.as_deref(), Some("etag-1"));
        let start = request.range_start.unwrap_or(0);
        assert!(start >= last_start);
        last_start = start;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_byte_reader_reports_exhaustion() {
    let data = payload(2000);
    let store = store_with(
        &data,
        vec![
            Some(Fault::FailAfter(200)),
            Some(Fault::FailAfter(200)),
            Some(Fault::FailAfter(200)),
        ],
    );
    let reader_store = Arc::clone(&store) as Arc<dyn ObjectStoreClient>;
    let handle = Handle::current();

    let mut config = test_fetch_config();
    config.max_retries = 1;
    let (err, again) = tokio::task::spawn_blocking(move || {
        let mut reader = ObjectByteReader::new(reader_store, location(), config, handle);
        let mut out = Vec::new();
        let first = reader.read_to_end(&mut out).unwrap_err();
        let mut buf = [0u8; 16];
        let again = reader.read(&mut buf);
        assert!(reader.is_failed());
        (first, again)
    })
    .await
    .unwrap();

    let err = Error::from(err);
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(err.suppressed().len(), 1);

    // The failure is not turned into end of data on the next read.
    let again = Error::from(again.unwrap_err());
    assert_eq!(again.kind(), ErrorKind::Io);
    assert_eq!(again.message(), err.message());
    assert_eq!(store.requests().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_byte_reader_resumes_failure_before_first_chunk() {
    let data = payload(500);
    let store = store_with(&data, vec![Some(Fault::FailAfter(0)), None]);
    let reader_store = Arc::clone(&store) as Arc<dyn ObjectStoreClient>;
    let handle = Handle::current();

    let out = tokio::task::spawn_blocking(move || {
        let mut reader = ObjectByteReader::new(reader_store, location(), test_fetch_config(), handle);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).map(|_| out)
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(out, data);
    let requests = store.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].if_match, None);
    assert_eq!(requests[1].if_match.as_deref(), Some("etag-1"));
}
