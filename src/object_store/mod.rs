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

//! Object store access used to download result files.
//!
//! The only operation needed is a (possibly ranged, possibly conditional)
//! GET that returns the body as a stream of chunks.

pub mod http;

use crate::error::Result;
use crate::types::ObjectLocation;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

pub use http::HttpObjectStore;

/// A GET request for one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetObjectRequest {
    pub location: ObjectLocation,
    /// Sends `Range: bytes=<start>-` when set.
    pub range_start: Option<u64>,
    /// Sends `If-Match: <etag>` when set.
    pub if_match: Option<String>,
}

impl GetObjectRequest {
    pub fn new(location: ObjectLocation) -> Self {
        Self {
            location,
            range_start: None,
            if_match: None,
        }
    }
}

/// Response headers plus the body stream.
pub struct GetObjectResponse {
    pub etag: Option<String>,
    /// Length of this response's body, i.e. of the requested range.
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl std::fmt::Debug for GetObjectResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetObjectResponse")
            .field("etag", &self.etag)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Read access to an object store.
///
/// A failed precondition (`If-Match` mismatch) must be reported as
/// `PreconditionFailed` and a missing object as `NotFound`.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync + std::fmt::Debug {
    async fn get_object(&self, request: GetObjectRequest) -> Result<GetObjectResponse>;
}
