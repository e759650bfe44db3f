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

//! S3-compatible object store over plain HTTP, path-style addressing.

use crate::client::HttpClient;
use crate::error::{Result, ResultsErrorHelper};
use crate::object_store::{GetObjectRequest, GetObjectResponse, ObjectStoreClient};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{ETAG, IF_MATCH, RANGE};
use reqwest::{Method, Request};
use std::sync::Arc;
use tracing::debug;

/// Object store reached at `{endpoint}/{bucket}/{key}`.
#[derive(Debug)]
pub struct HttpObjectStore {
    http_client: Arc<HttpClient>,
    endpoint: String,
}

impl HttpObjectStore {
    pub fn new(http_client: Arc<HttpClient>, endpoint: impl Into<String>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
        }
    }

    fn build_request(&self, request: &GetObjectRequest) -> Result<Request> {
        let url = format!(
            "{}/{}/{}",
            self.endpoint.trim_end_matches('/'),
            request.location.bucket,
            request.location.key.trim_start_matches('/')
        );

        let mut builder = self.http_client.inner().request(Method::GET, &url);
        if let Some(start) = request.range_start {
            builder = builder.header(RANGE, format!("bytes={}-", start));
        }
        if let Some(ref etag) = request.if_match {
            builder = builder.header(IF_MATCH, etag);
        }

        builder.build().map_err(|e| {
            ResultsErrorHelper::io().message(format!("Failed to build object request: {}", e))
        })
    }
}

#[async_trait]
impl ObjectStoreClient for HttpObjectStore {
    async fn get_object(&self, request: GetObjectRequest) -> Result<GetObjectResponse> {
        debug!(
            "GET {} (range start {:?}, if-match {:?})",
            request.location, request.range_start, request.if_match
        );

        let http_request = self.build_request(&request)?;
        let response = self.http_client.execute(http_request).await?;

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();

        let location = request.location.clone();
        let body = response
            .bytes_stream()
            .map_err(move |e| {
                ResultsErrorHelper::io()
                    .message(format!("Failed to read body of {}: {}", location, e))
                    .with_source(e)
            })
            .boxed();

        Ok(GetObjectResponse {
            etag,
            content_length,
            body,
        })
    }
}
