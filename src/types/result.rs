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

//! Domain types shared by the query client and the result readers.

use crate::error::{Result, ResultsErrorHelper};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// Opaque identifier of a submitted query execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionHandle(Arc<str>);

impl ExecutionHandle {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a query execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl QueryState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueryState::Succeeded | QueryState::Failed | QueryState::Cancelled
        )
    }
}

/// Status snapshot returned by the query service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStatus {
    pub handle: ExecutionHandle,
    pub state: QueryState,
    /// Human-readable reason supplied by the service for FAILED/CANCELLED.
    pub reason: Option<String>,
    /// Where the service wrote the result file, e.g. `s3://bucket/prefix/id.csv`.
    pub output_location: Option<String>,
}

/// Nullability of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Nullability {
    Nullable,
    NotNull,
    #[default]
    Unknown,
}

impl Nullability {
    /// Map the integer code used by the binary metadata encoding.
    pub fn from_code(code: u64) -> Self {
        match code {
            1 => Nullability::NotNull,
            2 => Nullability::Nullable,
            _ => Nullability::Unknown,
        }
    }
}

/// Description of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnDescriptor {
    pub catalog: Option<String>,
    pub name: String,
    pub label: String,
    pub declared_type: String,
    pub precision: i64,
    pub scale: i64,
    pub nullability: Nullability,
    pub case_sensitive: bool,
}

/// Ordered column descriptors of a result. Cheap to clone.
pub type Schema = Arc<[ColumnDescriptor]>;

/// Cursor position of a result.
///
/// Transitions only move forward:
/// `BeforeFirst -> First -> Middle* -> Last -> AfterLast`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowPosition {
    BeforeFirst,
    First,
    Middle,
    Last,
    AfterLast,
}

/// A raw row as text values; `None` is SQL NULL.
pub type RawRow = Vec<Option<String>>;

/// One batch of rows from the paginated result API.
#[derive(Debug, Clone, Default)]
pub struct ResultPage {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<RawRow>,
    /// Token for the next page; `None` when this is the last page.
    pub next_token: Option<String>,
}

/// Location of an object in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse an `s3://bucket/key` URI.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri.strip_prefix("s3://").ok_or_else(|| {
            ResultsErrorHelper::invalid_argument()
                .message(format!("Output location is not an s3:// URI: {}", uri))
        })?;
        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok(Self::new(bucket, key))
            }
            _ => Err(ResultsErrorHelper::invalid_argument()
                .message(format!("Output location has no bucket or key: {}", uri))),
        }
    }

    /// The same bucket with `suffix` appended to the key.
    pub fn with_key_suffix(&self, suffix: &str) -> Self {
        Self::new(self.bucket.clone(), format!("{}{}", self.key, suffix))
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}
