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

//! Error type shared by every layer of the crate.
//!
//! Errors are built through [`ResultsErrorHelper`], one constructor per
//! [`ErrorKind`]:
//!
//! ```ignore
//! return Err(ResultsErrorHelper::io().message(format!("Failed to read page: {}", e)));
//! ```
//!
//! An error may carry earlier failures as `suppressed` causes. The resumable
//! fetcher uses this to report every failed attempt when its retry budget is
//! exhausted.

use std::fmt;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport failure (network, HTTP status, body read).
    Io,
    /// An operation exceeded its deadline.
    Timeout,
    /// The query finished in the FAILED state.
    QueryFailed,
    /// The query finished in the CANCELLED state.
    QueryCanceled,
    /// Malformed CSV or binary metadata.
    Data,
    /// Caller passed a value outside the accepted range.
    InvalidArgument,
    /// Operation not allowed in the current state.
    InvalidState,
    /// Object or query does not exist.
    NotFound,
    /// The object changed between the first response and a resumed request.
    PreconditionFailed,
    /// A blocking wait was interrupted by the caller.
    Interrupted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Io => "I/O error",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::QueryFailed => "Query failed",
            ErrorKind::QueryCanceled => "Query canceled",
            ErrorKind::Data => "Data error",
            ErrorKind::InvalidArgument => "Invalid argument",
            ErrorKind::InvalidState => "Invalid state",
            ErrorKind::NotFound => "Not found",
            ErrorKind::PreconditionFailed => "Precondition failed",
            ErrorKind::Interrupted => "Interrupted",
        };
        f.write_str(name)
    }
}

/// Error returned by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
    suppressed: Vec<Error>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            suppressed: Vec::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Earlier failures that were superseded by this one.
    pub fn suppressed(&self) -> &[Error] {
        &self.suppressed
    }

    /// Attach the underlying cause.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach earlier failures, oldest first.
    pub fn with_suppressed(mut self, suppressed: Vec<Error>) -> Self {
        self.suppressed.extend(suppressed);
        self
    }

    /// Same kind and message, without source or suppressed causes. Used to
    /// report a terminal failure again on later calls.
    pub(crate) fn repeat(&self) -> Error {
        Error::new(self.kind, self.message.clone())
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    pub fn is_interrupted(&self) -> bool {
        self.kind == ErrorKind::Interrupted
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        let kind = match e.kind {
            ErrorKind::Timeout => std::io::ErrorKind::TimedOut,
            ErrorKind::Interrupted => std::io::ErrorKind::Interrupted,
            ErrorKind::NotFound => std::io::ErrorKind::NotFound,
            ErrorKind::Data => std::io::ErrorKind::InvalidData,
            ErrorKind::InvalidArgument => std::io::ErrorKind::InvalidInput,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        // Errors that crossed a `std::io::Read` boundary keep their kind.
        if e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = e.into_inner() {
                if let Ok(err) = inner.downcast::<Error>() {
                    return *err;
                }
            }
            return ResultsErrorHelper::io().message("I/O error");
        }
        let message = e.to_string();
        ResultsErrorHelper::io().message(message).with_source(e)
    }
}

/// Builder returned by the [`ResultsErrorHelper`] constructors.
#[derive(Debug, Clone, Copy)]
pub struct ErrorBuilder {
    kind: ErrorKind,
}

impl ErrorBuilder {
    pub fn message(self, message: impl Into<String>) -> Error {
        Error::new(self.kind, message)
    }
}

/// Entry point for constructing errors of a given kind.
pub struct ResultsErrorHelper;

impl ResultsErrorHelper {
    pub fn io() -> ErrorBuilder {
        ErrorBuilder { kind: ErrorKind::Io }
    }

    pub fn timeout() -> ErrorBuilder {
        ErrorBuilder {
            kind: ErrorKind::Timeout,
        }
    }

    pub fn query_failed() -> ErrorBuilder {
        ErrorBuilder {
            kind: ErrorKind::QueryFailed,
        }
    }

    pub fn query_canceled() -> ErrorBuilder {
        ErrorBuilder {
            kind: ErrorKind::QueryCanceled,
        }
    }

    pub fn data() -> ErrorBuilder {
        ErrorBuilder {
            kind: ErrorKind::Data,
        }
    }

    pub fn invalid_argument() -> ErrorBuilder {
        ErrorBuilder {
            kind: ErrorKind::InvalidArgument,
        }
    }

    pub fn invalid_state() -> ErrorBuilder {
        ErrorBuilder {
            kind: ErrorKind::InvalidState,
        }
    }

    pub fn not_found() -> ErrorBuilder {
        ErrorBuilder {
            kind: ErrorKind::NotFound,
        }
    }

    pub fn precondition_failed() -> ErrorBuilder {
        ErrorBuilder {
            kind: ErrorKind::PreconditionFailed,
        }
    }

    pub fn interrupted() -> ErrorBuilder {
        ErrorBuilder {
            kind: ErrorKind::Interrupted,
        }
    }
}
