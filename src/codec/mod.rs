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

//! Codecs for the files written next to a query's output location.
//!
//! - `compact`: tag/length-prefixed binary decoder
//! - `column_metadata`: column descriptors from the `.metadata` sidecar
//! - `csv`: quoted CSV row reader for the result body

pub mod column_metadata;
pub mod compact;
pub mod csv;

pub use column_metadata::parse_column_metadata;
pub use compact::{CompactBinaryDecoder, Field, FieldValue};
pub use csv::CsvRowReader;
