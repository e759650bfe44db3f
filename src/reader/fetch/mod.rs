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

//! Object downloads that survive transport failures.
//!
//! - `resumable`: the fetch task and its single-subscriber handle
//! - `byte_reader`: blocking `Read` adapter used by the CSV reader

pub mod byte_reader;
pub mod resumable;

pub use byte_reader::ObjectByteReader;
pub use resumable::{FetchSubscription, ResumableObjectFetcher, StreamSignal};
