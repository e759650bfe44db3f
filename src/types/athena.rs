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

//! Athena JSON protocol request/response types.
//!
//! These types map directly to the JSON bodies of the `AmazonAthena.*`
//! operations. They are used only by `AthenaClient`, which converts them
//! into the crate's domain types in [`crate::types::result`].

use crate::types::result::{ColumnDescriptor, Nullability, QueryState};
use serde::{Deserialize, Serialize};

/// Body of `StartQueryExecution`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartQueryExecutionRequest {
    pub query_string: String,
    pub client_request_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_execution_context: Option<QueryExecutionContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_configuration: Option<ResultConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_group: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryExecutionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartQueryExecutionResponse {
    pub query_execution_id: String,
}

/// Body of `GetQueryExecution` and `StopQueryExecution`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryExecutionIdRequest {
    pub query_execution_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetQueryExecutionResponse {
    pub query_execution: QueryExecution,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryExecution {
    pub query_execution_id: String,
    pub status: QueryExecutionStatus,
    #[serde(default)]
    pub result_configuration: Option<ResultConfiguration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryExecutionStatus {
    pub state: QueryState,
    #[serde(default)]
    pub state_change_reason: Option<String>,
}

/// Body of `GetQueryResults`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetQueryResultsRequest {
    pub query_execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    pub max_results: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetQueryResultsResponse {
    pub result_set: ResultSet,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultSet {
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default)]
    pub result_set_metadata: Option<ResultSetMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Row {
    #[serde(default)]
    pub data: Vec<Datum>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Datum {
    #[serde(default)]
    pub var_char_value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultSetMetadata {
    #[serde(default)]
    pub column_info: Vec<ColumnInfo>,
}

/// Column description as reported by `GetQueryResults`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ColumnInfo {
    #[serde(default)]
    pub catalog_name: Option<String>,
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "Type")]
    pub type_name: String,
    #[serde(default)]
    pub precision: i32,
    #[serde(default)]
    pub scale: i32,
    #[serde(default)]
    pub nullable: Option<String>,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl From<ColumnInfo> for ColumnDescriptor {
    fn from(info: ColumnInfo) -> Self {
        let nullability = match info.nullable.as_deref() {
            Some("NOT_NULL") => Nullability::NotNull,
            Some("NULLABLE") => Nullability::Nullable,
            _ => Nullability::Unknown,
        };
        ColumnDescriptor {
            catalog: info.catalog_name,
            label: info.label.unwrap_or_else(|| info.name.clone()),
            name: info.name,
            declared_type: info.type_name,
            precision: info.precision as i64,
            scale: info.scale as i64,
            nullability,
            case_sensitive: info.case_sensitive,
        }
    }
}

/// Error body returned by the service on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceErrorBody {
    #[serde(default, rename = "__type")]
    pub error_type: Option<String>,
    #[serde(default, alias = "Message")]
    pub message: Option<String>,
}
