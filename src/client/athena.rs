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

//! Athena client over the JSON 1.1 protocol.
//!
//! Every operation is a `POST /` with an `X-Amz-Target: AmazonAthena.<Op>`
//! header and a PascalCase JSON body.

use crate::client::{HttpClient, QueryExecutionClient, SubmitRequest};
use crate::error::{Error, ErrorKind, Result, ResultsErrorHelper};
use crate::types::athena::{
    GetQueryExecutionResponse, GetQueryResultsRequest, GetQueryResultsResponse,
    QueryExecutionContext, QueryExecutionIdRequest, ResultConfiguration, ServiceErrorBody,
    StartQueryExecutionRequest, StartQueryExecutionResponse,
};
use crate::types::{ColumnDescriptor, ExecutionHandle, QueryStatus, ResultPage};
use async_trait::async_trait;
use reqwest::{Method, Request};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

const TARGET_HEADER: &str = "X-Amz-Target";
const TARGET_PREFIX: &str = "AmazonAthena";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Client for the Athena query service.
#[derive(Debug)]
pub struct AthenaClient {
    http_client: Arc<HttpClient>,
    endpoint: String,
}

impl AthenaClient {
    pub fn new(http_client: Arc<HttpClient>, endpoint: impl Into<String>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request<B: Serialize>(&self, operation: &str, body: &B) -> Result<Request> {
        let payload = serde_json::to_vec(body).map_err(|e| {
            ResultsErrorHelper::invalid_argument()
                .message(format!("Failed to serialize {} request: {}", operation, e))
        })?;

        self.http_client
            .inner()
            .request(Method::POST, self.endpoint.trim_end_matches('/'))
            .header(TARGET_HEADER, format!("{}.{}", TARGET_PREFIX, operation))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(payload)
            .build()
            .map_err(|e| ResultsErrorHelper::io().message(format!("Failed to build request: {}", e)))
    }

    async fn call<B, R>(&self, operation: &str, body: &B) -> Result<R>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let text = self.call_raw(operation, body).await?;
        serde_json::from_str(&text).map_err(|e| {
            ResultsErrorHelper::io().message(format!(
                "Failed to parse {} response: {} - body: {}",
                operation, e, text
            ))
        })
    }

    async fn call_raw<B: Serialize>(&self, operation: &str, body: &B) -> Result<String> {
        let request = self.build_request(operation, body)?;
        debug!("Calling {}.{}", TARGET_PREFIX, operation);

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| describe_service_error(operation, e))?;

        response.text().await.map_err(|e| {
            ResultsErrorHelper::io().message(format!("Failed to read {} response: {}", operation, e))
        })
    }
}

#[async_trait]
impl QueryExecutionClient for AthenaClient {
    async fn submit(&self, request: &SubmitRequest) -> Result<ExecutionHandle> {
        let body = StartQueryExecutionRequest {
            query_string: request.query.clone(),
            client_request_token: request
                .idempotency_token
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            query_execution_context: request.database.clone().map(|database| {
                QueryExecutionContext {
                    database: Some(database),
                }
            }),
            result_configuration: request.output_location.clone().map(|location| {
                ResultConfiguration {
                    output_location: Some(location),
                }
            }),
            work_group: request.workgroup.clone(),
        };

        let response: StartQueryExecutionResponse =
            self.call("StartQueryExecution", &body).await?;
        debug!("Submitted query {}", response.query_execution_id);
        Ok(ExecutionHandle::new(response.query_execution_id))
    }

    async fn get_status(&self, handle: &ExecutionHandle) -> Result<QueryStatus> {
        let body = QueryExecutionIdRequest {
            query_execution_id: handle.as_str().to_string(),
        };
        let response: GetQueryExecutionResponse = self.call("GetQueryExecution", &body).await?;
        let status = to_query_status(handle, response);
        debug!("Query {} is {:?}", handle, status.state);
        Ok(status)
    }

    async fn get_result_page(
        &self,
        handle: &ExecutionHandle,
        next_token: Option<&str>,
        max_rows: u32,
    ) -> Result<ResultPage> {
        let body = GetQueryResultsRequest {
            query_execution_id: handle.as_str().to_string(),
            next_token: next_token.map(str::to_string),
            max_results: max_rows,
        };
        let response: GetQueryResultsResponse = self.call("GetQueryResults", &body).await?;
        Ok(to_result_page(response))
    }

    async fn stop(&self, handle: &ExecutionHandle) -> Result<()> {
        let body = QueryExecutionIdRequest {
            query_execution_id: handle.as_str().to_string(),
        };
        self.call_raw("StopQueryExecution", &body).await?;
        debug!("Stopped query {}", handle);
        Ok(())
    }
}

fn to_query_status(handle: &ExecutionHandle, response: GetQueryExecutionResponse) -> QueryStatus {
    let execution = response.query_execution;
    QueryStatus {
        handle: handle.clone(),
        state: execution.status.state,
        reason: execution.status.state_change_reason,
        output_location: execution
            .result_configuration
            .and_then(|config| config.output_location),
    }
}

fn to_result_page(response: GetQueryResultsResponse) -> ResultPage {
    let columns = response
        .result_set
        .result_set_metadata
        .map(|metadata| {
            metadata
                .column_info
                .into_iter()
                .map(ColumnDescriptor::from)
                .collect()
        })
        .unwrap_or_default();

    let rows = response
        .result_set
        .rows
        .into_iter()
        .map(|row| row.data.into_iter().map(|d| d.var_char_value).collect())
        .collect();

    ResultPage {
        columns,
        rows,
        next_token: response.next_token,
    }
}

/// Replace an `HTTP nnn - {json}` message with the service's own error text.
fn describe_service_error(operation: &str, error: Error) -> Error {
    let Some((_, body)) = error.message().split_once(" - ") else {
        return error;
    };
    let Ok(service) = serde_json::from_str::<ServiceErrorBody>(body) else {
        return error;
    };

    let error_type = service
        .error_type
        .as_deref()
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
        .unwrap_or_else(|| "ServiceError".to_string());
    let kind = if error_type == "ResourceNotFoundException" {
        ErrorKind::NotFound
    } else {
        error.kind()
    };
    let message = format!(
        "{} failed: {}: {}",
        operation,
        error_type,
        service.message.unwrap_or_default()
    );
    Error::new(kind, message).with_source(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{HttpClientConfig, Unsigned};
    use crate::config::DriverInfo;
    use crate::types::QueryState;

    fn client() -> AthenaClient {
        let http = HttpClient::new(
            HttpClientConfig::default(),
            &DriverInfo::default(),
            Arc::new(Unsigned),
        )
        .unwrap();
        AthenaClient::new(Arc::new(http), "https://athena.us-east-1.amazonaws.com/")
    }

    #[tokio::test]
    async fn test_build_request_sets_target_and_body() {
        let body = QueryExecutionIdRequest {
            query_execution_id: "q-1".to_string(),
        };
        let request = client().build_request("GetQueryExecution", &body).unwrap();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.url().as_str(), "https://athena.us-east-1.amazonaws.com/");
        assert_eq!(
            request.headers().get(TARGET_HEADER).unwrap(),
            "AmazonAthena.GetQueryExecution"
        );
        assert_eq!(
            request.headers().get(reqwest::header::CONTENT_TYPE).unwrap(),
            CONTENT_TYPE
        );
        let payload = request.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(payload, br#"{"QueryExecutionId":"q-1"}"#);
    }

    #[test]
    fn test_to_query_status() {
        let response: GetQueryExecutionResponse = serde_json::from_str(
            r#"{"QueryExecution": {
                "QueryExecutionId": "q-2",
                "Status": {"State": "SUCCEEDED"},
                "ResultConfiguration": {"OutputLocation": "s3://out/q-2.csv"}
            }}"#,
        )
        .unwrap();

        let status = to_query_status(&ExecutionHandle::new("q-2"), response);
        assert_eq!(status.state, QueryState::Succeeded);
        assert!(status.reason.is_none());
        assert_eq!(status.output_location.as_deref(), Some("s3://out/q-2.csv"));
    }

    #[test]
    fn test_to_result_page_keeps_nulls() {
        let response: GetQueryResultsResponse = serde_json::from_str(
            r#"{"ResultSet": {
                "Rows": [{"Data": [{"VarCharValue": "a"}, {}]}],
                "ResultSetMetadata": {"ColumnInfo": [
                    {"Name": "a", "Type": "varchar"},
                    {"Name": "b", "Type": "integer"}
                ]}
            }}"#,
        )
        .unwrap();

        let page = to_result_page(response);
        assert_eq!(page.columns.len(), 2);
        assert_eq!(page.rows, vec![vec![Some("a".to_string()), None]]);
        assert!(page.next_token.is_none());
    }

    #[test]
    fn test_describe_service_error() {
        let raw = ResultsErrorHelper::io().message(
            r#"HTTP 400 - {"__type":"com.amazonaws.athena#ResourceNotFoundException","Message":"Query q-9 not found"}"#,
        );
        let err = describe_service_error("GetQueryExecution", raw);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            err.message(),
            "GetQueryExecution failed: ResourceNotFoundException: Query q-9 not found"
        );

        let opaque = ResultsErrorHelper::io().message("HTTP 500 - <html>");
        let err = describe_service_error("GetQueryResults", opaque);
        assert_eq!(err.message(), "HTTP 500 - <html>");
    }
}
