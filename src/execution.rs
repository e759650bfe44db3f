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

//! Submit, wait, and open results.
//!
//! [`QueryExecutor`] ties the query client, the polling loop and the reader
//! factory together. If polling is interrupted the executor asks the service
//! to stop the query before returning.
//!
//! Every wait and every reader gets a child of the executor's current
//! interrupt token. [`QueryExecutor::interrupt`] cancels that token and
//! installs a fresh one, so it reaches the operations in flight at the time
//! and nothing started afterwards.

use crate::client::{AthenaClient, HttpClient, QueryExecutionClient, RequestSigner, SubmitRequest};
use crate::config::{ClientConfig, QueryDefaults};
use crate::error::{Result, ResultsErrorHelper};
use crate::logging::init_logging;
use crate::object_store::HttpObjectStore;
use crate::polling::{PollOutcome, PollingStrategy};
use crate::reader::{QueryResult, ResultReaderFactory};
use crate::types::{ExecutionHandle, QueryState, QueryStatus};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Map a status snapshot to a polling outcome.
pub fn status_check(status: QueryStatus) -> PollOutcome<QueryStatus> {
    match status.state {
        QueryState::Queued | QueryState::Running => PollOutcome::Pending,
        QueryState::Succeeded => PollOutcome::Completed(status),
        QueryState::Failed => PollOutcome::Failed(status.reason.unwrap_or_default()),
        QueryState::Cancelled => PollOutcome::Canceled(status.reason.unwrap_or_default()),
    }
}

#[derive(Debug)]
pub struct QueryExecutor {
    client: Arc<dyn QueryExecutionClient>,
    polling: PollingStrategy,
    factory: ResultReaderFactory,
    defaults: QueryDefaults,
    interrupt: Mutex<CancellationToken>,
}

impl QueryExecutor {
    /// `polling` supplies the delay policy. Its interrupt token is not used;
    /// interrupt through [`QueryExecutor::interrupt`].
    pub fn new(
        client: Arc<dyn QueryExecutionClient>,
        polling: PollingStrategy,
        factory: ResultReaderFactory,
    ) -> Self {
        Self {
            client,
            polling,
            factory,
            defaults: QueryDefaults::default(),
            interrupt: Mutex::new(CancellationToken::new()),
        }
    }

    /// Database, workgroup and output location used when a request leaves
    /// them unset.
    pub fn with_defaults(mut self, defaults: QueryDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Build the HTTP-backed stack described by `config`.
    ///
    /// Initializes logging, creates the Athena client for `athena.endpoint`
    /// and, when `athena.s3_endpoint` is set, the object store backend.
    pub fn from_config(
        config: &ClientConfig,
        signer: Arc<dyn RequestSigner>,
        runtime: Handle,
    ) -> Result<Self> {
        init_logging(&config.log);

        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            ResultsErrorHelper::invalid_argument().message("athena.endpoint is required")
        })?;

        let http_client = Arc::new(HttpClient::new(
            config.http.clone(),
            &config.driver,
            signer,
        )?);
        let client: Arc<dyn QueryExecutionClient> =
            Arc::new(AthenaClient::new(Arc::clone(&http_client), endpoint));

        let polling = PollingStrategy::new(config.polling.clone());
        let mut factory = ResultReaderFactory::new(
            Arc::clone(&client),
            config.result.clone(),
            config.fetch.clone(),
            runtime,
        );
        if let Some(ref s3_endpoint) = config.object_store_endpoint {
            factory = factory.with_object_store(Arc::new(HttpObjectStore::new(
                Arc::clone(&http_client),
                s3_endpoint.clone(),
            )));
        }

        debug!(
            "Query executor ready: endpoint={}, backend={:?}",
            endpoint, config.result.backend
        );
        Ok(Self::new(client, polling, factory).with_defaults(config.query.clone()))
    }

    pub fn client(&self) -> &Arc<dyn QueryExecutionClient> {
        &self.client
    }

    pub fn polling(&self) -> &PollingStrategy {
        &self.polling
    }

    /// Interrupt every wait and reader currently using this executor.
    ///
    /// Waits return `Ok(None)` after stopping their query; blocked reader
    /// calls return `Interrupted`. Operations started afterwards are not
    /// affected.
    pub fn interrupt(&self) {
        let previous = {
            let mut current = self.interrupt.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, CancellationToken::new())
        };
        debug!("Interrupting in-flight operations");
        previous.cancel();
    }

    fn operation_token(&self) -> CancellationToken {
        self.interrupt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .child_token()
    }

    /// Submit a query, filling unset fields from the defaults.
    pub async fn submit(&self, mut request: SubmitRequest) -> Result<ExecutionHandle> {
        if request.database.is_none() {
            request.database = self.defaults.database.clone();
        }
        if request.workgroup.is_none() {
            request.workgroup = self.defaults.workgroup.clone();
        }
        if request.output_location.is_none() {
            request.output_location = self.defaults.output_location.clone();
        }
        self.client.submit(&request).await
    }

    /// Poll until the query succeeds.
    ///
    /// Returns `Ok(None)` if polling was interrupted; the query is stopped in
    /// that case. FAILED and CANCELLED queries surface as `QueryFailed` and
    /// `QueryCanceled` errors carrying the service's reason.
    pub async fn wait_for_completion(
        &self,
        handle: &ExecutionHandle,
    ) -> Result<Option<QueryStatus>> {
        let client = Arc::clone(&self.client);
        let polling = self.polling.clone().with_interrupt(self.operation_token());
        let completed = polling
            .poll_until_completed(|| {
                let client = Arc::clone(&client);
                let handle = handle.clone();
                async move { Ok(status_check(client.get_status(&handle).await?)) }
            })
            .await?;

        if completed.is_none() {
            debug!("Polling for {} interrupted, stopping query", handle);
            if let Err(e) = self.client.stop(handle).await {
                warn!("Failed to stop query {}: {}", handle, e);
            }
        }
        Ok(completed)
    }

    /// Submit and wait. `Ok(None)` means the wait was interrupted.
    pub async fn execute(&self, request: SubmitRequest) -> Result<Option<QueryStatus>> {
        let handle = self.submit(request).await?;
        self.wait_for_completion(&handle).await
    }

    /// Open the configured reader for a completed query. Blocks on I/O only
    /// when the reader is used, not here.
    pub fn open_result(&self, status: &QueryStatus) -> Result<Box<dyn QueryResult>> {
        self.factory
            .create_interruptible_reader(status, self.operation_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(state: QueryState, reason: Option<&str>) -> QueryStatus {
        QueryStatus {
            handle: ExecutionHandle::new("q-1"),
            state,
            reason: reason.map(str::to_string),
            output_location: None,
        }
    }

    #[test]
    fn test_status_check_mapping() {
        assert_eq!(
            status_check(status(QueryState::Queued, None)),
            PollOutcome::Pending
        );
        assert_eq!(
            status_check(status(QueryState::Running, None)),
            PollOutcome::Pending
        );
        assert!(matches!(
            status_check(status(QueryState::Succeeded, None)),
            PollOutcome::Completed(s) if s.handle.as_str() == "q-1"
        ));
        assert_eq!(
            status_check(status(QueryState::Failed, Some("SYNTAX_ERROR"))),
            PollOutcome::Failed("SYNTAX_ERROR".to_string())
        );
        assert_eq!(
            status_check(status(QueryState::Cancelled, Some("by user"))),
            PollOutcome::Canceled("by user".to_string())
        );
    }

    #[tokio::test]
    async fn test_from_config_requires_endpoint() {
        let err = QueryExecutor::from_config(
            &ClientConfig::default(),
            Arc::new(crate::client::Unsigned),
            Handle::current(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }
}
