//! Shared handler state.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header::HOST, HeaderMap};
use ota_release::{Coordinator, OperationClass, Settings, TimeoutConfig};

use crate::error::ServerError;

#[derive(Debug)]
pub struct AppState {
    coordinator: Arc<Coordinator>,
    timeouts: TimeoutConfig,
    public_base_url: Option<String>,
    max_upload_bytes: u64,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>, settings: &Settings) -> Self {
        Self {
            coordinator,
            timeouts: settings.timeouts,
            public_base_url: settings
                .server
                .public_base_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            max_upload_bytes: settings.server.max_upload_bytes,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Run a blocking coordinator call on the blocking pool under the budget
    /// for `class`.
    pub async fn run<T, F>(
        &self,
        class: OperationClass,
        operation: &'static str,
        f: F,
    ) -> Result<T, ServerError>
    where
        T: Send + 'static,
        F: FnOnce(&Coordinator) -> ota_release::Result<T> + Send + 'static,
    {
        let coordinator = Arc::clone(&self.coordinator);
        run_with_budget(self.timeouts.budget(class), operation, move || f(&coordinator)).await
    }

    /// Absolute download url for a storage key.
    ///
    /// Uses `server.public_base_url` when configured, otherwise the request's
    /// `Host` header. Without either the url is root-relative.
    pub fn download_url(&self, headers: &HeaderMap, storage_key: &str) -> String {
        let base = match &self.public_base_url {
            Some(base) => base.clone(),
            None => headers
                .get(HOST)
                .and_then(|h| h.to_str().ok())
                .map(|host| format!("http://{host}"))
                .unwrap_or_default(),
        };
        format!("{base}/download/{storage_key}")
    }
}

pub(crate) async fn run_with_budget<T, F>(
    budget: Duration,
    operation: &'static str,
    f: F,
) -> Result<T, ServerError>
where
    T: Send + 'static,
    F: FnOnce() -> ota_release::Result<T> + Send + 'static,
{
    let span = tracing::Span::current();
    let task = tokio::task::spawn_blocking(move || span.in_scope(f));

    match tokio::time::timeout(budget, task).await {
        Ok(Ok(result)) => result.map_err(ServerError::from),
        Ok(Err(join)) => Err(ServerError::Join(join.to_string())),
        // the blocking call keeps running and commits or fails on its own
        Err(_) => {
            tracing::warn!(operation, budget_ms = budget.as_millis() as u64, "operation timed out");
            Err(ServerError::Timeout {
                operation,
                budget_seconds: budget.as_secs(),
            })
        }
    }
}
