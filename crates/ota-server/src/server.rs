//! Router assembly and serving.

use std::future::Future;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;

use crate::handlers::{configs, download, health, ledger, release, rollout, upload};
use crate::request_id;
use crate::state::AppState;

/// Routes served both at the root and under `/api`.
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health))
        .route("/latest-version", get(release::latest_version))
        .route("/update-version", post(release::update_version))
        .route("/upload-artifact", post(upload::upload_artifact))
        .route("/upload-apk", post(upload::upload_artifact))
        .route("/current-version/{device_id}", get(rollout::current_version))
        .route("/promote-current/{device_id}", post(rollout::promote_current))
        .route("/promote-all", post(rollout::promote_all))
        .route("/devices", get(rollout::list_devices))
        .route("/download/{*storage_key}", get(download::download))
        .route("/configs", get(configs::list_configs))
        .route(
            "/configs/{key}",
            get(configs::get_config).post(configs::save_config),
        )
        .route("/ledger/flush", post(ledger::flush_ledger))
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.max_upload_bytes()).unwrap_or(usize::MAX);
    let api = api_routes();

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .route("/apk/{file_name}", get(download::download_latest_file))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(request_id::request_context))
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve<S>(listener: TcpListener, state: Arc<AppState>, shutdown: S) -> std::io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
