//! `POST /ledger/flush`: retry a ledger write that failed after a publish.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use ota_protocol::FlushResponse;
use ota_release::OperationClass;

use crate::error::ServerError;
use crate::state::AppState;

#[tracing::instrument(skip_all)]
pub async fn flush_ledger(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FlushResponse>, ServerError> {
    state
        .run(OperationClass::Write, "flush-ledger", |c| c.flush_ledger())
        .await?;
    Ok(Json(FlushResponse {
        message: "Ledger written".to_string(),
        version: state.coordinator().latest().current.version.clone(),
    }))
}
