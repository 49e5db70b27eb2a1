//! Device rollout endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use ota_protocol::{ApiError, DeviceFailure, PromoteAllResponse, RolloutView};
use ota_release::{ArtifactRef, OperationClass, RolloutEntry};

use crate::error::ServerError;
use crate::state::AppState;

fn rollout_view(
    state: &AppState,
    headers: &HeaderMap,
    entry: &RolloutEntry,
    latest: &ArtifactRef,
) -> RolloutView {
    RolloutView {
        device_id: entry.device_id.to_string(),
        version: entry.assigned.version.clone(),
        url: state.download_url(headers, &entry.assigned.storage_key),
        assigned_at: entry.assigned_at,
        latest_version: latest.version.clone(),
        up_to_date: entry.assigned.same_content(latest),
    }
}

/// `GET /current-version/{device_id}`: provisions on first query.
#[tracing::instrument(skip(state, headers))]
pub async fn current_version(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RolloutView>, ServerError> {
    let entry = state
        .run(OperationClass::Write, "get-current", move |c| c.get_current(&device_id))
        .await?;
    let latest = state.coordinator().latest();
    Ok(Json(rollout_view(&state, &headers, &entry, &latest.current)))
}

/// `POST /promote-current/{device_id}`
#[tracing::instrument(skip(state, headers))]
pub async fn promote_current(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RolloutView>, ServerError> {
    let entry = state
        .run(OperationClass::Write, "promote", move |c| c.promote(&device_id))
        .await?;
    let latest = state.coordinator().latest();
    Ok(Json(rollout_view(&state, &headers, &entry, &latest.current)))
}

/// `POST /promote-all`: per-device results; one failure does not fail the
/// batch.
#[tracing::instrument(skip_all)]
pub async fn promote_all(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PromoteAllResponse>, ServerError> {
    let report = state
        .run(OperationClass::Bulk, "promote-all", |c| Ok(c.promote_all()))
        .await?;
    let latest = state.coordinator().latest();

    let devices = report
        .promoted
        .iter()
        .map(|entry| rollout_view(&state, &headers, entry, &latest.current))
        .collect();
    let failed = report
        .failed
        .into_iter()
        .map(|(device_id, error)| {
            let error: ApiError = ServerError::from(error).to_api_error();
            DeviceFailure {
                device_id: device_id.to_string(),
                error,
            }
        })
        .collect();

    Ok(Json(PromoteAllResponse {
        promoted: report.promoted.len(),
        devices,
        failed,
    }))
}

/// `GET /devices`
#[tracing::instrument(skip_all)]
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<Vec<RolloutView>> {
    let latest = state.coordinator().latest();
    let views = state
        .coordinator()
        .devices()
        .iter()
        .map(|entry| rollout_view(&state, &headers, entry, &latest.current))
        .collect();
    Json(views)
}
