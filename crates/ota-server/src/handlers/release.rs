//! Release pool endpoints: `GET /latest-version`, `POST /update-version`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use ota_protocol::{LatestVersion, MessageResponse, UpdateVersionRequest};
use ota_release::{OperationClass, ReleaseRecord};

use crate::error::ServerError;
use crate::state::AppState;

pub(crate) fn latest_view(state: &AppState, headers: &HeaderMap, record: &ReleaseRecord) -> LatestVersion {
    LatestVersion {
        version: record.current.version.clone(),
        url: state.download_url(headers, &record.current.storage_key),
        release_notes: record.release_notes.clone(),
    }
}

#[tracing::instrument(skip_all)]
pub async fn latest_version(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<LatestVersion> {
    let record = state.coordinator().latest();
    Json(latest_view(&state, &headers, &record))
}

/// Amend the release notes of the resident release. A version other than
/// the resident one is refused; `url` is ignored.
#[tracing::instrument(skip_all)]
pub async fn update_version(
    State(state): State<Arc<AppState>>,
    body: Result<Json<UpdateVersionRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ServerError> {
    let Json(request) = body.map_err(|e| ServerError::BadRequest(format!("invalid input: {}", e.body_text())))?;
    let release_notes = request
        .release_notes
        .ok_or(ServerError::MissingField("release_notes"))?;
    if request.url.is_some() {
        tracing::debug!("ignoring client-supplied url");
    }

    let version = request.version;
    state
        .run(OperationClass::Write, "update-version", move |c| {
            c.amend_notes(&version, &release_notes)
        })
        .await?;
    Ok(Json(MessageResponse::new(
        "Version information updated successfully",
    )))
}
