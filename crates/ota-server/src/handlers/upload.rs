//! `POST /upload-artifact` (alias `/upload-apk`)
//!
//! Multipart form: `file`, `version`, optional `release_notes`. Fields may
//! arrive in any order, so the file is buffered before publishing. The
//! body limit layer caps how much is buffered.

use std::io::Cursor;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use ota_protocol::{upload_fields, UploadResponse};
use ota_release::OperationClass;

use crate::error::ServerError;
use crate::state::AppState;

#[derive(Default)]
struct UploadForm {
    file: Option<Bytes>,
    version: Option<String>,
    release_notes: Option<String>,
}

#[tracing::instrument(skip_all)]
pub async fn upload_artifact(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ServerError> {
    let multipart = multipart.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let form = read_form(multipart, state.max_upload_bytes()).await?;

    let file = form.file.ok_or(ServerError::MissingField(upload_fields::FILE))?;
    let version = form
        .version
        .filter(|v| !v.is_empty())
        .ok_or(ServerError::MissingField(upload_fields::VERSION))?;
    let release_notes = form.release_notes;

    tracing::info!(version = %version, size_bytes = file.len(), "upload received");
    let record = state
        .run(OperationClass::Write, "publish", move |c| {
            c.publish(&version, Cursor::new(file), release_notes.as_deref())
        })
        .await?;

    Ok(Json(UploadResponse {
        message: "Artifact uploaded and version information updated successfully".to_string(),
        version: record.current.version.clone(),
        url: state.download_url(&headers, &record.current.storage_key),
        size_bytes: record.current.size_bytes,
        content_hash: record.current.content_hash.clone(),
    }))
}

async fn read_form(mut multipart: Multipart, max_upload_bytes: u64) -> Result<UploadForm, ServerError> {
    let too_large = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ServerError::PayloadTooLarge {
                max: max_upload_bytes,
            }
        } else {
            ServerError::BadRequest(e.body_text())
        }
    };

    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(too_large)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(upload_fields::FILE) => form.file = Some(field.bytes().await.map_err(too_large)?),
            Some(upload_fields::VERSION) => {
                form.version = Some(field.text().await.map_err(too_large)?.trim().to_string())
            }
            Some(upload_fields::RELEASE_NOTES) => {
                form.release_notes = Some(field.text().await.map_err(too_large)?)
            }
            other => tracing::debug!(field = ?other, "ignoring unknown form field"),
        }
    }
    Ok(form)
}
