//! Artifact byte streams.

use std::fs::File;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use ota_release::{Coordinator, OperationClass};
use tokio_util::io::ReaderStream;

use crate::error::ServerError;
use crate::state::AppState;

const ARTIFACT_CONTENT_TYPE: &str = "application/vnd.android.package-archive";

/// `GET /download/{*storage_key}`
#[tracing::instrument(skip(state))]
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(storage_key): Path<String>,
) -> Result<Response, ServerError> {
    let file_name = last_segment(&storage_key).to_string();
    stream_blob(&state, file_name, move |c| c.open_download(&storage_key)).await
}

/// `GET /apk/{file_name}`: a file from the latest area.
#[tracing::instrument(skip(state))]
pub async fn download_latest_file(
    State(state): State<Arc<AppState>>,
    Path(file_name): Path<String>,
) -> Result<Response, ServerError> {
    let name = file_name.clone();
    stream_blob(&state, name, move |c| c.open_latest_file(&file_name)).await
}

fn last_segment(storage_key: &str) -> &str {
    storage_key.rsplit('/').next().unwrap_or(storage_key)
}

async fn stream_blob<F>(state: &AppState, file_name: String, open: F) -> Result<Response, ServerError>
where
    F: FnOnce(&Coordinator) -> ota_release::Result<(File, u64)> + Send + 'static,
{
    let (file, len) = state.run(OperationClass::Read, "download", open).await?;
    let stream = ReaderStream::new(tokio::fs::File::from_std(file));

    Ok((
        [
            (CONTENT_TYPE, ARTIFACT_CONTENT_TYPE.to_string()),
            (CONTENT_LENGTH, len.to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name.replace('"', "")),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
