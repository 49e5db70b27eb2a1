//! Device provisioning config store: `POST /configs/{key}`, `GET /configs`,
//! `GET /configs/{key}`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::Json;
use ota_protocol::{ConfigListing, ConfigSummary};
use ota_release::{ConfigEntry, OperationClass};

use crate::error::ServerError;
use crate::state::AppState;

fn summary(entry: ConfigEntry) -> ConfigSummary {
    ConfigSummary {
        key: entry.key,
        size_bytes: entry.size_bytes,
        modified_at: entry.modified_at,
    }
}

#[tracing::instrument(skip(state, body), fields(size_bytes = body.len()))]
pub async fn save_config(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<Json<ConfigSummary>, ServerError> {
    if body.is_empty() {
        return Err(ServerError::BadRequest("config body is empty".to_string()));
    }
    let entry = state
        .run(OperationClass::Write, "save-config", move |c| c.save_config(&key, &body))
        .await?;
    Ok(Json(summary(entry)))
}

#[tracing::instrument(skip_all)]
pub async fn list_configs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ConfigListing>, ServerError> {
    let entries = state
        .run(OperationClass::Read, "list-configs", |c| c.list_configs())
        .await?;
    Ok(Json(ConfigListing {
        configs: entries.into_iter().map(summary).collect(),
    }))
}

#[tracing::instrument(skip(state))]
pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let data = state
        .run(OperationClass::Read, "read-config", move |c| c.read_config(&key))
        .await?;
    Ok(([(CONTENT_TYPE, "application/octet-stream")], data))
}
