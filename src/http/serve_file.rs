use axum::{
  extract::{Path, State},
  http::{header, StatusCode},
  response::IntoResponse,
};
use tracing::{debug, error};

use crate::http::error::{ErrorBody, FileError};
use crate::http::storage::{self, StorageError};
use crate::http::AppState;

/// Read a stored file back through the configured backend
#[utoipa::path(
  get,
  path = "/api/file/{name}",
  params(("name" = String, Path, description = "File name returned by the upload route")),
  responses(
    (status = 200, description = "File contents"),
    (status = 400, description = "Invalid file name", body = ErrorBody),
    (status = 404, description = "No such file", body = ErrorBody),
    (status = 500, description = "Backend failure", body = ErrorBody)
  )
)]
pub async fn serve_file(
  Path(name): Path<String>,
  State(state): State<AppState>,
) -> Result<impl IntoResponse, FileError> {
  let data = match state.storage_client.get(&name).await {
    Ok(data) => data,
    Err(e @ StorageError::Backend(_)) => {
      error!("failed to read {} from {}: {:#}", name, state.storage_client.name(), e);
      return Err(e.into());
    }
    Err(e) => {
      debug!("cannot serve {}: {}", name, e);
      return Err(e.into());
    }
  };

  let headers = [
    (header::CONTENT_TYPE, storage::mime_for(&name)),
    (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
  ];

  Ok((StatusCode::OK, headers, data))
}
