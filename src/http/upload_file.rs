use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
  extract::{FromRequest, Multipart, Request, State},
  http::{Method, StatusCode},
  response::{IntoResponse, Response},
  Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::auth::ModelProvider;
use crate::http::error::{ErrorBody, UploadError};
use crate::http::AppState;

/// Provider identity the upload route authenticates as.
pub const UPLOAD_PROVIDER: ModelProvider = ModelProvider::Gpt;
pub const FILE_FIELD: &str = "file";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoredFileReference {
  pub file_name: String,
  pub file_path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct PreflightBody {
  pub body: String,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct UploadForm {
  #[schema(value_type = String, format = Binary)]
  file: Vec<u8>,
}

/// Every stored file is named `<unix-millis>.png`, whatever the input format.
pub fn file_name(millis: u128) -> String {
  format!("{}.png", millis)
}

fn now_millis() -> u128 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis())
    .unwrap_or_default()
}

/// Upload an image, compress it and store it with the configured backend
#[utoipa::path(
  post,
  path = "/api/file/upload",
  request_body(content = UploadForm, content_type = "multipart/form-data"),
  responses(
    (status = 200, description = "File stored", body = StoredFileReference),
    (status = 401, description = "Rejected by the access code check", body = ErrorBody),
    (status = 500, description = "Decoding, compression or storage failed", body = ErrorBody)
  ),
  security(("access_code" = []))
)]
pub async fn upload_file(State(state): State<AppState>, req: Request) -> Response {
  if req.method() == Method::OPTIONS {
    return (
      StatusCode::OK,
      Json(PreflightBody {
        body: "OK".to_owned(),
      }),
    )
      .into_response();
  }

  let backend = state.storage_client.name();

  match handle(&state, req).await {
    Ok(reference) => {
      info!(
        backend,
        file_name = %reference.file_name,
        "stored upload at {}",
        reference.file_path
      );
      metrics::counter!("uploads_total", "backend" => backend, "outcome" => "ok").increment(1);

      (StatusCode::OK, Json(reference)).into_response()
    }
    Err(e) => {
      match &e {
        UploadError::AuthRejected(_) => warn!(kind = e.kind(), "upload rejected: {}", e),
        _ => error!(kind = e.kind(), backend, "upload failed: {}", e),
      }
      metrics::counter!("uploads_total", "backend" => backend, "outcome" => e.kind()).increment(1);

      e.into_response()
    }
  }
}

async fn handle(state: &AppState, req: Request) -> Result<StoredFileReference, UploadError> {
  // Headers only, the body stays untouched until the gate has passed
  state
    .auth_gate
    .check(req.headers(), UPLOAD_PROVIDER)
    .map_err(UploadError::AuthRejected)?;

  let multipart = Multipart::from_request(req, state)
    .await
    .map_err(|e| UploadError::Decode(e.body_text()))?;

  let data = read_file_field(multipart, state.max_upload_bytes).await?;
  metrics::histogram!("upload_bytes", "stage" => "received").record(data.len() as f64);

  let compressed = state.compressor.compress(data).await?;
  metrics::histogram!("upload_bytes", "stage" => "compressed").record(compressed.len() as f64);

  let file_name = file_name(now_millis());
  let file_path = state.storage_client.put(&file_name, compressed).await?;

  Ok(StoredFileReference {
    file_name,
    file_path,
  })
}

async fn read_file_field(mut multipart: Multipart, max: usize) -> Result<Vec<u8>, UploadError> {
  let decode_err = |e: axum::extract::multipart::MultipartError| {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
      UploadError::PayloadTooLarge { max }
    } else {
      UploadError::Decode(e.body_text())
    }
  };

  while let Some(mut field) = multipart.next_field().await.map_err(decode_err)? {
    if field.name() != Some(FILE_FIELD) {
      continue;
    }

    let mut data = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(decode_err)? {
      if data.len() + chunk.len() > max {
        return Err(UploadError::PayloadTooLarge { max });
      }
      data.extend_from_slice(&chunk);
    }

    return Ok(data);
  }

  Err(UploadError::Decode(format!(
    "missing `{}` field in form data",
    FILE_FIELD
  )))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_name_is_millis_with_png_extension() {
    assert_eq!(file_name(1718000000123), "1718000000123.png");
  }

  #[test]
  fn file_names_from_different_millis_differ() {
    assert_ne!(file_name(1), file_name(2));
  }

  #[test]
  fn reference_serializes_camel_case() {
    let value = serde_json::to_value(StoredFileReference {
      file_name: "1.png".to_owned(),
      file_path: "/api/file/1.png".to_owned(),
    })
    .unwrap();

    assert_eq!(
      value,
      serde_json::json!({ "fileName": "1.png", "filePath": "/api/file/1.png" })
    );
  }
}
