use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthRejection;
use crate::compression::CompressionError;
use crate::http::storage::StorageError;

/// Wire shape of every non-auth failure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, utoipa::ToSchema)]
pub struct ErrorBody {
  pub error: bool,
  pub msg: String,
}

impl ErrorBody {
  pub fn new(msg: impl Into<String>) -> Self {
    Self {
      error: true,
      msg: msg.into(),
    }
  }
}

#[derive(Error, Debug)]
pub enum UploadError {
  #[error("{}", .0.msg)]
  AuthRejected(AuthRejection),
  #[error("{0}")]
  Decode(String),
  #[error("file exceeds the maximum upload size of {max} bytes")]
  PayloadTooLarge { max: usize },
  #[error(transparent)]
  Compression(#[from] CompressionError),
  #[error(transparent)]
  Storage(#[from] StorageError),
}

impl UploadError {
  pub fn kind(&self) -> &'static str {
    match self {
      UploadError::AuthRejected(_) => "auth_rejected",
      UploadError::Decode(_) => "decode",
      UploadError::PayloadTooLarge { .. } => "payload_too_large",
      UploadError::Compression(_) => "compression",
      UploadError::Storage(_) => "storage",
    }
  }
}

impl IntoResponse for UploadError {
  fn into_response(self) -> Response {
    match self {
      UploadError::AuthRejected(rejection) => {
        (StatusCode::UNAUTHORIZED, Json(rejection)).into_response()
      }
      // anyhow's alternate format keeps the context chain in the message
      UploadError::Storage(StorageError::Backend(e)) => (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody::new(format!("{:#}", e))),
      )
        .into_response(),
      other => (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody::new(other.to_string())),
      )
        .into_response(),
    }
  }
}

#[derive(Error, Debug)]
pub enum FileError {
  #[error("{0}")]
  BadRequest(String),
  #[error("{0}")]
  NotFound(String),
  #[error("{0}")]
  InternalServerError(String),
}

impl From<StorageError> for FileError {
  fn from(err: StorageError) -> Self {
    match err {
      StorageError::InvalidKey(_) => FileError::BadRequest(err.to_string()),
      StorageError::NotFound(_) => FileError::NotFound(err.to_string()),
      StorageError::Backend(e) => FileError::InternalServerError(format!("{:#}", e)),
    }
  }
}

impl IntoResponse for FileError {
  fn into_response(self) -> Response {
    let status = match &self {
      FileError::BadRequest(_) => StatusCode::BAD_REQUEST,
      FileError::NotFound(_) => StatusCode::NOT_FOUND,
      FileError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status, Json(ErrorBody::new(self.to_string()))).into_response()
  }
}
