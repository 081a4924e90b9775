use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
  #[error("invalid file name: {0}")]
  InvalidKey(String),
  #[error("file not found: {0}")]
  NotFound(String),
  #[error(transparent)]
  Backend(#[from] anyhow::Error),
}

/// Write/read capability shared by the local and S3 backends.
///
/// `put` overwrites an existing object with the same name and returns the
/// path clients use to fetch it back.
#[async_trait]
pub trait Storage: Send + Sync {
  fn name(&self) -> &'static str;

  async fn put(&self, name: &str, data: Vec<u8>) -> Result<String, StorageError>;

  async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError>;
}

/// Accepts only flat file names, never anything that could leave the root.
pub fn validate_key(name: &str) -> Result<&str, StorageError> {
  let invalid = name.is_empty()
    || name == "."
    || name.contains("..")
    || name.contains('/')
    || name.contains('\\')
    || name.contains('\0');

  if invalid {
    return Err(StorageError::InvalidKey(name.to_owned()));
  }

  Ok(name)
}

pub fn mime_for(name: &str) -> &'static str {
  let ext = name
    .rsplit_once('.')
    .map(|(_, ext)| ext.to_ascii_lowercase())
    .unwrap_or_default();

  match ext.as_str() {
    "png" => "image/png",
    "jpg" | "jpeg" => "image/jpeg",
    "gif" => "image/gif",
    "webp" => "image/webp",
    _ => "application/octet-stream",
  }
}

/// `<prefix>/<name>` without doubling the separator.
pub fn public_path(prefix: &str, name: &str) -> String {
  format!("{}/{}", prefix.trim_end_matches('/'), name)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_generated_names() {
    assert_eq!(validate_key("1718000000000.png").unwrap(), "1718000000000.png");
  }

  #[test]
  fn rejects_traversal_and_separators() {
    for name in ["", ".", "..", "../etc/passwd", "a/b.png", "a\\b.png", "/abs.png"] {
      assert!(
        matches!(validate_key(name), Err(StorageError::InvalidKey(_))),
        "{name} should be rejected"
      );
    }
  }

  #[test]
  fn mime_follows_extension() {
    assert_eq!(mime_for("1.png"), "image/png");
    assert_eq!(mime_for("1.JPG"), "image/jpeg");
    assert_eq!(mime_for("noext"), "application/octet-stream");
  }

  #[test]
  fn public_path_joins_once() {
    assert_eq!(public_path("/api/file", "1.png"), "/api/file/1.png");
    assert_eq!(public_path("/api/file/", "1.png"), "/api/file/1.png");
  }
}
