use std::path::PathBuf;

use crate::http::storage::{self, Storage, StorageError};
use anyhow::Context;
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::debug;

pub struct Client {
  path: PathBuf,
  public_path: String,
}

impl Client {
  pub fn new(path: PathBuf, public_path: &str) -> Self {
    Self {
      path,
      public_path: public_path.to_owned(),
    }
  }
}

#[async_trait]
impl Storage for Client {
  fn name(&self) -> &'static str {
    "local"
  }

  async fn put(&self, name: &str, data: Vec<u8>) -> Result<String, StorageError> {
    let key = storage::validate_key(name)?;

    tokio::fs::create_dir_all(&self.path)
      .await
      .with_context(|| format!("failed to create directory: {}", self.path.display()))?;

    let file_path = self.path.join(key);
    debug!("writing {} bytes to {}", data.len(), file_path.display());

    tokio::fs::write(&file_path, &data)
      .await
      .with_context(|| format!("failed to write file: {}", key))?;

    Ok(storage::public_path(&self.public_path, key))
  }

  async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
    let key = storage::validate_key(name)?;
    let file_path = self.path.join(key);

    let mut file = match tokio::fs::File::open(&file_path).await {
      Ok(f) => f,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return Err(StorageError::NotFound(key.to_owned()))
      }
      Err(e) => {
        return Err(
          anyhow::Error::new(e)
            .context(format!("failed to open file: {}", key))
            .into(),
        )
      }
    };

    let mut data = Vec::new();
    file
      .read_to_end(&mut data)
      .await
      .with_context(|| format!("failed to read file: {}", key))?;

    Ok(data)
  }
}
