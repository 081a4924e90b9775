use crate::http::storage::{self, Storage, StorageError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use tokio::io::AsyncReadExt;
use tracing::debug;
use url::Url;

pub struct Client {
  s3_client: aws_sdk_s3::Client,
  bucket: String,
  base_url: Option<Url>,
  public_path: String,
}

impl Client {
  pub fn new(
    s3_client: aws_sdk_s3::Client,
    bucket: &str,
    base_url: Option<&str>,
    public_path: &str,
  ) -> Result<Self> {
    let base_url = match base_url {
      Some(base_url) => {
        // Url::join drops the last segment unless the base ends with a slash
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        Some(Url::parse(&normalized).with_context(|| format!("failed to parse base url: {}", base_url))?)
      }
      None => None,
    };

    Ok(Self {
      s3_client,
      bucket: bucket.to_owned(),
      base_url,
      public_path: public_path.to_owned(),
    })
  }

  fn object_path(&self, key: &str) -> Result<String> {
    match &self.base_url {
      Some(base_url) => Ok(base_url.join(key)?.to_string()),
      None => Ok(storage::public_path(&self.public_path, key)),
    }
  }
}

#[async_trait]
impl Storage for Client {
  fn name(&self) -> &'static str {
    "s3"
  }

  async fn put(&self, name: &str, data: Vec<u8>) -> Result<String, StorageError> {
    let key = storage::validate_key(name)?;

    debug!(
      "uploading object: {} ({} bytes) to bucket: {}",
      key,
      data.len(),
      self.bucket
    );

    let body = ByteStream::from(data);
    self
      .s3_client
      .put_object()
      .bucket(self.bucket.as_str())
      .key(key)
      .body(body)
      .cache_control("public, max-age=31536000, immutable".to_owned())
      .content_type(storage::mime_for(key))
      .send()
      .await
      .context("failed to upload object")?;

    Ok(self.object_path(key)?)
  }

  async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
    let key = storage::validate_key(name)?;

    debug!("downloading object: {} from bucket: {}", key, self.bucket);

    let object = match self
      .s3_client
      .get_object()
      .bucket(self.bucket.as_str())
      .key(key)
      .send()
      .await
    {
      Ok(object) => object,
      Err(e) => {
        let service_err = e.into_service_error();
        if service_err.is_no_such_key() {
          return Err(StorageError::NotFound(key.to_owned()));
        }
        return Err(
          anyhow::Error::new(service_err)
            .context(format!("failed to download object: {}", key))
            .into(),
        );
      }
    };

    let capacity = object.content_length.unwrap_or(0).max(0) as usize;
    let mut data = Vec::with_capacity(capacity);
    object
      .body
      .into_async_read()
      .read_to_end(&mut data)
      .await
      .with_context(|| format!("failed to read object body: {}", key))?;

    Ok(data)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn offline_client() -> aws_sdk_s3::Client {
    let cred = aws_sdk_s3::config::Credentials::new("key", "secret", None, None, "test");
    let conf = aws_sdk_s3::config::Builder::new()
      .endpoint_url("http://127.0.0.1:9")
      .credentials_provider(cred)
      .region(aws_sdk_s3::config::Region::new("us-east-1"))
      .behavior_version_latest()
      .build();

    aws_sdk_s3::Client::from_conf(conf)
  }

  #[tokio::test]
  async fn object_path_uses_base_url_when_configured() {
    let client = Client::new(
      offline_client(),
      "uploads",
      Some("https://cdn.example.com/images"),
      "/api/file",
    )
    .unwrap();

    assert_eq!(
      client.object_path("1.png").unwrap(),
      "https://cdn.example.com/images/1.png"
    );
  }

  #[tokio::test]
  async fn object_path_falls_back_to_public_path() {
    let client = Client::new(offline_client(), "uploads", None, "/api/file").unwrap();

    assert_eq!(client.object_path("1.png").unwrap(), "/api/file/1.png");
  }

  #[tokio::test]
  async fn invalid_base_url_is_rejected() {
    assert!(Client::new(offline_client(), "uploads", Some("not a url"), "/api/file").is_err());
  }

  #[tokio::test]
  async fn invalid_key_fails_before_any_request() {
    let client = Client::new(offline_client(), "uploads", None, "/api/file").unwrap();

    assert!(matches!(
      client.put("../x.png", vec![1]).await,
      Err(StorageError::InvalidKey(_))
    ));
  }
}
