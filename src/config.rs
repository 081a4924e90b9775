use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

pub const CONFIG_PATH_ENV: &str = "PIXEL_DEPOT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Deserialize)]
pub struct Config {
  pub app: AppConfig,
  #[serde(default)]
  pub auth: AuthConfig,
  pub storage: StorageConfig,
}

#[derive(Deserialize)]
pub struct AppConfig {
  pub listen: String,
  pub metrics_listen: String,
  pub vips_concurrency: i32,
  pub max_upload_size_mb: usize,
  pub enable_openapi: Option<bool>,
}

impl AppConfig {
  pub fn max_upload_bytes(&self) -> usize {
    self.max_upload_size_mb * 1024 * 1024
  }
}

#[derive(Deserialize, Default)]
pub struct AuthConfig {
  /// Plain access codes. Empty means no code is required.
  #[serde(default)]
  pub codes: Vec<String>,
  #[serde(default)]
  pub hide_user_api_key: bool,
}

#[derive(Deserialize)]
pub struct StorageConfig {
  pub store_file_to_local: bool,
  /// Prefix of the paths returned for files served through `/api/file`.
  #[serde(default = "default_public_path")]
  pub public_path: String,
  pub s3: Option<StorageConfigS3>,
  pub local: Option<StorageConfigLocal>,
}

#[derive(Deserialize)]
pub struct StorageConfigS3 {
  pub endpoint: String,
  pub bucket: String,
  pub access_key_id: Option<String>,
  pub secret_access_key: Option<String>,
  pub region: String,
  pub force_path_style: bool,
  pub base_url: Option<String>,
}

#[derive(Deserialize)]
pub struct StorageConfigLocal {
  pub path: String,
}

fn default_public_path() -> String {
  "/api/file".to_owned()
}

/// Config file location, `PIXEL_DEPOT_CONFIG` wins over `config.toml`.
pub fn path_from_env() -> String {
  std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned())
}

pub fn parse(config_path: &str) -> Result<Config> {
  let toml_str = fs::read_to_string(config_path)
    .with_context(|| format!("failed to read config file: {}", config_path))?;

  from_toml(&toml_str)
}

pub fn from_toml(toml_str: &str) -> Result<Config> {
  let cfg: Config = toml::from_str(toml_str).context("failed to deserialize config")?;

  Ok(cfg)
}

#[cfg(test)]
mod tests {
  use super::*;

  const LOCAL_CONFIG: &str = r#"
    [app]
    listen = "0.0.0.0:3000"
    metrics_listen = "0.0.0.0:3001"
    vips_concurrency = 2
    max_upload_size_mb = 10

    [storage]
    store_file_to_local = true

    [storage.local]
    path = "uploads"
  "#;

  #[test]
  fn parses_local_config_with_defaults() {
    let cfg = from_toml(LOCAL_CONFIG).unwrap();

    assert!(cfg.storage.store_file_to_local);
    assert_eq!(cfg.storage.public_path, "/api/file");
    assert_eq!(cfg.storage.local.unwrap().path, "uploads");
    assert!(cfg.storage.s3.is_none());
    assert!(cfg.auth.codes.is_empty());
    assert!(!cfg.auth.hide_user_api_key);
    assert_eq!(cfg.app.max_upload_bytes(), 10 * 1024 * 1024);
    assert_eq!(cfg.app.enable_openapi, None);
  }

  #[test]
  fn parses_s3_config_without_inline_credentials() {
    let cfg = from_toml(
      r#"
      [app]
      listen = "0.0.0.0:3000"
      metrics_listen = "0.0.0.0:3001"
      vips_concurrency = 1
      max_upload_size_mb = 5

      [auth]
      codes = ["secret"]
      hide_user_api_key = true

      [storage]
      store_file_to_local = false

      [storage.s3]
      endpoint = "http://localhost:9000"
      bucket = "uploads"
      region = "us-east-1"
      force_path_style = true
    "#,
    )
    .unwrap();

    let s3 = cfg.storage.s3.unwrap();
    assert!(!cfg.storage.store_file_to_local);
    assert_eq!(s3.bucket, "uploads");
    assert!(s3.access_key_id.is_none());
    assert!(s3.base_url.is_none());
    assert_eq!(cfg.auth.codes, vec!["secret".to_owned()]);
    assert!(cfg.auth.hide_user_api_key);
  }

  #[test]
  fn missing_storage_section_is_an_error() {
    let res = from_toml(
      r#"
      [app]
      listen = "0.0.0.0:3000"
      metrics_listen = "0.0.0.0:3001"
      vips_concurrency = 1
      max_upload_size_mb = 5
    "#,
    );

    assert!(res.is_err());
  }
}
