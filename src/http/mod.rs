use anyhow::{anyhow, Context};
use axum::{
  extract::{DefaultBodyLimit, MatchedPath, Request},
  middleware::{self, Next},
  response::IntoResponse,
  routing::{get, post},
  Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::future::ready;
use std::{path::Path, sync::Arc};
use tokio::signal;
use tokio::time::{Duration, Instant};
use tower_http::{
  catch_panic::CatchPanicLayer,
  timeout::TimeoutLayer,
  trace::{self, TraceLayer},
};
use tracing::{info, Level};
use utoipa::OpenApi;
use utoipa_redoc::{Redoc, Servable};

use crate::auth::{AccessCodeGate, AuthGate};
use crate::compression::{Compressor, VipsCompressor};
use crate::config::{Config, StorageConfig, StorageConfigS3};
use anyhow::Result;
use libvips::VipsApp;

pub mod error;
pub mod local_storage;
pub mod s3;
mod serve_file;
pub mod storage;
pub mod upload_file;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(OpenApi)]
#[openapi(
  paths(upload_file::upload_file, serve_file::serve_file),
  components(schemas(
    upload_file::StoredFileReference,
    upload_file::PreflightBody,
    upload_file::UploadForm,
    error::ErrorBody
  )),
  modifiers(&SecurityAddon),
  info(
    title = "Pixel Depot API",
    version = "0.1.0",
    description = "Compresses uploaded images and stores them on disk or in S3"
  )
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
  fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
    if let Some(components) = openapi.components.as_mut() {
      components.add_security_scheme(
        "access_code",
        utoipa::openapi::security::SecurityScheme::Http(utoipa::openapi::security::Http::new(
          utoipa::openapi::security::HttpAuthScheme::Bearer,
        )),
      );
    }
  }
}

/// Collaborators shared by every request. Built once, never mutated.
#[derive(Clone)]
pub struct AppState {
  pub storage_client: Arc<dyn storage::Storage>,
  pub compressor: Arc<dyn Compressor>,
  pub auth_gate: Arc<dyn AuthGate>,
  pub max_upload_bytes: usize,
}

pub fn bootstrap(cfg: &Config) -> Result<Router> {
  // Init vips
  let vips_app = Arc::new(
    VipsApp::new("pixel-depot", false).map_err(|e| anyhow!("cannot initialize libvips: {}", e))?,
  );
  // Set number of threads in libvips's threadpool
  vips_app.concurrency_set(cfg.app.vips_concurrency);

  // Disable vips cache
  vips_app.cache_set_max_mem(0);
  vips_app.cache_set_max(0);
  vips_app.cache_set_max_files(0);

  let storage_client = build_storage(&cfg.storage)?;
  info!("storing uploads with the {} backend", storage_client.name());

  let state = AppState {
    storage_client,
    compressor: Arc::new(VipsCompressor::new(vips_app)),
    auth_gate: Arc::new(AccessCodeGate::new(
      &cfg.auth.codes,
      cfg.auth.hide_user_api_key,
    )),
    max_upload_bytes: cfg.app.max_upload_bytes(),
  };

  let mut app = router(state);

  // Conditionally add OpenAPI routes if enabled
  if cfg.app.enable_openapi.unwrap_or(false) {
    app = app
      .merge(Redoc::with_url("/redoc", ApiDoc::openapi()))
      .route(
        "/api-docs/openapi.json",
        get(|| async { axum::Json(ApiDoc::openapi()) }),
      );
  }

  Ok(app)
}

/// Picks the single backend every upload is written to.
pub fn build_storage(cfg: &StorageConfig) -> Result<Arc<dyn storage::Storage>> {
  if cfg.store_file_to_local {
    let local = cfg
      .local
      .as_ref()
      .ok_or_else(|| anyhow!("local storage config is missing"))?;
    let path = Path::new(&local.path).to_path_buf();

    return Ok(Arc::new(local_storage::Client::new(path, &cfg.public_path)));
  }

  let storage_config = match &cfg.s3 {
    Some(s3) => s3,
    None => return Err(anyhow!("S3 storage config is missing")),
  };

  let cred = s3_credentials(storage_config)?;

  let s3_config = aws_sdk_s3::config::Builder::new()
    .endpoint_url(storage_config.endpoint.clone())
    .credentials_provider(cred)
    .region(aws_sdk_s3::config::Region::new(
      storage_config.region.clone(),
    ))
    .force_path_style(storage_config.force_path_style) // apply bucketname as path param instead of pre-domain
    // S3-compatible stores (MinIO, R2) reject the default checksum trailers
    .request_checksum_calculation(aws_sdk_s3::config::RequestChecksumCalculation::WhenRequired)
    .response_checksum_validation(aws_sdk_s3::config::ResponseChecksumValidation::WhenRequired)
    .behavior_version_latest()
    .build();

  let client = aws_sdk_s3::Client::from_conf(s3_config);
  Ok(Arc::new(s3::Client::new(
    client,
    storage_config.bucket.as_str(),
    storage_config.base_url.as_deref(),
    &cfg.public_path,
  )?))
}

/// Keys from the config file, falling back to the standard AWS variables.
fn s3_credentials(cfg: &StorageConfigS3) -> Result<aws_sdk_s3::config::Credentials> {
  let access_key_id = match &cfg.access_key_id {
    Some(key) => key.clone(),
    None => std::env::var("AWS_ACCESS_KEY_ID")
      .context("S3 access key id is neither configured nor set in AWS_ACCESS_KEY_ID")?,
  };
  let secret_access_key = match &cfg.secret_access_key {
    Some(secret) => secret.clone(),
    None => std::env::var("AWS_SECRET_ACCESS_KEY")
      .context("S3 secret access key is neither configured nor set in AWS_SECRET_ACCESS_KEY")?,
  };

  Ok(aws_sdk_s3::config::Credentials::new(
    access_key_id,
    secret_access_key,
    None,
    None,
    "pixel-depot-config",
  ))
}

pub fn router(state: AppState) -> Router {
  let body_limit = state.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

  let app = Router::new()
    .route(
      "/api/file/upload",
      post(upload_file::upload_file).options(upload_file::upload_file),
    )
    .route("/api/file/:name", get(serve_file::serve_file))
    .layer(DefaultBodyLimit::max(body_limit))
    .with_state(state);

  app.layer((
    middleware::from_fn(track_metrics),
    TraceLayer::new_for_http()
      .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
      .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
    TimeoutLayer::new(Duration::from_secs(60)),
    CatchPanicLayer::new(),
  ))
}

pub async fn serve(router: Router, listen: &str) -> Result<()> {
  let listener = tokio::net::TcpListener::bind(listen)
    .await
    .with_context(|| format!("failed to bind to address: {}", listen))?;
  info!("listening on {}", listen);

  axum::serve(listener, router)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("error running HTTP server")
}

async fn healthz() -> &'static str {
  "pong"
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = signal::ctrl_c().await {
      tracing::error!("failed to install Ctrl+C handler: {}", e);
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(e) => {
        tracing::error!("failed to install signal handler: {}", e);
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
      _ = ctrl_c => {},
      _ = terminate => {},
  }
}

pub async fn serve_metrics(listen: &str) -> Result<()> {
  let app = metrics_app()?;

  let listener = tokio::net::TcpListener::bind(listen)
    .await
    .with_context(|| format!("failed to bind to address: {}", listen))?;
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("error running metrics HTTP server")
}

fn metrics_app() -> Result<Router> {
  let recorder_handle = setup_metrics_recorder()?;
  Ok(
    Router::new()
      .route("/metrics", get(move || ready(recorder_handle.render())))
      .route("/healthz", get(healthz)),
  )
}

/// Request latency buckets plus the `upload_bytes` histogram fed by the
/// upload route.
fn setup_metrics_recorder() -> Result<PrometheusHandle> {
  const EXPONENTIAL_SECONDS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
  ];
  const UPLOAD_BYTES: &[f64] = &[
    16_384.0,
    65_536.0,
    262_144.0,
    1_048_576.0,
    4_194_304.0,
    16_777_216.0,
  ];

  let handle = PrometheusBuilder::new()
    .set_buckets_for_metric(
      Matcher::Full("http_requests_duration_seconds".to_string()),
      EXPONENTIAL_SECONDS,
    )?
    .set_buckets_for_metric(Matcher::Full("upload_bytes".to_string()), UPLOAD_BYTES)?
    .install_recorder()?;

  Ok(handle)
}

async fn track_metrics(req: Request, next: Next) -> impl IntoResponse {
  let start = Instant::now();
  let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
    matched_path.as_str().to_owned()
  } else {
    req.uri().path().to_owned()
  };
  let method = req.method().clone();

  let response = next.run(req).await;

  let latency = start.elapsed().as_secs_f64();
  let status = response.status().as_u16().to_string();

  let labels = [
    ("method", method.to_string()),
    ("path", path),
    ("status", status),
  ];

  metrics::counter!("http_requests_total", &labels).increment(1);
  metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

  response
}
