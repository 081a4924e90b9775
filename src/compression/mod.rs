use std::sync::Arc;

use async_trait::async_trait;
use libvips::{ops, VipsApp, VipsImage};
use thiserror::Error;
use tracing::{debug, error};

/// Quality used for JPEG input, matching mozjpeg's default.
pub const JPEG_QUALITY: i32 = 75;

/// Accepted quality range for palette PNG output. libvips only takes the
/// upper bound.
pub const PNG_QUALITY: (f64, f64) = (0.6, 0.8);

#[derive(Error, Debug)]
pub enum CompressionError {
  #[error("failed to decode image: {0}")]
  Decode(String),
  #[error("failed to encode image: {0}")]
  Encode(String),
  #[error("compression worker went away")]
  WorkerGone,
}

#[async_trait]
pub trait Compressor: Send + Sync {
  async fn compress(&self, data: Vec<u8>) -> Result<Vec<u8>, CompressionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
  Jpeg,
  Png,
}

impl Codec {
  pub fn from_loader(loader: &str) -> Option<Codec> {
    match loader {
      "jpegload_buffer" => Some(Codec::Jpeg),
      "pngload_buffer" => Some(Codec::Png),
      _ => None,
    }
  }
}

pub struct VipsCompressor {
  vips_app: Arc<VipsApp>,
}

impl VipsCompressor {
  pub fn new(vips_app: Arc<VipsApp>) -> Self {
    Self { vips_app }
  }
}

#[async_trait]
impl Compressor for VipsCompressor {
  async fn compress(&self, data: Vec<u8>) -> Result<Vec<u8>, CompressionError> {
    let (send, recv) = tokio::sync::oneshot::channel();

    // Run the codec in a thread from the thread pool
    rayon::spawn(move || {
      let _ = send.send(compress_buffer(data));
    });

    let res = recv.await.map_err(|_| CompressionError::WorkerGone)?;
    if let Err(e) = &res {
      error!(
        "failed to compress image: {} {}",
        e,
        self.vips_app.error_buffer().unwrap_or("")
      );
    }

    res
  }
}

/// Re-encodes JPEG and PNG input, passes every other decodable format
/// through untouched. Never returns more bytes than it was given.
pub fn compress_buffer(data: Vec<u8>) -> Result<Vec<u8>, CompressionError> {
  if data.is_empty() {
    return Err(CompressionError::Decode("empty image buffer".to_owned()));
  }

  // The image must be dropped before `data` is moved out.
  let encoded = {
    let image = VipsImage::new_from_buffer(&data, "")
      .map_err(|e| CompressionError::Decode(e.to_string()))?;

    let loader = image
      .get_string("vips-loader")
      .map_err(|e| CompressionError::Decode(e.to_string()))?;

    match Codec::from_loader(loader) {
      Some(codec) => Some(encode(&image, codec)?),
      None => {
        debug!("no compression profile for loader {}, passing through", loader);
        None
      }
    }
  };

  match encoded {
    Some(out) if out.len() <= data.len() => {
      debug!("compressed image from {} to {} bytes", data.len(), out.len());
      Ok(out)
    }
    Some(out) => {
      debug!(
        "re-encoding grew image from {} to {} bytes, keeping input",
        data.len(),
        out.len()
      );
      Ok(data)
    }
    None => Ok(data),
  }
}

fn encode(image: &VipsImage, codec: Codec) -> Result<Vec<u8>, CompressionError> {
  let res = match codec {
    Codec::Jpeg => ops::jpegsave_buffer_with_opts(
      image,
      &ops::JpegsaveBufferOptions {
        q: JPEG_QUALITY,
        optimize_coding: true,
        interlace: true,
        trellis_quant: true,
        overshoot_deringing: true,
        ..ops::JpegsaveBufferOptions::default()
      },
    ),
    Codec::Png => ops::pngsave_buffer_with_opts(
      image,
      &ops::PngsaveBufferOptions {
        palette: true,
        q: (PNG_QUALITY.1 * 100.0).round() as i32,
        ..ops::PngsaveBufferOptions::default()
      },
    ),
  };

  res.map_err(|e| CompressionError::Encode(e.to_string()))
}
