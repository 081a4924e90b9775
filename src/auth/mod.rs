use std::collections::HashSet;
use std::fmt;

use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Access codes are sent as `Bearer nk-<code>`, anything else is a user key.
pub const ACCESS_CODE_PREFIX: &str = "nk-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProvider {
  Gpt,
}

impl fmt::Display for ModelProvider {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ModelProvider::Gpt => "gpt",
    };
    f.write_str(name)
  }
}

/// Payload handed back to the client verbatim on rejection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuthRejection {
  pub error: bool,
  pub msg: String,
}

impl AuthRejection {
  pub fn new(msg: impl Into<String>) -> Self {
    Self {
      error: true,
      msg: msg.into(),
    }
  }
}

pub trait AuthGate: Send + Sync {
  fn check(&self, headers: &HeaderMap, provider: ModelProvider) -> Result<(), AuthRejection>;
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Credentials {
  pub access_code: String,
  pub api_key: String,
}

pub fn parse_credentials(headers: &HeaderMap) -> Credentials {
  let token = headers
    .get(header::AUTHORIZATION)
    .and_then(|header| header.to_str().ok())
    .unwrap_or("")
    .trim();
  let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();

  match token.strip_prefix(ACCESS_CODE_PREFIX) {
    Some(code) => Credentials {
      access_code: code.to_owned(),
      api_key: String::new(),
    },
    None => Credentials {
      access_code: String::new(),
      api_key: token.to_owned(),
    },
  }
}

fn digest(code: &str) -> String {
  hex::encode(Sha256::digest(code.trim().as_bytes()))
}

pub struct AccessCodeGate {
  codes: HashSet<String>,
  hide_user_api_key: bool,
}

impl AccessCodeGate {
  pub fn new(codes: &[String], hide_user_api_key: bool) -> Self {
    Self {
      codes: codes
        .iter()
        .filter(|c| !c.trim().is_empty())
        .map(|c| digest(c))
        .collect(),
      hide_user_api_key,
    }
  }

  fn need_code(&self) -> bool {
    !self.codes.is_empty()
  }
}

impl AuthGate for AccessCodeGate {
  fn check(&self, headers: &HeaderMap, provider: ModelProvider) -> Result<(), AuthRejection> {
    let credentials = parse_credentials(headers);
    let has_api_key = !credentials.api_key.is_empty();

    if self.need_code() && !self.codes.contains(&digest(&credentials.access_code)) && !has_api_key
    {
      let msg = if credentials.access_code.is_empty() {
        "empty access code"
      } else {
        "wrong access code"
      };
      debug!(%provider, "rejecting request: {}", msg);
      return Err(AuthRejection::new(msg));
    }

    if self.hide_user_api_key && has_api_key {
      debug!(%provider, "rejecting request carrying a user api key");
      return Err(AuthRejection::new(
        "you are not allowed to access with your own api key",
      ));
    }

    Ok(())
  }
}
