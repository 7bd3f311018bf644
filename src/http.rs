//! Shared request/response model for the offline layer.
//!
//! The router and cache only ever see these types; the reqwest adapter at the
//! bottom is the single place real network traffic happens.

use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use sha2::{Digest, Sha256};

/// What kind of resource a request is for. Mirrors the destinations the
/// routing policy cares about; anything else collapses into `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
  /// Top-level page load
  Document,
  Script,
  Style,
  Image,
  Other,
}

/// An outgoing request as seen by the router.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: String,
  pub url: String,
  pub destination: Destination,
}

impl Request {
  /// Convenience constructor for GET requests.
  pub fn get(url: &str, destination: Destination) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.to_string(),
      destination,
    }
  }

  /// Stable cache key for this request.
  ///
  /// SHA256 of method + URL for fixed-length keys; two requests share a cache
  /// slot exactly when method and URL are identical.
  pub fn request_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response as stored in the cache and returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  /// Whether the status is in the 2xx range.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value matching `name`, case-insensitively.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// The synthetic response served when a backend data request fails with no
  /// cached copy. Callers must treat this shape as "no connectivity", not as
  /// a genuine API decision.
  pub fn offline_fallback(message: &str) -> Self {
    let body = serde_json::to_vec(&json!({
      "error": "Offline",
      "message": message,
    }))
    .unwrap_or_default();

    Self {
      status: 503,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body,
    }
  }
}

/// Perform a real network call for `request` and adapt the reply.
pub async fn fetch(client: &reqwest::Client, request: &Request) -> Result<Response> {
  let method = reqwest::Method::from_bytes(request.method.as_bytes())
    .map_err(|e| eyre!("Invalid request method {}: {}", request.method, e))?;

  let reply = client
    .request(method, &request.url)
    .send()
    .await
    .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

  let status = reply.status().as_u16();
  let headers = reply
    .headers()
    .iter()
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();

  let body = reply
    .bytes()
    .await
    .map_err(|e| eyre!("Failed to read body from {}: {}", request.url, e))?
    .to_vec();

  Ok(Response {
    status,
    headers,
    body,
  })
}
