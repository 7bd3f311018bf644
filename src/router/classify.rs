//! Request classification.

use url::Url;

use crate::http::{Destination, Request};

/// Serving strategy class for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Top-level page load: network, falling back to the offline document
  Navigation,
  /// Backend data request: network-first with cache fallback and a synthetic
  /// offline response on a double miss
  RemoteData,
  /// Script/style/image: cache-first; a miss that also fails on the network
  /// is a real error and surfaces
  StaticAsset,
  /// Best-effort traffic: network-first with silent cache fallback
  Other,
}

/// Routing policy: which requests count as backend data, what to precache,
/// and which document stands in for failed navigations.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
  /// Path prefixes or exact hosts identifying backend data requests
  pub api_patterns: Vec<String>,
  /// Critical resources fetched into the current generation at install time
  pub precache_urls: Vec<String>,
  /// Absolute URL of the offline document; must be in `precache_urls`
  pub offline_document: String,
}

/// Classify a request. Destination wins for navigations; API patterns are
/// checked before destinations so a scripted API poll is still remote data.
pub fn classify(request: &Request, policy: &RoutePolicy) -> RequestClass {
  if request.destination == Destination::Document {
    return RequestClass::Navigation;
  }

  if matches_api(&request.url, &policy.api_patterns) {
    return RequestClass::RemoteData;
  }

  match request.destination {
    Destination::Script | Destination::Style | Destination::Image => RequestClass::StaticAsset,
    _ => RequestClass::Other,
  }
}

fn matches_api(url: &str, patterns: &[String]) -> bool {
  match Url::parse(url) {
    Ok(parsed) => {
      let host = parsed.host_str().unwrap_or("");
      let path = parsed.path();
      patterns.iter().any(|p| path.starts_with(p.as_str()) || host == p)
    }
    // Not an absolute URL; match path prefixes directly
    Err(_) => patterns.iter().any(|p| url.starts_with(p.as_str())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn policy() -> RoutePolicy {
    RoutePolicy {
      api_patterns: vec!["/api/".to_string(), "api.quill.example".to_string()],
      precache_urls: vec![],
      offline_document: "https://app.quill.example/offline.html".to_string(),
    }
  }

  #[test]
  fn test_document_destination_is_navigation() {
    let request = Request::get("https://app.quill.example/journal", Destination::Document);
    assert_eq!(classify(&request, &policy()), RequestClass::Navigation);
  }

  #[test]
  fn test_api_path_and_host_are_remote_data() {
    let by_path = Request::get("https://app.quill.example/api/habits", Destination::Other);
    assert_eq!(classify(&by_path, &policy()), RequestClass::RemoteData);

    let by_host = Request::get("https://api.quill.example/v2/insights", Destination::Other);
    assert_eq!(classify(&by_host, &policy()), RequestClass::RemoteData);
  }

  #[test]
  fn test_asset_destinations_are_static() {
    for destination in [Destination::Script, Destination::Style, Destination::Image] {
      let request = Request::get("https://app.quill.example/bundle.js", destination);
      assert_eq!(classify(&request, &policy()), RequestClass::StaticAsset);
    }
  }

  #[test]
  fn test_everything_else_is_other() {
    let request = Request::get("https://fonts.example/inter.woff2", Destination::Other);
    assert_eq!(classify(&request, &policy()), RequestClass::Other);
  }

  #[test]
  fn test_api_image_is_still_remote_data() {
    // Pattern match wins over destination for non-navigations
    let request = Request::get("https://app.quill.example/api/avatar.png", Destination::Image);
    assert_eq!(classify(&request, &policy()), RequestClass::RemoteData);
  }
}
