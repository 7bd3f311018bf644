//! Serving strategies per request class, plus install/activate lifecycle.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use tracing::{debug, info};

use crate::cache::{Generation, ResponseCache};
use crate::http::{Destination, Request, Response};

use super::classify::{classify, RequestClass, RoutePolicy};

/// Decides how every request is served and reads/writes the response cache
/// accordingly. Requests may be served concurrently; cache writes for the
/// same key resolve by last-write-wins, which is fine because cached entries
/// are derived, replaceable data, never the record of truth.
pub struct Router {
  cache: ResponseCache,
  generation: Generation,
  policy: RoutePolicy,
}

impl Router {
  pub fn new(cache: ResponseCache, generation: Generation, policy: RoutePolicy) -> Self {
    Self {
      cache,
      generation,
      policy,
    }
  }

  /// Serve one request with the strategy for its class. `fetch` performs the
  /// actual network call; transport failure is an `Err`, an HTTP error status
  /// is an `Ok` response.
  pub async fn serve<F, Fut>(&self, request: &Request, fetch: F) -> Result<Response>
  where
    F: FnOnce(&Request) -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    match classify(request, &self.policy) {
      RequestClass::Navigation => self.serve_navigation(request, fetch).await,
      RequestClass::RemoteData => self.serve_remote_data(request, fetch).await,
      RequestClass::StaticAsset => self.serve_static_asset(request, fetch).await,
      RequestClass::Other => self.serve_other(request, fetch).await,
    }
  }

  /// Network, falling back to the precached offline document. Successful
  /// navigations are never cached so stale HTML cannot be served later.
  async fn serve_navigation<F, Fut>(&self, request: &Request, fetch: F) -> Result<Response>
  where
    F: FnOnce(&Request) -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    match fetch(request).await {
      Ok(response) => Ok(response),
      Err(err) => {
        let offline_key =
          Request::get(&self.policy.offline_document, Destination::Document).request_key();
        match self.cache.lookup(&self.generation, &offline_key)? {
          Some(document) => {
            debug!(url = %request.url, "navigation failed, serving offline document");
            Ok(document)
          }
          None => Err(eyre!(
            "Navigation to {} failed and the offline document is not precached: {}",
            request.url,
            err
          )),
        }
      }
    }
  }

  /// Network-first: 2xx responses are written through to the cache; on
  /// transport failure the cached copy is served, and with no cached copy a
  /// synthetic 503 stands in for a raw transport error.
  async fn serve_remote_data<F, Fut>(&self, request: &Request, fetch: F) -> Result<Response>
  where
    F: FnOnce(&Request) -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    let key = request.request_key();

    match fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.cache.put(&self.generation, &key, &response)?;
        }
        Ok(response)
      }
      Err(err) => {
        if let Some(cached) = self.cache.lookup(&self.generation, &key)? {
          debug!(url = %request.url, "network failed, serving cached response");
          return Ok(cached);
        }
        debug!(url = %request.url, error = %err, "network failed with nothing cached");
        Ok(Response::offline_fallback("request failed while offline"))
      }
    }
  }

  /// Cache-first: a hit skips the network entirely. A miss that also fails on
  /// the network propagates the error, since a missing bundled asset is a
  /// real bug rather than an offline condition.
  async fn serve_static_asset<F, Fut>(&self, request: &Request, fetch: F) -> Result<Response>
  where
    F: FnOnce(&Request) -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    let key = request.request_key();

    if let Some(cached) = self.cache.lookup(&self.generation, &key)? {
      return Ok(cached);
    }

    let response = fetch(request).await?;
    if response.is_success() {
      self.cache.put(&self.generation, &key, &response)?;
    }
    Ok(response)
  }

  /// Network-first with silent cache fallback and no synthetic error.
  /// Successful responses are cached so best-effort traffic (fonts,
  /// manifests) stays servable offline.
  async fn serve_other<F, Fut>(&self, request: &Request, fetch: F) -> Result<Response>
  where
    F: FnOnce(&Request) -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    let key = request.request_key();

    match fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.cache.put(&self.generation, &key, &response)?;
        }
        Ok(response)
      }
      Err(err) => match self.cache.lookup(&self.generation, &key)? {
        Some(cached) => Ok(cached),
        None => Err(err),
      },
    }
  }

  /// Fetch the fixed critical-resource set into the current generation.
  /// Any failure fails the whole install.
  pub async fn install<F, Fut>(&self, fetch: F) -> Result<usize>
  where
    F: Fn(&Request) -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    for url in &self.policy.precache_urls {
      let request = Request::get(url, Destination::Other);
      let response = fetch(&request)
        .await
        .map_err(|e| eyre!("Failed to precache {}: {}", url, e))?;

      if !response.is_success() {
        return Err(eyre!("Failed to precache {}: status {}", url, response.status));
      }

      self
        .cache
        .put(&self.generation, &request.request_key(), &response)?;
    }

    info!(
      generation = %self.generation,
      count = self.policy.precache_urls.len(),
      "precached critical resources"
    );
    Ok(self.policy.precache_urls.len())
  }

  /// Delete every superseded cache generation, keeping only the current one,
  /// and report what was swept.
  pub fn activate(&self) -> Result<Vec<String>> {
    let swept = self.cache.delete_all_except(&self.generation)?;
    if !swept.is_empty() {
      info!(current = %self.generation, ?swept, "swept superseded cache generations");
    }
    Ok(swept)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  const OFFLINE_DOC: &str = "https://app.quill.example/offline.html";

  fn policy() -> RoutePolicy {
    RoutePolicy {
      api_patterns: vec!["/api/".to_string()],
      precache_urls: vec![
        "https://app.quill.example/app.js".to_string(),
        OFFLINE_DOC.to_string(),
      ],
      offline_document: OFFLINE_DOC.to_string(),
    }
  }

  fn router() -> Router {
    Router::new(
      ResponseCache::open_in_memory().unwrap(),
      Generation::new("quillsync-v2"),
      policy(),
    )
  }

  fn response(status: u16, body: &[u8]) -> Response {
    Response {
      status,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: body.to_vec(),
    }
  }

  #[tokio::test]
  async fn test_remote_data_falls_back_to_cached_bytes() {
    let router = router();
    let request = Request::get("https://app.quill.example/api/entries", Destination::Other);
    let fresh = response(200, b"[{\"entry\":1}]");

    let served = router
      .serve(&request, |_| {
        let fresh = fresh.clone();
        async move { Ok(fresh) }
      })
      .await
      .unwrap();
    assert_eq!(served, fresh);

    // Network now fails; the cached response must come back byte-identical
    let served = router
      .serve(&request, |_| async { Err(eyre!("connection refused")) })
      .await
      .unwrap();
    assert_eq!(served, fresh);
  }

  #[tokio::test]
  async fn test_remote_data_double_miss_synthesizes_offline_503() {
    let router = router();
    let request = Request::get("https://app.quill.example/api/entries", Destination::Other);

    let served = router
      .serve(&request, |_| async { Err(eyre!("connection refused")) })
      .await
      .unwrap();

    assert_eq!(served.status, 503);
    let body: serde_json::Value = serde_json::from_slice(&served.body).unwrap();
    assert_eq!(body["error"], "Offline");
  }

  #[tokio::test]
  async fn test_remote_data_error_status_is_returned_uncached() {
    let router = router();
    let request = Request::get("https://app.quill.example/api/entries", Destination::Other);

    let served = router
      .serve(&request, |_| async { Ok(response(500, b"boom")) })
      .await
      .unwrap();
    assert_eq!(served.status, 500);

    // Nothing was cached, so a later transport failure is a double miss
    let served = router
      .serve(&request, |_| async { Err(eyre!("connection refused")) })
      .await
      .unwrap();
    assert_eq!(served.status, 503);
  }

  #[tokio::test]
  async fn test_static_asset_is_cache_first() {
    let router = router();
    let request = Request::get("https://app.quill.example/bundle.js", Destination::Script);
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
      let calls = Arc::clone(&calls);
      let served = router
        .serve(&request, move |_| async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(response(200, b"console.log(1)"))
        })
        .await
        .unwrap();
      assert_eq!(served.body, b"console.log(1)");
    }

    // First call fetched and cached; the rest never hit the network
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_static_asset_miss_with_network_failure_propagates() {
    let router = router();
    let request = Request::get("https://app.quill.example/missing.css", Destination::Style);

    let result = router
      .serve(&request, |_| async { Err(eyre!("connection refused")) })
      .await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_navigation_serves_offline_document_on_failure() {
    let router = router();
    let offline = response(200, b"<html>offline</html>");

    // Install the critical set so the offline document is cached
    let installed = router
      .install(|request| {
        let body = if request.url == OFFLINE_DOC {
          offline.clone()
        } else {
          response(200, b"asset")
        };
        async move { Ok(body) }
      })
      .await
      .unwrap();
    assert_eq!(installed, 2);

    let request = Request::get("https://app.quill.example/journal", Destination::Document);
    let served = router
      .serve(&request, |_| async { Err(eyre!("connection refused")) })
      .await
      .unwrap();

    assert_eq!(served, offline);
  }

  #[tokio::test]
  async fn test_navigation_success_is_not_cached() {
    let router = router();
    let request = Request::get("https://app.quill.example/journal", Destination::Document);

    router
      .serve(&request, |_| async { Ok(response(200, b"<html>live</html>")) })
      .await
      .unwrap();

    // With nothing precached, a failing navigation has no fallback
    let result = router
      .serve(&request, |_| async { Err(eyre!("connection refused")) })
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_install_fails_on_any_precache_failure() {
    let router = router();

    let result = router
      .install(|request| {
        let url = request.url.clone();
        async move {
          if url.ends_with("app.js") {
            Err(eyre!("connection refused"))
          } else {
            Ok(response(200, b"ok"))
          }
        }
      })
      .await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_other_class_falls_back_to_cached_bytes_silently() {
    let router = router();
    let request = Request::get("https://fonts.example/inter.woff2", Destination::Other);
    let fresh = response(200, b"font");

    let served = router
      .serve(&request, |_| {
        let fresh = fresh.clone();
        async move { Ok(fresh) }
      })
      .await
      .unwrap();
    assert_eq!(served, fresh);

    // Offline: the previously fetched copy comes back, no synthetic 503
    let served = router
      .serve(&request, |_| async { Err(eyre!("connection refused")) })
      .await
      .unwrap();
    assert_eq!(served, fresh);
  }

  #[tokio::test]
  async fn test_other_class_double_miss_propagates() {
    let router = router();
    let request = Request::get("https://fonts.example/missing.woff2", Destination::Other);

    let result = router
      .serve(&request, |_| async { Err(eyre!("connection refused")) })
      .await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_activate_sweeps_superseded_generations() {
    let cache = ResponseCache::open_in_memory().unwrap();
    let v1 = Generation::new("quillsync-v1");
    cache.put(&v1, "stale-key", &response(200, b"stale")).unwrap();

    let router = Router::new(cache, Generation::new("quillsync-v2"), policy());
    let request = Request::get("https://app.quill.example/api/entries", Destination::Other);
    router
      .serve(&request, |_| async { Ok(response(200, b"fresh")) })
      .await
      .unwrap();

    let swept = router.activate().unwrap();
    assert_eq!(swept, vec!["quillsync-v1".to_string()]);

    // Only the current generation remains queryable
    assert_eq!(
      router.cache.generations().unwrap(),
      vec!["quillsync-v2".to_string()]
    );
  }
}
