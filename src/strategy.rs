//! Strategy engine: picks and executes a caching strategy per intercepted
//! request.
//!
//! Strategy mapping (first match wins):
//! - static assets: cache-first against the static generation
//! - API calls: network-first against the dynamic generation
//! - HTML pages: stale-while-revalidate against the dynamic generation
//! - images: cache-first against the dynamic generation
//! - everything else: network-first

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStore};
use crate::net::Network;
use crate::request::{classify, HttpRequest, HttpResponse, RequestClass, RoutingRules};

/// Names of the two active cache generations.
#[derive(Debug, Clone)]
pub struct Generations {
  /// Static assets, populated eagerly at install time
  pub static_gen: String,
  /// Dynamic content captured at runtime (API responses, pages, images)
  pub dynamic_gen: String,
}

/// Executes caching strategies, mutating the cache store as a side effect.
///
/// Never blocks indefinitely beyond the network's own settle behavior; no
/// internal timeouts are imposed.
pub struct StrategyEngine<S, N> {
  store: Arc<S>,
  net: Arc<N>,
  rules: RoutingRules,
  generations: Generations,
  /// Path of the cached root document served as offline fallback for pages
  offline_fallback: String,
}

impl<S, N> StrategyEngine<S, N>
where
  S: CacheStore + 'static,
  N: Network + 'static,
{
  pub fn new(
    store: Arc<S>,
    net: Arc<N>,
    rules: RoutingRules,
    generations: Generations,
    offline_fallback: String,
  ) -> Self {
    Self {
      store,
      net,
      rules,
      generations,
      offline_fallback,
    }
  }

  /// Resolve an intercepted request.
  ///
  /// This is the last line of defense: strategy failures for HTML pages are
  /// converted into the offline fallback, so a page request never fails
  /// outright for the client. Non-HTML failures with no cached fallback
  /// propagate to the caller.
  pub async fn handle(&self, req: &HttpRequest) -> Result<HttpResponse> {
    let class = classify(req, &self.rules);

    match self.dispatch(req, class).await {
      Ok(resp) => Ok(resp),
      Err(err) => {
        warn!("Strategy for {} failed: {}", req.url, err);
        if class == RequestClass::HtmlPage {
          Ok(self.offline_page()?)
        } else {
          Err(err)
        }
      }
    }
  }

  async fn dispatch(&self, req: &HttpRequest, class: RequestClass) -> Result<HttpResponse> {
    match class {
      RequestClass::StaticAsset => self.cache_first(&self.generations.static_gen, req).await,
      RequestClass::Image => self.cache_first(&self.generations.dynamic_gen, req).await,
      RequestClass::HtmlPage => self.stale_while_revalidate(req).await,
      RequestClass::ApiCall | RequestClass::Other => self.network_first(req).await,
    }
  }

  /// Look up a key across the active generations, static first. Install-time
  /// precached entries must answer dynamic-strategy requests, so a read
  /// serves whichever copy exists. Returns the holding generation alongside
  /// the entry: refreshes overwrite the key where it lives, so a newer copy
  /// is never shadowed by an older one in another generation.
  fn lookup(&self, key: &str) -> Result<Option<(String, CacheEntry)>> {
    for generation in [&self.generations.static_gen, &self.generations.dynamic_gen] {
      if let Some(entry) = self.store.get(generation, key)? {
        return Ok(Some((generation.clone(), entry)));
      }
    }
    Ok(None)
  }

  /// Generation a refreshed copy should land in: wherever the key already
  /// lives, else the strategy's default.
  fn refresh_generation(&self, key: &str, default: &str) -> String {
    match self.lookup(key) {
      Ok(Some((generation, _))) => generation,
      _ => default.to_string(),
    }
  }

  /// Capture a 200 response into the cache. The response is already in
  /// hand, so a failed write is logged and never fails the request.
  fn store_copy(&self, generation: &str, req: &HttpRequest, resp: &HttpResponse) {
    if !resp.is_cacheable() {
      return;
    }
    if let Err(e) = self.store.put(generation, &CacheEntry::capture(req, resp)) {
      warn!("Cache write for {} failed: {}", req.url, e);
    }
  }

  /// Cache-first: cached entry wins; on a miss, fetch and store a 200 copy
  /// before returning it.
  async fn cache_first(&self, generation: &str, req: &HttpRequest) -> Result<HttpResponse> {
    if let Some((_, entry)) = self.lookup(&req.cache_key())? {
      debug!("cache-first hit for {}", req.url);
      return Ok(entry.into_response());
    }

    let resp = self.net.fetch(req).await?;
    self.store_copy(generation, req, &resp);
    Ok(resp)
  }

  /// Network-first: live response wins and refreshes the cache; on network
  /// failure, fall back to the most recent cached copy if one exists.
  async fn network_first(&self, req: &HttpRequest) -> Result<HttpResponse> {
    match self.net.fetch(req).await {
      Ok(resp) => {
        let target = self.refresh_generation(&req.cache_key(), &self.generations.dynamic_gen);
        self.store_copy(&target, req, &resp);
        Ok(resp)
      }
      Err(err) => match self.lookup(&req.cache_key())? {
        Some((_, entry)) => {
          debug!("network-first falling back to cache for {}", req.url);
          Ok(entry.into_response())
        }
        None => Err(err),
      },
    }
  }

  /// Stale-while-revalidate: return the cached copy immediately and refresh
  /// it in the background. The refresh result only affects future requests.
  async fn stale_while_revalidate(&self, req: &HttpRequest) -> Result<HttpResponse> {
    if let Some((generation, entry)) = self.lookup(&req.cache_key())? {
      let store = Arc::clone(&self.store);
      let net = Arc::clone(&self.net);
      let req = req.clone();

      tokio::spawn(async move {
        match net.fetch(&req).await {
          Ok(resp) if resp.is_cacheable() => {
            if let Err(e) = store.put(&generation, &CacheEntry::capture(&req, &resp)) {
              warn!("Background refresh store for {} failed: {}", req.url, e);
            }
          }
          Ok(_) => {}
          Err(e) => debug!("Background refresh for {} failed: {}", req.url, e),
        }
      });

      return Ok(entry.into_response());
    }

    // No cached copy: the in-flight fetch becomes the response
    let resp = self.net.fetch(req).await?;
    self.store_copy(&self.generations.dynamic_gen, req, &resp);
    Ok(resp)
  }

  /// Offline fallback for page requests: the previously cached root
  /// document, or a synthetic unavailable response if it was never cached.
  fn offline_page(&self) -> Result<HttpResponse> {
    let key = self.fallback_request()?.cache_key();
    match self.lookup(&key)? {
      Some((_, entry)) => Ok(entry.into_response()),
      None => Ok(HttpResponse::unavailable()),
    }
  }

  fn fallback_request(&self) -> Result<HttpRequest> {
    let url: Url = self
      .rules
      .origin
      .join(&self.offline_fallback)
      .map_err(|e| eyre!("Invalid offline fallback path: {}", e))?;
    Ok(HttpRequest::get(url))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use crate::net::fake::FakeNetwork;
  use std::time::Duration;

  fn engine(net: Arc<FakeNetwork>) -> StrategyEngine<SqliteStore, FakeNetwork> {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    engine_with_store(store, net)
  }

  fn engine_with_store(
    store: Arc<SqliteStore>,
    net: Arc<FakeNetwork>,
  ) -> StrategyEngine<SqliteStore, FakeNetwork> {
    StrategyEngine::new(
      store,
      net,
      RoutingRules {
        origin: Url::parse("https://example.org").unwrap(),
        api_prefix: "/api".to_string(),
      },
      Generations {
        static_gen: "static-v1".to_string(),
        dynamic_gen: "dynamic-v1".to_string(),
      },
      "/".to_string(),
    )
  }

  fn get(url: &str) -> HttpRequest {
    HttpRequest::get(Url::parse(url).unwrap())
  }

  /// An entry as the lifecycle manager writes it at install time.
  fn precached(url: &str, body: &[u8]) -> CacheEntry {
    let req = get(url);
    CacheEntry {
      key: req.cache_key(),
      url: url.to_string(),
      status: 200,
      headers: Default::default(),
      body: body.to_vec(),
      cached_at: chrono::Utc::now(),
    }
  }

  #[tokio::test]
  async fn cache_first_second_request_skips_network() {
    let net = Arc::new(FakeNetwork::new());
    net.respond("/app.js", 200, b"bundle");
    let engine = engine(Arc::clone(&net));

    let req = get("https://example.org/app.js");
    let first = engine.handle(&req).await.unwrap();
    assert_eq!(first.body, b"bundle");

    let second = engine.handle(&req).await.unwrap();
    assert_eq!(second.body, b"bundle");
    assert_eq!(net.hits("/app.js"), 1);
  }

  #[tokio::test]
  async fn cache_first_does_not_persist_non_200() {
    let net = Arc::new(FakeNetwork::new());
    net.respond("/missing.css", 404, b"not found");
    let engine = engine(Arc::clone(&net));

    let req = get("https://example.org/missing.css");
    let resp = engine.handle(&req).await.unwrap();
    assert_eq!(resp.status, 404);

    // A second request hits the network again: nothing was cached
    engine.handle(&req).await.unwrap();
    assert_eq!(net.hits("/missing.css"), 2);
  }

  #[tokio::test]
  async fn network_first_prefers_live_response_over_cache() {
    let net = Arc::new(FakeNetwork::new());
    net.respond("/api/data", 200, b"v1");
    let engine = engine(Arc::clone(&net));

    let req = get("https://example.org/api/data");
    engine.handle(&req).await.unwrap();

    net.respond("/api/data", 200, b"v2");
    let resp = engine.handle(&req).await.unwrap();
    assert_eq!(resp.body, b"v2");
  }

  #[tokio::test]
  async fn network_first_falls_back_to_cache_when_offline() {
    let net = Arc::new(FakeNetwork::new());
    net.respond("/api/data", 200, b"v1");
    let engine = engine(Arc::clone(&net));

    let req = get("https://example.org/api/data");
    engine.handle(&req).await.unwrap();

    net.fail("/api/data");
    let resp = engine.handle(&req).await.unwrap();
    assert_eq!(resp.body, b"v1");
  }

  #[tokio::test]
  async fn network_first_propagates_failure_without_cache() {
    let net = Arc::new(FakeNetwork::new());
    net.fail("/api/data");
    let engine = engine(net);

    let req = get("https://example.org/api/data");
    assert!(engine.handle(&req).await.is_err());
  }

  #[tokio::test]
  async fn swr_returns_cached_then_refreshes_in_background() {
    let net = Arc::new(FakeNetwork::new());
    net.respond("/about", 200, b"old page");
    let engine = engine(Arc::clone(&net));

    let req = get("https://example.org/about").with_accept("text/html");
    engine.handle(&req).await.unwrap();

    net.respond("/about", 200, b"new page");
    let resp = engine.handle(&req).await.unwrap();
    // Stale copy served immediately, not the refreshed one
    assert_eq!(resp.body, b"old page");

    // Wait for the background refresh to settle
    tokio::time::sleep(Duration::from_millis(20)).await;

    let resp = engine.handle(&req).await.unwrap();
    assert_eq!(resp.body, b"new page");
  }

  #[tokio::test]
  async fn swr_uses_network_when_nothing_cached() {
    let net = Arc::new(FakeNetwork::new());
    net.respond("/about", 200, b"page");
    let engine = engine(Arc::clone(&net));

    let req = get("https://example.org/about").with_accept("text/html");
    let resp = engine.handle(&req).await.unwrap();
    assert_eq!(resp.body, b"page");
    assert_eq!(net.hits("/about"), 1);
  }

  #[tokio::test]
  async fn swr_refresh_replaces_a_precached_copy() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store
      .put("static-v1", &precached("https://example.org/", b"install copy"))
      .unwrap();
    let net = Arc::new(FakeNetwork::new());
    net.respond("/", 200, b"refreshed copy");
    let engine = engine_with_store(Arc::clone(&store), Arc::clone(&net));

    let req = get("https://example.org/").with_accept("text/html");
    let first = engine.handle(&req).await.unwrap();
    assert_eq!(first.body, b"install copy");

    // Background refresh settles; the install copy must not shadow it
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(net.hits("/"), 1);

    let second = engine.handle(&req).await.unwrap();
    assert_eq!(second.body, b"refreshed copy");
  }

  #[tokio::test]
  async fn network_first_refresh_replaces_a_precached_copy() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store
      .put("static-v1", &precached("https://example.org/data", b"install copy"))
      .unwrap();
    let net = Arc::new(FakeNetwork::new());
    net.respond("/data", 200, b"fresh");
    let engine = engine_with_store(Arc::clone(&store), Arc::clone(&net));

    let req = get("https://example.org/data");
    engine.handle(&req).await.unwrap();

    // Offline fallback serves the refreshed copy, not the install one
    net.fail("/data");
    let resp = engine.handle(&req).await.unwrap();
    assert_eq!(resp.body, b"fresh");
  }

  /// Store whose writes always fail; reads delegate to a real store.
  struct ReadOnlyStore(SqliteStore);

  impl CacheStore for ReadOnlyStore {
    fn get(&self, generation: &str, key: &str) -> Result<Option<CacheEntry>> {
      self.0.get(generation, key)
    }

    fn put(&self, _generation: &str, _entry: &CacheEntry) -> Result<()> {
      Err(eyre!("disk full"))
    }

    fn delete_generation(&self, name: &str) -> Result<()> {
      self.0.delete_generation(name)
    }

    fn list_generations(&self) -> Result<std::collections::BTreeSet<String>> {
      self.0.list_generations()
    }
  }

  #[tokio::test]
  async fn failed_cache_write_does_not_fail_the_request() {
    let store = Arc::new(ReadOnlyStore(SqliteStore::open_in_memory().unwrap()));
    let net = Arc::new(FakeNetwork::new());
    net.respond("/api/data", 200, b"fresh");
    let engine = StrategyEngine::new(
      store,
      Arc::clone(&net),
      RoutingRules {
        origin: Url::parse("https://example.org").unwrap(),
        api_prefix: "/api".to_string(),
      },
      Generations {
        static_gen: "static-v1".to_string(),
        dynamic_gen: "dynamic-v1".to_string(),
      },
      "/".to_string(),
    );

    // The live response is already in hand; a failed write must not eat it
    let resp = engine
      .handle(&get("https://example.org/api/data"))
      .await
      .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, b"fresh");
  }

  #[tokio::test]
  async fn failed_page_request_serves_cached_root_document() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let net = Arc::new(FakeNetwork::new());
    net.respond("/", 200, b"<html>root</html>");
    let engine = engine_with_store(Arc::clone(&store), Arc::clone(&net));

    // Populate the root document, then take the network down
    let root = get("https://example.org/").with_accept("text/html");
    engine.handle(&root).await.unwrap();
    net.fail("/contact");

    let req = get("https://example.org/contact").with_accept("text/html");
    let resp = engine.handle(&req).await.unwrap();
    assert_eq!(resp.body, b"<html>root</html>");
  }

  #[tokio::test]
  async fn failed_page_request_without_cached_root_gets_unavailable() {
    let net = Arc::new(FakeNetwork::new());
    net.fail("/contact");
    let engine = engine(net);

    let req = get("https://example.org/contact").with_accept("text/html");
    let resp = engine.handle(&req).await.unwrap();
    assert_eq!(resp.status, 503);
  }
}
