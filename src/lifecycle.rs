//! Install/activate lifecycle and generational cleanup.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStore};
use crate::net::Network;
use crate::request::HttpRequest;
use crate::strategy::Generations;

/// Lifecycle state of one agent generation.
///
/// Superseded is implicit: a later install cycle constructs a fresh agent
/// which repeats install/activate and retires this one. The only persistent
/// cleanup is deletion of stale cache generations on activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
  Installing,
  Active,
}

/// Governs eager precaching at install time and generation cleanup at
/// activation.
pub struct LifecycleManager<S, N> {
  store: Arc<S>,
  net: Arc<N>,
  origin: Url,
  critical_assets: Vec<String>,
  generations: Generations,
}

impl<S, N> LifecycleManager<S, N>
where
  S: CacheStore,
  N: Network,
{
  pub fn new(
    store: Arc<S>,
    net: Arc<N>,
    origin: Url,
    critical_assets: Vec<String>,
    generations: Generations,
  ) -> Self {
    Self {
      store,
      net,
      origin,
      critical_assets,
      generations,
    }
  }

  /// Eagerly populate the static generation with the critical-asset list.
  ///
  /// All-or-nothing: every asset is fetched first and must return 200;
  /// a single failure aborts the install with nothing written, so a failed
  /// install leaves the cache exactly as it was.
  pub async fn install(&self) -> Result<()> {
    let requests: Vec<HttpRequest> = self
      .critical_assets
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map(HttpRequest::get)
          .map_err(|e| eyre!("Invalid critical asset path {}: {}", path, e))
      })
      .collect::<Result<_>>()?;

    let fetches = requests.iter().map(|req| self.net.fetch(req));
    let responses = futures::future::join_all(fetches).await;

    let mut captured = Vec::with_capacity(requests.len());
    for (req, result) in requests.iter().zip(responses) {
      let resp = result.map_err(|e| eyre!("Install fetch for {} failed: {}", req.url, e))?;
      if !resp.is_cacheable() {
        return Err(eyre!(
          "Install fetch for {} returned status {}",
          req.url,
          resp.status
        ));
      }
      captured.push(CacheEntry::capture(req, &resp));
    }

    for entry in &captured {
      self.store.put(&self.generations.static_gen, entry)?;
    }

    info!(
      "Installed {} critical assets into {}",
      captured.len(),
      self.generations.static_gen
    );
    Ok(())
  }

  /// Take over: delete every generation that is not exactly the current
  /// static or dynamic generation name. Exact allow-list comparison, never
  /// a substring heuristic.
  pub async fn activate(&self) -> Result<()> {
    let keep = [
      self.generations.static_gen.as_str(),
      self.generations.dynamic_gen.as_str(),
    ];

    for name in self.store.list_generations()? {
      if !keep.contains(&name.as_str()) {
        match self.store.delete_generation(&name) {
          Ok(()) => info!("Deleted stale cache generation {}", name),
          Err(e) => warn!("Failed to delete generation {}: {}", name, e),
        }
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use crate::net::fake::FakeNetwork;
  use chrono::Utc;

  fn manager(
    store: Arc<SqliteStore>,
    net: Arc<FakeNetwork>,
    assets: &[&str],
  ) -> LifecycleManager<SqliteStore, FakeNetwork> {
    LifecycleManager::new(
      store,
      net,
      Url::parse("https://example.org").unwrap(),
      assets.iter().map(|s| s.to_string()).collect(),
      Generations {
        static_gen: "static-v1".to_string(),
        dynamic_gen: "dynamic-v1".to_string(),
      },
    )
  }

  fn seed(store: &SqliteStore, generation: &str) {
    let req = HttpRequest::get(Url::parse("https://example.org/seed").unwrap());
    let entry = CacheEntry {
      key: req.cache_key(),
      url: req.url.to_string(),
      status: 200,
      headers: Default::default(),
      body: b"seed".to_vec(),
      cached_at: Utc::now(),
    };
    store.put(generation, &entry).unwrap();
  }

  #[tokio::test]
  async fn install_populates_static_generation() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let net = Arc::new(FakeNetwork::new());
    net.respond("/", 200, b"root");
    net.respond("/index.html", 200, b"index");

    manager(Arc::clone(&store), net, &["/", "/index.html"])
      .install()
      .await
      .unwrap();

    let root = HttpRequest::get(Url::parse("https://example.org/").unwrap());
    assert!(store.get("static-v1", &root.cache_key()).unwrap().is_some());
    let index = HttpRequest::get(Url::parse("https://example.org/index.html").unwrap());
    assert!(store.get("static-v1", &index.cache_key()).unwrap().is_some());
  }

  #[tokio::test]
  async fn install_aborts_wholesale_on_any_failure() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let net = Arc::new(FakeNetwork::new());
    net.respond("/", 200, b"root");
    net.fail("/index.html");

    let result = manager(Arc::clone(&store), net, &["/", "/index.html"])
      .install()
      .await;

    assert!(result.is_err());
    assert!(store.list_generations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn install_treats_non_200_as_failure() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let net = Arc::new(FakeNetwork::new());
    net.respond("/", 404, b"gone");

    let result = manager(Arc::clone(&store), net, &["/"]).install().await;

    assert!(result.is_err());
    assert!(store.list_generations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn activate_deletes_everything_outside_the_allow_list() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    seed(&store, "static-v0");
    seed(&store, "dynamic-v0");
    seed(&store, "static-v1");
    seed(&store, "dynamic-v1");
    // Exact-match policy: a name containing the current one still goes
    seed(&store, "static-v1-old");

    let net = Arc::new(FakeNetwork::new());
    manager(Arc::clone(&store), net, &[]).activate().await.unwrap();

    let names = store.list_generations().unwrap();
    assert_eq!(
      names.into_iter().collect::<Vec<_>>(),
      vec!["dynamic-v1".to_string(), "static-v1".to_string()]
    );
  }
}
