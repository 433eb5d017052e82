//! Core types and storage trait for the generational cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::request::{HttpRequest, HttpResponse};

/// A captured response, addressed by normalized request identity.
///
/// Entries are immutable once written: a refresh replaces the whole entry,
/// never patches it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
  /// Normalized request identity (see `HttpRequest::cache_key`)
  pub key: String,
  /// Original request URL, kept for inspection
  pub url: String,
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Capture a response for a request. Callers only capture status-200
  /// responses; see `HttpResponse::is_cacheable`.
  pub fn capture(req: &HttpRequest, resp: &HttpResponse) -> Self {
    Self {
      key: req.cache_key(),
      url: req.url.to_string(),
      status: resp.status,
      headers: resp.headers.clone(),
      body: resp.body.clone(),
      cached_at: Utc::now(),
    }
  }

  /// Replay the entry as a response.
  pub fn into_response(self) -> HttpResponse {
    HttpResponse {
      status: self.status,
      headers: self.headers,
      body: self.body,
    }
  }
}

/// Trait for cache store backends.
///
/// Generations are named partitions replaced wholesale on deployment; there
/// is no key-level eviction beyond whole-generation deletion.
pub trait CacheStore: Send + Sync {
  /// Look up an entry by generation and key.
  fn get(&self, generation: &str, key: &str) -> Result<Option<CacheEntry>>;

  /// Store an entry. Idempotent: writing the same key twice replaces the
  /// prior value.
  fn put(&self, generation: &str, entry: &CacheEntry) -> Result<()>;

  /// Delete a whole generation and every entry in it.
  fn delete_generation(&self, name: &str) -> Result<()>;

  /// Names of all generations currently holding entries.
  fn list_generations(&self) -> Result<BTreeSet<String>>;
}
