//! Request/response model and per-request classification.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

/// HTTP methods the agent distinguishes.
///
/// Safe (read-only) methods are eligible for caching; everything else
/// bypasses the cache and goes straight to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  /// Whether this method is a safe read (cacheable).
  pub fn is_safe(&self) -> bool {
    matches!(self, Method::Get | Method::Head)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

/// An intercepted outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  pub url: Url,
  /// Accept header, used for content negotiation during classification
  pub accept: Option<String>,
  /// Remaining request headers, carried to the network and preserved when a
  /// failed mutation is queued for replay
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
}

impl HttpRequest {
  /// Build a GET request for the given URL.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      accept: None,
      headers: BTreeMap::new(),
      body: None,
    }
  }

  /// Set the accept header.
  pub fn with_accept(mut self, accept: &str) -> Self {
    self.accept = Some(accept.to_string());
    self
  }

  /// Normalized request identity used as the cache key.
  ///
  /// Hashes "METHOD url" (fragment stripped) so keys are stable and
  /// fixed-length regardless of URL size.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);

    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Whether the request targets a network scheme the agent intercepts.
  pub fn is_network_scheme(&self) -> bool {
    matches!(self.url.scheme(), "http" | "https")
  }
}

/// A response, either captured from the network or replayed from cache.
#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl HttpResponse {
  /// Only status-200 responses are ever persisted.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }

  /// Synthetic service-unavailable response, served when no fallback exists.
  pub fn unavailable() -> Self {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "text/plain".to_string());
    Self {
      status: 503,
      headers,
      body: b"Service unavailable".to_vec(),
    }
  }
}

/// Request classes the strategy engine dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  StaticAsset,
  ApiCall,
  HtmlPage,
  Image,
  Other,
}

/// Rules consulted during classification: the client origin and the path
/// prefix reserved for programmatic endpoints.
#[derive(Debug, Clone)]
pub struct RoutingRules {
  pub origin: Url,
  pub api_prefix: String,
}

const STATIC_EXTENSIONS: &[&str] = &["css", "js", "mjs", "woff", "woff2", "ttf", "otf"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"];

/// Classify a request. Pure function of the request target; first match wins.
pub fn classify(req: &HttpRequest, rules: &RoutingRules) -> RequestClass {
  let extension = path_extension(req.url.path());

  if extension
    .as_deref()
    .is_some_and(|ext| STATIC_EXTENSIONS.contains(&ext))
  {
    return RequestClass::StaticAsset;
  }

  let cross_origin = req.url.origin() != rules.origin.origin();
  if req.url.path().starts_with(&rules.api_prefix) || cross_origin {
    return RequestClass::ApiCall;
  }

  let accept = req.accept.as_deref().unwrap_or("");
  if accept.contains("text/html") {
    return RequestClass::HtmlPage;
  }

  if accept.contains("image/")
    || extension
      .as_deref()
      .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext))
  {
    return RequestClass::Image;
  }

  RequestClass::Other
}

/// Lowercased file extension of a URL path, if any.
fn path_extension(path: &str) -> Option<String> {
  let file = path.rsplit('/').next()?;
  let (_, ext) = file.rsplit_once('.')?;
  if ext.is_empty() {
    None
  } else {
    Some(ext.to_ascii_lowercase())
  }
}
