//! Network seam: the agent talks to the network through this trait so the
//! strategy engine, lifecycle manager, and retry queue can be exercised
//! against a scripted network in tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;

use crate::request::{HttpRequest, HttpResponse, Method};

#[async_trait]
pub trait Network: Send + Sync {
  /// Perform the request against the live network.
  ///
  /// Errors mean the network leg failed (unreachable, reset, DNS); an
  /// unsuccessful HTTP status is still an `Ok` response.
  async fn fetch(&self, req: &HttpRequest) -> Result<HttpResponse>;
}

/// Production implementation backed by reqwest.
#[derive(Clone, Default)]
pub struct ReqwestNetwork {
  client: reqwest::Client,
}

impl ReqwestNetwork {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Network for ReqwestNetwork {
  async fn fetch(&self, req: &HttpRequest) -> Result<HttpResponse> {
    let method = match req.method {
      Method::Get => reqwest::Method::GET,
      Method::Head => reqwest::Method::HEAD,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    };

    let mut builder = self.client.request(method, req.url.clone());
    if let Some(accept) = &req.accept {
      builder = builder.header(reqwest::header::ACCEPT, accept);
    }
    for (name, value) in &req.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &req.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", req.url, e))?;

    let status = response.status().as_u16();
    let mut headers = BTreeMap::new();
    for (name, value) in response.headers() {
      if let Ok(value) = value.to_str() {
        headers.insert(name.as_str().to_string(), value.to_string());
      }
    }

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body from {}: {}", req.url, e))?
      .to_vec();

    Ok(HttpResponse {
      status,
      headers,
      body,
    })
  }
}
