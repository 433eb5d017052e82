//! Agent facade: the intercept boundary tying together the strategy engine,
//! lifecycle manager, retry queue, and notification dispatcher.
//!
//! One agent instance is constructed fresh per install/activate cycle; the
//! cache store and retry queue are the only state shared across generations.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::lifecycle::{AgentState, LifecycleManager};
use crate::net::Network;
use crate::notify::{ClientShell, NotificationDispatcher, PushPayload};
use crate::queue::{DrainOutcome, RetryQueue};
use crate::request::{HttpRequest, HttpResponse};
use crate::strategy::StrategyEngine;

pub struct Agent<S, N, C> {
  state: Mutex<AgentState>,
  engine: StrategyEngine<S, N>,
  lifecycle: LifecycleManager<S, N>,
  queue: RetryQueue,
  dispatcher: NotificationDispatcher<C>,
  net: Arc<N>,
  sync_tag: String,
}

impl<S, N, C> Agent<S, N, C>
where
  S: CacheStore + 'static,
  N: Network + 'static,
  C: ClientShell,
{
  pub fn new(config: &Config, store: S, queue: RetryQueue, net: N, shell: C) -> Result<Self> {
    let store = Arc::new(store);
    let net = Arc::new(net);
    let rules = config.routing_rules()?;
    let generations = config.generations();

    let engine = StrategyEngine::new(
      Arc::clone(&store),
      Arc::clone(&net),
      rules,
      generations.clone(),
      config.offline_fallback.clone(),
    );
    let lifecycle = LifecycleManager::new(
      Arc::clone(&store),
      Arc::clone(&net),
      config.origin_url()?,
      config.critical_assets.clone(),
      generations,
    );
    let dispatcher = NotificationDispatcher::new(Arc::new(shell), config.offline_fallback.clone());

    Ok(Self {
      state: Mutex::new(AgentState::Installing),
      engine,
      lifecycle,
      queue,
      dispatcher,
      net,
      sync_tag: config.sync_tag.clone(),
    })
  }

  pub fn state(&self) -> AgentState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_state(&self, state: AgentState) {
    *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
  }

  /// Precache the critical-asset list. A failure aborts the install: the
  /// agent never activates and the prior generation stays in control.
  pub async fn install(&self) -> Result<()> {
    self.lifecycle.install().await
  }

  /// Take over from the previous agent generation, pruning every cache
  /// generation outside the current allow-list.
  pub async fn activate(&self) -> Result<()> {
    self.lifecycle.activate().await?;
    self.set_state(AgentState::Active);
    info!("Agent activated");
    Ok(())
  }

  /// Intercept one outbound request.
  ///
  /// Non-network schemes pass straight through. Mutating requests bypass
  /// caching entirely; if the network is unreachable they are queued for
  /// replay and answered with a synthetic unavailable response. Safe reads
  /// go through the strategy engine.
  pub async fn handle(&self, req: &HttpRequest) -> Result<HttpResponse> {
    if !req.is_network_scheme() {
      debug!("Passing through non-network scheme {}", req.url.scheme());
      return self.net.fetch(req).await;
    }

    if !req.method.is_safe() {
      return match self.net.fetch(req).await {
        Ok(resp) => Ok(resp),
        Err(err) => {
          warn!("Mutating request to {} failed, queueing: {}", req.url, err);
          self
            .queue
            .enqueue(req)
            .map_err(|e| eyre!("Failed to queue submission for {}: {}", req.url, e))?;
          Ok(HttpResponse::unavailable())
        }
      };
    }

    self.engine.handle(req).await
  }

  /// React to a reconnectivity signal. Only the configured sync tag drains
  /// the retry queue.
  pub async fn sync(&self, tag: &str) -> Vec<DrainOutcome> {
    if tag != self.sync_tag {
      debug!("Ignoring sync tag {}", tag);
      return Vec::new();
    }
    self.queue.drain(self.net.as_ref()).await
  }

  /// Inbound push event.
  pub fn push(&self, raw: &[u8]) -> Option<PushPayload> {
    self.dispatcher.push_received(raw)
  }

  /// The user activated a shown notification.
  pub fn notification_clicked(&self, payload: &PushPayload) {
    self.dispatcher.notification_clicked(payload);
  }

  pub fn queue(&self) -> &RetryQueue {
    &self.queue
  }
}
