//! Notification dispatcher for server-pushed events.
//!
//! Best-effort by design: a push that cannot be parsed or shown is logged
//! and dropped, never retried or queued.

use color_eyre::Result;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Wire shape of an inbound push event.
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
  pub title: String,
  pub body: String,
  /// Target opened when the user activates the notification
  #[serde(default)]
  pub url: Option<String>,
}

/// Seam to the client shell: showing notifications and opening windows.
pub trait ClientShell: Send + Sync {
  fn show_notification(&self, payload: &PushPayload) -> Result<()>;

  /// Open or focus a client window at the given URL.
  fn open_window(&self, url: &str) -> Result<()>;
}

/// Shell implementation that surfaces notifications through the log. Used
/// by the CLI harness, where there is no windowing client to talk to.
pub struct LogShell;

impl ClientShell for LogShell {
  fn show_notification(&self, payload: &PushPayload) -> Result<()> {
    info!("Notification: {}: {}", payload.title, payload.body);
    Ok(())
  }

  fn open_window(&self, url: &str) -> Result<()> {
    info!("Open window at {}", url);
    Ok(())
  }
}

pub struct NotificationDispatcher<C> {
  shell: Arc<C>,
  /// Fallback target when a push carries no URL
  default_url: String,
}

impl<C: ClientShell> NotificationDispatcher<C> {
  pub fn new(shell: Arc<C>, default_url: String) -> Self {
    Self { shell, default_url }
  }

  /// Handle an inbound push event. Returns the parsed payload so the caller
  /// can hold on to it for a later activation.
  pub fn push_received(&self, raw: &[u8]) -> Option<PushPayload> {
    let payload: PushPayload = match serde_json::from_slice(raw) {
      Ok(payload) => payload,
      Err(e) => {
        debug!("Dropping malformed push payload: {}", e);
        return None;
      }
    };

    if let Err(e) = self.shell.show_notification(&payload) {
      debug!("Dropping undeliverable notification '{}': {}", payload.title, e);
      return None;
    }

    Some(payload)
  }

  /// The user activated a previously shown notification.
  pub fn notification_clicked(&self, payload: &PushPayload) {
    let url = payload.url.as_deref().unwrap_or(&self.default_url);
    if let Err(e) = self.shell.open_window(url) {
      debug!("Failed to open window at {}: {}", url, e);
    }
  }
}
