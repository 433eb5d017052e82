//! Durable retry queue for mutating requests that failed to reach the
//! network. Submissions survive process restarts and are replayed in
//! insertion order when a reconnectivity signal arrives.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{error, info, warn};
use url::Url;

use crate::net::Network;
use crate::request::{HttpRequest, Method};

/// One mutating request waiting to be replayed.
///
/// Created when a mutating request fails while offline; removed only after
/// a confirmed successful replay, never partially replayed.
#[derive(Debug, Clone)]
pub struct PendingSubmission {
  pub id: i64,
  pub method: String,
  pub url: String,
  /// Original request headers, replayed verbatim
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
  pub queued_at: DateTime<Utc>,
}

/// Outcome of one replay attempt during a drain.
#[derive(Debug, Clone)]
pub struct DrainOutcome {
  pub id: i64,
  pub url: String,
  pub replayed: bool,
}

/// SQLite-backed retry queue. Rowid order is insertion order.
pub struct RetryQueue {
  conn: Mutex<Connection>,
}

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_submissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers BLOB NOT NULL,
    body BLOB,
    queued_at TEXT NOT NULL
);
"#;

impl RetryQueue {
  /// Open the queue at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  /// In-memory queue, used in tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("cachefront").join("queue.db"))
  }

  /// Persist a failed mutating request for later replay.
  pub fn enqueue(&self, req: &HttpRequest) -> Result<i64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers =
      serde_json::to_vec(&req.headers).map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_submissions (method, url, headers, body, queued_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          req.method.as_str(),
          req.url.to_string(),
          headers,
          req.body,
          Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue submission: {}", e))?;

    let id = conn.last_insert_rowid();
    info!("Queued submission {} for {}", id, req.url);
    Ok(id)
  }

  /// Submissions currently queued, in insertion order.
  pub fn pending(&self) -> Result<Vec<PendingSubmission>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, method, url, headers, body, queued_at FROM pending_submissions ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare pending query: {}", e))?;

    let submissions = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, Vec<u8>>(3)?,
          row.get::<_, Option<Vec<u8>>>(4)?,
          row.get::<_, String>(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query submissions: {}", e))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| eyre!("Failed to read submission row: {}", e))?;

    submissions
      .into_iter()
      .map(|(id, method, url, headers, body, queued_at)| {
        Ok(PendingSubmission {
          id,
          method,
          url,
          headers: serde_json::from_slice(&headers)
            .map_err(|e| eyre!("Failed to parse queued headers: {}", e))?,
          body,
          queued_at: chrono::NaiveDateTime::parse_from_str(&queued_at, "%Y-%m-%d %H:%M:%S")
            .map(|dt| dt.and_utc())
            .map_err(|e| eyre!("Failed to parse queued_at '{}': {}", queued_at, e))?,
        })
      })
      .collect()
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.pending()?.is_empty())
  }

  fn remove(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM pending_submissions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove submission {}: {}", id, e))?;

    Ok(())
  }

  /// Replay every queued submission in insertion order.
  ///
  /// Best-effort, independent-item semantics: a submission is removed only
  /// on a confirmed network acknowledgment; a failure leaves it queued and
  /// does not block later submissions. Never returns an error; per-item and
  /// storage failures are logged and swallowed.
  pub async fn drain<N: Network>(&self, net: &N) -> Vec<DrainOutcome> {
    let pending = match self.pending() {
      Ok(pending) => pending,
      Err(e) => {
        error!("Failed to read retry queue: {}", e);
        return Vec::new();
      }
    };

    let mut outcomes = Vec::with_capacity(pending.len());
    for submission in pending {
      let replayed = match self.replay(net, &submission).await {
        Ok(()) => match self.remove(submission.id) {
          Ok(()) => {
            info!("Replayed submission {} to {}", submission.id, submission.url);
            true
          }
          Err(e) => {
            error!("Failed to remove replayed submission {}: {}", submission.id, e);
            false
          }
        },
        Err(e) => {
          warn!(
            "Replay of submission {} failed, leaving it queued: {}",
            submission.id, e
          );
          false
        }
      };

      outcomes.push(DrainOutcome {
        id: submission.id,
        url: submission.url,
        replayed,
      });
    }

    outcomes
  }

  async fn replay<N: Network>(&self, net: &N, submission: &PendingSubmission) -> Result<()> {
    let method = match submission.method.as_str() {
      "POST" => Method::Post,
      "PUT" => Method::Put,
      "PATCH" => Method::Patch,
      "DELETE" => Method::Delete,
      other => return Err(eyre!("Unexpected queued method {}", other)),
    };

    let req = HttpRequest {
      method,
      url: Url::parse(&submission.url)
        .map_err(|e| eyre!("Invalid queued URL {}: {}", submission.url, e))?,
      accept: None,
      headers: submission.headers.clone(),
      body: submission.body.clone(),
    };

    // Any settled response counts as a network acknowledgment
    net.fetch(&req).await?;
    Ok(())
  }
}
