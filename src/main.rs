mod agent;
mod cache;
mod config;
mod lifecycle;
mod net;
mod notify;
mod queue;
mod request;
mod strategy;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::agent::Agent;
use crate::cache::{CacheStore, SqliteStore};
use crate::net::ReqwestNetwork;
use crate::notify::LogShell;
use crate::queue::RetryQueue;
use crate::request::HttpRequest;

#[derive(Parser, Debug)]
#[command(name = "cachefront")]
#[command(about = "Client-side intercepting cache agent with offline support")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cachefront/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the critical-asset list and activate the agent
  Install,
  /// List cache generations and queued submissions
  Status,
  /// Replay queued submissions
  Drain,
  /// Resolve a URL through the agent's caching strategies
  Fetch {
    url: String,
    /// Accept header sent with the request
    #[arg(long)]
    accept: Option<String>,
  },
  /// Deliver a push payload (JSON {"title", "body", "url"}) to the dispatcher
  Push { payload: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  match args.command {
    Command::Status => {
      let store = SqliteStore::open()?;
      for name in store.list_generations()? {
        println!("generation {}", name);
      }
      let queue = RetryQueue::open()?;
      for submission in queue.pending()? {
        println!(
          "queued {} {} {} (since {})",
          submission.id, submission.method, submission.url, submission.queued_at
        );
      }
    }
    Command::Install => {
      let agent = build_agent(&config)?;
      agent.install().await?;
      agent.activate().await?;
      println!("agent state: {:?}", agent.state());
    }
    Command::Drain => {
      let agent = build_agent(&config)?;
      for outcome in agent.sync(&config.sync_tag).await {
        println!(
          "{} {} {}",
          outcome.id,
          outcome.url,
          if outcome.replayed { "replayed" } else { "still queued" }
        );
      }
    }
    Command::Fetch { url, accept } => {
      let agent = build_agent(&config)?;
      let mut req = HttpRequest::get(Url::parse(&url)?);
      if let Some(accept) = accept {
        req = req.with_accept(&accept);
      }
      let resp = agent.handle(&req).await?;
      eprintln!("status: {}", resp.status);
      std::io::stdout().write_all(&resp.body)?;
    }
    Command::Push { payload } => {
      let agent = build_agent(&config)?;
      if let Some(parsed) = agent.push(payload.as_bytes()) {
        agent.notification_clicked(&parsed);
      }
    }
  }

  Ok(())
}

fn build_agent(config: &config::Config) -> Result<Agent<SqliteStore, ReqwestNetwork, LogShell>> {
  Agent::new(
    config,
    SqliteStore::open()?,
    RetryQueue::open()?,
    ReqwestNetwork::new(),
    LogShell,
  )
}
