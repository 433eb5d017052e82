use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::request::RoutingRules;
use crate::strategy::Generations;

/// Agent configuration.
///
/// Generation names must be bumped whenever the critical-asset list changes,
/// to force full invalidation on the next activation.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the agent intercepts; everything else is cross-origin
  pub origin: String,
  /// Reserved path prefix for programmatic endpoints
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  #[serde(default = "default_static_generation")]
  pub static_generation: String,
  #[serde(default = "default_dynamic_generation")]
  pub dynamic_generation: String,
  /// Background-sync tag that triggers a retry-queue drain
  #[serde(default = "default_sync_tag")]
  pub sync_tag: String,
  /// Path of the cached document served when a page request fails offline
  #[serde(default = "default_offline_fallback")]
  pub offline_fallback: String,
  /// Ordered list of assets precached at install time
  #[serde(default = "default_critical_assets")]
  pub critical_assets: Vec<String>,
}

fn default_api_prefix() -> String {
  "/api".to_string()
}

fn default_static_generation() -> String {
  "static-v1".to_string()
}

fn default_dynamic_generation() -> String {
  "dynamic-v1".to_string()
}

fn default_sync_tag() -> String {
  "contact-form-sync".to_string()
}

fn default_offline_fallback() -> String {
  "/".to_string()
}

fn default_critical_assets() -> Vec<String> {
  [
    "/",
    "/index.html",
    "/styles.css",
    "/app.js",
    "/img/logo.svg",
    "/favicon.ico",
    "/manifest.json",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cachefront.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cachefront/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/cachefront/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("cachefront.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cachefront").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  pub fn routing_rules(&self) -> Result<RoutingRules> {
    Ok(RoutingRules {
      origin: self.origin_url()?,
      api_prefix: self.api_prefix.clone(),
    })
  }

  pub fn generations(&self) -> Generations {
    Generations {
      static_gen: self.static_generation.clone(),
      dynamic_gen: self.dynamic_generation.clone(),
    }
  }
}
