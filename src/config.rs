use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  /// Days a synced outbox record survives before the retention sweep purges it
  #[serde(default = "default_retention_days")]
  pub retention_days: i64,
}

fn default_retention_days() -> i64 {
  7
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Backend base URL, e.g. "https://api.quill.example"
  pub base_url: String,
  /// Journal-entry creation endpoint, relative to base_url
  #[serde(default = "default_journal_endpoint")]
  pub journal_endpoint: String,
  /// Habit-completion endpoint, relative to base_url
  #[serde(default = "default_habit_endpoint")]
  pub habit_endpoint: String,
  /// Session collection endpoint, relative to base_url
  #[serde(default = "default_session_endpoint")]
  pub session_endpoint: String,
  /// Path prefixes or hosts that classify a request as backend data
  #[serde(default = "default_api_patterns")]
  pub patterns: Vec<String>,
}

fn default_journal_endpoint() -> String {
  "/api/journal/entries".to_string()
}

fn default_habit_endpoint() -> String {
  "/api/habits/completions".to_string()
}

fn default_session_endpoint() -> String {
  "/api/sessions".to_string()
}

fn default_api_patterns() -> Vec<String> {
  vec!["/api/".to_string()]
}

impl ApiConfig {
  /// Absolute URL for an endpoint path.
  pub fn endpoint_url(&self, endpoint: &str) -> String {
    format!("{}{}", self.base_url.trim_end_matches('/'), endpoint)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// App origin serving the UI and its static assets,
  /// e.g. "https://app.quill.example"
  pub origin: String,
  /// Version string naming the current cache generation; bumping it makes
  /// every previously cached response garbage at the next activation.
  pub version: String,
  /// Critical resources precached at install time, as origin-relative paths
  #[serde(default)]
  pub precache: Vec<String>,
  /// Document served when a navigation fails offline
  #[serde(default = "default_offline_document")]
  pub offline_document: String,
}

fn default_offline_document() -> String {
  "/offline.html".to_string()
}

impl CacheConfig {
  /// Name of the current cache generation.
  pub fn generation_name(&self) -> String {
    format!("quillsync-{}", self.version)
  }

  /// Absolute URL for an origin-relative resource path.
  pub fn resource_url(&self, path: &str) -> String {
    format!("{}{}", self.origin.trim_end_matches('/'), path)
  }

  /// Precache list as absolute URLs, always including the offline document.
  pub fn precache_urls(&self) -> Vec<String> {
    let mut urls: Vec<String> = self.precache.iter().map(|p| self.resource_url(p)).collect();
    let offline = self.resource_url(&self.offline_document);
    if !urls.contains(&offline) {
      urls.push(offline);
    }
    urls
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database path (default: data dir + quillsync/offline.db)
  pub path: Option<PathBuf>,
}

impl StorageConfig {
  /// Resolve the database path, falling back to the platform data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(p) = &self.path {
      return Ok(p.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("quillsync").join("offline.db"))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./quillsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/quillsync/config.yaml
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
        "No configuration file found. Create one at ~/.config/quillsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("quillsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("quillsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }
}
