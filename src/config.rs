use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Generation used when the config does not name one.
pub const DEFAULT_GENERATION: &str = "sina-shop-cache-v1";

/// Application shell resources seeded on install unless overridden.
const DEFAULT_SEED: &[&str] = &[
  "/",
  "/index.html",
  "/main.dart.js",
  "/flutter_service_worker.js",
  "/manifest.json",
  "/favicon.png",
  "/icons/Icon-192.png",
  "/icons/Icon-512.png",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin that relative locators resolve against (e.g. "https://shop.example.com")
  pub origin: String,
  /// Cache generation identifier; names the current bucket
  #[serde(default = "default_generation")]
  pub generation: String,
  /// Locators stored on install, in order
  #[serde(default = "default_seed")]
  pub seed: Vec<String>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

fn default_generation() -> String {
  DEFAULT_GENERATION.to_string()
}

fn default_seed() -> Vec<String> {
  DEFAULT_SEED.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
  /// Persistent SQLite database
  #[default]
  Sqlite,
  /// Process memory; everything is lost on exit
  Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub backend: Backend,
  /// Database file (defaults to $XDG_DATA_HOME/offline-cache/cache.db)
  pub path: Option<PathBuf>,
  /// Maximum age of cache-first entries in seconds. Unset means entries
  /// never expire and only generation changes replace them.
  pub max_age_secs: Option<u64>,
}

impl CacheConfig {
  pub fn max_age(&self) -> Option<Duration> {
    self
      .max_age_secs
      .and_then(|secs| i64::try_from(secs).ok())
      .and_then(Duration::try_seconds)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// EnvFilter directive, overridden by RUST_LOG
  #[serde(default = "default_log_filter")]
  pub filter: String,
  /// Directory for daily rolling log files; stderr only when unset
  pub dir: Option<PathBuf>,
}

fn default_log_filter() -> String {
  "info".to_string()
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      filter: default_log_filter(),
      dir: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-cache/config.yaml
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
        "No configuration file found. Create one at ~/.config/offline-cache/config.yaml \
         (see config.example.yaml for the format)"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// Parse and validate YAML configuration.
  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.origin.trim().is_empty() {
      return Err(eyre!("origin must not be empty"));
    }
    if self.generation.trim().is_empty() {
      return Err(eyre!("generation must not be empty"));
    }
    Ok(())
  }

  /// Database path for the SQLite backend.
  pub fn cache_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(path) => Ok(path.clone()),
      None => Ok(crate::cache::SqliteStore::default_path()?),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("origin: https://shop.test\n").unwrap();

    assert_eq!(config.origin, "https://shop.test");
    assert_eq!(config.generation, DEFAULT_GENERATION);
    assert_eq!(config.seed.len(), DEFAULT_SEED.len());
    assert_eq!(config.seed[0], "/");
    assert_eq!(config.cache.backend, Backend::Sqlite);
    assert!(config.cache.max_age().is_none());
    assert_eq!(config.log.filter, "info");
    assert!(config.log.dir.is_none());
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
origin: https://shop.test
generation: sina-shop-cache-v2
seed:
  - /
  - /index.html
cache:
  backend: memory
  path: /tmp/cache.db
  max_age_secs: 86400
log:
  filter: offline_cache=debug
  dir: /var/log/offline-cache
"#;
    let config = Config::parse(yaml).unwrap();

    assert_eq!(config.generation, "sina-shop-cache-v2");
    assert_eq!(config.seed, vec!["/".to_string(), "/index.html".to_string()]);
    assert_eq!(config.cache.backend, Backend::Memory);
    assert_eq!(config.cache_path().unwrap(), PathBuf::from("/tmp/cache.db"));
    assert_eq!(config.cache.max_age(), Some(Duration::hours(24)));
    assert_eq!(config.log.filter, "offline_cache=debug");
  }

  #[test]
  fn test_missing_origin_is_error() {
    assert!(Config::parse("generation: v1\n").is_err());
    assert!(Config::parse("origin: ''\n").is_err());
  }

  #[test]
  fn test_empty_generation_is_error() {
    assert!(Config::parse("origin: https://shop.test\ngeneration: ' '\n").is_err());
  }

  #[test]
  fn test_unknown_backend_is_error() {
    let yaml = "origin: https://shop.test\ncache:\n  backend: redis\n";
    assert!(Config::parse(yaml).is_err());
  }

  #[test]
  fn test_explicit_missing_path_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(Some(&dir.path().join("nope.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_load_from_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline-cache.yaml");
    std::fs::write(&path, "origin: https://shop.test\nseed: []\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert!(config.seed.is_empty());
  }
}
