use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crudcache::api::DEFAULT_PAGE_SIZE;

/// Environment variable overriding `api.base_url`.
pub const BASE_URL_ENV: &str = "CRUDCACHE_BASE_URL";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Default page size for paged lists
  #[serde(default = "default_page_size")]
  pub page_size: u32,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Write logs to a daily file in this directory instead of stderr
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub backend: CacheBackend,
  /// SQLite database path (defaults to the user data directory)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
  /// Cache lives for the duration of the process
  #[default]
  Memory,
  /// Cache persisted in SQLite
  Sqlite,
}

fn default_page_size() -> u32 {
  DEFAULT_PAGE_SIZE
}

fn default_timeout_secs() -> u64 {
  30
}

impl Config {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./crudcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/crudcache/config.yaml
  ///
  /// Without a file, `CRUDCACHE_BASE_URL` alone is enough.
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

    let base_url_override = std::env::var(BASE_URL_ENV).ok();

    let config = match (path, base_url_override.clone()) {
      (Some(p), _) => Self::load_from_path(&p)?,
      (None, Some(base_url)) => Self::from_base_url(base_url),
      (None, None) => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/crudcache/config.yaml \
           or set {}.",
          BASE_URL_ENV
        ))
      }
    };

    let config = match base_url_override {
      Some(base_url) => Config {
        api: ApiConfig {
          base_url,
          ..config.api
        },
        ..config
      },
      None => config,
    };

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("crudcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("crudcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  fn from_base_url(base_url: String) -> Self {
    Self {
      api: ApiConfig {
        base_url,
        timeout_secs: default_timeout_secs(),
      },
      page_size: default_page_size(),
      cache: CacheConfig::default(),
      log_dir: None,
    }
  }

  fn validate(&self) -> Result<()> {
    if self.page_size == 0 {
      return Err(eyre!("page_size must be greater than zero"));
    }
    if self.api.timeout_secs == 0 {
      return Err(eyre!("api.timeout_secs must be greater than zero"));
    }
    url::Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {}: {}", self.api.base_url, e))?;
    Ok(())
  }
}
