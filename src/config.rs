use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Resource opened by `browse` when none is given (e.g. "products")
  pub default_resource: Option<String>,
  /// Items per list window
  #[serde(default = "default_page_size")]
  pub page_size: u32,
  #[serde(default)]
  pub cache: CacheConfig,
}

fn default_page_size() -> u32 {
  50
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the admin API, e.g. "https://shop.example.com/admin/api"
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

/// Stale times per query type, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub list_secs: u64,
  pub search_secs: u64,
  pub detail_secs: u64,
  pub field_definitions_secs: u64,
  /// Shop-level reference data. Absent means it never goes stale.
  pub reference_secs: Option<u64>,
  /// How long an entry nobody watches is kept
  pub gc_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      list_secs: 10,
      search_secs: 30,
      detail_secs: 60,
      field_definitions_secs: 300,
      reference_secs: None,
      gc_secs: 300,
    }
  }
}

impl CacheConfig {
  pub fn stale_policy(&self) -> StalePolicy {
    StalePolicy {
      list: Duration::from_secs(self.list_secs),
      search: Duration::from_secs(self.search_secs),
      detail: Duration::from_secs(self.detail_secs),
      field_definitions: Duration::from_secs(self.field_definitions_secs),
      reference: self
        .reference_secs
        .map(Duration::from_secs)
        .unwrap_or(Duration::MAX),
    }
  }

  pub fn gc_time(&self) -> Duration {
    Duration::from_secs(self.gc_secs)
  }
}

/// Resolved stale time per query type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalePolicy {
  pub list: Duration,
  pub search: Duration,
  pub detail: Duration,
  pub field_definitions: Duration,
  pub reference: Duration,
}

impl Default for StalePolicy {
  fn default() -> Self {
    CacheConfig::default().stale_policy()
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./resq.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/resq/config.yaml
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
        "No configuration file found. Create one at ~/.config/resq/config.yaml\n\
                 with at least `api: {{ url: ... }}`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("resq.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("resq").join("config.yaml");
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

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.page_size == 0 {
      return Err(eyre!("page_size must be at least 1"));
    }
    Ok(config)
  }

  /// Get the API token from the environment, if any.
  ///
  /// Checks RESQ_API_TOKEN. Session handling lives outside this tool, so a
  /// missing token is not an error.
  pub fn get_api_token() -> Option<String> {
    std::env::var("RESQ_API_TOKEN").ok().filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  url: https://example.com/admin/api\n").unwrap();
    assert_eq!(config.page_size, 50);
    assert_eq!(config.api.timeout_secs, 30);

    let policy = config.cache.stale_policy();
    assert_eq!(policy.list, Duration::from_secs(10));
    assert_eq!(policy.search, Duration::from_secs(30));
    assert_eq!(policy.reference, Duration::MAX);
  }

  #[test]
  fn test_overrides() {
    let yaml = r#"
api:
  url: https://example.com/admin/api
default_resource: orders
page_size: 25
cache:
  list_secs: 5
  reference_secs: 3600
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.default_resource.as_deref(), Some("orders"));
    assert_eq!(config.page_size, 25);
    let policy = config.cache.stale_policy();
    assert_eq!(policy.list, Duration::from_secs(5));
    assert_eq!(policy.detail, Duration::from_secs(60));
    assert_eq!(policy.reference, Duration::from_secs(3600));
  }

  #[test]
  fn test_zero_page_size_rejected() {
    assert!(Config::parse("api:\n  url: http://x\npage_size: 0\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/nonexistent/resq.yaml"))).unwrap_err();
    assert!(err.to_string().contains("not found"));
  }
}
