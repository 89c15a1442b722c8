use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL that precache paths resolve against
  pub origin: String,
  /// Cache generation identifier; changing it invalidates every previously
  /// stored generation on the next activation
  #[serde(default = "default_cache_name")]
  pub cache_name: String,
  /// Ordered list of paths fetched and stored during provisioning
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// URL substrings whose requests bypass the cache policy entirely
  #[serde(default = "default_bypass_hosts")]
  pub bypass_hosts: Vec<String>,
}

fn default_cache_name() -> String {
  "app-shell-v1".to_string()
}

fn default_precache() -> Vec<String> {
  ["/", "/index.html", "/styles.css", "/manifest.json"]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_bypass_hosts() -> Vec<String> {
  ["firebaseio.com", "googleapis.com", "gstatic.com"]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offcache/config.yaml
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
        "No configuration file found. Create one at ~/.config/offcache/config.yaml\n\
                 with at least an `origin` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offcache").join("config.yaml");
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
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn minimal_config_gets_defaults() {
    let config: Config = serde_yaml::from_str("origin: https://app.example.com").unwrap();

    assert_eq!(config.cache_name, "app-shell-v1");
    assert_eq!(
      config.precache,
      vec!["/", "/index.html", "/styles.css", "/manifest.json"]
    );
    assert_eq!(
      config.bypass_hosts,
      vec!["firebaseio.com", "googleapis.com", "gstatic.com"]
    );
  }

  #[test]
  fn explicit_values_override_defaults() {
    let yaml = r#"
origin: https://app.example.com
cache_name: app-shell-v2
precache:
  - /
  - /app.js
bypass_hosts:
  - api.example.com
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(config.cache_name, "app-shell-v2");
    assert_eq!(config.precache, vec!["/", "/app.js"]);
    assert_eq!(config.bypass_hosts, vec!["api.example.com"]);
  }

  #[test]
  fn missing_origin_is_an_error() {
    assert!(serde_yaml::from_str::<Config>("cache_name: v1").is_err());
  }
}
