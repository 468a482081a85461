use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Directory holding cached resources and media (defaults to the user cache dir)
  pub cache_dir: Option<PathBuf>,
  #[serde(default)]
  pub app: AppConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the content backend
  pub url: String,
}

/// Running app version, used to invalidate caches written by other releases.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
  #[serde(default = "default_release")]
  pub release: String,
  #[serde(default = "default_build", deserialize_with = "deserialize_build")]
  pub build: String,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      release: default_release(),
      build: default_build(),
    }
  }
}

impl AppConfig {
  /// Version marker string: release and build number joined by a dash.
  pub fn version_marker(&self) -> String {
    format!("{}-{}", self.release, self.build)
  }
}

fn default_release() -> String {
  env!("CARGO_PKG_VERSION").to_string()
}

fn default_build() -> String {
  "0".to_string()
}

/// Build numbers are usually written bare (`build: 42`); accept numbers and strings.
fn deserialize_build<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
  D: serde::Deserializer<'de>,
{
  match serde_yaml::Value::deserialize(deserializer)? {
    serde_yaml::Value::String(s) => Ok(s),
    serde_yaml::Value::Number(n) => Ok(n.to_string()),
    other => Err(serde::de::Error::custom(format!(
      "invalid build number: {:?}",
      other
    ))),
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Base delay between background resync passes
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
  /// Upper bound for the backed-off delay
  #[serde(default = "default_max_interval_secs")]
  pub max_interval_secs: u64,
  /// Random spread applied to each delay, as a fraction of it
  #[serde(default = "default_jitter")]
  pub jitter: f64,
  /// Parallel media downloads per resource
  #[serde(default = "default_media_concurrency")]
  pub media_concurrency: usize,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_interval_secs(),
      max_interval_secs: default_max_interval_secs(),
      jitter: default_jitter(),
      media_concurrency: default_media_concurrency(),
    }
  }
}

impl SyncConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs)
  }

  pub fn max_interval(&self) -> Duration {
    Duration::from_secs(self.max_interval_secs.max(self.interval_secs))
  }
}

fn default_interval_secs() -> u64 {
  300
}

fn default_max_interval_secs() -> u64 {
  3600
}

fn default_jitter() -> f64 {
  0.2
}

fn default_media_concurrency() -> usize {
  4
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fieldguide.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fieldguide/config.yaml
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
        "No configuration file found. Create one at ~/.config/fieldguide/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("fieldguide.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fieldguide").join("config.yaml");
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

  pub fn from_yaml(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Resolve the cache directory, falling back to the platform cache dir.
  pub fn cache_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.cache_dir {
      return Ok(dir.clone());
    }

    let base = dirs::cache_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".cache")))
      .ok_or_else(|| eyre!("Could not determine cache directory"))?;

    Ok(base.join("fieldguide"))
  }

  /// Directory for log files.
  pub fn log_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("fieldguide").join("logs"))
  }

  /// Get the API token from environment variables.
  ///
  /// Checks FIELDGUIDE_API_TOKEN first, then DIRECTUS_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("FIELDGUIDE_API_TOKEN")
      .or_else(|_| std::env::var("DIRECTUS_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set FIELDGUIDE_API_TOKEN or DIRECTUS_TOKEN environment variable.")
      })
  }
}
