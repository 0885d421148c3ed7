//! Configuration for docindex with per-root overrides.
//!
//! Config priority: root-relative (.docindex.toml) > user (~/.config/docindex/config.toml) > defaults

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};

/// Lowest utilization a config file may request; lower values are clamped up.
pub const MIN_CONFIGURED_UTILIZATION: f64 = 0.1;

/// Errors for invalid runtime configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
  #[error("Thread count must be at least 1, got {0}")]
  InvalidThreadCount(usize),
  #[error("Utilization must be in (0, 1], got {0}")]
  InvalidUtilization(f64),
}

/// Validate a `configure(threadCount, utilizationFraction)` request.
pub fn validate_pool_settings(threads: usize, utilization: f64) -> Result<(), ConfigError> {
  if threads == 0 {
    return Err(ConfigError::InvalidThreadCount(threads));
  }
  if !(utilization > 0.0 && utilization <= 1.0) {
    return Err(ConfigError::InvalidUtilization(utilization));
  }
  Ok(())
}

// ============================================================================
// Importer Configuration
// ============================================================================

/// Import worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
  /// Number of importer threads (default: 2, 0 = half the available cores)
  pub threads: usize,

  /// Fraction of wall-clock time each importer thread may spend parsing
  /// (default: 0.75). Clamped into [0.1, 1.0].
  pub utilization: f64,

  /// A job running longer than this marks its worker as unresponsive
  /// and the worker is replaced (default: 30000)
  pub job_timeout_ms: u64,

  /// Trailing window used for utilization accounting (default: 1000)
  pub throttle_window_ms: u64,

  /// How long shutdown waits for in-flight jobs (default: 2000)
  pub shutdown_grace_ms: u64,
}

impl Default for ImporterConfig {
  fn default() -> Self {
    Self {
      threads: 2,
      utilization: 0.75,
      job_timeout_ms: 30_000,
      throttle_window_ms: 1000,
      shutdown_grace_ms: 2000,
    }
  }
}

impl ImporterConfig {
  /// Thread count with `0` resolved against the machine.
  pub fn effective_threads(&self) -> usize {
    if self.threads == 0 {
      (num_cpus::get() / 2).max(1)
    } else {
      self.threads
    }
  }

  /// Utilization clamped into the supported range.
  pub fn effective_utilization(&self) -> f64 {
    if self.utilization.is_nan() {
      return Self::default().utilization;
    }
    self.utilization.clamp(MIN_CONFIGURED_UTILIZATION, 1.0)
  }
}

// ============================================================================
// Index Configuration
// ============================================================================

/// Metadata index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
  /// Extract `key:: value` inline fields (default: true)
  /// Requires a full text scan of every document, which noticeably slows
  /// indexing for large corpora. When disabled, metadata comes only from
  /// tags, links, and frontmatter.
  pub inline_fields: bool,

  /// File extensions picked up when discovering documents on disk
  /// (default: md, markdown, canvas)
  pub extensions: Vec<String>,

  /// Number of documents loaded concurrently during initialization (default: 16)
  pub load_concurrency: usize,
}

impl Default for IndexConfig {
  fn default() -> Self {
    Self {
      inline_fields: true,
      extensions: vec!["md".to_string(), "markdown".to_string(), "canvas".to_string()],
      load_concurrency: 16,
    }
  }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  /// Default: "info"
  #[serde(default = "default_log_level")]
  pub level: String,
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
    }
  }
}

// ============================================================================
// Top-level Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Import worker pool
  #[serde(default)]
  pub importer: ImporterConfig,

  /// Metadata extraction and discovery
  #[serde(default)]
  pub index: IndexConfig,

  /// Logging
  #[serde(default)]
  pub logging: LoggingConfig,
}

impl Config {
  /// Load config for a document root
  ///
  /// Tries root-relative config first, then user config, then defaults.
  pub fn load_for_root(root: &Path) -> Self {
    let root_config = Self::root_config_path(root);
    if root_config.exists()
      && let Ok(content) = std::fs::read_to_string(&root_config)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(content) = std::fs::read_to_string(&user_config_path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    Self::default()
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("docindex").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("docindex").join("config.toml"))
  }

  /// Get the root-relative config path
  pub fn root_config_path(root: &Path) -> PathBuf {
    root.join(".docindex.toml")
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    let defaults = Self::default();
    format!(
      r#"# docindex Configuration
# Place in <root>/.docindex.toml or ~/.config/docindex/config.toml

[importer]
# Number of importer threads (0 = half the available cores)
threads = {threads}

# Fraction of wall-clock time each importer may spend parsing (0.1 - 1.0)
utilization = {utilization}

# Jobs running longer than this restart their worker
job_timeout_ms = {job_timeout_ms}

# Trailing window for utilization accounting
throttle_window_ms = {throttle_window_ms}

# How long shutdown waits for in-flight jobs
shutdown_grace_ms = {shutdown_grace_ms}

[index]
# Parse `key:: value` inline fields (slower on large corpora)
inline_fields = {inline_fields}

# Extensions discovered on disk
extensions = ["md", "markdown", "canvas"]

# Documents loaded concurrently during initialization
load_concurrency = {load_concurrency}

[logging]
# off, error, warn, info, debug, trace
level = "{level}"
"#,
      threads = defaults.importer.threads,
      utilization = defaults.importer.utilization,
      job_timeout_ms = defaults.importer.job_timeout_ms,
      throttle_window_ms = defaults.importer.throttle_window_ms,
      shutdown_grace_ms = defaults.importer.shutdown_grace_ms,
      inline_fields = defaults.index.inline_fields,
      load_concurrency = defaults.index.load_concurrency,
      level = defaults.logging.level,
    )
  }
}

// ============================================================================
// Runtime settings derived from Config
// ============================================================================

/// Settings for the worker pool, resolved from [`ImporterConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
  pub threads: usize,
  pub utilization: f64,
  pub job_timeout: Duration,
  pub throttle_window: Duration,
}

impl PoolConfig {
  pub fn from_config(importer: &ImporterConfig) -> Self {
    Self {
      threads: importer.effective_threads(),
      utilization: importer.effective_utilization(),
      job_timeout: Duration::from_millis(importer.job_timeout_ms.max(1)),
      throttle_window: Duration::from_millis(importer.throttle_window_ms.max(1)),
    }
  }
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self::from_config(&ImporterConfig::default())
  }
}

/// Settings for the index coordinator, resolved from [`Config`].
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
  pub pool: PoolConfig,
  pub index_inline_fields: bool,
  pub load_concurrency: usize,
  pub shutdown_grace: Duration,
}

impl CoordinatorConfig {
  pub fn from_config(config: &Config) -> Self {
    Self {
      pool: PoolConfig::from_config(&config.importer),
      index_inline_fields: config.index.inline_fields,
      load_concurrency: config.index.load_concurrency.max(1),
      shutdown_grace: Duration::from_millis(config.importer.shutdown_grace_ms),
    }
  }
}

impl Default for CoordinatorConfig {
  fn default() -> Self {
    Self::from_config(&Config::default())
  }
}
