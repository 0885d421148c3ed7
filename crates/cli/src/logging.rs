//! Logging setup for CLI commands

use docindex::config::Config;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

/// Initialize console logging.
///
/// The level comes from the config for `root` (or `--verbose`), and
/// `RUST_LOG` overrides both.
pub fn init_cli_logging(root: &Path, verbose: bool) {
  let config = Config::load_for_root(root);
  let level = if verbose {
    tracing::Level::DEBUG
  } else {
    parse_log_level(&config.logging.level)
  };

  let env_filter = EnvFilter::builder()
    .with_default_directive(level.into())
    .from_env_lossy();

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(verbose)
    .with_writer(std::io::stderr)
    .init();
}
