//! Index command: build the index for a directory once

use anyhow::{Context, Result, bail};
use clap::Args;
use docindex::{
  IndexCoordinator, IndexHandle, IndexState, QueryResult,
  actor::FsDocumentSource,
  config::{Config, CoordinatorConfig, validate_pool_settings},
  import::ParserRegistry,
};
use std::{
  io::{IsTerminal, Write},
  path::{Path, PathBuf},
  sync::Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Pool overrides shared by `index` and `watch`
#[derive(Args, Debug, Clone, Default)]
pub struct IndexOptions {
  /// Number of import threads (default: from config)
  #[arg(short, long)]
  pub threads: Option<usize>,
  /// Fraction of time each import thread may spend parsing, in (0, 1]
  #[arg(short, long)]
  pub utilization: Option<f64>,
}

/// A running coordinator over a directory
pub(crate) struct Session {
  pub handle: IndexHandle,
  pub source: FsDocumentSource,
  pub config: Config,
  pub cancel: CancellationToken,
}

/// Load config for `root`, apply overrides, start the coordinator and queue
/// every discovered document.
pub(crate) async fn open_session(root: &Path, options: &IndexOptions) -> Result<Session> {
  let root: PathBuf = root
    .canonicalize()
    .with_context(|| format!("Document root not found: {}", root.display()))?;
  if !root.is_dir() {
    bail!("Document root is not a directory: {}", root.display());
  }

  let config = Config::load_for_root(&root);
  let mut coordinator_config = CoordinatorConfig::from_config(&config);
  if let Some(threads) = options.threads {
    coordinator_config.pool.threads = threads;
  }
  if let Some(utilization) = options.utilization {
    coordinator_config.pool.utilization = utilization;
  }
  validate_pool_settings(coordinator_config.pool.threads, coordinator_config.pool.utilization)
    .context("Invalid importer settings")?;

  let source = FsDocumentSource::new(&root);
  let paths = source.discover(&config.index.extensions);
  info!(
    root = %root.display(),
    documents = paths.len(),
    threads = coordinator_config.pool.threads,
    utilization = coordinator_config.pool.utilization,
    "Indexing documents"
  );

  let cancel = CancellationToken::new();
  let handle = IndexCoordinator::spawn(
    coordinator_config,
    ParserRegistry::with_defaults(),
    Arc::new(source.clone()),
    cancel.clone(),
  )
  .context("Failed to start index coordinator")?;

  handle.initialize(paths).await.context("Failed to initialize index")?;

  Ok(Session {
    handle,
    source,
    config,
    cancel,
  })
}

/// Wait for the index to settle, drawing a progress line on a terminal.
pub(crate) async fn report_progress(handle: &IndexHandle) -> Result<IndexState> {
  let interactive = std::io::stderr().is_terminal();
  let mut status = handle.status();
  let ready = handle.wait_until_ready();
  tokio::pin!(ready);

  loop {
    tokio::select! {
      state = &mut ready => {
        if interactive {
          eprintln!();
        }
        return state.context("Index coordinator stopped");
      }
      Ok(state) = status.changed() => {
        if interactive {
          eprint!("\r\x1b[2K{state}");
          let _ = std::io::stderr().flush();
        } else {
          debug!(%state, "Index progress");
        }
      }
    }
  }
}

/// Index every document under `root`, print a summary and any queried
/// records or tags, then shut down.
pub async fn cmd_index(root: &Path, options: &IndexOptions, queries: &[String], tags: &[String]) -> Result<()> {
  let session = open_session(root, options).await?;
  let state = report_progress(&session.handle).await?;

  println!("{state}");
  println!("  Indexed:     {}", state.indexed);
  println!("  Unsupported: {}", state.unsupported);
  println!("  Failed:      {}", state.failed);

  let store = session.handle.store();
  for path in queries {
    let output = match session.handle.query(path) {
      QueryResult::Indexed(record) => serde_json::to_string_pretty(&serde_json::json!({
        "record": &*record,
        "backlinks": store.linking_to(path),
      }))?,
      QueryResult::NotIndexed => {
        let record = store.record(path);
        serde_json::to_string_pretty(&serde_json::json!({
          "path": path,
          "indexed": false,
          "failed": record.as_ref().is_some_and(|r| r.is_failed()),
          "status": record.map(|r| r.status.clone()),
        }))?
      }
    };
    println!("{output}");
  }

  for tag in tags {
    println!("#{tag}");
    for path in store.tagged(tag) {
      println!("  {path}");
    }
  }

  session.handle.shutdown().await.context("Failed to shut down index")?;
  Ok(())
}
