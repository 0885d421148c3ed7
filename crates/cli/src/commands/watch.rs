//! Watch command: keep the index current as files change
//!
//! notify's callback runs on its own thread and forwards events with
//! `blocking_send`; the command loop turns them into document-changed and
//! document-deleted notifications for the coordinator.

use anyhow::{Context, Result};
use docindex::{
  IndexHandle,
  actor::{DocumentSource, FsDocumentSource, SourceError},
};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::index::{IndexOptions, open_session, report_progress};

/// Index `root`, then forward file changes until Ctrl+C.
pub async fn cmd_watch(root: &Path, options: &IndexOptions) -> Result<()> {
  let session = open_session(root, options).await?;
  let state = report_progress(&session.handle).await?;
  println!("{state}");

  let (event_tx, mut event_rx) = mpsc::channel::<Result<Event, notify::Error>>(256);
  let mut watcher = RecommendedWatcher::new(
    move |res| {
      let _ = event_tx.blocking_send(res);
    },
    Config::default(),
  )
  .context("Failed to create file watcher")?;
  watcher
    .watch(session.source.root(), RecursiveMode::Recursive)
    .context("Failed to watch document root")?;

  println!("Watching {} (Ctrl+C to stop)", session.source.root().display());

  let extensions = session.config.index.extensions.clone();
  let mut status = session.handle.status();
  let mut was_ready = true;

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      _ = session.cancel.cancelled() => break,
      event = event_rx.recv() => match event {
        Some(Ok(event)) => forward_event(&session.handle, &session.source, &extensions, event).await?,
        Some(Err(e)) => warn!(error = %e, "File watcher error"),
        None => {
          warn!("File watcher stopped");
          break;
        }
      },
      Ok(state) = status.changed() => {
        if state.is_ready() && !was_ready {
          println!("{state}");
        }
        was_ready = state.is_ready();
      }
    }
  }

  drop(watcher);
  info!("Stopping index");
  session.handle.shutdown().await.context("Failed to shut down index")?;
  println!("\nWatcher stopped");
  Ok(())
}

/// Turn one notify event into coordinator notifications.
async fn forward_event(
  handle: &IndexHandle,
  source: &FsDocumentSource,
  extensions: &[String],
  event: Event,
) -> Result<()> {
  match event.kind {
    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
    _ => return Ok(()),
  }

  for path in event.paths {
    if !FsDocumentSource::has_extension(&path, extensions) {
      trace!(path = %path.display(), "Skipping non-document path");
      continue;
    }
    let Some(relative) = source.relative_path(&path) else {
      continue;
    };
    if is_hidden(&relative) {
      continue;
    }
    sync_document(handle, source, relative, path).await?;
  }
  Ok(())
}

/// Report the current on-disk state of one document.
///
/// Reading the file decides between change and deletion, which also covers
/// renames reported as a single modify event.
async fn sync_document(handle: &IndexHandle, source: &FsDocumentSource, relative: String, path: PathBuf) -> Result<()> {
  if path.is_dir() {
    return Ok(());
  }
  match source.load(&relative).await {
    Ok(content) => {
      debug!(path = %relative, bytes = content.len(), "Document changed");
      handle.document_changed(relative, content).await?;
    }
    Err(SourceError::NotFound(_)) => {
      debug!(path = %relative, "Document deleted");
      handle.document_deleted(relative).await?;
    }
    Err(e) => warn!(path = %relative, error = %e, "Failed to read changed document"),
  }
  Ok(())
}

/// Discovery skips hidden files; keep watch consistent with it.
fn is_hidden(relative: &str) -> bool {
  relative.split('/').any(|part| part.starts_with('.'))
}
