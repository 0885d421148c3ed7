//! Message types exchanged between the index coordinator, the worker pool,
//! and the import workers.
//!
//! ```text
//! host ──CoordinatorMessage──▶ coordinator ──ImportCommand──▶ pool ──Envelope──▶ worker
//!                              coordinator ◀──ImportResult─── pool ◀──Envelope─── worker
//! ```
//!
//! Commands and results never cross the worker boundary as Rust values; the
//! pool turns them into [`Envelope`](crate::codec::Envelope)s with the codec.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::{coordinator::IndexError, pool::WorkerStatus};
use crate::domain::document::ParsedMetadata;

/// Generation counter stamped on every queued job
pub type Generation = u64;

// ============================================================================
// Worker boundary messages
// ============================================================================

/// Per-command context a parser needs besides the raw content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMetadata {
  /// Folder containing the document, used to resolve relative links
  pub folder: String,
  /// Whether `key:: value` inline fields should be extracted
  pub index_inline_fields: bool,
}

impl ImportMetadata {
  pub fn for_path(path: &str, index_inline_fields: bool) -> Self {
    let folder = match path.rfind('/') {
      Some(idx) => path[..idx].to_string(),
      None => String::new(),
    };
    Self {
      folder,
      index_inline_fields,
    }
  }
}

/// A request to parse one document.
///
/// Immutable once created; owned by the job queue until a worker claims it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportCommand {
  pub path: String,
  /// Format discriminant, e.g. "markdown" or "canvas"
  pub format: String,
  pub generation: Generation,
  /// Raw document bytes; shared, never copied across the boundary
  pub payload: Bytes,
  pub metadata: ImportMetadata,
}

/// Human-readable description of a failed import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
  pub path: String,
  pub message: String,
}

/// Tagged outcome of one import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImportOutcome {
  Success { metadata: ParsedMetadata },
  Failure { error: ErrorDetail },
  Unsupported { format: String },
}

/// The result of one import, stamped with the command's identity so the
/// coordinator can check freshness.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportResult {
  pub path: String,
  pub generation: Generation,
  pub outcome: ImportOutcome,
}

impl ImportResult {
  pub fn success(command: &ImportCommand, metadata: ParsedMetadata) -> Self {
    Self {
      path: command.path.clone(),
      generation: command.generation,
      outcome: ImportOutcome::Success { metadata },
    }
  }

  pub fn failure(path: impl Into<String>, generation: Generation, message: impl Into<String>) -> Self {
    let path = path.into();
    Self {
      outcome: ImportOutcome::Failure {
        error: ErrorDetail {
          path: path.clone(),
          message: message.into(),
        },
      },
      path,
      generation,
    }
  }

  pub fn unsupported(command: &ImportCommand) -> Self {
    Self {
      path: command.path.clone(),
      generation: command.generation,
      outcome: ImportOutcome::Unsupported {
        format: command.format.clone(),
      },
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self.outcome, ImportOutcome::Success { .. })
  }

  pub fn is_failure(&self) -> bool {
    matches!(self.outcome, ImportOutcome::Failure { .. })
  }
}

// ============================================================================
// Coordinator messages
// ============================================================================

/// A message sent to the IndexCoordinator
#[derive(Debug)]
pub enum CoordinatorMessage {
  /// Seed records for every known path and load them
  Initialize {
    paths: Vec<String>,
    reply: oneshot::Sender<()>,
  },
  /// A document was created or edited
  DocumentChanged { path: String, content: Bytes },
  /// A document was removed
  DocumentDeleted { path: String },
  /// Resize the pool or change its utilization
  Configure {
    threads: usize,
    utilization: f64,
    reply: oneshot::Sender<Result<(), IndexError>>,
  },
  /// Reply once every earlier message has been handled
  Barrier { reply: oneshot::Sender<()> },
  /// Snapshot the worker slots
  Workers { reply: oneshot::Sender<Vec<WorkerStatus>> },
  /// Drain the pool and stop the coordinator
  Shutdown { reply: oneshot::Sender<()> },
}

/// Content loaded for a record during initialization, stamped with the
/// generation it was requested for.
#[derive(Debug)]
pub struct LoadedDocument {
  pub path: String,
  pub generation: Generation,
  pub content: Result<Bytes, String>,
}
