//! Handle to the index coordinator
//!
//! The handle is the only way into a running index. It is cheap to clone and
//! is passed explicitly to whoever needs the index. Writes go through the
//! coordinator's message channel; reads go straight to the committed store
//! and never wait on the coordinator.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use super::{
  coordinator::IndexError,
  message::CoordinatorMessage,
  pool::WorkerStatus,
  status::{IndexState, StatusReporter},
};
use crate::store::{IndexStore, QueryResult};

/// Handle to communicate with an IndexCoordinator
#[derive(Clone, Debug)]
pub struct IndexHandle {
  tx: mpsc::Sender<CoordinatorMessage>,
  store: IndexStore,
  status: StatusReporter,
}

impl IndexHandle {
  pub(crate) fn new(tx: mpsc::Sender<CoordinatorMessage>, store: IndexStore, status: StatusReporter) -> Self {
    Self { tx, store, status }
  }

  async fn send(&self, msg: CoordinatorMessage) -> Result<(), SendError> {
    self.tx.send(msg).await.map_err(|_| SendError::ActorGone)
  }

  async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> CoordinatorMessage) -> Result<T, SendError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self.send(build(reply_tx)).await?;
    reply_rx.await.map_err(|_| SendError::ActorGone)
  }

  // ========================================================================
  // Writes
  // ========================================================================

  /// Seed records for `paths` and queue them all. Returns once the records
  /// exist; loading and parsing continue in the background.
  pub async fn initialize(&self, paths: Vec<String>) -> Result<(), SendError> {
    self.request(|reply| CoordinatorMessage::Initialize { paths, reply }).await
  }

  /// Report a created or edited document.
  pub async fn document_changed(&self, path: impl Into<String>, content: impl Into<Bytes>) -> Result<(), SendError> {
    self
      .send(CoordinatorMessage::DocumentChanged {
        path: path.into(),
        content: content.into(),
      })
      .await
  }

  /// Report a deleted document.
  pub async fn document_deleted(&self, path: impl Into<String>) -> Result<(), SendError> {
    self.send(CoordinatorMessage::DocumentDeleted { path: path.into() }).await
  }

  /// Resize the worker pool and change its utilization target.
  pub async fn configure(&self, threads: usize, utilization: f64) -> Result<(), IndexError> {
    self
      .request(|reply| CoordinatorMessage::Configure {
        threads,
        utilization,
        reply,
      })
      .await?
  }

  /// Drain the pool and stop the coordinator.
  pub async fn shutdown(&self) -> Result<(), SendError> {
    self.request(|reply| CoordinatorMessage::Shutdown { reply }).await
  }

  // ========================================================================
  // Reads
  // ========================================================================

  /// Committed metadata for a path. Never waits on imports.
  pub fn query(&self, path: &str) -> QueryResult {
    self.store.lookup(path)
  }

  pub fn store(&self) -> &IndexStore {
    &self.store
  }

  /// A new subscriber to progress updates
  pub fn status(&self) -> StatusReporter {
    self.status.clone()
  }

  /// Snapshot of the worker slots
  pub async fn workers(&self) -> Result<Vec<WorkerStatus>, SendError> {
    self.request(|reply| CoordinatorMessage::Workers { reply }).await
  }

  /// Wait until everything sent so far has been indexed.
  ///
  /// Messages are handled in order, so once the barrier is answered the
  /// published state accounts for every earlier change.
  pub async fn wait_until_ready(&self) -> Result<IndexState, SendError> {
    self.request(|reply| CoordinatorMessage::Barrier { reply }).await?;
    self.status().wait_until_ready().await
  }
}

// ============================================================================
// Errors
// ============================================================================

/// Error when sending to an actor
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
  #[error("Actor has shut down")]
  ActorGone,
}
