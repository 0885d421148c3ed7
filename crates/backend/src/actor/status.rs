//! Read-only progress reporting
//!
//! The coordinator publishes an [`IndexState`] after every transition. Any
//! number of [`StatusReporter`]s can poll or subscribe to it; none can change it.

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

use super::handle::SendError;

/// Coarse phase of the whole index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPhase {
  /// Nothing has been submitted yet
  #[default]
  Initializing,
  /// Documents are loading, queued or being parsed
  Building,
  /// Nothing pending and nothing in flight
  Ready,
}

/// Aggregate progress counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexState {
  /// Documents known to the index
  pub total: usize,
  /// Documents loading or waiting in the job queue
  pub pending: usize,
  /// Documents being parsed right now
  pub in_flight: usize,
  /// Documents whose latest parse failed
  pub failed: usize,
  /// Documents with no parser for their format
  pub unsupported: usize,
  /// Documents whose metadata matches their latest content
  pub indexed: usize,
  /// Stale results thrown away since startup
  pub discarded: u64,
  pub phase: IndexPhase,
}

impl IndexState {
  pub fn is_ready(&self) -> bool {
    self.phase == IndexPhase::Ready
  }

  /// Documents that are neither pending nor in flight
  pub fn settled(&self) -> usize {
    self.total.saturating_sub(self.pending + self.in_flight)
  }
}

impl fmt::Display for IndexState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.phase {
      IndexPhase::Initializing => write!(f, "Index initializing")?,
      IndexPhase::Building => write!(f, "Indexing {}/{} documents", self.settled(), self.total)?,
      IndexPhase::Ready => write!(f, "Index ready: {} documents", self.indexed)?,
    }
    if self.failed > 0 {
      write!(f, " ({} failed)", self.failed)?;
    }
    Ok(())
  }
}

/// Subscriber to the coordinator's progress
#[derive(Debug, Clone)]
pub struct StatusReporter {
  rx: watch::Receiver<IndexState>,
}

impl StatusReporter {
  pub fn new(rx: watch::Receiver<IndexState>) -> Self {
    Self { rx }
  }

  /// The latest published state
  pub fn snapshot(&self) -> IndexState {
    self.rx.borrow().clone()
  }

  /// Wait for the next published change.
  pub async fn changed(&mut self) -> Result<IndexState, SendError> {
    self.rx.changed().await.map_err(|_| SendError::ActorGone)?;
    Ok(self.rx.borrow_and_update().clone())
  }

  /// Wait until a published state satisfies `predicate`, checking the
  /// current state first.
  pub async fn wait_for(&mut self, predicate: impl FnMut(&IndexState) -> bool) -> Result<IndexState, SendError> {
    let state = self.rx.wait_for(predicate).await.map_err(|_| SendError::ActorGone)?;
    Ok(state.clone())
  }

  /// Wait until the index reaches [`IndexPhase::Ready`].
  pub async fn wait_until_ready(&mut self) -> Result<IndexState, SendError> {
    self.wait_for(IndexState::is_ready).await
  }
}
