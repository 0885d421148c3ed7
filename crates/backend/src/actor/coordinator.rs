//! IndexCoordinator - owner of the document index
//!
//! The coordinator is a single long-lived task. It owns the document records,
//! the worker pool (and with it the job queue), and the progress counters.
//! Nothing else mutates any of them.
//!
//! # Generations
//!
//! Every time a document is queued its generation is bumped and the job is
//! stamped with it. A result is applied only if its generation still equals
//! the record's, so the committed metadata always reflects the latest queued
//! content, whatever order workers finish in:
//!
//! ```text
//! change A (gen 1) ──▶ worker 0 ───────────────────────────▶ result gen 1: stale, discarded
//! change A (gen 2) ──▶ queued behind gen 1 ──▶ worker 1 ──▶ result gen 2: applied
//! ```
//!
//! Deleting a document drops its record and any queued job. A result still in
//! flight for it finds no record on arrival and is discarded. If the document
//! is recreated first, the new record continues from the deleted record's
//! generation (kept as a tombstone while that job runs), so the late result
//! is still stale.
//!
//! # Event loop
//!
//! ```text
//! ┌─ cancel token ──────┐
//! ├─ handle messages ───┤
//! ├─ worker events ─────┼──▶ apply ──▶ dispatch ──▶ publish IndexState
//! ├─ loaded documents ──┤
//! └─ pool wakeup timer ─┘
//! ```

use std::{collections::HashMap, sync::Arc, time::Instant};

use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, stream};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
  handle::{IndexHandle, SendError},
  message::{CoordinatorMessage, Generation, ImportCommand, ImportMetadata, ImportOutcome, ImportResult, LoadedDocument},
  pool::{PoolError, PoolOutput, WorkerPool},
  source::DocumentSource,
  status::{IndexPhase, IndexState, StatusReporter},
};
use crate::{
  domain::{
    config::{ConfigError, CoordinatorConfig, validate_pool_settings},
    document::{DocumentRecord, DocumentStatus, compute_content_hash},
  },
  import::ParserRegistry,
  store::IndexStore,
};

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by the coordinator and its handle
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
  #[error("Invalid configuration: {0}")]
  Config(#[from] ConfigError),
  #[error("Worker pool error: {0}")]
  Pool(#[from] PoolError),
  #[error(transparent)]
  Send(#[from] SendError),
}

// ============================================================================
// Status tally
// ============================================================================

/// Record counts by status, kept in step with every record write
#[derive(Debug, Default)]
struct Tally {
  indexed: usize,
  failed: usize,
  unsupported: usize,
}

impl Tally {
  fn slot(&mut self, status: &DocumentStatus) -> Option<&mut usize> {
    match status {
      DocumentStatus::Pending => None,
      DocumentStatus::Indexed => Some(&mut self.indexed),
      DocumentStatus::Failed { .. } => Some(&mut self.failed),
      DocumentStatus::Unsupported => Some(&mut self.unsupported),
    }
  }

  fn add(&mut self, status: &DocumentStatus) {
    if let Some(count) = self.slot(status) {
      *count += 1;
    }
  }

  fn sub(&mut self, status: &DocumentStatus) {
    if let Some(count) = self.slot(status) {
      *count = count.saturating_sub(1);
    }
  }
}

// ============================================================================
// IndexCoordinator
// ============================================================================

/// The index coordinator actor
///
/// Runs until one of:
/// - The CancellationToken is triggered
/// - A Shutdown message is received
/// - Every handle is dropped
///
/// Each of these drains the worker pool before the task ends.
pub struct IndexCoordinator {
  config: CoordinatorConfig,
  pool: WorkerPool,
  store: IndexStore,
  tally: Tally,
  source: Arc<dyn DocumentSource>,
  rx: mpsc::Receiver<CoordinatorMessage>,
  /// Paths whose content is being loaded, with the generation it was requested for
  loading: HashMap<String, Generation>,
  /// Last generation of deleted documents whose job was still in flight
  tombstones: HashMap<String, Generation>,
  loads_tx: mpsc::UnboundedSender<LoadedDocument>,
  loads_rx: mpsc::UnboundedReceiver<LoadedDocument>,
  status_tx: watch::Sender<IndexState>,
  started: bool,
  discarded: u64,
  cancel: CancellationToken,
}

impl IndexCoordinator {
  /// Start the worker pool, spawn the coordinator task, and return its handle.
  pub fn spawn(
    config: CoordinatorConfig,
    parsers: ParserRegistry,
    source: Arc<dyn DocumentSource>,
    cancel: CancellationToken,
  ) -> Result<IndexHandle, IndexError> {
    let pool = WorkerPool::start(config.pool.clone(), parsers)?;
    let (tx, rx) = mpsc::channel(256);
    let (loads_tx, loads_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(IndexState::default());
    let store = IndexStore::new();

    let coordinator = Self {
      config,
      pool,
      store: store.clone(),
      tally: Tally::default(),
      source,
      rx,
      loading: HashMap::new(),
      tombstones: HashMap::new(),
      loads_tx,
      loads_rx,
      status_tx,
      started: false,
      discarded: 0,
      cancel,
    };
    tokio::spawn(coordinator.run());

    Ok(IndexHandle::new(tx, store, StatusReporter::new(status_rx)))
  }

  /// Main event loop
  pub async fn run(mut self) {
    info!(
      threads = self.config.pool.threads,
      utilization = self.config.pool.utilization,
      "IndexCoordinator started"
    );

    loop {
      let wakeup = self.pool.next_wakeup();

      tokio::select! {
          biased;

          _ = self.cancel.cancelled() => {
              info!("IndexCoordinator shutting down (cancelled)");
              self.shutdown().await;
              break;
          }

          msg = self.rx.recv() => {
              match msg {
                  Some(CoordinatorMessage::Shutdown { reply }) => {
                      info!("IndexCoordinator shutting down (requested)");
                      self.shutdown().await;
                      let _ = reply.send(());
                      break;
                  }
                  Some(msg) => self.handle_message(msg),
                  None => {
                      info!("IndexCoordinator shutting down (all handles dropped)");
                      self.shutdown().await;
                      break;
                  }
              }
          }

          Some(event) = self.pool.next_event() => {
              let outputs = self.pool.on_event(event, Instant::now());
              self.apply_outputs(outputs);
          }

          Some(loaded) = self.loads_rx.recv() => {
              self.on_loaded(loaded);
          }

          _ = sleep_until(wakeup) => {
              let outputs = self.pool.on_tick(Instant::now());
              self.apply_outputs(outputs);
          }
      }

      self.pool.dispatch(Instant::now());
      self.publish();
    }

    info!("IndexCoordinator stopped");
  }

  fn handle_message(&mut self, msg: CoordinatorMessage) {
    match msg {
      CoordinatorMessage::Initialize { paths, reply } => {
        self.initialize(paths);
        self.publish();
        let _ = reply.send(());
      }
      CoordinatorMessage::DocumentChanged { path, content } => self.document_changed(path, content),
      CoordinatorMessage::DocumentDeleted { path } => self.document_deleted(&path),
      CoordinatorMessage::Configure {
        threads,
        utilization,
        reply,
      } => {
        let _ = reply.send(self.configure(threads, utilization));
      }
      CoordinatorMessage::Barrier { reply } => {
        self.pool.dispatch(Instant::now());
        self.publish();
        let _ = reply.send(());
      }
      CoordinatorMessage::Workers { reply } => {
        let _ = reply.send(self.pool.worker_status());
      }
      CoordinatorMessage::Shutdown { .. } => {} // Handled in main loop
    }
  }

  // ========================================================================
  // Inbound operations
  // ========================================================================

  /// Seed records for every path and start loading their content.
  fn initialize(&mut self, paths: Vec<String>) {
    self.started = true;
    let mut requests = Vec::with_capacity(paths.len());

    for path in paths {
      let record = match self.base_record(&path) {
        (mut record, true) => {
          record.generation += 1;
          record
        }
        (record, false) => record,
      };
      let generation = record.generation;

      self.pool.cancel(&path);
      self.loading.insert(path.clone(), generation);
      self.commit(DocumentRecord {
        status: DocumentStatus::Pending,
        ..record
      });
      requests.push((path, generation));
    }

    info!(documents = requests.len(), "Initializing index");
    self.spawn_loads(requests);
  }

  /// Load contents off the coordinator task with bounded concurrency.
  fn spawn_loads(&self, requests: Vec<(String, Generation)>) {
    if requests.is_empty() {
      return;
    }
    let source = Arc::clone(&self.source);
    let loads_tx = self.loads_tx.clone();
    let concurrency = self.config.load_concurrency;
    let cancel = self.cancel.child_token();

    tokio::spawn(async move {
      let mut loads = stream::iter(requests)
        .map(|(path, generation)| {
          let source = Arc::clone(&source);
          async move {
            let content = source.load(&path).await.map_err(|e| e.to_string());
            LoadedDocument {
              path,
              generation,
              content,
            }
          }
        })
        .buffer_unordered(concurrency);

      loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            loaded = loads.next() => match loaded {
                Some(loaded) => {
                    if loads_tx.send(loaded).is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
      }
    });
  }

  fn on_loaded(&mut self, loaded: LoadedDocument) {
    if self.loading.get(&loaded.path) != Some(&loaded.generation) {
      trace!(path = %loaded.path, generation = loaded.generation, "Dropping superseded load");
      return;
    }
    self.loading.remove(&loaded.path);

    let Some(current) = self.store.get(&loaded.path) else {
      return;
    };
    let mut record = DocumentRecord::clone(&current);

    match loaded.content {
      Ok(content) => {
        record.fingerprint = Some(compute_content_hash(&content));
        let command = self.command_for(&record, content);
        self.commit(record);
        self.submit(command);
      }
      Err(message) => {
        warn!(path = %loaded.path, error = %message, "Failed to load document");
        record.status = DocumentStatus::Failed { message };
        self.commit(record);
      }
    }
  }

  /// A document was created or edited: bump its generation and queue it,
  /// replacing any job already queued for it.
  fn document_changed(&mut self, path: String, content: Bytes) {
    self.started = true;
    let (mut record, _) = self.base_record(&path);
    record.generation += 1;
    record.status = DocumentStatus::Pending;
    record.fingerprint = Some(compute_content_hash(&content));

    debug!(path = %path, generation = record.generation, bytes = content.len(), "Document changed");

    self.loading.remove(&path);
    let command = self.command_for(&record, content);
    self.commit(record);
    self.submit(command);
  }

  /// Drop a document's record and its queued job. An in-flight job is left to
  /// finish; its result will find no record.
  fn document_deleted(&mut self, path: &str) {
    self.loading.remove(path);
    let cancelled = self.pool.cancel(path).is_some();
    if let Some(record) = self.store.remove(path) {
      self.tally.sub(&record.status);
      if self.pool.is_in_flight(path) {
        self.tombstones.insert(path.to_string(), record.generation);
      }
      debug!(path = %path, generation = record.generation, cancelled, "Document deleted");
    }
  }

  fn configure(&mut self, threads: usize, utilization: f64) -> Result<(), IndexError> {
    validate_pool_settings(threads, utilization)?;
    self.pool.configure(threads, utilization)?;
    self.config.pool.threads = threads;
    self.config.pool.utilization = utilization;
    debug!(threads = self.pool.size(), utilization, "Importer reconfigured");
    Ok(())
  }

  // ========================================================================
  // Results
  // ========================================================================

  fn apply_outputs(&mut self, outputs: Vec<PoolOutput>) {
    for output in outputs {
      match output {
        PoolOutput::Result(result) => self.on_result(result),
        PoolOutput::Orphaned(command) => self.on_orphaned(command),
      }
    }
  }

  /// Apply a result if it is still current, otherwise discard it.
  fn on_result(&mut self, result: ImportResult) {
    let Some(current) = self.store.get(&result.path) else {
      if self.tombstones.get(&result.path) == Some(&result.generation) {
        self.tombstones.remove(&result.path);
      }
      self.discarded += 1;
      trace!(path = %result.path, generation = result.generation, "Discarding result for deleted document");
      return;
    };
    if current.generation != result.generation {
      self.discarded += 1;
      debug!(
        path = %result.path,
        result_generation = result.generation,
        current_generation = current.generation,
        "Discarding stale import result"
      );
      return;
    }

    let mut record = DocumentRecord::clone(&current);
    match result.outcome {
      ImportOutcome::Success { metadata } => {
        trace!(
          path = %record.path,
          generation = record.generation,
          tags = metadata.tags.len(),
          links = metadata.links.len(),
          "Applied import result"
        );
        record.metadata = Some(metadata);
        record.status = DocumentStatus::Indexed;
        record.last_parsed = Some(Utc::now());
      }
      ImportOutcome::Failure { error } => {
        warn!(path = %record.path, error = %error.message, "Failed to parse document");
        record.status = DocumentStatus::Failed { message: error.message };
      }
      ImportOutcome::Unsupported { format } => {
        trace!(path = %record.path, format = %format, "Unsupported document format");
        record.status = DocumentStatus::Unsupported;
      }
    }
    self.commit(record);
  }

  /// Requeue a job whose worker faulted, unless the document moved on.
  fn on_orphaned(&mut self, command: ImportCommand) {
    if self.tombstones.get(&command.path) == Some(&command.generation) {
      self.tombstones.remove(&command.path);
    }
    let current = self.store.get(&command.path).map(|r| r.generation);
    let superseded = current != Some(command.generation)
      || self.pool.queued_generation(&command.path).is_some()
      || self.loading.contains_key(&command.path);

    if superseded {
      debug!(path = %command.path, generation = command.generation, "Dropping superseded orphaned job");
      return;
    }
    debug!(path = %command.path, generation = command.generation, "Requeueing orphaned job");
    self.pool.requeue(command);
  }

  // ========================================================================
  // Helpers
  // ========================================================================

  /// The record a queued document builds on, and whether the path has a
  /// generation history (a live record or a tombstone).
  fn base_record(&mut self, path: &str) -> (DocumentRecord, bool) {
    if let Some(existing) = self.store.get(path) {
      return (DocumentRecord::clone(&existing), true);
    }
    match self.tombstones.remove(path) {
      Some(generation) => (
        DocumentRecord {
          generation,
          ..DocumentRecord::new(path)
        },
        true,
      ),
      None => (DocumentRecord::new(path), false),
    }
  }

  fn command_for(&self, record: &DocumentRecord, payload: Bytes) -> ImportCommand {
    ImportCommand {
      path: record.path.clone(),
      format: record.format.clone(),
      generation: record.generation,
      payload,
      metadata: ImportMetadata::for_path(&record.path, self.config.index_inline_fields),
    }
  }

  fn submit(&mut self, command: ImportCommand) {
    let path = command.path.clone();
    if let Err(e) = self.pool.submit(command) {
      debug!(path = %path, error = %e, "Import job not queued");
    }
  }

  /// Write a record to the store, keeping the tally in step.
  fn commit(&mut self, record: DocumentRecord) {
    self.tally.add(&record.status);
    if let Some(previous) = self.store.insert(record) {
      self.tally.sub(&previous.status);
    }
  }

  fn state(&self) -> IndexState {
    let pending = self.pool.queued() + self.loading.len();
    let in_flight = self.pool.in_flight();
    let phase = if !self.started {
      IndexPhase::Initializing
    } else if pending + in_flight > 0 {
      IndexPhase::Building
    } else {
      IndexPhase::Ready
    };

    IndexState {
      total: self.store.total(),
      pending,
      in_flight,
      failed: self.tally.failed,
      unsupported: self.tally.unsupported,
      indexed: self.tally.indexed,
      discarded: self.discarded,
      phase,
    }
  }

  fn publish(&self) {
    let next = self.state();
    self.status_tx.send_if_modified(|current| {
      if *current == next {
        return false;
      }
      if next.phase != current.phase {
        match next.phase {
          IndexPhase::Ready => info!(
            indexed = next.indexed,
            failed = next.failed,
            unsupported = next.unsupported,
            "Index ready"
          ),
          phase => debug!(?phase, pending = next.pending, "Index phase changed"),
        }
      }
      *current = next;
      true
    });
  }

  async fn shutdown(&mut self) {
    let results = self.pool.shutdown(self.config.shutdown_grace).await;
    let succeeded = results.iter().filter(|r| r.is_success()).count();
    debug!(drained = results.len(), succeeded, "Applying results drained at shutdown");
    for result in results {
      self.on_result(result);
    }
    self.loading.clear();
    self.publish();
  }
}

async fn sleep_until(deadline: Option<Instant>) {
  match deadline {
    Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
    None => std::future::pending().await,
  }
}
