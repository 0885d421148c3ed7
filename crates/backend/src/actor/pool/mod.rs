//! Worker pool manager
//!
//! The pool owns a fixed number of import worker slots, the job queue, and
//! the receiving end of the worker event channel. It is driven entirely by
//! its owner (the index coordinator task): the owner awaits
//! [`WorkerPool::next_event`], feeds events back through
//! [`WorkerPool::on_event`], calls [`WorkerPool::on_tick`] when
//! [`WorkerPool::next_wakeup`] passes, and calls [`WorkerPool::dispatch`]
//! after anything that may have freed a worker.
//!
//! # Worker states
//!
//! ```text
//!          dispatch              Completed
//!   Idle ───────────▶ Busy ──────────────────▶ Idle
//!    ▲                  │
//!    │ Ready            │ Exited / timed out
//!    │                  ▼
//!    └────────────── Restarting (replacement thread spawned)
//! ```
//!
//! A faulted worker's in-flight command is handed back to the owner as
//! [`PoolOutput::Orphaned`]; the owner decides whether it is still worth
//! requeueing.

pub mod queue;
pub mod throttle;

use std::{
  collections::HashSet,
  time::{Duration, Instant},
};

pub use queue::{Enqueued, JobQueue};
use serde::Serialize;
pub use throttle::DutyCycle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::{
  message::{Generation, ImportCommand, ImportResult},
  worker::{self, WorkerCommand, WorkerEpoch, WorkerEvent, WorkerLink, WorkerSpawn},
};
use crate::{codec, domain::config::PoolConfig, import::ParserRegistry};

/// Delay before retrying a worker that failed to respawn
const RESPAWN_RETRY: Duration = Duration::from_secs(1);

// ============================================================================
// Errors and outputs
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
  #[error("Worker pool is shutting down")]
  ShuttingDown,
  #[error("Failed to spawn import worker: {0}")]
  Spawn(#[from] std::io::Error),
}

/// Something the pool hands back to its owner
#[derive(Debug)]
pub enum PoolOutput {
  /// A worker finished a job
  Result(ImportResult),
  /// A worker faulted while running this command
  Orphaned(ImportCommand),
}

// ============================================================================
// Worker handles
// ============================================================================

#[derive(Debug)]
struct BusyJob {
  command: ImportCommand,
  dispatched_at: Instant,
  deadline: Instant,
}

#[derive(Debug)]
enum WorkerState {
  Idle,
  Busy(BusyJob),
  Restarting,
}

#[derive(Debug)]
struct WorkerHandle {
  slot: usize,
  epoch: WorkerEpoch,
  state: WorkerState,
  /// `None` after a failed respawn, until the retry succeeds
  link: Option<WorkerLink>,
  /// Earliest instant the worker may take a job (duty-cycle pause) or be respawned
  available_at: Instant,
  busy_total: Duration,
  jobs_completed: u64,
  /// Leave the pool once no longer busy
  retire: bool,
}

impl WorkerHandle {
  fn busy_path(&self) -> Option<&str> {
    match &self.state {
      WorkerState::Busy(job) => Some(job.command.path.as_str()),
      _ => None,
    }
  }

  fn can_take_job(&self, now: Instant) -> bool {
    matches!(self.state, WorkerState::Idle) && self.link.is_some() && !self.retire && self.available_at <= now
  }
}

/// Public view of a worker's activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkerActivity {
  Idle,
  Busy { path: String, generation: Generation },
  Restarting,
}

/// Diagnostic snapshot of one worker slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
  pub slot: usize,
  pub epoch: WorkerEpoch,
  pub activity: WorkerActivity,
  pub jobs_completed: u64,
  pub busy_time: Duration,
}

// ============================================================================
// WorkerPool
// ============================================================================

pub struct WorkerPool {
  config: PoolConfig,
  parsers: ParserRegistry,
  queue: JobQueue,
  workers: Vec<WorkerHandle>,
  events_tx: mpsc::UnboundedSender<WorkerEvent>,
  events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
  accepting: bool,
  next_epoch: WorkerEpoch,
}

impl WorkerPool {
  /// Spawn `config.threads` workers.
  pub fn start(config: PoolConfig, parsers: ParserRegistry) -> Result<Self, PoolError> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let mut pool = Self {
      config,
      parsers,
      queue: JobQueue::new(),
      workers: Vec::new(),
      events_tx,
      events_rx,
      accepting: true,
      next_epoch: 0,
    };

    let now = Instant::now();
    for slot in 0..pool.config.threads {
      pool.add_worker(slot, now)?;
    }

    info!(
      threads = pool.config.threads,
      utilization = pool.config.utilization,
      formats = ?pool.parsers.formats(),
      "Worker pool started"
    );
    Ok(pool)
  }

  // ========================================================================
  // Queue operations
  // ========================================================================

  /// Queue a command, replacing any queued command for the same path.
  pub fn submit(&mut self, command: ImportCommand) -> Result<Enqueued, PoolError> {
    if !self.accepting {
      return Err(PoolError::ShuttingDown);
    }
    let path = command.path.clone();
    let generation = command.generation;
    let enqueued = self.queue.push(command);
    if enqueued == Enqueued::Replaced {
      debug!(path = %path, generation, "Superseded queued import job");
    }
    Ok(enqueued)
  }

  /// Drop the queued command for a path. In-flight jobs are not touched.
  pub fn cancel(&mut self, path: &str) -> Option<ImportCommand> {
    self.queue.remove(path)
  }

  /// Put an orphaned command back at the head of the queue.
  pub fn requeue(&mut self, command: ImportCommand) -> bool {
    self.accepting && self.queue.requeue(command)
  }

  /// Generation of the queued command for a path, if any
  pub fn queued_generation(&self, path: &str) -> Option<Generation> {
    self.queue.get(path).map(|c| c.generation)
  }

  pub fn is_in_flight(&self, path: &str) -> bool {
    self.workers.iter().any(|w| w.busy_path() == Some(path))
  }

  pub fn queued(&self) -> usize {
    self.queue.len()
  }

  pub fn in_flight(&self) -> usize {
    self.workers.iter().filter(|w| matches!(w.state, WorkerState::Busy(_))).count()
  }

  /// Number of worker slots, including restarting ones
  pub fn size(&self) -> usize {
    self.workers.len()
  }

  pub fn config(&self) -> &PoolConfig {
    &self.config
  }

  pub fn worker_status(&self) -> Vec<WorkerStatus> {
    let mut status: Vec<WorkerStatus> = self
      .workers
      .iter()
      .map(|w| WorkerStatus {
        slot: w.slot,
        epoch: w.epoch,
        activity: match &w.state {
          WorkerState::Idle => WorkerActivity::Idle,
          WorkerState::Busy(job) => WorkerActivity::Busy {
            path: job.command.path.clone(),
            generation: job.command.generation,
          },
          WorkerState::Restarting => WorkerActivity::Restarting,
        },
        jobs_completed: w.jobs_completed,
        busy_time: w.busy_total,
      })
      .collect();
    status.sort_by_key(|s| s.slot);
    status
  }

  // ========================================================================
  // Configuration
  // ========================================================================

  /// Resize the pool and retune every live worker.
  ///
  /// Growing spawns workers immediately. Shrinking retires idle workers at
  /// once and busy workers after their current job.
  pub fn configure(&mut self, threads: usize, utilization: f64) -> Result<(), PoolError> {
    if !self.accepting {
      return Err(PoolError::ShuttingDown);
    }
    self.config.threads = threads;
    self.config.utilization = utilization;

    for worker in &mut self.workers {
      worker.retire = worker.slot >= threads;
      if let Some(link) = &worker.link {
        link.send(WorkerCommand::Tune { utilization });
      }
    }

    self.workers.retain_mut(|worker| {
      if worker.retire && worker.busy_path().is_none() {
        if let Some(link) = worker.link.take() {
          link.detach();
        }
        debug!(slot = worker.slot, "Retired import worker");
        false
      } else {
        true
      }
    });

    let now = Instant::now();
    let present: HashSet<usize> = self.workers.iter().map(|w| w.slot).collect();
    for slot in (0..threads).filter(|slot| !present.contains(slot)) {
      self.add_worker(slot, now)?;
    }

    info!(threads, utilization, "Worker pool reconfigured");
    Ok(())
  }

  // ========================================================================
  // Dispatch
  // ========================================================================

  /// Hand queued jobs to every worker that can take one.
  ///
  /// A job whose path is already busy on another worker stays queued, so a
  /// path is never parsed twice at once. Returns the number dispatched.
  pub fn dispatch(&mut self, now: Instant) -> usize {
    let mut dispatched = 0;

    while !self.queue.is_empty() {
      let Some(idx) = self.workers.iter().position(|w| w.can_take_job(now)) else {
        break;
      };

      let workers = &self.workers;
      let Some(command) = self
        .queue
        .pop_eligible(|path| workers.iter().any(|w| w.busy_path() == Some(path)))
      else {
        break;
      };

      let worker = &mut self.workers[idx];
      let sent = worker
        .link
        .as_ref()
        .is_some_and(|link| link.send(WorkerCommand::Import(codec::encode(command.clone()))));

      if !sent {
        warn!(slot = worker.slot, path = %command.path, "Import worker unreachable, replacing it");
        self.queue.requeue(command);
        self.restart(idx, now);
        continue;
      }

      trace!(
        slot = worker.slot,
        path = %command.path,
        generation = command.generation,
        "Dispatched import job"
      );
      worker.state = WorkerState::Busy(BusyJob {
        command,
        dispatched_at: now,
        deadline: now + self.config.job_timeout,
      });
      dispatched += 1;
    }

    dispatched
  }

  // ========================================================================
  // Events
  // ========================================================================

  /// Wait for the next worker event.
  pub async fn next_event(&mut self) -> Option<WorkerEvent> {
    self.events_rx.recv().await
  }

  /// Earliest instant at which [`on_tick`](Self::on_tick) or
  /// [`dispatch`](Self::dispatch) could make progress without a new event.
  pub fn next_wakeup(&self) -> Option<Instant> {
    let has_work = !self.queue.is_empty();
    self
      .workers
      .iter()
      .filter_map(|w| match &w.state {
        WorkerState::Busy(job) => Some(job.deadline),
        WorkerState::Idle if has_work && !w.retire => Some(w.available_at),
        WorkerState::Restarting if w.link.is_none() => Some(w.available_at),
        _ => None,
      })
      .min()
  }

  /// Apply one worker event.
  pub fn on_event(&mut self, event: WorkerEvent, now: Instant) -> Vec<PoolOutput> {
    let Some(idx) = self.position(event.slot(), event.epoch()) else {
      trace!(slot = event.slot(), epoch = event.epoch(), "Ignoring event from replaced worker");
      return Vec::new();
    };

    match event {
      WorkerEvent::Ready { slot, .. } => {
        let worker = &mut self.workers[idx];
        if matches!(worker.state, WorkerState::Restarting) {
          worker.state = WorkerState::Idle;
          debug!(slot, "Replacement import worker ready");
        }
        Vec::new()
      }

      WorkerEvent::Completed {
        slot, wire, busy, pause, ..
      } => {
        let worker = &mut self.workers[idx];
        let job = match std::mem::replace(&mut worker.state, WorkerState::Idle) {
          WorkerState::Busy(job) => job,
          other => {
            worker.state = other;
            warn!(slot, "Import worker completed a job it was never given");
            return Vec::new();
          }
        };

        worker.busy_total += busy;
        worker.jobs_completed += 1;
        worker.available_at = now + pause;

        let result = self.read_result(&job, wire);
        trace!(
          slot,
          path = %job.command.path,
          generation = job.command.generation,
          failed = result.is_failure(),
          elapsed_ms = now.saturating_duration_since(job.dispatched_at).as_millis() as u64,
          pause_ms = pause.as_millis() as u64,
          "Import job completed"
        );

        if self.workers[idx].retire {
          self.remove_worker(idx);
        }
        vec![PoolOutput::Result(result)]
      }

      WorkerEvent::Exited { slot, .. } => {
        let state = std::mem::replace(&mut self.workers[idx].state, WorkerState::Restarting);
        self.restart(idx, now);
        match state {
          WorkerState::Busy(job) => {
            warn!(slot, path = %job.command.path, "Import worker exited mid-job");
            vec![PoolOutput::Orphaned(job.command)]
          }
          _ => {
            warn!(slot, "Import worker exited");
            Vec::new()
          }
        }
      }
    }
  }

  /// Replace workers stuck past their job deadline and retry failed respawns.
  pub fn on_tick(&mut self, now: Instant) -> Vec<PoolOutput> {
    let mut outputs = Vec::new();

    let expired: Vec<(usize, WorkerEpoch)> = self
      .workers
      .iter()
      .filter(|w| matches!(&w.state, WorkerState::Busy(job) if job.deadline <= now))
      .map(|w| (w.slot, w.epoch))
      .collect();

    for (slot, epoch) in expired {
      let Some(idx) = self.position(slot, epoch) else {
        continue;
      };
      if let WorkerState::Busy(job) = std::mem::replace(&mut self.workers[idx].state, WorkerState::Restarting) {
        warn!(
          slot,
          path = %job.command.path,
          timeout_ms = self.config.job_timeout.as_millis() as u64,
          "Import job timed out, replacing worker"
        );
        outputs.push(PoolOutput::Orphaned(job.command));
      }
      self.restart(idx, now);
    }

    if self.accepting {
      for idx in 0..self.workers.len() {
        let worker = &self.workers[idx];
        if worker.link.is_none() && worker.available_at <= now {
          self.respawn(idx, now);
        }
      }
    }

    outputs
  }

  // ========================================================================
  // Shutdown
  // ========================================================================

  /// Stop accepting work, drain in-flight jobs for up to `grace`, then
  /// release every worker. Returns the results that arrived while draining.
  pub async fn shutdown(&mut self, grace: Duration) -> Vec<ImportResult> {
    self.accepting = false;
    let dropped = self.queue.clear();
    let deadline = tokio::time::Instant::now() + grace;
    let mut results = Vec::new();

    while self.in_flight() > 0 {
      match tokio::time::timeout_at(deadline, self.events_rx.recv()).await {
        Ok(Some(event)) => {
          for output in self.on_event(event, Instant::now()) {
            match output {
              PoolOutput::Result(result) => results.push(result),
              PoolOutput::Orphaned(command) => {
                debug!(path = %command.path, "Dropping orphaned job during shutdown");
              }
            }
          }
        }
        Ok(None) | Err(_) => break,
      }
    }

    let abandoned = self.in_flight();
    for mut worker in self.workers.drain(..) {
      if let Some(link) = worker.link.take() {
        link.detach();
      }
    }

    info!(
      completed = results.len(),
      abandoned,
      dropped,
      "Worker pool shut down"
    );
    results
  }

  // ========================================================================
  // Internals
  // ========================================================================

  fn position(&self, slot: usize, epoch: WorkerEpoch) -> Option<usize> {
    self.workers.iter().position(|w| w.slot == slot && w.epoch == epoch)
  }

  fn read_result(&self, job: &BusyJob, wire: codec::Envelope) -> ImportResult {
    let command = &job.command;
    match codec::decode::<ImportResult>(wire) {
      Ok(result) if result.path == command.path && result.generation == command.generation => result,
      Ok(result) => ImportResult::failure(
        &command.path,
        command.generation,
        format!(
          "Worker answered for {} (generation {}) instead",
          result.path, result.generation
        ),
      ),
      Err(e) => {
        warn!(path = %command.path, error = %e, "Undecodable import result");
        ImportResult::failure(&command.path, command.generation, e.to_string())
      }
    }
  }

  fn spawn_setup(&mut self, slot: usize) -> WorkerSpawn {
    let epoch = self.next_epoch;
    self.next_epoch += 1;
    WorkerSpawn {
      slot,
      epoch,
      utilization: self.config.utilization,
      throttle_window: self.config.throttle_window,
      parsers: self.parsers.clone(),
      events: self.events_tx.clone(),
    }
  }

  fn add_worker(&mut self, slot: usize, now: Instant) -> Result<(), PoolError> {
    let setup = self.spawn_setup(slot);
    let epoch = setup.epoch;
    let link = worker::spawn(setup)?;
    trace!(slot, epoch, thread = link.thread_name(), "Spawned import worker");
    self.workers.push(WorkerHandle {
      slot,
      epoch,
      state: WorkerState::Idle,
      link: Some(link),
      available_at: now,
      busy_total: Duration::ZERO,
      jobs_completed: 0,
      retire: false,
    });
    Ok(())
  }

  fn remove_worker(&mut self, idx: usize) {
    let mut worker = self.workers.remove(idx);
    if let Some(link) = worker.link.take() {
      link.detach();
    }
    debug!(slot = worker.slot, "Retired import worker");
  }

  /// Tear down a faulted worker and start its replacement.
  fn restart(&mut self, idx: usize, now: Instant) {
    let worker = &mut self.workers[idx];
    worker.state = WorkerState::Restarting;
    if let Some(link) = worker.link.take() {
      link.detach();
    }
    if worker.retire || !self.accepting {
      self.remove_worker(idx);
      return;
    }
    self.respawn(idx, now);
  }

  fn respawn(&mut self, idx: usize, now: Instant) {
    let slot = self.workers[idx].slot;
    let setup = self.spawn_setup(slot);
    let epoch = setup.epoch;
    let worker = &mut self.workers[idx];
    worker.state = WorkerState::Restarting;

    match worker::spawn(setup) {
      Ok(link) => {
        info!(slot, epoch, "Respawned import worker");
        worker.epoch = epoch;
        worker.link = Some(link);
        worker.available_at = now;
      }
      Err(e) => {
        error!(slot, error = %e, "Failed to respawn import worker");
        worker.link = None;
        worker.available_at = now + RESPAWN_RETRY;
      }
    }
  }
}
