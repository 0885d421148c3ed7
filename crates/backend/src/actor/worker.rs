//! Import workers
//!
//! An import worker is a dedicated OS thread that parses one document at a
//! time. It shares no mutable state with the coordinator: commands arrive as
//! codec [`Envelope`]s over a std channel, and results leave as envelopes on
//! the pool's event channel.
//!
//! ```text
//! pool ──WorkerCommand::Import(envelope)──▶ thread ──ImportWorker::handle──┐
//! pool ◀──WorkerEvent::Completed { wire, busy, pause }─────────────────────┘
//! ```
//!
//! The thread announces itself with [`WorkerEvent::Ready`] and always reports
//! [`WorkerEvent::Exited`] when it ends, including when it unwinds.

use std::{
  any::Any,
  io,
  panic::{self, AssertUnwindSafe},
  sync::mpsc as std_mpsc,
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{
  message::{ImportCommand, ImportResult},
  pool::throttle::DutyCycle,
};
use crate::{
  codec::{self, Envelope},
  import::ParserRegistry,
};

/// Identifies one incarnation of a worker slot. A respawned worker gets a new
/// epoch so that late events from the thread it replaced can be ignored.
pub type WorkerEpoch = u64;

// ============================================================================
// ImportWorker
// ============================================================================

/// The per-job import contract: one command in, exactly one result out.
#[derive(Debug, Clone)]
pub struct ImportWorker {
  parsers: ParserRegistry,
}

impl ImportWorker {
  pub fn new(parsers: ParserRegistry) -> Self {
    Self { parsers }
  }

  /// Parse one document.
  ///
  /// Unknown formats are `Unsupported`. Invalid UTF-8, parser errors and
  /// parser panics are all `Failure`, and the worker stays usable afterwards.
  pub fn import(&self, command: ImportCommand) -> ImportResult {
    let Some(parser) = self.parsers.get(&command.format) else {
      return ImportResult::unsupported(&command);
    };

    let content = match std::str::from_utf8(&command.payload) {
      Ok(content) => content,
      Err(e) => {
        return ImportResult::failure(
          &command.path,
          command.generation,
          format!("Document is not valid UTF-8: {}", e),
        );
      }
    };

    let parsed = panic::catch_unwind(AssertUnwindSafe(|| {
      parser.parse(&command.path, content, &command.metadata)
    }));

    match parsed {
      Ok(Ok(metadata)) => ImportResult::success(&command, metadata),
      Ok(Err(e)) => ImportResult::failure(&command.path, command.generation, e.to_string()),
      Err(payload) => ImportResult::failure(
        &command.path,
        command.generation,
        format!("Parser panicked: {}", panic_message(payload.as_ref())),
      ),
    }
  }

  /// Envelope-level entry point used by worker threads.
  pub fn handle(&self, envelope: Envelope) -> Envelope {
    match codec::decode::<ImportCommand>(envelope) {
      Ok(command) => codec::encode(self.import(command)),
      Err(e) => Envelope::error(e.to_string()),
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic".to_string()
  }
}

// ============================================================================
// Thread protocol
// ============================================================================

/// Pool → worker thread
#[derive(Debug)]
pub enum WorkerCommand {
  /// Parse the command inside the envelope
  Import(Envelope),
  /// Change the utilization target of the thread's duty cycle
  Tune { utilization: f64 },
}

/// Worker thread → pool
#[derive(Debug)]
pub enum WorkerEvent {
  /// The thread is running and waiting for commands
  Ready { slot: usize, epoch: WorkerEpoch },
  /// A job finished. `pause` is how long the worker must idle before its next job.
  Completed {
    slot: usize,
    epoch: WorkerEpoch,
    wire: Envelope,
    busy: Duration,
    pause: Duration,
  },
  /// The thread has ended
  Exited { slot: usize, epoch: WorkerEpoch },
}

impl WorkerEvent {
  pub fn slot(&self) -> usize {
    match self {
      Self::Ready { slot, .. } | Self::Completed { slot, .. } | Self::Exited { slot, .. } => *slot,
    }
  }

  pub fn epoch(&self) -> WorkerEpoch {
    match self {
      Self::Ready { epoch, .. } | Self::Completed { epoch, .. } | Self::Exited { epoch, .. } => *epoch,
    }
  }
}

/// Everything a worker thread needs to start.
#[derive(Debug, Clone)]
pub struct WorkerSpawn {
  pub slot: usize,
  pub epoch: WorkerEpoch,
  pub utilization: f64,
  pub throttle_window: Duration,
  pub parsers: ParserRegistry,
  pub events: mpsc::UnboundedSender<WorkerEvent>,
}

/// The pool's end of a running worker thread.
#[derive(Debug)]
pub struct WorkerLink {
  commands: std_mpsc::Sender<WorkerCommand>,
  thread: JoinHandle<()>,
}

impl WorkerLink {
  /// Send a command. Returns `false` if the thread is gone.
  pub fn send(&self, command: WorkerCommand) -> bool {
    self.commands.send(command).is_ok()
  }

  pub fn thread_name(&self) -> &str {
    self.thread.thread().name().unwrap_or("docindex-import")
  }

  /// Close the command channel and let the thread end on its own.
  ///
  /// An idle thread exits right away; a thread still parsing finishes its
  /// job first and its late events carry an epoch nobody listens for.
  pub fn detach(self) {
    drop(self.commands);
  }
}

/// Start a worker thread for a pool slot.
pub fn spawn(setup: WorkerSpawn) -> io::Result<WorkerLink> {
  let (commands, rx) = std_mpsc::channel();
  let thread = thread::Builder::new()
    .name(format!("docindex-import-{}", setup.slot))
    .spawn(move || run(setup, rx))?;
  Ok(WorkerLink { commands, thread })
}

/// Sends `Exited` when the thread ends, however it ends.
struct ExitGuard {
  slot: usize,
  epoch: WorkerEpoch,
  events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Drop for ExitGuard {
  fn drop(&mut self) {
    let _ = self.events.send(WorkerEvent::Exited {
      slot: self.slot,
      epoch: self.epoch,
    });
  }
}

fn run(setup: WorkerSpawn, commands: std_mpsc::Receiver<WorkerCommand>) {
  let WorkerSpawn {
    slot,
    epoch,
    utilization,
    throttle_window,
    parsers,
    events,
  } = setup;

  let _guard = ExitGuard {
    slot,
    epoch,
    events: events.clone(),
  };
  let worker = ImportWorker::new(parsers);
  let mut cycle = DutyCycle::new(utilization, throttle_window);

  if events.send(WorkerEvent::Ready { slot, epoch }).is_err() {
    return;
  }
  trace!(slot, epoch, "Import worker ready");

  while let Ok(command) = commands.recv() {
    match command {
      WorkerCommand::Tune { utilization } => {
        trace!(slot, utilization, "Import worker retuned");
        cycle.set_utilization(utilization);
      }
      WorkerCommand::Import(envelope) => {
        let start = Instant::now();
        let wire = worker.handle(envelope);
        let end = Instant::now();
        let pause = cycle.record(start, end);
        trace!(
          slot,
          busy_ratio = cycle.busy_ratio(end),
          pause_ms = pause.as_millis() as u64,
          "Import job parsed"
        );

        let completed = WorkerEvent::Completed {
          slot,
          epoch,
          wire,
          busy: end - start,
          pause,
        };
        if events.send(completed).is_err() {
          break;
        }
      }
    }
  }

  debug!(slot, epoch, "Import worker stopping");
}
