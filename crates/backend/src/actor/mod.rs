//! Actor-based indexing core
//!
//! The index is owned by one long-lived coordinator task. It talks to a pool
//! of import worker threads by message passing only; nothing mutable is
//! shared across the worker boundary.
//!
//! # Architecture
//!
//! ```text
//! IndexHandle ──CoordinatorMessage──▶ IndexCoordinator ──▶ IndexStore (committed reads)
//!                                       │        ▲
//!                              Envelope │        │ WorkerEvent
//!                                       ▼        │
//!                                 WorkerPool ─▶ import threads (one job each)
//! ```
//!
//! # Actors
//!
//! - [`IndexCoordinator`]: owns records, the pool and progress counters
//! - [`WorkerPool`]: job queue, dispatch, duty-cycle throttling, worker restarts
//! - [`worker`]: the per-thread import loop
//! - [`StatusReporter`]: read-only progress subscription

pub mod coordinator;
pub mod handle;
pub mod message;
pub mod pool;
pub mod source;
pub mod status;
pub mod worker;


pub use coordinator::{IndexCoordinator, IndexError};
pub use handle::{IndexHandle, SendError};
pub use pool::{PoolError, PoolOutput, WorkerActivity, WorkerPool, WorkerStatus};
pub use source::{DocumentSource, FsDocumentSource, MemorySource, SourceError};
pub use status::{IndexPhase, IndexState, StatusReporter};
