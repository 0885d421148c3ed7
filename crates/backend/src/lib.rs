//! docindex - incremental metadata index over a document corpus
//!
//! Documents are parsed by a bounded pool of import worker threads and their
//! metadata is committed to an in-memory index that readers can query at any
//! time. See [`actor`] for the coordinator and worker pool.

pub mod actor;
pub mod codec;
pub mod import;
pub mod store;

mod domain;
pub use domain::{config, document};

pub use actor::{IndexCoordinator, IndexHandle, IndexPhase, IndexState, StatusReporter};
pub use store::{IndexStore, QueryResult};
