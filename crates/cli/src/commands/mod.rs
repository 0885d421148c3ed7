//! CLI command implementations

mod index;
mod watch;

pub use index::{IndexOptions, cmd_index};
pub use watch::cmd_watch;
