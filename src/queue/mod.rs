//! Persisted queue entries and their lifecycle states.

pub mod entry;
pub mod state;

pub use entry::*;
pub use state::*;
