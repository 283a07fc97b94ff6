//! Async process-group spawning and predicate-driven line reading shared by
//! the Channel variants.

pub mod line_reader;
pub mod process;

pub use line_reader::{LineReader, ReadUntilResult};
pub use process::{kill_process_group, spawn_process_group, terminate_process_group};
