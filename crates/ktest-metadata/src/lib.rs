//! Suite-manifest parsing and result classification.

pub mod classifier;
pub mod suite_reader;

pub use classifier::classify;
pub use suite_reader::read_suite;
