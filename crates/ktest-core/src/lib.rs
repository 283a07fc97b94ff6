//! Shared data model, error type, taint decoder, and observer trait for the
//! kernel-test orchestrator.

pub mod error;
pub mod events;
pub mod taint;
pub mod types;

pub use error::{KtestError, Result};
pub use events::{Events, NullEvents, TaintEvent};
pub use types::{
    ExecContext, ExecutionRecord, ResultCounters, SerialType, Suite, SuiteResult, SutInfo, Test,
    TestResult,
};
