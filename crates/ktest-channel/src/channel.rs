//! Uniform command/file-transfer abstraction (§4.3). Three variants share
//! this one trait instead of the three-near-identical-siblings shape the
//! reference implementation uses (§9 rearchitecture note).

use async_trait::async_trait;
use ktest_core::{ExecutionRecord, Result};
use std::time::Duration;

/// One command/file-transfer endpoint: a local child process, an SSH
/// session, or a hypervisor guest's serial console.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Bring the channel up (connect, spawn, or otherwise become ready).
    async fn start(&mut self) -> Result<()>;

    /// Gracefully stop whatever is currently running on this channel.
    ///
    /// Takes `&self`, not `&mut self`: a caller must be able to interrupt an
    /// `execute` that is already in flight on another task holding the
    /// exclusive reference, so `stop` can only rely on interior mutability.
    async fn stop(&self, timeout: Duration) -> Result<()>;

    /// Forcefully tear the channel down. Same `&self` constraint as `stop`.
    async fn force_stop(&self, timeout: Duration) -> Result<()>;

    /// Run one command to completion (or until `timeout`/cancellation).
    ///
    /// `line_callback`, when given, is invoked once per completed stdout
    /// line, in arrival order, excluding the echoed command and the
    /// sentinel line.
    async fn execute(
        &mut self,
        cmd: &str,
        timeout: Duration,
        cwd: Option<&str>,
        env: &[(String, String)],
        line_callback: Option<&mut dyn FnMut(&str)>,
    ) -> Result<ExecutionRecord>;

    /// Copy `remote` from the channel's target into the local path `local`.
    async fn fetch_file(&mut self, remote: &str, local: &std::path::Path, timeout: Duration) -> Result<()>;

    fn is_running(&self) -> bool;
}

/// One explicit state field replacing the reference implementation's
/// independent `_stop`/`_running_command`/`_fetching_data`/`_initialized`
/// booleans (§9 rearchitecture note).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Executing,
    Fetching,
    Cancelling,
}

impl ChannelState {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Executing | Self::Fetching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_is_not_busy() {
        assert!(!ChannelState::Idle.is_busy());
    }

    #[test]
    fn test_executing_and_fetching_are_busy() {
        assert!(ChannelState::Executing.is_busy());
        assert!(ChannelState::Fetching.is_busy());
    }

    #[test]
    fn test_cancelling_is_not_busy() {
        assert!(!ChannelState::Cancelling.is_busy());
    }
}
