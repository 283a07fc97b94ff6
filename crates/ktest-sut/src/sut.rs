//! SUT lifecycle abstraction (§4.5): bring a target machine up, hand back
//! its Channel, tear it down.

use async_trait::async_trait;
use ktest_channel::Channel;
use ktest_core::Result;
use std::time::Duration;

/// A system under test: a local machine, an SSH-reachable host, or a
/// hypervisor guest. Each variant owns one concrete Channel internally and
/// exposes it as a trait object so the Dispatcher never needs to know which.
#[async_trait]
pub trait Sut: Send + Sync {
    /// Boot/connect/spawn, whatever bringing this target up requires.
    async fn start(&mut self) -> Result<()>;

    /// Graceful shutdown (e.g. `poweroff` over the console, SSH disconnect).
    async fn stop(&mut self, timeout: Duration) -> Result<()>;

    /// Unconditional teardown (SIGKILL the hypervisor, drop the SSH session).
    async fn force_stop(&mut self, timeout: Duration) -> Result<()>;

    /// The Channel this SUT communicates through.
    fn channel(&mut self) -> &mut dyn Channel;
}
