//! An SSH-reachable host. Reboot is not supported — `force_stop` just
//! disconnects (§4.5).

use crate::sut::Sut;
use async_trait::async_trait;
use ktest_channel::{Channel, SshAuth, SshChannel};
use ktest_core::Result;
use std::time::Duration;

pub struct SshSut {
    channel: SshChannel,
}

impl SshSut {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, auth: SshAuth) -> Self {
        Self {
            channel: SshChannel::new(host, port, user, auth),
        }
    }
}

#[async_trait]
impl Sut for SshSut {
    async fn start(&mut self) -> Result<()> {
        self.channel.start().await
    }

    async fn stop(&mut self, timeout: Duration) -> Result<()> {
        self.channel.stop(timeout).await
    }

    async fn force_stop(&mut self, timeout: Duration) -> Result<()> {
        self.channel.force_stop(timeout).await
    }

    fn channel(&mut self) -> &mut dyn Channel {
        &mut self.channel
    }
}
