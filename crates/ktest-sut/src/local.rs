//! The local machine itself, with no boot step (§4.5).

use crate::sut::Sut;
use async_trait::async_trait;
use ktest_channel::{Channel, ProcessChannel};
use ktest_core::Result;
use std::time::Duration;

pub struct LocalSut {
    channel: ProcessChannel,
}

impl LocalSut {
    pub fn new() -> Self {
        Self {
            channel: ProcessChannel::new(),
        }
    }
}

impl Default for LocalSut {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sut for LocalSut {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_sut_executes_through_process_channel() {
        let mut sut = LocalSut::new();
        sut.start().await.unwrap();
        let record = sut
            .channel()
            .execute("echo hi", Duration::from_secs(5), None, &[], None)
            .await
            .unwrap();
        assert_eq!(record.stdout, "hi\n");
    }
}
