//! Hypervisor-guest Channel: CommandPrompt drives `execute`, FileTransport
//! drives `fetch_file` over a second character device (§4.3, §4.4).

use crate::channel::{Channel, ChannelState};
use crate::command_prompt::CommandPrompt;
use crate::file_transport::FileTransport;
use async_trait::async_trait;
use ktest_core::{ExecutionRecord, KtestError, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Wraps one `CommandPrompt` behind a mutex so concurrent callers serialize
/// onto the same console, plus the transport-file state for `fetch_file`.
///
/// The cancellation flag is kept outside the mutex: `stop()` must be able to
/// interrupt an `execute` that is already holding the lock, so it cannot
/// itself wait on that same lock.
pub struct SerialChannel<R, W> {
    prompt: Mutex<CommandPrompt<R, W>>,
    cancel_flag: Arc<AtomicBool>,
    transport: Mutex<FileTransport>,
    transport_device: String,
    state: ChannelState,
}

impl<R: AsyncRead + Unpin + Send, W: AsyncWrite + Unpin + Send> SerialChannel<R, W> {
    pub fn new(reader: R, writer: W, transport_device: impl Into<String>, transport_path: impl Into<PathBuf>) -> Self {
        let prompt = CommandPrompt::new(reader, writer);
        let cancel_flag = prompt.cancellation_flag();
        Self {
            prompt: Mutex::new(prompt),
            cancel_flag,
            transport: Mutex::new(FileTransport::new(transport_path)),
            transport_device: transport_device.into(),
            state: ChannelState::Idle,
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send, W: AsyncWrite + Unpin + Send> Channel for SerialChannel<R, W> {
    async fn start(&mut self) -> Result<()> {
        self.prompt.get_mut().start().await?;
        self.state = ChannelState::Idle;
        tracing::debug!(device = %self.transport_device, "serial channel ready");
        Ok(())
    }

    async fn stop(&self, _timeout: Duration) -> Result<()> {
        // Does not touch `self.state`: that field belongs to the task
        // holding the exclusive `execute`/`fetch_file` borrow, which sets
        // it back to Idle once it observes the cancellation.
        self.cancel_flag.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn force_stop(&self, timeout: Duration) -> Result<()> {
        self.stop(timeout).await
    }

    async fn execute(
        &mut self,
        cmd: &str,
        timeout: Duration,
        cwd: Option<&str>,
        env: &[(String, String)],
        line_callback: Option<&mut dyn FnMut(&str)>,
    ) -> Result<ExecutionRecord> {
        self.state = ChannelState::Executing;
        let mut prompt = self.prompt.lock().await;
        let record = prompt
            .execute(cmd, timeout, cwd, env, line_callback)
            .await;
        self.state = ChannelState::Idle;
        record
    }

    async fn fetch_file(&mut self, remote: &str, local: &Path, timeout: Duration) -> Result<()> {
        self.state = ChannelState::Fetching;
        let deadline = Instant::now() + timeout;

        let mut prompt = self.prompt.lock().await;
        let send_cmd = format!("cat {remote} > /dev/{}", self.transport_device);
        let record = prompt
            .execute(&send_cmd, timeout, None, &[], None)
            .await?;
        drop(prompt);

        if record.returncode != 0 && record.returncode != ktest_core::ExecutionRecord::SIGTERM {
            self.state = ChannelState::Idle;
            return Err(KtestError::Transport(format!(
                "transport write command exited {}",
                record.returncode
            )));
        }

        let mut transport = self.transport.lock().await;
        let result = transport.drain_into(local, deadline).await;
        self.state = ChannelState::Idle;
        result
    }

    fn is_running(&self) -> bool {
        self.state.is_busy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_new_starts_idle() {
        let (writer, _input) = duplex(16);
        let (_output, reader) = duplex(16);
        let channel = SerialChannel::new(reader, writer, "vport1p1", "/tmp/does-not-matter");
        assert!(!channel.is_running());
    }

    #[tokio::test]
    async fn test_stop_sets_cancel_flag_without_mut_access() {
        let (writer, _input) = duplex(16);
        let (_output, reader) = duplex(16);
        let channel = SerialChannel::new(reader, writer, "vport1p1", "/tmp/does-not-matter");
        channel.stop(Duration::from_secs(1)).await.unwrap();
        assert!(channel.cancel_flag.load(Ordering::SeqCst));
    }
}
