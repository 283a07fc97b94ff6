//! Secondary-character-device bulk transfer path for a hypervisor guest
//! (§4.4). CommandPrompt's console handles request/response; this handles
//! moving bytes that do not fit comfortably through that protocol.

use ktest_core::{KtestError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::time::Instant;

const CHUNK_SIZE: usize = 4096;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Host-side tail of a guest's secondary serial device. The guest writes to
/// `TRANSPORT_DEV`; the host reads the growing file at `TRANSPORT_PATH`.
///
/// `last_offset` persists across `fetch` calls on the same instance, so
/// repeated fetches over one hypervisor session keep draining the same
/// host-side file rather than re-reading bytes already delivered.
pub struct FileTransport {
    transport_path: PathBuf,
    last_offset: u64,
}

impl FileTransport {
    pub fn new(transport_path: impl Into<PathBuf>) -> Self {
        Self {
            transport_path: transport_path.into(),
            last_offset: 0,
        }
    }

    /// Drain whatever was appended to the transport file after the guest
    /// finishes `cat <remote> > /dev/TRANSPORT_DEV`, into `local`.
    ///
    /// Callers are expected to have already issued that `cat` through the
    /// console and confirmed its returncode; this only drains the resulting
    /// bytes.
    pub async fn drain_into(&mut self, local: &Path, deadline: Instant) -> Result<()> {
        let target_size = self.wait_for_file_size(deadline).await?;

        let mut local_file = File::create(local).await.map_err(|e| {
            KtestError::Transport(format!("cannot create local file {}: {e}", local.display()))
        })?;

        loop {
            if self.last_offset >= target_size {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(KtestError::Timeout(Duration::ZERO));
            }

            let mut source = File::open(&self.transport_path).await.map_err(|e| {
                KtestError::Transport(format!(
                    "cannot open transport file {}: {e}",
                    self.transport_path.display()
                ))
            })?;
            source
                .seek(std::io::SeekFrom::Start(self.last_offset))
                .await
                .map_err(|e| KtestError::Transport(format!("seek failed: {e}")))?;

            let mut buf = [0u8; CHUNK_SIZE];
            let n = source
                .read(&mut buf)
                .await
                .map_err(|e| KtestError::Transport(format!("read failed: {e}")))?;
            if n == 0 {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            local_file
                .write_all(&buf[..n])
                .await
                .map_err(|e| KtestError::Transport(format!("write to local file failed: {e}")))?;
            self.last_offset += n as u64;
        }
    }

    async fn wait_for_file_size(&self, deadline: Instant) -> Result<u64> {
        loop {
            if let Ok(metadata) = tokio::fs::metadata(&self.transport_path).await {
                if metadata.len() > self.last_offset {
                    return Ok(metadata.len());
                }
            }
            if Instant::now() >= deadline {
                return Err(KtestError::Timeout(Duration::ZERO));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
