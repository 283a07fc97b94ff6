//! Local-process Channel: spawns one child per `execute`, its own session
//! so a kill reaches the whole process tree (§4.3).

use crate::channel::{Channel, ChannelState};
use async_trait::async_trait;
use ktest_core::{ExecutionRecord, KtestError, Result};
use ktest_process::{kill_process_group, spawn_process_group, terminate_process_group};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// The child handle lives behind a mutex, not a plain field, so `stop` and
/// `force_stop` can reach it from `&self` while `execute` holds no
/// conflicting exclusive borrow of `ProcessChannel` itself.
pub struct ProcessChannel {
    state: ChannelState,
    current_child: Mutex<Option<Child>>,
}

impl ProcessChannel {
    pub fn new() -> Self {
        Self {
            state: ChannelState::Idle,
            current_child: Mutex::new(None),
        }
    }
}

impl Default for ProcessChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for ProcessChannel {
    async fn start(&mut self) -> Result<()> {
        self.state = ChannelState::Idle;
        Ok(())
    }

    async fn stop(&self, _timeout: Duration) -> Result<()> {
        if let Some(child) = self.current_child.lock().await.as_ref() {
            terminate_process_group(child);
        }
        Ok(())
    }

    async fn force_stop(&self, _timeout: Duration) -> Result<()> {
        let mut current_child = self.current_child.lock().await;
        if let Some(child) = current_child.as_ref() {
            kill_process_group(child);
        }
        *current_child = None;
        Ok(())
    }

    async fn execute(
        &mut self,
        cmd: &str,
        timeout: Duration,
        cwd: Option<&str>,
        env: &[(String, String)],
        mut line_callback: Option<&mut dyn FnMut(&str)>,
    ) -> Result<ExecutionRecord> {
        self.state = ChannelState::Executing;
        let start = Instant::now();

        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        for (key, value) in env {
            command.env(key, value);
        }

        let mut child = spawn_process_group(command)
            .map_err(|e| KtestError::Internal(format!("failed to spawn child: {e}")))?;
        let mut stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| KtestError::Internal("child spawned without a stdout pipe".into()))?;

        let mut collected = String::new();
        let deadline = start + timeout;
        let mut buf = [0u8; 4096];
        let mut pending_line = String::new();

        // Published immediately so a concurrent `stop`/`force_stop` can
        // reach this child while the read loop below still owns it.
        *self.current_child.lock().await = Some(child);

        let returncode = loop {
            tokio::select! {
                read_result = stdout_pipe.read(&mut buf) => {
                    match read_result {
                        Ok(0) => {
                            let mut guard = self.current_child.lock().await;
                            let status = guard
                                .as_mut()
                                .expect("child published before the read loop started")
                                .wait()
                                .await
                                .map_err(|e| KtestError::Internal(format!("wait failed: {e}")))?;
                            break status.code().unwrap_or(ExecutionRecord::SIGTERM);
                        }
                        Ok(n) => {
                            let text = String::from_utf8_lossy(&buf[..n]);
                            for ch in text.chars() {
                                if ch == '\n' {
                                    if let Some(cb) = line_callback.as_deref_mut() {
                                        cb(&pending_line);
                                    }
                                    collected.push_str(&pending_line);
                                    collected.push('\n');
                                    pending_line.clear();
                                } else {
                                    pending_line.push(ch);
                                }
                            }
                        }
                        Err(e) => return Err(KtestError::Transport(format!("read from child failed: {e}"))),
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let mut guard = self.current_child.lock().await;
                    if let Some(c) = guard.as_ref() {
                        kill_process_group(c);
                    }
                    if let Some(c) = guard.as_mut() {
                        let _ = c.wait().await;
                    }
                    *guard = None;
                    drop(guard);
                    self.state = ChannelState::Idle;
                    return Ok(ExecutionRecord {
                        command: cmd.to_string(),
                        timeout_secs: timeout.as_secs_f64(),
                        returncode: ExecutionRecord::TIMED_OUT,
                        stdout: collected,
                        exec_time_secs: start.elapsed().as_secs_f64(),
                        cwd: cwd.map(str::to_string),
                        env: env.to_vec(),
                    });
                }
            }
        };

        *self.current_child.lock().await = None;
        self.state = ChannelState::Idle;
        Ok(ExecutionRecord {
            command: cmd.to_string(),
            timeout_secs: timeout.as_secs_f64(),
            returncode,
            stdout: collected,
            exec_time_secs: start.elapsed().as_secs_f64(),
            cwd: cwd.map(str::to_string),
            env: env.to_vec(),
        })
    }

    async fn fetch_file(&mut self, remote: &str, local: &Path, timeout: Duration) -> Result<()> {
        self.state = ChannelState::Fetching;
        let deadline = Instant::now() + timeout;

        let result: Result<()> = async {
            let mut source = tokio::fs::File::open(remote)
                .await
                .map_err(|e| KtestError::Transport(format!("cannot open {remote}: {e}")))?;
            let mut dest = tokio::fs::File::create(local).await.map_err(|e| {
                KtestError::Transport(format!("cannot create {}: {e}", local.display()))
            })?;

            let mut buf = [0u8; 4096];
            loop {
                if Instant::now() >= deadline {
                    return Err(KtestError::Timeout(timeout));
                }
                let n = source
                    .read(&mut buf)
                    .await
                    .map_err(|e| KtestError::Transport(format!("read failed: {e}")))?;
                if n == 0 {
                    return Ok(());
                }
                dest.write_all(&buf[..n])
                    .await
                    .map_err(|e| KtestError::Transport(format!("write failed: {e}")))?;
            }
        }
        .await;

        self.state = ChannelState::Idle;
        result
    }

    fn is_running(&self) -> bool {
        self.state.is_busy()
    }
}
