//! SSH Channel: one persistent connection opened at `start`, one remote
//! invocation per `execute` (§4.3).

use crate::channel::{Channel, ChannelState};
use async_trait::async_trait;
use ktest_core::{ExecutionRecord, KtestError, Result};
use russh::client::{self, Handle};
use russh::ChannelMsg;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How the SSH session authenticates against the target host.
#[derive(Debug, Clone)]
pub enum SshAuth {
    Password(String),
    KeyFile { path: String, passphrase: Option<String> },
}

/// `cd <cwd> && export K=V && ... && <cmd>`, the same framing CommandPrompt
/// uses, run here as a single remote invocation instead of over a console.
fn compose_command(cmd: &str, cwd: Option<&str>, env: &[(String, String)]) -> String {
    let mut composed = String::new();
    if let Some(cwd) = cwd {
        composed.push_str(&format!("cd {cwd} && "));
    }
    for (key, value) in env {
        composed.push_str(&format!("export {key}={value} && "));
    }
    composed.push_str(cmd);
    composed
}

struct NoHostKeyCheck;

impl client::Handler for NoHostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // SUTs under test are ephemeral/disposable; there is no known_hosts
        // identity worth pinning.
        Ok(true)
    }
}

/// The live handle sits behind a mutex so `force_stop` can disconnect it
/// from `&self` while `execute`/`fetch_file` hold `&mut self` exclusively
/// (in practice never both at once — `get_mut` is used there instead).
pub struct SshChannel {
    host: String,
    port: u16,
    user: String,
    auth: SshAuth,
    state: ChannelState,
    session: tokio::sync::Mutex<Option<Handle<NoHostKeyCheck>>>,
}

impl SshChannel {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, auth: SshAuth) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            auth,
            state: ChannelState::Idle,
            session: tokio::sync::Mutex::new(None),
        }
    }

    fn session_mut(&mut self) -> Result<&mut Handle<NoHostKeyCheck>> {
        self.session
            .get_mut()
            .as_mut()
            .ok_or_else(|| KtestError::Transport("SSH channel not started".into()))
    }
}

#[async_trait]
impl Channel for SshChannel {
    async fn start(&mut self) -> Result<()> {
        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, (self.host.as_str(), self.port), NoHostKeyCheck)
            .await
            .map_err(|e| KtestError::Transport(format!("SSH connect to {}:{} failed: {e}", self.host, self.port)))?;

        let authenticated = match &self.auth {
            SshAuth::Password(password) => handle
                .authenticate_password(&self.user, password)
                .await
                .map_err(|e| KtestError::Transport(format!("SSH auth failed: {e}")))?,
            SshAuth::KeyFile { path, passphrase } => {
                let key_pair = russh_keys::load_secret_key(path, passphrase.as_deref())
                    .map_err(|e| KtestError::Config(format!("cannot load SSH key {path}: {e}")))?;
                handle
                    .authenticate_publickey(&self.user, Arc::new(key_pair))
                    .await
                    .map_err(|e| KtestError::Transport(format!("SSH auth failed: {e}")))?
            }
        };

        if !authenticated {
            return Err(KtestError::Transport(
                "SSH server rejected authentication".into(),
            ));
        }

        *self.session.get_mut() = Some(handle);
        self.state = ChannelState::Idle;
        Ok(())
    }

    async fn stop(&self, _timeout: Duration) -> Result<()> {
        // No in-flight command tracking beyond `execute`'s own channel; the
        // remote process is left to its own devices, matching §4.5's note
        // that SSH reboot/stop is disconnect-only.
        Ok(())
    }

    async fn force_stop(&self, _timeout: Duration) -> Result<()> {
        if let Some(session) = self.session.lock().await.take() {
            let _ = session
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await;
        }
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
        let deadline = start + timeout;

        let composed = compose_command(cmd, cwd, env);

        let session = self.session_mut()?;
        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| KtestError::Transport(format!("cannot open SSH channel: {e}")))?;
        channel
            .exec(true, composed.as_bytes())
            .await
            .map_err(|e| KtestError::Transport(format!("exec over SSH failed: {e}")))?;

        let mut stdout = String::new();
        let mut pending_line = String::new();
        let mut returncode: Option<i32> = None;

        loop {
            if Instant::now() >= deadline {
                let _ = channel.close().await;
                self.state = ChannelState::Idle;
                return Ok(ExecutionRecord {
                    command: cmd.to_string(),
                    timeout_secs: timeout.as_secs_f64(),
                    returncode: ExecutionRecord::TIMED_OUT,
                    stdout,
                    exec_time_secs: start.elapsed().as_secs_f64(),
                    cwd: cwd.map(str::to_string),
                    env: env.to_vec(),
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let message = match tokio::time::timeout(remaining, channel.wait()).await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(_) => continue,
            };

            match message {
                ChannelMsg::Data { data } | ChannelMsg::ExtendedData { data, .. } => {
                    let text = String::from_utf8_lossy(&data).into_owned();
                    for ch in text.chars() {
                        if ch == '\n' {
                            if let Some(cb) = line_callback.as_deref_mut() {
                                cb(&pending_line);
                            }
                            stdout.push_str(&pending_line);
                            stdout.push('\n');
                            pending_line.clear();
                        } else {
                            pending_line.push(ch);
                        }
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    returncode = Some(exit_status as i32);
                }
                ChannelMsg::Eof | ChannelMsg::Close => break,
                _ => {}
            }
        }

        self.state = ChannelState::Idle;
        Ok(ExecutionRecord {
            command: cmd.to_string(),
            timeout_secs: timeout.as_secs_f64(),
            returncode: returncode.unwrap_or_default(),
            stdout,
            exec_time_secs: start.elapsed().as_secs_f64(),
            cwd: cwd.map(str::to_string),
            env: env.to_vec(),
        })
    }

    async fn fetch_file(&mut self, remote: &str, local: &Path, timeout: Duration) -> Result<()> {
        self.state = ChannelState::Fetching;
        let deadline = Instant::now() + timeout;

        let session = self.session_mut()?;
        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| KtestError::Transport(format!("cannot open SFTP channel: {e}")))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| KtestError::Transport(format!("cannot start SFTP subsystem: {e}")))?;

        let sftp = russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| KtestError::Transport(format!("SFTP handshake failed: {e}")))?;

        let result: Result<()> = async {
            let mut remote_file = sftp
                .open(remote)
                .await
                .map_err(|e| KtestError::Transport(format!("cannot open remote {remote}: {e}")))?;
            let mut local_file = tokio::fs::File::create(local).await.map_err(|e| {
                KtestError::Transport(format!("cannot create {}: {e}", local.display()))
            })?;

            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut buf = [0u8; 4096];
            loop {
                if Instant::now() >= deadline {
                    return Err(KtestError::Timeout(timeout));
                }
                let n = remote_file
                    .read(&mut buf)
                    .await
                    .map_err(|e| KtestError::Transport(format!("SFTP read failed: {e}")))?;
                if n == 0 {
                    return Ok(());
                }
                local_file
                    .write_all(&buf[..n])
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_command_with_cwd_and_env() {
        let env = vec![("LTPROOT".to_string(), "/opt/ltp".to_string())];
        let composed = compose_command("./runtest", Some("/opt/ltp/runtest"), &env);
        assert_eq!(
            composed,
            "cd /opt/ltp/runtest && export LTPROOT=/opt/ltp && ./runtest"
        );
    }

    #[test]
    fn test_compose_command_bare() {
        assert_eq!(compose_command("true", None, &[]), "true");
    }
}
