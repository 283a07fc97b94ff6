//! Command multiplexer over an interactive shell byte stream (§4.2, the
//! serial core). Synthesizes command boundaries, exit codes, and
//! cancellation out of a single unframed byte stream.

use ktest_core::{ExecutionRecord, KtestError, Result};
use ktest_process::LineReader;
use rand::Rng;
use regex::Regex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

const CTRL_C: u8 = 0x03;
const TOKEN_LEN: usize = 10;
const INIT_TIMEOUT: Duration = Duration::from_secs(30);
const CANCEL_PROMPT_TIMEOUT: Duration = Duration::from_secs(10);
/// How often `execute`'s wait loop wakes up to check for external
/// cancellation, bounding cancel-to-CTRL-C latency.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// SIGTERM, used as the reported returncode on cancellation (§3 invariants).
pub const SIGTERM_RETURNCODE: i32 = ktest_core::ExecutionRecord::SIGTERM;

fn random_token() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Matches a sentinel line `N-CODE` anywhere in the accumulated text,
/// multiline so a partial trailing chunk never false-positives mid-line.
fn sentinel_regex(code: &str) -> Regex {
    Regex::new(&format!(r"(?m)^(\d+)-{code}$")).expect("sentinel pattern is always valid")
}

/// Multiplexes request/response command execution over one interactive
/// shell stream. Not `Sync` by itself — callers serialize access (the
/// Serial channel wraps it in a `tokio::sync::Mutex`). The cancellation
/// flag is a separate `Arc<AtomicBool>` so an external `stop()` can signal
/// the in-flight `execute` without needing `&mut self`.
pub struct CommandPrompt<R, W> {
    reader: LineReader<R>,
    writer: W,
    prompt_marker: String,
    cancel_requested: Arc<AtomicBool>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> CommandPrompt<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: LineReader::new(reader),
            writer,
            prompt_marker: String::new(),
            cancel_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clone of the cancellation flag, to be handed to whatever external
    /// caller may need to interrupt an in-flight `execute` (e.g. the
    /// `SerialChannel::stop` implementation).
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_requested)
    }

    /// Install the `PS1` prompt marker. Must succeed before the first `execute`.
    pub async fn start(&mut self) -> Result<()> {
        let token = random_token();
        self.prompt_marker = format!("#{token}#");

        let install = format!("export PS1='{}'\n", self.prompt_marker);
        self.write_all(install.as_bytes()).await?;
        self.write_all(b"\n").await?;

        let target = format!("\n{}", self.prompt_marker);
        let deadline = Instant::now() + INIT_TIMEOUT;
        let result = self
            .reader
            .read_until(deadline, |buf| ends_with_str(buf, &target), None)
            .await;

        if result.timed_out {
            return Err(KtestError::Protocol(
                "prompt not available: PS1 token never appeared".into(),
            ));
        }
        self.reader.reset();
        Ok(())
    }

    /// Run one command to completion (§4.2 command framing).
    pub async fn execute(
        &mut self,
        cmd: &str,
        timeout: Duration,
        cwd: Option<&str>,
        env: &[(String, String)],
        mut line_callback: Option<&mut dyn FnMut(&str)>,
    ) -> Result<ExecutionRecord> {
        let code = random_token();
        let sentinel_cmd = format!("echo $?-{code}");
        let mut composed = String::new();
        if let Some(cwd) = cwd {
            composed.push_str(&format!("cd {cwd} && "));
        }
        for (key, value) in env {
            composed.push_str(&format!("export {key}={value} && "));
        }
        composed.push_str(cmd);

        self.write_all(format!("{composed}\n").as_bytes()).await?;
        self.write_all(format!("{sentinel_cmd}\n").as_bytes())
            .await?;

        let sentinel_re = sentinel_regex(&code);
        let start = Instant::now();
        let deadline = start + timeout;

        self.reader.reset();
        let mut forward = |line: &str| {
            if line == composed || line == sentinel_cmd || sentinel_re.is_match(line) {
                return;
            }
            if let Some(cb) = line_callback.as_deref_mut() {
                cb(line);
            }
        };

        let buffer = loop {
            if Instant::now() >= deadline {
                return self.on_timeout(cmd, timeout, cwd, env).await;
            }
            if self.cancel_requested.load(Ordering::SeqCst) {
                return self.on_cancel(cmd, timeout, cwd, env).await;
            }

            let sub_deadline = std::cmp::min(deadline, Instant::now() + CANCEL_POLL_INTERVAL);
            let result = self
                .reader
                .read_until(
                    sub_deadline,
                    |buf| sentinel_re.is_match(&String::from_utf8_lossy(buf)),
                    Some(&mut forward),
                )
                .await;

            if !result.timed_out {
                break result.buffer;
            }
            // sub_deadline elapsing is just a cancellation/deadline poll tick,
            // not a real protocol timeout — loop and check again.
        };

        let text = String::from_utf8_lossy(&buffer);
        let caps = sentinel_re.captures(&text).ok_or_else(|| {
            KtestError::Internal("sentinel predicate matched but regex found nothing".into())
        })?;
        let returncode: i32 = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or_default();
        let match_start = caps.get(0).map(|m| m.start()).unwrap_or(text.len());
        let mut stdout = String::new();
        for line in text[..match_start].lines() {
            if line == composed || line == sentinel_cmd {
                continue;
            }
            stdout.push_str(line);
            stdout.push('\n');
        }

        Ok(ExecutionRecord {
            command: cmd.to_string(),
            timeout_secs: timeout.as_secs_f64(),
            returncode,
            stdout,
            exec_time_secs: start.elapsed().as_secs_f64(),
            cwd: cwd.map(str::to_string),
            env: env.to_vec(),
        })
    }

    async fn on_timeout(
        &mut self,
        cmd: &str,
        timeout: Duration,
        cwd: Option<&str>,
        env: &[(String, String)],
    ) -> Result<ExecutionRecord> {
        self.send_ctrl_c_and_await_prompt().await?;
        Ok(ExecutionRecord {
            command: cmd.to_string(),
            timeout_secs: timeout.as_secs_f64(),
            returncode: ExecutionRecord::TIMED_OUT,
            stdout: String::new(),
            exec_time_secs: timeout.as_secs_f64(),
            cwd: cwd.map(str::to_string),
            env: env.to_vec(),
        })
    }

    async fn on_cancel(
        &mut self,
        cmd: &str,
        timeout: Duration,
        cwd: Option<&str>,
        env: &[(String, String)],
    ) -> Result<ExecutionRecord> {
        self.send_ctrl_c_and_await_prompt().await?;
        self.cancel_requested.store(false, Ordering::SeqCst);
        Ok(ExecutionRecord {
            command: cmd.to_string(),
            timeout_secs: timeout.as_secs_f64(),
            returncode: SIGTERM_RETURNCODE,
            stdout: String::new(),
            exec_time_secs: timeout.as_secs_f64(),
            cwd: cwd.map(str::to_string),
            env: env.to_vec(),
        })
    }

    /// External cancellation entry point for callers that already hold
    /// `&mut self` (mainly tests — real callers use `cancellation_flag`).
    pub async fn cancel(&mut self) -> Result<()> {
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.send_ctrl_c_and_await_prompt().await
    }

    async fn send_ctrl_c_and_await_prompt(&mut self) -> Result<()> {
        self.write_all(&[CTRL_C]).await?;
        let target = self.prompt_marker.clone();
        let deadline = Instant::now() + CANCEL_PROMPT_TIMEOUT;
        self.reader.reset();
        self.reader
            .read_until(deadline, |buf| ends_with_str(buf, &target), None)
            .await;
        self.reader.reset();
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|e| KtestError::Transport(format!("write to shell stream failed: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| KtestError::Transport(format!("flush of shell stream failed: {e}")))
    }
}

fn ends_with_str(buf: &[u8], needle: &str) -> bool {
    buf.ends_with(needle.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn handshake_pair() -> (
        CommandPrompt<impl AsyncRead + Unpin, impl AsyncWrite + Unpin>,
        tokio::io::DuplexStream,
    ) {
        // one duplex models the guest's input (what CommandPrompt writes),
        // the other models its output (what CommandPrompt reads).
        let (prompt_writer, mut shell_input) = duplex(4096);
        let (mut shell_output, prompt_reader) = duplex(4096);
        let prompt = CommandPrompt::new(prompt_reader, prompt_writer);

        // A minimal fake shell: echoes back the PS1 install + marker, and
        // answers every sentinel command with `0-<code>`, matching how a
        // real shell would reply to `echo $?-CODE` after a successful command.
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut buf = [0u8; 4096];
            loop {
                let n = match shell_input.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let text = String::from_utf8_lossy(&buf[..n]).to_string();
                for line in text.lines() {
                    if let Some(marker) = line
                        .strip_prefix("export PS1='")
                        .and_then(|s| s.strip_suffix('\''))
                    {
                        if shell_output
                            .write_all(format!("\n{marker}").as_bytes())
                            .await
                            .is_err()
                        {
                            return;
                        }
                    } else if let Some(rest) = line.strip_prefix("echo $?-") {
                        if shell_output
                            .write_all(format!("0-{rest}\n").as_bytes())
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
        });

        (prompt, shell_output)
    }

    #[tokio::test]
    async fn test_start_installs_prompt_marker() {
        let (mut prompt, _keep_alive) = handshake_pair().await;
        prompt.start().await.expect("start should succeed");
        assert!(prompt.prompt_marker.starts_with('#'));
        assert!(prompt.prompt_marker.ends_with('#'));
    }

    #[tokio::test]
    async fn test_execute_returns_zero_for_true_like_command() {
        let (mut prompt, _keep_alive) = handshake_pair().await;
        prompt.start().await.expect("start should succeed");
        let record = prompt
            .execute("true", Duration::from_secs(5), None, &[], None)
            .await
            .expect("execute should succeed");
        assert_eq!(record.returncode, 0);
    }

    #[tokio::test]
    async fn test_execute_does_not_leak_echo_into_stdout() {
        let (mut prompt, _keep_alive) = handshake_pair().await;
        prompt.start().await.expect("start should succeed");
        let record = prompt
            .execute("true", Duration::from_secs(5), None, &[], None)
            .await
            .expect("execute should succeed");
        assert!(!record.stdout.contains("true"));
        assert!(!record.stdout.contains("echo $?-"));
    }

    #[tokio::test]
    async fn test_cancel_flag_interrupts_a_hanging_command() {
        let (mut prompt, _keep_alive) = handshake_pair().await;
        prompt.start().await.expect("start should succeed");
        let cancel_flag = prompt.cancellation_flag();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel_flag.store(true, Ordering::SeqCst);
        });

        // the fake shell never answers "sleep 60"'s sentinel, so this only
        // returns if cancellation fires.
        let record = prompt
            .execute("sleep 60", Duration::from_secs(30), None, &[], None)
            .await
            .expect("execute should return once cancelled");
        assert_eq!(record.returncode, SIGTERM_RETURNCODE);
    }

    #[test]
    fn test_sentinel_regex_matches_exact_code() {
        let re = sentinel_regex("AbC1234567");
        assert!(re.is_match("0-AbC1234567"));
        assert!(re.is_match("137-AbC1234567"));
        assert!(!re.is_match("0-AbC1234567 trailing"));
        assert!(!re.is_match("not a match"));
    }

    #[test]
    fn test_random_token_is_right_length_and_alnum() {
        let token = random_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
