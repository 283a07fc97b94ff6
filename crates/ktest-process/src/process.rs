//! Spawning a child in its own process group and delivering signals to that
//! group. Grounds `ProcessChannel` (§4.3) and the hypervisor child process
//! (§4.5).

use anyhow::{Context, Result};
use tokio::process::{Child, Command};

/// Spawn `cmd` with piped stdin/stdout/stderr, isolated into its own session
/// so a signal sent to `-pid` reaches the whole tree it may fork.
pub fn spawn_process_group(mut cmd: Command) -> Result<Child> {
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.stdin(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    // SAFETY: setsid() is async-signal-safe and runs before exec in the child.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    cmd.spawn().context("failed to spawn child process")
}

/// Send SIGTERM to the child's process group (graceful stop).
pub fn terminate_process_group(child: &Child) {
    tracing::debug!(pid = ?child.id(), "sending SIGTERM to process group");
    send_signal_to_group(child, libc::SIGTERM);
}

/// Send SIGKILL to the child's process group (force stop / idle-timeout kill).
pub fn kill_process_group(child: &Child) {
    tracing::debug!(pid = ?child.id(), "sending SIGKILL to process group");
    send_signal_to_group(child, libc::SIGKILL);
}

#[cfg(unix)]
fn send_signal_to_group(child: &Child, signal: i32) {
    if let Some(pid) = child.id() {
        // SAFETY: kill() is async-signal-safe; negative PID targets the process group.
        unsafe {
            libc::kill(-(pid as i32), signal);
        }
    }
}

#[cfg(not(unix))]
fn send_signal_to_group(_child: &Child, _signal: i32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_process_group_pipes_all_three_streams() {
        let cmd = Command::new("echo");
        let child = spawn_process_group(cmd).expect("spawn should succeed");
        assert!(child.stdout.is_some());
        assert!(child.stderr.is_some());
        assert!(child.stdin.is_some());
    }

    #[tokio::test]
    async fn test_kill_process_group_stops_a_sleeping_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let mut child = spawn_process_group(cmd).expect("spawn should succeed");
        kill_process_group(&child);
        let status = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait())
            .await
            .expect("child should exit promptly after SIGKILL")
            .expect("wait should succeed");
        assert!(!status.success());
    }
}
