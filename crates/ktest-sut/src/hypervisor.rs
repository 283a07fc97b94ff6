//! A qemu guest reached over its serial console (§4.5, §6 command-line
//! composition).

use crate::sut::Sut;
use async_trait::async_trait;
use ktest_channel::Channel;
use ktest_channel::SerialChannel;
use ktest_core::{KtestError, Result, SerialType};
use ktest_process::{kill_process_group, spawn_process_group, LineReader};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(180);
const PASSWORD_TIMEOUT: Duration = Duration::from_secs(30);
const SHELL_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the guest's virtual disk and (optionally) a host directory mount
/// come from, and how big the guest is.
#[derive(Debug, Clone)]
pub struct QemuOptions {
    pub image: PathBuf,
    pub image_overlay: bool,
    pub password: String,
    pub system: String,
    pub ram_mb: u32,
    pub smp: u32,
    pub virtfs: Option<PathBuf>,
    pub ro_image: Option<PathBuf>,
    pub serial_type: SerialType,
    pub extra_args: Vec<String>,
    pub tmp_dir: PathBuf,
}

/// Composes the `qemu-system-<arch>` command line per §6.
pub fn compose_qemu_command(opts: &QemuOptions, pid: u32) -> Command {
    let mut cmd = Command::new(format!("qemu-system-{}", opts.system));
    let tty_log = opts.tmp_dir.join(format!("ttyS0-{pid}.log"));
    let transport_path = opts.tmp_dir.join(format!("transport-{pid}"));

    cmd.arg("-enable-kvm")
        .arg("-display")
        .arg("none")
        .arg("-m")
        .arg(opts.ram_mb.to_string())
        .arg("-smp")
        .arg(opts.smp.to_string())
        .arg("-device")
        .arg("virtio-rng-pci")
        .arg("-drive")
        .arg(format!(
            "if=virtio,cache=unsafe,file={}",
            opts.image.display()
        ))
        .arg("-chardev")
        .arg(format!("stdio,id=tty,logfile={}", tty_log.display()));

    match opts.serial_type {
        SerialType::Isa => {
            cmd.arg("-serial")
                .arg("chardev:tty")
                .arg("-serial")
                .arg("chardev:transport");
        }
        SerialType::VirtIo => {
            cmd.arg("-device")
                .arg("virtio-serial")
                .arg("-device")
                .arg("virtconsole,chardev=tty")
                .arg("-device")
                .arg("virtserialport,chardev=transport");
        }
    }

    cmd.arg("-chardev")
        .arg(format!("file,id=transport,path={}", transport_path.display()));

    if let Some(ro_image) = &opts.ro_image {
        cmd.arg("-drive")
            .arg(format!("if=virtio,readonly=on,file={}", ro_image.display()));
    }
    if opts.virtfs.is_some() {
        cmd.arg("-virtfs").arg(format!(
            "local,path={},mount_tag=host0,security_model=mapped,id=host0",
            opts.virtfs.as_ref().unwrap().display()
        ));
    }

    for arg in &opts.extra_args {
        cmd.arg(arg);
    }

    let _ = opts.image_overlay; // overlay creation happens before spawn, at the CLI boundary

    cmd
}

pub struct HypervisorSut {
    opts: QemuOptions,
    process: Option<Child>,
    channel: Option<SerialChannel<ChildStdout, ChildStdin>>,
}

impl HypervisorSut {
    pub fn new(opts: QemuOptions) -> Self {
        Self {
            opts,
            process: None,
            channel: None,
        }
    }

    fn transport_path(&self, pid: u32) -> PathBuf {
        self.opts.tmp_dir.join(format!("transport-{pid}"))
    }
}

#[async_trait]
impl Sut for HypervisorSut {
    async fn start(&mut self) -> Result<()> {
        // pid is not known before spawn, so compose with a placeholder and
        // re-derive the real log paths from the spawned child's pid.
        let mut cmd = compose_qemu_command(&self.opts, std::process::id());
        cmd.stdin(std::process::Stdio::piped());
        let mut child = spawn_process_group(cmd)
            .map_err(|e| KtestError::Transport(format!("failed to spawn hypervisor: {e}")))?;
        let pid = child.id().unwrap_or(0);

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| KtestError::Internal("hypervisor spawned without stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KtestError::Internal("hypervisor spawned without stdout".into()))?;

        let mut handshake = LineReader::new(stdout);

        let deadline = Instant::now() + LOGIN_TIMEOUT;
        let result = handshake
            .read_until(deadline, |buf| ends_with(buf, "login:"), None)
            .await;
        if result.timed_out {
            return Err(KtestError::Protocol("guest never reached login prompt".into()));
        }
        tracing::info!("hypervisor login prompt seen");

        stdin
            .write_all(b"root\n")
            .await
            .map_err(|e| KtestError::Transport(format!("write to hypervisor stdin failed: {e}")))?;

        handshake.reset();
        let deadline = Instant::now() + PASSWORD_TIMEOUT;
        let result = handshake
            .read_until(
                deadline,
                |buf| ends_with(buf, "Password:") || ends_with(buf, "password:"),
                None,
            )
            .await;
        if result.timed_out {
            return Err(KtestError::Protocol("guest never asked for a password".into()));
        }

        stdin
            .write_all(format!("{}\n", self.opts.password).as_bytes())
            .await
            .map_err(|e| KtestError::Transport(format!("write to hypervisor stdin failed: {e}")))?;
        tracing::info!("hypervisor password sent");

        handshake.reset();
        let deadline = Instant::now() + SHELL_READY_TIMEOUT;
        let result = handshake
            .read_until(deadline, |buf| ends_with(buf, "#"), None)
            .await;
        if result.timed_out {
            return Err(KtestError::Protocol("guest shell never became ready".into()));
        }
        tracing::info!("hypervisor shell ready");

        let stdout = handshake.into_inner();
        let transport_path = self.transport_path(pid);
        let mut channel = SerialChannel::new(stdout, stdin, "vport1p1", transport_path);
        channel.start().await?;

        if let Some(virtfs) = &self.opts.virtfs {
            let mount_point = virtfs
                .file_name()
                .map(|n| format!("/mnt/{}", n.to_string_lossy()))
                .unwrap_or_else(|| "/mnt/host0".to_string());
            channel
                .execute(
                    &format!("mkdir -p {mount_point} && mount -t 9p -o trans=virtio,version=9p2000.L host0 {mount_point}"),
                    Duration::from_secs(30),
                    None,
                    &[],
                    None,
                )
                .await?;
        }

        self.process = Some(child);
        self.channel = Some(channel);
        Ok(())
    }

    async fn stop(&mut self, timeout: Duration) -> Result<()> {
        if let Some(channel) = &mut self.channel {
            // broken-pipe on the post-poweroff flush is expected; the guest
            // may have already torn its console down.
            let _ = channel
                .execute("poweroff", timeout, None, &[], None)
                .await;
        }
        if let Some(child) = &mut self.process {
            let _ = tokio::time::timeout(timeout, child.wait()).await;
        }
        Ok(())
    }

    async fn force_stop(&mut self, timeout: Duration) -> Result<()> {
        if let Some(child) = &self.process {
            kill_process_group(child);
        }
        if let Some(child) = &mut self.process {
            let deadline = Instant::now() + timeout;
            while Instant::now() < deadline {
                if let Ok(Some(_)) = child.try_wait() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
        Ok(())
    }

    fn channel(&mut self) -> &mut dyn Channel {
        self.channel
            .as_mut()
            .expect("HypervisorSut::channel called before start() succeeded")
    }
}

fn ends_with(buf: &[u8], needle: &str) -> bool {
    buf.ends_with(needle.as_bytes())
}
