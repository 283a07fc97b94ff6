use crate::cli::CommonArgs;
use crate::commands::{load_file_config, run_suites};
use anyhow::{bail, Context, Result};
use ktest_core::SerialType;
use ktest_sut::{HypervisorSut, QemuOptions};
use std::path::{Path, PathBuf};

#[allow(clippy::too_many_arguments)]
pub async fn handle_qemu(
    common: CommonArgs,
    image: Option<PathBuf>,
    image_overlay: bool,
    password: String,
    system: Option<String>,
    ram: u32,
    smp: u32,
    virtfs: Option<PathBuf>,
    ro_image: Option<PathBuf>,
    serial_type: SerialType,
    qemu_args: Vec<String>,
) -> Result<bool> {
    let file_config = load_file_config(&common)?;
    let qemu_defaults = file_config.as_ref().and_then(|c| c.qemu.as_ref());

    let image = image
        .or_else(|| qemu_defaults.and_then(|q| q.image.clone()))
        .context("qemu requires --image (or a [qemu] image in the config file)")?;
    let password = if password != "root" {
        password
    } else {
        qemu_defaults.map(|q| q.password.clone()).unwrap_or(password)
    };
    let system = system
        .or_else(|| qemu_defaults.and_then(|q| q.system.clone()))
        .unwrap_or_else(|| std::env::consts::ARCH.to_string());
    let virtfs = virtfs.or_else(|| qemu_defaults.and_then(|q| q.virtfs.clone()));
    let ro_image = ro_image.or_else(|| qemu_defaults.and_then(|q| q.ro_image.clone()));
    let ram = if ram != 2048 {
        ram
    } else {
        qemu_defaults.map(|q| q.ram_mb).unwrap_or(ram)
    };
    let smp = if smp != 2 {
        smp
    } else {
        qemu_defaults.map(|q| q.smp).unwrap_or(smp)
    };
    let serial_type = qemu_defaults
        .and_then(|q| q.serial_type)
        .filter(|_| serial_type == SerialType::Isa)
        .unwrap_or(serial_type);

    let tmp_dir = common
        .tmp_dir
        .clone()
        .or_else(|| std::env::var("TMPDIR").ok().map(PathBuf::from))
        .unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&tmp_dir)
        .with_context(|| format!("creating tmp dir {}", tmp_dir.display()))?;

    let effective_image = if image_overlay {
        create_overlay(&image, &tmp_dir)?
    } else {
        image
    };

    let opts = QemuOptions {
        image: effective_image,
        image_overlay,
        password,
        system,
        ram_mb: ram,
        smp,
        virtfs,
        ro_image,
        serial_type,
        extra_args: qemu_args,
        tmp_dir,
    };

    let sut = HypervisorSut::new(opts);
    run_suites(sut, &common, file_config.as_ref()).await
}

/// Creates a qcow2 overlay backed by `base_image` so the guest never writes
/// into the caller's golden image.
fn create_overlay(base_image: &Path, tmp_dir: &Path) -> Result<PathBuf> {
    let overlay_path = tmp_dir.join(format!("overlay-{}.qcow2", std::process::id()));
    let status = std::process::Command::new("qemu-img")
        .arg("create")
        .arg("-f")
        .arg("qcow2")
        .arg("-b")
        .arg(base_image)
        .arg("-F")
        .arg("qcow2")
        .arg(&overlay_path)
        .status()
        .context("spawning qemu-img to create an overlay")?;
    if !status.success() {
        bail!("qemu-img create exited with {status}");
    }
    Ok(overlay_path)
}
