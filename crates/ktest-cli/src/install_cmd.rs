use crate::distro::Distro;
use anyhow::{Context, Result};

/// Builds and installs LTP from source for the detected distro. Out of the
/// Dispatcher/Channel/SUT core's scope (§6): shells out to the distro's
/// package manager, then `make install` in the LTP source tree.
pub fn handle_install(ltp_source: &std::path::Path) -> Result<()> {
    let distro = Distro::detect().context("detecting distro")?;
    distro
        .install_build_dependencies()
        .context("installing build dependencies")?;

    let status = std::process::Command::new("make")
        .arg("autotools")
        .current_dir(ltp_source)
        .status()
        .context("running make autotools")?;
    anyhow::ensure!(status.success(), "make autotools exited with {status}");

    let status = std::process::Command::new("./configure")
        .current_dir(ltp_source)
        .status()
        .context("running ./configure")?;
    anyhow::ensure!(status.success(), "./configure exited with {status}");

    let status = std::process::Command::new("make")
        .arg(format!("-j{}", std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)))
        .current_dir(ltp_source)
        .status()
        .context("running make")?;
    anyhow::ensure!(status.success(), "make exited with {status}");

    let status = std::process::Command::new("make")
        .arg("install")
        .current_dir(ltp_source)
        .status()
        .context("running make install")?;
    anyhow::ensure!(status.success(), "make install exited with {status}");

    Ok(())
}
