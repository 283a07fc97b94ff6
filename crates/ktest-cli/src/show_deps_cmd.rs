use crate::distro::Distro;
use anyhow::{Context, Result};

pub fn handle_show_deps() -> Result<()> {
    let distro = Distro::detect().context("detecting distro")?;
    for package in distro.build_dependencies() {
        println!("{package}");
    }
    Ok(())
}
