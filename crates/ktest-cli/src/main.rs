use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;
mod distro;
mod host_cmd;
mod install_cmd;
mod qemu_cmd;
mod show_deps_cmd;
mod ssh_cmd;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    let all_passed = match cli.command {
        Commands::Host { common } => host_cmd::handle_host(common).await?,
        Commands::Qemu {
            common,
            image,
            image_overlay,
            password,
            system,
            ram,
            smp,
            virtfs,
            ro_image,
            serial_type,
            qemu_args,
        } => {
            qemu_cmd::handle_qemu(
                common,
                image,
                image_overlay,
                password,
                system,
                ram,
                smp,
                virtfs,
                ro_image,
                serial_type,
                qemu_args,
            )
            .await?
        }
        Commands::Ssh {
            common,
            host,
            port,
            user,
            password,
            key_file,
            timeout,
        } => ssh_cmd::handle_ssh(common, host, port, user, password, key_file, timeout).await?,
        Commands::Install => {
            let cwd = std::env::current_dir()?;
            install_cmd::handle_install(&cwd)?;
            true
        }
        Commands::ShowDeps => {
            show_deps_cmd::handle_show_deps()?;
            true
        }
    };

    std::process::exit(if all_passed { 0 } else { 1 });
}
