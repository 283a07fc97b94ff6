use clap::{Parser, Subcommand};
use ktest_core::SerialType;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ktest", version, about = "Kernel-test orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand that runs suites against a SUT.
#[derive(clap::Args, Debug, Clone)]
pub struct CommonArgs {
    /// Suite manifest to run; repeatable.
    #[arg(long = "run-suite", value_name = "NAME")]
    pub run_suite: Vec<PathBuf>,

    /// Write a JSON report to this path; refuses to overwrite an existing file.
    #[arg(long, value_name = "PATH")]
    pub json_report: Option<PathBuf>,

    /// LTP install root. Defaults to the `LTPROOT` env var, then `/opt/ltp`.
    #[arg(long, value_name = "PATH")]
    pub ltp_root: Option<PathBuf>,

    /// Scratch directory for transport files and dmesg dumps.
    #[arg(long, value_name = "PATH")]
    pub tmp_dir: Option<PathBuf>,

    /// Per-suite time budget in seconds.
    #[arg(long, default_value_t = 3600)]
    pub suite_timeout: u64,

    /// Per-test time budget in seconds.
    #[arg(long, default_value_t = 3600)]
    pub test_timeout: u64,

    /// Optional TOML file supplying defaults for unspecified flags.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run suites against the local machine.
    Host {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Run suites against a qemu-booted guest reached over its serial console.
    Qemu {
        #[command(flatten)]
        common: CommonArgs,

        /// Guest disk image.
        #[arg(long, value_name = "PATH")]
        image: Option<PathBuf>,

        /// Boot from a throwaway copy-on-write overlay instead of `image` directly.
        #[arg(long)]
        image_overlay: bool,

        /// Root password for the login handshake.
        #[arg(long, default_value = "root")]
        password: String,

        /// Target architecture (selects `qemu-system-<ARCH>`). Defaults to the host's.
        #[arg(long)]
        system: Option<String>,

        /// Guest RAM in MiB.
        #[arg(long, default_value_t = 2048)]
        ram: u32,

        /// Guest vCPU count.
        #[arg(long, default_value_t = 2)]
        smp: u32,

        /// Host directory to mount into the guest over 9p as `host0`.
        #[arg(long, value_name = "PATH")]
        virtfs: Option<PathBuf>,

        /// Additional read-only drive image.
        #[arg(long, value_name = "PATH")]
        ro_image: Option<PathBuf>,

        /// Which pair of character devices backs the console + transport.
        #[arg(long, default_value = "isa")]
        serial_type: SerialType,

        /// Extra verbatim qemu arguments; repeatable.
        #[arg(long = "qemu-arg", value_name = "ARG")]
        qemu_args: Vec<String>,
    },
    /// Run suites against an SSH-reachable host.
    Ssh {
        #[command(flatten)]
        common: CommonArgs,

        /// Target hostname or address. Falls back to a `[ssh]` default in the config file.
        #[arg(long)]
        host: Option<String>,

        /// SSH port.
        #[arg(long, default_value_t = 22)]
        port: u16,

        /// SSH username.
        #[arg(long, default_value = "root")]
        user: String,

        /// Password authentication. Mutually exclusive with `--key-file` in practice,
        /// though the first one supplied wins if both are given.
        #[arg(long)]
        password: Option<String>,

        /// Private key file for public-key authentication.
        #[arg(long, value_name = "PATH")]
        key_file: Option<PathBuf>,

        /// Connection timeout in seconds.
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
    /// Build and install LTP from source for the detected distro.
    Install,
    /// Print the package list `install` would use for the detected distro.
    ShowDeps,
}
