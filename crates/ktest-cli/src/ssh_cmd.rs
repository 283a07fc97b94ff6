use crate::cli::CommonArgs;
use crate::commands::{load_file_config, run_suites_with_start_timeout};
use anyhow::{bail, Context, Result};
use ktest_channel::SshAuth;
use ktest_sut::SshSut;
use std::path::PathBuf;
use std::time::Duration;

#[allow(clippy::too_many_arguments)]
pub async fn handle_ssh(
    common: CommonArgs,
    host: Option<String>,
    port: u16,
    user: String,
    password: Option<String>,
    key_file: Option<PathBuf>,
    timeout: u64,
) -> Result<bool> {
    let file_config = load_file_config(&common)?;
    let ssh_defaults = file_config.as_ref().and_then(|c| c.ssh.as_ref());

    let host = host
        .or_else(|| ssh_defaults.and_then(|s| s.host.clone()))
        .context("ssh requires --host (or a [ssh] default in the config file)")?;
    let port = if port != 22 {
        port
    } else {
        ssh_defaults.map(|s| s.port).unwrap_or(port)
    };
    let user = if user != "root" {
        user
    } else {
        ssh_defaults.map(|s| s.user.clone()).unwrap_or(user)
    };
    let password = password.or_else(|| ssh_defaults.and_then(|s| s.password.clone()));
    let key_file = key_file.or_else(|| ssh_defaults.and_then(|s| s.key_file.clone()));

    let auth = match (password, key_file) {
        (Some(password), _) => SshAuth::Password(password),
        (None, Some(path)) => SshAuth::KeyFile {
            path: path.to_string_lossy().into_owned(),
            passphrase: None,
        },
        (None, None) => bail!("ssh requires --password or --key-file (or a [ssh] default in the config file)"),
    };

    let sut = SshSut::new(host, port, user, auth);
    run_suites_with_start_timeout(
        sut,
        &common,
        file_config.as_ref(),
        Some(Duration::from_secs(timeout)),
    )
    .await
    .context("running suites over ssh")
}
