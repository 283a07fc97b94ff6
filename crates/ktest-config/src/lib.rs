//! Optional TOML file backing CLI defaults (§7.3). CLI flags always win
//! over a file value; a file value always wins over the built-in default.

use ktest_core::{KtestError, Result, SerialType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_ltp_root() -> PathBuf {
    PathBuf::from("/opt/ltp")
}

fn default_password() -> String {
    "root".to_string()
}

fn default_ram_mb() -> u32 {
    2048
}

fn default_smp() -> u32 {
    2
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_user() -> String {
    "root".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KtestFileConfig {
    #[serde(default)]
    pub qemu: Option<QemuDefaults>,
    #[serde(default)]
    pub ssh: Option<SshDefaults>,
    #[serde(default = "default_ltp_root")]
    pub ltp_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QemuDefaults {
    pub image: Option<PathBuf>,
    #[serde(default = "default_password")]
    pub password: String,
    pub system: Option<String>,
    #[serde(default = "default_ram_mb")]
    pub ram_mb: u32,
    #[serde(default = "default_smp")]
    pub smp: u32,
    pub virtfs: Option<PathBuf>,
    pub ro_image: Option<PathBuf>,
    #[serde(default)]
    pub serial_type: Option<SerialType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshDefaults {
    pub host: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_ssh_user")]
    pub user: String,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
}

impl KtestFileConfig {
    /// Returns `Ok(None)` when `path` does not exist, the way
    /// `ProjectConfig::load` treats an unconfigured project.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| KtestError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: KtestFileConfig = toml::from_str(&contents)
            .map_err(|e| KtestError::Config(format!("cannot parse {}: {e}", path.display())))?;
        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_returns_none_for_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let result = KtestFileConfig::load(&dir.path().join("missing.toml")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_load_round_trips_qemu_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ktest.toml");
        std::fs::write(
            &path,
            r#"
ltp_root = "/srv/ltp"

[qemu]
image = "/var/lib/images/base.qcow2"
ram_mb = 4096
smp = 4
serial_type = "virtio"
"#,
        )
        .unwrap();

        let config = KtestFileConfig::load(&path).unwrap().unwrap();
        assert_eq!(config.ltp_root, PathBuf::from("/srv/ltp"));
        let qemu = config.qemu.unwrap();
        assert_eq!(qemu.ram_mb, 4096);
        assert_eq!(qemu.serial_type, Some(SerialType::VirtIo));
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "this is not valid toml = [").unwrap();

        let result = KtestFileConfig::load(&path);
        assert!(matches!(result, Err(KtestError::Config(_))));
    }

    #[test]
    fn test_default_ltp_root_applies_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ktest.toml");
        std::fs::write(&path, "").unwrap();

        let config = KtestFileConfig::load(&path).unwrap().unwrap();
        assert_eq!(config.ltp_root, PathBuf::from("/opt/ltp"));
    }
}
