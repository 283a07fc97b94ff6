//! Distro detection shared by `install` and `show-deps`. Thin collaborators,
//! not exercised by the Dispatcher/Channel/SUT core (§6).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distro {
    Debian,
    Fedora,
    Arch,
}

impl Distro {
    pub fn detect() -> anyhow::Result<Self> {
        let os_release = std::fs::read_to_string("/etc/os-release")
            .unwrap_or_default()
            .to_lowercase();
        if os_release.contains("debian") || os_release.contains("ubuntu") {
            Ok(Self::Debian)
        } else if os_release.contains("fedora") || os_release.contains("rhel") || os_release.contains("centos") {
            Ok(Self::Fedora)
        } else if os_release.contains("arch") {
            Ok(Self::Arch)
        } else {
            anyhow::bail!("could not determine distro from /etc/os-release")
        }
    }

    pub fn build_dependencies(&self) -> &'static [&'static str] {
        match self {
            Self::Debian => &[
                "build-essential",
                "autoconf",
                "automake",
                "bison",
                "flex",
                "pkg-config",
                "libacl1-dev",
                "libcap-dev",
                "libnuma-dev",
            ],
            Self::Fedora => &[
                "gcc",
                "make",
                "autoconf",
                "automake",
                "bison",
                "flex",
                "pkgconf-pkg-config",
                "libacl-devel",
                "libcap-devel",
                "numactl-devel",
            ],
            Self::Arch => &["base-devel", "autoconf", "automake", "bison", "flex", "acl", "libcap", "numactl"],
        }
    }

    fn install_command(&self, packages: &[&str]) -> std::process::Command {
        let mut cmd = match self {
            Self::Debian => {
                let mut cmd = std::process::Command::new("apt-get");
                cmd.arg("install").arg("-y");
                cmd
            }
            Self::Fedora => {
                let mut cmd = std::process::Command::new("dnf");
                cmd.arg("install").arg("-y");
                cmd
            }
            Self::Arch => {
                let mut cmd = std::process::Command::new("pacman");
                cmd.arg("-S").arg("--noconfirm");
                cmd
            }
        };
        cmd.args(packages);
        cmd
    }

    pub fn install_build_dependencies(&self) -> anyhow::Result<()> {
        let status = self.install_command(self.build_dependencies()).status()?;
        anyhow::ensure!(status.success(), "package manager exited with {status}");
        Ok(())
    }
}
