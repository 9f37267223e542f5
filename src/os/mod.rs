use anyhow::Result;

use crate::error::TakoError;
use crate::ssh::SshSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Debian,
    Rhel,
    Suse,
    Alpine,
}

impl HostOs {
    /// Auto-detect OS by reading /etc/os-release over SSH and scanning for
    /// its `ID=` line.
    pub async fn detect(session: &SshSession) -> Result<Self> {
        let output = session.exec("cat /etc/os-release").await?;
        for line in output.lines() {
            if line.starts_with("ID=") {
                let id = line.trim_start_matches("ID=").trim_matches('"');
                return Self::from_id(id);
            }
        }
        Err(TakoError::Fatal("could not determine host OS from /etc/os-release".into()).into())
    }

    pub fn from_config(s: &str) -> Result<Self> {
        Self::from_id(s)
    }

    fn from_id(id: &str) -> Result<Self> {
        match id {
            "ubuntu" | "debian" => Ok(HostOs::Debian),
            "rhel" | "centos" | "rocky" | "almalinux" | "fedora" => Ok(HostOs::Rhel),
            "sles" | "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" => Ok(HostOs::Suse),
            "alpine" => Ok(HostOs::Alpine),
            other => Err(TakoError::Fatal(format!(
                "unsupported OS family '{}'. Supported: debian, rhel, suse, alpine",
                other
            ))
            .into()),
        }
    }

    pub async fn resolve(os_config: Option<&str>, session: &SshSession) -> Result<Self> {
        match os_config {
            Some(s) => Self::from_config(s),
            None => Self::detect(session).await,
        }
    }

    pub fn package_manager(&self) -> PackageManager {
        match self {
            HostOs::Debian => PackageManager::Apt,
            HostOs::Rhel => PackageManager::Dnf,
            HostOs::Suse => PackageManager::Zypper,
            HostOs::Alpine => PackageManager::Apk,
        }
    }

    pub fn install_container_runtime_cmd(&self) -> &'static str {
        "curl -fsSL https://get.docker.com | sh"
    }

    pub fn add_docker_group_cmd(&self, user: &str) -> String {
        format!("usermod -aG docker {}", crate::ssh::shell_quote(user))
    }

    pub fn firewall_backend(&self) -> FirewallBackend {
        match self {
            HostOs::Debian => FirewallBackend::Ufw,
            HostOs::Rhel => FirewallBackend::Firewalld,
            HostOs::Suse => FirewallBackend::Firewalld,
            HostOs::Alpine => FirewallBackend::Nft,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Zypper,
    Apk,
}

impl PackageManager {
    pub fn update_cmd(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get update -qq",
            PackageManager::Dnf => "dnf makecache -q",
            PackageManager::Zypper => "zypper --non-interactive refresh",
            PackageManager::Apk => "apk update",
        }
    }

    pub fn install_cmd(&self, packages: &[&str]) -> String {
        let pkgs = packages.join(" ");
        match self {
            PackageManager::Apt => format!("apt-get install -y -qq {}", pkgs),
            PackageManager::Dnf => format!("dnf install -y -q {}", pkgs),
            PackageManager::Zypper => format!("zypper --non-interactive install {}", pkgs),
            PackageManager::Apk => format!("apk add --no-cache {}", pkgs),
        }
    }

    pub fn remove_cmd(&self, packages: &[&str]) -> String {
        let pkgs = packages.join(" ");
        match self {
            PackageManager::Apt => format!("apt-get remove -y -qq {}", pkgs),
            PackageManager::Dnf => format!("dnf remove -y -q {}", pkgs),
            PackageManager::Zypper => format!("zypper --non-interactive remove {}", pkgs),
            PackageManager::Apk => format!("apk del {}", pkgs),
        }
    }

    pub fn search_cmd(&self, query: &str) -> String {
        match self {
            PackageManager::Apt => format!("apt-cache search {}", query),
            PackageManager::Dnf => format!("dnf search {}", query),
            PackageManager::Zypper => format!("zypper search {}", query),
            PackageManager::Apk => format!("apk search {}", query),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallBackend {
    Ufw,
    Firewalld,
    Nft,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_ids() {
        assert_eq!(HostOs::from_config("ubuntu").unwrap(), HostOs::Debian);
        assert_eq!(HostOs::from_config("rocky").unwrap(), HostOs::Rhel);
        assert_eq!(HostOs::from_config("opensuse-leap").unwrap(), HostOs::Suse);
        assert_eq!(HostOs::from_config("alpine").unwrap(), HostOs::Alpine);
    }

    #[test]
    fn rejects_unknown_id() {
        assert!(HostOs::from_config("nixos").is_err());
    }

    #[test]
    fn maps_package_manager() {
        assert_eq!(HostOs::Debian.package_manager(), PackageManager::Apt);
        assert_eq!(HostOs::Rhel.package_manager(), PackageManager::Dnf);
    }
}
