use anyhow::{Context, Result};

use crate::config::ProjectConfig;
use crate::output;
use crate::ssh::{shell_quote, Auth, SshSession};

const BACKUP_DIR: &str = "/var/backups/tako";

/// `tako backup <volume>`: snapshot a named Docker volume on every
/// server into a timestamped tarball under `/var/backups/tako`, using a
/// throwaway `alpine` container so no backup tooling needs to be
/// pre-installed on the host — the same pattern the Host Baseline (C3) uses
/// for one-shot maintenance commands.
pub async fn backup(config: ProjectConfig, env: &str, volume: &str) -> Result<()> {
    config.environment(env)?;

    if config.servers.is_empty() {
        anyhow::bail!("project defines no servers");
    }

    let volume_name = format!("{}-{}", config.name, volume);
    let backup_id = format!("{}-{}", env, chrono::Utc::now().format("%Y%m%dT%H%M%SZ"));

    for server in &config.servers {
        let auth = Auth::from_parts(server.ssh_key.as_deref(), server.password.as_deref())?;
        let session = SshSession::connect(&server.user, &server.address, None, &auth)
            .await
            .with_context(|| format!("failed to connect to {}", server.address))?;

        let exists = session
            .exec_ok(&format!("docker volume inspect {} > /dev/null 2>&1", shell_quote(&volume_name)))
            .await?;
        if !exists {
            output::warning(&format!("volume {} not present on {}, skipping", volume_name, server.address));
            session.close().await.ok();
            continue;
        }

        let dest_dir = format!("{}/{}/{}", BACKUP_DIR, config.name, volume);
        session.exec(&format!("mkdir -p {}", shell_quote(&dest_dir))).await?;

        let archive = format!("{}/{}.tar.gz", dest_dir, backup_id);
        session
            .exec(&format!(
                "docker run --rm -v {}:/data:ro -v {}:/backup alpine tar czf /backup/{}.tar.gz -C /data .",
                shell_quote(&volume_name),
                shell_quote(&dest_dir),
                backup_id
            ))
            .await
            .with_context(|| format!("failed to archive volume {} on {}", volume_name, server.address))?;

        output::success(&format!("{}: {} -> {}", server.address, volume_name, archive));
        session.close().await.ok();
    }

    output::info(&format!("backup id: {}", backup_id));
    Ok(())
}

/// `tako restore <volume> <backup-id>`: restore a volume from a
/// tarball previously produced by [`backup`]. Overwrites the live volume's
/// contents, so the caller is expected to have already stopped the service
/// consuming it.
pub async fn restore(config: ProjectConfig, env: &str, volume: &str, backup_id: &str) -> Result<()> {
    config.environment(env)?;

    let volume_name = format!("{}-{}", config.name, volume);
    let dest_dir = format!("{}/{}/{}", BACKUP_DIR, config.name, volume);
    let archive_name = format!("{}.tar.gz", backup_id);

    for server in &config.servers {
        let auth = Auth::from_parts(server.ssh_key.as_deref(), server.password.as_deref())?;
        let session = SshSession::connect(&server.user, &server.address, None, &auth)
            .await
            .with_context(|| format!("failed to connect to {}", server.address))?;

        let archive_path = format!("{}/{}", dest_dir, archive_name);
        if !session.path_exists(&archive_path).await? {
            output::warning(&format!("{}: no backup {} found for {}", server.address, backup_id, volume));
            session.close().await.ok();
            continue;
        }

        session
            .exec(&format!("docker volume create {} > /dev/null", shell_quote(&volume_name)))
            .await?;

        session
            .exec(&format!(
                "docker run --rm -v {}:/data -v {}:/backup alpine sh -c 'rm -rf /data/* /data/..?* /data/.[!.]* 2>/dev/null; tar xzf /backup/{} -C /data'",
                shell_quote(&volume_name),
                shell_quote(&dest_dir),
                archive_name
            ))
            .await
            .with_context(|| format!("failed to restore volume {} on {}", volume_name, server.address))?;

        output::success(&format!("{}: restored {} from {}", server.address, volume_name, backup_id));
        session.close().await.ok();
    }

    Ok(())
}
