use anyhow::{Context, Result};

use crate::config::ProjectConfig;
use crate::output;
use crate::ssh::{Auth, SshSession};

/// `tako status`: list every service's running containers across
/// every server, read directly off the host rather than from local state —
/// the Cluster State Store only tracks infra/SSH material, not container
/// liveness.
pub async fn run(config: ProjectConfig, env: &str) -> Result<()> {
    let environment = config.environment(env)?;

    if config.servers.is_empty() {
        anyhow::bail!("project defines no servers");
    }

    output::header(&format!("Status: {} / {}", config.name, env));

    for server in &config.servers {
        output::info(&format!("host: {} ({})", server.name, server.address));

        let auth = Auth::from_parts(server.ssh_key.as_deref(), server.password.as_deref())?;
        let session = SshSession::connect(&server.user, &server.address, None, &auth)
            .await
            .with_context(|| format!("failed to connect to {}", server.address))?;

        let prefix = format!("{}-", config.name);
        let listing = session
            .exec(&format!(
                "docker ps -a --filter 'name={}' --format '{{{{.Names}}}}\\t{{{{.Image}}}}\\t{{{{.Status}}}}'",
                prefix
            ))
            .await
            .unwrap_or_default();

        if listing.trim().is_empty() {
            println!("  (no containers)");
        } else {
            for line in listing.lines() {
                let cols: Vec<&str> = line.split('\t').collect();
                if cols.len() == 3 {
                    println!("  {:<28} {:<36} {}", cols[0], cols[1], cols[2]);
                } else {
                    println!("  {}", line);
                }
            }
        }

        session.close().await.ok();
    }

    println!();
    output::info(&format!("{} service(s) declared in this environment", environment.services.len()));
    for name in environment.services.keys() {
        println!("  - {}", name);
    }

    Ok(())
}
