use anyhow::{Context, Result};

use crate::config::ProjectConfig;
use crate::output;
use crate::ssh::{shell_quote, Auth, SshSession};

/// `tako cleanup`: on every server, remove stopped containers
/// belonging to this project and prune all but the `keep_images` most
/// recent tags per service image repository.
///
/// Image recency is ordered by `docker images`' own `CreatedAt` column,
/// which Docker formats as a fixed `YYYY-MM-DD HH:MM:SS Z` string — a plain
/// lexical sort on that string is equivalent to sorting by build time, so
/// no date parsing is needed here (see DESIGN.md for the tradeoff).
pub async fn run(config: ProjectConfig, env: &str, keep_images: usize) -> Result<()> {
    config.environment(env)?;

    if config.servers.is_empty() {
        anyhow::bail!("project defines no servers");
    }

    let keep = keep_images.max(1);
    output::header(&format!("Cleaning up '{}' (keeping {} image(s) per service)", env, keep));

    for server in &config.servers {
        output::info(&format!("host: {}", server.address));

        let auth = Auth::from_parts(server.ssh_key.as_deref(), server.password.as_deref())?;
        let session = SshSession::connect(&server.user, &server.address, None, &auth)
            .await
            .with_context(|| format!("failed to connect to {}", server.address))?;

        let prefix = format!("{}-", config.name);
        let pruned = session
            .exec(&format!(
                "docker ps -aq --filter 'name={}' --filter 'status=exited' | xargs -r docker rm",
                prefix
            ))
            .await
            .unwrap_or_default();
        let pruned_count = pruned.lines().filter(|l| !l.trim().is_empty()).count();
        output::info(&format!("  removed {} stopped container(s)", pruned_count));

        for (service, _) in &config.environment(env)?.services {
            let repo = format!("{}/{}", config.name, service);
            let listing = session
                .exec(&format!(
                    "docker images {} --format '{{{{.Tag}}}}\\t{{{{.CreatedAt}}}}' | sort -t$'\\t' -k2 -r",
                    shell_quote(&repo)
                ))
                .await
                .unwrap_or_default();

            let tags: Vec<&str> = listing
                .lines()
                .filter_map(|line| line.split('\t').next())
                .filter(|t| !t.is_empty() && *t != "<none>")
                .collect();

            if tags.len() > keep {
                let stale = &tags[keep..];
                for tag in stale {
                    let image = format!("{}:{}", repo, tag);
                    let _ = session.exec(&format!("docker rmi {}", shell_quote(&image))).await;
                }
                output::info(&format!("  {}: pruned {} old image(s)", service, stale.len()));
            }
        }

        let _ = session.exec("docker image prune -f --filter 'dangling=true'").await;
        session.close().await.ok();
    }

    output::success("cleanup complete");
    Ok(())
}
