use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

use crate::config::ProjectConfig;
use crate::output;
use crate::ssh::{Auth, SshSession};
use crate::state::StateStore;

/// `tako destroy`: tear down every running container for this
/// project/environment on every declared host, then clear the local
/// `ClusterState` and forget each host's SSH key fingerprint
/// so a recycled IP doesn't later trip a host-key mismatch.
pub async fn run(config: ProjectConfig, env: &str, yes: bool, project_root: &Path) -> Result<()> {
    config.environment(env)?;

    if !yes {
        print!("This will remove all '{}' containers for '{}' and local state. Continue? [y/N] ", config.name, env);
        std::io::stdout().flush().ok();
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            output::warning("aborted");
            return Ok(());
        }
    }

    for server in &config.servers {
        output::info(&format!("tearing down containers on {}", server.address));
        let auth = Auth::from_parts(server.ssh_key.as_deref(), server.password.as_deref())?;
        let session = SshSession::connect(&server.user, &server.address, None, &auth)
            .await
            .with_context(|| format!("failed to connect to {}", server.address))?;

        let prefix = format!("{}-", config.name);
        let _ = session
            .exec(&format!(
                "docker ps -aq --filter 'name={}' | xargs -r docker rm -f",
                prefix
            ))
            .await;

        session.close().await.ok();
        SshSession::remove_host_key(&server.address).ok();
    }

    let state = StateStore::new(project_root);
    state.clear_state().context("failed to clear cluster state")?;
    state.cleanup_keys().context("failed to remove ssh keypair")?;

    output::success(&format!("environment '{}' destroyed", env));
    Ok(())
}
