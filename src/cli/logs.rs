use anyhow::{Context, Result};

use crate::config::ProjectConfig;
use crate::output;
use crate::ssh::{Auth, SshSession};
use crate::verify::Verifier;

pub async fn run(config: ProjectConfig, env: &str, service: &str, follow: bool) -> Result<()> {
    let environment = config.environment(env)?;
    environment
        .services
        .get(service)
        .with_context(|| format!("service '{}' not found in environment '{}'", service, env))?;

    let server = config.servers.first().context("project defines no servers")?;
    let auth = Auth::from_parts(server.ssh_key.as_deref(), server.password.as_deref())?;
    let session = SshSession::connect(&server.user, &server.address, None, &auth)
        .await
        .with_context(|| format!("failed to connect to {}", server.address))?;

    let container = format!("{}-{}-0", config.name, service);

    if follow {
        let mut rx = Verifier::stream_logs(&session, &container, std::time::Duration::from_secs(3600)).await?;
        while let Some(line) = rx.recv().await {
            println!("{}", line);
        }
    } else {
        let result = session
            .exec(&format!("docker logs --tail 200 {}", container))
            .await
            .context("failed to fetch logs")?;
        print!("{}", result);
    }

    if session.close().await.is_err() {
        output::warning("session close did not complete cleanly");
    }

    Ok(())
}
