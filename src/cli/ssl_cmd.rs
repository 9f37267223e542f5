use anyhow::{Context, Result};
use std::path::Path;

use crate::config::ProjectConfig;
use crate::output;
use crate::state::StateStore;
use crate::tls::TlsLifecycle;

/// `tako ssl status`: list every certificate still awaiting its
/// ACME challenge to propagate.
pub fn status(config: ProjectConfig, env: &str, project_root: &Path) -> Result<()> {
    config.environment(env)?;

    let store = StateStore::new(project_root);
    let pending = store.load_pending_certificates()?;

    if pending.is_empty() {
        output::success("no certificates pending");
        return Ok(());
    }

    output::header("Pending certificates");
    for cert in &pending {
        println!(
            "  {:<32} started {} — {} attempt(s), last check: {}",
            cert.domain,
            cert.started_at,
            cert.attempts,
            cert.last_check.as_deref().unwrap_or("never")
        );
    }

    Ok(())
}

/// `tako ssl check <domain>`: force a single DNS-01 propagation
/// check for one pending domain, without waiting for the next scheduled
/// `poll_dns01` backoff.
pub async fn check(config: ProjectConfig, env: &str, domain: &str, project_root: &Path) -> Result<()> {
    config.environment(env)?;

    let store = StateStore::new(project_root);
    let pending = store.load_pending_certificates()?;

    let cert = pending
        .iter()
        .find(|p| p.domain == domain)
        .with_context(|| format!("no pending certificate for domain '{}'", domain))?;

    let lifecycle = TlsLifecycle::new(&store);
    let matched = lifecycle
        .check_once(&cert.domain, &cert.registration, cert.attempts + 1)
        .await?;

    if matched {
        output::success(&format!("{}: challenge verified, certificate issued", domain));
    } else {
        output::warning(&format!("{}: challenge has not propagated yet", domain));
    }

    Ok(())
}
