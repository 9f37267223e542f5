use anyhow::Result;
use std::path::PathBuf;

use crate::config::ProjectConfig;
use crate::orchestrator::Orchestrator;
use crate::output;

pub async fn run(config: ProjectConfig, env: &str, service: Option<&str>, dry_run: bool, project_root: PathBuf, registry: Option<&str>) -> Result<()> {
    let notifier = super::build_notifier();
    let orchestrator = Orchestrator::new(&config, env, &project_root, registry, notifier);

    let report = orchestrator.deploy(service, dry_run).await?;

    if report.is_aborted() {
        output::error("deploy aborted: nothing was committed");
    } else if report.is_partial() {
        output::warning("deploy partially committed");
    } else {
        output::success("deploy complete");
    }

    if !report.failed.is_empty() {
        anyhow::bail!("{} service(s) failed: {}", report.failed.len(), report.failed.join(", "));
    }

    Ok(())
}
