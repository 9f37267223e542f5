use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

use crate::baseline::Baseline;
use crate::build::ImageBuilder;
use crate::compose::{self, RenderedService};
use crate::config::{ProjectConfig, ServerConfig, ServiceSpec};
use crate::error::TakoError;
use crate::notify::Notifier;
use crate::output::{self, Event};
use crate::rollout::{rollout_service, RolloutContext, ServiceDeployment, ServiceDeploymentState};
use crate::schedule::{run_levels, CancelToken, ServiceGraph, ServiceIndex};
use crate::ssh::{Auth, SshPool, SshSession};
use crate::state::StateStore;

const DEFAULT_CONCURRENCY: usize = 4;
const SSH_PORT: u16 = 22;

pub struct Orchestrator<'a> {
    pub config: &'a ProjectConfig,
    pub environment: String,
    pub project_root: &'a Path,
    pub registry: Option<&'a str>,
    pub notifier: Notifier,
    pool: Arc<SshPool>,
}

#[derive(Debug, Default)]
pub struct DeployReport {
    pub committed: Vec<String>,
    pub failed: Vec<String>,
    pub rolled_back: Vec<String>,
}

impl DeployReport {
    /// An aborted deploy never committed anything; a partial deploy has a
    /// mix of committed and failed/rolled-back services.
    pub fn is_aborted(&self) -> bool {
        self.committed.is_empty() && (!self.failed.is_empty() || !self.rolled_back.is_empty())
    }

    pub fn is_partial(&self) -> bool {
        !self.committed.is_empty() && (!self.failed.is_empty() || !self.rolled_back.is_empty())
    }
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a ProjectConfig, environment: &str, project_root: &'a Path, registry: Option<&'a str>, notifier: Notifier) -> Self {
        Self {
            config,
            environment: environment.to_string(),
            project_root,
            registry,
            notifier,
            pool: SshPool::with_default_ttl(),
        }
    }

    /// Full pipeline: validate (already done at config load) →
    /// resolve hosts → baseline every host → compute levels → per level,
    /// build then roll out under bounded concurrency → hooks → notify →
    /// report.
    pub async fn deploy(&self, only_service: Option<&str>, dry_run: bool) -> Result<DeployReport> {
        output::emit(&Event::DeployStarted {
            project: self.config.name.clone(),
            environment: self.environment.clone(),
        });
        self.notifier
            .notify(&Event::DeployStarted {
                project: self.config.name.clone(),
                environment: self.environment.clone(),
            })
            .await;

        let env = self.config.environment(&self.environment)?;

        if self.config.servers.is_empty() {
            return Err(TakoError::Config("project defines no servers to deploy to".into()).into());
        }

        let state = StateStore::new(self.project_root);
        state.ensure_dirs()?;

        if !dry_run {
            self.run_baseline_pass().await?;
        }

        let service_pairs: Vec<(String, Vec<String>)> = env
            .services
            .iter()
            .filter(|(name, _)| only_service.map(|s| s == name.as_str()).unwrap_or(true))
            .map(|(name, spec)| (name.clone(), spec.depends_on.clone()))
            .collect();

        if service_pairs.is_empty() {
            return Err(TakoError::Config("no services selected for this deploy".into()).into());
        }

        let graph = ServiceGraph::new(&service_pairs);

        if dry_run {
            let mut report = DeployReport::default();
            for level in graph.levels()? {
                for idx in level {
                    let name = graph.name_of(idx).to_string();
                    output::info(&format!("[dry-run] would deploy {}", name));
                    report.committed.push(name);
                }
            }
            output::emit(&Event::DeploySummary {
                committed: report.committed.clone(),
                failed: report.failed.clone(),
                rolled_back: report.rolled_back.clone(),
            });
            return Ok(report);
        }

        let report = Arc::new(Mutex::new(DeployReport::default()));
        let action = self.build_deploy_action(env, report.clone());

        let failures = run_levels(&graph, DEFAULT_CONCURRENCY, action).await?;

        let mut report = Arc::try_unwrap(report)
            .expect("no outstanding report handles once run_levels has awaited every spawned task")
            .into_inner();

        for failure in &failures {
            if !report.failed.contains(&failure.service) {
                report.failed.push(failure.service.clone());
                report.rolled_back.push(failure.service.clone());
            }
        }

        output::emit(&Event::DeploySummary {
            committed: report.committed.clone(),
            failed: report.failed.clone(),
            rolled_back: report.rolled_back.clone(),
        });

        Ok(report)
    }

    /// Build the per-service closure handed to [`run_levels`]: deploys one
    /// service through the SSH pool, then records the outcome into the
    /// shared report and emits/notifies exactly as the old single-threaded
    /// loop did.
    fn build_deploy_action(
        &self,
        env: &crate::config::EnvironmentConfig,
        report: Arc<Mutex<DeployReport>>,
    ) -> impl Fn(ServiceIndex, String, CancelToken) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>> + Send + Sync + 'static
    {
        let pool = self.pool.clone();
        let project = self.config.name.clone();
        let environment = self.environment.clone();
        let project_root = self.project_root.to_path_buf();
        let registry = self.registry.map(String::from);
        let server = self.config.servers.first().cloned();
        let notifier = self.notifier.clone();
        let specs: HashMap<String, ServiceSpec> = env.services.clone();

        move |_idx: ServiceIndex, name: String, _token: CancelToken| {
            let pool = pool.clone();
            let project = project.clone();
            let environment = environment.clone();
            let project_root = project_root.clone();
            let registry = registry.clone();
            let server = server.clone();
            let notifier = notifier.clone();
            let report = report.clone();
            let spec = specs.get(&name).expect("levelized name must exist in environment").clone();

            Box::pin(async move {
                let result = deploy_one_service(pool, project, environment, project_root, registry, server, name.clone(), spec).await;

                match &result {
                    Ok(()) => {
                        report.lock().await.committed.push(name.clone());
                        output::emit(&Event::DeploySucceeded { service: name.clone() });
                        notifier.notify(&Event::DeploySucceeded { service: name }).await;
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        {
                            let mut guard = report.lock().await;
                            guard.failed.push(name.clone());
                            guard.rolled_back.push(name.clone());
                        }
                        output::emit(&Event::DeployFailed {
                            service: name.clone(),
                            reason: reason.clone(),
                        });
                        notifier.notify(&Event::DeployFailed { service: name, reason }).await;
                    }
                }

                result
            })
        }
    }

    async fn run_baseline_pass(&self) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(DEFAULT_CONCURRENCY));
        let mut handles = Vec::new();

        for server in self.config.servers.clone() {
            let permit_sem = semaphore.clone();
            let pool = self.pool.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit_sem.acquire().await.expect("semaphore not closed");
                run_baseline_for_host(pool, server).await
            }));
        }

        for handle in handles {
            handle.await.context("baseline task panicked")??;
        }

        Ok(())
    }
}

async fn run_baseline_for_host(pool: Arc<SshPool>, server: ServerConfig) -> Result<()> {
    let auth = Auth::from_parts(server.ssh_key.as_deref(), server.password.as_deref())?;
    let session = pool
        .acquire(&server.user, &server.address, SSH_PORT, &auth)
        .await
        .with_context(|| format!("failed to connect to {}", server.address))?;

    let baseline = Baseline::detect(&session, None).await?;
    baseline.ensure_packages().await?;
    baseline.ensure_container_runtime(&server.user).await?;
    baseline.harden_ssh_fail2ban().await?;
    baseline.configure_firewall(&[80, 443]).await?;
    baseline.ensure_monitoring_agent().await?;
    baseline.verify_auto_recovery().await?;

    Ok(())
}

async fn deploy_one_service(
    pool: Arc<SshPool>,
    project: String,
    environment: String,
    project_root: std::path::PathBuf,
    registry: Option<String>,
    server: Option<ServerConfig>,
    service_name: String,
    spec: crate::config::ServiceSpec,
) -> Result<()> {
    let server = server.context("no server configured to deploy to")?;
    let auth = Auth::from_parts(server.ssh_key.as_deref(), server.password.as_deref())?;
    let session = pool
        .acquire(&server.user, &server.address, SSH_PORT, &auth)
        .await
        .with_context(|| format!("failed to connect to {}", server.address))?;

    run_hooks(&session, &spec.hooks.pre_build).await?;

    let image = if let Some(prebuilt) = ImageBuilder::skip_if_prebuilt(&spec) {
        prebuilt.to_string()
    } else {
        output::emit(&Event::ServiceBuilding { service: service_name.clone() });
        let builder = ImageBuilder::new(&dummy_config(&project), registry.as_deref());
        let built = builder.build_image(&project_root, &service_name, &spec, &environment)?;
        builder.transfer_image(&session, &built).await?;
        built
    };
    output::emit(&Event::ServiceBuilt {
        service: service_name.clone(),
        image: image.clone(),
    });

    run_hooks(&session, &spec.hooks.post_build).await?;
    run_hooks(&session, &spec.hooks.pre_deploy).await?;

    let strategy_name = format!("{:?}", spec.deploy.strategy);
    output::emit(&Event::ServiceRolling {
        service: service_name.clone(),
        strategy: strategy_name,
    });

    let mut deployment = ServiceDeployment::new(service_name.clone());
    deployment.transition(ServiceDeploymentState::Building)?;
    deployment.transition(ServiceDeploymentState::Built)?;

    let ctx = RolloutContext {
        session: &session,
        project: &project,
        environment: &environment,
        service_name: &service_name,
        spec: &spec,
        image: &image,
    };

    rollout_service(&ctx, &mut deployment).await?;

    run_hooks(&session, &spec.hooks.post_deploy).await?;
    run_post_start_hooks(&session, &project, &service_name, &spec.hooks.post_start).await?;

    Ok(())
}

/// Run a list of pre/post hooks as plain shell commands on the target host.
/// The deny-list is enforced at config-validation time
/// (`config::validate::hook_is_denied`), never here.
async fn run_hooks(session: &SshSession, hooks: &[String]) -> Result<()> {
    for hook in hooks {
        session.exec(hook).await.with_context(|| format!("hook failed: {}", hook))?;
    }
    Ok(())
}

/// `postStart` hooks in `exec:<cmd>` form run inside the running container
/// rather than on the bare host.
async fn run_post_start_hooks(session: &SshSession, project: &str, service_name: &str, hooks: &[String]) -> Result<()> {
    for hook in hooks {
        if let Some(inner) = hook.strip_prefix("exec:") {
            let container = format!("{}-{}-0", project, service_name);
            session
                .exec(&format!("docker exec {} {}", container, inner))
                .await
                .with_context(|| format!("post_start hook failed: {}", hook))?;
        } else {
            session.exec(hook).await.with_context(|| format!("post_start hook failed: {}", hook))?;
        }
    }
    Ok(())
}

/// `ImageBuilder` only needs the project name/version out of `ProjectConfig`
/// for naming; building a tiny standalone value here avoids threading a
/// borrowed `&ProjectConfig` through the spawned task's `'static` bound.
fn dummy_config(project: &str) -> ProjectConfig {
    ProjectConfig {
        name: project.to_string(),
        version: "0".to_string(),
        servers: vec![],
        environments: HashMap::new(),
    }
}

pub fn render_compose_override(config: &ProjectConfig, environment: &str, images: &HashMap<String, String>) -> Result<String> {
    let env = config.environment(environment)?;
    let services: Vec<RenderedService> = env
        .services
        .iter()
        .filter_map(|(name, spec)| {
            images.get(name).map(|image| RenderedService::from_spec(name, image.clone(), spec, 100))
        })
        .collect();

    compose::generate_override(config, environment, &services)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_report_has_no_commits() {
        let report = DeployReport {
            committed: vec![],
            failed: vec!["web".to_string()],
            rolled_back: vec!["web".to_string()],
        };
        assert!(report.is_aborted());
        assert!(!report.is_partial());
    }

    #[test]
    fn partial_report_mixes_commit_and_failure() {
        let report = DeployReport {
            committed: vec!["api".to_string()],
            failed: vec!["web".to_string()],
            rolled_back: vec!["web".to_string()],
        };
        assert!(!report.is_aborted());
        assert!(report.is_partial());
    }
}
