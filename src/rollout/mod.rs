pub mod bluegreen;
pub mod rolling;

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{HealthCheckSpec, ServiceSpec, Strategy};
use crate::error::TakoError;
use crate::ssh::SshSession;
use crate::verify::{Outcome, Verifier};

/// Per-service rollout state machine: start the new image, verify it, then
/// commit or roll back. Drives N replica slots under either the blue-green
/// or rolling strategy a `ServiceSpec` declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceDeploymentState {
    Pending,
    Building,
    Built,
    Preflight,
    Rolling,
    Verifying,
    Committed,
    Failed,
    RolledBack,
}

impl ServiceDeploymentState {
    /// `Failed -> RolledBack` is the only terminal-state transition; it may
    /// fire at most once per rollout.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ServiceDeploymentState::*;
        matches!(
            (self, next),
            (Pending, Building)
                | (Building, Built)
                | (Built, Preflight)
                | (Preflight, Rolling)
                | (Rolling, Verifying)
                | (Verifying, Committed)
                | (Verifying, Failed)
                | (Rolling, Failed)
                | (Preflight, Failed)
                | (Failed, RolledBack)
        )
    }
}

pub struct ServiceDeployment {
    pub service_name: String,
    pub state: ServiceDeploymentState,
}

impl ServiceDeployment {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            state: ServiceDeploymentState::Pending,
        }
    }

    pub fn transition(&mut self, next: ServiceDeploymentState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(TakoError::Rollout(format!(
                "{}: illegal transition {:?} -> {:?}",
                self.service_name, self.state, next
            ))
            .into());
        }
        debug!("{}: {:?} -> {:?}", self.service_name, self.state, next);
        self.state = next;
        Ok(())
    }
}

/// One numbered replica of a service on a single host, named
/// `<project>-<service>-<slot>`.
#[derive(Debug, Clone)]
pub struct RolloutSlot {
    pub index: u32,
    pub container_name: String,
    pub previous_image: Option<String>,
}

impl RolloutSlot {
    pub fn new(project: &str, service: &str, index: u32) -> Self {
        Self {
            index,
            container_name: format!("{}-{}-{}", project, service, index),
            previous_image: None,
        }
    }
}

pub struct RolloutContext<'a> {
    pub session: &'a SshSession,
    pub project: &'a str,
    pub environment: &'a str,
    pub service_name: &'a str,
    pub spec: &'a ServiceSpec,
    pub image: &'a str,
}

impl<'a> RolloutContext<'a> {
    fn slots(&self) -> Vec<RolloutSlot> {
        (0..self.spec.replicas)
            .map(|i| RolloutSlot::new(self.project, self.service_name, i))
            .collect()
    }

    /// Preflight checks: declared volumes exist on the host,
    /// every `depends_on` service has at least one running container, and
    /// (for images not locally built) the image is pullable from its
    /// registry. Runs before any container is touched.
    pub async fn preflight(&self) -> Result<()> {
        for volume in &self.spec.volumes {
            if let Some((host_path, _)) = volume.split_once(':') {
                if host_path.starts_with('/') {
                    self.session
                        .exec(&format!("mkdir -p {}", host_path))
                        .await
                        .with_context(|| format!("failed to ensure volume path {}", host_path))?;
                }
            }
        }

        for dep in &self.spec.depends_on {
            let running = self
                .session
                .exec_ok(&format!(
                    "docker ps --filter name={}-{} --filter status=running -q | grep -q .",
                    self.project, dep
                ))
                .await?;
            if !running {
                return Err(TakoError::Rollout(format!(
                    "dependency '{}' has no running container for service '{}'",
                    dep, self.service_name
                ))
                .into());
            }
        }

        if self.spec.build.is_none() {
            let pullable = Verifier::probe_image_pullable(self.session, self.image).await?;
            if !pullable {
                return Err(TakoError::Rollout(format!("image {} is not pullable", self.image)).into());
            }
        }

        Ok(())
    }

    async fn run_container(&self, slot: &RolloutSlot, weight: u32) -> Result<()> {
        let restart = if self.spec.persistent {
            "always"
        } else {
            self.spec.restart.compose_value()
        };

        let mut cmd = format!("docker run -d --name {} --network tako --restart {}", slot.container_name, restart);

        for label in crate::compose::traefik_labels(self.service_name, self.spec.port, self.spec.proxy.as_ref(), weight) {
            cmd.push_str(&format!(" --label {}", crate::ssh::shell_quote(&label)));
        }

        if let Some(port) = self.spec.port {
            cmd.push_str(&format!(" -p {}", port));
        }
        for (key, value) in &self.spec.env {
            cmd.push_str(&format!(" -e {}={}", key, crate::ssh::shell_quote(value)));
        }
        for volume in &self.spec.volumes {
            cmd.push_str(&format!(" -v {}", volume));
        }
        cmd.push(' ');
        cmd.push_str(&self.image);

        self.session
            .exec(&cmd)
            .await
            .with_context(|| format!("failed to start container {}", slot.container_name))?;
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let _ = self.session.exec(&format!("docker rm -f {}", name)).await;
        Ok(())
    }

    async fn verify_slot(&self, slot: &RolloutSlot, health_check: Option<&HealthCheckSpec>) -> Result<Outcome> {
        Verifier::verify(self.session, &slot.container_name, self.spec.port, health_check).await
    }
}

/// Per-service rollout budget. Dispatches to
/// the configured strategy, or to the in-place persistent-service path.
pub async fn rollout_service(ctx: &RolloutContext<'_>, deployment: &mut ServiceDeployment) -> Result<()> {
    let budget = Duration::from_secs(600);

    tokio::time::timeout(budget, rollout_service_inner(ctx, deployment))
        .await
        .map_err(|_| TakoError::Rollout(format!("{}: rollout exceeded 10 minute budget", ctx.service_name)))?
}

async fn rollout_service_inner(ctx: &RolloutContext<'_>, deployment: &mut ServiceDeployment) -> Result<()> {
    deployment.transition(ServiceDeploymentState::Preflight)?;
    if let Err(e) = ctx.preflight().await {
        deployment.transition(ServiceDeploymentState::Failed)?;
        return Err(e);
    }

    deployment.transition(ServiceDeploymentState::Rolling)?;

    let result = if ctx.spec.persistent {
        update_persistent_in_place(ctx).await
    } else {
        match ctx.spec.deploy.strategy {
            Strategy::Rolling => rolling::roll(ctx).await,
            Strategy::BlueGreen => bluegreen::roll(ctx).await,
        }
    };

    match result {
        Ok(()) => {
            deployment.transition(ServiceDeploymentState::Verifying)?;
            deployment.transition(ServiceDeploymentState::Committed)?;
            info!("{}: rollout committed", ctx.service_name);
            Ok(())
        }
        Err(e) => {
            deployment.transition(ServiceDeploymentState::Failed)?;
            deployment.transition(ServiceDeploymentState::RolledBack)?;
            Err(e)
        }
    }
}

/// Persistent services
/// are updated in place rather than slot-rotated, with `restart=always`
/// forced regardless of the configured restart policy — losing the
/// container means losing the volume's only writer.
async fn update_persistent_in_place(ctx: &RolloutContext<'_>) -> Result<()> {
    let slot = RolloutSlot::new(ctx.project, ctx.service_name, 0);
    ctx.remove_container(&slot.container_name).await?;
    ctx.run_container(&slot, 100).await?;

    match ctx.verify_slot(&slot, ctx.spec.health_check.as_ref()).await? {
        Outcome::Healthy => Ok(()),
        other => Err(TakoError::Rollout(format!(
            "persistent service {} failed verification: {:?}",
            ctx.service_name, other
        ))
        .into()),
    }
}

impl crate::config::RestartPolicy {
    pub fn compose_value(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::UnlessStopped => "unless-stopped",
            Self::OnFailure => "on-failure",
            Self::No => "no",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_succeed() {
        let mut d = ServiceDeployment::new("web");
        assert!(d.transition(ServiceDeploymentState::Building).is_ok());
        assert!(d.transition(ServiceDeploymentState::Built).is_ok());
        assert!(d.transition(ServiceDeploymentState::Preflight).is_ok());
        assert!(d.transition(ServiceDeploymentState::Rolling).is_ok());
        assert!(d.transition(ServiceDeploymentState::Failed).is_ok());
        assert!(d.transition(ServiceDeploymentState::RolledBack).is_ok());
    }

    #[test]
    fn rolled_back_is_terminal() {
        let mut d = ServiceDeployment::new("web");
        d.state = ServiceDeploymentState::RolledBack;
        assert!(d.transition(ServiceDeploymentState::Rolling).is_err());
    }

    #[test]
    fn illegal_skip_is_rejected() {
        let mut d = ServiceDeployment::new("web");
        assert!(d.transition(ServiceDeploymentState::Committed).is_err());
    }

    #[test]
    fn slot_naming_matches_convention() {
        let slot = RolloutSlot::new("demo", "web", 2);
        assert_eq!(slot.container_name, "demo-web-2");
    }
}
