use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::HealthCheckSpec;
use crate::output;
use crate::ssh::SshSession;

/// A single, side-effect-free health checker shared by the Rollout
/// Controller and the Deploy Orchestrator's preflight pass.
pub struct Verifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Healthy,
    Unhealthy,
    TimedOut,
}

impl Verifier {
    /// Verify one container. If `health_check` is set, resolve the
    /// container's network IP and issue an HTTP GET against
    /// `health_check.path` with the configured retry/interval/start-period
    /// (success = HTTP 200). Otherwise fall back to Docker's own
    /// `State.Health.Status`, then assert the container is still running
    /// after a short stability window.
    pub async fn verify(
        session: &SshSession,
        container_name: &str,
        port: Option<u16>,
        health_check: Option<&HealthCheckSpec>,
    ) -> Result<Outcome> {
        if let Some(hc) = health_check {
            let port = port.context("health_check requires a port")?;
            return Self::verify_http(session, container_name, port, hc).await;
        }

        Self::verify_docker_health(session, container_name).await
    }

    async fn verify_http(
        session: &SshSession,
        container_name: &str,
        port: u16,
        hc: &HealthCheckSpec,
    ) -> Result<Outcome> {
        if hc.start_period > 0 {
            tokio::time::sleep(Duration::from_secs(hc.start_period)).await;
        }

        let ip = session
            .exec(&format!(
                "docker inspect --format '{{{{range .NetworkSettings.Networks}}}}{{{{.IPAddress}}}}{{{{end}}}}' {}",
                container_name
            ))
            .await
            .context("failed to resolve container IP")?
            .trim()
            .to_string();

        if ip.is_empty() {
            bail!("container {} has no network IP assigned", container_name);
        }

        let url = format!("http://{}:{}{}", ip, port, hc.path);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(hc.timeout))
            .build()
            .context("failed to build http client")?;

        for attempt in 1..=hc.retries {
            debug!("health probe attempt {}/{} for {}", attempt, hc.retries, container_name);

            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(Outcome::Healthy),
                Ok(resp) => debug!("probe returned status {}", resp.status()),
                Err(e) => debug!("probe error: {}", e),
            }

            tokio::time::sleep(Duration::from_secs(hc.interval)).await;
        }

        Ok(Outcome::TimedOut)
    }

    async fn verify_docker_health(session: &SshSession, container_name: &str) -> Result<Outcome> {
        for _ in 0..12 {
            let status = session
                .exec(&format!(
                    "docker inspect --format='{{{{.State.Health.Status}}}}' {} 2>/dev/null || echo none",
                    container_name
                ))
                .await
                .unwrap_or_default()
                .trim()
                .to_string();

            match status.as_str() {
                "healthy" => return Ok(Outcome::Healthy),
                "unhealthy" => return Ok(Outcome::Unhealthy),
                "none" => {
                    // No healthcheck defined on the image; assert the container
                    // is still running after a short stability window instead.
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    let running = session.exec_ok(&format!("docker inspect --format='{{{{.State.Running}}}}' {} | grep -q true", container_name)).await?;
                    return Ok(if running { Outcome::Healthy } else { Outcome::Unhealthy });
                }
                _ => {}
            }

            tokio::time::sleep(Duration::from_secs(5)).await;
        }

        Ok(Outcome::TimedOut)
    }

    /// Single-shot variant of `verify`, used by C9's preflight pass (spec
    /// §4.6 "image pullable") — checks reachability without waiting through
    /// the full retry budget.
    pub async fn probe_image_pullable(session: &SshSession, image: &str) -> Result<bool> {
        output::info(&format!("probing image availability: {}", image));
        session.exec_ok(&format!("docker pull {} --quiet", image)).await
    }

    /// Stream a container's logs for up to `duration`, bounded by
    /// `tokio::time::timeout`.
    pub async fn stream_logs(session: &SshSession, container_name: &str, duration: Duration) -> Result<mpsc::Receiver<String>> {
        session.stream_logs(container_name, duration).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_variants_are_distinct() {
        assert_ne!(Outcome::Healthy, Outcome::Unhealthy);
        assert_ne!(Outcome::Unhealthy, Outcome::TimedOut);
    }
}
