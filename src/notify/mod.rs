use anyhow::{Context, Result};
use serde_json::json;

use crate::output::{Event, Severity};

/// Webhook notification transports.
/// Wraps the same `output::Event` the console sink consumes, so a deploy
/// only constructs events once.
#[derive(Debug, Clone)]
pub enum Transport {
    Webhook { url: String },
    Slack { webhook_url: String },
    Discord { webhook_url: String },
}

#[derive(Clone)]
pub struct Notifier {
    transports: Vec<Transport>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(transports: Vec<Transport>) -> Self {
        Self {
            transports,
            client: reqwest::Client::new(),
        }
    }

    pub async fn notify(&self, event: &Event) {
        for transport in &self.transports {
            if let Err(e) = self.send(transport, event).await {
                tracing::warn!("notification delivery failed ({:?}): {}", transport, e);
            }
        }
    }

    async fn send(&self, transport: &Transport, event: &Event) -> Result<()> {
        let (url, payload) = match transport {
            Transport::Webhook { url } => (url.clone(), generic_payload(event)),
            Transport::Slack { webhook_url } => (webhook_url.clone(), slack_payload(event)),
            Transport::Discord { webhook_url } => (webhook_url.clone(), discord_payload(event)),
        };

        self.client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("failed to deliver notification")?
            .error_for_status()
            .context("notification endpoint returned an error status")?;

        Ok(())
    }
}

fn generic_payload(event: &Event) -> serde_json::Value {
    json!({
        "event": format!("{:?}", event),
        "severity": format!("{:?}", event.severity()),
    })
}

fn color_for(severity: Severity) -> u32 {
    match severity {
        Severity::Info => 0x2ecc71,
        Severity::Warning => 0xf1c40f,
        Severity::Error => 0xe74c3c,
    }
}

fn slack_payload(event: &Event) -> serde_json::Value {
    json!({
        "attachments": [{
            "color": format!("#{:06x}", color_for(event.severity())),
            "text": describe(event),
        }]
    })
}

fn discord_payload(event: &Event) -> serde_json::Value {
    json!({
        "embeds": [{
            "description": describe(event),
            "color": color_for(event.severity()),
        }]
    })
}

fn describe(event: &Event) -> String {
    match event {
        Event::DeployStarted { project, environment } => format!("Deploying {} → {}", project, environment),
        Event::ServiceBuilding { service } => format!("Building {}", service),
        Event::ServiceBuilt { service, image } => format!("Built {} ({})", service, image),
        Event::ServiceRolling { service, strategy } => format!("Rolling out {} ({})", service, strategy),
        Event::DeploySucceeded { service } => format!("{} deployed", service),
        Event::DeployFailed { service, reason } => format!("{} failed: {}", service, reason),
        Event::DeployRolledBack { service } => format!("{} rolled back", service),
        Event::SslIssued { domain } => format!("Certificate issued for {}", domain),
        Event::DeploySummary { committed, failed, rolled_back } => format!(
            "Deploy summary — committed: {}, rolled back: {}, failed: {}",
            committed.len(),
            rolled_back.len(),
            failed.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_escalates_with_severity() {
        assert_ne!(color_for(Severity::Info), color_for(Severity::Error));
    }

    #[test]
    fn describe_formats_deploy_failed() {
        let event = Event::DeployFailed {
            service: "web".to_string(),
            reason: "timeout".to_string(),
        };
        assert!(describe(&event).contains("web"));
        assert!(describe(&event).contains("timeout"));
    }
}
