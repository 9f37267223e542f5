use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod backup;
pub mod cleanup;
pub mod deploy;
pub mod destroy;
pub mod logs;
pub mod provision;
pub mod secrets_cmd;
pub mod ssl_cmd;
pub mod status;

/// Build a `Notifier` from whichever transport env vars are set
/// (`TAKO_WEBHOOK_URL`, `TAKO_SLACK_WEBHOOK`, `TAKO_DISCORD_WEBHOOK`). A run
/// with none configured still gets console output via `output::emit`.
pub fn build_notifier() -> crate::notify::Notifier {
    use crate::notify::Transport;

    let mut transports = Vec::new();
    if let Ok(url) = std::env::var("TAKO_WEBHOOK_URL") {
        transports.push(Transport::Webhook { url });
    }
    if let Ok(url) = std::env::var("TAKO_SLACK_WEBHOOK") {
        transports.push(Transport::Slack { webhook_url: url });
    }
    if let Ok(url) = std::env::var("TAKO_DISCORD_WEBHOOK") {
        transports.push(Transport::Discord { webhook_url: url });
    }

    crate::notify::Notifier::new(transports)
}

#[derive(Parser)]
#[command(name = "tako", version, about = "Provision hosts and deploy a containerized service graph")]
pub struct Cli {
    /// Path to tako.yaml
    #[arg(short, long, default_value = "tako.yaml")]
    pub config: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy the service graph for one environment
    Deploy {
        /// Target environment
        #[arg(short, long)]
        env: String,
        /// Deploy only this service (and whatever it depends on)
        #[arg(long)]
        service: Option<String>,
        /// Print what would happen without touching any host
        #[arg(long)]
        dry_run: bool,
    },

    /// Provision hosts for one environment (baseline pass only — cloud
    /// infrastructure itself is out of scope; see DESIGN.md)
    Provision {
        /// Target environment
        #[arg(short, long)]
        env: String,
        /// Show the baseline plan without applying it
        #[arg(long)]
        preview: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Tear down an environment's deployed containers and state
    Destroy {
        /// Target environment
        #[arg(short, long)]
        env: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the current status of every service in an environment
    Status {
        /// Target environment
        #[arg(short, long)]
        env: String,
    },

    /// Tail logs from a service's containers
    Logs {
        /// Service name
        service: String,
        /// Target environment
        #[arg(short, long)]
        env: String,
        /// Follow log output
        #[arg(short, long)]
        follow: bool,
    },

    /// Certificate lifecycle
    Ssl {
        #[command(subcommand)]
        action: SslAction,
    },

    /// Remove old images and stopped containers
    Cleanup {
        /// Target environment
        #[arg(short, long)]
        env: String,
        /// Number of image generations to retain per service
        #[arg(long, default_value = "3")]
        keep_images: usize,
    },

    /// Back up a named volume to local storage
    Backup {
        /// Target environment
        #[arg(short, long)]
        env: String,
        /// Volume name to back up
        volume: String,
    },

    /// Restore a previously taken volume backup
    Restore {
        /// Target environment
        #[arg(short, long)]
        env: String,
        /// Volume name to restore
        volume: String,
        /// Backup identifier returned by `tako backup`
        backup_id: String,
    },

    /// Manage per-environment encrypted secrets
    Secrets {
        #[command(subcommand)]
        action: SecretsAction,
    },
}

#[derive(Subcommand)]
pub enum SslAction {
    /// Show pending/issued certificates for an environment
    Status {
        #[arg(short, long)]
        env: String,
    },
    /// Force an immediate DNS/HTTP challenge check for one domain
    Check {
        #[arg(short, long)]
        env: String,
        domain: String,
    },
}

#[derive(Subcommand)]
pub enum SecretsAction {
    /// Initialize the secrets store for the project
    Init,
    /// Set a secret (KEY=VALUE)
    Set {
        /// KEY=VALUE pair
        pair: String,
        /// Target environment
        #[arg(short, long)]
        env: String,
    },
    /// Remove a secret
    Unset {
        /// Secret key name
        key: String,
        /// Target environment
        #[arg(short, long)]
        env: String,
    },
    /// List secrets (values masked by default)
    List {
        /// Target environment
        #[arg(short, long)]
        env: String,
        /// Show actual values
        #[arg(long)]
        reveal: bool,
    },
    /// Decrypt → open in $EDITOR → re-encrypt
    Edit {
        /// Target environment
        #[arg(short, long)]
        env: String,
    },
}
