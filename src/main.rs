mod baseline;
mod build;
mod cli;
mod compose;
mod config;
mod error;
mod notify;
mod orchestrator;
mod os;
mod output;
mod rollout;
mod schedule;
mod secrets;
mod ssh;
mod state;
mod tls;
mod verify;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, SecretsAction, SslAction};
use config::ProjectConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .without_time()
        .init();

    if let Err(e) = run(cli).await {
        output::error(&format!("{:#}", e));
        std::process::exit(error::classify(&e));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let project_root = std::env::current_dir()?;

    match cli.command {
        Command::Deploy { env, service, dry_run } => {
            let config = ProjectConfig::load(&cli.config)?;
            cli::deploy::run(config, &env, service.as_deref(), dry_run, project_root, None).await
        }

        Command::Provision { env, preview, yes } => {
            let config = ProjectConfig::load(&cli.config)?;
            cli::provision::run(config, &env, preview, yes, &project_root).await
        }

        Command::Destroy { env, yes } => {
            let config = ProjectConfig::load(&cli.config)?;
            cli::destroy::run(config, &env, yes, &project_root).await
        }

        Command::Status { env } => {
            let config = ProjectConfig::load(&cli.config)?;
            cli::status::run(config, &env).await
        }

        Command::Logs { service, env, follow } => {
            let config = ProjectConfig::load(&cli.config)?;
            cli::logs::run(config, &env, &service, follow).await
        }

        Command::Ssl { action } => match action {
            SslAction::Status { env } => {
                let config = ProjectConfig::load(&cli.config)?;
                cli::ssl_cmd::status(config, &env, &project_root)
            }
            SslAction::Check { env, domain } => {
                let config = ProjectConfig::load(&cli.config)?;
                cli::ssl_cmd::check(config, &env, &domain, &project_root).await
            }
        },

        Command::Cleanup { env, keep_images } => {
            let config = ProjectConfig::load(&cli.config)?;
            cli::cleanup::run(config, &env, keep_images).await
        }

        Command::Backup { env, volume } => {
            let config = ProjectConfig::load(&cli.config)?;
            cli::backup::backup(config, &env, &volume).await
        }

        Command::Restore { env, volume, backup_id } => {
            let config = ProjectConfig::load(&cli.config)?;
            cli::backup::restore(config, &env, &volume, &backup_id).await
        }

        Command::Secrets { action } => match action {
            SecretsAction::Init => cli::secrets_cmd::init(&project_root),
            SecretsAction::Set { pair, env } => cli::secrets_cmd::set(&env, &pair, &project_root),
            SecretsAction::Unset { key, env } => cli::secrets_cmd::unset(&env, &key, &project_root),
            SecretsAction::List { env, reveal } => cli::secrets_cmd::list(&env, reveal, &project_root),
            SecretsAction::Edit { env } => cli::secrets_cmd::edit(&env, &project_root),
        },
    }
}
