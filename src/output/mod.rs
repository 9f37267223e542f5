use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn step(num: usize, total: usize, msg: &str) {
    println!(
        "{} {}",
        style(format!("[{}/{}]", num, total)).bold().cyan(),
        msg
    );
}

pub fn success(msg: &str) {
    println!("{} {}", style("✓").bold().green(), msg);
}

pub fn error(msg: &str) {
    eprintln!("{} {}", style("✗").bold().red(), msg);
}

pub fn warning(msg: &str) {
    eprintln!("{} {}", style("!").bold().yellow(), msg);
}

pub fn info(msg: &str) {
    println!("{} {}", style("→").bold().blue(), msg);
}

pub fn header(msg: &str) {
    println!("\n{}", style(msg).bold().underlined());
}

/// Structured events emitted by the engine's components. Components never print directly; they call
/// `emit`, and this module is the single sink that formats for the console.
/// The Notifier collaborator consumes the same enum for webhook/Slack/
/// Discord payloads.
#[derive(Debug, Clone)]
pub enum Event {
    DeployStarted {
        project: String,
        environment: String,
    },
    ServiceBuilding {
        service: String,
    },
    ServiceBuilt {
        service: String,
        image: String,
    },
    ServiceRolling {
        service: String,
        strategy: String,
    },
    DeploySucceeded {
        service: String,
    },
    DeployFailed {
        service: String,
        reason: String,
    },
    DeployRolledBack {
        service: String,
    },
    SslIssued {
        domain: String,
    },
    DeploySummary {
        committed: Vec<String>,
        failed: Vec<String>,
        rolled_back: Vec<String>,
    },
}

impl Event {
    pub fn severity(&self) -> Severity {
        match self {
            Event::DeployFailed { .. } => Severity::Error,
            Event::DeployRolledBack { .. } => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Format and print an event to the console. Kept separate from the
/// Notifier so a run with no webhook configured still gets readable
/// terminal output.
pub fn emit(event: &Event) {
    match event {
        Event::DeployStarted { project, environment } => {
            header(&format!("Deploying {} → {}", project, environment));
        }
        Event::ServiceBuilding { service } => {
            info(&format!("building {}", service));
        }
        Event::ServiceBuilt { service, image } => {
            success(&format!("built {} ({})", service, image));
        }
        Event::ServiceRolling { service, strategy } => {
            info(&format!("rolling out {} ({})", service, strategy));
        }
        Event::DeploySucceeded { service } => {
            success(&format!("{} deployed", service));
        }
        Event::DeployFailed { service, reason } => {
            error(&format!("{} failed: {}", service, reason));
        }
        Event::DeployRolledBack { service } => {
            warning(&format!("{} rolled back", service));
        }
        Event::SslIssued { domain } => {
            success(&format!("certificate issued for {}", domain));
        }
        Event::DeploySummary {
            committed,
            failed,
            rolled_back,
        } => {
            header("Deploy summary");
            for s in committed {
                success(s);
            }
            for s in rolled_back {
                warning(&format!("{} (rolled back)", s));
            }
            for s in failed {
                error(s);
            }
        }
    }
}
