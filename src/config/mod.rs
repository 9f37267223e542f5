pub mod dotenv;
pub mod validate;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Top-level `tako.yaml` document.
///
/// Immutable once loaded; owned by the Deploy Orchestrator for the lifetime
/// of a single command invocation.
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    pub environments: HashMap<String, EnvironmentConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub name: String,
    pub address: String,
    #[serde(default = "default_user")]
    pub user: String,
    pub ssh_key: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub role: ServerRole,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

fn default_user() -> String {
    "root".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    #[default]
    Worker,
    Manager,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
    pub services: HashMap<String, ServiceSpec>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServiceSpec {
    pub build: Option<String>,
    pub image: Option<String>,
    pub port: Option<u16>,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub env_file: Option<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub persistent: bool,
    pub proxy: Option<ProxySpec>,
    pub health_check: Option<HealthCheckSpec>,
    #[serde(default)]
    pub deploy: ServiceDeployOptions,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub hooks: Hooks,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub restart: RestartPolicy,
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProxySpec {
    pub domain: String,
    #[serde(default)]
    pub redirect_from: Vec<String>,
    pub tls_provider: Option<String>,
    pub le_email: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckSpec {
    pub path: String,
    #[serde(default = "default_hc_interval")]
    pub interval: u64,
    #[serde(default = "default_hc_timeout")]
    pub timeout: u64,
    #[serde(default = "default_hc_retries")]
    pub retries: u32,
    #[serde(default)]
    pub start_period: u64,
}

fn default_hc_interval() -> u64 {
    5
}
fn default_hc_timeout() -> u64 {
    5
}
fn default_hc_retries() -> u32 {
    12
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServiceDeployOptions {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default = "default_max_unavailable")]
    pub max_unavailable: u32,
}

impl Default for ServiceDeployOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            max_unavailable: default_max_unavailable(),
        }
    }
}

fn default_max_unavailable() -> u32 {
    1
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    Rolling,
    BlueGreen,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Hooks {
    #[serde(default)]
    pub pre_build: Vec<String>,
    #[serde(default)]
    pub post_build: Vec<String>,
    #[serde(default)]
    pub pre_deploy: Vec<String>,
    #[serde(default)]
    pub post_deploy: Vec<String>,
    #[serde(default)]
    pub post_start: Vec<String>,
}

impl Hooks {
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.pre_build
            .iter()
            .chain(self.post_build.iter())
            .chain(self.pre_deploy.iter())
            .chain(self.post_deploy.iter())
            .chain(self.post_start.iter())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    #[default]
    Any,
    Spread,
    Pinned,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    Always,
    UnlessStopped,
    OnFailure,
    No,
}

impl ProjectConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read project file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse project file: {}", path.display()))?;

        validate::validate(&config)?;

        Ok(config)
    }

    pub fn environment(&self, name: &str) -> Result<&EnvironmentConfig> {
        self.environments
            .get(name)
            .with_context(|| format!("Environment '{}' not found in tako.yaml", name))
    }

    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// `<project>/<service>:<version>-<environment>`.
    pub fn image_name(&self, service: &str, environment: &str) -> String {
        format!("{}/{}:{}-{}", self.name, service, self.version, environment)
    }

    /// `<registry>/<project>/<service>:<version>-<environment>` (multi-host form).
    pub fn image_name_with_registry(&self, registry: &str, service: &str, environment: &str) -> String {
        format!(
            "{}/{}/{}:{}-{}",
            registry, self.name, service, self.version, environment
        )
    }
}
