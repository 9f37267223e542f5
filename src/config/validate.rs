use super::{EnvironmentConfig, ProjectConfig, ServiceSpec};
use crate::error::TakoError;
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};

fn hook_is_denied(cmd: &str) -> Option<&'static str> {
    let lower = cmd.to_lowercase();
    if lower.contains("rm -rf /") || lower.contains("rm -rf /*") {
        return Some("recursive delete of a root path");
    }
    if lower.contains("mkfs") {
        return Some("filesystem format command");
    }
    if lower.contains(":(){ :|:& };:") || lower.contains(":(){:|:&};:") {
        return Some("fork bomb");
    }
    if lower.contains("/dev/sda") || lower.contains("/dev/nvme") {
        return Some("direct write to a block device");
    }
    if (lower.contains("curl ") || lower.contains("wget ")) && lower.contains("| sh") {
        return Some("pipe-to-shell download");
    }
    if (lower.contains("curl ") || lower.contains("wget ")) && lower.contains("| bash") {
        return Some("pipe-to-shell download");
    }
    if lower.contains("| sudo") || lower.contains("|sudo") {
        return Some("pipe into sudo");
    }
    if lower.contains("nc -e") || lower.contains("bash -i >&") {
        return Some("reverse shell pattern");
    }
    None
}

/// Structural validation performed at load time. The Level Scheduler (C7)
/// independently re-derives the dependency DAG and will report cycles with
/// its own error; this pass only rejects `dependsOn` references to services
/// that don't exist, since that's a config typo rather than a topology
/// problem.
pub fn validate(config: &ProjectConfig) -> Result<()> {
    if config.name.trim().is_empty() {
        return Err(TakoError::Config("project name must not be empty".into()).into());
    }
    if config.version.trim().is_empty() {
        return Err(TakoError::Config("project version must not be empty".into()).into());
    }

    let mut server_names = HashSet::new();
    for server in &config.servers {
        if !server_names.insert(server.name.as_str()) {
            return Err(TakoError::Config(format!("duplicate server name '{}'", server.name)).into());
        }
        if server.ssh_key.is_some() && server.password.is_some() {
            return Err(TakoError::Config(format!(
                "server '{}' specifies both ssh_key and password; exactly one credential is allowed",
                server.name
            ))
            .into());
        }
    }

    if config.environments.is_empty() {
        return Err(TakoError::Config("project defines no environments".into()).into());
    }

    for (env_name, env) in &config.environments {
        validate_environment(env_name, env)?;
    }

    Ok(())
}

fn validate_environment(env_name: &str, env: &EnvironmentConfig) -> Result<()> {
    if env.services.is_empty() {
        return Err(TakoError::Config(format!("environment '{}' defines no services", env_name)).into());
    }

    let mut domains: HashMap<&str, &str> = HashMap::new();

    for (service_name, service) in &env.services {
        validate_service(env_name, service_name, service)?;

        if let Some(proxy) = &service.proxy {
            if let Some(owner) = domains.insert(proxy.domain.as_str(), service_name.as_str()) {
                return Err(TakoError::Config(format!(
                    "domain '{}' is claimed by both '{}' and '{}' in environment '{}'",
                    proxy.domain, owner, service_name, env_name
                ))
                .into());
            }
        }

        for dep in &service.depends_on {
            if dep == service_name {
                return Err(TakoError::Config(format!(
                    "service '{}' in environment '{}' depends on itself",
                    service_name, env_name
                ))
                .into());
            }
            if !env.services.contains_key(dep) {
                return Err(TakoError::Config(format!(
                    "service '{}' in environment '{}' depends on undefined service '{}'",
                    service_name, env_name, dep
                ))
                .into());
            }
        }
    }

    Ok(())
}

fn validate_service(env_name: &str, service_name: &str, service: &ServiceSpec) -> Result<()> {
    if service.build.is_none() && service.image.is_none() {
        return Err(TakoError::Config(format!(
            "service '{}' in environment '{}' must set either 'build' or 'image'",
            service_name, env_name
        ))
        .into());
    }
    if service.build.is_some() && service.image.is_some() {
        return Err(TakoError::Config(format!(
            "service '{}' in environment '{}' sets both 'build' and 'image'; pick one",
            service_name, env_name
        ))
        .into());
    }

    if service.health_check.is_some() && service.port.is_none() {
        return Err(TakoError::Config(format!(
            "service '{}' in environment '{}' declares a health_check but no port",
            service_name, env_name
        ))
        .into());
    }

    if service.proxy.is_some() && service.port.is_none() {
        return Err(TakoError::Config(format!(
            "service '{}' in environment '{}' declares a proxy but no port",
            service_name, env_name
        ))
        .into());
    }

    if service.replicas == 0 {
        return Err(TakoError::Config(format!(
            "service '{}' in environment '{}' requests zero replicas",
            service_name, env_name
        ))
        .into());
    }

    if service.persistent && service.replicas > 1 {
        return Err(TakoError::Config(format!(
            "service '{}' in environment '{}' is persistent but requests {} replicas; persistent services are single-instance",
            service_name, env_name, service.replicas
        ))
        .into());
    }

    for cmd in service.hooks.all() {
        if let Some(reason) = hook_is_denied(cmd) {
            return Err(anyhow!(TakoError::Config(format!(
                "service '{}' in environment '{}' declares a disallowed hook ({}): {}",
                service_name, env_name, reason, cmd
            ))));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvironmentConfig, ProxySpec};
    use std::collections::HashMap;

    fn minimal_service() -> ServiceSpec {
        ServiceSpec {
            build: Some(".".into()),
            image: None,
            port: None,
            replicas: 1,
            env: HashMap::new(),
            env_file: None,
            volumes: vec![],
            persistent: false,
            proxy: None,
            health_check: None,
            deploy: Default::default(),
            depends_on: vec![],
            hooks: Default::default(),
            placement: Default::default(),
            restart: Default::default(),
        }
    }

    #[test]
    fn rejects_missing_build_and_image() {
        let mut svc = minimal_service();
        svc.build = None;
        let err = validate_service("prod", "web", &svc).unwrap_err();
        assert!(err.to_string().contains("build"));
    }

    #[test]
    fn rejects_self_dependency() {
        let mut services = HashMap::new();
        let mut svc = minimal_service();
        svc.depends_on = vec!["web".into()];
        services.insert("web".to_string(), svc);
        let env = EnvironmentConfig { services };
        let err = validate_environment("prod", &env).unwrap_err();
        assert!(err.to_string().contains("depends on itself"));
    }

    #[test]
    fn rejects_duplicate_domain() {
        let mut services = HashMap::new();
        let mut a = minimal_service();
        a.port = Some(8080);
        a.proxy = Some(ProxySpec {
            domain: "example.com".into(),
            redirect_from: vec![],
            tls_provider: None,
            le_email: None,
        });
        let mut b = minimal_service();
        b.port = Some(8081);
        b.proxy = Some(ProxySpec {
            domain: "example.com".into(),
            redirect_from: vec![],
            tls_provider: None,
            le_email: None,
        });
        services.insert("a".to_string(), a);
        services.insert("b".to_string(), b);
        let env = EnvironmentConfig { services };
        let err = validate_environment("prod", &env).unwrap_err();
        assert!(err.to_string().contains("is claimed by both"));
    }

    #[test]
    fn rejects_denylisted_hook() {
        let mut svc = minimal_service();
        svc.hooks.pre_deploy = vec!["rm -rf / --no-preserve-root".into()];
        let err = validate_service("prod", "web", &svc).unwrap_err();
        assert!(err.to_string().contains("disallowed hook"));
    }

    #[test]
    fn accepts_minimal_valid_service() {
        let svc = minimal_service();
        assert!(validate_service("prod", "web", &svc).is_ok());
    }
}
