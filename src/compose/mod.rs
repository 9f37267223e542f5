use anyhow::{Context, Result};
use minijinja::Environment;
use serde::Serialize;

use crate::config::{ProjectConfig, ProxySpec, ServiceSpec};

const OVERRIDE_TEMPLATE: &str = include_str!("../../templates/docker-compose.override.yml.j2");

/// One resolved image reference for a service in this rollout, used to
/// render the compose override.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedService {
    pub name: String,
    pub image: String,
    pub port: Option<u16>,
    pub replicas: u32,
    pub env: Vec<(String, String)>,
    pub volumes: Vec<String>,
    pub proxy: Option<RenderedProxy>,
    pub weight: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedProxy {
    pub domain: String,
    pub redirect_from: Vec<String>,
    pub tls: bool,
}

impl RenderedService {
    pub fn from_spec(name: &str, image: String, spec: &ServiceSpec, weight: u32) -> Self {
        Self {
            name: name.to_string(),
            image,
            port: spec.port,
            replicas: spec.replicas,
            env: spec.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            volumes: spec.volumes.clone(),
            proxy: spec.proxy.as_ref().map(render_proxy),
            weight,
        }
    }
}

fn render_proxy(proxy: &ProxySpec) -> RenderedProxy {
    RenderedProxy {
        domain: proxy.domain.clone(),
        redirect_from: proxy.redirect_from.clone(),
        tls: proxy.tls_provider.is_some(),
    }
}

/// Real Traefik router/load-balancer labels for one container, mirroring
/// `templates/docker-compose.override.yml.j2`'s label set. The rollout
/// controller starts replicas with `docker run` rather than `docker compose
/// up`, so it calls this directly instead of applying the rendered override.
pub fn traefik_labels(service_name: &str, port: Option<u16>, proxy: Option<&ProxySpec>, weight: u32) -> Vec<String> {
    let Some(proxy) = proxy else {
        return vec!["traefik.enable=false".to_string()];
    };

    let mut labels = vec![
        "traefik.enable=true".to_string(),
        format!("traefik.http.routers.{}.rule=Host(`{}`)", service_name, proxy.domain),
    ];

    if let Some(port) = port {
        labels.push(format!("traefik.http.services.{}.loadbalancer.server.port={}", service_name, port));
    }
    labels.push(format!("traefik.http.services.{}.loadbalancer.server.weight={}", service_name, weight));

    if proxy.tls_provider.is_some() {
        labels.push(format!("traefik.http.routers.{}.tls=true", service_name));
        labels.push(format!("traefik.http.routers.{}.tls.certresolver=tako", service_name));
    }

    for (i, redirect) in proxy.redirect_from.iter().enumerate() {
        let idx = i + 1;
        labels.push(format!("traefik.http.routers.{}-redirect-{}.rule=Host(`{}`)", service_name, idx, redirect));
        labels.push(format!(
            "traefik.http.routers.{}-redirect-{}.middlewares={}-redirect",
            service_name, idx, service_name
        ));
        labels.push(format!(
            "traefik.http.middlewares.{}-redirect.redirectregex.regex=^https?://{}/(.*)",
            service_name, redirect
        ));
        labels.push(format!(
            "traefik.http.middlewares.{}-redirect.redirectregex.replacement=https://{}/${{1}}",
            service_name, proxy.domain
        ));
    }

    labels
}

/// Render `docker-compose.override.yml` for one environment's full service
/// graph — router, TLS, and load-balancer labels per service.
pub fn generate_override(config: &ProjectConfig, environment: &str, services: &[RenderedService]) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("override", OVERRIDE_TEMPLATE)
        .context("failed to load compose override template")?;

    let tmpl = env.get_template("override").unwrap();
    let rendered = tmpl
        .render(minijinja::context! {
            project => &config.name,
            environment => environment,
            services => services,
        })
        .context("failed to render compose override template")?;

    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn renders_without_error_for_single_service() {
        let config = ProjectConfig {
            name: "demo".to_string(),
            version: "1".to_string(),
            servers: vec![],
            environments: HashMap::new(),
        };

        let svc = RenderedService {
            name: "web".to_string(),
            image: "demo/web:1-prod".to_string(),
            port: Some(8080),
            replicas: 2,
            env: vec![("FOO".to_string(), "bar".to_string())],
            volumes: vec![],
            proxy: Some(RenderedProxy {
                domain: "example.com".to_string(),
                redirect_from: vec![],
                tls: true,
            }),
            weight: 100,
        };

        let rendered = generate_override(&config, "prod", &[svc]).unwrap();
        assert!(rendered.contains("demo/web:1-prod"));
        assert!(rendered.contains("example.com"));
    }

    #[test]
    fn traefik_labels_disabled_without_proxy() {
        let labels = traefik_labels("web", Some(8080), None, 100);
        assert_eq!(labels, vec!["traefik.enable=false".to_string()]);
    }

    #[test]
    fn traefik_labels_carry_routing_tls_and_weight() {
        let proxy = ProxySpec {
            domain: "example.com".to_string(),
            redirect_from: vec!["www.example.com".to_string()],
            tls_provider: Some("letsencrypt".to_string()),
            le_email: None,
        };

        let labels = traefik_labels("web", Some(8080), Some(&proxy), 50);

        assert!(labels.contains(&"traefik.enable=true".to_string()));
        assert!(labels.contains(&"traefik.http.routers.web.rule=Host(`example.com`)".to_string()));
        assert!(labels.contains(&"traefik.http.services.web.loadbalancer.server.port=8080".to_string()));
        assert!(labels.contains(&"traefik.http.services.web.loadbalancer.server.weight=50".to_string()));
        assert!(labels.contains(&"traefik.http.routers.web.tls=true".to_string()));
        assert!(labels.contains(&"traefik.http.routers.web.tls.certresolver=tako".to_string()));
        assert!(labels.iter().any(|l| l.contains("web-redirect-1.rule=Host(`www.example.com`)")));
    }
}
