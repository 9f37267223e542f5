use anyhow::{bail, Context, Result};
use std::process::{Command, Stdio};
use tracing::debug;

use crate::config::{ProjectConfig, ServiceSpec};
use crate::error::TakoError;
use crate::output;
use crate::ssh::SshSession;

/// Resolves a service's build context, runs the framework auto-detect or
/// `Dockerfile` build, and tags the result with the project/environment
/// naming convention.
pub struct ImageBuilder<'a> {
    config: &'a ProjectConfig,
    registry: Option<&'a str>,
}

/// Frameworks nixpacks can auto-detect without a Dockerfile, checked in
/// this order.
const FRAMEWORK_MARKERS: &[(&str, &str)] = &[
    ("package.json", "node"),
    ("requirements.txt", "python"),
    ("go.mod", "go"),
    ("Gemfile", "ruby"),
    ("Cargo.toml", "rust"),
    ("composer.json", "php"),
];

impl<'a> ImageBuilder<'a> {
    pub fn new(config: &'a ProjectConfig, registry: Option<&'a str>) -> Self {
        Self { config, registry }
    }

    pub fn image_name(&self, service: &str, environment: &str) -> String {
        match self.registry {
            Some(registry) => self.config.image_name_with_registry(registry, service, environment),
            None => self.config.image_name(service, environment),
        }
    }

    /// A service with `image` and no `build` is prebuilt; return its
    /// reference unchanged without invoking the builder at all.
    pub fn skip_if_prebuilt(service: &ServiceSpec) -> Option<&str> {
        if service.build.is_none() {
            service.image.as_deref()
        } else {
            None
        }
    }

    /// Build one service's image locally. A present `Dockerfile` under the
    /// `build` context drives a plain `docker build`; otherwise fall back to
    /// `nixpacks build`. `which` checks nixpacks is on PATH up front so a
    /// missing tool is a `ConfigError` before any remote work starts.
    pub fn build_image(&self, project_root: &std::path::Path, service_name: &str, service: &ServiceSpec, environment: &str) -> Result<String> {
        let image = self.image_name(service_name, environment);
        let context = service
            .build
            .as_deref()
            .context("build_image called on a service with no build context")?;
        let context_path = project_root.join(context);

        output::info(&format!("building {} from {}", service_name, context));

        if context_path.join("Dockerfile").exists() {
            self.docker_build(&context_path, &image)?;
        } else {
            self.nixpacks_build(&context_path, &image)?;
        }

        Ok(image)
    }

    fn docker_build(&self, context_path: &std::path::Path, image: &str) -> Result<()> {
        let status = Command::new("docker")
            .args(["build", "-t", image, "."])
            .current_dir(context_path)
            .status()
            .context("failed to invoke docker build")?;

        if !status.success() {
            bail!(TakoError::Fatal(format!("docker build failed for {}", image)));
        }
        Ok(())
    }

    fn nixpacks_build(&self, context_path: &std::path::Path, image: &str) -> Result<()> {
        if which::which("nixpacks").is_err() {
            bail!(TakoError::Config(
                "no Dockerfile present and `nixpacks` is not installed; install nixpacks or add a Dockerfile".into()
            ));
        }

        if detect_framework(context_path).is_none() {
            bail!(TakoError::Config(format!(
                "could not auto-detect a framework in {} and no Dockerfile is present",
                context_path.display()
            )));
        }

        let status = Command::new("nixpacks")
            .args(["build", ".", "--name", image])
            .current_dir(context_path)
            .status()
            .context("failed to invoke nixpacks build")?;

        if !status.success() {
            bail!(TakoError::Fatal(format!("nixpacks build failed for {}", image)));
        }
        Ok(())
    }

    /// Transfer a locally built image to a remote host via `docker save |
    /// ssh docker load` — the multi-host counterpart to a direct remote build.
    pub async fn transfer_image(&self, session: &SshSession, image: &str) -> Result<()> {
        output::info(&format!("transferring {} to {}", image, session.host()));

        let mut save_cmd = Command::new("docker");
        save_cmd.arg("save").arg(image).stdout(Stdio::piped());

        let mut save_child = save_cmd.spawn().context("failed to spawn docker save")?;
        let mut save_stdout = save_child.stdout.take().context("failed to capture docker save stdout")?;

        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut save_stdout, &mut buf).context("failed to read docker save output")?;

        let status = save_child.wait().context("docker save did not exit cleanly")?;
        if !status.success() {
            bail!("docker save failed for {}", image);
        }

        let remote_tar = format!("/tmp/tako-image-{}.tar", std::process::id());
        session.upload(&buf, &remote_tar).await.context("failed to upload image tarball")?;
        session
            .exec(&format!("docker load -i {} && rm -f {}", remote_tar, remote_tar))
            .await
            .context("docker load failed on remote")?;

        debug!("transferred {} bytes for image {}", buf.len(), image);
        Ok(())
    }
}

fn detect_framework(context_path: &std::path::Path) -> Option<&'static str> {
    for (marker, framework) in FRAMEWORK_MARKERS {
        if context_path.join(marker).exists() {
            return Some(framework);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn service(build: Option<&str>, image: Option<&str>) -> ServiceSpec {
        ServiceSpec {
            build: build.map(String::from),
            image: image.map(String::from),
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
    fn skip_if_prebuilt_returns_image() {
        let svc = service(None, Some("nginx:latest"));
        assert_eq!(ImageBuilder::skip_if_prebuilt(&svc), Some("nginx:latest"));
    }

    #[test]
    fn skip_if_prebuilt_returns_none_for_build_service() {
        let svc = service(Some("."), None);
        assert_eq!(ImageBuilder::skip_if_prebuilt(&svc), None);
    }

    #[test]
    fn detects_node_framework() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detect_framework(dir.path()), Some("node"));
    }

    #[test]
    fn detects_no_framework_when_nothing_matches() {
        let dir = tempdir().unwrap();
        assert_eq!(detect_framework(dir.path()), None);
    }

    #[test]
    fn image_name_uses_registry_when_set() {
        let config = ProjectConfig {
            name: "demo".into(),
            version: "1".into(),
            servers: vec![],
            environments: HashMap::new(),
        };
        let builder = ImageBuilder::new(&config, Some("registry.example.com"));
        assert_eq!(builder.image_name("web", "prod"), "registry.example.com/demo/web:1-prod");
    }
}
