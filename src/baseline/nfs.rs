use anyhow::Result;

use crate::error::TakoError;
use crate::ssh::SshSession;

/// Top-level directories an NFS export is allowed to live under (spec
/// §4.3). Anything outside this allow-list is rejected before a mount is
/// ever attempted, regardless of how the path is spelled.
const ALLOWED_PREFIXES: &[&str] = &["/srv", "/data", "/mnt", "/opt", "/nfs"];

const DENIED_PREFIXES: &[&str] = &["/etc", "/boot", "/root", "/proc", "/sys", "/dev", "/bin", "/sbin", "/usr", "/lib", "/var/run"];

#[derive(Debug, Clone)]
pub struct NfsMount {
    pub server: String,
    pub export_path: String,
    pub mount_point: String,
}

/// Validate an export path against the allow-list rule: must be
/// absolute, at least two path segments deep, contain no `..` traversal,
/// fall under one of [`ALLOWED_PREFIXES`], and never under
/// [`DENIED_PREFIXES`].
pub fn validate_export_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(TakoError::Config(format!("NFS export path '{}' must be absolute", path)).into());
    }

    if path.split('/').any(|segment| segment == "..") {
        return Err(TakoError::Config(format!("NFS export path '{}' must not contain '..'", path)).into());
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return Err(TakoError::Config(format!(
            "NFS export path '{}' must be at least two levels deep",
            path
        ))
        .into());
    }

    if DENIED_PREFIXES.iter().any(|p| path == *p || path.starts_with(&format!("{}/", p))) {
        return Err(TakoError::Config(format!("NFS export path '{}' is under a denied system directory", path)).into());
    }

    if !ALLOWED_PREFIXES.iter().any(|p| path == *p || path.starts_with(&format!("{}/", p))) {
        return Err(TakoError::Config(format!(
            "NFS export path '{}' must be under one of: {}",
            path,
            ALLOWED_PREFIXES.join(", ")
        ))
        .into());
    }

    Ok(())
}

/// Mount one NFS export with the standard NFSv4.2 options.
pub async fn mount(session: &SshSession, export: &NfsMount) -> Result<()> {
    validate_export_path(&export.export_path)?;
    validate_export_path(&export.mount_point)?;

    session
        .sudo_exec(&format!("mkdir -p {}", export.mount_point))
        .await?;

    let source = format!("{}:{}", export.server, export.export_path);
    session
        .sudo_exec(&format!(
            "mount -t nfs4 -o vers=4.2,rw,hard,timeo=600,retrans=2 {} {}",
            source, export.mount_point
        ))
        .await?;

    let fstab_line = format!(
        "{} {} nfs4 vers=4.2,rw,hard,timeo=600,retrans=2 0 0",
        source, export.mount_point
    );
    session
        .sudo_exec(&format!(
            "grep -qF {} /etc/fstab || echo {} | sudo tee -a /etc/fstab > /dev/null",
            crate::ssh::shell_quote(&fstab_line),
            crate::ssh::shell_quote(&fstab_line)
        ))
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_allowlisted_path() {
        assert!(validate_export_path("/srv/app-data").is_ok());
        assert!(validate_export_path("/data/shared/uploads").is_ok());
    }

    #[test]
    fn rejects_relative_path() {
        assert!(validate_export_path("srv/data").is_err());
    }

    #[test]
    fn rejects_traversal() {
        assert!(validate_export_path("/srv/../etc/passwd").is_err());
    }

    #[test]
    fn rejects_shallow_path() {
        assert!(validate_export_path("/srv").is_err());
    }

    #[test]
    fn rejects_system_directory() {
        assert!(validate_export_path("/etc/app-data").is_err());
    }

    #[test]
    fn rejects_non_allowlisted_prefix() {
        assert!(validate_export_path("/home/user/data").is_err());
    }
}
