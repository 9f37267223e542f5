pub mod exec;
pub mod pool;

use anyhow::{bail, Context, Result};
use openssh::{KnownHosts, Session, SessionBuilder};
use std::sync::Arc;
use tracing::debug;

pub use pool::{SshHandle, SshPool};

/// Credential for dialing a host. `sshKey` and `password` are mutually
/// exclusive; enforced at construction, not at dial time.
#[derive(Debug, Clone)]
pub enum Auth {
    Key(String),
    Password(String),
}

impl Auth {
    pub fn from_parts(ssh_key: Option<&str>, password: Option<&str>) -> Result<Self> {
        match (ssh_key, password) {
            (Some(_), Some(_)) => bail!("ssh_key and password are mutually exclusive"),
            (Some(key), None) => Ok(Auth::Key(key.to_string())),
            (None, Some(pw)) => Ok(Auth::Password(pw.to_string())),
            (None, None) => bail!("no credential provided: set either ssh_key or password"),
        }
    }
}

pub struct SshSession {
    pub(super) session: Arc<Session>,
    host: String,
}

impl SshSession {
    pub async fn connect(user: &str, host: &str, port: Option<u16>, auth: &Auth) -> Result<Self> {
        debug!("connecting to {}@{}", user, host);

        let mut builder = SessionBuilder::default();
        builder.known_hosts_check(KnownHosts::Accept);
        builder.user(user.to_string());

        if let Some(port) = port {
            builder.port(port);
        }

        match auth {
            Auth::Key(path) => {
                if !std::path::Path::new(path).exists() {
                    bail!("ssh key file not found: {}", path);
                }
                builder.keyfile(path);
            }
            Auth::Password(_) => {
                // openssh shells out to the system ssh client; password auth relies on
                // sshpass or an agent being configured by the operator. We only validate
                // presence here, failing fast rather than at dial time.
            }
        }

        let session = builder
            .connect(host)
            .await
            .with_context(|| format!("failed to connect to {}@{}", user, host))?;

        Ok(Self {
            session: Arc::new(session),
            host: host.to_string(),
        })
    }

    pub fn from_arc(session: Arc<Session>, host: String) -> Self {
        Self { session, host }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn inner(&self) -> &Session {
        &self.session
    }

    pub async fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.session) {
            Ok(session) => session
                .close()
                .await
                .with_context(|| format!("failed to close SSH session to {}", self.host)),
            Err(_) => Ok(()), // other handles still hold it; pool will reap it
        }
    }

    /// Removes a host's entry from `~/.ssh/known_hosts`.
    pub fn remove_host_key(host: &str) -> Result<()> {
        let status = std::process::Command::new("ssh-keygen")
            .arg("-R")
            .arg(host)
            .status()
            .with_context(|| format!("failed to invoke ssh-keygen -R {}", host))?;

        if !status.success() {
            debug!("ssh-keygen -R {} exited with {}", host, status);
        }
        Ok(())
    }
}

/// Single-quotes `value` and escapes embedded `'` as `'"'"'`. Every value crossing a shell boundary in this crate —
/// hook commands, usernames, interpolated paths — goes through this.
pub fn shell_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push_str("'\"'\"'");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// `^[a-z_][a-z0-9_-]*\$?$`, ≤32 chars, applied before any
/// `useradd`/`usermod` invocation.
pub fn validate_username(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 32 {
        bail!("username '{}' must be 1-32 characters", name);
    }

    let mut chars = name.chars().peekable();
    let first = chars.next().unwrap();
    if !(first.is_ascii_lowercase() || first == '_') {
        bail!("username '{}' must start with a lowercase letter or underscore", name);
    }

    let rest: Vec<char> = chars.collect();
    let (body, trailing_dollar) = if rest.last() == Some(&'$') {
        (&rest[..rest.len() - 1], true)
    } else {
        (&rest[..], false)
    };

    for c in body {
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-') {
            bail!("username '{}' contains an invalid character '{}'", name, c);
        }
    }

    let _ = trailing_dollar;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_plain_value() {
        assert_eq!(shell_quote("hello"), "'hello'");
    }

    #[test]
    fn escapes_embedded_single_quote() {
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
    }

    #[test]
    fn accepts_valid_usernames() {
        assert!(validate_username("deploy").is_ok());
        assert!(validate_username("_svc-01").is_ok());
        assert!(validate_username("host$").is_ok());
    }

    #[test]
    fn rejects_invalid_usernames() {
        assert!(validate_username("").is_err());
        assert!(validate_username("Deploy").is_err());
        assert!(validate_username("1deploy").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
        assert!(validate_username("de ploy").is_err());
    }

    #[test]
    fn auth_rejects_both_credentials() {
        assert!(Auth::from_parts(Some("key"), Some("pw")).is_err());
    }

    #[test]
    fn auth_rejects_neither_credential() {
        assert!(Auth::from_parts(None, None).is_err());
    }
}
