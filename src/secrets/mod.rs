pub mod crypto;

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory where encrypted secrets are stored: `.tako/secrets/`.
pub fn secrets_dir(project_root: &Path) -> PathBuf {
    project_root.join(".tako").join("secrets")
}

/// Path to the encrypted secrets file for a given environment.
pub fn secrets_path(project_root: &Path, environment: &str) -> PathBuf {
    secrets_dir(project_root).join(format!("{}.env.enc", environment))
}

/// Read and decrypt secrets for a given environment, using `passphrase`.
/// Returns an empty map if no secrets file exists yet for this environment.
pub fn read_secrets(project_root: &Path, environment: &str, passphrase: &str) -> Result<BTreeMap<String, String>> {
    let path = secrets_path(project_root, environment);

    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let ciphertext = fs::read_to_string(&path)
        .with_context(|| format!("failed to read secrets file: {}", path.display()))?;

    let plaintext = crypto::decrypt(ciphertext.trim(), passphrase)?;
    Ok(parse_dotenv(&plaintext))
}

/// Encrypt and write secrets for a given environment.
pub fn write_secrets(
    project_root: &Path,
    environment: &str,
    secrets: &BTreeMap<String, String>,
    passphrase: &str,
) -> Result<()> {
    let dir = secrets_dir(project_root);
    fs::create_dir_all(&dir).context("failed to create .tako/secrets/ directory")?;

    let plaintext = serialize_dotenv(secrets);
    let ciphertext = crypto::encrypt(&plaintext, passphrase)?;

    let path = secrets_path(project_root, environment);
    fs::write(&path, ciphertext.as_bytes())
        .with_context(|| format!("failed to write secrets file: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Compute a SHA-256 hash of the encrypted secrets file, used by the
/// orchestrator to detect whether a service's secrets changed between
/// deploys without ever touching plaintext.
pub fn compute_hash(project_root: &Path, environment: &str) -> Result<Option<String>> {
    use sha2::{Digest, Sha256};

    let path = secrets_path(project_root, environment);
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read(&path)
        .with_context(|| format!("failed to read secrets file: {}", path.display()))?;

    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(Some(hex::encode(hasher.finalize())))
}

/// Load the passphrase used to encrypt/decrypt secrets: `TAKO_SECRETS_PASSPHRASE`
/// env var first (for CI/CD), falling back to an interactive prompt.
pub fn load_passphrase() -> Result<String> {
    if let Ok(pass) = std::env::var("TAKO_SECRETS_PASSPHRASE") {
        if !pass.is_empty() {
            return Ok(pass);
        }
    }
    bail!("no secrets passphrase available: set TAKO_SECRETS_PASSPHRASE");
}

pub fn parse_dotenv(content: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

pub fn serialize_dotenv(map: &BTreeMap<String, String>) -> String {
    map.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_secrets() {
        let dir = tempdir().unwrap();
        let mut secrets = BTreeMap::new();
        secrets.insert("DB_PASSWORD".to_string(), "hunter2".to_string());

        write_secrets(dir.path(), "prod", &secrets, "correct-horse").unwrap();
        let loaded = read_secrets(dir.path(), "prod", "correct-horse").unwrap();

        assert_eq!(loaded.get("DB_PASSWORD").unwrap(), "hunter2");
    }

    #[test]
    fn read_secrets_missing_file_returns_empty() {
        let dir = tempdir().unwrap();
        let secrets = read_secrets(dir.path(), "prod", "whatever").unwrap();
        assert!(secrets.is_empty());
    }

    #[test]
    fn compute_hash_changes_with_content() {
        let dir = tempdir().unwrap();
        let mut secrets = BTreeMap::new();
        secrets.insert("A".to_string(), "1".to_string());
        write_secrets(dir.path(), "prod", &secrets, "pw").unwrap();
        let hash1 = compute_hash(dir.path(), "prod").unwrap().unwrap();

        secrets.insert("B".to_string(), "2".to_string());
        write_secrets(dir.path(), "prod", &secrets, "pw").unwrap();
        let hash2 = compute_hash(dir.path(), "prod").unwrap().unwrap();

        assert_ne!(hash1, hash2);
    }
}
