pub mod keys;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Cluster State Store. Owns `.tako/` — the project's local
/// record of provisioned infra, ssh keys, and in-flight rollout/TLS state.
pub struct StateStore {
    root: PathBuf,
}

const OUTPUTS_FILE: &str = "outputs.json";
const STATE_FILE: &str = "state.json";
const SSH_KEYS_FILE: &str = "infra/ssh_keys.json";
const PENDING_CERTS_FILE: &str = "ssl/pending.json";

impl StateStore {
    pub fn new(project_root: &Path) -> Self {
        Self {
            root: project_root.join(".tako"),
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;
        fs::create_dir_all(self.root.join("infra"))?;
        fs::create_dir_all(self.root.join("ssl"))?;
        Ok(())
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Atomically write `value` as JSON to `rel` under `.tako/`: write to a
    /// sibling temp file then rename, so a crash mid-write never leaves a
    /// truncated file. `mode` sets the resulting file's Unix permission bits.
    fn write_atomic<T: Serialize>(&self, rel: &str, value: &T, mode: u32) -> Result<()> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(value)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;

        use std::io::Write;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;

        let file = tmp.as_file();
        let mut perms = file.metadata()?.permissions();
        perms.set_mode(mode);
        file.set_permissions(perms)?;

        tmp.persist(&path)
            .with_context(|| format!("failed to persist {}", path.display()))?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, rel: &str) -> Result<Option<T>> {
        let path = self.path(rel);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(value))
    }

    pub fn save_outputs(&self, outputs: &Outputs) -> Result<()> {
        self.write_atomic(OUTPUTS_FILE, outputs, 0o600)
    }

    pub fn load_outputs(&self) -> Result<Outputs> {
        Ok(self.read_json(OUTPUTS_FILE)?.unwrap_or_default())
    }

    pub fn save_infra_state(&self, state: &InfraState) -> Result<()> {
        self.write_atomic(STATE_FILE, state, 0o600)
    }

    pub fn load_infra_state(&self) -> Result<InfraState> {
        Ok(self.read_json(STATE_FILE)?.unwrap_or_default())
    }

    /// Remove `outputs.json` and `state.json` before any key files.
    pub fn clear_state(&self) -> Result<()> {
        for rel in [OUTPUTS_FILE, STATE_FILE] {
            let path = self.path(rel);
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }

    pub fn get_server_ip(&self, name: &str, index: usize) -> Result<Option<String>> {
        let outputs = self.load_outputs()?;
        Ok(outputs
            .servers
            .get(name)
            .and_then(|ips| ips.get(index))
            .cloned())
    }

    pub fn save_pending_certificates(&self, pending: &[keys::PendingCertificate]) -> Result<()> {
        self.write_atomic(PENDING_CERTS_FILE, &pending.to_vec(), 0o600)
    }

    pub fn load_pending_certificates(&self) -> Result<Vec<keys::PendingCertificate>> {
        Ok(self.read_json(PENDING_CERTS_FILE)?.unwrap_or_default())
    }

    pub fn ensure_keypair(&self, project_name: &str) -> Result<keys::SshKeyPair> {
        if let Some(existing) = self.read_json::<keys::SshKeyPair>(SSH_KEYS_FILE)? {
            return Ok(existing);
        }

        let pair = keys::SshKeyPair::generate(project_name);
        self.write_atomic(SSH_KEYS_FILE, &pair, 0o600)?;

        // Public key material is not sensitive; keep the combined record at
        // 0600 (it still stores the private key) but write a companion
        // plain-text .pub file at 0644 the way ssh-keygen itself does.
        let pub_path = self.path("infra/ssh_keys.pub");
        fs::write(&pub_path, &pair.public_key_openssh)?;
        let mut perms = fs::metadata(&pub_path)?.permissions();
        perms.set_mode(0o644);
        fs::set_permissions(&pub_path, perms)?;

        Ok(pair)
    }

    pub fn set_provider_key_id(&self, key_id: &str) -> Result<()> {
        let mut state = self.load_infra_state()?;
        state.provider_key_id = Some(key_id.to_string());
        self.save_infra_state(&state)
    }

    pub fn cleanup_keys(&self) -> Result<()> {
        for rel in [SSH_KEYS_FILE, "infra/ssh_keys.pub"] {
            let path = self.path(rel);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Outputs {
    /// server name -> list of IPs (index 0 is primary)
    #[serde(default)]
    pub servers: HashMap<String, Vec<String>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InfraState {
    #[serde(default)]
    pub provider_key_id: Option<String>,
    #[serde(default)]
    pub provisioned_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_outputs() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.ensure_dirs().unwrap();

        let mut outputs = Outputs::default();
        outputs.servers.insert("web".to_string(), vec!["10.0.0.1".to_string()]);
        store.save_outputs(&outputs).unwrap();

        let loaded = store.load_outputs().unwrap();
        assert_eq!(loaded.servers.get("web").unwrap()[0], "10.0.0.1");
    }

    #[test]
    fn clear_state_removes_outputs_and_state_only() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.ensure_dirs().unwrap();
        store.save_outputs(&Outputs::default()).unwrap();
        store.save_infra_state(&InfraState::default()).unwrap();
        store.ensure_keypair("proj").unwrap();

        store.clear_state().unwrap();

        assert!(!dir.path().join(".tako/outputs.json").exists());
        assert!(!dir.path().join(".tako/state.json").exists());
        assert!(dir.path().join(".tako/infra/ssh_keys.json").exists());
    }

    #[test]
    fn ensure_keypair_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.ensure_dirs().unwrap();

        let a = store.ensure_keypair("proj").unwrap();
        let b = store.ensure_keypair("proj").unwrap();
        assert_eq!(a.public_key_openssh, b.public_key_openssh);
    }

    #[test]
    fn get_server_ip_returns_none_when_absent() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.ensure_dirs().unwrap();
        assert!(store.get_server_ip("web", 0).unwrap().is_none());
    }
}
