use std::io::Write as _;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::output;
use crate::secrets::{self, crypto};

pub fn init(project_root: &Path) -> Result<()> {
    let dir = secrets::secrets_dir(project_root);
    std::fs::create_dir_all(&dir).context("failed to create .tako/secrets/ directory")?;

    output::success("secrets store initialized");
    println!();
    output::info("set TAKO_SECRETS_PASSPHRASE before running `tako secrets set/list/edit`");
    output::warning("losing the passphrase means losing every secret encrypted with it");
    Ok(())
}

pub fn set(env: &str, pair: &str, project_root: &Path) -> Result<()> {
    let (key_name, value) = pair.split_once('=').context("expected KEY=VALUE format")?;
    let passphrase = secrets::load_passphrase()?;

    let mut secrets = secrets::read_secrets(project_root, env, &passphrase)?;
    secrets.insert(key_name.trim().to_string(), value.trim().to_string());
    secrets::write_secrets(project_root, env, &secrets, &passphrase)?;

    output::success(&format!("set {} in environment '{}'", key_name.trim(), env));
    Ok(())
}

pub fn unset(env: &str, key_name: &str, project_root: &Path) -> Result<()> {
    let passphrase = secrets::load_passphrase()?;
    let mut secrets = secrets::read_secrets(project_root, env, &passphrase)?;

    if secrets.remove(key_name).is_none() {
        output::warning(&format!("key '{}' not found in environment '{}'", key_name, env));
        return Ok(());
    }

    secrets::write_secrets(project_root, env, &secrets, &passphrase)?;
    output::success(&format!("removed {} from environment '{}'", key_name, env));
    Ok(())
}

pub fn list(env: &str, reveal: bool, project_root: &Path) -> Result<()> {
    let passphrase = secrets::load_passphrase()?;
    let secrets = secrets::read_secrets(project_root, env, &passphrase)?;

    if secrets.is_empty() {
        output::info(&format!("no secrets for environment '{}'", env));
        return Ok(());
    }

    output::header(&format!("secrets for environment '{}'", env));
    for (key, value) in &secrets {
        if reveal {
            println!("  {}={}", key, value);
        } else {
            println!("  {}={}", key, mask_value(value));
        }
    }
    Ok(())
}

pub fn edit(env: &str, project_root: &Path) -> Result<()> {
    let passphrase = secrets::load_passphrase()?;
    let current = secrets::read_secrets(project_root, env, &passphrase)?;
    let content = secrets::serialize_dotenv(&current);

    let mut tmpfile = tempfile::Builder::new()
        .prefix("tako-secrets-")
        .suffix(".env")
        .tempfile()
        .context("failed to create temp file")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmpfile.path(), std::fs::Permissions::from_mode(0o600))?;
    }

    tmpfile.write_all(content.as_bytes()).context("failed to write temp file")?;
    tmpfile.flush()?;

    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let status = std::process::Command::new(&editor)
        .arg(tmpfile.path())
        .status()
        .with_context(|| format!("failed to open editor '{}'", editor))?;

    if !status.success() {
        bail!("editor exited with an error");
    }

    let edited = std::fs::read_to_string(tmpfile.path()).context("failed to read edited file")?;
    let new_secrets = secrets::parse_dotenv(&edited);
    secrets::write_secrets(project_root, env, &new_secrets, &passphrase)?;

    output::success(&format!("secrets updated for environment '{}'", env));
    Ok(())
}

fn mask_value(value: &str) -> String {
    if value.len() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", &value[..4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_value_hides_short_values_entirely() {
        assert_eq!(mask_value("abc"), "****");
    }

    #[test]
    fn mask_value_keeps_prefix_for_longer_values() {
        assert_eq!(mask_value("hunter2x"), "hunt****");
    }
}
