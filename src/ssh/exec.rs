use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::{shell_quote, SshSession};

impl SshSession {
    /// Execute a command and return stdout.
    pub async fn exec(&self, cmd: &str) -> Result<String> {
        debug!("[{}] exec: {}", self.host(), cmd);

        let output = self
            .session
            .command("bash")
            .arg("-c")
            .arg(cmd)
            .output()
            .await
            .with_context(|| format!("failed to execute command on {}: {}", self.host(), cmd))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            bail!(
                "command failed on {} (exit {}): {}\nstdout: {}\nstderr: {}",
                self.host(),
                output.status,
                cmd,
                stdout.trim(),
                stderr.trim()
            );
        }

        Ok(stdout)
    }

    /// Execute a command, returning Ok(true) if exit 0, Ok(false) otherwise.
    pub async fn exec_ok(&self, cmd: &str) -> Result<bool> {
        debug!("[{}] exec_ok: {}", self.host(), cmd);

        let output = self
            .session
            .command("bash")
            .arg("-c")
            .arg(cmd)
            .output()
            .await
            .with_context(|| format!("failed to execute command on {}: {}", self.host(), cmd))?;

        Ok(output.status.success())
    }

    pub async fn path_exists(&self, path: &str) -> Result<bool> {
        self.exec_ok(&format!("test -e {}", shell_quote(path))).await
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let escaped = content.replace('\'', "'\\''");
        self.exec(&format!("cat > {} << 'TAKO_EOF'\n{}\nTAKO_EOF", path, escaped))
            .await?;
        Ok(())
    }

    pub async fn sudo_write_file(&self, path: &str, content: &str) -> Result<()> {
        let escaped = content.replace('\'', "'\\''");
        self.exec(&format!(
            "sudo tee {} > /dev/null << 'TAKO_EOF'\n{}\nTAKO_EOF",
            path, escaped
        ))
        .await?;
        Ok(())
    }

    /// Create a symlink atomically (create temp, then rename).
    pub async fn atomic_symlink(&self, target: &str, link: &str) -> Result<()> {
        let tmp = format!("{}_tmp", link);
        self.exec(&format!("ln -sfn {} {} && mv -Tf {} {}", target, tmp, tmp, link))
            .await?;
        Ok(())
    }

    pub async fn sudo_exec(&self, cmd: &str) -> Result<String> {
        self.exec(&format!("sudo bash -c {}", shell_quote(cmd))).await
    }

    /// Upload a local file's bytes to a remote path via a base64-encoded
    /// heredoc. Suitable for the small config/script payloads this crate
    /// pushes (compose overrides, systemd units, monitoring scripts); not
    /// meant for image transfer (see `build::transfer_image` for that path).
    pub async fn upload(&self, local_bytes: &[u8], remote_path: &str) -> Result<()> {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(local_bytes);
        self.exec(&format!(
            "echo {} | base64 -d > {}",
            shell_quote(&encoded),
            remote_path
        ))
        .await?;
        Ok(())
    }

    /// Stream a running container's logs for up to `duration`, yielding
    /// lines on an `mpsc::Receiver`. Used by the Verifier (C5) and the
    /// `logs --follow` CLI command.
    pub async fn stream_logs(&self, container_name: &str, duration: Duration) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(256);
        let cmd = format!("docker logs -f --tail 100 {}", shell_quote(container_name));

        let mut child = self
            .session
            .command("bash")
            .arg("-c")
            .arg(&cmd)
            .stdout(openssh::Stdio::piped())
            .spawn()
            .await
            .with_context(|| format!("failed to start log stream on {}", self.host()))?;

        let stdout = child
            .stdout()
            .take()
            .context("log stream child has no stdout")?;

        tokio::spawn(async move {
            use tokio::io::{AsyncBufReadExt, BufReader};
            let mut lines = BufReader::new(stdout).lines();
            let deadline = tokio::time::sleep(duration);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                if tx.send(line).await.is_err() {
                                    break;
                                }
                            }
                            _ => break,
                        }
                    }
                    _ = &mut deadline => break,
                }
            }

            let _ = child.disconnect().await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_wraps_path() {
        assert_eq!(shell_quote("/srv/app"), "'/srv/app'");
    }
}
