use super::{Auth, SshSession};
use anyhow::Result;
use openssh::Session;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

type PoolKey = (String, String, u16);

struct PoolEntry {
    session: Arc<Session>,
    borrows: Arc<AtomicUsize>,
    last_used: Instant,
}

/// Multiplexed SSH connection pool. One live `Session` per
/// `(user, host, port)`, reused across call sites instead of dialing fresh
/// for every command.
pub struct SshPool {
    entries: Mutex<HashMap<PoolKey, PoolEntry>>,
    idle_ttl: Duration,
}

impl SshPool {
    pub fn new(idle_ttl: Duration) -> Arc<Self> {
        let pool = Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            idle_ttl,
        });
        pool.clone().spawn_reaper();
        pool
    }

    pub fn with_default_ttl() -> Arc<Self> {
        Self::new(Duration::from_secs(300))
    }

    fn spawn_reaper(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                self.reap_idle().await;
            }
        });
    }

    async fn reap_idle(&self) {
        let mut entries = self.entries.lock().await;
        let ttl = self.idle_ttl;
        let mut to_remove = Vec::new();

        for (key, entry) in entries.iter() {
            if entry.borrows.load(Ordering::SeqCst) == 0 && entry.last_used.elapsed() > ttl {
                to_remove.push(key.clone());
            }
        }

        for key in to_remove {
            if let Some(entry) = entries.remove(&key) {
                debug!("reaping idle ssh session to {}@{}:{}", key.0, key.1, key.2);
                if let Ok(session) = Arc::try_unwrap(entry.session) {
                    let _ = session.close().await;
                }
            }
        }
    }

    /// Acquire a handle to a pooled session for `(user, host, port)`, dialing
    /// a fresh one if none exists yet. Credentials are never shared across
    /// entries keyed by different `(user, host, port)` tuples.
    pub async fn acquire(
        self: &Arc<Self>,
        user: &str,
        host: &str,
        port: u16,
        auth: &Auth,
    ) -> Result<SshHandle> {
        let key: PoolKey = (user.to_string(), host.to_string(), port);

        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(&key) {
                entry.borrows.fetch_add(1, Ordering::SeqCst);
                entry.last_used = Instant::now();
                return Ok(SshHandle {
                    session: SshSession::from_arc(entry.session.clone(), host.to_string()),
                    borrows: entry.borrows.clone(),
                });
            }
        }

        let session = self.dial_with_retry(user, host, Some(port), auth).await?;
        let arc_session = session.session.clone();

        let borrows = Arc::new(AtomicUsize::new(1));
        {
            let mut entries = self.entries.lock().await;
            entries.insert(
                key,
                PoolEntry {
                    session: arc_session.clone(),
                    borrows: borrows.clone(),
                    last_used: Instant::now(),
                },
            );
        }

        Ok(SshHandle {
            session: SshSession::from_arc(arc_session, host.to_string()),
            borrows,
        })
    }

    /// Dial a fresh session, retrying once on a transient I/O failure. Auth
    /// failures are never retried.
    async fn dial_with_retry(
        &self,
        user: &str,
        host: &str,
        port: Option<u16>,
        auth: &Auth,
    ) -> Result<SshSession> {
        match SshSession::connect(user, host, port, auth).await {
            Ok(s) => return Ok(s),
            Err(e) => {
                if is_auth_error(&e) {
                    return Err(e);
                }
                warn!("transient ssh dial failure to {}@{}, retrying once: {}", user, host, e);
            }
        }

        SshSession::connect(user, host, port, auth).await
    }

    /// Drop any pooled entry for `(user, host, port)`, forcing the next
    /// `acquire` to dial fresh.
    pub async fn invalidate(&self, user: &str, host: &str, port: u16) {
        let key: PoolKey = (user.to_string(), host.to_string(), port);
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.remove(&key) {
            if let Ok(session) = Arc::try_unwrap(entry.session) {
                let _ = session.close().await;
            }
        }
    }
}

fn is_auth_error(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("permission denied") || msg.contains("authentication")
}

/// RAII guard around a pooled connection; decrements the entry's borrow
/// count on `Drop` so the idle-TTL reaper can tell when it's safe to close.
pub struct SshHandle {
    session: SshSession,
    borrows: Arc<AtomicUsize>,
}

impl std::ops::Deref for SshHandle {
    type Target = SshSession;
    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl Drop for SshHandle {
    fn drop(&mut self) {
        self.borrows.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_auth_error_messages() {
        let err = anyhow::anyhow!("failed to connect to a@b: Permission denied (publickey)");
        assert!(is_auth_error(&err));
    }

    #[test]
    fn does_not_flag_generic_io_error() {
        let err = anyhow::anyhow!("failed to connect to a@b: Connection timed out");
        assert!(!is_auth_error(&err));
    }
}
