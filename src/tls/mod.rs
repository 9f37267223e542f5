use anyhow::{Context, Result};
use chrono::Utc;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

use crate::output::{self, Event};
use crate::state::keys::PendingCertificate;
use crate::state::StateStore;

/// ACME challenge type for a domain, classified up front so the right
/// issuance path (HTTP-01 vs. DNS-01) is chosen before registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Challenge {
    Http01,
    Dns01,
}

/// Classify a domain's ACME challenge type: a wildcard domain
/// must use DNS-01 (grouped by its base domain, since one `_acme-challenge`
/// TXT/CNAME record covers every subdomain under it); anything else uses
/// HTTP-01.
pub fn classify(domain: &str) -> (Challenge, String) {
    match domain.strip_prefix("*.") {
        Some(base) => (Challenge::Dns01, base.to_string()),
        None => (Challenge::Http01, domain.to_string()),
    }
}

const RESOLVERS: &[([u8; 4], &str)] = &[([1, 1, 1, 1], "cloudflare"), ([8, 8, 8, 8], "google"), ([9, 9, 9, 9], "quad9")];

const DEFAULT_BACKOFF: Duration = Duration::from_secs(30);

pub struct TlsLifecycle<'a> {
    store: &'a StateStore,
}

impl<'a> TlsLifecycle<'a> {
    pub fn new(store: &'a StateStore) -> Self {
        Self { store }
    }

    /// Confirm port 53 is reachable on at least one public resolver before
    /// starting a DNS-01 poll loop, so a firewalled egress path fails fast
    /// with a clear message instead of silently retrying forever.
    pub async fn check_dns_reachable(&self) -> Result<()> {
        for (ip, name) in RESOLVERS {
            let addr = SocketAddr::from((*ip, 53));
            if tokio::net::TcpStream::connect(addr).await.is_ok() {
                debug!("reached resolver {} ({:?})", name, ip);
                return Ok(());
            }
        }
        Err(anyhow::anyhow!("could not reach any public DNS resolver on port 53 — check egress firewall rules"))
    }

    /// Begin tracking a pending certificate request, persisting it via the
    /// Cluster State Store so a crashed `tako deploy` can resume polling on
    /// the next invocation instead of losing the ACME registration.
    pub fn start_pending(&self, domain: &str, registration: &str) -> Result<()> {
        let mut pending = self.store.load_pending_certificates()?;
        pending.retain(|p| p.domain != domain);
        pending.push(PendingCertificate {
            domain: domain.to_string(),
            registration: registration.to_string(),
            started_at: Utc::now().to_rfc3339(),
            last_check: None,
            attempts: 0,
        });
        self.store.save_pending_certificates(&pending)
    }

    /// Poll until the `_acme-challenge.<domain>` CNAME resolves to the
    /// expected registration target, or `max_attempts` is exhausted (`None`
    /// means no upper bound). Each attempt tries the resolvers in
    /// [`RESOLVERS`] order and succeeds on the first match.
    pub async fn poll_dns01(&self, domain: &str, expected_target: &str, max_attempts: Option<u32>) -> Result<()> {
        self.check_dns_reachable().await?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if let Some(max) = max_attempts {
                if attempt > max {
                    return Err(anyhow::anyhow!("DNS-01 challenge for {} did not propagate after {} attempts", domain, max));
                }
            }

            if self.check_once(domain, expected_target, attempt).await? {
                return Ok(());
            }

            tokio::time::sleep(DEFAULT_BACKOFF).await;
        }
    }

    /// A single DNS-01 propagation check: queries
    /// every resolver in [`RESOLVERS`] once, updates `lastCheck`/`attempts`
    /// on the pending entry regardless of outcome, and — on a match — clears
    /// the entry and fires `SslIssued` before returning `true`. Used both by
    /// the looping `poll_dns01` and the one-shot `tako ssl check` command.
    pub async fn check_once(&self, domain: &str, expected_target: &str, attempt: u32) -> Result<bool> {
        let challenge_name = format!("_acme-challenge.{}.", domain.trim_end_matches('.'));
        let expected = expected_target.trim_end_matches('.').to_lowercase();

        for (ip, _name) in RESOLVERS {
            let mut opts = ResolverOpts::default();
            opts.timeout = Duration::from_secs(5);
            let config = ResolverConfig::from_parts(None, vec![], vec![hickory_resolver::config::NameServerConfig::new(
                SocketAddr::from((*ip, 53)),
                hickory_resolver::config::Protocol::Udp,
            )]);
            let resolver = TokioAsyncResolver::tokio(config, opts);

            if let Ok(lookup) = resolver.lookup(challenge_name.clone(), hickory_resolver::proto::rr::RecordType::CNAME).await {
                for record in lookup.iter() {
                    let seen = record.to_string().trim_end_matches('.').to_lowercase();
                    if seen == expected {
                        self.clear_pending(domain)?;
                        output::emit(&Event::SslIssued { domain: domain.to_string() });
                        return Ok(true);
                    }
                }
            }
        }

        self.mark_attempt(domain, attempt)?;
        Ok(false)
    }

    fn mark_attempt(&self, domain: &str, attempts: u32) -> Result<()> {
        let mut pending = self.store.load_pending_certificates()?;
        if let Some(entry) = pending.iter_mut().find(|p| p.domain == domain) {
            entry.attempts = attempts;
            entry.last_check = Some(Utc::now().to_rfc3339());
        }
        self.store.save_pending_certificates(&pending)
    }

    pub fn clear_pending(&self, domain: &str) -> Result<()> {
        let mut pending = self.store.load_pending_certificates()?;
        pending.retain(|p| p.domain != domain);
        self.store.save_pending_certificates(&pending)
    }
}

/// Group a set of domains by DNS-01 base domain, collapsing every wildcard
/// subdomain under its base into a single ACME order.
pub fn group_by_base_domain(domains: &[String]) -> HashMap<String, Vec<String>> {
    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    for domain in domains {
        let (challenge, base) = classify(domain);
        let key = if challenge == Challenge::Dns01 { base } else { domain.clone() };
        groups.entry(key).or_default().push(domain.clone());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_domain_uses_dns01() {
        let (challenge, base) = classify("*.example.com");
        assert_eq!(challenge, Challenge::Dns01);
        assert_eq!(base, "example.com");
    }

    #[test]
    fn plain_domain_uses_http01() {
        let (challenge, base) = classify("app.example.com");
        assert_eq!(challenge, Challenge::Http01);
        assert_eq!(base, "app.example.com");
    }

    #[test]
    fn groups_wildcard_subdomains_under_base() {
        let domains = vec!["*.example.com".to_string(), "app.example.com".to_string()];
        let groups = group_by_base_domain(&domains);
        assert!(groups.contains_key("example.com"));
    }
}
