//! Network egress guard (§4.3, C3).
//!
//! Wraps [`crate::utils::url_security::validate_url`]'s SSRF checks with
//! the config-driven policy a deployed tool actually needs: a host/method
//! allowlist, a blocked-port list, a cloud-metadata-endpoint switch
//! independent of the general private-IP block, a short-TTL DNS
//! resolution cache (so the same host isn't re-resolved on every tool
//! call in a turn), and redirect revalidation (a redirect target must
//! pass every one of these checks again, since DNS rebinding and
//! malicious redirects are exactly what a one-shot check misses).

use crate::config::NetworkGuardConfig;
use crate::errors::{CoreError, CoreResult};
use moka::future::Cache;
use std::net::IpAddr;
use std::time::Duration;
use url::Url;

/// Known cloud instance-metadata addresses, blocked independently of the
/// general private-IP policy since they hand out credentials rather than
/// merely being "internal".
const METADATA_IPS: &[&str] = &[
    "169.254.169.254", // AWS, GCP, Azure, DigitalOcean
    "100.100.100.200", // Alibaba Cloud
];

/// The result of checking a candidate request against guard policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allowed,
    Blocked { reason: String },
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allowed)
    }

    pub fn into_result(self) -> CoreResult<()> {
        match self {
            GuardDecision::Allowed => Ok(()),
            GuardDecision::Blocked { reason } => Err(CoreError::PolicyBlocked(reason)),
        }
    }
}

/// Config-driven network egress guard shared across tool calls within a
/// session, so DNS resolutions are cached across repeated calls to the
/// same host.
pub struct NetworkGuard {
    config: NetworkGuardConfig,
    dns_cache: Cache<String, Vec<IpAddr>>,
}

impl NetworkGuard {
    pub fn new(config: NetworkGuardConfig) -> Self {
        let ttl = Duration::from_millis(config.dns_cache_ttl_ms);
        let dns_cache = Cache::builder().time_to_live(ttl).max_capacity(1024).build();
        Self { config, dns_cache }
    }

    /// Check whether `method` on `url` is allowed to proceed. Resolves and
    /// caches the host's addresses; each address is checked independently
    /// so a multi-A-record host can't hide a private address behind a
    /// public one.
    pub async fn check(&self, url_str: &str, method: &str) -> GuardDecision {
        let url = match Url::parse(url_str) {
            Ok(u) => u,
            Err(e) => return GuardDecision::Blocked { reason: format!("invalid URL: {e}") },
        };

        if !matches!(url.scheme(), "http" | "https") {
            return GuardDecision::Blocked {
                reason: format!("scheme '{}' is not permitted, only http/https", url.scheme()),
            };
        }

        let Some(host) = url.host_str() else {
            return GuardDecision::Blocked { reason: "URL has no host".into() };
        };

        if let Some(reason) = self.check_allowlist(host, method) {
            return GuardDecision::Blocked { reason };
        }

        let port = url.port_or_known_default().unwrap_or(if url.scheme() == "https" { 443 } else { 80 });
        if self.config.blocked_ports.contains(&port) {
            return GuardDecision::Blocked {
                reason: format!("port {port} is blocked by network guard policy"),
            };
        }

        match self.resolve(host, port).await {
            Ok(addrs) => {
                for addr in addrs {
                    if let Some(reason) = self.check_ip(addr) {
                        return GuardDecision::Blocked { reason };
                    }
                }
                GuardDecision::Allowed
            }
            Err(_) => {
                // DNS resolution failure is not itself a policy violation;
                // the request will simply fail when it's actually attempted.
                GuardDecision::Allowed
            }
        }
    }

    /// Re-run the full check against a redirect target. A tool that
    /// follows redirects MUST call this for every hop rather than trusting
    /// the original URL's clearance (I-NET2).
    pub async fn revalidate_redirect(&self, location: &str, method: &str) -> GuardDecision {
        self.check(location, method).await
    }

    /// `None` when the allowlist is empty (default allow, subject to the
    /// remaining checks) or the host/method pair is present in it; `Some`
    /// with a reason otherwise.
    fn check_allowlist(&self, host: &str, method: &str) -> Option<String> {
        if self.config.allowlist.is_empty() {
            return None;
        }
        let entry = self.config.allowlist.iter().find(|e| e.host == host)?;
        if entry.methods.is_empty() || entry.methods.iter().any(|m| m.eq_ignore_ascii_case(method)) {
            return None;
        }
        Some(format!("method '{method}' is not allowed for host '{host}'"))
    }

    fn check_ip(&self, addr: IpAddr) -> Option<String> {
        if self.config.block_metadata_endpoints && METADATA_IPS.contains(&addr.to_string().as_str()) {
            return Some(format!("{addr} is a cloud metadata endpoint"));
        }
        if !self.config.block_private_ips {
            return None;
        }
        crate::utils::url_security::validate_url(&format!("http://{addr}")).err()
    }

    async fn resolve(&self, host: &str, port: u16) -> anyhow::Result<Vec<IpAddr>> {
        let key = format!("{host}:{port}");
        if let Some(cached) = self.dns_cache.get(&key).await {
            return Ok(cached);
        }
        let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, port))
            .await?
            .map(|sock_addr| sock_addr.ip())
            .collect();
        self.dns_cache.insert(key, addrs.clone()).await;
        Ok(addrs)
    }
}
