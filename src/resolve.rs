//! Reverse DNS for alive hosts.
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::{system_conf, TokioAsyncResolver};
use std::net::IpAddr;
use std::time::Duration;
use tokio::time;
use tracing::debug;

/// Hostname reported when no name could be found.
pub const NO_HOSTNAME: &str = "N/A";
const LOOPBACK_NAME: &str = "localhost";

/// PTR lookups bounded by their own timeout. One resolver per scan session.
#[derive(Clone)]
pub struct HostnameResolver {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl HostnameResolver {
    /// Use the system resolver configuration, falling back to the library default.
    pub fn new(timeout: Duration) -> Self {
        let (config, mut opts) = system_conf::read_system_conf().unwrap_or_else(|e| {
            debug!("system resolver config unavailable: {e}");
            (ResolverConfig::default(), ResolverOpts::default())
        });
        opts.timeout = timeout;
        opts.attempts = 1;
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            timeout,
        }
    }

    /// First PTR name for `ip`, without the trailing dot. Loopback is `localhost`;
    /// failure or timeout is `N/A`.
    pub async fn lookup(&self, ip: IpAddr) -> String {
        if ip.is_loopback() {
            return LOOPBACK_NAME.to_string();
        }
        match time::timeout(self.timeout, self.resolver.reverse_lookup(ip)).await {
            Ok(Ok(names)) => names
                .iter()
                .next()
                .map(|name| trim_root(&name.to_string()))
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| NO_HOSTNAME.to_string()),
            Ok(Err(e)) => {
                debug!(ip = %ip, "reverse lookup failed: {e}");
                NO_HOSTNAME.to_string()
            }
            Err(_) => {
                debug!(ip = %ip, "reverse lookup timed out");
                NO_HOSTNAME.to_string()
            }
        }
    }
}

fn trim_root(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_label_is_trimmed() {
        assert_eq!(trim_root("router.lan."), "router.lan");
        assert_eq!(trim_root("router.lan"), "router.lan");
    }

    #[tokio::test]
    async fn loopback_resolves_locally() {
        let r = HostnameResolver::new(Duration::from_millis(100));
        assert_eq!(r.lookup("127.0.0.1".parse().unwrap()).await, "localhost");
        assert_eq!(r.lookup("::1".parse().unwrap()).await, "localhost");
    }
}
