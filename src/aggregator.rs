//! Per-session collection of completed host results.
use crate::types::{HostResult, ScanSummary};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Append-only store shared between the session's aggregator task and readers.
#[derive(Clone, Debug, Default)]
pub struct ResultSet {
    hosts: Arc<Mutex<Vec<HostResult>>>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one finished host. Returns the number of results held afterwards.
    pub async fn push(&self, host: HostResult) -> usize {
        let mut guard = self.hosts.lock().await;
        guard.push(host);
        guard.len()
    }

    /// Copy of every result, in completion order.
    pub async fn snapshot(&self) -> Vec<HostResult> {
        self.hosts.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.hosts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Summary view sorted by address, with the session counters attached.
    pub async fn summary(&self, total: usize, cancelled: bool) -> ScanSummary {
        let mut hosts = self.snapshot().await;
        hosts.sort_by_key(|h| h.ip.parse::<std::net::IpAddr>().ok());
        ScanSummary {
            total,
            completed: hosts.len(),
            alive: hosts.iter().filter(|h| h.alive).count(),
            cancelled,
            hosts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn summary_sorts_by_address_and_counts_alive() {
        let set = ResultSet::new();
        let mut up = HostResult::new("10.0.0.10".parse().unwrap());
        up.alive = true;
        set.push(up).await;
        set.push(HostResult::new("10.0.0.9".parse().unwrap())).await;

        let summary = set.summary(5, false).await;
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.alive, 1);
        assert_eq!(summary.total, 5);
        let ips: Vec<&str> = summary.hosts.iter().map(|h| h.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.9", "10.0.0.10"]);
    }
}
