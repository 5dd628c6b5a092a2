use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for the broadcast engine
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Broadcast calls, including user_left follow-ups for evicted members
    pub broadcasts: AtomicU64,
    /// Messages queued to a recipient
    pub delivered: AtomicU64,
    /// Recipient sends that failed or timed out
    pub failed: AtomicU64,
    /// Recipients removed because a send to them failed
    pub evicted: AtomicU64,
    /// Envelopes forwarded to the fan-out store
    pub remote_published: AtomicU64,
    /// Envelopes the fan-out store refused
    pub remote_publish_failures: AtomicU64,
    /// Envelopes received from other instances and delivered locally
    pub remote_received: AtomicU64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            remote_published: self.remote_published.load(Ordering::Relaxed),
            remote_publish_failures: self.remote_publish_failures.load(Ordering::Relaxed),
            remote_received: self.remote_received.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayStatsSnapshot {
    pub broadcasts: u64,
    pub delivered: u64,
    pub failed: u64,
    pub evicted: u64,
    pub remote_published: u64,
    pub remote_publish_failures: u64,
    pub remote_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let stats = RelayStats::default();
        stats.broadcasts.fetch_add(3, Ordering::Relaxed);
        stats.delivered.fetch_add(7, Ordering::Relaxed);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.broadcasts, 3);
        assert_eq!(snapshot.delivered, 7);
        assert_eq!(snapshot.failed, 0);
    }
}
