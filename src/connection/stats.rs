//! Relay and dial counters
//!
//! [`ConnectionStats`] counts connections bridged by the
//! [`ConnectionManager`](super::ConnectionManager), split by who initiated
//! them. [`OutboundStats`] counts dials through a single outbound.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::CopyResult;
use crate::outbound::ConnectionOrigin;

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Relay counters of a connection manager
#[derive(Debug, Default)]
pub struct ConnectionStats {
    internal: AtomicU64,
    external: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    interrupted: AtomicU64,
    /// client → upstream
    uploaded: AtomicU64,
    /// upstream → client
    downloaded: AtomicU64,
}

impl ConnectionStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a connection entering the relay
    pub fn record_accepted(&self, origin: ConnectionOrigin) {
        match origin {
            ConnectionOrigin::Internal => bump(&self.internal, 1),
            ConnectionOrigin::External => bump(&self.external, 1),
        }
    }

    /// Count a relay that ran to the end
    pub fn record_completed(&self, result: &CopyResult) {
        bump(&self.completed, 1);
        bump(&self.uploaded, result.client_to_upstream);
        bump(&self.downloaded, result.upstream_to_client);
    }

    /// Count a failed dial or relay
    pub fn record_failed(&self) {
        bump(&self.failed, 1);
    }

    /// Count a relay torn down by an outbound switch
    pub fn record_interrupted(&self) {
        bump(&self.interrupted, 1);
    }

    /// Connections accepted from either origin
    #[must_use]
    pub fn accepted(&self) -> u64 {
        read(&self.internal) + read(&self.external)
    }

    /// Connections still relaying
    #[must_use]
    pub fn active(&self) -> u64 {
        self.accepted().saturating_sub(self.finished())
    }

    fn finished(&self) -> u64 {
        read(&self.completed) + read(&self.failed) + read(&self.interrupted)
    }

    #[must_use]
    pub fn completed(&self) -> u64 {
        read(&self.completed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        read(&self.failed)
    }

    #[must_use]
    pub fn interrupted(&self) -> u64 {
        read(&self.interrupted)
    }

    /// Point-in-time copy of every counter
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            internal: read(&self.internal),
            external: read(&self.external),
            active: self.active(),
            completed: self.completed(),
            failed: self.failed(),
            interrupted: self.interrupted(),
            uploaded: read(&self.uploaded),
            downloaded: read(&self.downloaded),
        }
    }
}

/// Snapshot of [`ConnectionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Connections initiated by the router itself
    pub internal: u64,
    /// Connections handed over by inbounds
    pub external: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub interrupted: u64,
    /// Bytes sent client → upstream
    pub uploaded: u64,
    /// Bytes sent upstream → client
    pub downloaded: u64,
}

impl StatsSnapshot {
    #[must_use]
    pub const fn accepted(&self) -> u64 {
        self.internal + self.external
    }

    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.uploaded + self.downloaded
    }
}

/// Dial counters of one outbound
#[derive(Debug, Default)]
pub struct OutboundStats {
    dials: AtomicU64,
    failures: AtomicU64,
}

impl OutboundStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection(&self) {
        bump(&self.dials, 1);
    }

    pub fn record_error(&self) {
        bump(&self.failures, 1);
    }

    /// Dials attempted
    #[must_use]
    pub fn connections(&self) -> u64 {
        read(&self.dials)
    }

    /// Dials that failed
    #[must_use]
    pub fn errors(&self) -> u64 {
        read(&self.failures)
    }

    #[must_use]
    pub fn snapshot(&self) -> OutboundStatsSnapshot {
        OutboundStatsSnapshot {
            connections: self.connections(),
            errors: self.errors(),
        }
    }
}

/// Snapshot of [`OutboundStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundStatsSnapshot {
    pub connections: u64,
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_tracks_outcomes() {
        let stats = ConnectionStats::new();
        stats.record_accepted(ConnectionOrigin::Internal);
        stats.record_accepted(ConnectionOrigin::External);
        stats.record_accepted(ConnectionOrigin::External);
        stats.record_accepted(ConnectionOrigin::External);
        assert_eq!(stats.accepted(), 4);
        assert_eq!(stats.active(), 4);

        stats.record_completed(&CopyResult {
            client_to_upstream: 10,
            upstream_to_client: 90,
        });
        stats.record_failed();
        stats.record_interrupted();
        assert_eq!(stats.active(), 1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.internal, 1);
        assert_eq!(snapshot.external, 3);
        assert_eq!(snapshot.accepted(), 4);
        assert_eq!(snapshot.total_bytes(), 100);
        assert_eq!(snapshot.interrupted, 1);
    }

    #[test]
    fn test_outbound_stats() {
        let stats = OutboundStats::new();
        stats.record_connection();
        stats.record_connection();
        stats.record_error();

        assert_eq!(
            stats.snapshot(),
            OutboundStatsSnapshot {
                connections: 2,
                errors: 1
            }
        );
    }
}
