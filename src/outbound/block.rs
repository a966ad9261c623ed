//! Block outbound implementation
//!
//! `BlockOutbound` refuses every TCP and UDP request. The router also
//! registers one under the `Compatible` tag as the fallback that selectors
//! use when their candidate set is empty.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::traits::{ConnectionOrigin, HealthStatus, Outbound, OutboundConnection, UdpOutboundHandle};
use crate::config::OutboundConfig;
use crate::connection::OutboundStats;
use crate::error::OutboundError;

/// Block outbound - drops all connections
pub struct BlockOutbound {
    tag: String,
    /// Counts refused requests
    stats: Arc<OutboundStats>,
}

impl BlockOutbound {
    /// Create a new block outbound
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            stats: Arc::new(OutboundStats::new()),
        }
    }

    /// Create a block outbound from configuration
    pub fn from_config(config: &OutboundConfig) -> Self {
        Self::new(&config.tag)
    }
}

#[async_trait]
impl Outbound for BlockOutbound {
    async fn connect(
        &self,
        addr: SocketAddr,
        _timeout: Duration,
        _origin: ConnectionOrigin,
    ) -> Result<OutboundConnection, OutboundError> {
        self.stats.record_connection();
        debug!("Blocking connection to {} via {}", addr, self.tag);
        Err(OutboundError::unavailable(
            &self.tag,
            format!("connection to {addr} blocked"),
        ))
    }

    async fn connect_udp(
        &self,
        addr: SocketAddr,
        _timeout: Duration,
        _origin: ConnectionOrigin,
    ) -> Result<UdpOutboundHandle, OutboundError> {
        self.stats.record_connection();
        debug!("Blocking UDP session to {} via {}", addr, self.tag);
        Err(OutboundError::unavailable(
            &self.tag,
            format!("UDP session to {addr} blocked"),
        ))
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn outbound_type(&self) -> &str {
        "block"
    }

    fn health_status(&self) -> HealthStatus {
        HealthStatus::Healthy
    }

    fn stats(&self) -> Arc<OutboundStats> {
        Arc::clone(&self.stats)
    }
}

impl std::fmt::Debug for BlockOutbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockOutbound")
            .field("tag", &self.tag)
            .field("blocked_count", &self.stats.connections())
            .finish()
    }
}
