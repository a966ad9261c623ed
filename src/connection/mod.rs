//! Connection handling module
//!
//! This module provides:
//! - Bridging of inbound connections to plain-dial outbounds
//! - Inbound connection metadata
//! - Statistics collection

mod manager;
mod stats;

pub use manager::{ConnectionManager, CopyResult, InboundContext};
pub use stats::{ConnectionStats, OutboundStats, OutboundStatsSnapshot, StatsSnapshot};
