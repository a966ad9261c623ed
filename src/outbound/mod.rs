//! Outbound module
//!
//! This module provides the outbound abstraction and the built-in outbound
//! implementations.
//!
//! # Outbound Types
//!
//! - `DirectOutbound`: Connect directly to the destination, optionally from a
//!   specific local address or with a routing mark.
//! - `BlockOutbound`: Refuse all connections. Also serves as the `Compatible`
//!   fallback for selectors with no candidates.
//!
//! Selector groups (see [`crate::group`]) implement the same [`Outbound`]
//! trait and register in the same [`OutboundManager`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use selector_router::outbound::{
//!     BlockOutbound, ConnectionOrigin, DirectOutbound, Outbound, OutboundManager,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = OutboundManager::new();
//! manager.add(Arc::new(DirectOutbound::simple("direct")));
//! manager.add(Arc::new(BlockOutbound::new("adblock")));
//!
//! if let Some(outbound) = manager.get("direct") {
//!     let addr = "1.2.3.4:80".parse()?;
//!     let conn = outbound
//!         .connect(addr, Duration::from_secs(10), ConnectionOrigin::Internal)
//!         .await?;
//!     println!("Connected to {}", conn.remote_addr());
//! }
//! # Ok(())
//! # }
//! ```

mod block;
mod direct;
mod manager;
mod traits;

pub use block::BlockOutbound;
pub use direct::DirectOutbound;
pub use manager::{create_outbound, OutboundManager, OutboundManagerBuilder};
pub use traits::{
    real_tag, AsyncStream, BoxedStream, ConnectionHandler, ConnectionOrigin, DatagramSocket,
    HealthStatus, Outbound, OutboundConnection, OutboundGroup, ProviderListener,
    UdpOutboundHandle,
};
