//! selector-router: outbound selector groups with providers
//!
//! This crate implements selector groups: outbounds that forward every
//! connection to one member chosen from static outbounds and from
//! independently-updating providers. The choice is persisted, survives
//! provider reloads, and switching it interrupts the group's existing
//! connections.
//!
//! # Features
//!
//! - **Selector groups**: explicit selection with persisted choice, default
//!   member, include/exclude filtering of provider members, nested groups
//! - **Providers**: file-backed provider reloaded on change, diffing that
//!   keeps unchanged outbound instances, pluggable provider types
//! - **Connection interruption**: switches cut the group's live connections,
//!   inbound ones only when configured
//! - **Outbounds**: direct (TCP and UDP) and block
//!
//! # Architecture
//!
//! ```text
//! provider file ─► LocalProvider ─► ProviderAdapter ─► Selector::update_outbounds
//!                                                        │
//! inbound ─► Selector ─► active member ─► destination  ◄─┘
//!               │
//!          SelectionStore
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use selector_router::config::load_config;
//! use selector_router::Router;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/selector-router/config.json")?;
//! let router = Router::new(&config)?;
//! router.start()?;
//!
//! router.select("proxy", "us-1")?;
//! println!("proxy -> {}", router.selector("proxy").map(|s| s.now()).unwrap_or_default());
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`connection`]: Inbound-to-outbound relaying and statistics
//! - [`error`]: Error types
//! - [`group`]: Selector groups
//! - [`interrupt`]: Connection interruption on selection changes
//! - [`outbound`]: Outbound trait, capabilities and implementations
//! - [`provider`]: Outbound providers
//! - [`router`]: Assembly of the above from configuration
//! - [`store`]: Persisted selections
//! - [`watch`]: File change notification

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod connection;
pub mod error;
pub mod group;
pub mod interrupt;
pub mod outbound;
pub mod provider;
pub mod router;
pub mod store;
pub mod watch;

// Re-export commonly used types at the crate root
pub use config::{Config, OutboundConfig, ProviderConfig, SelectorConfig};
pub use connection::{ConnectionManager, ConnectionStats, InboundContext};
pub use error::{
    ConfigError, ConnectionError, OutboundError, ProviderError, RouterError, SelectorError,
    StoreError,
};
pub use group::{Selector, SelectorContext};
pub use outbound::{BlockOutbound, ConnectionOrigin, DirectOutbound, Outbound, OutboundManager};
pub use provider::{LocalProvider, Provider, ProviderManager};
pub use router::Router;
pub use store::{FileSelectionStore, MemorySelectionStore, SelectionStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
