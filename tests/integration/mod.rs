//! Integration tests for selector-router
//!
//! # Test Organization
//!
//! - `selector_integration`: selection, persistence across restarts, and
//!   connection interruption through a running router
//! - `provider_integration`: provider file changes flowing into selectors
//!
//! # Test Requirements
//!
//! Tests use loopback listeners and temporary directories only.

pub mod provider_integration;
pub mod selector_integration;
