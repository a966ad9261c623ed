//! Outbound groups
//!
//! Groups are outbounds that delegate to one of several member outbounds.
//! [`Selector`] picks its member explicitly and follows provider updates.

mod selector;

pub use selector::{Selector, SelectorContext, SELECTOR_TYPE};
