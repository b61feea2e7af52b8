//! Membership Model
//!
//! Identity and view types shared by every other module, plus the two pure
//! functions the rest of the layer is built on.
//!
//! ## Core Concepts
//! - **Naming**: a runtime's kind, zone and name are encoded into the logical
//!   name it connects with, so any view can be decoded without extra lookups.
//! - **Positional leadership**: the first member of a zone in view order leads
//!   it. There is no election round-trip; leadership changes exactly when the
//!   view order does.
//! - **Diffing**: each installed view is compared with the previous one to
//!   derive joins, leaves and new zone leaders.

pub mod diff;
pub mod naming;
pub mod types;

pub use diff::ViewDiff;
pub use types::{Address, MemberIdentity, NodeId, RuntimeIdentity, RuntimeKind, View};

#[cfg(test)]
mod tests;
