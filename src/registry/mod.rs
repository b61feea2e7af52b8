//! Runtime Registry Module
//!
//! Local knowledge of which runtimes belong to which zone, and the fan-out
//! that tells interested code about membership changes.
//!
//! Both are driven exclusively by view diffs; see [`crate::membership::diff`].

pub mod listener;
pub mod runtime;

pub use listener::{ListenerId, ListenerMultiplexer, TopologyListener};
pub use runtime::{Metadata, RuntimeInstance, RuntimeRegistry, ZoneMap};

#[cfg(test)]
mod tests;
