//! Zone Federation Library
//!
//! This library crate groups runtimes of a domain into named zones on top of
//! a group-communication channel. It serves as the foundation for the binary
//! executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`membership`**: Runtime identities, the logical-name scheme that encodes
//!   them into channel member names, and the view diff engine that turns
//!   consecutive views into join/leave/leader events.
//! - **`registry`**: The zone → runtime registry maintained from view diffs, and
//!   listener fan-out.
//! - **`transport`**: The group channel seam with an in-process implementation
//!   and a UDP gossip (SWIM-like) implementation.
//! - **`dispatcher`**: Command protocol, codecs and the request dispatcher
//!   (broadcasts, one-way and synchronous sends with timeouts).
//! - **`topology`**: `TopologyService`, role behaviors (controller, domain,
//!   zone, node), dynamic channels and domain state.
//! - **`management`**: Read-only HTTP surface over a running service.
//! - **`config`** / **`error`**: Runtime configuration and the error taxonomy.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod management;
pub mod membership;
pub mod registry;
pub mod topology;
pub mod transport;
