//! Gossip Transport
//!
//! A [`GroupChannel`](crate::transport::GroupChannel) over a gossip-based
//! membership protocol (inspired by SWIM). Members discover each other through
//! seed nodes, detect failures, and carry application payloads on the same
//! UDP socket.
//!
//! ## Core Mechanisms
//! - **Gossip Protocol**: periodic ping/ack rounds exchange full member lists.
//! - **Failure Detection**: "Suspect" -> "Dead" transitions driven by timeouts.
//!   A suspicion drops the member from the view and fails outstanding requests to it.
//! - **Incarnation Numbers**: a member refutes a false suspicion by bumping its own incarnation.
//! - **View Order**: alive members ordered by join time, so the oldest member comes first.

pub mod service;
pub mod types;

pub use service::{GossipChannel, GossipChannelFactory, parse_seeds};
pub use types::GossipConfig;
