//! Topology Service Module
//!
//! The public face of the layer: one [`TopologyService`] per runtime,
//! composed from the naming scheme, the registry, listener fan-out and the
//! request dispatcher.
//!
//! ## Roles
//! - **Controller**: domain authority. Announces itself after joining, serves
//!   zone deployments and refreshes transport metadata of new leaders and members.
//! - **Domain**: authority without the announcement.
//! - **Zone**: pulls its zone's deployment on join, from the zone leader or
//!   the controller, and defers while no controller is around.
//! - **Node**: merges a domain snapshot from the oldest member on join.
//!
//! ## Submodules
//! - **`service`**: `TopologyService` lifecycle, queries and messaging.
//! - **`roles`**: per-role join protocols and command handling.
//! - **`receiver`**: domain channel callbacks.
//! - **`channels`**: dynamic channels.
//! - **`state`**: domain state snapshots and deployments.

pub mod channels;
pub mod receiver;
pub mod roles;
pub mod service;
pub mod state;
pub mod types;

pub use channels::{ChannelManager, ChannelReceiver};
pub use roles::RoleBehavior;
pub use service::TopologyService;
pub use state::{DeploymentSink, DeploymentSource, DeploymentStore, DomainState};
pub use types::{Role, TopologyStats, UpdateOutcome, UpdateState, ZoneSummary};
