use crate::membership::RuntimeKind;
use crate::registry::Metadata;
use crate::transport::ChannelStats;

use serde::{Deserialize, Serialize};

/// Which part a runtime plays in the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Domain authority: serves deployments and announces itself.
    Controller,
    /// Domain authority without deployment announcements.
    Domain,
    /// Participant in a controller-managed zone.
    Zone,
    /// Member of a controller-less domain.
    Node,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Controller => "controller",
            Role::Domain => "domain",
            Role::Zone => "zone",
            Role::Node => "node",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "controller" => Some(Role::Controller),
            "domain" => Some(Role::Domain),
            "zone" => Some(Role::Zone),
            "node" => Some(Role::Node),
            _ => None,
        }
    }

    pub fn runtime_kind(&self) -> RuntimeKind {
        match self {
            Role::Controller | Role::Domain => RuntimeKind::Controller,
            Role::Zone => RuntimeKind::Participant,
            Role::Node => RuntimeKind::Node,
        }
    }

    /// Authorities are not zone members and never talk to "the controller".
    pub fn is_authority(&self) -> bool {
        matches!(self, Role::Controller | Role::Domain)
    }
}

/// Zone role deployment state. `NotUpdated -> Updated` happens at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateState {
    NotUpdated,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// This call applied a deployment.
    Updated,
    /// An earlier call already did.
    AlreadyUpdated,
    /// Nobody could hand out a deployment; waiting for a controller.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSummary {
    pub name: String,
    pub leader: Option<String>,
    pub runtimes: Vec<String>,
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologyStats {
    pub runtime_name: String,
    pub role: Role,
    pub zone: Option<String>,
    pub view_id: Option<u64>,
    pub view_size: usize,
    pub zones: usize,
    pub runtimes: usize,
    pub controller_available: bool,
    pub update_state: Option<UpdateState>,
    pub dynamic_channels: Vec<String>,
    pub channel: ChannelStats,
}
