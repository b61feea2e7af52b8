use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport-assigned unique identifier of a channel endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque member address handed out by the transport on connect.
///
/// `name` is the logical name the member connected with; the naming scheme
/// encodes the runtime identity into it. Two addresses are equal only if both
/// the transport id and the logical name match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Address {
    pub id: NodeId,
    pub name: String,
}

impl Address {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Domain-wide authority, never a zone member.
    Controller,
    /// Zone member managed by a controller.
    Participant,
    /// Zone member of a controller-less domain.
    Node,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Controller => "controller",
            RuntimeKind::Participant => "participant",
            RuntimeKind::Node => "node",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "controller" => Some(RuntimeKind::Controller),
            "participant" => Some(RuntimeKind::Participant),
            "node" => Some(RuntimeKind::Node),
            _ => None,
        }
    }
}

/// The logical identity a runtime joins the domain with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RuntimeIdentity {
    pub kind: RuntimeKind,
    pub zone: Option<String>,
    pub runtime_name: String,
}

impl RuntimeIdentity {
    pub fn controller(runtime_name: impl Into<String>) -> Self {
        Self {
            kind: RuntimeKind::Controller,
            zone: None,
            runtime_name: runtime_name.into(),
        }
    }

    pub fn participant(zone: impl Into<String>, runtime_name: impl Into<String>) -> Self {
        Self {
            kind: RuntimeKind::Participant,
            zone: Some(zone.into()),
            runtime_name: runtime_name.into(),
        }
    }

    pub fn node(zone: impl Into<String>, runtime_name: impl Into<String>) -> Self {
        Self {
            kind: RuntimeKind::Node,
            zone: Some(zone.into()),
            runtime_name: runtime_name.into(),
        }
    }
}

/// A view member together with its decoded identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberIdentity {
    pub address: Address,
    pub identity: RuntimeIdentity,
}

impl MemberIdentity {
    pub fn runtime_name(&self) -> &str {
        &self.identity.runtime_name
    }

    pub fn zone(&self) -> Option<&str> {
        self.identity.zone.as_deref()
    }

    pub fn kind(&self) -> RuntimeKind {
        self.identity.kind
    }
}

/// Ordered, immutable membership snapshot.
///
/// Order is join order; the first member of a zone is that zone's leader.
/// A new view always replaces the previous one entirely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct View {
    pub id: u64,
    pub members: Vec<Address>,
}

impl View {
    pub fn new(id: u64, members: Vec<Address>) -> Self {
        Self { id, members }
    }

    pub fn empty() -> Self {
        Self {
            id: 0,
            members: Vec::new(),
        }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.members.contains(address)
    }

    /// The oldest member, i.e. the seed of the current membership.
    pub fn oldest(&self) -> Option<&Address> {
        self.members.first()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
