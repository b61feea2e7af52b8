use crate::membership::{Address, NodeId};

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub const GOSSIP_INTERVAL: Duration = Duration::from_millis(500);
pub const FAILURE_DETECTION_INTERVAL: Duration = Duration::from_secs(2);
pub const SUSPECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEAD_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a dead member is still listed (and gossiped as dead) before it is forgotten.
pub const DEAD_RETENTION: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct GossipConfig {
    pub bind: SocketAddr,
    pub seeds: Vec<SocketAddr>,
    pub gossip_interval: Duration,
    pub failure_detection_interval: Duration,
    pub suspect_timeout: Duration,
    pub dead_timeout: Duration,
    pub dead_retention: Duration,
}

impl GossipConfig {
    pub fn new(bind: SocketAddr, seeds: Vec<SocketAddr>) -> Self {
        Self {
            bind,
            seeds,
            gossip_interval: GOSSIP_INTERVAL,
            failure_detection_interval: FAILURE_DETECTION_INTERVAL,
            suspect_timeout: SUSPECT_TIMEOUT,
            dead_timeout: DEAD_TIMEOUT,
            dead_retention: DEAD_RETENTION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

/// A single member of the gossip group.
///
/// `incarnation` is a logical clock only the member itself advances, used to
/// refute a false suspicion. `joined_at` fixes the member's position in the
/// view: members are ordered by `(joined_at, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub gossip_addr: SocketAddr,
    pub state: NodeState,
    pub incarnation: u64,
    pub joined_at: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl Node {
    pub fn address(&self) -> Address {
        Address {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Wire frames. Membership traffic and application traffic share one socket.
///
/// - `Ping/Ack`: liveness checks and member list exchange.
/// - `Join/Leave`: entering and leaving the group.
/// - `Suspect/Alive`: dissemination of health changes.
/// - `Data`: one-way application payload.
/// - `Request/Reply`: correlated request/response payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Ping {
        from: Node,
    },

    Ack {
        from: NodeId,
        incarnation: u64,
        members: Vec<Node>,
    },

    Join {
        cluster: String,
        node: Node,
    },

    Leave {
        node_id: NodeId,
    },

    Suspect {
        node_id: NodeId,
        incarnation: u64,
    },

    Alive {
        node_id: NodeId,
        incarnation: u64,
    },

    Data {
        from: NodeId,
        payload: Vec<u8>,
    },

    Request {
        id: u64,
        from: NodeId,
        payload: Vec<u8>,
    },

    Reply {
        id: u64,
        result: Result<Vec<u8>, String>,
    },
}
