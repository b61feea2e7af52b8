//! Management Protocol Definitions
//!
//! Response bodies of the read-only HTTP surface and the endpoints serving them.

use crate::topology::types::{Role, ZoneSummary};
use serde::{Deserialize, Serialize};

pub const ENDPOINT_TOPOLOGY: &str = "/topology";
pub const ENDPOINT_STATS: &str = "/stats";
pub const ENDPOINT_ZONE_LEADER: &str = "/zones/:zone/leader";

#[derive(Debug, Serialize, Deserialize)]
pub struct TopologyResponse {
    pub runtime: String,
    pub role: Role,
    pub controller_available: bool,
    pub zones: Vec<ZoneSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderResponse {
    pub zone: String,
    pub leader: Option<String>,
}
