//! Management Module
//!
//! Read-only HTTP view of a runtime: the zones it knows with their leaders,
//! transport counters and leader lookup. Nothing here mutates the service.

pub mod handlers;
pub mod protocol;

use crate::topology::service::TopologyService;
use handlers::{handle_get_stats, handle_get_topology, handle_get_zone_leader};
use protocol::{ENDPOINT_STATS, ENDPOINT_TOPOLOGY, ENDPOINT_ZONE_LEADER};

use axum::{Extension, Router, routing::get};
use std::sync::Arc;

pub fn router(service: Arc<TopologyService>) -> Router {
    Router::new()
        .route(ENDPOINT_TOPOLOGY, get(handle_get_topology))
        .route(ENDPOINT_STATS, get(handle_get_stats))
        .route(ENDPOINT_ZONE_LEADER, get(handle_get_zone_leader))
        .layer(Extension(service))
}

#[cfg(test)]
mod tests;
