use super::protocol::{LeaderResponse, TopologyResponse};
use crate::topology::service::TopologyService;
use crate::topology::types::TopologyStats;

use axum::{Extension, Json, extract::Path, http::StatusCode};
use std::sync::Arc;

pub async fn handle_get_topology(
    Extension(service): Extension<Arc<TopologyService>>,
) -> (StatusCode, Json<TopologyResponse>) {
    let zones = service.topology();
    tracing::debug!("Topology requested: {} zone(s)", zones.len());

    (
        StatusCode::OK,
        Json(TopologyResponse {
            runtime: service.runtime_name().to_string(),
            role: service.role(),
            controller_available: service.is_controller_available(),
            zones,
        }),
    )
}

pub async fn handle_get_stats(
    Extension(service): Extension<Arc<TopologyService>>,
) -> (StatusCode, Json<TopologyStats>) {
    (StatusCode::OK, Json(service.stats()))
}

/// 404 while the zone has no live member.
pub async fn handle_get_zone_leader(
    Extension(service): Extension<Arc<TopologyService>>,
    Path(zone): Path<String>,
) -> (StatusCode, Json<LeaderResponse>) {
    match service.zone_leader_name(&zone) {
        Some(leader) => (
            StatusCode::OK,
            Json(LeaderResponse {
                zone,
                leader: Some(leader),
            }),
        ),
        None => {
            tracing::debug!("No leader for zone {}", zone);
            (
                StatusCode::NOT_FOUND,
                Json(LeaderResponse { zone, leader: None }),
            )
        }
    }
}
