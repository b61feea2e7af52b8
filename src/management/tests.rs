//! Management Module Tests
//!
//! Calls the handlers directly against services on an in-process network.

#[cfg(test)]
mod tests {
    use crate::config::FederationConfig;
    use crate::management::handlers::{
        handle_get_stats, handle_get_topology, handle_get_zone_leader,
    };
    use crate::management::router;
    use crate::membership::naming;
    use crate::topology::roles::RoleBehavior;
    use crate::topology::service::TopologyService;
    use crate::topology::state::DeploymentStore;
    use crate::topology::types::Role;
    use crate::transport::memory::{MemoryChannelFactory, MemoryNetwork};
    use axum::{Extension, extract::Path, http::StatusCode};
    use std::sync::Arc;

    async fn start(
        network: &Arc<MemoryNetwork>,
        config: FederationConfig,
        role: RoleBehavior,
    ) -> Arc<TopologyService> {
        let name = naming::encode(&config.identity().unwrap()).unwrap();
        let service = TopologyService::new(
            config,
            network.channel(name),
            MemoryChannelFactory::new(network.clone()),
            role,
        )
        .unwrap();
        service.join_domain().await.unwrap();
        service
    }

    async fn domain() -> (Arc<TopologyService>, Arc<TopologyService>) {
        let network = MemoryNetwork::new();
        let store = DeploymentStore::new();
        let a = start(
            &network,
            FederationConfig::for_role(Role::Controller, "a", None),
            RoleBehavior::controller(store.clone()),
        )
        .await;
        let b = start(
            &network,
            FederationConfig::for_role(Role::Zone, "b", Some("z1")),
            RoleBehavior::zone(store, true),
        )
        .await;
        (a, b)
    }

    #[tokio::test]
    async fn test_topology_lists_zones_with_leaders() {
        let (_a, b) = domain().await;

        let (status, body) = handle_get_topology(Extension(b.clone())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.runtime, "b");
        assert_eq!(body.role, Role::Zone);
        assert!(body.controller_available);
        assert_eq!(body.zones.len(), 1);
        assert_eq!(body.zones[0].name, "z1");
        assert_eq!(body.zones[0].leader.as_deref(), Some("b"));
        assert_eq!(body.zones[0].runtimes, vec!["b"]);
    }

    #[tokio::test]
    async fn test_stats_report_channel_counters() {
        let (a, _b) = domain().await;

        let (status, body) = handle_get_stats(Extension(a)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.channel.connected);
        // The controller announcement went out on join.
        assert!(body.channel.sent_messages >= 1);
        assert_eq!(body.view_size, 2);
        assert_eq!(body.role, Role::Controller);
    }

    #[tokio::test]
    async fn test_zone_leader_lookup() {
        let (a, _b) = domain().await;

        let (status, body) =
            handle_get_zone_leader(Extension(a.clone()), Path("z1".to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.leader.as_deref(), Some("b"));

        let (status, body) = handle_get_zone_leader(Extension(a), Path("z9".to_string())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.zone, "z9");
        assert!(body.leader.is_none());
    }

    #[tokio::test]
    async fn test_router_builds() {
        let (a, _b) = domain().await;
        let _app = router(a);
    }
}
