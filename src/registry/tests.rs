//! Registry Module Tests
//!
//! ## Test Scopes
//! - **RuntimeRegistry**: join/leave bookkeeping, idempotent view application, metadata cache.
//! - **ListenerMultiplexer**: registration and event fan-out order.

#[cfg(test)]
mod tests {
    use crate::membership::diff;
    use crate::membership::naming;
    use crate::membership::types::{Address, RuntimeIdentity, View};
    use crate::registry::listener::{ListenerMultiplexer, TopologyListener};
    use crate::registry::runtime::{Metadata, RuntimeRegistry};
    use std::sync::{Arc, Mutex};

    fn addr(identity: RuntimeIdentity) -> Address {
        Address::new(naming::encode(&identity).unwrap())
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl TopologyListener for Recorder {
        fn on_join(&self, zone: &str, runtime: &str) {
            self.events.lock().unwrap().push(format!("join {zone}/{runtime}"));
        }

        fn on_leave(&self, zone: &str, runtime: &str) {
            self.events.lock().unwrap().push(format!("leave {zone}/{runtime}"));
        }

        fn on_leader_elected(&self, zone: &str, runtime: &str) {
            self.events.lock().unwrap().push(format!("leader {zone}/{runtime}"));
        }
    }

    // ============================================================
    // RUNTIME REGISTRY TESTS
    // ============================================================

    #[test]
    fn test_join_and_leave_remove_empty_zone() {
        let registry = RuntimeRegistry::new();

        registry.on_join("z1", "b");
        registry.on_join("z1", "c");
        registry.on_join("z2", "d");
        assert_eq!(registry.runtime_count(), 3);
        assert_eq!(registry.zones(), vec!["z1".to_string(), "z2".to_string()]);

        registry.on_leave("z2", "d");
        assert_eq!(registry.zones(), vec!["z1".to_string()]);

        registry.on_leave("z1", "b");
        registry.on_leave("z1", "c");
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_leave_unknown_runtime_is_noop() {
        let registry = RuntimeRegistry::new();
        registry.on_join("z1", "b");

        registry.on_leave("z1", "ghost");
        registry.on_leave("z9", "b");

        assert_eq!(registry.runtime_count(), 1);
    }

    #[test]
    fn test_applying_same_view_twice_is_idempotent() {
        let registry = RuntimeRegistry::new();
        let a = addr(RuntimeIdentity::controller("a"));
        let b = addr(RuntimeIdentity::participant("z1", "b"));
        let c = addr(RuntimeIdentity::participant("z1", "c"));
        let view = View::new(1, vec![a, b, c]);

        registry.apply(&diff::compute(None, &view));
        let first = registry.snapshot();

        // Replaying the initial diff and an identical-view diff changes nothing.
        registry.apply(&diff::compute(None, &view));
        registry.apply(&diff::compute(Some(&view), &view));
        let second = registry.snapshot();

        assert_eq!(first, second);
        assert_eq!(registry.runtime_count(), 2);
        // Controllers are not zone members.
        assert_eq!(registry.zones(), vec!["z1".to_string()]);
    }

    #[test]
    fn test_apply_keeps_metadata_of_surviving_members() {
        let registry = RuntimeRegistry::new();
        let b = addr(RuntimeIdentity::participant("z1", "b"));
        let c = addr(RuntimeIdentity::participant("z1", "c"));
        let v1 = View::new(1, vec![b.clone(), c.clone()]);
        registry.apply(&diff::compute(None, &v1));

        let metadata = Metadata::from([("jms.port".to_string(), "61616".to_string())]);
        assert!(registry.update_runtime_metadata("z1", "c", metadata.clone()));

        let v2 = View::new(2, vec![c]);
        registry.apply(&diff::compute(Some(&v1), &v2));

        assert!(registry.runtime("z1", "b").is_none());
        assert_eq!(registry.runtime("z1", "c").unwrap().metadata, metadata);
    }

    #[test]
    fn test_restarted_runtime_survives_stale_endpoint_leaving() {
        let registry = RuntimeRegistry::new();
        let stale = addr(RuntimeIdentity::participant("z1", "b"));
        let restarted = addr(RuntimeIdentity::participant("z1", "b"));

        let v1 = View::new(1, vec![stale.clone()]);
        let v2 = View::new(2, vec![stale.clone(), restarted.clone()]);
        let v3 = View::new(3, vec![restarted]);
        registry.apply(&diff::compute(None, &v1));
        registry.apply(&diff::compute(Some(&v1), &v2));
        assert_eq!(registry.runtime("z1", "b").unwrap().endpoint_count(), 2);

        registry.apply(&diff::compute(Some(&v2), &v3));

        let instance = registry.runtime("z1", "b").unwrap();
        assert_eq!(instance.endpoint_count(), 1);
        assert_eq!(registry.runtime_count(), 1);

        registry.apply(&diff::compute(Some(&v3), &View::new(4, vec![])));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_metadata_update_never_creates_entries() {
        let registry = RuntimeRegistry::new();

        assert!(!registry.update_runtime_metadata("z1", "b", Metadata::new()));
        assert!(!registry.update_zone_metadata("z1", Metadata::new()));
        assert!(registry.snapshot().is_empty());
        assert!(registry.zone_metadata("z1").is_none());
    }

    #[test]
    fn test_zone_metadata_dropped_with_zone() {
        let registry = RuntimeRegistry::new();
        registry.on_join("z1", "b");
        let metadata = Metadata::from([("http.port".to_string(), "8080".to_string())]);

        assert!(registry.update_zone_metadata("z1", metadata.clone()));
        assert_eq!(registry.zone_metadata("z1"), Some(metadata));

        registry.on_leave("z1", "b");
        assert!(registry.zone_metadata("z1").is_none());
    }

    #[test]
    fn test_snapshot_is_stable_while_registry_changes() {
        let registry = RuntimeRegistry::new();
        registry.on_join("z1", "b");

        let before = registry.snapshot();
        registry.on_join("z1", "c");

        assert_eq!(before.get("z1").unwrap().len(), 1);
        assert_eq!(registry.snapshot().get("z1").unwrap().len(), 2);
    }

    #[test]
    fn test_clear() {
        let registry = RuntimeRegistry::new();
        registry.on_join("z1", "b");
        registry.update_zone_metadata("z1", Metadata::new());

        registry.clear();

        assert_eq!(registry.runtime_count(), 0);
        assert!(registry.zone_metadata("z1").is_none());
    }

    // ============================================================
    // LISTENER MULTIPLEXER TESTS
    // ============================================================

    #[test]
    fn test_dispatch_order_and_controller_filtering() {
        let listeners = ListenerMultiplexer::new();
        let recorder = Arc::new(Recorder::default());
        listeners.register(recorder.clone());

        let a = addr(RuntimeIdentity::controller("a"));
        let b = addr(RuntimeIdentity::participant("z1", "b"));
        let c = addr(RuntimeIdentity::participant("z1", "c"));
        let v1 = View::new(1, vec![a.clone(), b.clone()]);
        let v2 = View::new(2, vec![a, c]);

        listeners.dispatch(&diff::compute(None, &v1));
        listeners.dispatch(&diff::compute(Some(&v1), &v2));

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "join z1/b",
                "leader z1/b",
                "leave z1/b",
                "join z1/c",
                "leader z1/c",
            ]
        );
    }

    #[test]
    fn test_deregistered_listener_is_not_notified() {
        let listeners = ListenerMultiplexer::new();
        let kept = Arc::new(Recorder::default());
        let dropped = Arc::new(Recorder::default());
        listeners.register(kept.clone());
        let id = listeners.register(dropped.clone());

        assert!(listeners.deregister(id));
        assert!(!listeners.deregister(id));
        assert_eq!(listeners.len(), 1);

        let b = addr(RuntimeIdentity::participant("z1", "b"));
        listeners.dispatch(&diff::compute(None, &View::new(1, vec![b])));

        assert_eq!(kept.events.lock().unwrap().len(), 2);
        assert!(dropped.events.lock().unwrap().is_empty());
    }
}
