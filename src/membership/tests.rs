//! Membership Module Tests
//!
//! ## Test Scopes
//! - **Naming**: encoding/decoding of logical names and rejection of foreign ones.
//! - **Leadership**: positional leader derivation under reordering.
//! - **Diffing**: joins, leaves and new leaders between consecutive views.

#[cfg(test)]
mod tests {
    use crate::membership::diff;
    use crate::membership::naming;
    use crate::membership::types::{Address, RuntimeIdentity, RuntimeKind, View};

    fn addr(identity: RuntimeIdentity) -> Address {
        Address::new(naming::encode(&identity).unwrap())
    }

    fn names(members: &[crate::membership::MemberIdentity]) -> Vec<&str> {
        members.iter().map(|m| m.runtime_name()).collect()
    }

    // ============================================================
    // NAMING TESTS
    // ============================================================

    #[test]
    fn test_encode_decode_participant() {
        let identity = RuntimeIdentity::participant("z1", "runtime-b");
        let name = naming::encode(&identity).unwrap();

        assert_eq!(name, "participant:z1:runtime-b");
        assert_eq!(naming::decode(&name), Some(identity));
    }

    #[test]
    fn test_controller_has_no_zone() {
        let identity = RuntimeIdentity::controller("ctl");
        let name = naming::encode(&identity).unwrap();

        let decoded = naming::decode(&name).unwrap();
        assert_eq!(decoded.kind, RuntimeKind::Controller);
        assert!(decoded.zone.is_none());
        assert_eq!(naming::zone_of(&Address::new(name)), None);
    }

    #[test]
    fn test_runtime_name_may_contain_separator() {
        let identity = RuntimeIdentity::node("z1", "host:8080");
        let name = naming::encode(&identity).unwrap();

        assert_eq!(naming::decode(&name).unwrap().runtime_name, "host:8080");
    }

    #[test]
    fn test_encode_rejects_invalid_identities() {
        assert!(naming::encode(&RuntimeIdentity::participant("bad:zone", "rt")).is_err());
        assert!(naming::encode(&RuntimeIdentity::participant("z1", "")).is_err());

        let zoned_controller = RuntimeIdentity {
            kind: RuntimeKind::Controller,
            zone: Some("z1".to_string()),
            runtime_name: "ctl".to_string(),
        };
        assert!(naming::encode(&zoned_controller).is_err());
    }

    #[test]
    fn test_decode_rejects_foreign_names() {
        assert!(naming::decode("random-host-42").is_none());
        assert!(naming::decode("unknown:z1:rt").is_none());
        assert!(naming::decode("participant::rt").is_none());
        assert!(naming::decode("controller:z1:rt").is_none());
        assert!(naming::decode("participant:z1:").is_none());
    }

    #[test]
    fn test_resolve_and_members_of() {
        let a = addr(RuntimeIdentity::controller("a"));
        let b = addr(RuntimeIdentity::participant("z1", "b"));
        let c = addr(RuntimeIdentity::participant("z1", "c"));
        let d = addr(RuntimeIdentity::participant("z2", "d"));
        let foreign = Address::new("not-a-runtime");
        let view = View::new(
            1,
            vec![a.clone(), b.clone(), foreign, c.clone(), d.clone()],
        );

        assert_eq!(naming::members_of("z1", &view), vec![b.clone(), c.clone()]);
        assert_eq!(naming::members_of("z3", &view), Vec::<Address>::new());
        assert_eq!(naming::resolve("d", &view), Some(d));
        assert_eq!(naming::resolve("missing", &view), None);
        assert_eq!(naming::controller_of(&view), Some(a));
        assert_eq!(naming::zones(&view), vec!["z1".to_string(), "z2".to_string()]);
        assert_eq!(naming::members(&view).len(), 4);
    }

    // ============================================================
    // LEADERSHIP TESTS
    // ============================================================

    #[test]
    fn test_leader_is_first_zone_member() {
        let a = addr(RuntimeIdentity::controller("a"));
        let b = addr(RuntimeIdentity::participant("z1", "b"));
        let c = addr(RuntimeIdentity::participant("z1", "c"));
        let view = View::new(1, vec![a, b.clone(), c]);

        assert_eq!(naming::leader_of("z1", &view), Some(b));
        assert_eq!(naming::leader_of("z2", &view), None);
    }

    #[test]
    fn test_leader_changes_only_when_first_member_changes() {
        let b = addr(RuntimeIdentity::participant("z1", "b"));
        let c = addr(RuntimeIdentity::participant("z1", "c"));
        let x = addr(RuntimeIdentity::participant("z2", "x"));

        // Same member set, different order: leadership follows position.
        let v1 = View::new(1, vec![b.clone(), x.clone(), c.clone()]);
        let v2 = View::new(2, vec![c.clone(), b.clone(), x.clone()]);
        assert_eq!(naming::leader_of("z1", &v1), Some(b.clone()));
        assert_eq!(naming::leader_of("z1", &v2), Some(c.clone()));

        // Reordering another zone's members does not move z1's leader.
        let v3 = View::new(3, vec![x.clone(), b.clone(), c.clone()]);
        assert_eq!(naming::leader_of("z1", &v3), Some(b.clone()));
        let reordered = diff::compute(Some(&v1), &v3);
        assert!(reordered.new_leaders.is_empty());

        let moved = diff::compute(Some(&v1), &v2);
        assert_eq!(names(&moved.new_leaders), vec!["c"]);
        assert!(moved.joins.is_empty());
        assert!(moved.leaves.is_empty());
    }

    // ============================================================
    // DIFF TESTS
    // ============================================================

    #[test]
    fn test_diff_from_no_previous_view() {
        let a = addr(RuntimeIdentity::controller("a"));
        let b = addr(RuntimeIdentity::participant("z1", "b"));
        let c = addr(RuntimeIdentity::participant("z1", "c"));
        let d = addr(RuntimeIdentity::participant("z2", "d"));
        let view = View::new(4, vec![a, b, c, d]);

        let result = diff::compute(None, &view);

        assert_eq!(names(&result.joins), vec!["a", "b", "c", "d"]);
        assert!(result.leaves.is_empty());
        assert_eq!(names(&result.new_leaders), vec!["b", "d"]);
    }

    #[test]
    fn test_diff_identical_views_is_empty() {
        let b = addr(RuntimeIdentity::participant("z1", "b"));
        let c = addr(RuntimeIdentity::participant("z1", "c"));
        let view = View::new(2, vec![b, c]);

        let result = diff::compute(Some(&view), &view.clone());

        assert!(result.is_empty());
    }

    #[test]
    fn test_diff_leader_suspected() {
        let a = addr(RuntimeIdentity::controller("a"));
        let b = addr(RuntimeIdentity::participant("z1", "b"));
        let c = addr(RuntimeIdentity::participant("z1", "c"));
        let before = View::new(3, vec![a.clone(), b, c.clone()]);
        let after = View::new(4, vec![a, c]);

        let result = diff::compute(Some(&before), &after);

        assert!(result.joins.is_empty());
        assert_eq!(names(&result.leaves), vec!["b"]);
        assert_eq!(names(&result.new_leaders), vec!["c"]);
    }

    #[test]
    fn test_diff_zone_emptied_has_no_new_leader() {
        let b = addr(RuntimeIdentity::participant("z1", "b"));
        let d = addr(RuntimeIdentity::participant("z2", "d"));
        let before = View::new(1, vec![b.clone(), d]);
        let after = View::new(2, vec![b]);

        let result = diff::compute(Some(&before), &after);

        assert_eq!(names(&result.leaves), vec!["d"]);
        assert!(result.new_leaders.is_empty());
    }
}
