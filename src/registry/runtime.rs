use crate::membership::{MemberIdentity, NodeId, ViewDiff};

use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

pub type Metadata = HashMap<String, String>;

/// A runtime known to be a member of a zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeInstance {
    pub name: String,
    pub metadata: Metadata,
    /// Transport endpoints currently carrying this runtime name. A restarted
    /// runtime shows up under a new endpoint before the stale one leaves.
    #[serde(skip)]
    endpoints: BTreeSet<NodeId>,
}

impl RuntimeInstance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: Metadata::new(),
            endpoints: BTreeSet::new(),
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }
}

/// `zone -> runtime -> instance`.
pub type ZoneMap = BTreeMap<String, BTreeMap<String, RuntimeInstance>>;

/// Per-zone map of known runtimes plus the zone transport-metadata cache.
///
/// Writers build a complete new map and swap it in, so a reader always sees
/// either the previous view's state or the next one, never a mix. Membership
/// mutation comes from view diffs only; metadata refreshes only touch entries
/// that already exist.
pub struct RuntimeRegistry {
    zones: ArcSwap<ZoneMap>,
    zone_metadata: ArcSwap<BTreeMap<String, Metadata>>,
}

impl RuntimeRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_join(&self, zone: &str, runtime: &str) {
        self.zones.rcu(|current| {
            let mut next = ZoneMap::clone(current);
            join_into(&mut next, zone, runtime);
            next
        });
    }

    pub fn on_leave(&self, zone: &str, runtime: &str) {
        self.zones.rcu(|current| {
            let mut next = ZoneMap::clone(current);
            leave_from(&mut next, zone, runtime);
            next
        });
        self.drop_orphan_zone_metadata();
    }

    /// Applies all joins and leaves of one view change as a single swap.
    pub fn apply(&self, diff: &ViewDiff) {
        self.zones.rcu(|current| {
            let mut next = ZoneMap::clone(current);
            for member in &diff.leaves {
                endpoint_left(&mut next, member);
            }
            for member in &diff.joins {
                endpoint_joined(&mut next, member);
            }
            next
        });
        self.drop_orphan_zone_metadata();
    }

    /// Replaces a runtime's cached metadata. Returns false if the runtime is
    /// no longer registered, in which case nothing is created.
    pub fn update_runtime_metadata(&self, zone: &str, runtime: &str, metadata: Metadata) -> bool {
        let mut updated = false;
        self.zones.rcu(|current| {
            updated = false;
            let mut next = ZoneMap::clone(current);
            if let Some(instance) = next.get_mut(zone).and_then(|z| z.get_mut(runtime)) {
                instance.metadata = metadata.clone();
                updated = true;
            }
            next
        });
        updated
    }

    pub fn update_zone_metadata(&self, zone: &str, metadata: Metadata) -> bool {
        if !self.zones.load().contains_key(zone) {
            return false;
        }
        self.zone_metadata.rcu(|current| {
            let mut next = current.as_ref().clone();
            next.insert(zone.to_string(), metadata.clone());
            next
        });
        true
    }

    pub fn zone_metadata(&self, zone: &str) -> Option<Metadata> {
        self.zone_metadata.load().get(zone).cloned()
    }

    pub fn snapshot(&self) -> Arc<ZoneMap> {
        self.zones.load_full()
    }

    pub fn zones(&self) -> Vec<String> {
        self.zones.load().keys().cloned().collect()
    }

    pub fn runtime(&self, zone: &str, runtime: &str) -> Option<RuntimeInstance> {
        self.zones.load().get(zone)?.get(runtime).cloned()
    }

    pub fn runtime_count(&self) -> usize {
        self.zones.load().values().map(|zone| zone.len()).sum()
    }

    /// Drops everything; used when the domain channel disconnects.
    pub fn clear(&self) {
        self.zones.store(Arc::new(ZoneMap::new()));
        self.zone_metadata.store(Arc::new(BTreeMap::new()));
    }

    fn drop_orphan_zone_metadata(&self) {
        let zones = self.zones.load();
        if self.zone_metadata.load().keys().all(|zone| zones.contains_key(zone)) {
            return;
        }
        self.zone_metadata.rcu(|current| {
            let mut next = current.as_ref().clone();
            next.retain(|zone, _| zones.contains_key(zone));
            next
        });
    }
}

impl Default for RuntimeRegistry {
    fn default() -> Self {
        Self {
            zones: ArcSwap::from_pointee(ZoneMap::new()),
            zone_metadata: ArcSwap::from_pointee(BTreeMap::new()),
        }
    }
}

fn join_into(map: &mut ZoneMap, zone: &str, runtime: &str) {
    map.entry(zone.to_string())
        .or_default()
        .entry(runtime.to_string())
        .or_insert_with(|| RuntimeInstance::new(runtime));
}

fn endpoint_joined(map: &mut ZoneMap, member: &MemberIdentity) {
    let Some(zone) = member.zone() else {
        return;
    };
    map.entry(zone.to_string())
        .or_default()
        .entry(member.runtime_name().to_string())
        .or_insert_with(|| RuntimeInstance::new(member.runtime_name()))
        .endpoints
        .insert(member.address.id.clone());
}

/// Drops the entry only once no endpoint of the runtime is left.
fn endpoint_left(map: &mut ZoneMap, member: &MemberIdentity) {
    let Some(zone) = member.zone() else {
        return;
    };
    let still_present = match map.get_mut(zone).and_then(|z| z.get_mut(member.runtime_name())) {
        Some(instance) => {
            instance.endpoints.remove(&member.address.id);
            !instance.endpoints.is_empty()
        }
        None => return,
    };
    if !still_present {
        leave_from(map, zone, member.runtime_name());
    }
}

fn leave_from(map: &mut ZoneMap, zone: &str, runtime: &str) {
    let now_empty = match map.get_mut(zone) {
        Some(runtimes) => {
            runtimes.remove(runtime);
            runtimes.is_empty()
        }
        None => false,
    };
    if now_empty {
        map.remove(zone);
    }
}
