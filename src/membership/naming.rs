//! Member Naming Scheme
//!
//! Encodes a runtime identity into the logical name a member connects with
//! (`kind:zone:runtime`, zone empty for controllers) and derives zone
//! membership and leadership from a [`View`]. Everything here is a pure
//! function of the view.

use super::types::{Address, MemberIdentity, RuntimeIdentity, RuntimeKind, View};
use crate::error::{FederationError, Result};

pub const SEPARATOR: char = ':';

/// Builds the logical name for `identity`.
///
/// The runtime name may contain the separator (it is the last segment); zone
/// names may not.
pub fn encode(identity: &RuntimeIdentity) -> Result<String> {
    let zone = identity.zone.as_deref().unwrap_or("");
    if zone.contains(SEPARATOR) {
        return Err(FederationError::InvalidName(zone.to_string()));
    }
    if identity.runtime_name.is_empty() {
        return Err(FederationError::InvalidName(identity.runtime_name.clone()));
    }
    match (identity.kind, identity.zone.is_some()) {
        (RuntimeKind::Controller, true) | (RuntimeKind::Participant | RuntimeKind::Node, false) => {
            return Err(FederationError::InvalidName(identity.runtime_name.clone()));
        }
        _ => {}
    }

    Ok(format!(
        "{}{SEPARATOR}{}{SEPARATOR}{}",
        identity.kind.as_str(),
        zone,
        identity.runtime_name
    ))
}

pub fn decode(name: &str) -> Option<RuntimeIdentity> {
    let mut parts = name.splitn(3, SEPARATOR);
    let kind = RuntimeKind::parse(parts.next()?)?;
    let zone = parts.next()?;
    let runtime_name = parts.next()?;
    if runtime_name.is_empty() {
        return None;
    }

    let zone = match (kind, zone.is_empty()) {
        (RuntimeKind::Controller, true) => None,
        (RuntimeKind::Controller, false) => return None,
        (_, true) => return None,
        (_, false) => Some(zone.to_string()),
    };

    Some(RuntimeIdentity {
        kind,
        zone,
        runtime_name: runtime_name.to_string(),
    })
}

pub fn identify(address: &Address) -> Option<MemberIdentity> {
    decode(&address.name).map(|identity| MemberIdentity {
        address: address.clone(),
        identity,
    })
}

/// Decoded members of `view` in view order; foreign names are skipped.
pub fn members(view: &View) -> Vec<MemberIdentity> {
    view.members.iter().filter_map(identify).collect()
}

pub fn zone_of(address: &Address) -> Option<String> {
    decode(&address.name).and_then(|identity| identity.zone)
}

pub fn runtime_name_of(address: &Address) -> Option<String> {
    decode(&address.name).map(|identity| identity.runtime_name)
}

/// First member of `zone` in view order.
pub fn leader_of(zone: &str, view: &View) -> Option<Address> {
    view.members
        .iter()
        .find(|address| zone_of(address).as_deref() == Some(zone))
        .cloned()
}

pub fn members_of(zone: &str, view: &View) -> Vec<Address> {
    view.members
        .iter()
        .filter(|address| zone_of(address).as_deref() == Some(zone))
        .cloned()
        .collect()
}

pub fn resolve(runtime_name: &str, view: &View) -> Option<Address> {
    view.members
        .iter()
        .find(|address| runtime_name_of(address).as_deref() == Some(runtime_name))
        .cloned()
}

pub fn controller_of(view: &View) -> Option<Address> {
    view.members
        .iter()
        .find(|address| {
            decode(&address.name).is_some_and(|identity| identity.kind == RuntimeKind::Controller)
        })
        .cloned()
}

/// Distinct zone names in order of first appearance.
pub fn zones(view: &View) -> Vec<String> {
    let mut zones: Vec<String> = Vec::new();
    for zone in view.members.iter().filter_map(zone_of) {
        if !zones.contains(&zone) {
            zones.push(zone);
        }
    }
    zones
}
