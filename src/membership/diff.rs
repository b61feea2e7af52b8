//! View Diff Engine
//!
//! The only input to registry mutation and listener fan-out: given the
//! previously processed view (if any) and the new one, work out who joined,
//! who left and which zones have a different leader.

use super::naming;
use super::types::{MemberIdentity, View};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewDiff {
    /// Members of the new view absent from the previous one, in new-view order.
    pub joins: Vec<MemberIdentity>,
    /// Members of the previous view absent from the new one (left or suspected).
    pub leaves: Vec<MemberIdentity>,
    /// Zone leaders that differ from the previous view's leader of the same zone.
    pub new_leaders: Vec<MemberIdentity>,
}

impl ViewDiff {
    pub fn is_empty(&self) -> bool {
        self.joins.is_empty() && self.leaves.is_empty() && self.new_leaders.is_empty()
    }
}

/// `previous == None` is treated as the empty view.
pub fn compute(previous: Option<&View>, current: &View) -> ViewDiff {
    let empty = View::empty();
    let previous = previous.unwrap_or(&empty);

    let joins = naming::members(current)
        .into_iter()
        .filter(|member| !previous.contains(&member.address))
        .collect();

    let leaves = naming::members(previous)
        .into_iter()
        .filter(|member| !current.contains(&member.address))
        .collect();

    let new_leaders = naming::zones(current)
        .iter()
        .filter_map(|zone| {
            let leader = naming::leader_of(zone, current)?;
            if naming::leader_of(zone, previous).as_ref() == Some(&leader) {
                return None;
            }
            naming::identify(&leader)
        })
        .collect();

    ViewDiff {
        joins,
        leaves,
        new_leaders,
    }
}
