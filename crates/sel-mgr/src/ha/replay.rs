//! API calls made while a table is restarting.
//!
//! Nothing is written to hardware during replay. Each call is validated the
//! way the live call would be and recorded into the group's [`ReplayInfo`];
//! `ha_reconcile` turns the recording into the final state.

use super::types::{HaState, ReplayInfo};
use crate::debug_log;
use crate::table::{MemberSpec, SelectorTable};
use pipe_sel_types::{
    ActionFnHandle, GroupHandle, MatchEntryHandle, MatchTableHandle, MemberHandle, SelError, SelResult,
};
use std::collections::BTreeSet;

fn restarting(ha: &mut Option<HaState>) -> SelResult<&mut HaState> {
    ha.as_mut().ok_or_else(|| SelError::invalid_argument("table is not restarting"))
}

fn replayed(ha: &mut HaState, idx: usize, group: GroupHandle) -> SelResult<&mut ReplayInfo> {
    ha.replay
        .get_mut(&group)
        .filter(|r| r.instance == idx)
        .ok_or_else(|| SelError::not_found(format!("replayed group {}", group)))
}

impl SelectorTable {
    pub(crate) fn replay_group_create(&mut self, idx: usize, group_id: u32, max_size: u32) -> SelResult<GroupHandle> {
        let handle = self.mint_group_handle();
        let ha = restarting(&mut self.ha)?;
        ha.replay.insert(handle, ReplayInfo::new(handle, idx, group_id, max_size));
        debug_log!("SelHaHlp", group = %handle, group_id, max_size, "replayed group create");
        Ok(handle)
    }

    pub(crate) fn replay_group_destroy(&mut self, idx: usize, group: GroupHandle) -> SelResult<()> {
        let ha = restarting(&mut self.ha)?;
        let info = replayed(ha, idx, group)?;
        if !info.references.is_empty() {
            return Err(SelError::references_exist(format!(
                "group {} referenced by {} match entries",
                group,
                info.references.len()
            )));
        }
        ha.replay.remove(&group);
        Ok(())
    }

    pub(crate) fn replay_member_add(
        &mut self,
        idx: usize,
        group: GroupHandle,
        spec: MemberSpec,
        action_fn: ActionFnHandle,
    ) -> SelResult<()> {
        let ha = restarting(&mut self.ha)?;
        let info = replayed(ha, idx, group)?;
        if spec.weight == 0 {
            return Err(SelError::invalid_argument(format!("member {} with weight 0", spec.handle)));
        }
        if info.position(spec.handle).is_some() {
            return Err(SelError::already_exists(format!("member {} in group {}", spec.handle, group)));
        }
        if let Some(have) = info.action_fn {
            if have != action_fn && !info.members.is_empty() {
                return Err(SelError::invalid_argument(format!(
                    "action function {} differs from group {} ({})",
                    action_fn, group, have
                )));
            }
        }
        if info.placements() + spec.weight > info.max_size {
            return Err(SelError::invalid_argument(format!(
                "group {} of max size {} cannot take {} more placements",
                group, info.max_size, spec.weight
            )));
        }
        info.action_fn = Some(action_fn);
        info.members.push(spec);
        Ok(())
    }

    pub(crate) fn replay_member_del(&mut self, idx: usize, group: GroupHandle, member: MemberHandle) -> SelResult<()> {
        let ha = restarting(&mut self.ha)?;
        let info = replayed(ha, idx, group)?;
        let pos = info
            .position(member)
            .ok_or_else(|| SelError::not_found(format!("member {} in group {}", member, group)))?;
        let active_left = info.members.iter().filter(|m| m.enabled).count();
        if info.members[pos].enabled && active_left == 1 && !info.references.is_empty() {
            return Err(SelError::references_exist(format!(
                "member {} is the last active member of referenced group {}",
                member, group
            )));
        }
        info.members.remove(pos);
        if info.members.is_empty() {
            info.action_fn = None;
        }
        Ok(())
    }

    pub(crate) fn replay_member_state(
        &mut self,
        idx: usize,
        group: GroupHandle,
        member: MemberHandle,
        enabled: bool,
    ) -> SelResult<()> {
        let ha = restarting(&mut self.ha)?;
        let info = replayed(ha, idx, group)?;
        let pos = info
            .position(member)
            .ok_or_else(|| SelError::not_found(format!("member {} in group {}", member, group)))?;
        let active_left = info.members.iter().filter(|m| m.enabled).count();
        if !enabled && info.members[pos].enabled && active_left == 1 && !info.references.is_empty() {
            return Err(SelError::references_exist(format!(
                "member {} is the last active member of referenced group {}",
                member, group
            )));
        }
        info.members[pos].enabled = enabled;
        Ok(())
    }

    pub(crate) fn replay_members_set(
        &mut self,
        idx: usize,
        group: GroupHandle,
        members: &[MemberSpec],
        action_fn: ActionFnHandle,
    ) -> SelResult<()> {
        let ha = restarting(&mut self.ha)?;
        let info = replayed(ha, idx, group)?;
        let mut seen = BTreeSet::new();
        for spec in members {
            if spec.weight == 0 || !seen.insert(spec.handle) {
                return Err(SelError::invalid_argument(format!(
                    "member {} listed twice or with weight 0",
                    spec.handle
                )));
            }
        }
        let total: u32 = members.iter().map(|m| m.weight).sum();
        if total > info.max_size {
            return Err(SelError::invalid_argument(format!(
                "{} placements exceed group {} max size {}",
                total, group, info.max_size
            )));
        }
        if !info.references.is_empty() && !members.iter().any(|m| m.enabled) {
            return Err(SelError::references_exist(format!(
                "referenced group {} would have no active member",
                group
            )));
        }
        info.members = members.to_vec();
        info.action_fn = (!members.is_empty()).then_some(action_fn);
        Ok(())
    }

    pub(crate) fn replay_group_resize(&mut self, idx: usize, group: GroupHandle, new_max: u32) -> SelResult<()> {
        let limit = self.config.max_group_size;
        let ha = restarting(&mut self.ha)?;
        let info = replayed(ha, idx, group)?;
        if new_max == 0 || new_max > limit || new_max < info.placements() {
            return Err(SelError::invalid_argument(format!(
                "group {} cannot be resized to {}",
                group, new_max
            )));
        }
        info.max_size = new_max;
        Ok(())
    }

    pub(crate) fn replay_fallback(&mut self, member: Option<MemberHandle>) -> SelResult<()> {
        let ha = restarting(&mut self.ha)?;
        ha.replay_fallback = member;
        Ok(())
    }

    pub(crate) fn replay_reference(
        &mut self,
        idx: usize,
        group: GroupHandle,
        table: MatchTableHandle,
        entry: MatchEntryHandle,
        attach: bool,
    ) -> SelResult<()> {
        let ha = restarting(&mut self.ha)?;
        let info = replayed(ha, idx, group)?;
        if attach {
            if !info.members.iter().any(|m| m.enabled) {
                return Err(SelError::invalid_argument(format!(
                    "group {} has no active member to reference",
                    group
                )));
            }
            if !info.references.insert((table, entry)) {
                return Err(SelError::already_exists(format!(
                    "reference {}/{} on group {}",
                    table, entry, group
                )));
            }
        } else if !info.references.remove(&(table, entry)) {
            return Err(SelError::not_found(format!("reference {}/{} on group {}", table, entry, group)));
        }
        Ok(())
    }
}
