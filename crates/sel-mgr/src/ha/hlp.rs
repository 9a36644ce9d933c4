//! Software-facing half of a restart: binding replayed groups to decoded
//! ones and applying the difference.

use super::types::{DecodeState, HaState, ReplayInfo};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::context::{ActionData, Session};
use crate::movelist::{MoveList, MoveListNode, MoveOp};
use crate::placement::{word_info, WordRequest};
use crate::table::{Member, MemberSpec, SelectorTable};
use crate::{audit_log, debug_log, error_log, info_log, warn_log};
use pipe_sel_types::{GroupHandle, MemberHandle, PipeId, SelError, SelResult};
use std::collections::BTreeSet;

/// Counts reported by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ReconcileCounts {
    matched: u64,
    created: u64,
    cleaned: u64,
    substituted: u64,
}

impl SelectorTable {
    /// Switches a cold table into restart mode.
    pub fn ha_begin(&mut self) -> SelResult<()> {
        if self.ha.is_some() {
            return Err(SelError::already_exists(format!("restart of table {}", self.config.name)));
        }
        if self.instances.iter().any(|i| !i.groups.is_empty()) || self.fallback.is_some() {
            return Err(SelError::invalid_argument(format!(
                "table {} already holds state",
                self.config.name
            )));
        }
        self.ha = Some(HaState::new(self.instances.clone()));
        info_log!("SelHaHlp", table = %self.config.name, "restart begins");
        audit_log!(
            AuditRecord::new(AuditCategory::WarmRestart, "SelHaHlp", "begin")
                .with_outcome(AuditOutcome::InProgress)
                .with_object_id(self.config.name.clone())
                .with_object_type("sel_table")
        );
        Ok(())
    }

    /// Restart bookkeeping, while restarting.
    pub fn ha_state(&self) -> Option<&HaState> {
        self.ha.as_ref()
    }

    /// Ties a replayed group to the decoded group at stage-0 word `base`.
    pub fn ha_bind_group(&mut self, group: GroupHandle, pipe: PipeId, base: u32) -> SelResult<()> {
        let idx = self.instance_index(pipe)?;
        let ha = self
            .ha
            .as_mut()
            .ok_or_else(|| SelError::invalid_argument("table is not restarting"))?;
        if ha.replay.values().any(|r| r.instance == idx && r.sel_base == Some(base) && r.handle != group) {
            return Err(SelError::already_exists(format!("binding for base {}", base)));
        }
        let info = ha
            .replay
            .get_mut(&group)
            .filter(|r| r.instance == idx)
            .ok_or_else(|| SelError::not_found(format!("replayed group {}", group)))?;
        info.sel_base = Some(base);
        if let Some(decoded) = ha.decoded.get_mut(&(idx, base)) {
            decoded.state = DecodeState::Matched;
        }
        debug_log!("SelHaHlp", group = %group, base, "group bound");
        Ok(())
    }

    /// Drops everything decoded or replayed and returns to the cold state.
    pub fn ha_abort(&mut self) {
        let Some(ha) = self.ha.take() else {
            return;
        };
        self.instances = ha.cold;
        self.fallback = None;
        self.move_list = MoveList::new();
        self.txn = None;
        warn_log!("SelHaHlp", table = %self.config.name, "restart aborted");
        audit_log!(
            AuditRecord::new(AuditCategory::WarmRestart, "SelHaHlp", "abort")
                .with_outcome(AuditOutcome::Failure)
                .with_object_id(self.config.name.clone())
                .with_object_type("sel_table")
        );
    }

    /// Applies the replayed configuration on top of the decoded hardware
    /// state and leaves restart mode.
    ///
    /// Returns the MoveList of the changes hardware still needs. A failure
    /// aborts the restart.
    pub fn ha_reconcile(&mut self, session: Session) -> SelResult<MoveList> {
        let ha = self
            .ha
            .take()
            .ok_or_else(|| SelError::invalid_argument("table is not restarting"))?;
        let result = self.transact(session, |t| t.reconcile_all(&ha));
        match result {
            Ok(counts) => {
                self.stats.ha_groups_matched += counts.matched;
                self.stats.ha_groups_created += counts.created;
                self.stats.ha_groups_cleaned += counts.cleaned;
                self.stats.ha_handles_substituted += counts.substituted;
                let moves = self.move_list.take();
                info_log!(
                    "SelHaHlp",
                    table = %self.config.name,
                    matched = counts.matched,
                    created = counts.created,
                    cleaned = counts.cleaned,
                    nodes = moves.len(),
                    "restart reconciled"
                );
                audit_log!(
                    AuditRecord::new(AuditCategory::WarmRestart, "SelHaHlp", "reconcile")
                        .with_outcome(AuditOutcome::Success)
                        .with_object_id(self.config.name.clone())
                        .with_object_type("sel_table")
                        .with_session(session.0)
                        .with_details(serde_json::json!({
                            "matched": counts.matched,
                            "created": counts.created,
                            "cleaned": counts.cleaned,
                            "substituted": counts.substituted,
                            "nodes": moves.len(),
                        }))
                );
                Ok(moves)
            }
            Err(e) => {
                error_log!("SelHaHlp", table = %self.config.name, error = %e, "reconcile failed");
                self.ha = Some(ha);
                self.ha_abort();
                Err(e)
            }
        }
    }

    fn reconcile_all(&mut self, ha: &HaState) -> SelResult<ReconcileCounts> {
        let mut counts = ReconcileCounts::default();
        let mut fresh: Vec<&ReplayInfo> = Vec::new();
        let mut bound = BTreeSet::new();

        for info in ha.replay.values() {
            let decoded = info.sel_base.and_then(|b| ha.decoded.get(&(info.instance, b)));
            match decoded {
                Some(d) => {
                    bound.insert((info.instance, d.pointer.base()));
                    counts.substituted += self.reconcile_group(ha, info, d.handle)?;
                    counts.matched += 1;
                }
                None => {
                    if let Some(base) = info.sel_base {
                        warn_log!("SelHaHlp", group = %info.handle, base, "bound base was never decoded");
                    }
                    fresh.push(info);
                }
            }
        }

        for ((idx, base), decoded) in &ha.decoded {
            if bound.contains(&(*idx, Some(*base))) {
                continue;
            }
            warn_log!("SelHaHlp", group = %decoded.handle, base, "removing hardware-only group");
            self.do_group_destroy(*idx, decoded.handle)?;
            counts.cleaned += 1;
        }

        for info in fresh {
            self.do_group_create(info.instance, info.handle, info.group_id, info.max_size, WordRequest::FirstFit)?;
            for spec in &info.members {
                self.do_member_add(info.instance, info.handle, *spec, info.action_fn, None)?;
            }
            self.group_mut(info.instance, info.handle)?.references = info.references.clone();
            counts.created += 1;
        }

        self.reconcile_fallback(ha)?;
        Ok(counts)
    }

    /// Brings one decoded group to its replayed state. Returns the number of
    /// members whose handle was substituted in place.
    fn reconcile_group(&mut self, ha: &HaState, info: &ReplayInfo, temp: GroupHandle) -> SelResult<u64> {
        let idx = info.instance;
        let handle = info.handle;
        if self.instances[idx].groups.contains_key(&handle) {
            return Err(SelError::already_exists(format!("group {}", handle)));
        }
        self.backup_group(idx, temp);
        self.backup_group(idx, handle);
        let mut group = self.instances[idx]
            .groups
            .remove(&temp)
            .ok_or_else(|| SelError::unexpected(format!("decoded group {} vanished", temp)))?;
        group.handle = handle;
        group.group_id = info.group_id;
        group.action_fn = info.action_fn;

        // Hardware members are matched to intended ones by action data.
        let mut unclaimed: Vec<(MemberHandle, ActionData)> = group
            .members
            .keys()
            .filter_map(|m| ha.member_data.get(m).map(|d| (*m, d.clone())))
            .collect();
        let mut substituted = 0;
        for spec in &info.members {
            let Some(want) = self.ctx.adt.member_data(spec.handle) else {
                continue;
            };
            let Some(pos) = unclaimed.iter().position(|(_, d)| *d == want) else {
                continue;
            };
            let (old, _) = unclaimed.remove(pos);
            for stage in group.stages.iter_mut() {
                stage.rename(old, spec.handle)?;
            }
            if let Some(mut record) = group.members.remove(&old) {
                record.handle = spec.handle;
                group.members.insert(spec.handle, record);
            }
            debug_log!("SelHaHlp", group = %handle, from = %old, to = %spec.handle, "member handle substituted");
            substituted += 1;
        }
        group.refresh_counts();
        self.instances[idx].groups.insert(handle, group);

        let mut placeholders: BTreeSet<MemberHandle> = unclaimed.iter().map(|(m, _)| *m).collect();

        // Shape first: a different word layout means a fresh placement.
        let want = word_info(info.max_size, self.config.word_width, self.config.min_multiword_entries)?;
        let group = self.group_ref(idx, handle)?;
        let current = group.word_info();
        let from_profile = group.stages.first().is_some_and(|s| s.placement.from_profile);
        let reshape = match current {
            Some(c) => c != want && !(from_profile && c.fits(&want)),
            None => true,
        };
        if reshape {
            for p in std::mem::take(&mut placeholders) {
                self.do_member_del(idx, handle, p, false)?;
            }
            self.do_group_resize(idx, handle, info.max_size, true)?;
        } else {
            self.group_mut(idx, handle)?.max_size = info.max_size;
        }

        for spec in &info.members {
            let existing: Option<Member> = self.group_ref(idx, handle)?.members.get(&spec.handle).cloned();
            match existing {
                Some(record) if record.weight == spec.weight => {
                    if record.state.is_active() != spec.enabled {
                        self.do_member_state(idx, handle, spec.handle, spec.enabled, false)?;
                    }
                }
                Some(_) => {
                    self.do_member_del(idx, handle, spec.handle, false)?;
                    self.add_over_placeholders(idx, handle, *spec, info, &mut placeholders)?;
                }
                None => {
                    self.add_over_placeholders(idx, handle, *spec, info, &mut placeholders)?;
                }
            }
        }

        for p in placeholders {
            if self.group_ref(idx, handle)?.members.contains_key(&p) {
                self.do_member_del(idx, handle, p, false)?;
            }
        }
        self.group_mut(idx, handle)?.references = info.references.clone();
        debug_log!("SelHaHlp", group = %handle, decoded = %temp, substituted, "group reconciled");
        Ok(substituted)
    }

    fn add_over_placeholders(
        &mut self,
        idx: usize,
        handle: GroupHandle,
        spec: MemberSpec,
        info: &ReplayInfo,
        placeholders: &mut BTreeSet<MemberHandle>,
    ) -> SelResult<()> {
        let live = if placeholders.is_empty() { None } else { Some(&*placeholders) };
        self.do_member_add(idx, handle, spec, info.action_fn, live)?;
        let group = self.group_ref(idx, handle)?;
        placeholders.retain(|p| group.members.contains_key(p));
        Ok(())
    }

    fn reconcile_fallback(&mut self, ha: &HaState) -> SelResult<()> {
        match (ha.replay_fallback, &ha.decoded_fallback) {
            (Some(member), Some(data)) if self.ctx.adt.member_data(member).as_ref() == Some(data) => {
                self.backup_fallback();
                self.fallback = Some(member);
                Ok(())
            }
            (Some(member), _) => self.do_set_fallback(Some(member)),
            (None, Some(_)) => {
                self.backup_fallback();
                let pipe = if self.config.symmetric { PipeId::ALL } else { self.instances[0].pipe };
                self.emit_node(MoveListNode::new(MoveOp::ClrFallback, pipe, GroupHandle::NULL));
                self.fallback = None;
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }
}
