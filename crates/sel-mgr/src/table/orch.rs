//! Selector table orchestration.
//!
//! [`SelectorTable`] owns one [`TableInstance`] per pipe (a single shared
//! instance when symmetric) and exposes the group / member API. Every
//! mutating call runs as a transaction: placement and packing are applied
//! to every stage, stage-0 slot changes become MoveList nodes and update
//! callbacks, and dirty words are synced to hardware on commit.

use super::types::{Group, Member, MemberSpec, MemberState, SelTableStats, TableInstance};
use super::txn::Txn;
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::config::SelectorTableConfig;
use crate::context::{SelContext, Session, UpdateEvent};
use crate::ha::HaState;
use crate::hash::{resolve, HashParams, SelHash};
use crate::movelist::{MoveList, MoveListNode, MoveOp};
use crate::packing::{GroupStageInfo, PackOptions, SlotChange, SlotOp};
use crate::placement::{
    word_info, AdtJournal, PlacementEngine, ProfileSlot, StageInfo, StagePlacement, WordInfo,
    WordRequest,
};
use crate::{audit_log, debug_log, error_log, info_log, warn_log};
use itertools::Itertools;
use pipe_sel_types::{
    ActionFnHandle, GroupHandle, MatchEntryHandle, MatchTableHandle, MemberHandle, PipeBitmap,
    PipeId, SelError, SelResult,
};
use std::collections::BTreeSet;

/// What a MoveList node or callback needs to know about the group it
/// belongs to.
#[derive(Debug, Clone)]
pub(crate) struct NodeCtx {
    pub pipe: PipeId,
    pub group: GroupHandle,
    pub action_fn: Option<ActionFnHandle>,
    pub entries_per_word: u32,
    pub placements: Vec<StagePlacement>,
}

impl NodeCtx {
    fn of(pipe: PipeId, group: &Group) -> Self {
        Self {
            pipe,
            group: group.handle,
            action_fn: group.action_fn,
            entries_per_word: group.word_info().map_or(0, |i| i.entries_per_word),
            placements: group.placements_per_stage(),
        }
    }
}

pub struct SelectorTable {
    pub(crate) config: SelectorTableConfig,
    pub(crate) ctx: SelContext,
    pub(crate) instances: Vec<TableInstance>,
    pub(crate) fallback: Option<MemberHandle>,
    pub(crate) stats: SelTableStats,
    pub(crate) move_list: MoveList,
    pub(crate) journal: AdtJournal,
    pub(crate) next_group_handle: u32,
    pub(crate) txn: Option<Txn>,
    pub(crate) ha: Option<HaState>,
}

impl std::fmt::Debug for SelectorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorTable")
            .field("name", &self.config.name)
            .field("instances", &self.instances.len())
            .field("fallback", &self.fallback)
            .field("restarting", &self.ha.is_some())
            .finish_non_exhaustive()
    }
}

impl SelectorTable {
    /// Builds the table and pre-reserves the configured size profile.
    pub fn new(config: SelectorTableConfig, ctx: SelContext) -> SelResult<Self> {
        config.validate()?;
        let instances = Self::cold_instances(&config);
        let mut table = Self {
            config,
            ctx,
            instances,
            fallback: None,
            stats: SelTableStats::default(),
            move_list: MoveList::new(),
            journal: AdtJournal::default(),
            next_group_handle: 1,
            txn: None,
            ha: None,
        };
        table.reserve_profile()?;

        audit_log!(
            AuditRecord::new(AuditCategory::ConfigurationChange, "SelTable", "table_create")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(table.config.name.clone())
                .with_object_type("sel_table")
                .with_details(serde_json::json!({
                    "mode": table.config.mode.to_string(),
                    "symmetric": table.config.symmetric,
                    "sequence_order": table.config.sequence_order,
                    "max_group_size": table.config.max_group_size,
                    "stages": table.config.stages.len(),
                    "instances": table.instances.len(),
                }))
        );
        Ok(table)
    }

    pub(crate) fn cold_instances(config: &SelectorTableConfig) -> Vec<TableInstance> {
        let stages = || -> Vec<StageInfo> {
            config
                .stages
                .iter()
                .map(|s| StageInfo::new(s.stage_id, s.ram_words))
                .collect()
        };
        if config.symmetric {
            let scope = PipeBitmap::from_pipes(config.pipes.iter().copied());
            vec![TableInstance::new(PipeId::ALL, scope, stages())]
        } else {
            config
                .pipes
                .iter()
                .map(|p| TableInstance::new(*p, PipeBitmap::from_pipes([*p]), stages()))
                .collect()
        }
    }

    pub(crate) fn reserve_profile(&mut self) -> SelResult<()> {
        let Some(profile) = self.config.profile.clone() else {
            return Ok(());
        };
        let mut journal = AdtJournal::default();
        let result = self.reserve_profile_slots(&profile, &mut journal);
        match result {
            Ok(()) => {
                journal.commit(self.ctx.adt.as_ref());
                Ok(())
            }
            Err(e) => {
                journal.rollback(self.ctx.adt.as_ref());
                error_log!("SelTable", table = %self.config.name, error = %e, "profile reservation failed");
                Err(e)
            }
        }
    }

    fn reserve_profile_slots(
        &mut self,
        profile: &[crate::config::ProfileEntry],
        journal: &mut AdtJournal,
    ) -> SelResult<()> {
        for inst in self.instances.iter_mut() {
            let engine = PlacementEngine::new(self.ctx.adt.as_ref(), inst.hw_pipe());
            let mut slots: Vec<(Vec<StagePlacement>, WordInfo)> = Vec::new();
            for entry in profile {
                let info = word_info(
                    entry.group_size,
                    self.config.word_width,
                    self.config.min_multiword_entries,
                )?;
                for _ in 0..entry.count {
                    slots.push(engine.reserve(&mut inst.stages, info, WordRequest::FirstFit, journal)?);
                }
            }
            for (placements, info) in slots {
                for p in placements {
                    inst.stages[p.stage_idx].free_slots.push(ProfileSlot {
                        base_word: p.base_word,
                        adt_base: p.adt_base,
                        info,
                    });
                }
            }
            info_log!(
                "SelTable",
                pipe = %inst.pipe,
                slots = inst.stages.first().map_or(0, |s| s.free_slots.len()),
                "size profile reserved"
            );
        }
        Ok(())
    }

    pub fn config(&self) -> &SelectorTableConfig {
        &self.config
    }

    pub fn stats(&self) -> &SelTableStats {
        &self.stats
    }

    pub fn fallback(&self) -> Option<MemberHandle> {
        self.fallback
    }

    pub fn is_restarting(&self) -> bool {
        self.ha.is_some()
    }

    /// Nodes recorded since the last call, handed over to the caller.
    pub fn take_move_list(&mut self) -> MoveList {
        self.move_list.take()
    }

    pub fn move_list(&self) -> &MoveList {
        &self.move_list
    }

    pub fn group(&self, pipe: PipeId, group: GroupHandle) -> SelResult<&Group> {
        let idx = self.instance_index(pipe)?;
        self.instances[idx]
            .groups
            .get(&group)
            .ok_or_else(|| SelError::not_found(format!("group {}", group)))
    }

    pub fn group_handles(&self, pipe: PipeId) -> SelResult<Vec<GroupHandle>> {
        let idx = self.instance_index(pipe)?;
        Ok(self.instances[idx].groups.keys().copied().collect())
    }

    pub fn instance(&self, pipe: PipeId) -> SelResult<&TableInstance> {
        let idx = self.instance_index(pipe)?;
        Ok(&self.instances[idx])
    }

    pub(crate) fn instance_index(&self, pipe: PipeId) -> SelResult<usize> {
        if self.config.symmetric {
            return if pipe.is_all() {
                Ok(0)
            } else {
                Err(SelError::invalid_argument(format!(
                    "symmetric table {} addressed with {}",
                    self.config.name, pipe
                )))
            };
        }
        self.instances
            .iter()
            .position(|i| i.pipe == pipe)
            .ok_or_else(|| SelError::not_found(format!("{} in table {}", pipe, self.config.name)))
    }

    pub(crate) fn group_ref(&self, idx: usize, group: GroupHandle) -> SelResult<&Group> {
        self.instances[idx]
            .groups
            .get(&group)
            .ok_or_else(|| SelError::not_found(format!("group {}", group)))
    }

    pub(crate) fn group_mut(&mut self, idx: usize, group: GroupHandle) -> SelResult<&mut Group> {
        self.instances[idx]
            .groups
            .get_mut(&group)
            .ok_or_else(|| SelError::not_found(format!("group {}", group)))
    }

    pub(crate) fn node_ctx(&self, idx: usize, group: GroupHandle) -> SelResult<NodeCtx> {
        let g = self.group_ref(idx, group)?;
        Ok(NodeCtx::of(self.instances[idx].pipe, g))
    }

    pub(crate) fn mint_group_handle(&mut self) -> GroupHandle {
        let handle = GroupHandle::from_raw_unchecked(self.next_group_handle);
        self.next_group_handle += 1;
        handle
    }

    fn pack_options<'a>(&self, max_size: u32, placeholders: Option<&'a BTreeSet<MemberHandle>>) -> PackOptions<'a> {
        PackOptions {
            sequence_order: self.config.sequence_order,
            total_expected: max_size,
            placeholders,
        }
    }

    // ---------------------------------------------------------------------
    // MoveList and callback emission
    // ---------------------------------------------------------------------

    pub(crate) fn emit_node(&mut self, node: MoveListNode) {
        debug_log!("SelTable", node = %node, "movelist");
        self.move_list.push(node);
    }

    /// Turns stage-0 slot changes into MoveList nodes and update callbacks.
    pub(crate) fn emit_changes(&mut self, nctx: &NodeCtx, changes: &[SlotChange]) -> SelResult<()> {
        let epw = nctx.entries_per_word;
        for change in changes {
            let op = match change.op {
                SlotOp::Add => MoveOp::Add,
                SlotOp::Del => MoveOp::Del,
                SlotOp::Activate => MoveOp::Activate,
                SlotOp::Deactivate => MoveOp::Deactivate,
            };
            let loc = change.location;
            let mut node = MoveListNode::new(op, nctx.pipe, nctx.group);
            node.member = change.member;
            node.logical_index = loc.word;
            node.logical_subindex = loc.slot;
            if op == MoveOp::Add {
                node.per_stage_action_index = nctx
                    .placements
                    .iter()
                    .map(|p| p.action_index(epw, loc.word, loc.slot))
                    .collect();
                node.disabled = !change.active;
                node.replace = change.replace;
            }
            self.emit_node(node);

            if change.is_placement() {
                self.notify(nctx, change.member, loc.offset(epw), op == MoveOp::Add)?;
            }
        }
        Ok(())
    }

    fn notify(&mut self, nctx: &NodeCtx, member: MemberHandle, logical_index: u32, is_add: bool) -> SelResult<()> {
        let Some(cb) = self.ctx.update_cb.clone() else {
            return Ok(());
        };
        let event = UpdateEvent {
            device: self.config.device,
            adt_table: self.config.adt_table_handle,
            action_fn: nctx.action_fn,
            group: nctx.group,
            member,
            logical_index,
            is_add,
        };
        let session = self.session();
        if let Err(e) = cb.on_update(session, &event) {
            error_log!("SelTable", group = %nctx.group, member = %member, error = %e, "update callback failed");
            return Err(e);
        }
        if let Some(txn) = self.txn.as_mut() {
            txn.delivered.push(event);
        }
        Ok(())
    }

    fn count_layout_flip(&mut self, was_duplicated: bool, is_duplicated: bool) {
        match (was_duplicated, is_duplicated) {
            (true, false) => self.stats.spreads += 1,
            (false, true) => self.stats.converges += 1,
            _ => {}
        }
    }

    /// Runs one packing step on every stage and returns the stage-0 changes.
    fn pack_all<F>(group: &mut Group, mut step: F) -> SelResult<Vec<SlotChange>>
    where
        F: FnMut(&mut GroupStageInfo) -> SelResult<Vec<SlotChange>>,
    {
        let mut first: Option<Vec<SlotChange>> = None;
        for stage in group.stages.iter_mut() {
            let changes = step(stage)?;
            match &first {
                None => first = Some(changes),
                Some(f) if f.len() != changes.len() => {
                    return Err(SelError::unexpected(format!(
                        "stage layouts of group {} diverged",
                        group.handle
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(first.unwrap_or_default())
    }

    /// Adds `weight` placements on every stage. A failure part way unwinds
    /// the applied placements before returning.
    fn add_weighted_all(
        group: &mut Group,
        member: MemberHandle,
        weight: u32,
        active: bool,
        ranks: &[u32],
        opts: &PackOptions<'_>,
    ) -> SelResult<Vec<SlotChange>> {
        let mut first: Option<Vec<SlotChange>> = None;
        for i in 0..group.stages.len() {
            match group.stages[i].add_weighted(member, weight, active, ranks, opts) {
                Ok(changes) => {
                    first.get_or_insert(changes);
                }
                Err(e) => {
                    let applied = e.applied();
                    warn_log!(
                        "SelTable",
                        group = %group.handle,
                        member = %member,
                        applied,
                        "weighted add failed, unwinding"
                    );
                    let mut unwind = |stage: &mut GroupStageInfo, n: u32| {
                        if let Err(u) = stage.remove_weighted(member, n, opts) {
                            error_log!("SelTable", member = %member, error = %u, "weighted unwind failed");
                        }
                    };
                    unwind(&mut group.stages[i], applied);
                    for stage in group.stages[..i].iter_mut() {
                        unwind(stage, weight);
                    }
                    return Err(e.into_sel());
                }
            }
        }
        Ok(first.unwrap_or_default())
    }

    // ---------------------------------------------------------------------
    // Internal operations (run inside a transaction)
    // ---------------------------------------------------------------------

    pub(crate) fn do_group_create(
        &mut self,
        idx: usize,
        handle: GroupHandle,
        group_id: u32,
        max_size: u32,
        request: WordRequest<'_>,
    ) -> SelResult<()> {
        if self.instances[idx].groups.contains_key(&handle) {
            return Err(SelError::already_exists(format!("group {}", handle)));
        }
        let want = word_info(max_size, self.config.word_width, self.config.min_multiword_entries)?;
        self.backup_stages(idx);
        self.backup_group(idx, handle);

        let pipe = self.instances[idx].hw_pipe();
        let engine = PlacementEngine::new(self.ctx.adt.as_ref(), pipe);
        let (placements, info) =
            engine.reserve(&mut self.instances[idx].stages, want, request, &mut self.journal)?;

        let mut stages: Vec<GroupStageInfo> =
            placements.iter().map(|p| GroupStageInfo::new(*p, info)).collect();
        stages.iter_mut().for_each(|s| s.mark_all_dirty());
        let group = Group::new(handle, group_id, max_size, stages);

        let mut node = MoveListNode::new(MoveOp::GroupCreate, self.instances[idx].pipe, handle);
        node.logical_index = info.no_words;
        node.logical_subindex = info.entries_per_word;
        node.per_stage_action_index = placements.iter().map(|p| p.adt_base).collect();
        self.emit_node(node);

        self.instances[idx].groups.insert(handle, group);
        self.stats.groups_created += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::GroupLifecycle, "SelTable", "group_create")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(handle.to_string())
                .with_object_type("sel_group")
                .with_session(self.session().0)
                .with_details(serde_json::json!({
                    "group_id": group_id,
                    "max_size": max_size,
                    "no_words": info.no_words,
                    "entries_per_word": info.entries_per_word,
                    "base_words": placements.iter().map(|p| p.base_word).collect::<Vec<_>>(),
                }))
        );
        Ok(())
    }

    /// Empties a group's slots, releases its placement and drops it.
    pub(crate) fn do_group_destroy(&mut self, idx: usize, handle: GroupHandle) -> SelResult<()> {
        let group = self.group_ref(idx, handle)?;
        if group.is_referenced() {
            return Err(SelError::references_exist(format!(
                "group {} referenced by {} match entries",
                handle,
                group.references.len()
            )));
        }
        self.backup_stages(idx);
        self.backup_group(idx, handle);

        let nctx = self.node_ctx(idx, handle)?;
        let group = self.group_mut(idx, handle)?;
        let changes = Self::pack_all(group, |s| Ok(s.clear_all()))?;
        let info = group.word_info();
        self.emit_changes(&nctx, &changes)?;

        if let Some(info) = info {
            let pipe = self.instances[idx].hw_pipe();
            let engine = PlacementEngine::new(self.ctx.adt.as_ref(), pipe);
            engine.release(&mut self.instances[idx].stages, &nctx.placements, info, &mut self.journal)?;
        }
        self.emit_node(MoveListNode::new(MoveOp::GroupDestroy, nctx.pipe, handle));
        self.instances[idx].groups.remove(&handle);
        self.stats.groups_destroyed += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::GroupLifecycle, "SelTable", "group_destroy")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(handle.to_string())
                .with_object_type("sel_group")
                .with_session(self.session().0)
        );
        Ok(())
    }

    pub(crate) fn do_member_add(
        &mut self,
        idx: usize,
        handle: GroupHandle,
        spec: MemberSpec,
        action_fn: Option<ActionFnHandle>,
        placeholders: Option<&BTreeSet<MemberHandle>>,
    ) -> SelResult<()> {
        let group = self.group_ref(idx, handle)?;
        if spec.weight == 0 {
            return Err(SelError::invalid_argument(format!("member {} with weight 0", spec.handle)));
        }
        if group.members.contains_key(&spec.handle) {
            return Err(SelError::already_exists(format!("member {} in group {}", spec.handle, handle)));
        }
        if let (Some(have), Some(want)) = (group.action_fn, action_fn) {
            if have != want && !group.members.is_empty() {
                return Err(SelError::invalid_argument(format!(
                    "action function {} differs from group {} ({})",
                    want, handle, have
                )));
            }
        }
        let reusable: u32 = placeholders.map_or(0, |p| {
            p.iter().filter_map(|h| group.members.get(h)).map(|m| m.weight).sum()
        });
        if group.placements() - reusable.min(spec.weight) + spec.weight > group.max_size {
            return Err(SelError::invalid_argument(format!(
                "group {} of max size {} cannot take {} more placements",
                handle,
                group.max_size,
                spec.weight
            )));
        }
        let max_size = group.max_size;
        self.backup_group(idx, handle);
        let opts = self.pack_options(max_size, placeholders);
        let sequence_order = self.config.sequence_order;

        let group = self.group_mut(idx, handle)?;
        if group.members.is_empty() || group.action_fn.is_none() {
            group.action_fn = action_fn;
        }
        let ranks: Vec<u32> = (group.next_rank..group.next_rank + spec.weight).collect();
        group.next_rank += spec.weight;
        let was_duplicated = group.stages.first().is_some_and(|s| s.duplicated);
        let changes = Self::add_weighted_all(group, spec.handle, spec.weight, spec.enabled, &ranks, &opts)?;
        let is_duplicated = group.stages.first().is_some_and(|s| s.duplicated);

        let mut member = Member::new(spec.handle, spec.weight, MemberState::from_enabled(spec.enabled));
        if sequence_order {
            member.positions = Some(ranks);
        }
        group.members.insert(spec.handle, member);
        if let Some(placeholders) = placeholders {
            Self::prune_placeholders(group, placeholders);
        }
        group.refresh_counts();
        let nctx = NodeCtx::of(self.instances[idx].pipe, self.group_ref(idx, handle)?);

        self.count_layout_flip(was_duplicated, is_duplicated);
        self.emit_changes(&nctx, &changes)?;
        self.stats.members_added += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::MembershipChange, "SelTable", "member_add")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(spec.handle.to_string())
                .with_object_type("sel_member")
                .with_session(self.session().0)
                .with_details(serde_json::json!({
                    "group": handle.to_string(),
                    "weight": spec.weight,
                    "enabled": spec.enabled,
                    "nodes": changes.len(),
                }))
        );
        Ok(())
    }

    /// Placeholders lose their records once an add took over all their slots.
    fn prune_placeholders(group: &mut Group, placeholders: &BTreeSet<MemberHandle>) {
        let Some(stage0) = group.stages.first() else {
            return;
        };
        let counts: Vec<(MemberHandle, u32)> = placeholders
            .iter()
            .filter(|p| group.members.contains_key(p))
            .map(|p| (*p, stage0.placement_count(*p)))
            .collect();
        for (p, count) in counts {
            if count == 0 {
                group.members.remove(&p);
            } else if let Some(member) = group.members.get_mut(&p) {
                member.weight = count;
            }
        }
    }

    pub(crate) fn do_member_del(
        &mut self,
        idx: usize,
        handle: GroupHandle,
        member: MemberHandle,
        check_refs: bool,
    ) -> SelResult<()> {
        let group = self.group_ref(idx, handle)?;
        let record = group
            .members
            .get(&member)
            .ok_or_else(|| SelError::not_found(format!("member {} in group {}", member, handle)))?;
        if check_refs && record.state.is_active() && group.num_active == 1 && group.is_referenced() {
            return Err(SelError::references_exist(format!(
                "member {} is the last active member of referenced group {}",
                member, handle
            )));
        }
        let weight = record.weight;
        let max_size = group.max_size;
        self.backup_group(idx, handle);
        let opts = self.pack_options(max_size, None);
        let nctx = self.node_ctx(idx, handle)?;

        let group = self.group_mut(idx, handle)?;
        let was_duplicated = group.stages.first().is_some_and(|s| s.duplicated);
        let changes = Self::pack_all(group, |s| {
            s.remove_weighted(member, weight, &opts).map_err(|e| e.into_sel())
        })?;
        let is_duplicated = group.stages.first().is_some_and(|s| s.duplicated);
        group.members.remove(&member);
        group.refresh_counts();

        self.count_layout_flip(was_duplicated, is_duplicated);
        self.emit_changes(&nctx, &changes)?;
        self.stats.members_removed += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::MembershipChange, "SelTable", "member_del")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(member.to_string())
                .with_object_type("sel_member")
                .with_session(self.session().0)
                .with_details(serde_json::json!({
                    "group": handle.to_string(),
                    "weight": weight,
                    "nodes": changes.len(),
                }))
        );
        Ok(())
    }

    pub(crate) fn do_member_state(
        &mut self,
        idx: usize,
        handle: GroupHandle,
        member: MemberHandle,
        enabled: bool,
        check_refs: bool,
    ) -> SelResult<()> {
        let group = self.group_ref(idx, handle)?;
        let record = group
            .members
            .get(&member)
            .ok_or_else(|| SelError::not_found(format!("member {} in group {}", member, handle)))?;
        if record.state.is_active() == enabled {
            return Ok(());
        }
        if check_refs && !enabled && group.num_active == 1 && group.is_referenced() {
            return Err(SelError::references_exist(format!(
                "member {} is the last active member of referenced group {}",
                member, handle
            )));
        }
        self.backup_group(idx, handle);
        let nctx = self.node_ctx(idx, handle)?;

        let group = self.group_mut(idx, handle)?;
        let changes = Self::pack_all(group, |s| s.set_active(member, enabled))?;
        if let Some(record) = group.members.get_mut(&member) {
            record.state = MemberState::from_enabled(enabled);
        }
        group.refresh_counts();

        self.emit_changes(&nctx, &changes)?;
        if enabled {
            self.stats.activations += 1;
        } else {
            self.stats.deactivations += 1;
        }
        Ok(())
    }

    pub(crate) fn do_members_set(
        &mut self,
        idx: usize,
        handle: GroupHandle,
        specs: &[MemberSpec],
        action_fn: Option<ActionFnHandle>,
    ) -> SelResult<()> {
        let group = self.group_ref(idx, handle)?;
        let mut seen = BTreeSet::new();
        for spec in specs {
            if spec.weight == 0 {
                return Err(SelError::invalid_argument(format!("member {} with weight 0", spec.handle)));
            }
            if !seen.insert(spec.handle) {
                return Err(SelError::invalid_argument(format!("member {} listed twice", spec.handle)));
            }
        }
        let total: u32 = specs.iter().map(|s| s.weight).sum();
        if total > group.max_size {
            return Err(SelError::invalid_argument(format!(
                "{} placements exceed group {} max size {}",
                total, handle, group.max_size
            )));
        }
        if group.is_referenced() && !specs.iter().any(|s| s.enabled) {
            return Err(SelError::references_exist(format!(
                "referenced group {} would have no active member",
                handle
            )));
        }
        let keeps_old_members = specs.iter().any(|s| group.members.contains_key(&s.handle));
        if let (Some(have), Some(want)) = (group.action_fn, action_fn) {
            if have != want && keeps_old_members {
                return Err(SelError::invalid_argument(format!(
                    "action function {} differs from group {} ({})",
                    want, handle, have
                )));
            }
        }

        let doomed: Vec<MemberHandle> = group
            .members
            .values()
            .filter(|m| !specs.iter().any(|s| s.handle == m.handle && s.weight == m.weight))
            .map(|m| m.handle)
            .collect();
        for member in doomed {
            self.do_member_del(idx, handle, member, false)?;
        }
        for spec in specs {
            if self.group_ref(idx, handle)?.members.contains_key(&spec.handle) {
                self.do_member_state(idx, handle, spec.handle, spec.enabled, false)?;
            } else {
                self.do_member_add(idx, handle, *spec, action_fn, None)?;
            }
        }
        Ok(())
    }

    /// Moves a group to a placement sized for `new_max` and re-adds its
    /// members in rank order.
    ///
    /// With `prefer_old` the old placement is released first and its base
    /// words are preferred for the new one; otherwise the new placement is
    /// reserved before the old one is released.
    pub(crate) fn do_group_resize(
        &mut self,
        idx: usize,
        handle: GroupHandle,
        new_max: u32,
        prefer_old: bool,
    ) -> SelResult<()> {
        let group = self.group_ref(idx, handle)?;
        if new_max == 0 || new_max > self.config.max_group_size {
            return Err(SelError::invalid_argument(format!(
                "group size {} outside 1..={}",
                new_max, self.config.max_group_size
            )));
        }
        if new_max < group.placements() {
            return Err(SelError::invalid_argument(format!(
                "group {} holds {} placements, cannot shrink to {}",
                handle,
                group.placements(),
                new_max
            )));
        }
        let want = word_info(new_max, self.config.word_width, self.config.min_multiword_entries)?;
        let current = group
            .word_info()
            .ok_or_else(|| SelError::unexpected(format!("group {} has no stages", handle)))?;
        let from_profile = group.stages.first().is_some_and(|s| s.placement.from_profile);
        let old_max = group.max_size;
        if current == want || (from_profile && current.fits(&want)) {
            self.backup_group(idx, handle);
            self.group_mut(idx, handle)?.max_size = new_max;
            return Ok(());
        }

        self.backup_stages(idx);
        self.backup_group(idx, handle);
        let old_nctx = self.node_ctx(idx, handle)?;
        let old_bases: Vec<u32> = old_nctx.placements.iter().map(|p| p.base_word).collect();
        let pipe = self.instances[idx].hw_pipe();
        let engine = PlacementEngine::new(self.ctx.adt.as_ref(), pipe);

        let (placements, info) = if prefer_old {
            engine.release(&mut self.instances[idx].stages, &old_nctx.placements, current, &mut self.journal)?;
            engine.reserve(
                &mut self.instances[idx].stages,
                want,
                WordRequest::Prefer(&old_bases),
                &mut self.journal,
            )?
        } else {
            let reserved =
                engine.reserve(&mut self.instances[idx].stages, want, WordRequest::FirstFit, &mut self.journal)?;
            engine.release(&mut self.instances[idx].stages, &old_nctx.placements, current, &mut self.journal)?;
            reserved
        };

        let group = self.group_mut(idx, handle)?;
        let members = group.members_in_order();
        let old_changes = Self::pack_all(group, |s| Ok(s.clear_all()))?;
        let mut stages: Vec<GroupStageInfo> =
            placements.iter().map(|p| GroupStageInfo::new(*p, info)).collect();
        stages.iter_mut().for_each(|s| s.mark_all_dirty());
        group.stages = stages;
        group.max_size = new_max;
        group.next_rank = 0;
        self.emit_changes(&old_nctx, &old_changes)?;
        self.emit_node(MoveListNode::new(MoveOp::GroupDestroy, old_nctx.pipe, handle));

        let mut node = MoveListNode::new(MoveOp::GroupCreate, old_nctx.pipe, handle);
        node.logical_index = info.no_words;
        node.logical_subindex = info.entries_per_word;
        node.per_stage_action_index = placements.iter().map(|p| p.adt_base).collect();
        self.emit_node(node);

        let opts = self.pack_options(new_max, None);
        let sequence_order = self.config.sequence_order;
        let mut new_changes = Vec::new();
        let group = self.group_mut(idx, handle)?;
        for member in members {
            let ranks: Vec<u32> = (group.next_rank..group.next_rank + member.weight).collect();
            group.next_rank += member.weight;
            let active = member.state.is_active();
            new_changes.extend(Self::add_weighted_all(group, member.handle, member.weight, active, &ranks, &opts)?);
            if let Some(record) = group.members.get_mut(&member.handle) {
                record.positions = sequence_order.then_some(ranks);
            }
        }
        let new_nctx = self.node_ctx(idx, handle)?;
        self.emit_changes(&new_nctx, &new_changes)?;
        self.stats.groups_resized += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::GroupLifecycle, "SelTable", "group_resize")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(handle.to_string())
                .with_object_type("sel_group")
                .with_session(self.session().0)
                .with_details(serde_json::json!({
                    "old_max": old_max,
                    "new_max": new_max,
                    "no_words": info.no_words,
                    "entries_per_word": info.entries_per_word,
                }))
        );
        Ok(())
    }

    pub(crate) fn do_set_fallback(&mut self, member: Option<MemberHandle>) -> SelResult<()> {
        if self.fallback == member {
            return Ok(());
        }
        self.backup_fallback();
        let pipe = if self.config.symmetric { PipeId::ALL } else { self.instances[0].pipe };
        let node = match member {
            Some(m) => {
                let mut node = MoveListNode::new(MoveOp::SetFallback, pipe, GroupHandle::NULL);
                node.member = m;
                node
            }
            None => {
                let mut node = MoveListNode::new(MoveOp::ClrFallback, pipe, GroupHandle::NULL);
                node.member = self.fallback.unwrap_or(MemberHandle::NULL);
                node
            }
        };
        self.emit_node(node);
        self.fallback = member;

        audit_log!(
            AuditRecord::new(AuditCategory::FallbackChange, "SelTable", "set_fallback")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(member.map_or_else(|| "none".to_string(), |m| m.to_string()))
                .with_object_type("sel_member")
                .with_session(self.session().0)
        );
        Ok(())
    }

    fn audit_failure(&self, category: AuditCategory, action: &str, object: String, err: &SelError) {
        let outcome = match err {
            SelError::ReferencesExist { .. } => AuditOutcome::Denied,
            _ => AuditOutcome::Failure,
        };
        audit_log!(
            AuditRecord::new(category, "SelTable", action)
                .with_object_id(object)
                .with_error(err.to_string())
                .with_outcome(outcome)
        );
    }

    // ---------------------------------------------------------------------
    // Public API
    // ---------------------------------------------------------------------

    /// Creates an empty group able to hold `max_size` placements.
    pub fn group_create(
        &mut self,
        session: Session,
        pipe: PipeId,
        group_id: u32,
        max_size: u32,
    ) -> SelResult<GroupHandle> {
        let idx = self.instance_index(pipe)?;
        if max_size == 0 || max_size > self.config.max_group_size {
            return Err(SelError::invalid_argument(format!(
                "group size {} outside 1..={}",
                max_size, self.config.max_group_size
            )));
        }
        if self.ha.is_some() {
            return self.replay_group_create(idx, group_id, max_size);
        }
        let result = self.transact(session, |t| {
            let handle = t.mint_group_handle();
            t.do_group_create(idx, handle, group_id, max_size, WordRequest::FirstFit)?;
            Ok(handle)
        });
        if let Err(e) = &result {
            self.audit_failure(AuditCategory::GroupLifecycle, "group_create", format!("group_id {}", group_id), e);
        }
        result
    }

    pub fn group_destroy(&mut self, session: Session, pipe: PipeId, group: GroupHandle) -> SelResult<()> {
        let idx = self.instance_index(pipe)?;
        if self.ha.is_some() {
            return self.replay_group_destroy(idx, group);
        }
        let result = self.transact(session, |t| t.do_group_destroy(idx, group));
        if let Err(e) = &result {
            self.audit_failure(AuditCategory::GroupLifecycle, "group_destroy", group.to_string(), e);
        }
        result
    }

    /// Adds `member` with `weight` placements.
    #[allow(clippy::too_many_arguments)]
    pub fn group_member_add(
        &mut self,
        session: Session,
        pipe: PipeId,
        group: GroupHandle,
        member: MemberHandle,
        weight: u32,
        enabled: bool,
        action_fn: ActionFnHandle,
    ) -> SelResult<()> {
        let idx = self.instance_index(pipe)?;
        let spec = MemberSpec::new(member, weight, enabled);
        if self.ha.is_some() {
            return self.replay_member_add(idx, group, spec, action_fn);
        }
        let result = self.transact(session, |t| t.do_member_add(idx, group, spec, Some(action_fn), None));
        if let Err(e) = &result {
            self.audit_failure(AuditCategory::MembershipChange, "member_add", member.to_string(), e);
        }
        result
    }

    pub fn group_member_del(
        &mut self,
        session: Session,
        pipe: PipeId,
        group: GroupHandle,
        member: MemberHandle,
    ) -> SelResult<()> {
        let idx = self.instance_index(pipe)?;
        if self.ha.is_some() {
            return self.replay_member_del(idx, group, member);
        }
        let result = self.transact(session, |t| t.do_member_del(idx, group, member, true));
        if let Err(e) = &result {
            self.audit_failure(AuditCategory::MembershipChange, "member_del", member.to_string(), e);
        }
        result
    }

    pub fn group_member_enable(
        &mut self,
        session: Session,
        pipe: PipeId,
        group: GroupHandle,
        member: MemberHandle,
    ) -> SelResult<()> {
        self.member_state(session, pipe, group, member, true)
    }

    pub fn group_member_disable(
        &mut self,
        session: Session,
        pipe: PipeId,
        group: GroupHandle,
        member: MemberHandle,
    ) -> SelResult<()> {
        self.member_state(session, pipe, group, member, false)
    }

    fn member_state(
        &mut self,
        session: Session,
        pipe: PipeId,
        group: GroupHandle,
        member: MemberHandle,
        enabled: bool,
    ) -> SelResult<()> {
        let idx = self.instance_index(pipe)?;
        if self.ha.is_some() {
            return self.replay_member_state(idx, group, member, enabled);
        }
        let result = self.transact(session, |t| t.do_member_state(idx, group, member, enabled, true));
        if let Err(e) = &result {
            let action = if enabled { "member_enable" } else { "member_disable" };
            self.audit_failure(AuditCategory::MembershipChange, action, member.to_string(), e);
        }
        result
    }

    /// Replaces the membership with `members`, in list order.
    pub fn group_members_set(
        &mut self,
        session: Session,
        pipe: PipeId,
        group: GroupHandle,
        members: &[MemberSpec],
        action_fn: ActionFnHandle,
    ) -> SelResult<()> {
        let idx = self.instance_index(pipe)?;
        if self.ha.is_some() {
            return self.replay_members_set(idx, group, members, action_fn);
        }
        let result = self.transact(session, |t| t.do_members_set(idx, group, members, Some(action_fn)));
        if let Err(e) = &result {
            self.audit_failure(AuditCategory::MembershipChange, "members_set", group.to_string(), e);
        }
        result
    }

    pub fn group_resize(
        &mut self,
        session: Session,
        pipe: PipeId,
        group: GroupHandle,
        new_max: u32,
    ) -> SelResult<()> {
        let idx = self.instance_index(pipe)?;
        if self.ha.is_some() {
            return self.replay_group_resize(idx, group, new_max);
        }
        let result = self.transact(session, |t| t.do_group_resize(idx, group, new_max, false));
        if let Err(e) = &result {
            self.audit_failure(AuditCategory::GroupLifecycle, "group_resize", group.to_string(), e);
        }
        result
    }

    pub fn set_fallback(&mut self, session: Session, member: MemberHandle) -> SelResult<()> {
        if self.ha.is_some() {
            return self.replay_fallback(Some(member));
        }
        self.transact(session, |t| t.do_set_fallback(Some(member)))
    }

    pub fn clear_fallback(&mut self, session: Session) -> SelResult<()> {
        if self.ha.is_some() {
            return self.replay_fallback(None);
        }
        self.transact(session, |t| t.do_set_fallback(None))
    }

    /// Records that a match entry points at `group`. The group must have an
    /// active member.
    pub fn group_attach_ref(
        &mut self,
        pipe: PipeId,
        group: GroupHandle,
        table: MatchTableHandle,
        entry: MatchEntryHandle,
    ) -> SelResult<()> {
        let idx = self.instance_index(pipe)?;
        if self.ha.is_some() {
            return self.replay_reference(idx, group, table, entry, true);
        }
        let g = self.group_mut(idx, group)?;
        if g.num_active == 0 {
            return Err(SelError::invalid_argument(format!(
                "group {} has no active member to reference",
                group
            )));
        }
        if !g.references.insert((table, entry)) {
            return Err(SelError::already_exists(format!("reference {}/{} on group {}", table, entry, group)));
        }
        let count = g.references.len();
        audit_log!(
            AuditRecord::new(AuditCategory::ReferenceChange, "SelTable", "attach_ref")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(group.to_string())
                .with_object_type("sel_group")
                .with_details(serde_json::json!({ "references": count }))
        );
        Ok(())
    }

    pub fn group_detach_ref(
        &mut self,
        pipe: PipeId,
        group: GroupHandle,
        table: MatchTableHandle,
        entry: MatchEntryHandle,
    ) -> SelResult<()> {
        let idx = self.instance_index(pipe)?;
        if self.ha.is_some() {
            return self.replay_reference(idx, group, table, entry, false);
        }
        let g = self.group_mut(idx, group)?;
        if !g.references.remove(&(table, entry)) {
            return Err(SelError::not_found(format!("reference {}/{} on group {}", table, entry, group)));
        }
        let count = g.references.len();
        audit_log!(
            AuditRecord::new(AuditCategory::ReferenceChange, "SelTable", "detach_ref")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(group.to_string())
                .with_object_type("sel_group")
                .with_details(serde_json::json!({ "references": count }))
        );
        Ok(())
    }

    /// Software lookup of the member the hardware picks for `hash`.
    pub fn resolve_member(&self, pipe: PipeId, group: GroupHandle, hash: SelHash) -> SelResult<MemberHandle> {
        let idx = self.instance_index(pipe)?;
        let g = self.group_ref(idx, group)?;
        let stage0 = g
            .stages
            .first()
            .ok_or_else(|| SelError::unexpected(format!("group {} has no stages", group)))?;
        let params = HashParams {
            mode: self.config.mode,
            scramble: self.config.scramble_enable,
        };
        resolve(stage0, hash, params)
    }

    /// Checks the layout and bookkeeping invariants of one group.
    pub fn verify_group(&self, pipe: PipeId, group: GroupHandle) -> SelResult<()> {
        let idx = self.instance_index(pipe)?;
        let g = self.group_ref(idx, group)?;
        let balanced = !self.config.sequence_order;
        let stage0 = g
            .stages
            .first()
            .ok_or_else(|| SelError::unexpected(format!("group {} has no stages", group)))?;
        for stage in &g.stages {
            stage.verify(balanced)?;
        }
        let identical = g
            .stages
            .iter()
            .map(|s| (&s.words, &s.locator, s.duplicated))
            .all_equal();
        if !identical {
            return Err(SelError::unexpected(format!("group {}: stage layouts differ", group)));
        }
        if stage0.info.capacity() < g.max_size {
            return Err(SelError::unexpected(format!(
                "group {}: capacity {} below max size {}",
                group,
                stage0.info.capacity(),
                g.max_size
            )));
        }
        if g.placements() > g.max_size || stage0.count() != g.placements() {
            return Err(SelError::unexpected(format!(
                "group {}: {} placements laid out, {} recorded, max {}",
                group,
                stage0.count(),
                g.placements(),
                g.max_size
            )));
        }
        for member in g.members.values() {
            if stage0.placement_count(member.handle) != member.weight {
                return Err(SelError::unexpected(format!(
                    "group {}: member {} weight {} but {} placements",
                    group,
                    member.handle,
                    member.weight,
                    stage0.placement_count(member.handle)
                )));
            }
            let active = member.state.is_active();
            let consistent = stage0
                .locations(member.handle)
                .iter()
                .all(|l| stage0.words[l.word as usize].is_active(l.slot) == active);
            if !consistent {
                return Err(SelError::unexpected(format!(
                    "group {}: member {} slots disagree with state {}",
                    group, member.handle, member.state
                )));
            }
        }
        if stage0.locator.keys().any(|m| !g.members.contains_key(m)) {
            return Err(SelError::unexpected(format!("group {}: unknown member in layout", group)));
        }
        if g.is_referenced() && g.num_active == 0 {
            return Err(SelError::unexpected(format!(
                "referenced group {} has no active member",
                group
            )));
        }
        Ok(())
    }
}
