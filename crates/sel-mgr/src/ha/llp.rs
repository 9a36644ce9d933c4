//! Hardware-facing half of a restart.
//!
//! Rebuilds groups from the selector words in shadow memory. Members are
//! identified by the action data behind each slot and get temporary
//! handles; the group gets a temporary handle keyed by its stage-0 word
//! base. Any inconsistency aborts the whole restart pass.

use super::types::{DecodeState, DecodedGroup, SelectorPointer};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::context::{ActionData, MemAddr};
use crate::packing::{GroupStageInfo, Location};
use crate::placement::{PlacementEngine, StagePlacement, WordInfo};
use crate::table::hw::decode_word;
use crate::table::{Group, Member, MemberState, SelectorTable};
use crate::{audit_log, error_log, info_log};
use pipe_sel_types::{GroupHandle, MemberHandle, PipeId, SelError, SelResult};
use std::collections::BTreeMap;

/// One decoded stage: layout plus the action data seen in every slot.
struct DecodedStage {
    gsi: GroupStageInfo,
    data: BTreeMap<Location, (ActionData, bool)>,
}

impl SelectorTable {
    /// Rebuilds the group a decoded match entry points at.
    ///
    /// Repeated calls for the same stage-0 base return the handle minted the
    /// first time. An error aborts the restart.
    pub fn llp_decode_group(&mut self, pipe: PipeId, pointer: &SelectorPointer) -> SelResult<GroupHandle> {
        let result = self.decode_group(pipe, pointer);
        if let Err(e) = &result {
            error_log!("SelHaLlp", pipe = %pipe, error = %e, "group decode failed, aborting restart");
            audit_log!(
                AuditRecord::new(AuditCategory::WarmRestart, "SelHaLlp", "decode_group")
                    .with_object_id(format!("{:?}", pointer.base()))
                    .with_object_type("sel_group")
                    .with_error(e.to_string())
            );
            self.ha_abort();
        }
        result
    }

    /// Records the fallback member data found in hardware.
    pub fn llp_decode_fallback(&mut self, pipe: PipeId, data: ActionData) -> SelResult<()> {
        self.instance_index(pipe)?;
        let ha = self
            .ha
            .as_mut()
            .ok_or_else(|| SelError::invalid_argument("table is not restarting"))?;
        ha.decoded_fallback = Some(data);
        Ok(())
    }

    fn decode_group(&mut self, pipe: PipeId, pointer: &SelectorPointer) -> SelResult<GroupHandle> {
        let idx = self.instance_index(pipe)?;
        let ha = self
            .ha
            .as_ref()
            .ok_or_else(|| SelError::invalid_argument("table is not restarting"))?;
        let base = pointer
            .base()
            .ok_or_else(|| SelError::invalid_argument("selector pointer without stages"))?;
        if let Some(known) = ha.decoded.get(&(idx, base)) {
            return Ok(known.handle);
        }
        let stage_count = self.instances[idx].stages.len();
        if pointer.stages.len() != stage_count {
            return Err(SelError::unexpected(format!(
                "selector pointer has {} stages, table has {}",
                pointer.stages.len(),
                stage_count
            )));
        }
        if pointer.no_words == 0 || !pointer.no_words.is_power_of_two() {
            return Err(SelError::unexpected(format!("decoded word count {}", pointer.no_words)));
        }

        let mut stages = Vec::with_capacity(stage_count);
        for stage_idx in 0..stage_count {
            stages.push(self.decode_stage(idx, stage_idx, pointer)?);
        }

        // Stage 0 names the members; every other stage must agree with it.
        let first = &stages[0];
        for other in &stages[1..] {
            let same_shape = other.gsi.info == first.gsi.info && other.gsi.duplicated == first.gsi.duplicated;
            let same_slots = other.data.len() == first.data.len()
                && other.data.iter().all(|(loc, v)| first.data.get(loc) == Some(v));
            if !same_shape || !same_slots {
                return Err(SelError::unexpected(format!(
                    "{} disagrees with stage 0 at base {}",
                    other.gsi.placement.stage, base
                )));
            }
        }

        let ha = self
            .ha
            .as_mut()
            .ok_or_else(|| SelError::invalid_argument("table is not restarting"))?;
        let mut names: BTreeMap<ActionData, MemberHandle> = BTreeMap::new();
        for (data, _) in stages[0].data.values() {
            if !names.contains_key(data) {
                names.insert(data.clone(), ha.mint_member(data.clone()));
            }
        }

        let mut layouts = Vec::with_capacity(stage_count);
        for stage in stages {
            let mut gsi = stage.gsi;
            let mut scratch = Vec::new();
            for (loc, (data, active)) in &stage.data {
                let member = names
                    .get(data)
                    .copied()
                    .ok_or_else(|| SelError::unexpected("decoded data without a member"))?;
                gsi.put(member, *loc, *active, &mut scratch);
            }
            gsi.dirty.clear();
            gsi.verify(false)?;
            layouts.push(gsi);
        }

        let stage0 = &layouts[0];
        let mut members = BTreeMap::new();
        for member in names.values() {
            let locations = stage0.locations(*member);
            let active = locations
                .first()
                .is_some_and(|l| stage0.words[l.word as usize].is_active(l.slot));
            if locations.iter().any(|l| stage0.words[l.word as usize].is_active(l.slot) != active) {
                return Err(SelError::unexpected(format!(
                    "decoded member {} has mixed slot states",
                    member
                )));
            }
            members.insert(
                *member,
                Member::new(*member, stage0.placement_count(*member), MemberState::from_enabled(active)),
            );
        }

        let info = stage0.info;
        let placements: Vec<StagePlacement> = layouts.iter().map(|s| s.placement).collect();
        let pipe_hw = self.instances[idx].hw_pipe();
        let engine = PlacementEngine::new(self.ctx.adt.as_ref(), pipe_hw);
        engine.claim_decoded(&mut self.instances[idx].stages, &placements, info)?;

        let ha = self
            .ha
            .as_mut()
            .ok_or_else(|| SelError::invalid_argument("table is not restarting"))?;
        let handle = ha.mint_group();
        let mut group = Group::new(handle, 0, info.capacity(), layouts);
        group.members = members;
        group.next_rank = group.placements();
        group.refresh_counts();
        let num_members = group.num_members;
        let num_active = group.num_active;
        ha.decoded.insert(
            (idx, base),
            DecodedGroup {
                handle,
                pointer: pointer.clone(),
                state: DecodeState::DecodedOnly,
            },
        );
        self.instances[idx].groups.insert(handle, group);
        self.stats.ha_groups_decoded += 1;

        info_log!(
            "SelHaLlp",
            group = %handle,
            base,
            members = num_members,
            active = num_active,
            "group decoded"
        );
        audit_log!(
            AuditRecord::new(AuditCategory::WarmRestart, "SelHaLlp", "decode_group")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(handle.to_string())
                .with_object_type("sel_group")
                .with_details(serde_json::json!({
                    "base": base,
                    "no_words": info.no_words,
                    "entries_per_word": info.entries_per_word,
                    "members": num_members,
                }))
        );
        Ok(handle)
    }

    fn decode_stage(&self, idx: usize, stage_idx: usize, pointer: &SelectorPointer) -> SelResult<DecodedStage> {
        let inst = &self.instances[idx];
        let stage = &inst.stages[stage_idx];
        let ptr = pointer.stages[stage_idx];
        let pipe = inst.hw_pipe();
        let mode = self.config.mode;
        let width = self.config.word_width;

        let mut images = Vec::with_capacity(pointer.no_words as usize);
        for w in 0..pointer.no_words {
            let addr = MemAddr::selector_word(self.config.table_handle, ptr.word_base + w);
            let raw = self.ctx.shadow.read_ref(pipe, stage.stage_id, addr)?.ok_or_else(|| {
                SelError::unexpected(format!("{} word {} was never written", stage.stage_id, addr.line))
            })?;
            images.push(decode_word(&raw, mode, width)?);
        }
        let epw = images[0].entries_per_word;
        let duplicated = images[0].duplicated;
        if images.iter().any(|i| i.entries_per_word != epw || i.duplicated != duplicated) {
            return Err(SelError::unexpected(format!(
                "{}: words at base {} disagree on layout",
                stage.stage_id, ptr.word_base
            )));
        }

        let info = WordInfo {
            no_words: pointer.no_words,
            entries_per_word: epw,
        };
        let placement = StagePlacement {
            stage: stage.stage_id,
            stage_idx,
            base_word: ptr.word_base,
            adt_base: ptr.adt_base,
            from_profile: stage.has_profile(),
        };
        let mut gsi = GroupStageInfo::new(placement, info);
        gsi.duplicated = duplicated;

        let mut data = BTreeMap::new();
        for (w, image) in images.iter().enumerate() {
            for s in 0..image.usage {
                let index = placement.action_index(epw, w as u32, s);
                let entry = self.ctx.adt.lookup(pipe, stage.stage_id, index).ok_or_else(|| {
                    SelError::unexpected(format!("{}: no action data at index {}", stage.stage_id, index))
                })?;
                data.insert(Location::new(w as u32, s), (entry, image.active[s as usize]));
            }
        }
        Ok(DecodedStage { gsi, data })
    }
}
