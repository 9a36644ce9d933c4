//! Lockstep word / action-table reservation.

use super::stage::StageInfo;
use super::types::{AdtRange, StagePlacement, WordInfo};
use crate::context::ActionTableAllocator;
use crate::{debug_log, warn_log};
use pipe_sel_types::{PipeId, SelError, SelResult};

/// How the word range of a new placement is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordRequest<'a> {
    /// First free block in every stage.
    FirstFit,
    /// Exactly these per-stage bases (HA replay); a collision is an error.
    Exact(&'a [u32]),
    /// These bases when free, first fit otherwise.
    Prefer(&'a [u32]),
}

/// Action data table ranges touched by one transaction.
///
/// Reservations are released again if the transaction rolls back; releases
/// are held back until it commits, so a rollback never has to re-acquire a
/// range another table may have taken in the meantime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdtJournal {
    pub reserved: Vec<AdtRange>,
    pub pending_release: Vec<AdtRange>,
}

impl AdtJournal {
    pub fn is_empty(&self) -> bool {
        self.reserved.is_empty() && self.pending_release.is_empty()
    }

    pub fn commit(&mut self, adt: &dyn ActionTableAllocator) {
        for range in self.pending_release.drain(..) {
            if let Err(e) = adt.release(range.pipe, range.stage, range.base, range.count) {
                warn_log!("SelPlacement", error = %e, base = range.base, "ADT release failed");
            }
        }
        self.reserved.clear();
    }

    pub fn rollback(&mut self, adt: &dyn ActionTableAllocator) {
        for range in self.reserved.drain(..).rev() {
            if let Err(e) = adt.release(range.pipe, range.stage, range.base, range.count) {
                warn_log!("SelPlacement", error = %e, base = range.base, "ADT rollback release failed");
            }
        }
        self.pending_release.clear();
    }
}

/// Reserves and releases group placements for one pipe of a table.
pub struct PlacementEngine<'a> {
    adt: &'a dyn ActionTableAllocator,
    pipe: PipeId,
}

impl<'a> PlacementEngine<'a> {
    pub fn new(adt: &'a dyn ActionTableAllocator, pipe: PipeId) -> Self {
        Self { adt, pipe }
    }

    fn reserve_stage(
        &self,
        stage_idx: usize,
        stage: &mut StageInfo,
        info: &WordInfo,
        base: Option<u32>,
    ) -> SelResult<(StagePlacement, WordInfo)> {
        if stage.has_profile() {
            let slot = stage.take_profile_slot(info, base).ok_or_else(|| {
                SelError::no_space(format!(
                    "{}: no free profile slot for {}x{}",
                    stage.stage_id, info.no_words, info.entries_per_word
                ))
            })?;
            let placement = StagePlacement {
                stage: stage.stage_id,
                stage_idx,
                base_word: slot.base_word,
                adt_base: slot.adt_base,
                from_profile: true,
            };
            return Ok((placement, slot.info));
        }

        let adt_base = self.adt.reserve(self.pipe, stage.stage_id, info.capacity())?;
        let word_result = match base {
            Some(b) => stage.allocator.alloc_at(b, info.no_words).map(|_| b),
            None => stage.allocator.alloc(info.no_words),
        };
        match word_result {
            Ok(base_word) => Ok((
                StagePlacement {
                    stage: stage.stage_id,
                    stage_idx,
                    base_word,
                    adt_base,
                    from_profile: false,
                },
                *info,
            )),
            Err(e) => {
                if let Err(rel) = self.adt.release(self.pipe, stage.stage_id, adt_base, info.capacity()) {
                    warn_log!("SelPlacement", error = %rel, "ADT release after word failure failed");
                }
                Err(e)
            }
        }
    }

    fn unreserve_stage(&self, stage: &mut StageInfo, placement: &StagePlacement, info: &WordInfo) {
        if placement.from_profile {
            stage.return_profile_slot(placement.base_word);
            return;
        }
        if let Err(e) = stage.allocator.free(placement.base_word, info.no_words) {
            warn_log!("SelPlacement", error = %e, "word unwind failed");
        }
        if let Err(e) = self.adt.release(self.pipe, stage.stage_id, placement.adt_base, info.capacity()) {
            warn_log!("SelPlacement", error = %e, "ADT unwind failed");
        }
    }

    /// Reserves a placement for `info` in every stage.
    ///
    /// Returns the per-stage placements and the word info actually granted,
    /// which differs from `info` only when a larger profile slot was used.
    /// On failure nothing stays reserved.
    pub fn reserve(
        &self,
        stages: &mut [StageInfo],
        info: WordInfo,
        request: WordRequest<'_>,
        journal: &mut AdtJournal,
    ) -> SelResult<(Vec<StagePlacement>, WordInfo)> {
        let explicit = match request {
            WordRequest::FirstFit => None,
            WordRequest::Exact(b) | WordRequest::Prefer(b) => {
                if b.len() != stages.len() {
                    return Err(SelError::invalid_argument(format!(
                        "{} explicit bases for {} stages",
                        b.len(),
                        stages.len()
                    )));
                }
                Some(b)
            }
        };

        let mut placements: Vec<StagePlacement> = Vec::with_capacity(stages.len());
        let mut granted: Option<WordInfo> = None;
        let mut failure = None;

        for (idx, stage) in stages.iter_mut().enumerate() {
            let want = granted.unwrap_or(info);
            let base = explicit.map(|b| b[idx]);
            let mut result = self.reserve_stage(idx, stage, &want, base);
            if let (Err(_), WordRequest::Prefer(_)) = (&result, request) {
                debug_log!("SelPlacement", stage = %stage.stage_id, "preferred base taken, using first fit");
                result = self.reserve_stage(idx, stage, &want, None);
            }
            match result {
                Ok((placement, got)) => {
                    if granted.is_some_and(|g| g != got) {
                        self.unreserve_stage(stage, &placement, &got);
                        failure = Some(SelError::unexpected(format!(
                            "{}: profile slot shape differs from stage 0",
                            stage.stage_id
                        )));
                        break;
                    }
                    granted = Some(got);
                    placements.push(placement);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let granted = granted.unwrap_or(info);
        if let Some(err) = failure {
            for placement in placements.iter().rev() {
                self.unreserve_stage(&mut stages[placement.stage_idx], placement, &granted);
            }
            return Err(err);
        }

        for placement in placements.iter().filter(|p| !p.from_profile) {
            journal.reserved.push(AdtRange {
                pipe: self.pipe,
                stage: placement.stage,
                base: placement.adt_base,
                count: granted.capacity(),
            });
        }
        Ok((placements, granted))
    }

    /// Releases a placement. Words are freed at once, the action table range
    /// when the journal commits.
    pub fn release(
        &self,
        stages: &mut [StageInfo],
        placements: &[StagePlacement],
        info: WordInfo,
        journal: &mut AdtJournal,
    ) -> SelResult<()> {
        for placement in placements {
            let stage = stages.get_mut(placement.stage_idx).ok_or_else(|| {
                SelError::unexpected(format!("stage index {} out of range", placement.stage_idx))
            })?;
            if placement.from_profile {
                stage.return_profile_slot(placement.base_word).ok_or_else(|| {
                    SelError::unexpected(format!(
                        "{}: profile slot {} not in use",
                        stage.stage_id, placement.base_word
                    ))
                })?;
                continue;
            }
            stage.allocator.free(placement.base_word, info.no_words)?;
            journal.pending_release.push(AdtRange {
                pipe: self.pipe,
                stage: placement.stage,
                base: placement.adt_base,
                count: info.capacity(),
            });
        }
        Ok(())
    }

    /// Marks a decoded placement as taken without touching the action table,
    /// whose own restart restores its entries.
    pub fn claim_decoded(
        &self,
        stages: &mut [StageInfo],
        placements: &[StagePlacement],
        info: WordInfo,
    ) -> SelResult<()> {
        for (done, placement) in placements.iter().enumerate() {
            let stage = &mut stages[placement.stage_idx];
            let claimed = if stage.has_profile() {
                stage
                    .take_profile_slot(&info, Some(placement.base_word))
                    .map(|_| ())
                    .ok_or_else(|| {
                        SelError::already_exists(format!(
                            "{}: profile slot {}",
                            stage.stage_id, placement.base_word
                        ))
                    })
            } else {
                stage.allocator.alloc_at(placement.base_word, info.no_words)
            };
            if let Err(e) = claimed {
                for prev in placements[..done].iter().rev() {
                    let stage = &mut stages[prev.stage_idx];
                    if stage.has_profile() {
                        stage.return_profile_slot(prev.base_word);
                    } else if let Err(e) = stage.allocator.free(prev.base_word, info.no_words) {
                        warn_log!("SelPlacement", error = %e, "decoded claim unwind failed");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }
}
