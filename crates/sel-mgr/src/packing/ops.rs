//! Member add / remove / activation and the duplicated <-> spread layout
//! transitions.

use super::types::{GroupStageInfo, Location, SlotChange, SlotOp};
use super::{PackError, PackOptions};
use crate::debug_log;
use pipe_sel_types::{MemberHandle, SelError, SelResult};

impl GroupStageInfo {
    /// Adds one placement of `member`.
    ///
    /// `rank` is the member's insertion rank, only consulted in
    /// sequence-order spread placement.
    pub fn add_placement(
        &mut self,
        member: MemberHandle,
        active: bool,
        rank: u32,
        opts: &PackOptions<'_>,
    ) -> SelResult<Vec<SlotChange>> {
        let mut changes = Vec::new();

        if let Some(loc) = self.lowest_placeholder(opts) {
            debug_log!("SelPacking", member = %member, at = %loc, "reusing placeholder slot");
            if self.duplicated {
                for w in 0..self.no_words() {
                    self.put(member, Location::new(w, loc.slot), active, &mut changes);
                }
            } else {
                self.put(member, loc, active, &mut changes);
            }
            return Ok(changes);
        }

        let count = self.count();
        if count >= self.info.capacity() {
            return Err(SelError::no_space(format!(
                "group full at {} placements in {}",
                count, self.placement.stage
            )));
        }

        if self.duplicated {
            if count < self.epw() {
                let slot = self.words[0].usage;
                for w in 0..self.no_words() {
                    self.put(member, Location::new(w, slot), active, &mut changes);
                }
                return Ok(changes);
            }
            self.spread_into(&mut changes);
        }

        let word = self.pick_add_word(rank, opts)?;
        let slot = self.words[word as usize].usage;
        self.put(member, Location::new(word, slot), active, &mut changes);
        Ok(changes)
    }

    /// Removes one placement of `member`, the one at its highest offset.
    ///
    /// The hole is filled from the last slot of the most loaded word (or of
    /// the same word in sequence order), so occupied slots stay contiguous.
    pub fn remove_placement(
        &mut self,
        member: MemberHandle,
        opts: &PackOptions<'_>,
    ) -> SelResult<Vec<SlotChange>> {
        let highest = self
            .locator
            .get(&member)
            .and_then(|offs| offs.last().copied())
            .ok_or_else(|| SelError::not_found(format!("{} in {}", member, self.placement.stage)))?;
        let mut changes = Vec::new();

        if self.duplicated {
            let slot = self
                .locations(member)
                .into_iter()
                .filter(|l| l.word == 0)
                .map(|l| l.slot)
                .max()
                .ok_or_else(|| SelError::unexpected(format!("{} missing from word 0", member)))?;
            let last = self.words[0].usage - 1;
            if slot != last {
                let filler = self.occupant(Location::new(0, last))?;
                let filler_active = self.words[0].is_active(last);
                for w in 0..self.no_words() {
                    self.put(filler, Location::new(w, slot), filler_active, &mut changes);
                }
            }
            for w in 0..self.no_words() {
                self.clear(Location::new(w, last), &mut changes);
            }
            return Ok(changes);
        }

        let loc = Location::from_offset(highest, self.epw());
        let source_word = if opts.sequence_order {
            loc.word
        } else {
            let max = self.words.iter().map(|w| w.usage).max().unwrap_or(0);
            if self.words[loc.word as usize].usage == max {
                loc.word
            } else {
                self.words.iter().position(|w| w.usage == max).unwrap_or(0) as u32
            }
        };
        let source = Location::new(source_word, self.words[source_word as usize].usage - 1);
        if source != loc {
            let filler = self.occupant(source)?;
            let filler_active = self.words[source.word as usize].is_active(source.slot);
            self.put(filler, loc, filler_active, &mut changes);
            self.clear(source, &mut changes);
        } else {
            self.clear(loc, &mut changes);
        }

        if self.no_words() > 1 && self.count() < self.epw() {
            self.converge_into(&mut changes);
        }
        Ok(changes)
    }

    /// Adds `weight` placements. A failure reports how many were applied.
    pub fn add_weighted(
        &mut self,
        member: MemberHandle,
        weight: u32,
        active: bool,
        ranks: &[u32],
        opts: &PackOptions<'_>,
    ) -> Result<Vec<SlotChange>, PackError> {
        let mut changes = Vec::new();
        for i in 0..weight {
            let rank = ranks.get(i as usize).copied().unwrap_or(0);
            match self.add_placement(member, active, rank, opts) {
                Ok(c) => changes.extend(c),
                Err(source) => return Err(PackError::Partial { applied: i, source }),
            }
        }
        Ok(changes)
    }

    /// Removes `weight` placements. A failure reports how many were applied.
    pub fn remove_weighted(
        &mut self,
        member: MemberHandle,
        weight: u32,
        opts: &PackOptions<'_>,
    ) -> Result<Vec<SlotChange>, PackError> {
        let mut changes = Vec::new();
        for i in 0..weight {
            match self.remove_placement(member, opts) {
                Ok(c) => changes.extend(c),
                Err(source) => return Err(PackError::Partial { applied: i, source }),
            }
        }
        Ok(changes)
    }

    /// Flips the active bit of every slot `member` holds. Never moves it.
    pub fn set_active(&mut self, member: MemberHandle, active: bool) -> SelResult<Vec<SlotChange>> {
        let locations = self.locations(member);
        if locations.is_empty() {
            return Err(SelError::not_found(format!("{} in {}", member, self.placement.stage)));
        }
        let op = if active { SlotOp::Activate } else { SlotOp::Deactivate };
        let mut changes = Vec::new();
        for loc in locations {
            let word = &mut self.words[loc.word as usize];
            if word.active[loc.slot as usize] == active {
                continue;
            }
            word.active[loc.slot as usize] = active;
            self.dirty.insert(loc.word);
            changes.push(SlotChange { op, member, location: loc, active, replace: false });
        }
        Ok(changes)
    }

    /// Switches a duplicated multi-word group to the spread layout.
    /// No-op when already spread or single-word.
    pub fn spread(&mut self) -> Vec<SlotChange> {
        let mut changes = Vec::new();
        self.spread_into(&mut changes);
        changes
    }

    /// Switches a spread group back to the duplicated layout. No-op when
    /// already duplicated.
    pub fn converge(&mut self) -> SelResult<Vec<SlotChange>> {
        if !self.duplicated && self.count() > self.epw() {
            return Err(SelError::invalid_argument(format!(
                "{} placements do not fit one word of {}",
                self.count(),
                self.epw()
            )));
        }
        let mut changes = Vec::new();
        self.converge_into(&mut changes);
        Ok(changes)
    }

    /// Empties every slot, highest offset first, and resets to the
    /// duplicated layout.
    pub fn clear_all(&mut self) -> Vec<SlotChange> {
        let mut changes = Vec::new();
        for w in (0..self.no_words()).rev() {
            for s in (0..self.words[w as usize].usage).rev() {
                self.clear(Location::new(w, s), &mut changes);
            }
        }
        self.duplicated = true;
        changes
    }

    fn occupant(&self, loc: Location) -> SelResult<MemberHandle> {
        self.member_at(loc)
            .ok_or_else(|| SelError::unexpected(format!("empty slot {} inside usage", loc)))
    }

    fn lowest_placeholder(&self, opts: &PackOptions<'_>) -> Option<Location> {
        let placeholders = opts.placeholders?;
        placeholders
            .iter()
            .filter_map(|p| self.locator.get(p).and_then(|offs| offs.first().copied()))
            .min()
            .map(|off| Location::from_offset(off, self.epw()))
    }

    fn pick_add_word(&self, rank: u32, opts: &PackOptions<'_>) -> SelResult<u32> {
        let n = self.no_words();
        let picked = if opts.sequence_order {
            let per_word = opts.total_expected.div_ceil(n).max(1);
            let start = (rank / per_word).min(n - 1);
            (0..n)
                .map(|i| (start + i) % n)
                .find(|w| !self.words[*w as usize].is_full())
        } else {
            self.words
                .iter()
                .enumerate()
                .filter(|(_, w)| !w.is_full())
                .min_by_key(|(i, w)| (w.usage, *i))
                .map(|(i, _)| i as u32)
        };
        picked.ok_or_else(|| SelError::no_space(format!("all words full in {}", self.placement.stage)))
    }

    fn spread_into(&mut self, changes: &mut Vec<SlotChange>) {
        let n = self.no_words();
        if !self.duplicated || n == 1 {
            return;
        }
        let count = self.words[0].usage;
        let per = count / n;
        let rem = count % n;
        let source: Vec<(Option<MemberHandle>, bool)> = (0..count)
            .map(|s| (self.words[0].member_at(s), self.words[0].is_active(s)))
            .collect();
        self.duplicated = false;

        let mut next = per as usize;
        for w in 1..n {
            let keep = per + u32::from(w <= rem);
            for slot in 0..keep {
                if let (Some(m), active) = source[next] {
                    self.put(m, Location::new(w, slot), active, changes);
                }
                next += 1;
            }
            for slot in (keep..count).rev() {
                self.clear(Location::new(w, slot), changes);
            }
        }
        for slot in (per..count).rev() {
            self.clear(Location::new(0, slot), changes);
        }
        debug_log!("SelPacking", stage = %self.placement.stage, usage = ?self.usage(), "spread");
    }

    fn converge_into(&mut self, changes: &mut Vec<SlotChange>) {
        if self.duplicated {
            return;
        }
        let n = self.no_words();
        let mut slot = self.words[0].usage;
        for w in 1..n {
            let moving: Vec<(Option<MemberHandle>, bool)> = (0..self.words[w as usize].usage)
                .map(|s| (self.words[w as usize].member_at(s), self.words[w as usize].is_active(s)))
                .collect();
            for (m, active) in moving {
                if let Some(m) = m {
                    self.put(m, Location::new(0, slot), active, changes);
                }
                slot += 1;
            }
        }
        let count = self.words[0].usage;
        for w in 1..n {
            for s in 0..count {
                if let Some(m) = self.words[0].member_at(s) {
                    let active = self.words[0].is_active(s);
                    self.put(m, Location::new(w, s), active, changes);
                }
            }
        }
        self.duplicated = true;
        debug_log!("SelPacking", stage = %self.placement.stage, count, "converge");
    }
}
