//! Per-stage group layout.

use crate::config::SelectionMode;
use crate::placement::{StagePlacement, WordInfo};
use pipe_sel_types::{MemberHandle, SelError, SelResult};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Member slots of one selector RAM word.
///
/// Occupied slots are always `0..usage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordData {
    pub slots: Vec<Option<MemberHandle>>,
    pub active: Vec<bool>,
    pub usage: u32,
}

impl WordData {
    pub fn new(entries_per_word: u32) -> Self {
        Self {
            slots: vec![None; entries_per_word as usize],
            active: vec![false; entries_per_word as usize],
            usage: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn is_full(&self) -> bool {
        self.usage >= self.capacity()
    }

    pub fn member_at(&self, slot: u32) -> Option<MemberHandle> {
        self.slots.get(slot as usize).copied().flatten()
    }

    pub fn is_active(&self, slot: u32) -> bool {
        self.active.get(slot as usize).copied().unwrap_or(false)
    }

    pub fn active_count(&self) -> u32 {
        self.active.iter().filter(|a| **a).count() as u32
    }

    pub fn highest_active(&self) -> Option<u32> {
        self.active.iter().rposition(|a| *a).map(|p| p as u32)
    }

    /// Value the hardware keeps next to the word: the active count in fair
    /// mode, one past the highest active slot in resilient mode.
    pub fn hw_value(&self, mode: SelectionMode) -> u32 {
        match mode {
            SelectionMode::Fair => self.active_count(),
            SelectionMode::Resilient => self.highest_active().map_or(0, |h| h + 1),
        }
    }
}

/// A word/slot coordinate inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub word: u32,
    pub slot: u32,
}

impl Location {
    pub fn new(word: u32, slot: u32) -> Self {
        Self { word, slot }
    }

    pub fn offset(&self, entries_per_word: u32) -> u32 {
        self.word * entries_per_word + self.slot
    }

    pub fn from_offset(offset: u32, entries_per_word: u32) -> Self {
        Self {
            word: offset / entries_per_word,
            slot: offset % entries_per_word,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.word, self.slot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotOp {
    Add,
    Del,
    Activate,
    Deactivate,
}

/// One slot-level mutation produced by the packing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotChange {
    pub op: SlotOp,
    pub member: MemberHandle,
    pub location: Location,
    /// Active state written with an `Add`.
    pub active: bool,
    /// The slot held another member, deleted just before.
    pub replace: bool,
}

impl SlotChange {
    pub fn add(member: MemberHandle, location: Location, active: bool, replace: bool) -> Self {
        Self { op: SlotOp::Add, member, location, active, replace }
    }

    pub fn del(member: MemberHandle, location: Location) -> Self {
        Self { op: SlotOp::Del, member, location, active: false, replace: false }
    }

    /// Adds and deletes change membership; activation only flips a bit.
    pub fn is_placement(&self) -> bool {
        matches!(self.op, SlotOp::Add | SlotOp::Del)
    }
}

/// Layout of one group in one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStageInfo {
    pub placement: StagePlacement,
    pub info: WordInfo,
    /// Every word holds the same members at the same slots.
    pub duplicated: bool,
    pub words: Vec<WordData>,
    /// Hardware locator: every offset (`word * epw + slot`) a member holds,
    /// kept sorted.
    pub locator: BTreeMap<MemberHandle, Vec<u32>>,
    /// Words changed since the last hardware sync.
    pub dirty: BTreeSet<u32>,
}

impl GroupStageInfo {
    pub fn new(placement: StagePlacement, info: WordInfo) -> Self {
        Self {
            placement,
            info,
            duplicated: true,
            words: (0..info.no_words).map(|_| WordData::new(info.entries_per_word)).collect(),
            locator: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn epw(&self) -> u32 {
        self.info.entries_per_word
    }

    pub fn no_words(&self) -> u32 {
        self.info.no_words
    }

    /// Member placements (weight included) in the group.
    pub fn count(&self) -> u32 {
        if self.duplicated {
            self.words.first().map_or(0, |w| w.usage)
        } else {
            self.words.iter().map(|w| w.usage).sum()
        }
    }

    /// Distinct active placements.
    pub fn active_count(&self) -> u32 {
        if self.duplicated {
            self.words.first().map_or(0, |w| w.active_count())
        } else {
            self.words.iter().map(|w| w.active_count()).sum()
        }
    }

    pub fn usage(&self) -> Vec<u32> {
        self.words.iter().map(|w| w.usage).collect()
    }

    pub fn locations(&self, member: MemberHandle) -> Vec<Location> {
        let epw = self.epw();
        self.locator
            .get(&member)
            .map(|offs| offs.iter().map(|o| Location::from_offset(*o, epw)).collect())
            .unwrap_or_default()
    }

    pub fn member_at(&self, loc: Location) -> Option<MemberHandle> {
        self.words.get(loc.word as usize).and_then(|w| w.member_at(loc.slot))
    }

    /// Placements of `member`; a duplicated slot counts once, not per word.
    pub fn placement_count(&self, member: MemberHandle) -> u32 {
        let held = self.locator.get(&member).map_or(0, |o| o.len() as u32);
        if self.duplicated {
            held / self.no_words()
        } else {
            held
        }
    }

    /// Marks every word for the next hardware sync.
    pub fn mark_all_dirty(&mut self) {
        self.dirty = (0..self.no_words()).collect();
    }

    pub(crate) fn locate(&mut self, member: MemberHandle, loc: Location) {
        let off = loc.offset(self.epw());
        let offs = self.locator.entry(member).or_default();
        if let Err(pos) = offs.binary_search(&off) {
            offs.insert(pos, off);
        }
    }

    pub(crate) fn unlocate(&mut self, member: MemberHandle, loc: Location) {
        let off = loc.offset(self.epw());
        if let Some(offs) = self.locator.get_mut(&member) {
            if let Ok(pos) = offs.binary_search(&off) {
                offs.remove(pos);
            }
            if offs.is_empty() {
                self.locator.remove(&member);
            }
        }
    }

    /// Writes `member` into an empty or occupied slot, recording the change.
    pub(crate) fn put(
        &mut self,
        member: MemberHandle,
        loc: Location,
        active: bool,
        changes: &mut Vec<SlotChange>,
    ) {
        let word = &self.words[loc.word as usize];
        let prev = word.member_at(loc.slot);
        if prev == Some(member) && word.is_active(loc.slot) == active {
            return;
        }
        if let Some(old) = prev {
            changes.push(SlotChange::del(old, loc));
            self.unlocate(old, loc);
        } else {
            self.words[loc.word as usize].usage += 1;
        }
        let word = &mut self.words[loc.word as usize];
        word.slots[loc.slot as usize] = Some(member);
        word.active[loc.slot as usize] = active;
        changes.push(SlotChange::add(member, loc, active, prev.is_some()));
        self.locate(member, loc);
        self.dirty.insert(loc.word);
    }

    /// Moves every slot of `from` to `to` without touching position or
    /// state. Nothing is marked dirty: the hardware image is unchanged.
    pub(crate) fn rename(&mut self, from: MemberHandle, to: MemberHandle) -> SelResult<()> {
        if self.locator.contains_key(&to) {
            return Err(SelError::already_exists(format!("{} in {}", to, self.placement.stage)));
        }
        let offs = self
            .locator
            .remove(&from)
            .ok_or_else(|| SelError::not_found(format!("{} in {}", from, self.placement.stage)))?;
        let epw = self.epw();
        for off in &offs {
            let loc = Location::from_offset(*off, epw);
            self.words[loc.word as usize].slots[loc.slot as usize] = Some(to);
        }
        self.locator.insert(to, offs);
        Ok(())
    }

    /// Empties a slot, recording the change.
    pub(crate) fn clear(&mut self, loc: Location, changes: &mut Vec<SlotChange>) {
        let word = &mut self.words[loc.word as usize];
        if let Some(old) = word.slots[loc.slot as usize].take() {
            word.active[loc.slot as usize] = false;
            word.usage -= 1;
            changes.push(SlotChange::del(old, loc));
            self.unlocate(old, loc);
            self.dirty.insert(loc.word);
        }
    }

    /// Checks the layout invariants. `balanced` additionally requires spread
    /// words to differ in usage by at most one.
    pub fn verify(&self, balanced: bool) -> SelResult<()> {
        let epw = self.epw();
        let name = self.placement.stage;
        if self.words.len() as u32 != self.no_words() {
            return Err(SelError::unexpected(format!("{}: word count mismatch", name)));
        }
        let mut seen = 0usize;
        for (w, word) in self.words.iter().enumerate() {
            for s in 0..epw {
                let occupied = word.member_at(s).is_some();
                if occupied != (s < word.usage) {
                    return Err(SelError::unexpected(format!(
                        "{}: word {} slot {} breaks contiguity (usage {})",
                        name, w, s, word.usage
                    )));
                }
                if !occupied && word.is_active(s) {
                    return Err(SelError::unexpected(format!(
                        "{}: empty slot {}:{} marked active",
                        name, w, s
                    )));
                }
                if let Some(m) = word.member_at(s) {
                    let off = Location::new(w as u32, s).offset(epw);
                    let known = self.locator.get(&m).is_some_and(|o| o.binary_search(&off).is_ok());
                    if !known {
                        return Err(SelError::unexpected(format!(
                            "{}: {} at {}:{} missing from locator",
                            name, m, w, s
                        )));
                    }
                    seen += 1;
                }
            }
        }
        let located: usize = self.locator.values().map(|o| o.len()).sum();
        if located != seen {
            return Err(SelError::unexpected(format!(
                "{}: locator holds {} offsets for {} occupied slots",
                name, located, seen
            )));
        }
        if self.locator.values().any(|o| o.windows(2).any(|p| p[0] >= p[1])) {
            return Err(SelError::unexpected(format!("{}: locator not sorted", name)));
        }
        if self.duplicated {
            let first = &self.words[0];
            if self.words.iter().any(|w| w != first) {
                return Err(SelError::unexpected(format!("{}: duplicated words differ", name)));
            }
        } else if balanced {
            let usage = self.usage();
            let max = usage.iter().max().copied().unwrap_or(0);
            let min = usage.iter().min().copied().unwrap_or(0);
            if max - min > 1 {
                return Err(SelError::unexpected(format!(
                    "{}: spread usage {:?} unbalanced",
                    name, usage
                )));
            }
        }
        if self.count() > self.info.capacity() {
            return Err(SelError::unexpected(format!("{}: over capacity", name)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipe_sel_types::StageId;

    fn gsi(no_words: u32, epw: u32) -> GroupStageInfo {
        let placement = StagePlacement {
            stage: StageId(0),
            stage_idx: 0,
            base_word: 0,
            adt_base: 0,
            from_profile: false,
        };
        GroupStageInfo::new(placement, WordInfo { no_words, entries_per_word: epw })
    }

    fn m(n: u32) -> MemberHandle {
        MemberHandle::from_raw_unchecked(n)
    }

    #[test]
    fn test_put_and_clear_track_locator() {
        let mut g = gsi(2, 4);
        let mut changes = Vec::new();
        g.put(m(1), Location::new(1, 0), true, &mut changes);
        assert_eq!(g.locator[&m(1)], vec![4]);
        g.put(m(2), Location::new(1, 0), false, &mut changes);
        assert_eq!(changes.len(), 3);
        assert!(changes[2].replace);
        assert!(!g.locator.contains_key(&m(1)));
        g.clear(Location::new(1, 0), &mut changes);
        assert_eq!(g.words[1].usage, 0);
        assert!(g.locator.is_empty());
    }

    #[test]
    fn test_put_same_is_noop() {
        let mut g = gsi(1, 4);
        let mut changes = Vec::new();
        g.put(m(1), Location::new(0, 0), true, &mut changes);
        g.put(m(1), Location::new(0, 0), true, &mut changes);
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn test_hw_value_per_mode() {
        let mut w = WordData::new(8);
        w.slots[0] = Some(m(1));
        w.slots[1] = Some(m(2));
        w.slots[2] = Some(m(3));
        w.usage = 3;
        w.active[0] = true;
        w.active[2] = true;
        assert_eq!(w.hw_value(SelectionMode::Fair), 2);
        assert_eq!(w.hw_value(SelectionMode::Resilient), 3);
        assert_eq!(WordData::new(8).hw_value(SelectionMode::Resilient), 0);
    }

    #[test]
    fn test_verify_detects_hole() {
        let mut g = gsi(1, 4);
        let mut changes = Vec::new();
        g.put(m(1), Location::new(0, 1), true, &mut changes);
        assert!(g.verify(true).is_err());
    }

    #[test]
    fn test_rename_keeps_slots() {
        let mut g = gsi(2, 4);
        let mut changes = Vec::new();
        g.put(m(1), Location::new(0, 0), true, &mut changes);
        g.put(m(1), Location::new(1, 0), true, &mut changes);
        g.put(m(2), Location::new(0, 1), false, &mut changes);
        g.put(m(2), Location::new(1, 1), false, &mut changes);
        g.dirty.clear();

        g.rename(m(2), m(9)).unwrap();
        assert_eq!(g.member_at(Location::new(1, 1)), Some(m(9)));
        assert!(!g.words[1].is_active(1));
        assert_eq!(g.placement_count(m(9)), 1);
        assert!(g.dirty.is_empty());
        g.verify(true).unwrap();

        assert!(g.rename(m(1), m(9)).is_err());
        assert!(g.rename(m(2), m(3)).is_err());
    }

    #[test]
    fn test_location_offset() {
        let loc = Location::new(2, 5);
        assert_eq!(loc.offset(75), 155);
        assert_eq!(Location::from_offset(155, 75), loc);
    }
}
