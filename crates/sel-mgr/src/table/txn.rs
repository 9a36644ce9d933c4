//! Per-call transactions.
//!
//! Every mutating call snapshots the records it is about to touch (group,
//! stage allocators, fallback) the first time it touches them. Success
//! syncs dirty words to hardware and drops the snapshots; failure puts the
//! snapshots back, truncates the MoveList and undoes delivered callbacks.
//! Words a group no longer occupies after either outcome are blanked.

use super::orch::SelectorTable;
use super::types::Group;
use crate::context::{Instruction, MemAddr, Session, UpdateEvent};
use crate::placement::StageInfo;
use crate::table::hw::{blank_word, encode_word};
use crate::{debug_log, error_log, warn_log};
use pipe_sel_types::{GroupHandle, MemberHandle, SelResult, StageId};
use std::collections::{BTreeMap, BTreeSet};

pub(crate) type GroupKey = (usize, GroupHandle);

/// One selector RAM line: instance, stage, word address.
type WordLine = (usize, StageId, u32);

fn lines_of(idx: usize, group: &Group) -> impl Iterator<Item = WordLine> + '_ {
    group.stages.iter().flat_map(move |s| {
        let stage = s.placement.stage;
        let base = s.placement.base_word;
        (0..s.no_words()).map(move |w| (idx, stage, base + w))
    })
}

#[derive(Debug)]
pub(crate) struct Txn {
    pub session: Session,
    move_mark: usize,
    next_group_handle: u32,
    /// `None` marks a group created inside the transaction.
    groups: BTreeMap<GroupKey, Option<Group>>,
    stages: BTreeMap<usize, Vec<StageInfo>>,
    fallback: Option<Option<MemberHandle>>,
    pub delivered: Vec<UpdateEvent>,
    synced: bool,
}

impl Txn {
    fn new(session: Session, move_mark: usize, next_group_handle: u32) -> Self {
        Self {
            session,
            move_mark,
            next_group_handle,
            groups: BTreeMap::new(),
            stages: BTreeMap::new(),
            fallback: None,
            delivered: Vec::new(),
            synced: false,
        }
    }
}

impl SelectorTable {
    pub(crate) fn begin(&mut self, session: Session) {
        if let Some(stale) = self.txn.take() {
            warn_log!("SelTable", session = %stale.session, "discarding unfinished transaction");
        }
        self.txn = Some(Txn::new(session, self.move_list.mark(), self.next_group_handle));
    }

    pub(crate) fn session(&self) -> Session {
        self.txn.as_ref().map(|t| t.session).unwrap_or_default()
    }

    pub(crate) fn backup_group(&mut self, idx: usize, handle: GroupHandle) {
        let current = self.instances[idx].groups.get(&handle).cloned();
        if let Some(txn) = self.txn.as_mut() {
            txn.groups.entry((idx, handle)).or_insert(current);
        }
    }

    pub(crate) fn backup_stages(&mut self, idx: usize) {
        let current = &self.instances[idx].stages;
        if let Some(txn) = self.txn.as_mut() {
            txn.stages.entry(idx).or_insert_with(|| current.clone());
        }
    }

    pub(crate) fn backup_fallback(&mut self) {
        let current = self.fallback;
        if let Some(txn) = self.txn.as_mut() {
            txn.fallback.get_or_insert(current);
        }
    }

    fn live_lines(&self, keys: &[GroupKey]) -> BTreeSet<WordLine> {
        keys.iter()
            .filter_map(|(idx, h)| self.instances[*idx].groups.get(h).map(|g| (*idx, g)))
            .flat_map(|(idx, g)| lines_of(idx, g))
            .collect()
    }

    /// Overwrites lines no group holds any more with blank images.
    fn clear_words(&mut self, lines: &BTreeSet<WordLine>, session: Session) -> SelResult<()> {
        let mem_id = self.config.table_handle;
        for (idx, stage, line) in lines {
            let pipe = self.instances[*idx].hw_pipe();
            let data = blank_word(self.config.word_width);
            self.ctx
                .shadow
                .write(pipe, *stage, MemAddr::selector_word(mem_id, *line), &data)?;
            self.ctx.instructions.append(
                session,
                Instruction::WriteSelWord {
                    pipe,
                    stage: *stage,
                    word: *line,
                    data,
                },
            )?;
            self.stats.words_synced += 1;
        }
        if !lines.is_empty() {
            debug_log!("SelTable", session = %session, words = lines.len(), "vacated words cleared");
        }
        Ok(())
    }

    /// Writes every dirty word of the touched groups to shadow memory and
    /// queues the matching instructions.
    fn sync_words(&mut self, keys: &[GroupKey], session: Session) -> SelResult<()> {
        let mode = self.config.mode;
        let width = self.config.word_width;
        let mem_id = self.config.table_handle;
        for (idx, handle) in keys {
            let pipe = self.instances[*idx].hw_pipe();
            let Some(group) = self.instances[*idx].groups.get_mut(handle) else {
                continue;
            };
            for stage in group.stages.iter_mut() {
                let dirty: Vec<u32> = std::mem::take(&mut stage.dirty).into_iter().collect();
                for w in dirty {
                    let data = encode_word(&stage.words[w as usize], stage.duplicated, mode, width);
                    let line = stage.placement.base_word + w;
                    self.ctx
                        .shadow
                        .write(pipe, stage.placement.stage, MemAddr::selector_word(mem_id, line), &data)?;
                    self.ctx.instructions.append(
                        session,
                        Instruction::WriteSelWord {
                            pipe,
                            stage: stage.placement.stage,
                            word: line,
                            data,
                        },
                    )?;
                    self.stats.words_synced += 1;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn commit(&mut self) -> SelResult<()> {
        let Some(txn) = self.txn.as_mut() else {
            return Ok(());
        };
        txn.synced = true;
        let session = txn.session;
        let keys: Vec<GroupKey> = txn.groups.keys().copied().collect();
        let held: BTreeSet<WordLine> = txn
            .groups
            .iter()
            .filter_map(|((idx, _), g)| g.as_ref().map(|g| (*idx, g)))
            .flat_map(|(idx, g)| lines_of(idx, g))
            .collect();
        let vacated: BTreeSet<WordLine> = held.difference(&self.live_lines(&keys)).copied().collect();
        self.clear_words(&vacated, session)?;
        self.sync_words(&keys, session)?;
        self.journal.commit(self.ctx.adt.as_ref());
        self.txn = None;
        debug_log!("SelTable", session = %session, groups = keys.len(), "transaction committed");
        Ok(())
    }

    pub(crate) fn rollback(&mut self) {
        let Some(txn) = self.txn.take() else {
            return;
        };
        self.move_list.truncate(txn.move_mark);
        let keys: Vec<GroupKey> = txn.groups.keys().copied().collect();
        let written = self.live_lines(&keys);
        for ((idx, handle), backup) in txn.groups {
            match backup {
                Some(group) => {
                    self.instances[idx].groups.insert(handle, group);
                }
                None => {
                    self.instances[idx].groups.remove(&handle);
                }
            }
        }
        for (idx, stages) in txn.stages {
            self.instances[idx].stages = stages;
        }
        if let Some(fallback) = txn.fallback {
            self.fallback = fallback;
        }
        self.next_group_handle = txn.next_group_handle;
        self.journal.rollback(self.ctx.adt.as_ref());

        if let Some(cb) = self.ctx.update_cb.clone() {
            for event in txn.delivered.iter().rev() {
                if let Err(e) = cb.on_update(txn.session, &event.inverse()) {
                    error_log!("SelTable", error = %e, member = %event.member, "inverse callback failed");
                }
            }
        }

        if txn.synced {
            let vacated: BTreeSet<WordLine> = written.difference(&self.live_lines(&keys)).copied().collect();
            if let Err(e) = self.clear_words(&vacated, txn.session) {
                error_log!("SelTable", error = %e, "clearing words after rollback failed");
            }
            for (idx, handle) in &keys {
                if let Some(group) = self.instances[*idx].groups.get_mut(handle) {
                    for stage in group.stages.iter_mut() {
                        stage.dirty = (0..stage.no_words()).collect();
                    }
                }
            }
            if let Err(e) = self.sync_words(&keys, txn.session) {
                error_log!("SelTable", error = %e, "hardware resync after rollback failed");
            }
        }
        self.stats.rollbacks += 1;
        warn_log!("SelTable", session = %txn.session, groups = keys.len(), "transaction rolled back");
    }

    /// Runs `op` as one transaction.
    pub(crate) fn transact<T>(
        &mut self,
        session: Session,
        op: impl FnOnce(&mut Self) -> SelResult<T>,
    ) -> SelResult<T> {
        self.begin(session);
        let result = op(self).and_then(|v| self.commit().map(|_| v));
        if result.is_err() {
            self.rollback();
        }
        result
    }
}
