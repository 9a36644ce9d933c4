//! Warm restart against in-memory hardware.
//!
//! Each test programs hardware through one table, then brings up a second
//! table over the same shadow memory and action table, decodes, replays and
//! reconciles.


use mock_hw::{member, pointer_of, MockHw};
use pipe_sel_mgr::{
    ActionData, MoveList, MoveOp, SelectionMode, SelectorTable, SelectorTableConfig, Session,
};
use pipe_sel_types::{
    ActionFnHandle, GroupHandle, MatchEntryHandle, MatchTableHandle, MemberHandle, PipeId, SelStatus,
};
use pretty_assertions::assert_eq;

const ALL: PipeId = PipeId::ALL;
const ACT: ActionFnHandle = ActionFnHandle::from_raw_unchecked(7);

fn config(max_group_size: u32) -> SelectorTableConfig {
    SelectorTableConfig::new("ecmp_sel", SelectionMode::Resilient, max_group_size)
}

/// Builds a group on a first table and programs its members' action data.
fn cold_boot(hw: &MockHw, cfg: &SelectorTableConfig, max: u32, data: &[&[u8]]) -> (SelectorTable, GroupHandle) {
    let weighted: Vec<(&[u8], u32)> = data.iter().map(|d| (*d, 1)).collect();
    cold_boot_weighted(hw, cfg, max, &weighted)
}

/// Like `cold_boot`, member `100 + i` taking `weight` placements.
fn cold_boot_weighted(
    hw: &MockHw,
    cfg: &SelectorTableConfig,
    max: u32,
    members: &[(&[u8], u32)],
) -> (SelectorTable, GroupHandle) {
    let mut table = SelectorTable::new(cfg.clone(), hw.context()).unwrap();
    let s = Session(1);
    let g = table.group_create(s, ALL, 10, max).unwrap();
    for (i, (d, weight)) in members.iter().enumerate() {
        let m = member(100 + i as u32);
        hw.adt.set_member_data(m, d);
        table.group_member_add(s, ALL, g, m, *weight, true, ACT).unwrap();
    }
    let moves = table.take_move_list();
    hw.program(cfg, &moves);
    (table, g)
}

/// Distinct action data for `count` next hops.
fn next_hops(count: usize) -> Vec<Vec<u8>> {
    (0..count).map(|i| format!("nh{}", i).into_bytes()).collect()
}

fn as_slices(data: &[Vec<u8>]) -> Vec<&[u8]> {
    data.iter().map(|d| d.as_slice()).collect()
}

/// Replays one enabled member per action data, handles from `first` up.
fn replay_members(
    hw: &MockHw,
    table: &mut SelectorTable,
    group: GroupHandle,
    first: u32,
    data: &[Vec<u8>],
) -> Vec<MemberHandle> {
    let mut handles = Vec::with_capacity(data.len());
    for (i, d) in data.iter().enumerate() {
        let m = member(first + i as u32);
        hw.adt.set_member_data(m, d);
        table.group_member_add(Session(2), ALL, group, m, 1, true, ACT).unwrap();
        handles.push(m);
    }
    handles
}

fn placement_delta(op: MoveOp) -> i64 {
    match op {
        MoveOp::Add => 1,
        MoveOp::Del => -1,
        _ => 0,
    }
}

/// Adds minus deletes of `member` across a MoveList.
fn net_placements(moves: &MoveList, member: MemberHandle) -> i64 {
    moves.iter().filter(|n| n.member == member).map(|n| placement_delta(n.op)).sum()
}

fn restarted(hw: &MockHw, cfg: &SelectorTableConfig) -> SelectorTable {
    let mut table = SelectorTable::new(cfg.clone(), hw.context()).unwrap();
    table.ha_begin().unwrap();
    assert!(table.is_restarting());
    table
}

#[test]
fn test_restart_applies_only_the_delta() {
    let hw = MockHw::new();
    let cfg = config(64);
    let (old, g) = cold_boot(&hw, &cfg, 8, &[b"A", b"B", b"C"]);
    let pointer = pointer_of(old.group(ALL, g).unwrap());
    let base = pointer.base().unwrap();

    let mut table = restarted(&hw, &cfg);
    let temp = table.llp_decode_group(ALL, &pointer).unwrap();
    assert!(temp.is_temporary());
    assert_eq!(table.group(ALL, temp).unwrap().num_members, 3);

    let (a, c, d) = (member(200), member(201), member(202));
    hw.adt.set_member_data(a, b"A");
    hw.adt.set_member_data(c, b"C");
    hw.adt.set_member_data(d, b"D");
    let s = Session(2);
    let ng = table.group_create(s, ALL, 10, 8).unwrap();
    for m in [a, c, d] {
        table.group_member_add(s, ALL, ng, m, 1, true, ACT).unwrap();
    }
    table.ha_bind_group(ng, ALL, base).unwrap();
    let writes_before = hw.sink.instructions.lock().unwrap().len();

    let moves = table.ha_reconcile(s).unwrap();
    assert!(!table.is_restarting());

    let ops: Vec<(MoveOp, bool)> = moves.iter().map(|n| (n.op, n.replace)).collect();
    assert_eq!(ops, vec![(MoveOp::Del, false), (MoveOp::Add, true)]);
    assert!(moves.nodes()[0].member.is_temporary());
    assert_eq!(moves.nodes()[1].member, d);
    assert_eq!(moves.nodes()[0].logical_subindex, moves.nodes()[1].logical_subindex);

    let group = table.group(ALL, ng).unwrap();
    assert_eq!(group.num_active, 3);
    assert_eq!(group.members.keys().copied().collect::<Vec<_>>(), vec![a, c, d]);
    table.verify_group(ALL, ng).unwrap();
    assert!(table.group(ALL, temp).is_err());

    let stats = table.stats();
    assert_eq!(stats.ha_groups_decoded, 1);
    assert_eq!(stats.ha_groups_matched, 1);
    assert_eq!(stats.ha_handles_substituted, 2);
    assert!(hw.sink.instructions.lock().unwrap().len() > writes_before);
}

#[test]
fn test_identical_replay_changes_nothing() {
    let hw = MockHw::new();
    let cfg = config(64);
    let (old, g) = cold_boot(&hw, &cfg, 8, &[b"A", b"B", b"C"]);
    let pointer = pointer_of(old.group(ALL, g).unwrap());

    let mut table = restarted(&hw, &cfg);
    table.llp_decode_group(ALL, &pointer).unwrap();
    let s = Session(2);
    let ng = table.group_create(s, ALL, 10, 8).unwrap();
    for (i, d) in [b"A", b"B", b"C"].iter().enumerate() {
        let m = member(300 + i as u32);
        hw.adt.set_member_data(m, *d);
        table.group_member_add(s, ALL, ng, m, 1, true, ACT).unwrap();
    }
    table
        .group_attach_ref(ALL, ng, MatchTableHandle::from_raw_unchecked(1), MatchEntryHandle::from_raw_unchecked(9))
        .unwrap();
    table.ha_bind_group(ng, ALL, pointer.base().unwrap()).unwrap();
    let writes_before = hw.sink.instructions.lock().unwrap().len();

    let moves = table.ha_reconcile(s).unwrap();
    assert!(moves.is_empty());
    assert_eq!(hw.sink.instructions.lock().unwrap().len(), writes_before);

    let group = table.group(ALL, ng).unwrap();
    assert_eq!(group.num_members, 3);
    assert!(group.is_referenced());
    assert_eq!(group.stages[0].placement.base_word, pointer.base().unwrap());
    assert_eq!(table.stats().ha_handles_substituted, 3);
}

#[test]
fn test_disabled_replay_member_is_deactivated() {
    let hw = MockHw::new();
    let cfg = config(64);
    let (old, g) = cold_boot(&hw, &cfg, 8, &[b"A", b"B"]);
    let pointer = pointer_of(old.group(ALL, g).unwrap());

    let mut table = restarted(&hw, &cfg);
    table.llp_decode_group(ALL, &pointer).unwrap();
    let s = Session(2);
    let ng = table.group_create(s, ALL, 10, 8).unwrap();
    let (a, b) = (member(400), member(401));
    hw.adt.set_member_data(a, b"A");
    hw.adt.set_member_data(b, b"B");
    table.group_member_add(s, ALL, ng, a, 1, true, ACT).unwrap();
    table.group_member_add(s, ALL, ng, b, 1, false, ACT).unwrap();
    table.ha_bind_group(ng, ALL, pointer.base().unwrap()).unwrap();

    let moves = table.ha_reconcile(s).unwrap();
    assert_eq!(moves.count_op(MoveOp::Deactivate), 1);
    assert_eq!(moves.count_op(MoveOp::Add), 0);
    assert_eq!(table.group(ALL, ng).unwrap().num_active, 1);
}

#[test]
fn test_hardware_only_group_is_destroyed() {
    let hw = MockHw::new();
    let cfg = config(64);
    let (old, g) = cold_boot(&hw, &cfg, 8, &[b"A", b"B"]);
    let pointer = pointer_of(old.group(ALL, g).unwrap());

    let mut table = restarted(&hw, &cfg);
    let temp = table.llp_decode_group(ALL, &pointer).unwrap();
    let moves = table.ha_reconcile(Session(2)).unwrap();

    assert_eq!(moves.count_op(MoveOp::Del), 2);
    assert_eq!(moves.count_op(MoveOp::GroupDestroy), 1);
    assert_eq!(moves.nodes().last().unwrap().group, temp);
    assert!(table.group_handles(ALL).unwrap().is_empty());
    assert_eq!(table.stats().ha_groups_cleaned, 1);
    // The released words are free again.
    assert_eq!(table.instance(ALL).unwrap().stages[0].allocator.used_words(), 0);
}

#[test]
fn test_replayed_only_group_is_created() {
    let hw = MockHw::new();
    let cfg = config(64);
    let mut table = restarted(&hw, &cfg);
    let s = Session(2);
    let ng = table.group_create(s, ALL, 11, 16).unwrap();
    table.group_member_add(s, ALL, ng, member(1), 2, true, ACT).unwrap();
    table.group_member_add(s, ALL, ng, member(2), 1, true, ACT).unwrap();
    assert!(table.group(ALL, ng).is_err());

    let moves = table.ha_reconcile(s).unwrap();
    let ops: Vec<MoveOp> = moves.iter().map(|n| n.op).collect();
    assert_eq!(ops, vec![MoveOp::GroupCreate, MoveOp::Add, MoveOp::Add, MoveOp::Add]);

    let group = table.group(ALL, ng).unwrap();
    assert_eq!(group.group_id, 11);
    assert_eq!(group.placements(), 3);
    table.verify_group(ALL, ng).unwrap();
    assert_eq!(table.stats().ha_groups_created, 1);
}

#[test]
fn test_replayed_only_group_when_bound_base_was_not_decoded() {
    let hw = MockHw::new();
    let cfg = config(64);
    let mut table = restarted(&hw, &cfg);
    let s = Session(2);
    let ng = table.group_create(s, ALL, 11, 4).unwrap();
    table.group_member_add(s, ALL, ng, member(1), 1, true, ACT).unwrap();
    table.ha_bind_group(ng, ALL, 40).unwrap();

    let moves = table.ha_reconcile(s).unwrap();
    assert_eq!(moves.count_op(MoveOp::GroupCreate), 1);
    assert_eq!(table.stats().ha_groups_matched, 0);
    assert_eq!(table.stats().ha_groups_created, 1);
}

#[test]
fn test_larger_replayed_size_moves_the_group() {
    let hw = MockHw::new();
    let cfg = config(256);
    let (old, g) = cold_boot(&hw, &cfg, 8, &[b"A", b"B", b"C"]);
    let pointer = pointer_of(old.group(ALL, g).unwrap());

    let mut table = restarted(&hw, &cfg);
    table.llp_decode_group(ALL, &pointer).unwrap();
    let s = Session(2);
    let ng = table.group_create(s, ALL, 10, 200).unwrap();
    for (i, d) in [b"A", b"B", b"C"].iter().enumerate() {
        let m = member(500 + i as u32);
        hw.adt.set_member_data(m, *d);
        table.group_member_add(s, ALL, ng, m, 1, true, ACT).unwrap();
    }
    table.ha_bind_group(ng, ALL, pointer.base().unwrap()).unwrap();

    let moves = table.ha_reconcile(s).unwrap();
    assert_eq!(moves.count_op(MoveOp::GroupDestroy), 1);
    assert_eq!(moves.count_op(MoveOp::GroupCreate), 1);

    let group = table.group(ALL, ng).unwrap();
    let info = group.word_info().unwrap();
    assert_eq!((info.no_words, info.entries_per_word), (2, 100));
    assert_eq!(group.max_size, 200);
    assert_eq!(group.num_members, 3);
    table.verify_group(ALL, ng).unwrap();
}

#[test]
fn test_smaller_replayed_size_shrinks_the_group() {
    let hw = MockHw::new();
    let cfg = config(64);
    let (old, g) = cold_boot(&hw, &cfg, 8, &[b"A", b"B"]);
    let pointer = pointer_of(old.group(ALL, g).unwrap());

    let mut table = restarted(&hw, &cfg);
    table.llp_decode_group(ALL, &pointer).unwrap();
    let s = Session(2);
    let ng = table.group_create(s, ALL, 10, 4).unwrap();
    let a = member(600);
    hw.adt.set_member_data(a, b"A");
    table.group_member_add(s, ALL, ng, a, 1, true, ACT).unwrap();
    table.ha_bind_group(ng, ALL, pointer.base().unwrap()).unwrap();

    let moves = table.ha_reconcile(s).unwrap();
    assert_eq!(moves.count_op(MoveOp::GroupCreate), 1);
    // B goes away before the move, A is re-added at the new placement.
    assert!(moves.nodes()[0].member.is_temporary());
    assert_eq!(moves.nodes()[0].op, MoveOp::Del);
    assert_eq!(moves.nodes().last().unwrap().member, a);

    let group = table.group(ALL, ng).unwrap();
    assert_eq!(group.word_info().unwrap().entries_per_word, 4);
    assert_eq!(group.members.keys().copied().collect::<Vec<_>>(), vec![a]);
    table.verify_group(ALL, ng).unwrap();
}

#[test]
fn test_decode_is_idempotent_per_base() {
    let hw = MockHw::new();
    let cfg = config(64);
    let (old, g) = cold_boot(&hw, &cfg, 8, &[b"A", b"B"]);
    let pointer = pointer_of(old.group(ALL, g).unwrap());

    let mut table = restarted(&hw, &cfg);
    let first = table.llp_decode_group(ALL, &pointer).unwrap();
    let second = table.llp_decode_group(ALL, &pointer).unwrap();
    assert_eq!(first, second);
    assert_eq!(table.group_handles(ALL).unwrap().len(), 1);
    assert_eq!(table.stats().ha_groups_decoded, 1);
}

#[test]
fn test_decode_error_aborts_restart() {
    let hw = MockHw::new();
    let cfg = config(64);
    let (old, g) = cold_boot(&hw, &cfg, 8, &[b"A"]);
    let good = pointer_of(old.group(ALL, g).unwrap());

    let mut table = restarted(&hw, &cfg);
    table.llp_decode_group(ALL, &good).unwrap();

    let mut bad = good.clone();
    bad.stages[0].word_base = 900;
    let err = table.llp_decode_group(ALL, &bad).unwrap_err();
    assert_eq!(err.status(), SelStatus::Unexpected);
    assert!(!table.is_restarting());
    assert!(table.group_handles(ALL).unwrap().is_empty());
    assert_eq!(table.instance(ALL).unwrap().stages[0].allocator.used_words(), 0);

    // The table is usable cold again.
    table.group_create(Session(3), ALL, 1, 4).unwrap();
}

#[test]
fn test_decode_rejects_missing_action_data() {
    let hw = MockHw::new();
    let cfg = config(64);
    let mut table = SelectorTable::new(cfg.clone(), hw.context()).unwrap();
    let g = table.group_create(Session(1), ALL, 1, 4).unwrap();
    table.group_member_add(Session(1), ALL, g, member(1), 1, true, ACT).unwrap();
    // Nothing programmed into the action table.
    let pointer = pointer_of(table.group(ALL, g).unwrap());

    let mut table = restarted(&hw, &cfg);
    assert!(table.llp_decode_group(ALL, &pointer).is_err());
    assert!(!table.is_restarting());
}

#[test]
fn test_begin_requires_cold_table() {
    let hw = MockHw::new();
    let cfg = config(64);
    let (mut table, _) = cold_boot(&hw, &cfg, 8, &[b"A"]);
    assert_eq!(table.ha_begin().unwrap_err().status(), SelStatus::InvalidArgument);

    let mut cold = restarted(&hw, &cfg);
    assert_eq!(cold.ha_begin().unwrap_err().status(), SelStatus::AlreadyExists);
    cold.ha_abort();
    assert!(!cold.is_restarting());
    assert!(cold.ha_reconcile(Session(1)).is_err());
}

#[test]
fn test_bind_conflicts() {
    let hw = MockHw::new();
    let cfg = config(64);
    let mut table = restarted(&hw, &cfg);
    let s = Session(2);
    let g1 = table.group_create(s, ALL, 1, 4).unwrap();
    let g2 = table.group_create(s, ALL, 2, 4).unwrap();
    table.ha_bind_group(g1, ALL, 0).unwrap();
    assert_eq!(table.ha_bind_group(g2, ALL, 0).unwrap_err().status(), SelStatus::AlreadyExists);
    assert_eq!(
        table.ha_bind_group(GroupHandle::from_raw_unchecked(77), ALL, 4).unwrap_err().status(),
        SelStatus::NotFound
    );
}

#[test]
fn test_replay_validates_like_live_calls() {
    let hw = MockHw::new();
    let cfg = config(8);
    let mut table = restarted(&hw, &cfg);
    let s = Session(2);
    let g = table.group_create(s, ALL, 1, 2).unwrap();
    table.group_member_add(s, ALL, g, member(1), 1, true, ACT).unwrap();
    assert!(table.group_member_add(s, ALL, g, member(1), 1, true, ACT).is_err());
    assert!(table.group_member_add(s, ALL, g, member(2), 2, true, ACT).is_err());
    table
        .group_attach_ref(ALL, g, MatchTableHandle::from_raw_unchecked(1), MatchEntryHandle::from_raw_unchecked(1))
        .unwrap();
    assert_eq!(
        table.group_member_del(s, ALL, g, member(1)).unwrap_err().status(),
        SelStatus::ReferencesExist
    );
    assert!(table.group_resize(s, ALL, g, 9).is_err());
    table.group_resize(s, ALL, g, 8).unwrap();
    assert_eq!(table.ha_state().unwrap().replay_of(g).unwrap().max_size, 8);
}

#[test]
fn test_fallback_with_same_data_is_adopted_silently() {
    let hw = MockHw::new();
    let cfg = config(64);
    let mut table = restarted(&hw, &cfg);
    table.llp_decode_fallback(ALL, ActionData::new(*b"F")).unwrap();
    let f = member(900);
    hw.adt.set_member_data(f, b"F");
    table.set_fallback(Session(2), f).unwrap();

    let moves = table.ha_reconcile(Session(2)).unwrap();
    assert!(moves.is_empty());
    assert_eq!(table.fallback(), Some(f));
}

#[test]
fn test_fallback_with_new_data_is_reprogrammed() {
    let hw = MockHw::new();
    let cfg = config(64);
    let mut table = restarted(&hw, &cfg);
    table.llp_decode_fallback(ALL, ActionData::new(*b"F")).unwrap();
    let f = member(901);
    hw.adt.set_member_data(f, b"G");
    table.set_fallback(Session(2), f).unwrap();

    let moves = table.ha_reconcile(Session(2)).unwrap();
    let ops: Vec<MoveOp> = moves.iter().map(|n| n.op).collect();
    assert_eq!(ops, vec![MoveOp::SetFallback]);
    assert_eq!(moves.nodes()[0].member, f);
    assert_eq!(table.fallback(), Some(f));
}

#[test]
fn test_fallback_not_replayed_is_cleared() {
    let hw = MockHw::new();
    let cfg = config(64);
    let mut table = restarted(&hw, &cfg);
    table.llp_decode_fallback(ALL, ActionData::new(*b"F")).unwrap();

    let moves = table.ha_reconcile(Session(2)).unwrap();
    let ops: Vec<MoveOp> = moves.iter().map(|n| n.op).collect();
    assert_eq!(ops, vec![MoveOp::ClrFallback]);
    assert_eq!(table.fallback(), None);
}

/// Restarts a 110-member group in a 200-entry (two word) layout with an
/// identical replay and checks every member kept its slots.
fn assert_spread_restart_is_silent(cfg: &SelectorTableConfig) {
    let hw = MockHw::new();
    let data = next_hops(110);
    let (old, g) = cold_boot(&hw, cfg, 200, &as_slices(&data));
    let cold = old.group(ALL, g).unwrap();
    assert!(!cold.stages[0].duplicated);
    let pointer = pointer_of(cold);
    assert_eq!(pointer.no_words, 2);

    let mut table = restarted(&hw, cfg);
    let temp = table.llp_decode_group(ALL, &pointer).unwrap();
    let decoded = table.group(ALL, temp).unwrap();
    assert!(!decoded.stages[0].duplicated);
    assert_eq!(decoded.num_members, 110);
    assert_eq!(decoded.stages[0].usage(), cold.stages[0].usage());

    let s = Session(2);
    let ng = table.group_create(s, ALL, 10, 200).unwrap();
    let replayed = replay_members(&hw, &mut table, ng, 500, &data);
    table.ha_bind_group(ng, ALL, pointer.base().unwrap()).unwrap();
    let writes_before = hw.sink.instructions.lock().unwrap().len();

    let moves = table.ha_reconcile(s).unwrap();
    assert!(moves.is_empty());
    assert_eq!(hw.sink.instructions.lock().unwrap().len(), writes_before);
    table.verify_group(ALL, ng).unwrap();

    let group = table.group(ALL, ng).unwrap();
    assert_eq!(group.max_size, 200);
    for (i, m) in replayed.iter().enumerate() {
        let was = member(100 + i as u32);
        assert_eq!(group.stages[0].locations(*m), cold.stages[0].locations(was), "{}", m);
    }
    assert_eq!(table.stats().ha_handles_substituted, 110);
}

#[test]
fn test_spread_group_identical_replay() {
    assert_spread_restart_is_silent(&config(256));
}

#[test]
fn test_sequence_order_layout_identical_replay() {
    let mut cfg = config(256);
    cfg.sequence_order = true;
    assert_spread_restart_is_silent(&cfg);
}

#[test]
fn test_sequence_order_add_after_restart_appends() {
    let hw = MockHw::new();
    let mut cfg = config(256);
    cfg.sequence_order = true;
    let data = next_hops(110);
    let (old, g) = cold_boot(&hw, &cfg, 200, &as_slices(&data));
    let cold = old.group(ALL, g).unwrap();
    let pointer = pointer_of(cold);

    let mut table = restarted(&hw, &cfg);
    table.llp_decode_group(ALL, &pointer).unwrap();
    let ng = table.group_create(Session(2), ALL, 10, 200).unwrap();
    let mut wanted = data.clone();
    wanted.push(b"late".to_vec());
    let replayed = replay_members(&hw, &mut table, ng, 500, &wanted);
    table.ha_bind_group(ng, ALL, pointer.base().unwrap()).unwrap();

    let moves = table.ha_reconcile(Session(2)).unwrap();
    let late = replayed[110];
    assert_eq!(moves.len(), 1);
    assert_eq!(moves.nodes()[0].op, MoveOp::Add);
    assert_eq!(moves.nodes()[0].member, late);
    assert!(!moves.nodes()[0].replace);
    table.verify_group(ALL, ng).unwrap();

    let group = table.group(ALL, ng).unwrap();
    assert_eq!(group.placements(), 111);
    for (i, m) in replayed[..110].iter().enumerate() {
        assert_eq!(group.stages[0].locations(*m), cold.stages[0].locations(member(100 + i as u32)));
    }
}

#[test]
fn test_spread_group_delta_reuses_dropped_slots() {
    let hw = MockHw::new();
    let cfg = config(256);
    let data = next_hops(110);
    let (old, g) = cold_boot(&hw, &cfg, 200, &as_slices(&data));
    let pointer = pointer_of(old.group(ALL, g).unwrap());

    let mut table = restarted(&hw, &cfg);
    let temp = table.llp_decode_group(ALL, &pointer).unwrap();
    let s = Session(2);
    let ng = table.group_create(s, ALL, 10, 200).unwrap();
    // The first five next hops are gone, three new ones arrived.
    let mut wanted: Vec<Vec<u8>> = data[5..].to_vec();
    wanted.extend((0..3).map(|i| format!("new{}", i).into_bytes()));
    let replayed = replay_members(&hw, &mut table, ng, 500, &wanted);
    table.ha_bind_group(ng, ALL, pointer.base().unwrap()).unwrap();

    let moves = table.ha_reconcile(s).unwrap();
    let (kept, fresh) = replayed.split_at(105);
    let fresh_adds: Vec<_> = moves
        .iter()
        .filter(|n| n.op == MoveOp::Add && fresh.contains(&n.member))
        .collect();
    assert_eq!(fresh_adds.len(), 3);
    assert!(fresh_adds.iter().all(|n| n.replace));
    for m in kept {
        assert_eq!(net_placements(&moves, *m), 0, "{}", m);
    }
    let dropped: i64 = moves
        .iter()
        .filter(|n| n.member.is_temporary())
        .map(|n| placement_delta(n.op))
        .sum();
    assert_eq!(dropped, -5);

    table.verify_group(ALL, ng).unwrap();
    let group = table.group(ALL, ng).unwrap();
    assert!(!group.stages[0].duplicated);
    assert_eq!(group.placements(), 108);
    assert_eq!(group.members.keys().copied().collect::<Vec<_>>(), replayed);
    assert!(table.group(ALL, temp).is_err());
    assert_eq!(table.stats().ha_handles_substituted, 105);
}

#[test]
fn test_duplicated_two_word_group_disable_after_restart() {
    let hw = MockHw::new();
    let cfg = config(256);
    let data = next_hops(90);
    let (old, g) = cold_boot(&hw, &cfg, 200, &as_slices(&data));
    let cold = old.group(ALL, g).unwrap();
    assert!(cold.stages[0].duplicated);
    let pointer = pointer_of(cold);
    assert_eq!(pointer.no_words, 2);

    let mut table = restarted(&hw, &cfg);
    let temp = table.llp_decode_group(ALL, &pointer).unwrap();
    let decoded = table.group(ALL, temp).unwrap();
    assert!(decoded.stages[0].duplicated);
    assert_eq!(decoded.placements(), 90);
    assert!(decoded.members.values().all(|m| m.weight == 1));

    let s = Session(2);
    let ng = table.group_create(s, ALL, 10, 200).unwrap();
    let replayed = replay_members(&hw, &mut table, ng, 500, &data);
    let target = replayed[7];
    table.group_member_disable(s, ALL, ng, target).unwrap();
    table.ha_bind_group(ng, ALL, pointer.base().unwrap()).unwrap();

    let moves = table.ha_reconcile(s).unwrap();
    assert_eq!(moves.len(), 2);
    assert!(moves.iter().all(|n| n.op == MoveOp::Deactivate && n.member == target));
    let words: Vec<u32> = moves.iter().map(|n| n.logical_index).collect();
    assert_eq!(words, vec![0, 1]);
    table.verify_group(ALL, ng).unwrap();
    assert_eq!(table.group(ALL, ng).unwrap().num_active, 89);
}

#[test]
fn test_weighted_members_survive_restart() {
    let hw = MockHw::new();
    let cfg = config(64);
    let members = [(&b"A"[..], 2), (&b"B"[..], 1), (&b"C"[..], 3)];
    let (old, g) = cold_boot_weighted(&hw, &cfg, 16, &members);
    let pointer = pointer_of(old.group(ALL, g).unwrap());

    let mut table = restarted(&hw, &cfg);
    let temp = table.llp_decode_group(ALL, &pointer).unwrap();
    let decoded = table.group(ALL, temp).unwrap();
    let mut weights: Vec<u32> = decoded.members.values().map(|m| m.weight).collect();
    weights.sort_unstable();
    assert_eq!(weights, vec![1, 2, 3]);
    assert_eq!(decoded.placements(), 6);

    let s = Session(2);
    let ng = table.group_create(s, ALL, 10, 16).unwrap();
    let (a, b, c) = (member(600), member(601), member(602));
    for (m, d, weight) in [(a, b"A", 2), (b, b"B", 3), (c, b"C", 3)] {
        hw.adt.set_member_data(m, d);
        table.group_member_add(s, ALL, ng, m, weight, true, ACT).unwrap();
    }
    table.ha_bind_group(ng, ALL, pointer.base().unwrap()).unwrap();

    let moves = table.ha_reconcile(s).unwrap();
    assert_eq!(net_placements(&moves, a), 0);
    assert_eq!(net_placements(&moves, b), 2);
    assert_eq!(net_placements(&moves, c), 0);
    table.verify_group(ALL, ng).unwrap();

    let group = table.group(ALL, ng).unwrap();
    let weights: Vec<(MemberHandle, u32)> = group.members.values().map(|m| (m.handle, m.weight)).collect();
    assert_eq!(weights, vec![(a, 2), (b, 3), (c, 3)]);
    assert_eq!(group.placements(), 8);
    assert_eq!(table.stats().ha_handles_substituted, 3);
}
