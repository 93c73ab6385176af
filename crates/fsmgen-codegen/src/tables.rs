// Table compaction
//
// Per-state default spans and singles for the direct-jump shapes, the dense
// span arrays of the flat shape and the sorted search arrays of the table
// shape. Element types are chosen only after every value of an array is known.

use fsmgen_core::fsm::{RedFsm, RedState};
use fsmgen_core::keys::{IntType, KeyRange};
use fsmgen_core::{CondSpaceId, StateId, TransId};

use crate::CodegenError;
use crate::analysis::MachineFacts;
use crate::ir::ArrayId;

/// The transition covering the most keys of a state (ties go to the first
/// seen) and the ranges left once it is removed.
pub fn choose_default(state: &RedState) -> (Option<TransId>, Vec<(KeyRange, TransId)>) {
    let mut coverage: Vec<(TransId, i128)> = Vec::new();
    for &(range, t) in &state.ranges {
        match coverage.iter_mut().find(|(id, _)| *id == t) {
            Some((_, n)) => *n += range.span(),
            None => coverage.push((t, range.span())),
        }
    }
    let mut best: Option<(TransId, i128)> = None;
    for &(t, n) in &coverage {
        if best.is_none_or(|(_, b)| n > b) {
            best = Some((t, n));
        }
    }
    let default = best.map(|(t, _)| t);
    let ranges = state.ranges.iter().copied().filter(|&(_, t)| Some(t) != default).collect();
    (default, ranges)
}

/// Whether the range at `pos` can absorb the width-one ranges after it to
/// reach a following range with the same transition.
fn can_extend(list: &[(KeyRange, TransId)], pos: usize) -> bool {
    let extend = list[pos].1;
    let mut prev = pos;
    for next in pos + 1..list.len() {
        if list[prev].0.high as i128 + 1 != list[next].0.low as i128 {
            break;
        }
        if list[next].1 == extend {
            return true;
        }
        if list[next].0.span() > 1 {
            break;
        }
        prev = next;
    }
    false
}

/// Moves width-one ranges into a singles list. A range separated from an
/// identical one only by width-one ranges absorbs them; the absorbed keys stay
/// correct because singles are tested before ranges.
pub fn move_to_singles(
    mut ranges: Vec<(KeyRange, TransId)>,
) -> (Vec<(KeyRange, TransId)>, Vec<(i64, TransId)>) {
    let mut singles = Vec::new();
    let mut pos = 0;
    while pos < ranges.len() {
        if can_extend(&ranges, pos) {
            while ranges[pos].1 != ranges[pos + 1].1 {
                let (r, t) = ranges.remove(pos + 1);
                singles.push((r.low, t));
            }
            ranges[pos].0.high = ranges[pos + 1].0.high;
            ranges.remove(pos + 1);
        } else if ranges[pos].0.span() == 1 {
            let (r, t) = ranges.remove(pos);
            singles.push((r.low, t));
        } else {
            pos += 1;
        }
    }
    singles.sort_by_key(|&(k, _)| k);
    (ranges, singles)
}

/// Dispatch structure of one state in the direct-jump shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSpans {
    pub state: StateId,
    pub default: Option<TransId>,
    pub ranges: Vec<(KeyRange, TransId)>,
    pub singles: Vec<(i64, TransId)>,
}

impl StateSpans {
    pub fn build(state: &RedState) -> Self {
        let (default, ranges) = choose_default(state);
        let (ranges, singles) = move_to_singles(ranges);
        StateSpans { state: state.id, default, ranges, singles }
    }

    /// Singles first, then ranges, then the default.
    pub fn lookup(&self, key: i64) -> Option<TransId> {
        if let Some(&(_, t)) = self.singles.iter().find(|&&(k, _)| k == key) {
            return Some(t);
        }
        match self.ranges.iter().find(|(r, _)| r.contains(key)) {
            Some(&(_, t)) => Some(t),
            None => self.default,
        }
    }

    /// Every transition the state can take on a key.
    pub fn transitions(&self) -> impl Iterator<Item = TransId> + '_ {
        self.singles
            .iter()
            .map(|&(_, t)| t)
            .chain(self.ranges.iter().map(|&(_, t)| t))
            .chain(self.default)
    }
}

pub fn jump_tables(fsm: &RedFsm) -> Vec<StateSpans> {
    let spans: Vec<StateSpans> = fsm.states.iter().map(StateSpans::build).collect();
    log::debug!(
        "jump tables: {} ranges, {} singles",
        spans.iter().map(|s| s.ranges.len()).sum::<usize>(),
        spans.iter().map(|s| s.singles.len()).sum::<usize>()
    );
    spans
}

/// Per-state action arrays, indexed by state id. Values are `actListId + 1`,
/// zero meaning no action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateActions {
    pub to_state: Vec<i64>,
    pub from_state: Vec<i64>,
    pub eof: Vec<i64>,
}

impl StateActions {
    pub fn build(fsm: &RedFsm) -> Self {
        let enc = |a: Option<u32>| a.map_or(0, |id| id as i64 + 1);
        StateActions {
            to_state: fsm.states.iter().map(|s| enc(s.to_state_action)).collect(),
            from_state: fsm.states.iter().map(|s| enc(s.from_state_action)).collect(),
            eof: fsm.states.iter().map(|s| enc(s.eof_action)).collect(),
        }
    }

    /// The arrays a shape reading state actions through tables needs.
    pub fn arrays(&self, facts: &MachineFacts) -> Vec<(ArrayId, Vec<i64>)> {
        let mut out = Vec::new();
        if facts.any_to_state_actions {
            out.push((ArrayId::ToStateActions, self.to_state.clone()));
        }
        if facts.any_from_state_actions {
            out.push((ArrayId::FromStateActions, self.from_state.clone()));
        }
        if facts.any_eof_actions {
            out.push((ArrayId::EofActions, self.eof.clone()));
        }
        out
    }
}

/// Condition layer of the flat shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CondTables {
    /// Low/high key pair per state.
    pub keys: Vec<i64>,
    pub spans: Vec<i64>,
    pub offsets: Vec<i64>,
    /// Condition space id + 1 per key of each span, zero for none.
    pub spaces: Vec<i64>,
}

/// The flat parallel arrays, indexed by state id and transition id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatTables {
    pub trans_keys: Vec<i64>,
    pub key_spans: Vec<i64>,
    pub index_offsets: Vec<i64>,
    pub indicies: Vec<i64>,
    pub trans_targs: Vec<i64>,
    pub trans_actions: Vec<i64>,
    pub eof_trans: Vec<i64>,
    pub state_actions: StateActions,
    pub cond: Option<CondTables>,
}

/// Most index entries a dense span array may hold. Wider alphabets need the
/// table shape.
pub const FLAT_INDEX_LIMIT: i128 = 1 << 24;

/// Entries a dense span array needs: the `[low, high]` span of each list
/// plus `extra` slots per state.
fn dense_size<'a, T: 'a>(
    lists: impl Iterator<Item = &'a [(KeyRange, T)]>,
    extra: i128,
) -> i128 {
    lists
        .map(|list| match (list.first(), list.last()) {
            (Some(first), Some(last)) => KeyRange::new(first.0.low, last.0.high).span() + extra,
            _ => extra,
        })
        .sum()
}

fn check_dense(array: &'static str, entries: i128) -> Result<(), CodegenError> {
    if entries > FLAT_INDEX_LIMIT {
        return Err(CodegenError::TableTooLarge { array, entries, limit: FLAT_INDEX_LIMIT });
    }
    Ok(())
}

/// Appends the keys of `[low, high]` with holes filled by `hole`. Only called
/// once the total size has been checked, so every count fits in `usize`.
fn fill_span<T: Copy>(out: &mut Vec<i64>, list: &[(KeyRange, T)], value: impl Fn(T) -> i64, hole: i64) {
    let Some(first) = list.first() else { return };
    let mut next = first.0.low as i128;
    for &(range, item) in list {
        out.extend(std::iter::repeat_n(hole, (range.low as i128 - next) as usize));
        out.extend(std::iter::repeat_n(value(item), range.span() as usize));
        next = range.high as i128 + 1;
    }
}

impl FlatTables {
    pub fn build(fsm: &RedFsm) -> Result<Self, CodegenError> {
        let defaults: Vec<(Option<TransId>, Vec<(KeyRange, TransId)>)> =
            fsm.states.iter().map(choose_default).collect();
        check_dense("indicies", dense_size(defaults.iter().map(|(_, r)| r.as_slice()), 1))?;

        let mut t = FlatTables::default();
        for (state, (default, ranges)) in fsm.states.iter().zip(&defaults) {
            let default = default.map_or(0, |d| d as i64);
            t.index_offsets.push(t.indicies.len() as i64);
            match (ranges.first(), ranges.last()) {
                (Some(first), Some(last)) => {
                    let span = KeyRange::new(first.0.low, last.0.high);
                    t.trans_keys.extend([span.low, span.high]);
                    t.key_spans.push(span.span() as i64);
                    fill_span(&mut t.indicies, ranges, |id| id as i64, default);
                }
                _ => {
                    t.trans_keys.extend([0, 0]);
                    t.key_spans.push(0);
                }
            }
            t.indicies.push(default);
            t.eof_trans.push(state.eof_trans.map_or(0, |e| e as i64 + 1));
        }
        for trans in &fsm.transitions {
            t.trans_targs.push(trans.target as i64);
            t.trans_actions.push(trans.action.map_or(0, |a| a as i64 + 1));
        }
        t.state_actions = StateActions::build(fsm);
        if fsm.any_conditions() {
            t.cond = Some(build_cond_tables(fsm)?);
        }
        log::debug!(
            "flat tables: {} index entries over {} states",
            t.indicies.len(),
            fsm.state_count()
        );
        Ok(t)
    }

    /// Transition for a (possibly widened) key, read the way the flat shape
    /// reads the arrays.
    pub fn lookup(&self, state: StateId, key: i64) -> Option<TransId> {
        let s = state as usize;
        let span = *self.key_spans.get(s)?;
        let offset = *self.index_offsets.get(s)?;
        let low = *self.trans_keys.get(2 * s)?;
        let high = *self.trans_keys.get(2 * s + 1)?;
        let index = if span > 0 && low <= key && key <= high { key - low } else { span };
        self.indicies.get((offset + index) as usize).map(|&t| t as TransId)
    }

    /// Condition space applying to a raw key in a state.
    pub fn cond_space(&self, state: StateId, key: i64) -> Option<CondSpaceId> {
        let cond = self.cond.as_ref()?;
        let s = state as usize;
        let span = *cond.spans.get(s)?;
        let low = *cond.keys.get(2 * s)?;
        let high = *cond.keys.get(2 * s + 1)?;
        if span == 0 || key < low || key > high {
            return None;
        }
        let entry = *cond.spaces.get((cond.offsets.get(s)? + key - low) as usize)?;
        (entry > 0).then(|| (entry - 1) as CondSpaceId)
    }

    pub fn arrays(&self, facts: &MachineFacts) -> Vec<(ArrayId, Vec<i64>)> {
        let mut out = Vec::new();
        if let Some(cond) = &self.cond {
            out.push((ArrayId::CondKeys, cond.keys.clone()));
            out.push((ArrayId::CondKeySpans, cond.spans.clone()));
            out.push((ArrayId::CondSpaces, cond.spaces.clone()));
            out.push((ArrayId::CondOffsets, cond.offsets.clone()));
        }
        out.push((ArrayId::TransKeys, self.trans_keys.clone()));
        out.push((ArrayId::KeySpans, self.key_spans.clone()));
        out.push((ArrayId::IndexOffsets, self.index_offsets.clone()));
        out.push((ArrayId::Indicies, self.indicies.clone()));
        out.push((ArrayId::TransTargs, self.trans_targs.clone()));
        if facts.any_trans_actions {
            out.push((ArrayId::TransActions, self.trans_actions.clone()));
        }
        out.extend(self.state_actions.arrays(facts));
        if facts.any_eof_trans {
            out.push((ArrayId::EofTrans, self.eof_trans.clone()));
        }
        out
    }
}

fn cond_list(state: &RedState) -> Vec<(KeyRange, CondSpaceId)> {
    state.conds.iter().map(|sc| (sc.range, sc.space)).collect()
}

fn build_cond_tables(fsm: &RedFsm) -> Result<CondTables, CodegenError> {
    let lists: Vec<Vec<(KeyRange, CondSpaceId)>> = fsm.states.iter().map(cond_list).collect();
    check_dense("cond_spaces", dense_size(lists.iter().map(Vec::as_slice), 0))?;

    let mut c = CondTables::default();
    for list in &lists {
        c.offsets.push(c.spaces.len() as i64);
        match (list.first(), list.last()) {
            (Some(first), Some(last)) => {
                let span = KeyRange::new(first.0.low, last.0.high);
                c.keys.extend([span.low, span.high]);
                c.spans.push(span.span() as i64);
                fill_span(&mut c.spaces, list, |space| space as i64 + 1, 0);
            }
            _ => {
                c.keys.extend([0, 0]);
                c.spans.push(0);
            }
        }
    }
    Ok(c)
}

/// The sorted arrays of the table shape. Per state, `trans_keys` holds the
/// singles followed by the low/high pairs of the ranges, and `indicies` the
/// matching transitions followed by the default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchTables {
    pub key_offsets: Vec<i64>,
    pub trans_keys: Vec<i64>,
    pub single_lengths: Vec<i64>,
    pub range_lengths: Vec<i64>,
    pub index_offsets: Vec<i64>,
    pub indicies: Vec<i64>,
    pub trans_targs: Vec<i64>,
    pub trans_actions: Vec<i64>,
    pub eof_trans: Vec<i64>,
    pub state_actions: StateActions,
    pub cond: Option<CondSearch>,
}

/// Condition ranges of the table shape, searched like the transition ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CondSearch {
    /// First range of each state, counted in ranges.
    pub offsets: Vec<i64>,
    pub lengths: Vec<i64>,
    /// Low/high pair per range.
    pub keys: Vec<i64>,
    /// Condition space id + 1 per range.
    pub spaces: Vec<i64>,
}

impl SearchTables {
    pub fn build(fsm: &RedFsm, spans: &[StateSpans]) -> Self {
        let mut t = SearchTables::default();
        for (state, sp) in fsm.states.iter().zip(spans) {
            t.key_offsets.push(t.trans_keys.len() as i64);
            t.index_offsets.push(t.indicies.len() as i64);
            t.single_lengths.push(sp.singles.len() as i64);
            t.range_lengths.push(sp.ranges.len() as i64);
            for &(key, id) in &sp.singles {
                t.trans_keys.push(key);
                t.indicies.push(id as i64);
            }
            for &(range, id) in &sp.ranges {
                t.trans_keys.extend([range.low, range.high]);
                t.indicies.push(id as i64);
            }
            t.indicies.push(sp.default.map_or(0, |d| d as i64));
            t.eof_trans.push(state.eof_trans.map_or(0, |e| e as i64 + 1));
        }
        for trans in &fsm.transitions {
            t.trans_targs.push(trans.target as i64);
            t.trans_actions.push(trans.action.map_or(0, |a| a as i64 + 1));
        }
        t.state_actions = StateActions::build(fsm);
        if fsm.any_conditions() {
            let mut c = CondSearch::default();
            for state in &fsm.states {
                c.offsets.push(c.spaces.len() as i64);
                c.lengths.push(state.conds.len() as i64);
                for sc in &state.conds {
                    c.keys.extend([sc.range.low, sc.range.high]);
                    c.spaces.push(sc.space as i64 + 1);
                }
            }
            t.cond = Some(c);
        }
        log::debug!(
            "search tables: {} keys, {} index entries over {} states",
            t.trans_keys.len(),
            t.indicies.len(),
            fsm.state_count()
        );
        t
    }

    /// Transition for a (possibly widened) key, searched the way the table
    /// shape searches: singles, then ranges, then the default slot.
    pub fn lookup(&self, state: StateId, key: i64) -> Option<TransId> {
        let s = state as usize;
        let keys = *self.key_offsets.get(s)? as usize;
        let mut trans = *self.index_offsets.get(s)? as usize;
        let singles = *self.single_lengths.get(s)? as usize;
        let ranges = *self.range_lengths.get(s)? as usize;

        let single_keys = self.trans_keys.get(keys..keys + singles)?;
        if let Ok(i) = single_keys.binary_search(&key) {
            return self.indicies.get(trans + i).map(|&t| t as TransId);
        }
        trans += singles;
        let pairs = self.trans_keys.get(keys + singles..keys + singles + 2 * ranges)?;
        let hit = pairs.chunks_exact(2).position(|pair| pair[0] <= key && key <= pair[1]);
        let slot = trans + hit.unwrap_or(ranges);
        self.indicies.get(slot).map(|&t| t as TransId)
    }

    /// Condition space applying to a raw key in a state.
    pub fn cond_space(&self, state: StateId, key: i64) -> Option<CondSpaceId> {
        let cond = self.cond.as_ref()?;
        let s = state as usize;
        let first = *cond.offsets.get(s)? as usize;
        let len = *cond.lengths.get(s)? as usize;
        (first..first + len).find_map(|k| {
            let (low, high) = (*cond.keys.get(2 * k)?, *cond.keys.get(2 * k + 1)?);
            let space = *cond.spaces.get(k)?;
            (low <= key && key <= high).then(|| (space - 1) as CondSpaceId)
        })
    }

    pub fn arrays(&self, facts: &MachineFacts) -> Vec<(ArrayId, Vec<i64>)> {
        let mut out = Vec::new();
        if let Some(cond) = &self.cond {
            out.push((ArrayId::CondOffsets, cond.offsets.clone()));
            out.push((ArrayId::CondLengths, cond.lengths.clone()));
            out.push((ArrayId::CondKeys, cond.keys.clone()));
            out.push((ArrayId::CondSpaces, cond.spaces.clone()));
        }
        out.push((ArrayId::KeyOffsets, self.key_offsets.clone()));
        out.push((ArrayId::TransKeys, self.trans_keys.clone()));
        out.push((ArrayId::SingleLengths, self.single_lengths.clone()));
        out.push((ArrayId::RangeLengths, self.range_lengths.clone()));
        out.push((ArrayId::IndexOffsets, self.index_offsets.clone()));
        out.push((ArrayId::Indicies, self.indicies.clone()));
        out.push((ArrayId::TransTargs, self.trans_targs.clone()));
        if facts.any_trans_actions {
            out.push((ArrayId::TransActions, self.trans_actions.clone()));
        }
        out.extend(self.state_actions.arrays(facts));
        if facts.any_eof_trans {
            out.push((ArrayId::EofTrans, self.eof_trans.clone()));
        }
        out
    }
}

/// The first type of `types` that holds every value of an array.
pub fn select_int_type(
    types: &[IntType],
    array: &'static str,
    values: &[i64],
) -> Result<IntType, CodegenError> {
    let min = values.iter().copied().min().unwrap_or(0);
    let max = values.iter().copied().max().unwrap_or(0);
    types
        .iter()
        .copied()
        .find(|t| t.holds(min as i128, max as i128))
        .ok_or(CodegenError::NoIntType { array, min, max })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsmgen_core::action::{Action, InlineItem};
    use fsmgen_core::builder::FsmBuilder;

    fn r(low: u8, high: u8) -> KeyRange {
        KeyRange::new(low as i64, high as i64)
    }

    fn mixed() -> RedFsm {
        let mut b = FsmBuilder::new(IntType::U8);
        b.ensure_states(4);
        b.set_start(0);
        let act = b.add_action(Action::new(vec![InlineItem::text("x++;")]));
        b.add_transition(0, r(b'a', b'c'), 1, &[]);
        b.add_transition(0, r(b'd', b'd'), 2, &[]);
        b.add_transition(0, r(b'e', b'e'), 1, &[]);
        b.add_transition(0, r(b'f', b'g'), 3, &[act]);
        b.add_transition(0, r(b'z', b'z'), 2, &[]);
        b.set_default(1, 0, &[]);
        b.add_transition(1, r(b'0', b'9'), 1, &[act]);
        b.add_transition(2, r(0, 255), 2, &[]);
        b.set_final(3, true);
        b.build().unwrap()
    }

    #[test]
    fn default_is_widest_transition() {
        let fsm = mixed();
        let state = fsm.state(0);
        let (default, ranges) = choose_default(state);
        let err = fsm.lookup(0, 0).unwrap();
        assert_eq!(default, Some(err));
        assert!(ranges.iter().all(|&(_, t)| t != err));
        assert_eq!(ranges.len(), 5);

        // A state with one transition has no ranges left.
        let (d2, r2) = choose_default(fsm.state(2));
        assert!(d2.is_some());
        assert!(r2.is_empty());
    }

    #[test]
    fn default_ties_go_to_first_seen() {
        let mut b = FsmBuilder::new(IntType::U8);
        b.ensure_states(3);
        b.set_start(0);
        b.add_transition(0, r(0, 127), 1, &[]);
        b.add_transition(0, r(128, 255), 2, &[]);
        b.set_default(1, 1, &[]);
        b.set_default(2, 2, &[]);
        let fsm = b.build().unwrap();
        let (default, _) = choose_default(fsm.state(0));
        assert_eq!(default, fsm.lookup(0, 0));
    }

    #[test]
    fn singles_are_absorbed_between_equal_ranges() {
        let ranges = vec![(r(b'a', b'c'), 1), (r(b'd', b'd'), 2), (r(b'e', b'e'), 1), (r(b'f', b'g'), 3)];
        let (ranges, singles) = move_to_singles(ranges);
        assert_eq!(ranges, vec![(r(b'a', b'e'), 1), (r(b'f', b'g'), 3)]);
        assert_eq!(singles, vec![(b'd' as i64, 2)]);

        let (ranges, singles) = move_to_singles(vec![(r(1, 1), 4), (r(5, 9), 4), (r(12, 12), 5)]);
        assert_eq!(ranges, vec![(r(5, 9), 4)]);
        assert_eq!(singles, vec![(1, 4), (12, 5)]);
    }

    #[test]
    fn compacted_lookups_match_linear_scan() {
        let fsm = mixed();
        let flat = FlatTables::build(&fsm).unwrap();
        let spans = jump_tables(&fsm);
        let search = SearchTables::build(&fsm, &spans);
        for state in &fsm.states {
            for key in 0..=255 {
                let naive = fsm.lookup(state.id, key);
                assert_eq!(flat.lookup(state.id, key), naive, "flat: state {} key {key}", state.id);
                assert_eq!(spans[state.id as usize].lookup(key), naive, "jump: state {} key {key}", state.id);
                assert_eq!(search.lookup(state.id, key), naive, "search: state {} key {key}", state.id);
            }
        }
    }

    #[test]
    fn flat_layout_offsets() {
        let fsm = mixed();
        let flat = FlatTables::build(&fsm).unwrap();
        assert_eq!(flat.key_spans.len(), fsm.state_count());
        assert_eq!(flat.trans_keys.len(), 2 * fsm.state_count());
        let mut expect = 0;
        for (s, &span) in flat.key_spans.iter().enumerate() {
            assert_eq!(flat.index_offsets[s], expect);
            expect += span + 1;
        }
        assert_eq!(flat.indicies.len() as i64, expect);
        // State 0 spans 'a'..='z'.
        assert_eq!(&flat.trans_keys[0..2], &[b'a' as i64, b'z' as i64]);
        assert!(flat.cond.is_none());
        assert!(flat.trans_actions.iter().any(|&a| a == 1));
    }

    #[test]
    fn cond_layer_maps_raw_keys_to_spaces() {
        let mut b = FsmBuilder::new(IntType::U8);
        b.ensure_states(2);
        b.set_start(0);
        let c = b.add_action(Action::new(vec![InlineItem::text("ok")]));
        let space = b.add_cond_space(256, &[c]);
        b.add_state_cond(0, r(b'a', b'b'), space);
        b.add_state_cond(0, r(b'x', b'x'), space);
        b.set_default(0, 0, &[]);
        b.set_default(1, 1, &[]);
        let fsm = b.build().unwrap();
        let flat = FlatTables::build(&fsm).unwrap();
        assert_eq!(flat.cond_space(0, b'a' as i64), Some(space));
        assert_eq!(flat.cond_space(0, b'c' as i64), None);
        assert_eq!(flat.cond_space(0, b'x' as i64), Some(space));
        assert_eq!(flat.cond_space(1, b'a' as i64), None);
        let cond = flat.cond.as_ref().unwrap();
        assert_eq!(cond.spans, vec![(b'x' - b'a' + 1) as i64, 0]);

        let search = SearchTables::build(&fsm, &jump_tables(&fsm));
        for key in 0..=255 {
            assert_eq!(search.cond_space(0, key), flat.cond_space(0, key), "key {key}");
        }
        let cond = search.cond.unwrap();
        assert_eq!(cond.lengths, vec![2, 0]);
        assert_eq!(cond.keys, vec![b'a' as i64, b'b' as i64, b'x' as i64, b'x' as i64]);
    }

    #[test]
    fn search_layout_puts_singles_before_ranges() {
        let fsm = mixed();
        let spans = jump_tables(&fsm);
        let search = SearchTables::build(&fsm, &spans);
        let s0 = &spans[0];
        assert_eq!(search.single_lengths[0], s0.singles.len() as i64);
        assert_eq!(search.range_lengths[0], s0.ranges.len() as i64);
        let singles = s0.singles.len();
        let keys: Vec<i64> = s0.singles.iter().map(|&(k, _)| k).collect();
        assert_eq!(&search.trans_keys[..singles], keys.as_slice());
        assert_eq!(search.trans_keys[singles], s0.ranges[0].0.low);
        // One slot per single and range plus the default, for every state.
        let slots: i64 = spans.iter().map(|sp| (sp.singles.len() + sp.ranges.len() + 1) as i64).sum();
        assert_eq!(search.indicies.len() as i64, slots);
        assert_eq!(search.index_offsets[1], (singles + s0.ranges.len() + 1) as i64);
    }

    #[test]
    fn dense_spans_past_the_limit_are_refused() {
        // Keys only at the two ends of a 32-bit alphabet.
        let mut b = FsmBuilder::new(IntType::U32);
        b.ensure_states(2);
        b.set_start(0);
        b.add_transition(0, KeyRange::single(0), 1, &[]);
        b.add_transition(0, KeyRange::single(u32::MAX as i64), 1, &[]);
        b.set_default(0, 0, &[]);
        b.set_default(1, 1, &[]);
        let fsm = b.build().unwrap();
        let err = FlatTables::build(&fsm).unwrap_err();
        assert!(matches!(
            err,
            CodegenError::TableTooLarge { array: "indicies", entries, limit: FLAT_INDEX_LIMIT }
                if entries == u32::MAX as i128 + 1 + 2
        ));

        // The sorted arrays stay small.
        let search = SearchTables::build(&fsm, &jump_tables(&fsm));
        assert_eq!(search.trans_keys, vec![0, u32::MAX as i64]);
        assert_eq!(search.lookup(0, u32::MAX as i64), fsm.lookup(0, u32::MAX as i64));
        assert_eq!(search.lookup(0, 77), fsm.lookup(0, 77));
    }

    #[test]
    fn full_width_spans_do_not_overflow() {
        let mut b = FsmBuilder::new(IntType::I64);
        b.ensure_states(3);
        b.set_start(0);
        b.add_transition(0, KeyRange::new(i64::MIN, -1), 0, &[]);
        b.add_transition(0, KeyRange::single(0), 1, &[]);
        b.add_transition(0, KeyRange::new(1, i64::MAX), 2, &[]);
        for s in 1..3 {
            b.set_default(s, s, &[]);
        }
        let fsm = b.build().unwrap();
        let err = FlatTables::build(&fsm).unwrap_err();
        // One span of 2^63 keys for state 0, one default slot per state.
        assert!(matches!(err, CodegenError::TableTooLarge { entries, .. } if entries == (1i128 << 63) + 3));
    }

    #[test]
    fn type_selection_takes_first_fit() {
        let all = IntType::STANDARD;
        assert_eq!(select_int_type(&all, "a", &[0, 200]).unwrap(), IntType::U8);
        assert_eq!(select_int_type(&all, "a", &[-1, 200]).unwrap(), IntType::I16);
        assert_eq!(select_int_type(&all, "a", &[]).unwrap(), IntType::I8);
        let narrow = [IntType::I8, IntType::U8];
        assert_eq!(
            select_int_type(&narrow, "indicies", &[0, 300]),
            Err(CodegenError::NoIntType { array: "indicies", min: 0, max: 300 })
        );
    }
}
