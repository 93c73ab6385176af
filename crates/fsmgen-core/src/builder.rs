// Validating automaton construction
//
// Stands in for the front end: collects states, ranges and actions, merges
// structurally identical actions and action lists, shares transitions per
// (target, action list) pair and completes every state's transition function
// over the key domain.

use hashbrown::HashMap;

use crate::action::{Action, InlineItem};
use crate::fsm::{ActionTable, CondSpace, RedFsm, RedState, RedTrans, StateCond};
use crate::keys::{IntType, KeyRange};
use crate::{ActListId, ActionId, BuildFailure, CondSpaceId, ModelError, StateId, TransId};

#[derive(Debug, Clone, Default)]
struct StateDraft {
    ranges: Vec<(KeyRange, StateId, Vec<ActionId>)>,
    default: Option<(StateId, Vec<ActionId>)>,
    conds: Vec<StateCond>,
    to_state: Vec<ActionId>,
    from_state: Vec<ActionId>,
    eof: Vec<ActionId>,
    eof_trans: Option<(StateId, Vec<ActionId>)>,
    is_final: bool,
}

/// Incremental builder for [`RedFsm`].
///
/// Setters that name an unknown state record the problem; [`FsmBuilder::build`]
/// reports it together with every other problem it finds.
#[derive(Debug, Clone)]
pub struct FsmBuilder {
    alphabet: IntType,
    states: Vec<StateDraft>,
    actions: Vec<Action>,
    action_index: HashMap<Vec<InlineItem>, ActionId>,
    cond_spaces: Vec<CondSpace>,
    start: Option<StateId>,
    error: Option<StateId>,
    entry_points: Vec<(String, StateId)>,
    exports: Vec<(String, i64)>,
    problems: Vec<ModelError>,
}

impl FsmBuilder {
    pub fn new(alphabet: IntType) -> Self {
        Self {
            alphabet,
            states: Vec::new(),
            actions: Vec::new(),
            action_index: HashMap::new(),
            cond_spaces: Vec::new(),
            start: None,
            error: None,
            entry_points: Vec::new(),
            exports: Vec::new(),
            problems: Vec::new(),
        }
    }

    pub fn add_state(&mut self) -> StateId {
        self.states.push(StateDraft::default());
        (self.states.len() - 1) as StateId
    }

    /// Adds states until there are at least `count`.
    pub fn ensure_states(&mut self, count: usize) {
        while self.states.len() < count {
            self.add_state();
        }
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    fn draft(&mut self, state: StateId) -> Option<&mut StateDraft> {
        if (state as usize) < self.states.len() {
            self.states.get_mut(state as usize)
        } else {
            self.problems.push(ModelError::UnknownState(state));
            None
        }
    }

    pub fn set_start(&mut self, state: StateId) {
        self.start = Some(state);
    }

    pub fn set_error(&mut self, state: StateId) {
        self.error = Some(state);
    }

    pub fn set_final(&mut self, state: StateId, is_final: bool) {
        if let Some(d) = self.draft(state) {
            d.is_final = is_final;
        }
    }

    /// Registers an action and returns its id. Structurally identical item
    /// lists share one id; the first registration's name and location win.
    pub fn add_action(&mut self, action: Action) -> ActionId {
        if let Some(&id) = self.action_index.get(&action.items) {
            return id;
        }
        let id = self.actions.len() as ActionId;
        self.action_index.insert(action.items.clone(), id);
        self.actions.push(action);
        id
    }

    pub fn add_transition(&mut self, from: StateId, range: KeyRange, to: StateId, actions: &[ActionId]) {
        if let Some(d) = self.draft(from) {
            d.ranges.push((range, to, actions.to_vec()));
        }
    }

    /// Transition taken for keys no explicit range covers.
    pub fn set_default(&mut self, from: StateId, to: StateId, actions: &[ActionId]) {
        if let Some(d) = self.draft(from) {
            d.default = Some((to, actions.to_vec()));
        }
    }

    pub fn set_to_state_actions(&mut self, state: StateId, actions: &[ActionId]) {
        if let Some(d) = self.draft(state) {
            d.to_state = actions.to_vec();
        }
    }

    pub fn set_from_state_actions(&mut self, state: StateId, actions: &[ActionId]) {
        if let Some(d) = self.draft(state) {
            d.from_state = actions.to_vec();
        }
    }

    pub fn set_eof_actions(&mut self, state: StateId, actions: &[ActionId]) {
        if let Some(d) = self.draft(state) {
            d.eof = actions.to_vec();
        }
    }

    pub fn set_eof_transition(&mut self, state: StateId, to: StateId, actions: &[ActionId]) {
        if let Some(d) = self.draft(state) {
            d.eof_trans = Some((to, actions.to_vec()));
        }
    }

    pub fn add_cond_space(&mut self, base_key: i64, conditions: &[ActionId]) -> CondSpaceId {
        let id = self.cond_spaces.len() as CondSpaceId;
        self.cond_spaces.push(CondSpace { id, base_key, conditions: conditions.to_vec() });
        id
    }

    pub fn add_state_cond(&mut self, state: StateId, range: KeyRange, space: CondSpaceId) {
        if let Some(d) = self.draft(state) {
            d.conds.push(StateCond { range, space });
        }
    }

    pub fn add_entry_point(&mut self, name: impl Into<String>, state: StateId) {
        self.entry_points.push((name.into(), state));
    }

    pub fn add_export(&mut self, name: impl Into<String>, key: i64) {
        self.exports.push((name.into(), key));
    }

    /// Validates the collected machine and produces the reduced automaton.
    /// A rejected machine reports every problem found, in discovery order.
    pub fn build(mut self) -> Result<RedFsm, BuildFailure> {
        let mut problems = std::mem::take(&mut self.problems);
        if self.start.is_none() {
            problems.push(ModelError::NoStartState);
        }
        self.check_references(&mut problems);

        let min_key = self.alphabet.min_value();
        let max_key = self.key_domain_max(&mut problems);
        for (id, draft) in self.states.iter_mut().enumerate() {
            check_ranges(id as StateId, draft, min_key, max_key, &mut problems);
        }
        let (Some(start), true) = (self.start, problems.is_empty()) else {
            log::debug!("machine rejected with {} problem(s)", problems.len());
            return Err(BuildFailure { problems });
        };

        let needs_error = self
            .states
            .iter()
            .any(|d| d.default.is_none() && has_gap(&d.ranges, min_key, max_key));
        let error = match self.error {
            Some(e) => Some(e),
            None if needs_error => Some(self.add_state()),
            None => None,
        };

        let mut tables = TableInterner::default();
        let mut trans = TransInterner::default();
        let mut states = Vec::with_capacity(self.states.len());

        for (id, draft) in self.states.iter().enumerate() {
            let id = id as StateId;
            let mut gap_trans: Option<TransId> = None;
            let mut fill = |tables: &mut TableInterner, trans: &mut TransInterner| -> TransId {
                *gap_trans.get_or_insert_with(|| match &draft.default {
                    Some((to, acts)) => {
                        let table = tables.intern(acts);
                        trans.intern(*to, table)
                    }
                    // An error state exists whenever a default-less state has a gap.
                    None => trans.intern(error.unwrap_or(id), None),
                })
            };

            let mut ranges: Vec<(KeyRange, TransId)> = Vec::new();
            let mut next = min_key;
            for (range, to, acts) in &draft.ranges {
                if (range.low as i128) > next {
                    let t = fill(&mut tables, &mut trans);
                    push_merged(&mut ranges, KeyRange::new(next as i64, range.low - 1), t);
                }
                let table = tables.intern(acts);
                let t = trans.intern(*to, table);
                push_merged(&mut ranges, *range, t);
                next = range.high as i128 + 1;
            }
            if next <= max_key {
                let t = fill(&mut tables, &mut trans);
                push_merged(&mut ranges, KeyRange::new(next as i64, max_key as i64), t);
            }

            let eof_trans = draft.eof_trans.as_ref().map(|(to, acts)| {
                let table = tables.intern(acts);
                trans.intern(*to, table)
            });

            let mut conds = draft.conds.clone();
            conds.sort_by_key(|c| c.range.low);

            states.push(RedState {
                id,
                ranges,
                conds,
                to_state_action: tables.intern(&draft.to_state),
                from_state_action: tables.intern(&draft.from_state),
                eof_action: tables.intern(&draft.eof),
                eof_trans,
                is_final: draft.is_final,
            });
        }

        let mut tables = tables.tables;
        for t in &trans.list {
            if let Some(a) = t.action {
                tables[a as usize].refs.transitions += 1;
            }
        }
        for s in &states {
            if let Some(a) = s.to_state_action {
                tables[a as usize].refs.to_state += 1;
            }
            if let Some(a) = s.from_state_action {
                tables[a as usize].refs.from_state += 1;
            }
            if let Some(a) = s.eof_action {
                tables[a as usize].refs.eof += 1;
            }
        }

        Ok(RedFsm {
            alphabet: self.alphabet,
            states,
            transitions: trans.list,
            actions: self.actions,
            tables,
            cond_spaces: self.cond_spaces,
            start,
            error,
            entry_points: self.entry_points,
            exports: self.exports,
            max_key: max_key as i64,
        })
    }

    fn check_references(&self, problems: &mut Vec<ModelError>) {
        let n = self.states.len() as StateId;
        let na = self.actions.len() as ActionId;
        let ns = self.cond_spaces.len() as CondSpaceId;
        let state = |problems: &mut Vec<ModelError>, s: StateId| {
            if s >= n {
                problems.push(ModelError::UnknownState(s));
            }
        };
        let actions = |problems: &mut Vec<ModelError>, list: &[ActionId]| {
            problems.extend(list.iter().filter(|&&a| a >= na).map(|&a| ModelError::UnknownAction(a)));
        };

        for s in self.start.iter().chain(&self.error) {
            state(problems, *s);
        }
        let mut names: Vec<&str> = Vec::new();
        for (name, s) in &self.entry_points {
            state(problems, *s);
            if names.contains(&name.as_str()) {
                problems.push(ModelError::DuplicateEntryPoint(name.clone()));
            }
            names.push(name.as_str());
        }
        for space in &self.cond_spaces {
            actions(problems, &space.conditions);
        }
        for d in &self.states {
            let targets = d.ranges.iter().map(|(_, to, acts)| (to, acts));
            let extra = d.default.iter().chain(&d.eof_trans).map(|(to, acts)| (to, acts));
            for (to, acts) in targets.chain(extra) {
                state(problems, *to);
                actions(problems, acts);
            }
            actions(problems, &d.to_state);
            actions(problems, &d.from_state);
            actions(problems, &d.eof);
            problems.extend(
                d.conds.iter().filter(|c| c.space >= ns).map(|c| ModelError::UnknownCondSpace(c.space)),
            );
        }
    }

    /// Highest key of the domain: the alphabet maximum, raised by any
    /// condition space's widened keys.
    fn key_domain_max(&self, problems: &mut Vec<ModelError>) -> i128 {
        let mut max = self.alphabet.max_value().min(i64::MAX as i128);
        let size = self.alphabet.size();
        for space in &self.cond_spaces {
            let widened = 1i128
                .checked_shl(space.conditions.len() as u32)
                .and_then(|combos| combos.checked_mul(size))
                .map(|n| space.base_key as i128 + n - 1)
                .filter(|&top| top <= i64::MAX as i128);
            match widened {
                Some(top) => max = max.max(top),
                None => problems.push(ModelError::KeyDomainOverflow { space: space.id }),
            }
        }
        max
    }
}

fn check_ranges(id: StateId, draft: &mut StateDraft, min: i128, max: i128, problems: &mut Vec<ModelError>) {
    draft.ranges.sort_by_key(|r| r.0.low);
    let mut prev_high: Option<i64> = None;
    for (range, _, _) in &draft.ranges {
        if range.low > range.high {
            problems.push(ModelError::InvertedRange { state: id, low: range.low, high: range.high });
            continue;
        }
        if (range.low as i128) < min {
            problems.push(ModelError::KeyOutOfRange { state: id, key: range.low });
        }
        if (range.high as i128) > max {
            problems.push(ModelError::KeyOutOfRange { state: id, key: range.high });
        }
        if prev_high.is_some_and(|h| h >= range.low) {
            problems.push(ModelError::OverlappingRanges { state: id, key: range.low });
        }
        prev_high = Some(prev_high.map_or(range.high, |h| h.max(range.high)));
    }
}

fn has_gap(ranges: &[(KeyRange, StateId, Vec<ActionId>)], min: i128, max: i128) -> bool {
    let mut next = min;
    for (range, _, _) in ranges {
        if (range.low as i128) > next {
            return true;
        }
        next = range.high as i128 + 1;
    }
    next <= max
}

fn push_merged(ranges: &mut Vec<(KeyRange, TransId)>, range: KeyRange, t: TransId) {
    match ranges.last_mut() {
        Some((last, lt)) if *lt == t && last.high as i128 + 1 == range.low as i128 => {
            last.high = range.high;
        }
        _ => ranges.push((range, t)),
    }
}

#[derive(Default)]
struct TableInterner {
    index: HashMap<Vec<ActionId>, ActListId>,
    tables: Vec<ActionTable>,
}

impl TableInterner {
    fn intern(&mut self, actions: &[ActionId]) -> Option<ActListId> {
        if actions.is_empty() {
            return None;
        }
        if let Some(&id) = self.index.get(actions) {
            return Some(id);
        }
        let id = self.tables.len() as ActListId;
        self.index.insert(actions.to_vec(), id);
        self.tables.push(ActionTable { id, actions: actions.to_vec(), refs: Default::default() });
        Some(id)
    }
}

#[derive(Default)]
struct TransInterner {
    index: HashMap<(StateId, Option<ActListId>), TransId>,
    list: Vec<RedTrans>,
}

impl TransInterner {
    fn intern(&mut self, target: StateId, action: Option<ActListId>) -> TransId {
        if let Some(&id) = self.index.get(&(target, action)) {
            return id;
        }
        let id = self.list.len() as TransId;
        self.index.insert((target, action), id);
        self.list.push(RedTrans { id, target, action });
        id
    }
}
