// The reduced automaton aggregate

use crate::action::{Action, ItemFlags};
use crate::keys::{IntType, KeyRange};
use crate::{ActListId, ActionId, CondSpaceId, StateId, TransId};

/// A shared transition: one object per distinct `(target, action list)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedTrans {
    pub id: TransId,
    pub target: StateId,
    pub action: Option<ActListId>,
}

/// How many states and transitions reference an action table, per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableRefs {
    pub transitions: u32,
    pub to_state: u32,
    pub from_state: u32,
    pub eof: u32,
}

/// A deduplicated action list. Sites sharing an `id` execute identical code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTable {
    pub id: ActListId,
    pub actions: Vec<ActionId>,
    pub refs: TableRefs,
}

/// A set of conditions evaluated together to widen a raw key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondSpace {
    pub id: CondSpaceId,
    /// First widened key of the space.
    pub base_key: i64,
    /// Condition actions; condition `i` contributes `(1 << i) * alphabet size`.
    pub conditions: Vec<ActionId>,
}

/// Raw keys of `range` are widened through condition space `space`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateCond {
    pub range: KeyRange,
    pub space: CondSpaceId,
}

/// A state of the reduced automaton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedState {
    pub id: StateId,
    /// Sorted, disjoint ranges covering the whole key domain.
    pub ranges: Vec<(KeyRange, TransId)>,
    /// Sorted, disjoint condition ranges over raw keys.
    pub conds: Vec<StateCond>,
    pub to_state_action: Option<ActListId>,
    pub from_state_action: Option<ActListId>,
    pub eof_action: Option<ActListId>,
    pub eof_trans: Option<TransId>,
    pub is_final: bool,
}

/// The reduced automaton handed to code generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedFsm {
    pub alphabet: IntType,
    /// Indexed by state id.
    pub states: Vec<RedState>,
    /// Indexed by transition id.
    pub transitions: Vec<RedTrans>,
    /// Indexed by action id.
    pub actions: Vec<Action>,
    /// Indexed by action list id.
    pub tables: Vec<ActionTable>,
    /// Indexed by condition space id.
    pub cond_spaces: Vec<CondSpace>,
    pub start: StateId,
    pub error: Option<StateId>,
    pub entry_points: Vec<(String, StateId)>,
    /// User-declared key constants.
    pub exports: Vec<(String, i64)>,
    /// Highest key of the key domain, past the alphabet when conditions widen keys.
    pub max_key: i64,
}

impl RedFsm {
    pub fn state(&self, id: StateId) -> &RedState {
        &self.states[id as usize]
    }

    pub fn trans(&self, id: TransId) -> &RedTrans {
        &self.transitions[id as usize]
    }

    pub fn table(&self, id: ActListId) -> &ActionTable {
        &self.tables[id as usize]
    }

    pub fn action(&self, id: ActionId) -> &Action {
        &self.actions[id as usize]
    }

    pub fn cond_space(&self, id: CondSpaceId) -> &CondSpace {
        &self.cond_spaces[id as usize]
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Lowest key of the key domain.
    pub fn min_key(&self) -> i64 {
        self.alphabet.min_value() as i64
    }

    /// Lowest id of a final state, or the state count when no state is final.
    pub fn first_final(&self) -> StateId {
        self.states
            .iter()
            .filter(|s| s.is_final)
            .map(|s| s.id)
            .min()
            .unwrap_or(self.states.len() as StateId)
    }

    /// Actions of a table, in execution order.
    pub fn table_actions(&self, id: ActListId) -> impl Iterator<Item = &Action> {
        self.table(id).actions.iter().map(move |&a| self.action(a))
    }

    /// Union of the item flags of every action in a table.
    pub fn table_flags(&self, id: ActListId) -> ItemFlags {
        self.table_actions(id)
            .fold(ItemFlags::default(), |acc, a| acc.union(a.flags()))
    }

    /// The transition taken from `state` on `key`, by linear scan.
    pub fn lookup(&self, state: StateId, key: i64) -> Option<TransId> {
        self.state(state)
            .ranges
            .iter()
            .find(|(range, _)| range.contains(key))
            .map(|&(_, t)| t)
    }

    pub fn any_conditions(&self) -> bool {
        self.states.iter().any(|s| !s.conds.is_empty())
    }

    pub fn entry_point(&self, name: &str) -> Option<StateId> {
        self.entry_points.iter().find(|(n, _)| n == name).map(|&(_, s)| s)
    }
}
