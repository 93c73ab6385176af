// Machine-wide predicates, state ordering and reference validation
//
// Everything here runs before lowering starts; shapes only read the results.

use fsmgen_core::action::ItemFlags;
use fsmgen_core::fsm::RedFsm;
use fsmgen_core::{ActionId, StateId};

use crate::CodegenError;
use crate::diagnostics::Diagnostics;
use crate::shape::Shape;

/// Which optional features a machine uses. Each `false` lets the shapes skip a
/// whole block of emitted code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MachineFacts {
    pub any_trans_actions: bool,
    pub any_to_state_actions: bool,
    pub any_from_state_actions: bool,
    pub any_eof_actions: bool,
    pub any_eof_trans: bool,
    pub any_conditions: bool,
    /// Union of the item flags of every action table.
    pub flags: ItemFlags,
}

impl MachineFacts {
    pub fn of(fsm: &RedFsm) -> Self {
        let flags = fsm
            .tables
            .iter()
            .fold(ItemFlags::default(), |acc, t| acc.union(fsm.table_flags(t.id)));
        MachineFacts {
            any_trans_actions: fsm.transitions.iter().any(|t| t.action.is_some()),
            any_to_state_actions: fsm.states.iter().any(|s| s.to_state_action.is_some()),
            any_from_state_actions: fsm.states.iter().any(|s| s.from_state_action.is_some()),
            any_eof_actions: fsm.states.iter().any(|s| s.eof_action.is_some()),
            any_eof_trans: fsm.states.iter().any(|s| s.eof_trans.is_some()),
            any_conditions: fsm.any_conditions(),
            flags,
        }
    }

    /// Whether some action sets the state without naming a static target,
    /// so the in-place shapes need a state re-dispatch switch.
    pub fn use_again_label(&self) -> bool {
        self.flags.ret || self.flags.by_value_control || self.flags.next
    }

    pub fn uses_stack(&self) -> bool {
        self.flags.call || self.flags.ret
    }

    pub fn any_eof_activity(&self) -> bool {
        self.any_eof_actions || self.any_eof_trans
    }
}

/// States reachable from the error state, the start state and the entry
/// points, in depth-first preorder, followed by unreachable states in id order.
pub fn depth_first_order(fsm: &RedFsm) -> Vec<StateId> {
    let n = fsm.state_count();
    let mut seen = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let roots = fsm
        .error
        .into_iter()
        .chain(std::iter::once(fsm.start))
        .chain(fsm.entry_points.iter().map(|&(_, s)| s));

    let mut stack = Vec::new();
    for root in roots {
        stack.push(root);
        while let Some(id) = stack.pop() {
            if seen[id as usize] {
                continue;
            }
            seen[id as usize] = true;
            order.push(id);

            let state = fsm.state(id);
            let targets: Vec<StateId> = state
                .ranges
                .iter()
                .map(|&(_, t)| fsm.trans(t).target)
                .chain(state.eof_trans.map(|t| fsm.trans(t).target))
                .collect();
            // Reversed so the first range is visited first.
            for t in targets.into_iter().rev() {
                if !seen[t as usize] {
                    stack.push(t);
                }
            }
        }
    }

    order.extend((0..n as StateId).filter(|&id| !seen[id as usize]));
    order
}

/// Layout order of states for a shape: depth-first for the jump shapes, id
/// order for the array-driven shapes.
pub fn order_states(fsm: &RedFsm, shape: Shape) -> Vec<StateId> {
    let order = match shape {
        Shape::Flat | Shape::Table => (0..fsm.state_count() as StateId).collect(),
        _ => depth_first_order(fsm),
    };
    log::debug!("state order for {}: {} states", shape.name(), order.len());
    order
}

/// Actions referenced by at least one action table.
pub fn used_actions(fsm: &RedFsm) -> Vec<ActionId> {
    let mut used = vec![false; fsm.actions.len()];
    for table in &fsm.tables {
        for &a in &table.actions {
            used[a as usize] = true;
        }
    }
    (0..fsm.actions.len() as ActionId).filter(|&a| used[a as usize]).collect()
}

/// Reports every action that names a state missing from the machine.
pub fn check_state_refs(fsm: &RedFsm, diags: &mut Diagnostics) {
    let count = fsm.state_count() as StateId;
    for action in &fsm.actions {
        for state in action.referenced_states() {
            if state >= count {
                diags.error(CodegenError::UnknownStateRef { state }, action.loc.clone());
            }
        }
    }
}

/// Reports primitives the shape has no idiom for.
pub fn check_shape_support(fsm: &RedFsm, shape: Shape, diags: &mut Diagnostics) {
    if shape != Shape::Flat {
        return;
    }
    for id in used_actions(fsm) {
        let action = fsm.action(id);
        let flags = action.flags();
        for (used, primitive) in [(flags.call, "call"), (flags.ret, "return")] {
            if used {
                diags.error(
                    CodegenError::UnsupportedPrimitive { shape: shape.name(), primitive },
                    action.loc.clone(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsmgen_core::action::{Action, InlineItem, InputLoc};
    use fsmgen_core::builder::FsmBuilder;
    use fsmgen_core::keys::{IntType, KeyRange};

    // 0 -a-> 2 -b-> 1, 0 -c-> 1, error state 3 synthesized.
    fn chain() -> RedFsm {
        let mut b = FsmBuilder::new(IntType::U8);
        b.ensure_states(3);
        b.set_start(0);
        b.add_transition(0, KeyRange::single(b'a' as i64), 2, &[]);
        b.add_transition(0, KeyRange::single(b'c' as i64), 1, &[]);
        b.add_transition(2, KeyRange::single(b'b' as i64), 1, &[]);
        b.set_final(1, true);
        b.build().unwrap()
    }

    #[test]
    fn depth_first_starts_at_error_then_start() {
        let fsm = chain();
        assert_eq!(fsm.error, Some(3));
        assert_eq!(depth_first_order(&fsm), vec![3, 0, 2, 1]);
        assert_eq!(order_states(&fsm, Shape::Flat), vec![0, 1, 2, 3]);
        assert_eq!(order_states(&fsm, Shape::Table), vec![0, 1, 2, 3]);
    }

    #[test]
    fn unreachable_states_are_appended() {
        let mut b = FsmBuilder::new(IntType::U8);
        b.ensure_states(3);
        b.set_start(1);
        b.set_default(0, 0, &[]);
        b.set_default(1, 1, &[]);
        b.set_default(2, 0, &[]);
        let fsm = b.build().unwrap();
        assert_eq!(depth_first_order(&fsm), vec![1, 0, 2]);
    }

    #[test]
    fn facts_and_again_predicate() {
        let mut b = FsmBuilder::new(IntType::U8);
        b.ensure_states(2);
        b.set_start(0);
        let next = b.add_action(Action::new(vec![InlineItem::Next(1)]));
        b.set_default(0, 1, &[next]);
        b.set_default(1, 1, &[]);
        b.set_eof_actions(1, &[next]);
        let fsm = b.build().unwrap();
        let facts = MachineFacts::of(&fsm);
        assert!(facts.any_trans_actions);
        assert!(facts.any_eof_actions);
        assert!(!facts.any_eof_trans);
        assert!(facts.use_again_label());
        assert!(!facts.uses_stack());

        let plain = MachineFacts::of(&chain());
        assert!(!plain.use_again_label());
        assert!(!plain.any_eof_activity());
    }

    #[test]
    fn unknown_refs_and_flat_calls_are_reported() {
        let mut b = FsmBuilder::new(IntType::U8);
        b.ensure_states(2);
        b.set_start(0);
        let bad = b.add_action(Action::new(vec![InlineItem::Goto(7)]).at(InputLoc::new("m.rl", 4, 2)));
        let call = b.add_action(Action::new(vec![InlineItem::Call(1), InlineItem::Ret]));
        b.set_default(0, 1, &[bad, call]);
        b.set_default(1, 1, &[]);
        let fsm = b.build().unwrap();

        let mut diags = Diagnostics::new();
        check_state_refs(&fsm, &mut diags);
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.entries()[0].loc, Some(InputLoc::new("m.rl", 4, 2)));

        check_shape_support(&fsm, Shape::Flat, &mut diags);
        assert_eq!(diags.error_count(), 3);
        check_shape_support(&fsm, Shape::Goto, &mut diags);
        assert_eq!(diags.error_count(), 3);
    }
}
