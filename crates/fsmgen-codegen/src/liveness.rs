// Label liveness for the direct-jump shapes

use fsmgen_core::ActListId;
use fsmgen_core::fsm::RedFsm;

use crate::analysis::MachineFacts;
use crate::options::GenOptions;

/// Which states and transitions need an addressable label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Liveness {
    /// `stN` entry label needed.
    pub state_label: Vec<bool>,
    /// End-of-input exit point needed.
    pub state_out: Vec<bool>,
    /// `trN` label needed.
    pub trans_label: Vec<bool>,
}

impl Liveness {
    /// In-place layout over every state.
    pub fn in_place(fsm: &RedFsm, facts: &MachineFacts, opts: &GenOptions) -> Self {
        Self::for_members(fsm, facts, opts, &vec![true; fsm.state_count()])
    }

    /// In-place layout of a unit emitting the states flagged in `members`.
    ///
    /// Transitions count only when a member takes them. Action targets count
    /// from every action a member runs, plus every to-state action, since the
    /// unit may run the arrival work of any state it leaves to.
    pub fn for_members(fsm: &RedFsm, facts: &MachineFacts, opts: &GenOptions, members: &[bool]) -> Self {
        let n = fsm.state_count();
        let mut live = Liveness {
            state_label: vec![false; n],
            state_out: vec![false; n],
            trans_label: vec![false; fsm.transitions.len()],
        };

        if facts.use_again_label() {
            live.state_label.fill(true);
        }

        let mut tables: Vec<ActListId> = Vec::new();
        for state in &fsm.states {
            tables.extend(state.to_state_action);
            if !members.get(state.id as usize).copied().unwrap_or(false) {
                continue;
            }
            tables.extend(state.from_state_action);
            tables.extend(state.eof_action);
            let taken = state.ranges.iter().map(|&(_, t)| t).chain(state.eof_trans);
            for t in taken {
                let trans = fsm.trans(t);
                match trans.action {
                    Some(a) => {
                        live.trans_label[t as usize] = true;
                        tables.push(a);
                        if !fsm.table_flags(a).next {
                            live.state_label[trans.target as usize] = true;
                        }
                    }
                    None => live.state_label[trans.target as usize] = true,
                }
            }
        }

        for table in tables {
            for action in fsm.table_actions(table) {
                for s in action.jump_targets() {
                    if let Some(flag) = live.state_label.get_mut(s as usize) {
                        *flag = true;
                    }
                }
            }
        }

        if !opts.no_end {
            for (id, out) in live.state_out.iter_mut().enumerate() {
                *out = live.state_label[id] && Some(id as u32) != fsm.error;
            }
        }

        log::debug!(
            "liveness: {} of {} state labels, {} transition labels",
            live.state_label.iter().filter(|&&l| l).count(),
            n,
            live.trans_label.iter().filter(|&&l| l).count()
        );
        live
    }

    /// Dispatch layout: only transitions are labeled; states are reached
    /// through the state switch.
    pub fn dispatch(fsm: &RedFsm) -> Self {
        let mut trans_label = vec![false; fsm.transitions.len()];
        for state in &fsm.states {
            for t in state.ranges.iter().map(|&(_, t)| t).chain(state.eof_trans) {
                trans_label[t as usize] = true;
            }
        }
        Liveness {
            state_label: vec![false; fsm.state_count()],
            state_out: vec![false; fsm.state_count()],
            trans_label,
        }
    }

    pub fn needs_label(&self, state: u32) -> bool {
        self.state_label.get(state as usize).copied().unwrap_or(false)
    }

    pub fn needs_out(&self, state: u32) -> bool {
        self.state_out.get(state as usize).copied().unwrap_or(false)
    }

    pub fn trans_needed(&self, trans: u32) -> bool {
        self.trans_label.get(trans as usize).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsmgen_core::action::{Action, InlineItem};
    use fsmgen_core::builder::FsmBuilder;
    use fsmgen_core::keys::{IntType, KeyRange};

    #[test]
    fn only_jump_targets_are_labeled() {
        // 0 -a/next-> 1, 0 -b-> 2, 1 default 1, 2 eof action goto 3, 3 default 3
        let mut b = FsmBuilder::new(IntType::U8);
        b.ensure_states(4);
        b.set_start(0);
        let next = b.add_action(Action::new(vec![InlineItem::Next(1), InlineItem::text("n;")]));
        let jump = b.add_action(Action::new(vec![InlineItem::Goto(3)]));
        b.add_transition(0, KeyRange::single(b'a' as i64), 1, &[next]);
        b.set_default(0, 2, &[]);
        b.set_default(1, 1, &[]);
        b.set_default(2, 2, &[]);
        b.set_default(3, 3, &[]);
        b.set_eof_actions(2, &[jump]);
        let fsm = b.build().unwrap();
        let mut facts = MachineFacts::of(&fsm);
        // Pretend the next does not force a re-dispatch switch.
        facts.flags.next = false;

        let live = Liveness::in_place(&fsm, &facts, &GenOptions::default());
        assert!(!live.needs_label(0));
        assert!(live.needs_label(1), "default loop on 1");
        assert!(live.needs_label(2));
        assert!(live.needs_label(3), "goto target of an eof action");
        assert!(live.needs_out(2));

        let no_end = GenOptions { no_end: true, ..GenOptions::default() };
        let live = Liveness::in_place(&fsm, &facts, &no_end);
        assert!(!live.needs_out(2));
    }

    #[test]
    fn again_label_labels_everything() {
        let mut b = FsmBuilder::new(IntType::U8);
        b.ensure_states(3);
        b.set_start(0);
        let ret = b.add_action(Action::new(vec![InlineItem::Ret]));
        b.set_default(0, 1, &[ret]);
        b.set_default(1, 1, &[]);
        b.set_default(2, 2, &[]);
        let fsm = b.build().unwrap();
        let facts = MachineFacts::of(&fsm);
        let live = Liveness::in_place(&fsm, &facts, &GenOptions::default());
        assert!(live.state_label.iter().all(|&l| l));
        assert_eq!(live.trans_label.iter().filter(|&&l| l).count(), 1);
    }

    #[test]
    fn error_state_gets_no_out_label() {
        let mut b = FsmBuilder::new(IntType::U8);
        b.ensure_states(2);
        b.set_start(0);
        b.add_transition(0, KeyRange::single(1), 1, &[]);
        b.set_default(1, 1, &[]);
        let fsm = b.build().unwrap();
        let err = fsm.error.unwrap();
        let live = Liveness::in_place(&fsm, &MachineFacts::of(&fsm), &GenOptions::default());
        assert!(live.needs_label(err));
        assert!(!live.needs_out(err));
        assert!(live.needs_out(1));
    }

    #[test]
    fn members_restrict_transition_sources() {
        let mut b = FsmBuilder::new(IntType::U8);
        b.ensure_states(3);
        b.set_start(0);
        b.set_default(0, 1, &[]);
        b.set_default(1, 2, &[]);
        b.set_default(2, 2, &[]);
        let fsm = b.build().unwrap();
        let facts = MachineFacts::of(&fsm);
        let live = Liveness::for_members(&fsm, &facts, &GenOptions::default(), &[true, false, false]);
        assert!(live.needs_label(1));
        assert!(!live.needs_label(2));
    }
}
