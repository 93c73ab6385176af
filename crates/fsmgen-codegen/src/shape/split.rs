// Split shape
//
// The in-place layout cut into partitions of the depth-first state order.
// Each partition is its own unit; control leaves a unit with a status and a
// selector re-enters the unit that owns the new current state.

use hashbrown::HashSet;

use fsmgen_core::StateId;

use crate::CodegenError;
use crate::ir::{self, ArrayId, BinOp, Case, Expr, ExecSection, Label, Local, PartitionUnit, Stmt, Var};
use crate::liveness::Liveness;
use crate::shape::jump::InPlace;
use crate::shape::{CodeShape, LowerCtx, ShapeOutput};
use crate::tables;

/// Unit status: re-enter the owner of the current state at the current position.
pub const STATUS_REENTER: i64 = 1;
/// Unit status: the position reached the end of the buffer.
pub const STATUS_TEST_EOF: i64 = 2;

pub struct SplitShape {
    pub partitions: usize,
}

/// Partition of every state: consecutive chunks of `order` whose sizes differ
/// by at most one.
pub fn partition_states(order: &[StateId], partitions: usize) -> Result<Vec<usize>, CodegenError> {
    let states = order.len();
    if partitions == 0 || partitions > states {
        return Err(CodegenError::InvalidPartitions { requested: partitions, states });
    }
    let base = states / partitions;
    let larger = states % partitions;
    let mut map = vec![0; states];
    let mut pos = 0;
    for part in 0..partitions {
        let size = base + usize::from(part < larger);
        for &s in &order[pos..pos + size] {
            map[s as usize] = part;
        }
        pos += size;
    }
    Ok(map)
}

impl CodeShape for SplitShape {
    fn lower(&self, cx: &LowerCtx<'_>) -> Result<ShapeOutput, CodegenError> {
        let fsm = cx.fsm;
        let map = partition_states(&cx.order, self.partitions)?;
        let spans = tables::jump_tables(fsm);
        log::debug!("split: {} states into {} partitions", fsm.state_count(), self.partitions);

        let mut units = Vec::with_capacity(self.partitions);
        for part in 0..self.partitions {
            let members: Vec<bool> = map.iter().map(|&p| p == part).collect();
            let live = Liveness::for_members(fsm, &cx.facts, cx.opts, &members);
            let layout = InPlace { cx, spans: &spans, live: &live, owner: Some((map.as_slice(), part)) };

            let mut body = Vec::new();
            if !cx.opts.no_end {
                body.push(Stmt::when(
                    Expr::bin(BinOp::Ge, Expr::Var(Var::P), Expr::Var(Var::Pe)),
                    vec![Stmt::Goto(Label::TestEof)],
                ));
            }
            body.extend(layout.unit_body());
            body.extend(layout.eof_section());
            body.push(Stmt::Return(0));

            // Arrival blocks for every foreign state this unit leaves to,
            // including those only reached from other arrival blocks.
            let mut emitted: HashSet<StateId> = HashSet::new();
            loop {
                let mut pending: Vec<StateId> = ir::goto_targets(&body)
                    .into_iter()
                    .filter_map(|l| match l {
                        Label::PartState(s) if !emitted.contains(&s) => Some(s),
                        _ => None,
                    })
                    .collect();
                if pending.is_empty() {
                    break;
                }
                pending.sort_unstable();
                for s in pending {
                    emitted.insert(s);
                    body.extend(layout.foreign_arrival(s));
                }
            }

            units.push(PartitionUnit { index: part, locals: cx.common_locals(), body });
        }

        let cases = (0..self.partitions)
            .map(|part| Case {
                values: vec![part as i64],
                body: vec![Stmt::Invoke { part, status: Var::Stat }],
            })
            .collect();
        let stat = || Expr::Var(Var::Stat);
        let mut body = vec![
            Stmt::assign(Var::Stat, Expr::Lit(0)),
            Stmt::Label(Label::Reenter),
            Stmt::Switch {
                on: Expr::elem(ArrayId::PartitionMap, Expr::Var(Var::Cs)),
                cases,
                default: Vec::new(),
            },
            Stmt::when(Expr::eq(stat(), Expr::Lit(STATUS_REENTER)), vec![Stmt::Goto(Label::Reenter)]),
        ];
        if cx.facts.any_eof_activity() {
            body.push(Stmt::when(
                Expr::eq(stat(), Expr::Lit(STATUS_TEST_EOF)),
                vec![Stmt::when(
                    Expr::eq(Expr::Var(Var::P), Expr::Var(Var::Eof)),
                    vec![Stmt::Goto(Label::Reenter)],
                )],
            ));
        }

        Ok(ShapeOutput {
            exec: ExecSection {
                locals: vec![Local { var: Var::Stat, is_key: false }],
                body,
                functions: None,
                partitions: units,
            },
            arrays: vec![(ArrayId::PartitionMap, map.iter().map(|&p| p as i64).collect())],
        })
    }
}
