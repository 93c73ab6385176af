// Recursive shape
//
// The machine as a set of control functions, one per dispatch phase plus one
// per transition and per transition action list. Control passes by tail
// transfer; mid-action jumps raise signals handled by the phase of the same
// name.

use fsmgen_core::TransId;

use crate::CodegenError;
use crate::ir::{
    ArrayId, BinOp, Block, Case, Expr, ExecSection, Func, Function, FunctionSet, Local, Signal, Stmt, Var,
};
use crate::liveness::Liveness;
use crate::render::{ActionRenderer, DispatchBindings, RenderCtx};
use crate::shape::jump::cond_switch;
use crate::shape::{CodeShape, LowerCtx, ShapeOutput, dispatch, table_switch};
use crate::tables::{self, StateActions};

pub struct RecursiveShape;

impl CodeShape for RecursiveShape {
    fn lower(&self, cx: &LowerCtx<'_>) -> Result<ShapeOutput, CodegenError> {
        let fsm = cx.fsm;
        let facts = &cx.facts;
        let spans = tables::jump_tables(fsm);
        let live = Liveness::dispatch(fsm);
        let bindings = DispatchBindings {
            redispatch: vec![Stmt::Raise(Signal::Again)],
            exit: vec![Stmt::Raise(Signal::Out)],
        };
        let r = ActionRenderer::new(fsm, cx.opts, &bindings);
        let cs = || Expr::Var(Var::Cs);
        let to = |f: Func| vec![Stmt::Transfer(f)];
        let err_check = || {
            fsm.error.map(|err| Stmt::when(Expr::eq(cs(), Expr::Lit(err as i64)), to(Func::Out)))
        };

        let mut functions = Vec::new();

        let mut start = Vec::new();
        if !cx.opts.no_end {
            start.push(Stmt::when(
                Expr::bin(BinOp::Ge, Expr::Var(Var::P), Expr::Var(Var::Pe)),
                to(Func::TestEof),
            ));
        }
        start.extend(err_check());
        start.push(Stmt::Transfer(Func::Resume));
        functions.push(Function { id: Func::Start, body: start });

        let mut resume = Vec::new();
        if facts.any_from_state_actions {
            resume.push(table_switch(fsm, &r, ArrayId::FromStateActions, |t| t.from_state, RenderCtx::forced()));
        }
        if facts.any_conditions {
            resume.extend(cond_switch(fsm, &cx.order, &r));
        }
        let key = cx.key();
        let out = to(Func::Out);
        let mut cases = Vec::new();
        for &id in &cx.order {
            if Some(id) == fsm.error {
                continue;
            }
            let mut leaf = |t: TransId| vec![Stmt::Transfer(Func::Trans(t))];
            let tree = dispatch::key_dispatch(&spans[id as usize], &key, &out, &mut leaf);
            cases.push(Case { values: vec![id as i64], body: tree });
        }
        resume.push(Stmt::Switch { on: cs(), cases, default: out.clone() });
        functions.push(Function { id: Func::Resume, body: resume });

        let mut action_lists = Vec::new();
        for (t, trans) in fsm.transitions.iter().enumerate() {
            let t = t as TransId;
            if !live.trans_needed(t) {
                continue;
            }
            let mut body = Vec::new();
            if facts.flags.cur_state_ref {
                body.push(Stmt::assign(Var::Ps, cs()));
            }
            body.push(Stmt::assign(Var::Cs, Expr::Lit(trans.target as i64)));
            match trans.action {
                Some(a) => {
                    if !action_lists.contains(&a) {
                        action_lists.push(a);
                    }
                    body.push(Stmt::Transfer(Func::Action(a)));
                }
                None => body.push(Stmt::Transfer(Func::Again)),
            }
            functions.push(Function { id: Func::Trans(t), body });
        }
        action_lists.sort_unstable();
        for a in action_lists {
            let mut body = r.table(a, &RenderCtx::forced());
            body.push(Stmt::Transfer(Func::Again));
            functions.push(Function { id: Func::Action(a), body });
        }

        let mut again = Vec::new();
        if facts.any_to_state_actions {
            again.push(table_switch(fsm, &r, ArrayId::ToStateActions, |t| t.to_state, RenderCtx::forced()));
        }
        again.extend(err_check());
        again.push(Stmt::bump(Var::P, 1));
        if cx.opts.no_end {
            again.push(Stmt::Transfer(Func::Resume));
        } else {
            again.push(Stmt::when(
                Expr::bin(BinOp::Lt, Expr::Var(Var::P), Expr::Var(Var::Pe)),
                to(Func::Resume),
            ));
            again.push(Stmt::Transfer(Func::TestEof));
        }
        functions.push(Function { id: Func::Again, body: again });

        let mut test_eof: Block = Vec::new();
        if facts.any_eof_activity() {
            let mut at_eof = Vec::new();
            if facts.any_eof_trans {
                let cases = cx
                    .order
                    .iter()
                    .filter_map(|&id| fsm.state(id).eof_trans.map(|t| (id, t)))
                    .map(|(id, t)| Case {
                        values: vec![id as i64],
                        body: vec![Stmt::assign(Var::Trans, Expr::Lit(t as i64)), Stmt::Raise(Signal::EofTrans)],
                    })
                    .collect();
                at_eof.push(Stmt::Switch { on: cs(), cases, default: Vec::new() });
            }
            if facts.any_eof_actions {
                at_eof.push(table_switch(fsm, &r, ArrayId::EofActions, |t| t.eof, RenderCtx::forced().eof()));
            }
            test_eof.push(Stmt::when(Expr::eq(Expr::Var(Var::P), Expr::Var(Var::Eof)), at_eof));
        }
        test_eof.push(Stmt::Transfer(Func::Out));
        functions.push(Function { id: Func::TestEof, body: test_eof });

        if facts.any_eof_trans {
            let cases = fsm
                .states
                .iter()
                .filter_map(|s| s.eof_trans)
                .fold(Vec::<TransId>::new(), |mut acc, t| {
                    if !acc.contains(&t) {
                        acc.push(t);
                    }
                    acc
                })
                .into_iter()
                .map(|t| Case { values: vec![t as i64], body: to(Func::Trans(t)) })
                .collect();
            functions.push(Function {
                id: Func::EofTrans,
                body: vec![
                    Stmt::Switch { on: Expr::Var(Var::Trans), cases, default: Vec::new() },
                    Stmt::Transfer(Func::Out),
                ],
            });
        }

        functions.push(Function { id: Func::Out, body: vec![Stmt::Finish] });

        let mut handlers = vec![(Signal::Resume, Func::Resume), (Signal::Again, Func::Again)];
        if facts.any_eof_trans {
            handlers.push((Signal::EofTrans, Func::EofTrans));
        }
        handlers.push((Signal::Out, Func::Out));

        let set = FunctionSet { functions, handlers };
        let missing = set.unresolved();
        if !missing.is_empty() {
            let names: Vec<String> = missing
                .iter()
                .map(|m| m.map_or_else(|| "unhandled signal".to_string(), |f| format!("{f:?}")))
                .collect();
            return Err(CodegenError::UnclosedFunctionSet(names.join(", ")));
        }
        log::debug!("recursive: {} control functions", set.functions.len());

        let mut locals = Vec::new();
        if facts.any_eof_trans {
            locals.push(Local { var: Var::Trans, is_key: false });
        }
        locals.extend(cx.common_locals());

        Ok(ShapeOutput {
            exec: ExecSection {
                locals,
                body: vec![Stmt::Trampoline(Func::Start)],
                functions: Some(set),
                partitions: Vec::new(),
            },
            arrays: StateActions::build(fsm).arrays(facts),
        })
    }
}
