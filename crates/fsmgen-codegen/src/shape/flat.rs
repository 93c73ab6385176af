// Flat table shape
//
// One loop over the input. The located transition index and the state
// variable are the only control state; actions are reached through
// switches on action-list ids read from the arrays.

use crate::CodegenError;
use crate::ir::{ArrayId, BinOp, Block, Case, Expr, ExecSection, Label, Local, Stmt, Var};
use crate::render::{ActionRenderer, DispatchBindings, RenderCtx};
use crate::shape::{CodeShape, LowerCtx, ShapeOutput, dispatch, table_switch};
use crate::tables::FlatTables;

pub struct FlatShape;

impl CodeShape for FlatShape {
    fn lower(&self, cx: &LowerCtx<'_>) -> Result<ShapeOutput, CodegenError> {
        let tables = FlatTables::build(cx.fsm)?;
        let bindings = loop_bindings();
        let r = ActionRenderer::new(cx.fsm, cx.opts, &bindings);

        let mut locals = vec![
            Local { var: Var::Trans, is_key: false },
            Local { var: Var::Keys, is_key: false },
            Local { var: Var::Inds, is_key: false },
            Local { var: Var::Slen, is_key: false },
        ];
        if cx.facts.any_conditions {
            locals.push(Local { var: Var::Cond, is_key: false });
        }
        let lookup = Lookup {
            cond: if cx.facts.any_conditions { cond_translate(cx, &r) } else { Vec::new() },
            index: span_index(cx),
            locals,
            arrays: tables.arrays(&cx.facts),
        };
        Ok(table_loop(cx, &r, lookup))
    }
}

/// What separates the table-driven shapes: how `_widec` and `_trans` are found.
pub(crate) struct Lookup {
    /// Condition translation, run before the index lookup.
    pub cond: Block,
    /// Statements leaving the located transition in `_trans`.
    pub index: Block,
    pub locals: Vec<Local>,
    pub arrays: Vec<(ArrayId, Vec<i64>)>,
}

pub(crate) fn loop_bindings() -> DispatchBindings {
    DispatchBindings { redispatch: vec![Stmt::Goto(Label::Again)], exit: vec![Stmt::Goto(Label::Out)] }
}

/// The run loop shared by the table-driven shapes.
pub(crate) fn table_loop(cx: &LowerCtx<'_>, r: &ActionRenderer<'_>, lookup: Lookup) -> ShapeOutput {
    let fsm = cx.fsm;
    let facts = &cx.facts;
    let cs = || Expr::Var(Var::Cs);

    let mut body: Block = Vec::new();
    if !cx.opts.no_end {
        body.push(Stmt::when(
            Expr::bin(BinOp::Ge, Expr::Var(Var::P), Expr::Var(Var::Pe)),
            vec![Stmt::Goto(Label::TestEof)],
        ));
    }
    if let Some(err) = fsm.error {
        body.push(Stmt::when(Expr::eq(cs(), Expr::Lit(err as i64)), vec![Stmt::Goto(Label::Out)]));
    }

    body.push(Stmt::Label(Label::Resume));
    if facts.any_from_state_actions {
        body.push(table_switch(fsm, r, ArrayId::FromStateActions, |t| t.from_state, RenderCtx::forced()));
    }
    body.extend(lookup.cond);
    body.extend(lookup.index);

    if facts.any_eof_trans {
        body.push(Stmt::Label(Label::EofTrans));
    }
    if facts.flags.cur_state_ref {
        body.push(Stmt::assign(Var::Ps, cs()));
    }
    body.push(Stmt::assign(Var::Cs, Expr::elem(ArrayId::TransTargs, Expr::Var(Var::Trans))));

    if facts.any_trans_actions {
        let action = || Expr::elem(ArrayId::TransActions, Expr::Var(Var::Trans));
        body.push(Stmt::when(Expr::eq(action(), Expr::Lit(0)), vec![Stmt::Goto(Label::Again)]));
        let cases = fsm
            .tables
            .iter()
            .filter(|t| t.refs.transitions > 0)
            .map(|t| Case { values: vec![t.id as i64 + 1], body: r.table(t.id, &RenderCtx::forced()) })
            .collect();
        body.push(Stmt::Switch { on: action(), cases, default: Vec::new() });
    }

    body.push(Stmt::Label(Label::Again));
    if facts.any_to_state_actions {
        body.push(table_switch(fsm, r, ArrayId::ToStateActions, |t| t.to_state, RenderCtx::forced()));
    }
    if let Some(err) = fsm.error {
        body.push(Stmt::when(Expr::eq(cs(), Expr::Lit(err as i64)), vec![Stmt::Goto(Label::Out)]));
    }
    body.push(Stmt::bump(Var::P, 1));
    if cx.opts.no_end {
        body.push(Stmt::Goto(Label::Resume));
    } else {
        body.push(Stmt::when(
            Expr::bin(BinOp::Lt, Expr::Var(Var::P), Expr::Var(Var::Pe)),
            vec![Stmt::Goto(Label::Resume)],
        ));
    }

    body.push(Stmt::Label(Label::TestEof));
    if facts.any_eof_activity() {
        let mut at_eof = Vec::new();
        if facts.any_eof_trans {
            let eof_trans = || Expr::elem(ArrayId::EofTrans, cs());
            at_eof.push(Stmt::when(
                Expr::bin(BinOp::Gt, eof_trans(), Expr::Lit(0)),
                vec![
                    Stmt::assign(Var::Trans, Expr::sub(eof_trans(), Expr::Lit(1))),
                    Stmt::Goto(Label::EofTrans),
                ],
            ));
        }
        if facts.any_eof_actions {
            at_eof.push(table_switch(fsm, r, ArrayId::EofActions, |t| t.eof, RenderCtx::forced().eof()));
        }
        body.push(Stmt::when(Expr::eq(Expr::Var(Var::P), Expr::Var(Var::Eof)), at_eof));
    }
    body.push(Stmt::Label(Label::Out));

    let mut locals = lookup.locals;
    locals.extend(cx.common_locals());
    ShapeOutput {
        exec: ExecSection { locals, body, functions: None, partitions: Vec::new() },
        arrays: lookup.arrays,
    }
}

/// `_keys = cs << 1; _inds = index_offsets[cs]; _slen = key_spans[cs]`, then
/// a direct index into the state's span, or its default slot.
fn span_index(cx: &LowerCtx<'_>) -> Block {
    let cs = || Expr::Var(Var::Cs);
    let key = cx.key();
    let keys = || Expr::Var(Var::Keys);
    let lower_key = || Expr::elem(ArrayId::TransKeys, keys());
    let upper_key = || Expr::elem(ArrayId::TransKeys, Expr::add(keys(), Expr::Lit(1)));
    let in_span = Expr::bin(
        BinOp::And,
        Expr::bin(BinOp::Gt, Expr::Var(Var::Slen), Expr::Lit(0)),
        Expr::bin(
            BinOp::And,
            Expr::bin(BinOp::Le, lower_key(), key.clone()),
            Expr::bin(BinOp::Le, key.clone(), upper_key()),
        ),
    );
    let offset = Expr::select(in_span, Expr::sub(key, lower_key()), Expr::Var(Var::Slen));
    vec![
        Stmt::assign(Var::Keys, Expr::bin(BinOp::Shl, cs(), Expr::Lit(1))),
        Stmt::assign(Var::Inds, Expr::elem(ArrayId::IndexOffsets, cs())),
        Stmt::assign(Var::Slen, Expr::elem(ArrayId::KeySpans, cs())),
        Stmt::assign(Var::Trans, Expr::elem(ArrayId::Indicies, Expr::add(Expr::Var(Var::Inds), offset))),
    ]
}

/// `_widec = key`, then widening through the condition space the arrays
/// assign to the key, if any.
fn cond_translate(cx: &LowerCtx<'_>, r: &ActionRenderer<'_>) -> Block {
    let cs = || Expr::Var(Var::Cs);
    let base = || Expr::bin(BinOp::Shl, cs(), Expr::Lit(1));
    let low = || Expr::elem(ArrayId::CondKeys, base());
    let high = Expr::elem(ArrayId::CondKeys, Expr::add(base(), Expr::Lit(1)));
    let covered = Expr::bin(
        BinOp::And,
        Expr::bin(BinOp::Gt, Expr::elem(ArrayId::CondKeySpans, cs()), Expr::Lit(0)),
        Expr::bin(
            BinOp::And,
            Expr::bin(BinOp::Le, low(), Expr::Key),
            Expr::bin(BinOp::Le, Expr::Key, high),
        ),
    );
    let slot = Expr::add(Expr::elem(ArrayId::CondOffsets, cs()), Expr::sub(Expr::Key, low()));
    vec![
        Stmt::assign(Var::Widec, Expr::Key),
        Stmt::when(
            covered,
            vec![Stmt::assign(Var::Cond, Expr::elem(ArrayId::CondSpaces, slot)), widen_switch(cx, r)],
        ),
    ]
}

/// `switch (_cond)` over every condition space, `_cond` holding `id + 1`.
pub(crate) fn widen_switch(cx: &LowerCtx<'_>, r: &ActionRenderer<'_>) -> Stmt {
    let cases = cx
        .fsm
        .cond_spaces
        .iter()
        .map(|space| Case { values: vec![space.id as i64 + 1], body: dispatch::widen(cx.fsm, space.id, r) })
        .collect();
    Stmt::Switch { on: Expr::Var(Var::Cond), cases, default: Vec::new() }
}
