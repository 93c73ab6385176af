// Table shape
//
// The flat loop with a sorted per-state key list in place of the dense
// span. The transition is found by binary search over the state's single
// keys, then over its ranges, falling back to the default slot.

use crate::CodegenError;
use crate::ir::{ArrayId, BinOp, Block, Expr, Label, Local, Stmt, Var};
use crate::render::ActionRenderer;
use crate::shape::flat::{Lookup, loop_bindings, table_loop, widen_switch};
use crate::shape::{CodeShape, LowerCtx, ShapeOutput};
use crate::tables::{SearchTables, jump_tables};

pub struct TableShape;

impl CodeShape for TableShape {
    fn lower(&self, cx: &LowerCtx<'_>) -> Result<ShapeOutput, CodegenError> {
        let tables = SearchTables::build(cx.fsm, &jump_tables(cx.fsm));
        let bindings = loop_bindings();
        let r = ActionRenderer::new(cx.fsm, cx.opts, &bindings);

        let mut locals = [Var::Trans, Var::Keys, Var::Klen, Var::Lower, Var::Upper, Var::Mid]
            .into_iter()
            .map(|var| Local { var, is_key: false })
            .collect::<Vec<_>>();
        if cx.facts.any_conditions {
            locals.push(Local { var: Var::Cond, is_key: false });
        }
        let lookup = Lookup {
            cond: if cx.facts.any_conditions { cond_search(cx, &r) } else { Vec::new() },
            index: key_search(cx),
            locals,
            arrays: tables.arrays(&cx.facts),
        };
        Ok(table_loop(cx, &r, lookup))
    }
}

fn var(v: Var) -> Expr {
    Expr::Var(v)
}

/// `_mid = _lower + ((_upper - _lower) >> 1)`
fn midpoint() -> Stmt {
    let half = Expr::bin(BinOp::Shr, Expr::sub(var(Var::Upper), var(Var::Lower)), Expr::Lit(1));
    Stmt::assign(Var::Mid, Expr::add(var(Var::Lower), half))
}

/// One bisection step: narrows `[_lower, _upper]` and loops back to `again`
/// when `key` lies outside `[low, high]`.
fn narrow(key: &Expr, low: Expr, high: Expr, again: Label) -> Block {
    vec![
        Stmt::when(
            Expr::bin(BinOp::Lt, key.clone(), low),
            vec![Stmt::assign(Var::Upper, Expr::sub(var(Var::Mid), Expr::Lit(1))), Stmt::Goto(again)],
        ),
        Stmt::when(
            Expr::bin(BinOp::Gt, key.clone(), high),
            vec![Stmt::assign(Var::Lower, Expr::add(var(Var::Mid), Expr::Lit(1))), Stmt::Goto(again)],
        ),
    ]
}

/// `_lower = first; _upper = first + len - 1`
fn bounds(first: Expr, len: Expr) -> Block {
    vec![
        Stmt::assign(Var::Lower, first),
        Stmt::assign(Var::Upper, Expr::sub(Expr::add(var(Var::Lower), len), Expr::Lit(1))),
    ]
}

/// Leaves the index of the matching transition in `_trans`. `_keys` walks
/// `trans_keys` and `_trans` walks `indicies`; both are advanced past the
/// singles before the ranges are searched.
fn key_search(cx: &LowerCtx<'_>) -> Block {
    let cs = || var(Var::Cs);
    let key = cx.key();
    let at = |offset: Expr| Expr::elem(ArrayId::TransKeys, Expr::add(var(Var::Keys), offset));
    let pair = || Expr::bin(BinOp::Shl, var(Var::Mid), Expr::Lit(1));
    let take_mid = || {
        vec![Stmt::assign(Var::Trans, Expr::add(var(Var::Trans), var(Var::Mid))), Stmt::Goto(Label::Match)]
    };

    let mut out = vec![
        Stmt::assign(Var::Keys, Expr::elem(ArrayId::KeyOffsets, cs())),
        Stmt::assign(Var::Trans, Expr::elem(ArrayId::IndexOffsets, cs())),
        Stmt::assign(Var::Klen, Expr::elem(ArrayId::SingleLengths, cs())),
    ];
    out.extend(bounds(Expr::Lit(0), var(Var::Klen)));

    out.push(Stmt::Label(Label::SingleSearch));
    out.push(Stmt::when(Expr::bin(BinOp::Lt, var(Var::Upper), var(Var::Lower)), vec![Stmt::Goto(Label::SingleMiss)]));
    out.push(midpoint());
    out.extend(narrow(&key, at(var(Var::Mid)), at(var(Var::Mid)), Label::SingleSearch));
    out.extend(take_mid());

    out.push(Stmt::Label(Label::SingleMiss));
    out.push(Stmt::assign(Var::Keys, Expr::add(var(Var::Keys), var(Var::Klen))));
    out.push(Stmt::assign(Var::Trans, Expr::add(var(Var::Trans), var(Var::Klen))));
    out.push(Stmt::assign(Var::Klen, Expr::elem(ArrayId::RangeLengths, cs())));
    out.extend(bounds(Expr::Lit(0), var(Var::Klen)));

    out.push(Stmt::Label(Label::RangeSearch));
    out.push(Stmt::when(Expr::bin(BinOp::Lt, var(Var::Upper), var(Var::Lower)), vec![Stmt::Goto(Label::RangeMiss)]));
    out.push(midpoint());
    out.extend(narrow(&key, at(pair()), at(Expr::add(pair(), Expr::Lit(1))), Label::RangeSearch));
    out.extend(take_mid());

    out.push(Stmt::Label(Label::RangeMiss));
    out.push(Stmt::assign(Var::Trans, Expr::add(var(Var::Trans), var(Var::Klen))));

    out.push(Stmt::Label(Label::Match));
    out.push(Stmt::assign(Var::Trans, Expr::elem(ArrayId::Indicies, var(Var::Trans))));
    out
}

/// `_widec = key`, then a binary search of the state's condition ranges
/// and widening through the space of the range that holds the key.
fn cond_search(cx: &LowerCtx<'_>, r: &ActionRenderer<'_>) -> Block {
    let cs = || var(Var::Cs);
    let pair = || Expr::bin(BinOp::Shl, var(Var::Mid), Expr::Lit(1));

    let mut out = vec![Stmt::assign(Var::Widec, Expr::Key)];
    out.extend(bounds(Expr::elem(ArrayId::CondOffsets, cs()), Expr::elem(ArrayId::CondLengths, cs())));
    out.push(Stmt::Label(Label::CondSearch));
    out.push(Stmt::when(Expr::bin(BinOp::Lt, var(Var::Upper), var(Var::Lower)), vec![Stmt::Goto(Label::CondDone)]));
    out.push(midpoint());
    out.extend(narrow(
        &Expr::Key,
        Expr::elem(ArrayId::CondKeys, pair()),
        Expr::elem(ArrayId::CondKeys, Expr::add(pair(), Expr::Lit(1))),
        Label::CondSearch,
    ));
    out.push(Stmt::assign(Var::Cond, Expr::elem(ArrayId::CondSpaces, var(Var::Mid))));
    out.push(widen_switch(cx, r));
    out.push(Stmt::Label(Label::CondDone));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Generator;
    use crate::format::c::CFormatter;
    use crate::shape::Shape;
    use fsmgen_core::builder::FsmBuilder;
    use fsmgen_core::keys::{IntType, KeyRange};

    #[test]
    fn search_labels_stay_at_top_level() {
        let mut b = FsmBuilder::new(IntType::U8);
        b.ensure_states(2);
        b.set_start(0);
        b.add_transition(0, KeyRange::single(b'a' as i64), 1, &[]);
        b.add_transition(0, KeyRange::new(b'0' as i64, b'9' as i64), 0, &[]);
        b.set_final(1, true);
        let fsm = b.build().unwrap();

        let unit = Generator::new(&fsm, &CFormatter::new()).lower(Shape::Table).unwrap();
        let labels: Vec<Label> = unit
            .exec
            .body
            .iter()
            .filter_map(|s| match s {
                Stmt::Label(l) => Some(*l),
                _ => None,
            })
            .collect();
        for label in [Label::SingleSearch, Label::SingleMiss, Label::RangeSearch, Label::RangeMiss, Label::Match] {
            assert!(labels.contains(&label), "{label:?} missing");
        }
        assert!(!labels.contains(&Label::CondSearch));
        assert!(unit.data.array(ArrayId::SingleLengths).is_some());
        assert!(unit.data.array(ArrayId::KeySpans).is_none());
    }
}
