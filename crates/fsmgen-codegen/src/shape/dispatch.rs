// Inline key dispatch shared by the direct-jump and recursive shapes

use fsmgen_core::fsm::{RedFsm, RedState};
use fsmgen_core::keys::KeyRange;
use fsmgen_core::{CondSpaceId, TransId};

use crate::ir::{BinOp, Block, Case, Expr, Stmt, Var};
use crate::render::ActionRenderer;
use crate::tables::StateSpans;

/// Statements that widen the key of `space` into `_widec`.
pub fn widen(fsm: &RedFsm, space: CondSpaceId, renderer: &ActionRenderer<'_>) -> Block {
    let space = fsm.cond_space(space);
    let size = fsm.alphabet.size();
    let mut out = vec![Stmt::assign(
        Var::Widec,
        Expr::add(
            Expr::Lit(space.base_key),
            Expr::sub(Expr::Key, Expr::Lit(fsm.min_key())),
        ),
    )];
    for (i, &cond) in space.conditions.iter().enumerate() {
        let step = i64::try_from(size << i).unwrap_or(i64::MAX);
        out.push(Stmt::when(
            renderer.condition(fsm.action(cond)),
            vec![Stmt::bump(Var::Widec, step)],
        ));
    }
    out
}

/// Condition translation for one state: `_widec` keeps the raw key unless a
/// condition range of the state covers it.
pub fn cond_translate(fsm: &RedFsm, state: &RedState, renderer: &ActionRenderer<'_>) -> Block {
    let mut chain: Block = Vec::new();
    for sc in state.conds.iter().rev() {
        chain = vec![Stmt::If {
            cond: in_range(&Expr::Key, sc.range),
            then: widen(fsm, sc.space, renderer),
            otherwise: chain,
        }];
    }
    chain
}

fn in_range(key: &Expr, range: KeyRange) -> Expr {
    if range.low == range.high {
        return Expr::eq(key.clone(), Expr::Lit(range.low));
    }
    Expr::bin(
        BinOp::And,
        Expr::bin(BinOp::Ge, key.clone(), Expr::Lit(range.low)),
        Expr::bin(BinOp::Le, key.clone(), Expr::Lit(range.high)),
    )
}

/// Singles switch, then a binary search over the ranges, then the default.
/// `leaf` produces the block taking a transition; it must end in a jump.
pub fn key_dispatch(
    spans: &StateSpans,
    key: &Expr,
    fallback: &Block,
    leaf: &mut dyn FnMut(TransId) -> Block,
) -> Block {
    let ranges = range_search(&spans.ranges, key, spans.default, fallback, leaf);
    if spans.singles.is_empty() {
        return ranges;
    }

    let mut grouped: Vec<(TransId, Vec<i64>)> = Vec::new();
    for &(k, t) in &spans.singles {
        match grouped.iter_mut().find(|(id, _)| *id == t) {
            Some((_, keys)) => keys.push(k),
            None => grouped.push((t, vec![k])),
        }
    }
    let cases = grouped
        .into_iter()
        .map(|(t, values)| Case { values, body: leaf(t) })
        .collect();
    vec![Stmt::Switch { on: key.clone(), cases, default: ranges }]
}

fn range_search(
    ranges: &[(KeyRange, TransId)],
    key: &Expr,
    default: Option<TransId>,
    fallback: &Block,
    leaf: &mut dyn FnMut(TransId) -> Block,
) -> Block {
    if ranges.is_empty() {
        return match default {
            Some(t) => leaf(t),
            None => fallback.clone(),
        };
    }
    let mid = ranges.len() / 2;
    let (range, t) = ranges[mid];
    let below = range_search(&ranges[..mid], key, default, fallback, leaf);
    let above = range_search(&ranges[mid + 1..], key, default, fallback, leaf);
    vec![Stmt::If {
        cond: Expr::bin(BinOp::Lt, key.clone(), Expr::Lit(range.low)),
        then: below,
        otherwise: vec![Stmt::If {
            cond: Expr::bin(BinOp::Gt, key.clone(), Expr::Lit(range.high)),
            then: above,
            otherwise: leaf(t),
        }],
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Label;

    fn leaf_of(t: TransId) -> Block {
        vec![Stmt::Goto(Label::Trans(t))]
    }

    /// Walks a dispatch tree for a concrete key.
    fn resolve(block: &[Stmt], key: i64) -> Option<TransId> {
        for stmt in block {
            match stmt {
                Stmt::Goto(Label::Trans(t)) => return Some(*t),
                Stmt::If { cond: Expr::Bin(op, _, b), then, otherwise } => {
                    let Expr::Lit(v) = **b else { return None };
                    let taken = match op {
                        BinOp::Lt => key < v,
                        BinOp::Gt => key > v,
                        _ => return None,
                    };
                    return resolve(if taken { then } else { otherwise }, key);
                }
                Stmt::Switch { cases, default, .. } => {
                    let body = cases.iter().find(|c| c.values.contains(&key)).map_or(default, |c| &c.body);
                    return resolve(body, key);
                }
                _ => {}
            }
        }
        None
    }

    #[test]
    fn dispatch_tree_agrees_with_spans() {
        let spans = StateSpans {
            state: 0,
            default: Some(9),
            ranges: vec![
                (KeyRange::new(10, 20), 1),
                (KeyRange::new(30, 40), 2),
                (KeyRange::new(50, 60), 3),
                (KeyRange::new(70, 80), 4),
            ],
            singles: vec![(25, 5), (26, 5), (45, 6)],
        };
        let tree = key_dispatch(&spans, &Expr::Key, &vec![Stmt::Goto(Label::Out)], &mut leaf_of);
        for key in 0..100 {
            assert_eq!(resolve(&tree, key), spans.lookup(key), "key {key}");
        }
        match &tree[0] {
            Stmt::Switch { cases, .. } => {
                assert_eq!(cases.len(), 2);
                assert_eq!(cases[0].values, vec![25, 26]);
            }
            other => panic!("expected singles switch, got {other:?}"),
        }
    }

    #[test]
    fn empty_spans_take_default_or_fallback() {
        let spans = StateSpans { state: 0, default: Some(3), ranges: vec![], singles: vec![] };
        assert_eq!(key_dispatch(&spans, &Expr::Key, &vec![], &mut leaf_of), leaf_of(3));
        let none = StateSpans { default: None, ..spans };
        let fallback = vec![Stmt::Goto(Label::Out)];
        assert_eq!(key_dispatch(&none, &Expr::Key, &fallback, &mut leaf_of), fallback);
    }
}
