// Direct-jump shapes
//
// `GotoShape` keeps a state switch and jumps from its leaves to one label per
// transition. `IpGotoShape` places every state at its own label and jumps
// between them directly; the split shape reuses its layout per partition.

use hashbrown::HashSet;

use fsmgen_core::fsm::RedFsm;
use fsmgen_core::{StateId, TransId};

use crate::CodegenError;
use crate::ir::{ArrayId, BinOp, Block, Case, Expr, ExecSection, Label, Stmt, Var};
use crate::liveness::Liveness;
use crate::render::{ActionRenderer, ControlBindings, DispatchBindings, RenderCtx};
use crate::shape::{CodeShape, LowerCtx, ShapeOutput, dispatch, table_switch};
use crate::tables::{self, StateActions, StateSpans};

pub struct GotoShape;

impl CodeShape for GotoShape {
    fn lower(&self, cx: &LowerCtx<'_>) -> Result<ShapeOutput, CodegenError> {
        let fsm = cx.fsm;
        let facts = &cx.facts;
        let spans = tables::jump_tables(fsm);
        let live = Liveness::dispatch(fsm);
        let bindings = DispatchBindings {
            redispatch: vec![Stmt::Goto(Label::Again)],
            exit: vec![Stmt::Goto(Label::Out)],
        };
        let r = ActionRenderer::new(fsm, cx.opts, &bindings);
        let cs = || Expr::Var(Var::Cs);
        let key = cx.key();
        let out = vec![Stmt::Goto(Label::Out)];

        let mut body: Block = Vec::new();
        if !cx.opts.no_end {
            body.push(Stmt::when(
                Expr::bin(BinOp::Ge, Expr::Var(Var::P), Expr::Var(Var::Pe)),
                vec![Stmt::Goto(Label::TestEof)],
            ));
        }
        if let Some(err) = fsm.error {
            body.push(Stmt::when(Expr::eq(cs(), Expr::Lit(err as i64)), out.clone()));
        }

        body.push(Stmt::Label(Label::Resume));
        if facts.any_from_state_actions {
            body.push(table_switch(fsm, &r, ArrayId::FromStateActions, |t| t.from_state, RenderCtx::forced()));
        }
        if facts.any_conditions {
            body.extend(cond_switch(fsm, &cx.order, &r));
        }

        let mut cases = Vec::new();
        for &id in &cx.order {
            if Some(id) == fsm.error {
                continue;
            }
            let mut leaf = |t: TransId| vec![Stmt::Goto(Label::Trans(t))];
            let tree = dispatch::key_dispatch(&spans[id as usize], &key, &out, &mut leaf);
            cases.push(Case { values: vec![id as i64], body: tree });
        }
        body.push(Stmt::Switch { on: cs(), cases, default: out.clone() });

        // One label per taken transition, one block per action list.
        let mut action_lists = Vec::new();
        for (t, trans) in fsm.transitions.iter().enumerate() {
            if !live.trans_needed(t as TransId) {
                continue;
            }
            body.push(Stmt::Label(Label::Trans(t as TransId)));
            if facts.flags.cur_state_ref {
                body.push(Stmt::assign(Var::Ps, cs()));
            }
            body.push(Stmt::assign(Var::Cs, Expr::Lit(trans.target as i64)));
            match trans.action {
                Some(a) => {
                    if !action_lists.contains(&a) {
                        action_lists.push(a);
                    }
                    body.push(Stmt::Goto(Label::Action(a)));
                }
                None => body.push(Stmt::Goto(Label::Again)),
            }
        }
        action_lists.sort_unstable();
        for a in action_lists {
            body.push(Stmt::Label(Label::Action(a)));
            body.extend(r.table(a, &RenderCtx::forced()));
            body.push(Stmt::Goto(Label::Again));
        }

        body.push(Stmt::Label(Label::Again));
        if facts.any_to_state_actions {
            body.push(table_switch(fsm, &r, ArrayId::ToStateActions, |t| t.to_state, RenderCtx::forced()));
        }
        if let Some(err) = fsm.error {
            body.push(Stmt::when(Expr::eq(cs(), Expr::Lit(err as i64)), out.clone()));
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
                let cases = cx
                    .order
                    .iter()
                    .filter_map(|&id| fsm.state(id).eof_trans.map(|t| (id, t)))
                    .map(|(id, t)| Case { values: vec![id as i64], body: vec![Stmt::Goto(Label::Trans(t))] })
                    .collect();
                at_eof.push(Stmt::Switch { on: cs(), cases, default: Vec::new() });
            }
            if facts.any_eof_actions {
                at_eof.push(table_switch(fsm, &r, ArrayId::EofActions, |t| t.eof, RenderCtx::forced().eof()));
            }
            body.push(Stmt::when(Expr::eq(Expr::Var(Var::P), Expr::Var(Var::Eof)), at_eof));
        }
        body.push(Stmt::Label(Label::Out));

        Ok(ShapeOutput {
            exec: ExecSection { locals: cx.common_locals(), body, functions: None, partitions: Vec::new() },
            arrays: StateActions::build(fsm).arrays(facts),
        })
    }
}

/// `_widec = key` followed by a state switch over the condition translations.
pub(crate) fn cond_switch(fsm: &RedFsm, order: &[StateId], r: &ActionRenderer<'_>) -> Block {
    let cases = order
        .iter()
        .map(|&id| fsm.state(id))
        .filter(|s| !s.conds.is_empty())
        .map(|s| Case { values: vec![s.id as i64], body: dispatch::cond_translate(fsm, s, r) })
        .collect();
    vec![
        Stmt::assign(Var::Widec, Expr::Key),
        Stmt::Switch { on: Expr::Var(Var::Cs), cases, default: Vec::new() },
    ]
}

pub struct IpGotoShape;

impl CodeShape for IpGotoShape {
    fn lower(&self, cx: &LowerCtx<'_>) -> Result<ShapeOutput, CodegenError> {
        let spans = tables::jump_tables(cx.fsm);
        let live = Liveness::in_place(cx.fsm, &cx.facts, cx.opts);
        let layout = InPlace { cx, spans: &spans, live: &live, owner: None };
        let mut body = Vec::new();
        if !cx.opts.no_end {
            body.push(Stmt::when(
                Expr::bin(BinOp::Ge, Expr::Var(Var::P), Expr::Var(Var::Pe)),
                vec![Stmt::Goto(Label::TestEof)],
            ));
        }
        body.extend(layout.unit_body());
        body.extend(layout.eof_section());
        Ok(ShapeOutput {
            exec: ExecSection { locals: cx.common_locals(), body, functions: None, partitions: Vec::new() },
            arrays: Vec::new(),
        })
    }
}

/// In-place layout of a set of states: entry switch, transition blocks
/// placed before their targets, state blocks, re-dispatch switch and the
/// end-of-input exits.
pub(crate) struct InPlace<'a> {
    pub cx: &'a LowerCtx<'a>,
    pub spans: &'a [StateSpans],
    pub live: &'a Liveness,
    /// Partition of every state and the partition being laid out.
    pub owner: Option<(&'a [usize], usize)>,
}

impl InPlace<'_> {
    pub fn is_member(&self, s: StateId) -> bool {
        match self.owner {
            Some((map, part)) => map.get(s as usize) == Some(&part),
            None => true,
        }
    }

    /// Label that enters `s` from a transition.
    pub fn entry(&self, s: StateId) -> Label {
        if self.is_member(s) { Label::State(s) } else { Label::PartState(s) }
    }

    fn bindings(&self) -> InPlaceBindings<'_> {
        InPlaceBindings { layout: self }
    }

    fn leaf(&self, t: TransId) -> Block {
        let trans = self.cx.fsm.trans(t);
        match trans.action {
            Some(_) => vec![Stmt::Goto(Label::Trans(t))],
            None => vec![Stmt::Goto(self.entry(trans.target))],
        }
    }

    /// Everything after the initial end-of-buffer test.
    pub fn unit_body(&self) -> Block {
        let fsm = self.cx.fsm;
        let bindings = self.bindings();
        let r = ActionRenderer::new(fsm, self.cx.opts, &bindings);
        let members: Vec<StateId> = self.cx.order.iter().copied().filter(|&s| self.is_member(s)).collect();
        let out = vec![Stmt::Goto(Label::Out)];

        let mut body = Vec::new();
        let entry_cases = members
            .iter()
            .map(|&s| Case { values: vec![s as i64], body: vec![Stmt::Goto(Label::Case(s))] })
            .collect();
        body.push(Stmt::Switch { on: Expr::Var(Var::Cs), cases: entry_cases, default: out.clone() });

        let trans_blocks: Vec<TransId> = (0..fsm.transitions.len() as TransId)
            .filter(|&t| self.live.trans_needed(t) && fsm.trans(t).action.is_some())
            .collect();
        let mut placed: HashSet<TransId> = HashSet::new();
        for &s in &members {
            for &t in &trans_blocks {
                if fsm.trans(t).target == s && placed.insert(t) {
                    body.extend(self.trans_block(t, &r));
                }
            }
            body.extend(self.state_block(s, &r));
        }
        for &t in &trans_blocks {
            if placed.insert(t) {
                body.extend(self.trans_block(t, &r));
            }
        }

        if self.cx.facts.use_again_label() {
            let cases = (0..fsm.state_count() as StateId)
                .map(|s| Case { values: vec![s as i64], body: vec![Stmt::Goto(self.entry(s))] })
                .collect();
            body.push(Stmt::Label(Label::Again));
            body.push(Stmt::Switch { on: Expr::Var(Var::Cs), cases, default: out });
        }
        body
    }

    fn trans_block(&self, t: TransId, r: &ActionRenderer<'_>) -> Block {
        let trans = self.cx.fsm.trans(t);
        let mut out = vec![Stmt::Label(Label::Trans(t))];
        let Some(a) = trans.action else {
            out.push(Stmt::Goto(self.entry(trans.target)));
            return out;
        };
        let has_next = self.cx.fsm.table_flags(a).next;
        if has_next {
            out.push(Stmt::assign(Var::Cs, Expr::Lit(trans.target as i64)));
        }
        let ctx = RenderCtx { targ: Some(trans.target), in_eof: false, cs_forced: has_next };
        out.extend(r.table(a, &ctx));
        if has_next {
            out.push(Stmt::Goto(Label::Again));
        } else {
            out.push(Stmt::Goto(self.entry(trans.target)));
        }
        out
    }

    fn state_block(&self, s: StateId, r: &ActionRenderer<'_>) -> Block {
        let fsm = self.cx.fsm;
        let facts = &self.cx.facts;
        let state = fsm.state(s);
        let mut out = Vec::new();

        if Some(s) == fsm.error {
            if self.live.needs_label(s) {
                out.push(Stmt::Label(Label::State(s)));
            }
            out.push(Stmt::Label(Label::Case(s)));
            out.push(Stmt::assign(Var::Cs, Expr::Lit(s as i64)));
            out.push(Stmt::Goto(Label::Out));
            return out;
        }

        if self.live.needs_label(s) {
            out.push(Stmt::Label(Label::State(s)));
            if let Some(a) = state.to_state_action {
                out.extend(r.table(a, &RenderCtx::to(s)));
            }
            out.push(Stmt::bump(Var::P, 1));
            if self.live.needs_out(s) {
                out.push(Stmt::when(
                    Expr::bin(BinOp::Ge, Expr::Var(Var::P), Expr::Var(Var::Pe)),
                    vec![Stmt::Goto(Label::StateEof(s))],
                ));
            }
        }
        out.push(Stmt::Label(Label::Case(s)));
        if facts.flags.cur_state_ref {
            out.push(Stmt::assign(Var::Ps, Expr::Lit(s as i64)));
        }
        if let Some(a) = state.from_state_action {
            out.extend(r.table(a, &RenderCtx::to(s)));
        }
        if facts.any_conditions {
            out.push(Stmt::assign(Var::Widec, Expr::Key));
            out.extend(dispatch::cond_translate(fsm, state, r));
        }
        let fallback = vec![Stmt::Goto(Label::Out)];
        let mut leaf = |t: TransId| self.leaf(t);
        out.extend(dispatch::key_dispatch(&self.spans[s as usize], &self.cx.key(), &fallback, &mut leaf));
        out
    }

    /// Per-state exits, the shared end-of-input block, and the out label.
    pub fn eof_section(&self) -> Block {
        let fsm = self.cx.fsm;
        let bindings = self.bindings();
        let r = ActionRenderer::new(fsm, self.cx.opts, &bindings);
        let members: Vec<StateId> = self.cx.order.iter().copied().filter(|&s| self.is_member(s)).collect();

        let mut body = Vec::new();
        for &s in &members {
            if self.live.needs_out(s) {
                body.push(Stmt::Label(Label::StateEof(s)));
                body.push(Stmt::assign(Var::Cs, Expr::Lit(s as i64)));
                body.push(Stmt::Goto(Label::TestEof));
            }
        }
        body.push(Stmt::Label(Label::TestEof));

        let mut cases = Vec::new();
        for &s in &members {
            let state = fsm.state(s);
            if let Some(t) = state.eof_trans {
                cases.push(Case { values: vec![s as i64], body: self.leaf(t) });
            } else if let Some(a) = state.eof_action {
                cases.push(Case { values: vec![s as i64], body: r.table(a, &RenderCtx::to(s).eof()) });
            }
        }
        if !cases.is_empty() {
            body.push(Stmt::when(
                Expr::eq(Expr::Var(Var::P), Expr::Var(Var::Eof)),
                vec![Stmt::Switch { on: Expr::Var(Var::Cs), cases, default: Vec::new() }],
            ));
        }
        body.push(Stmt::Label(Label::Out));
        body
    }

    /// Arrival at a state owned by another partition: the work `stN` would do,
    /// then a status for the selector.
    pub fn foreign_arrival(&self, s: StateId) -> Block {
        let fsm = self.cx.fsm;
        let bindings = self.bindings();
        let r = ActionRenderer::new(fsm, self.cx.opts, &bindings);
        let mut out = vec![Stmt::Label(Label::PartState(s))];
        if Some(s) == fsm.error {
            out.push(Stmt::assign(Var::Cs, Expr::Lit(s as i64)));
            out.push(Stmt::Return(0));
            return out;
        }
        if let Some(a) = fsm.state(s).to_state_action {
            out.extend(r.table(a, &RenderCtx::to(s)));
        }
        out.push(Stmt::bump(Var::P, 1));
        out.push(Stmt::assign(Var::Cs, Expr::Lit(s as i64)));
        if !self.cx.opts.no_end {
            out.push(Stmt::when(
                Expr::bin(BinOp::Ge, Expr::Var(Var::P), Expr::Var(Var::Pe)),
                vec![Stmt::Return(2)],
            ));
        }
        out.push(Stmt::Return(1));
        out
    }
}

struct InPlaceBindings<'a> {
    layout: &'a InPlace<'a>,
}

impl ControlBindings for InPlaceBindings<'_> {
    fn jump(&self, dest: StateId) -> Block {
        vec![Stmt::Goto(self.layout.entry(dest))]
    }

    fn redispatch(&self) -> Block {
        vec![Stmt::Goto(Label::Again)]
    }

    fn exit(&self) -> Block {
        vec![Stmt::Goto(Label::Out)]
    }

    fn call_return(&self, ctx: &RenderCtx) -> Expr {
        self.targs(ctx)
    }

    fn targs(&self, ctx: &RenderCtx) -> Expr {
        match ctx.targ {
            Some(t) => Expr::Lit(t as i64),
            None => Expr::Var(Var::Cs),
        }
    }
}
