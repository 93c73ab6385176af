// Action renderer: inline items to IR statements
//
// Rendering is a pure function of the item list and a `RenderCtx`. The shape
// supplies its control idioms through `ControlBindings`.

use fsmgen_core::action::{Action, InlineItem};
use fsmgen_core::fsm::RedFsm;
use fsmgen_core::{ActListId, StateId};

use crate::ir::{Block, Case, Expr, Frag, Place, Stmt, Var};
use crate::options::GenOptions;

/// Where an action list is being rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderCtx {
    /// State the surrounding transition enters, when it is known statically.
    pub targ: Option<StateId>,
    /// Rendering for the end-of-input phase; control cannot resume reading.
    pub in_eof: bool,
    /// The shape has already stored the target in the state variable.
    pub cs_forced: bool,
}

impl RenderCtx {
    pub fn forced() -> Self {
        RenderCtx { targ: None, in_eof: false, cs_forced: true }
    }

    pub fn to(targ: StateId) -> Self {
        RenderCtx { targ: Some(targ), in_eof: false, cs_forced: false }
    }

    pub fn eof(self) -> Self {
        RenderCtx { in_eof: true, ..self }
    }
}

/// Shape-specific control idioms.
pub trait ControlBindings {
    /// Transfer to the entry of `dest`. Shapes that dispatch on the state
    /// variable store `dest` first.
    fn jump(&self, dest: StateId) -> Block;
    /// Continue at the point that dispatches on the state variable.
    fn redispatch(&self) -> Block;
    /// Leave the run loop.
    fn exit(&self) -> Block;
    /// State pushed by a call.
    fn call_return(&self, ctx: &RenderCtx) -> Expr;
    fn targs(&self, ctx: &RenderCtx) -> Expr;
    fn curs(&self, _ctx: &RenderCtx) -> Expr {
        Expr::Var(Var::Ps)
    }
}

/// Bindings of the shapes that keep the target in the state variable while
/// actions run and re-enter through a common post-action phase.
pub struct DispatchBindings {
    pub redispatch: Block,
    pub exit: Block,
}

impl ControlBindings for DispatchBindings {
    fn jump(&self, dest: StateId) -> Block {
        let mut out = vec![Stmt::assign(Var::Cs, Expr::Lit(dest as i64))];
        out.extend(self.redispatch.iter().cloned());
        out
    }

    fn redispatch(&self) -> Block {
        self.redispatch.clone()
    }

    fn exit(&self) -> Block {
        self.exit.clone()
    }

    fn call_return(&self, _ctx: &RenderCtx) -> Expr {
        Expr::Var(Var::Cs)
    }

    fn targs(&self, _ctx: &RenderCtx) -> Expr {
        Expr::Var(Var::Cs)
    }
}

pub struct ActionRenderer<'a> {
    fsm: &'a RedFsm,
    opts: &'a GenOptions,
    bindings: &'a dyn ControlBindings,
}

impl<'a> ActionRenderer<'a> {
    pub fn new(fsm: &'a RedFsm, opts: &'a GenOptions, bindings: &'a dyn ControlBindings) -> Self {
        Self { fsm, opts, bindings }
    }

    /// Every action of a table, in order.
    pub fn table(&self, id: ActListId, ctx: &RenderCtx) -> Block {
        let mut out = Vec::new();
        for action in self.fsm.table_actions(id) {
            out.extend(self.action(action, ctx));
        }
        out
    }

    /// One action as a scoped block, preceded by a line directive when enabled.
    pub fn action(&self, action: &Action, ctx: &RenderCtx) -> Block {
        let mut out = Vec::new();
        if self.opts.line_directives {
            if let Some(loc) = &action.loc {
                out.push(Stmt::Line(loc.clone()));
            }
        }
        out.push(Stmt::Scope(self.items(&action.items, ctx)));
        out
    }

    /// A condition action as a boolean host expression.
    pub fn condition(&self, action: &Action) -> Expr {
        self.expr(&action.items, &RenderCtx::default())
    }

    pub fn items(&self, items: &[InlineItem], ctx: &RenderCtx) -> Block {
        let mut emit = Emit::default();
        for item in items {
            if let Some(frag) = self.frag(item, ctx) {
                emit.frags.push(frag);
                continue;
            }
            emit.flush();
            self.control(item, ctx, &mut emit.out);
        }
        emit.flush();
        emit.out
    }

    /// Items forming an expression. Non-expression items are ignored.
    pub fn expr(&self, items: &[InlineItem], ctx: &RenderCtx) -> Expr {
        let mut frags: Vec<Frag> = items.iter().filter_map(|i| self.frag(i, ctx)).collect();
        if frags.len() == 1 && matches!(frags[0], Frag::Expr(_)) {
            if let Some(Frag::Expr(e)) = frags.pop() {
                return e;
            }
        }
        Expr::Host(frags)
    }

    fn frag(&self, item: &InlineItem, ctx: &RenderCtx) -> Option<Frag> {
        let expr = match item {
            InlineItem::Text(text) => return Some(Frag::Text(text.clone())),
            InlineItem::PChar => Expr::Var(Var::P),
            InlineItem::Char => Expr::Key,
            InlineItem::Curs => self.bindings.curs(ctx),
            InlineItem::Targs => self.bindings.targs(ctx),
            InlineItem::Entry(s) => Expr::Lit(*s as i64),
            InlineItem::LmGetTokEnd => Expr::Var(Var::Te),
            _ => return None,
        };
        Some(Frag::Expr(expr))
    }

    fn control(&self, item: &InlineItem, ctx: &RenderCtx, out: &mut Block) {
        match item {
            InlineItem::Goto(dest) => self.goto(*dest, ctx, out),
            InlineItem::Call(dest) => {
                self.push(ctx, out);
                self.goto(*dest, ctx, out);
            }
            InlineItem::GotoExpr(e) => {
                out.push(Stmt::assign(Var::Cs, self.expr(e, ctx)));
                self.redispatch(ctx, out);
            }
            InlineItem::CallExpr(e) => {
                self.push(ctx, out);
                out.push(Stmt::assign(Var::Cs, self.expr(e, ctx)));
                self.redispatch(ctx, out);
            }
            InlineItem::Next(dest) => out.push(Stmt::assign(Var::Cs, Expr::Lit(*dest as i64))),
            InlineItem::NextExpr(e) => out.push(Stmt::assign(Var::Cs, self.expr(e, ctx))),
            InlineItem::Ret => {
                out.push(Stmt::bump(Var::Top, -1));
                out.push(Stmt::assign(Var::Cs, Expr::Stack(Box::new(Expr::Var(Var::Top)))));
                self.redispatch(ctx, out);
            }
            InlineItem::Exec(e) => {
                out.push(Stmt::assign(Var::P, Expr::sub(self.expr(e, ctx), Expr::Lit(1))));
            }
            InlineItem::Hold => out.push(Stmt::bump(Var::P, -1)),
            InlineItem::LmSwitch(cases) => {
                let mut arms = Vec::new();
                let mut default = Vec::new();
                for case in cases {
                    let body = self.items(&case.body, ctx);
                    match case.lm_id {
                        Some(id) => arms.push(Case { values: vec![id as i64], body }),
                        None => default = body,
                    }
                }
                out.push(Stmt::Switch { on: Expr::Var(Var::Act), cases: arms, default });
            }
            InlineItem::LmSetActId(id) => out.push(Stmt::assign(Var::Act, Expr::Lit(*id as i64))),
            InlineItem::LmSetTokEnd(offset) => {
                let value = match offset {
                    0 => Expr::Var(Var::P),
                    n => Expr::add(Expr::Var(Var::P), Expr::Lit(*n)),
                };
                out.push(Stmt::assign(Var::Te, value));
            }
            InlineItem::LmInitTokStart => out.push(Stmt::assign(Var::Ts, Expr::Null)),
            InlineItem::LmInitAct => out.push(Stmt::assign(Var::Act, Expr::Lit(0))),
            InlineItem::LmSetTokStart => out.push(Stmt::assign(Var::Ts, Expr::Var(Var::P))),
            InlineItem::SubAction(children) => out.push(Stmt::Scope(self.items(children, ctx))),
            InlineItem::Break => {
                out.push(Stmt::bump(Var::P, 1));
                if !ctx.cs_forced {
                    if let Some(targ) = ctx.targ {
                        out.push(Stmt::assign(Var::Cs, Expr::Lit(targ as i64)));
                    }
                }
                out.extend(self.bindings.exit());
            }
            // Expression items are handled by `frag`.
            _ => {}
        }
    }

    fn goto(&self, dest: StateId, ctx: &RenderCtx, out: &mut Block) {
        if ctx.in_eof {
            out.push(Stmt::assign(Var::Cs, Expr::Lit(dest as i64)));
            out.extend(self.bindings.exit());
        } else {
            out.extend(self.bindings.jump(dest));
        }
    }

    fn redispatch(&self, ctx: &RenderCtx, out: &mut Block) {
        if ctx.in_eof {
            out.extend(self.bindings.exit());
        } else {
            out.extend(self.bindings.redispatch());
        }
    }

    fn push(&self, ctx: &RenderCtx, out: &mut Block) {
        out.push(Stmt::Assign(
            Place::Stack(Expr::Var(Var::Top)),
            self.bindings.call_return(ctx),
        ));
        out.push(Stmt::bump(Var::Top, 1));
    }
}

#[derive(Default)]
struct Emit {
    out: Block,
    frags: Vec<Frag>,
}

impl Emit {
    fn flush(&mut self) {
        if !self.frags.is_empty() {
            self.out.push(Stmt::Host(std::mem::take(&mut self.frags)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Label;
    use fsmgen_core::action::{InputLoc, LmCase};
    use fsmgen_core::builder::FsmBuilder;
    use fsmgen_core::keys::IntType;

    fn fsm() -> RedFsm {
        let mut b = FsmBuilder::new(IntType::U8);
        b.ensure_states(2);
        b.set_start(0);
        b.set_default(0, 1, &[]);
        b.set_default(1, 1, &[]);
        b.build().unwrap()
    }

    fn bindings() -> DispatchBindings {
        DispatchBindings { redispatch: vec![Stmt::Goto(Label::Again)], exit: vec![Stmt::Goto(Label::Out)] }
    }

    fn render(items: Vec<InlineItem>, ctx: RenderCtx) -> Block {
        let fsm = fsm();
        let opts = GenOptions::default();
        let b = bindings();
        ActionRenderer::new(&fsm, &opts, &b).items(&items, &ctx)
    }

    #[test]
    fn text_and_expressions_share_one_host_statement() {
        let out = render(
            vec![InlineItem::text("emit("), InlineItem::PChar, InlineItem::text(");")],
            RenderCtx::forced(),
        );
        assert_eq!(
            out,
            vec![Stmt::Host(vec![
                Frag::Text("emit(".into()),
                Frag::Expr(Expr::Var(Var::P)),
                Frag::Text(");".into()),
            ])]
        );
    }

    #[test]
    fn goto_sets_state_and_redispatches() {
        let out = render(vec![InlineItem::Goto(1)], RenderCtx::forced());
        assert_eq!(out, vec![Stmt::assign(Var::Cs, Expr::Lit(1)), Stmt::Goto(Label::Again)]);

        let eof = render(vec![InlineItem::Goto(1)], RenderCtx::forced().eof());
        assert_eq!(eof, vec![Stmt::assign(Var::Cs, Expr::Lit(1)), Stmt::Goto(Label::Out)]);
    }

    #[test]
    fn call_pushes_then_jumps_and_ret_pops() {
        let out = render(vec![InlineItem::Call(1)], RenderCtx::forced());
        assert_eq!(out[0], Stmt::Assign(Place::Stack(Expr::Var(Var::Top)), Expr::Var(Var::Cs)));
        assert_eq!(out[1], Stmt::bump(Var::Top, 1));
        assert_eq!(out.last(), Some(&Stmt::Goto(Label::Again)));

        let ret = render(vec![InlineItem::Ret], RenderCtx::forced());
        assert_eq!(ret[0], Stmt::bump(Var::Top, -1));
        assert_eq!(ret.len(), 3);
    }

    #[test]
    fn break_assigns_state_unless_forced() {
        let forced = render(vec![InlineItem::Break], RenderCtx { targ: Some(1), ..RenderCtx::forced() });
        assert_eq!(forced, vec![Stmt::bump(Var::P, 1), Stmt::Goto(Label::Out)]);
        let free = render(vec![InlineItem::Break], RenderCtx::to(1));
        assert_eq!(free[1], Stmt::assign(Var::Cs, Expr::Lit(1)));
    }

    #[test]
    fn exec_and_longest_match_bookkeeping() {
        let out = render(
            vec![
                InlineItem::LmSetTokEnd(1),
                InlineItem::LmSetActId(2),
                InlineItem::LmSwitch(vec![
                    LmCase { lm_id: Some(2), body: vec![InlineItem::Exec(vec![InlineItem::LmGetTokEnd])] },
                    LmCase { lm_id: None, body: vec![InlineItem::Hold] },
                ]),
            ],
            RenderCtx::forced(),
        );
        assert_eq!(out[0], Stmt::assign(Var::Te, Expr::add(Expr::Var(Var::P), Expr::Lit(1))));
        assert_eq!(out[1], Stmt::assign(Var::Act, Expr::Lit(2)));
        match &out[2] {
            Stmt::Switch { on, cases, default } => {
                assert_eq!(on, &Expr::Var(Var::Act));
                assert_eq!(
                    cases[0].body,
                    vec![Stmt::assign(Var::P, Expr::sub(Expr::Var(Var::Te), Expr::Lit(1)))]
                );
                assert_eq!(default, &vec![Stmt::bump(Var::P, -1)]);
            }
            other => panic!("expected switch, got {other:?}"),
        }
    }

    #[test]
    fn line_directive_precedes_located_actions() {
        let fsm = fsm();
        let opts = GenOptions { line_directives: true, ..GenOptions::default() };
        let b = bindings();
        let action = Action::new(vec![InlineItem::text("x;")]).at(InputLoc::new("a.rl", 7, 3));
        let out = ActionRenderer::new(&fsm, &opts, &b).action(&action, &RenderCtx::forced());
        assert_eq!(out[0], Stmt::Line(InputLoc::new("a.rl", 7, 3)));
        assert!(matches!(out[1], Stmt::Scope(_)));
    }
}
