//! Code shape strategies.
//!
//! Every shape lowers the same machine into the IR of [`crate::ir`] with
//! identical external semantics. Shapes differ in how control reaches a
//! state: through a table lookup ([`flat`]), through a binary search of
//! sorted keys ([`table`]), through direct labels
//! ([`jump`]), through labels spread over independently compiled units
//! ([`split`]), or through a set of control functions ([`recursive`]).

pub mod dispatch;
pub mod flat;
pub mod jump;
pub mod recursive;
pub mod split;
pub mod table;

use fsmgen_core::fsm::{RedFsm, TableRefs};
use fsmgen_core::StateId;

use crate::CodegenError;
use crate::analysis::{self, MachineFacts};
use crate::ir::{ArrayId, Case, Expr, ExecSection, Local, Stmt, Var};
use crate::options::GenOptions;
use crate::render::{ActionRenderer, RenderCtx};

/// The available code shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Flat,
    Table,
    Goto,
    IpGoto,
    Split { partitions: usize },
    Recursive,
}

impl Shape {
    pub fn name(self) -> &'static str {
        match self {
            Shape::Flat => "flat",
            Shape::Table => "table",
            Shape::Goto => "goto",
            Shape::IpGoto => "ipgoto",
            Shape::Split { .. } => "split",
            Shape::Recursive => "recursive",
        }
    }

    pub fn strategy(self) -> Box<dyn CodeShape> {
        match self {
            Shape::Flat => Box::new(flat::FlatShape),
            Shape::Table => Box::new(table::TableShape),
            Shape::Goto => Box::new(jump::GotoShape),
            Shape::IpGoto => Box::new(jump::IpGotoShape),
            Shape::Split { partitions } => Box::new(split::SplitShape { partitions }),
            Shape::Recursive => Box::new(recursive::RecursiveShape),
        }
    }
}

/// Everything a shape reads. Built once per unit, before lowering starts.
pub struct LowerCtx<'a> {
    pub fsm: &'a RedFsm,
    pub opts: &'a GenOptions,
    pub facts: MachineFacts,
    /// Layout order of the states.
    pub order: Vec<StateId>,
}

impl<'a> LowerCtx<'a> {
    pub fn new(fsm: &'a RedFsm, opts: &'a GenOptions, shape: Shape) -> Self {
        LowerCtx { fsm, opts, facts: MachineFacts::of(fsm), order: analysis::order_states(fsm, shape) }
    }

    /// The key the transition dispatch reads.
    pub fn key(&self) -> Expr {
        if self.facts.any_conditions { Expr::Var(Var::Widec) } else { Expr::Key }
    }

    /// Locals shared by every shape: the widened key and the previous state.
    pub fn common_locals(&self) -> Vec<Local> {
        let mut locals = Vec::new();
        if self.facts.any_conditions {
            locals.push(Local { var: Var::Widec, is_key: true });
        }
        if self.facts.flags.cur_state_ref {
            locals.push(Local { var: Var::Ps, is_key: false });
        }
        locals
    }
}

/// Output of one shape: its execution section and the arrays it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeOutput {
    pub exec: ExecSection,
    pub arrays: Vec<(ArrayId, Vec<i64>)>,
}

pub trait CodeShape {
    fn lower(&self, cx: &LowerCtx<'_>) -> Result<ShapeOutput, CodegenError>;
}

/// `switch (array[cs])` over every table referenced in one category.
pub(crate) fn table_switch(
    fsm: &RedFsm,
    renderer: &ActionRenderer<'_>,
    array: ArrayId,
    refs: fn(&TableRefs) -> u32,
    ctx: RenderCtx,
) -> Stmt {
    let cases = fsm
        .tables
        .iter()
        .filter(|t| refs(&t.refs) > 0)
        .map(|t| Case { values: vec![t.id as i64 + 1], body: renderer.table(t.id, &ctx) })
        .collect();
    Stmt::Switch { on: Expr::elem(array, Expr::Var(Var::Cs)), cases, default: Vec::new() }
}
