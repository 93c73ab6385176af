// Target-independent control-flow IR
//
// Code shapes lower a machine into this form. Formatters render it as source
// text and the simulator executes it directly.

use hashbrown::HashSet;

use fsmgen_core::action::InputLoc;
use fsmgen_core::keys::{IntType, KeyRange};

use crate::shape::Shape;

pub type Block = Vec<Stmt>;

/// Variables referenced by emitted code.
///
/// The first group belongs to the host program and can be renamed through
/// [`crate::options::VarNames`]; the rest are scratch locals of the emitted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Var {
    P,
    Pe,
    Eof,
    Cs,
    Top,
    Ts,
    Te,
    Act,
    /// Located transition index.
    Trans,
    /// Offset of the current state's key pair.
    Keys,
    /// Offset of the current state's index block.
    Inds,
    /// Span width of the current state.
    Slen,
    /// Entry count of the list being searched.
    Klen,
    /// Binary search bounds and probe.
    Lower,
    Upper,
    Mid,
    /// Widened key.
    Widec,
    /// Condition space reference for the current key.
    Cond,
    /// State before the current transition.
    Ps,
    /// Partition return status.
    Stat,
}

impl Var {
    /// Whether the variable belongs to the host program rather than the emitted block.
    pub fn is_machine(self) -> bool {
        matches!(
            self,
            Var::P | Var::Pe | Var::Eof | Var::Cs | Var::Top | Var::Ts | Var::Te | Var::Act
        )
    }
}

/// Logical data arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayId {
    TransKeys,
    KeySpans,
    KeyOffsets,
    SingleLengths,
    RangeLengths,
    IndexOffsets,
    Indicies,
    TransTargs,
    TransActions,
    ToStateActions,
    FromStateActions,
    EofActions,
    EofTrans,
    CondKeys,
    CondKeySpans,
    CondSpaces,
    CondOffsets,
    CondLengths,
    PartitionMap,
}

impl ArrayId {
    pub fn suffix(self) -> &'static str {
        match self {
            ArrayId::TransKeys => "trans_keys",
            ArrayId::KeySpans => "key_spans",
            ArrayId::KeyOffsets => "key_offsets",
            ArrayId::SingleLengths => "single_lengths",
            ArrayId::RangeLengths => "range_lengths",
            ArrayId::IndexOffsets => "index_offsets",
            ArrayId::Indicies => "indicies",
            ArrayId::TransTargs => "trans_targs",
            ArrayId::TransActions => "trans_actions",
            ArrayId::ToStateActions => "to_state_actions",
            ArrayId::FromStateActions => "from_state_actions",
            ArrayId::EofActions => "eof_actions",
            ArrayId::EofTrans => "eof_trans",
            ArrayId::CondKeys => "cond_keys",
            ArrayId::CondKeySpans => "cond_key_spans",
            ArrayId::CondSpaces => "cond_spaces",
            ArrayId::CondOffsets => "cond_offsets",
            ArrayId::CondLengths => "cond_lengths",
            ArrayId::PartitionMap => "partition_map",
        }
    }
}

/// Named integer constants of the data section.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstId {
    Start,
    FirstFinal,
    Error,
    Entry(String),
    Export(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Lit(i64),
    /// Null sentinel for token positions.
    Null,
    Var(Var),
    /// Current input key.
    Key,
    Const(ConstId),
    Elem(ArrayId, Box<Expr>),
    Stack(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    Select(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Opaque user expression.
    Host(Vec<Frag>),
}

impl Expr {
    pub fn var(v: Var) -> Expr {
        Expr::Var(v)
    }

    pub fn elem(array: ArrayId, index: Expr) -> Expr {
        Expr::Elem(array, Box::new(index))
    }

    pub fn bin(op: BinOp, a: Expr, b: Expr) -> Expr {
        Expr::Bin(op, Box::new(a), Box::new(b))
    }

    pub fn add(a: Expr, b: Expr) -> Expr {
        Expr::bin(BinOp::Add, a, b)
    }

    pub fn sub(a: Expr, b: Expr) -> Expr {
        Expr::bin(BinOp::Sub, a, b)
    }

    pub fn eq(a: Expr, b: Expr) -> Expr {
        Expr::bin(BinOp::Eq, a, b)
    }

    pub fn select(cond: Expr, a: Expr, b: Expr) -> Expr {
        Expr::Select(Box::new(cond), Box::new(a), Box::new(b))
    }
}

/// Piece of opaque host code: literal text or an embedded expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Frag {
    Text(String),
    Expr(Expr),
}

/// Assignable location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Place {
    Var(Var),
    Stack(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Case {
    pub values: Vec<i64>,
    pub body: Block,
}

/// Jump targets of the labeled shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    Resume,
    EofTrans,
    Again,
    TestEof,
    Out,
    /// Partition selector re-entry.
    Reenter,
    /// Binary search loops of the table shape and their exits.
    SingleSearch,
    SingleMiss,
    RangeSearch,
    RangeMiss,
    /// Located transition index ready to be read.
    Match,
    CondSearch,
    CondDone,
    /// State entry (`stN`).
    State(u32),
    /// Dispatch point of a state, after its entry work.
    Case(u32),
    /// Transition with actions (`trN`).
    Trans(u32),
    /// Action list block (`fN`).
    Action(u32),
    /// Per-state end-of-input exit.
    StateEof(u32),
    /// Arrival at a state owned by another partition.
    PartState(u32),
}

/// Control functions of the recursive shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Func {
    Start,
    Resume,
    Again,
    TestEof,
    EofTrans,
    Out,
    Trans(u32),
    Action(u32),
}

/// Non-local control signals of the recursive shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Resume,
    Again,
    EofTrans,
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Assign(Place, Expr),
    If { cond: Expr, then: Block, otherwise: Block },
    /// Cases never fall through.
    Switch { on: Expr, cases: Vec<Case>, default: Block },
    /// Braced block, used to scope user action code.
    Scope(Block),
    Label(Label),
    Goto(Label),
    /// Opaque user statement text.
    Host(Vec<Frag>),
    Line(InputLoc),
    /// Tail call to a control function.
    Transfer(Func),
    Raise(Signal),
    /// Run the control function set from an entry until it finishes.
    Trampoline(Func),
    /// Leave the trampoline.
    Finish,
    /// Run a partition unit and store its status.
    Invoke { part: usize, status: Var },
    /// Leave a partition unit with a status.
    Return(i64),
}

impl Stmt {
    pub fn assign(var: Var, value: Expr) -> Stmt {
        Stmt::Assign(Place::Var(var), value)
    }

    /// `var = var + by`
    pub fn bump(var: Var, by: i64) -> Stmt {
        Stmt::assign(var, Expr::add(Expr::Var(var), Expr::Lit(by)))
    }

    pub fn when(cond: Expr, then: Block) -> Stmt {
        Stmt::If { cond, then, otherwise: Vec::new() }
    }

    /// Whether control never continues to the following statement.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Stmt::Goto(_) | Stmt::Transfer(_) | Stmt::Raise(_) | Stmt::Finish | Stmt::Return(_)
        )
    }

    fn for_each_child_block<'a>(&'a self, mut f: impl FnMut(&'a [Stmt])) {
        match self {
            Stmt::If { then, otherwise, .. } => {
                f(then);
                f(otherwise);
            }
            Stmt::Switch { cases, default, .. } => {
                for c in cases {
                    f(&c.body);
                }
                f(default);
            }
            Stmt::Scope(b) => f(b),
            _ => {}
        }
    }
}

/// Visits every statement of `block`, nested blocks included.
pub fn walk_block<'a>(block: &'a [Stmt], f: &mut impl FnMut(&'a Stmt)) {
    for stmt in block {
        f(stmt);
        stmt.for_each_child_block(|b| walk_block(b, f));
    }
}

/// Whether a block always ends in a control transfer.
pub fn ends_in_terminator(block: &[Stmt]) -> bool {
    block.last().is_some_and(Stmt::is_terminator)
}

pub fn defined_labels(block: &[Stmt]) -> HashSet<Label> {
    let mut out = HashSet::new();
    walk_block(block, &mut |s| {
        if let Stmt::Label(l) = s {
            out.insert(*l);
        }
    });
    out
}

pub fn goto_targets(block: &[Stmt]) -> HashSet<Label> {
    let mut out = HashSet::new();
    walk_block(block, &mut |s| {
        if let Stmt::Goto(l) = s {
            out.insert(*l);
        }
    });
    out
}

/// Scratch local of an emitted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Local {
    pub var: Var,
    /// Holds keys (the wide key type) rather than indices.
    pub is_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub id: Func,
    pub body: Block,
}

/// The control functions of the recursive shape plus the phase bound to each signal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionSet {
    pub functions: Vec<Function>,
    pub handlers: Vec<(Signal, Func)>,
}

impl FunctionSet {
    pub fn get(&self, id: Func) -> Option<&Function> {
        self.functions.iter().find(|f| f.id == id)
    }

    pub fn handler(&self, signal: Signal) -> Option<Func> {
        self.handlers.iter().find(|(s, _)| *s == signal).map(|&(_, f)| f)
    }

    /// Transfer targets and signal handlers that name a missing function,
    /// plus signals raised without a handler (reported as `None`).
    pub fn unresolved(&self) -> Vec<Option<Func>> {
        let defined: HashSet<Func> = self.functions.iter().map(|f| f.id).collect();
        let mut missing = Vec::new();
        for (_, f) in &self.handlers {
            if !defined.contains(f) {
                missing.push(Some(*f));
            }
        }
        for function in &self.functions {
            walk_block(&function.body, &mut |s| match s {
                Stmt::Transfer(f) if !defined.contains(f) => missing.push(Some(*f)),
                Stmt::Raise(sig) => match self.handler(*sig) {
                    None => missing.push(None),
                    Some(f) if !defined.contains(&f) => missing.push(Some(f)),
                    Some(_) => {}
                },
                _ => {}
            });
        }
        missing
    }
}

/// An independently compiled unit of the split shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionUnit {
    pub index: usize,
    pub locals: Vec<Local>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecSection {
    pub locals: Vec<Local>,
    pub body: Block,
    pub functions: Option<FunctionSet>,
    pub partitions: Vec<PartitionUnit>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataArray {
    pub id: ArrayId,
    pub ty: IntType,
    pub values: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataItem {
    Array(DataArray),
    Const { id: ConstId, value: i64 },
    /// Forward declaration of a partition unit.
    PartitionDecl(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataSection {
    pub items: Vec<DataItem>,
}

impl DataSection {
    pub fn array(&self, id: ArrayId) -> Option<&DataArray> {
        self.items.iter().find_map(|item| match item {
            DataItem::Array(a) if a.id == id => Some(a),
            _ => None,
        })
    }

    pub fn constant(&self, id: &ConstId) -> Option<i64> {
        self.items.iter().find_map(|item| match item {
            DataItem::Const { id: c, value } if c == id => Some(*value),
            _ => None,
        })
    }
}

/// A machine lowered into one code shape, ready for a formatter or the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lowered {
    pub shape: Shape,
    /// Key domain, widened keys included.
    pub keys: KeyRange,
    /// Element type of the input buffer.
    pub alphabet: IntType,
    pub data: DataSection,
    pub exec: ExecSection,
    pub init: Block,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_visits_nested_statements() {
        let block = vec![
            Stmt::Label(Label::Resume),
            Stmt::Switch {
                on: Expr::Var(Var::Cs),
                cases: vec![Case { values: vec![1], body: vec![Stmt::Goto(Label::State(1))] }],
                default: vec![Stmt::when(Expr::Lit(1), vec![Stmt::Goto(Label::Out)])],
            },
            Stmt::Label(Label::Out),
        ];
        let labels = defined_labels(&block);
        assert!(labels.contains(&Label::Resume) && labels.contains(&Label::Out));
        let targets = goto_targets(&block);
        assert_eq!(targets.len(), 2);
        assert!(targets.contains(&Label::State(1)));
    }

    #[test]
    fn terminators() {
        assert!(ends_in_terminator(&[Stmt::bump(Var::P, 1), Stmt::Goto(Label::Again)]));
        assert!(!ends_in_terminator(&[Stmt::Goto(Label::Again), Stmt::bump(Var::P, 1)]));
        assert!(!ends_in_terminator(&[]));
    }

    #[test]
    fn unresolved_reports_dangling_transfers_and_signals() {
        let set = FunctionSet {
            functions: vec![
                Function { id: Func::Start, body: vec![Stmt::Transfer(Func::Resume)] },
                Function { id: Func::Out, body: vec![Stmt::Raise(Signal::Again)] },
            ],
            handlers: vec![(Signal::Out, Func::Out)],
        };
        let missing = set.unresolved();
        assert_eq!(missing, vec![Some(Func::Resume), None]);
    }

    #[test]
    fn data_section_lookup() {
        let data = DataSection {
            items: vec![
                DataItem::Const { id: ConstId::Start, value: 3 },
                DataItem::Array(DataArray { id: ArrayId::KeySpans, ty: IntType::U8, values: vec![1, 2] }),
            ],
        };
        assert_eq!(data.constant(&ConstId::Start), Some(3));
        assert_eq!(data.constant(&ConstId::Error), None);
        assert_eq!(data.array(ArrayId::KeySpans).map(|a| a.values.len()), Some(2));
    }
}
