// Simulator for lowered units
//
// Executes the IR of a `Lowered` unit directly, so every shape can be checked
// against the same observable behavior without compiling emitted source.
// Opaque user code is handed to a `Host`.

use hashbrown::HashMap;

use crate::ir::{BinOp, ConstId, Expr, Frag, Func, Label, Lowered, Place, Signal, Stmt, Var};

const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error("step limit of {0} exceeded")]
    StepLimit(u64),
    #[error("jump to undefined label {0:?}")]
    UndefinedLabel(Label),
    #[error("no control function {0:?}")]
    UnknownFunction(Func),
    #[error("signal {0:?} has no handler")]
    UnhandledSignal(Signal),
    #[error("control function {0:?} ended without a transfer")]
    FellThrough(Func),
    #[error("no partition {0}")]
    UnknownPartition(usize),
    #[error("missing array {0}")]
    MissingArray(&'static str),
    #[error("array {array} has no element {index}")]
    ArrayIndex { array: &'static str, index: i64 },
    #[error("missing constant {0:?}")]
    MissingConst(ConstId),
    #[error("key read at {p} outside input of length {len}")]
    KeyOutOfBounds { p: i64, len: usize },
    #[error("stack index {0} out of range")]
    StackIndex(i64),
    #[error("{0} outside of its context")]
    Misplaced(&'static str),
    #[error("host: {0}")]
    Host(String),
}

/// Machine variables and scratch locals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Regs {
    pub p: i64,
    pub pe: i64,
    /// `-1` while more input may follow.
    pub eof: i64,
    pub cs: i64,
    pub top: i64,
    pub stack: Vec<i64>,
    pub ts: i64,
    pub te: i64,
    pub act: i64,
    locals: HashMap<Var, i64>,
}

impl Regs {
    pub fn get(&self, var: Var) -> i64 {
        match var {
            Var::P => self.p,
            Var::Pe => self.pe,
            Var::Eof => self.eof,
            Var::Cs => self.cs,
            Var::Top => self.top,
            Var::Ts => self.ts,
            Var::Te => self.te,
            Var::Act => self.act,
            other => self.locals.get(&other).copied().unwrap_or(0),
        }
    }

    pub fn set(&mut self, var: Var, value: i64) {
        match var {
            Var::P => self.p = value,
            Var::Pe => self.pe = value,
            Var::Eof => self.eof = value,
            Var::Cs => self.cs = value,
            Var::Top => self.top = value,
            Var::Ts => self.ts = value,
            Var::Te => self.te = value,
            Var::Act => self.act = value,
            other => {
                self.locals.insert(other, value);
            }
        }
    }
}

/// Executes opaque user code.
pub trait Host {
    /// A user statement, with embedded expressions already evaluated.
    fn exec(&mut self, text: &str, regs: &mut Regs) -> Result<(), SimError>;
    /// A user expression, such as a condition.
    fn eval(&mut self, text: &str, regs: &Regs) -> Result<i64, SimError>;
}

/// A host that records every statement and evaluates expressions from a
/// table of named values or integer literals.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pub log: Vec<String>,
    pub values: HashMap<String, i64>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many recorded statements equal `text`.
    pub fn count(&self, text: &str) -> usize {
        self.log.iter().filter(|l| *l == text).count()
    }
}

impl Host for Transcript {
    fn exec(&mut self, text: &str, _regs: &mut Regs) -> Result<(), SimError> {
        self.log.push(text.to_string());
        Ok(())
    }

    fn eval(&mut self, text: &str, _regs: &Regs) -> Result<i64, SimError> {
        let text = text.trim();
        if let Ok(n) = text.parse() {
            return Ok(n);
        }
        self.values.get(text).copied().ok_or_else(|| SimError::Host(format!("cannot evaluate `{text}`")))
    }
}

/// Keys of a byte string.
pub fn bytes(text: &str) -> Vec<i64> {
    text.bytes().map(i64::from).collect()
}

enum Op<'u> {
    Assign(&'u Place, &'u Expr),
    /// Falls through when `cond` holds, jumps otherwise.
    Branch { cond: &'u Expr, target: usize },
    Jump(usize),
    Switch { on: &'u Expr, arms: Vec<(i64, usize)>, default: usize },
    Goto(Label),
    Host(&'u [Frag]),
    Transfer(Func),
    Raise(Signal),
    Trampoline(Func),
    Finish,
    Invoke { part: usize, status: Var },
    Return(i64),
}

#[derive(Default)]
struct Program<'u> {
    ops: Vec<Op<'u>>,
    labels: HashMap<Label, usize>,
}

impl<'u> Program<'u> {
    fn compile(block: &'u [Stmt]) -> Self {
        let mut prog = Program::default();
        prog.block(block);
        prog
    }

    fn push(&mut self, op: Op<'u>) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    fn patch(&mut self, at: usize, to: usize) {
        match &mut self.ops[at] {
            Op::Branch { target, .. } => *target = to,
            Op::Jump(target) => *target = to,
            _ => {}
        }
    }

    fn block(&mut self, block: &'u [Stmt]) {
        for stmt in block {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &'u Stmt) {
        match stmt {
            Stmt::Assign(place, value) => {
                self.push(Op::Assign(place, value));
            }
            Stmt::If { cond, then, otherwise } => {
                let branch = self.push(Op::Branch { cond, target: 0 });
                self.block(then);
                if otherwise.is_empty() {
                    let end = self.ops.len();
                    self.patch(branch, end);
                } else {
                    let skip = self.push(Op::Jump(0));
                    let other = self.ops.len();
                    self.patch(branch, other);
                    self.block(otherwise);
                    let end = self.ops.len();
                    self.patch(skip, end);
                }
            }
            Stmt::Switch { on, cases, default } => {
                let switch = self.push(Op::Switch { on, arms: Vec::new(), default: 0 });
                let mut arms = Vec::new();
                let mut exits = Vec::new();
                for case in cases {
                    let start = self.ops.len();
                    arms.extend(case.values.iter().map(|&v| (v, start)));
                    self.block(&case.body);
                    exits.push(self.push(Op::Jump(0)));
                }
                let default_start = self.ops.len();
                self.block(default);
                let end = self.ops.len();
                for exit in exits {
                    self.patch(exit, end);
                }
                if let Op::Switch { arms: a, default: d, .. } = &mut self.ops[switch] {
                    *a = arms;
                    *d = default_start;
                }
            }
            Stmt::Scope(body) => self.block(body),
            Stmt::Label(label) => {
                self.labels.insert(*label, self.ops.len());
            }
            Stmt::Goto(label) => {
                self.push(Op::Goto(*label));
            }
            Stmt::Host(frags) => {
                self.push(Op::Host(frags));
            }
            Stmt::Line(_) => {}
            Stmt::Transfer(f) => {
                self.push(Op::Transfer(*f));
            }
            Stmt::Raise(s) => {
                self.push(Op::Raise(*s));
            }
            Stmt::Trampoline(f) => {
                self.push(Op::Trampoline(*f));
            }
            Stmt::Finish => {
                self.push(Op::Finish);
            }
            Stmt::Invoke { part, status } => {
                self.push(Op::Invoke { part: *part, status: *status });
            }
            Stmt::Return(n) => {
                self.push(Op::Return(*n));
            }
        }
    }
}

/// How a program stopped.
enum Exit {
    End,
    Transfer(Func),
    Raise(Signal),
    Finish,
    Return(i64),
}

struct Code<'u> {
    main: Program<'u>,
    init: Program<'u>,
    functions: Vec<(Func, Program<'u>)>,
    handlers: &'u [(Signal, Func)],
    partitions: Vec<Program<'u>>,
}

struct Cpu<'u, H> {
    unit: &'u Lowered,
    regs: Regs,
    host: H,
    input: Vec<i64>,
    steps: u64,
    limit: u64,
}

impl<H: Host> Cpu<'_, H> {
    fn tick(&mut self) -> Result<(), SimError> {
        self.steps += 1;
        if self.steps > self.limit {
            return Err(SimError::StepLimit(self.limit));
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> Result<i64, SimError> {
        Ok(match expr {
            Expr::Lit(n) => *n,
            Expr::Null => -1,
            Expr::Var(v) => self.regs.get(*v),
            Expr::Key => {
                let p = self.regs.p;
                usize::try_from(p)
                    .ok()
                    .and_then(|i| self.input.get(i))
                    .copied()
                    .ok_or(SimError::KeyOutOfBounds { p, len: self.input.len() })?
            }
            Expr::Const(id) => self.unit.data.constant(id).ok_or_else(|| SimError::MissingConst(id.clone()))?,
            Expr::Elem(array, index) => {
                let index = self.eval(index)?;
                let data = self.unit.data.array(*array).ok_or(SimError::MissingArray(array.suffix()))?;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| data.values.get(i))
                    .copied()
                    .ok_or(SimError::ArrayIndex { array: array.suffix(), index })?
            }
            Expr::Stack(index) => {
                let index = self.eval(index)?;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| self.regs.stack.get(i))
                    .copied()
                    .ok_or(SimError::StackIndex(index))?
            }
            Expr::Bin(op, a, b) => {
                let (a, b) = (self.eval(a)?, self.eval(b)?);
                match op {
                    BinOp::Add => a.wrapping_add(b),
                    BinOp::Sub => a.wrapping_sub(b),
                    BinOp::Shl => a.wrapping_shl(b as u32),
                    BinOp::Shr => a.wrapping_shr(b as u32),
                    BinOp::Lt => i64::from(a < b),
                    BinOp::Le => i64::from(a <= b),
                    BinOp::Gt => i64::from(a > b),
                    BinOp::Ge => i64::from(a >= b),
                    BinOp::Eq => i64::from(a == b),
                    BinOp::Ne => i64::from(a != b),
                    BinOp::And => i64::from(a != 0 && b != 0),
                }
            }
            Expr::Select(c, a, b) => {
                if self.eval(c)? != 0 {
                    self.eval(a)?
                } else {
                    self.eval(b)?
                }
            }
            Expr::Host(frags) => {
                let text = self.text(frags)?;
                self.host.eval(&text, &self.regs)?
            }
        })
    }

    fn text(&mut self, frags: &[Frag]) -> Result<String, SimError> {
        let mut out = String::new();
        for frag in frags {
            match frag {
                Frag::Text(text) => out.push_str(text),
                Frag::Expr(e) => out.push_str(&self.eval(e)?.to_string()),
            }
        }
        Ok(out)
    }

    fn store(&mut self, place: &Place, value: i64) -> Result<(), SimError> {
        match place {
            Place::Var(v) => self.regs.set(*v, value),
            Place::Stack(index) => {
                let index = self.eval(index)?;
                let i = usize::try_from(index).map_err(|_| SimError::StackIndex(index))?;
                if i >= self.regs.stack.len() {
                    self.regs.stack.resize(i + 1, 0);
                }
                self.regs.stack[i] = value;
            }
        }
        Ok(())
    }
}

impl<'u> Code<'u> {
    fn exec<H: Host>(&self, prog: &Program<'u>, cpu: &mut Cpu<'u, H>) -> Result<Exit, SimError> {
        let mut pc = 0;
        while let Some(op) = prog.ops.get(pc) {
            cpu.tick()?;
            pc += 1;
            match op {
                Op::Assign(place, value) => {
                    let value = cpu.eval(value)?;
                    cpu.store(place, value)?;
                }
                Op::Branch { cond, target } => {
                    if cpu.eval(cond)? == 0 {
                        pc = *target;
                    }
                }
                Op::Jump(target) => pc = *target,
                Op::Switch { on, arms, default } => {
                    let value = cpu.eval(on)?;
                    pc = arms.iter().find(|(v, _)| *v == value).map_or(*default, |&(_, at)| at);
                }
                Op::Goto(label) => {
                    pc = *prog.labels.get(label).ok_or(SimError::UndefinedLabel(*label))?;
                }
                Op::Host(frags) => {
                    let text = cpu.text(frags)?;
                    cpu.host.exec(&text, &mut cpu.regs)?;
                }
                Op::Transfer(f) => return Ok(Exit::Transfer(*f)),
                Op::Raise(s) => return Ok(Exit::Raise(*s)),
                Op::Finish => return Ok(Exit::Finish),
                Op::Return(n) => return Ok(Exit::Return(*n)),
                Op::Trampoline(entry) => self.trampoline(*entry, cpu)?,
                Op::Invoke { part, status } => {
                    let unit = self.partitions.get(*part).ok_or(SimError::UnknownPartition(*part))?;
                    let code = match self.exec(unit, cpu)? {
                        Exit::Return(n) => n,
                        Exit::End => 0,
                        _ => return Err(SimError::Misplaced("control transfer in a partition")),
                    };
                    cpu.regs.set(*status, code);
                }
            }
        }
        Ok(Exit::End)
    }

    fn trampoline<H: Host>(&self, entry: Func, cpu: &mut Cpu<'u, H>) -> Result<(), SimError> {
        let mut current = entry;
        loop {
            let prog = self
                .functions
                .iter()
                .find(|(id, _)| *id == current)
                .map(|(_, p)| p)
                .ok_or(SimError::UnknownFunction(current))?;
            current = match self.exec(prog, cpu)? {
                Exit::Transfer(next) => next,
                Exit::Raise(signal) => self
                    .handlers
                    .iter()
                    .find(|(s, _)| *s == signal)
                    .map(|&(_, f)| f)
                    .ok_or(SimError::UnhandledSignal(signal))?,
                Exit::Finish => return Ok(()),
                Exit::End => return Err(SimError::FellThrough(current)),
                Exit::Return(_) => return Err(SimError::Misplaced("return")),
            };
        }
    }
}

/// A lowered unit ready to run.
pub struct Machine<'u, H> {
    code: Code<'u>,
    cpu: Cpu<'u, H>,
}

impl<'u, H: Host> Machine<'u, H> {
    pub fn new(unit: &'u Lowered, host: H) -> Self {
        let (functions, handlers) = match &unit.exec.functions {
            Some(set) => (
                set.functions.iter().map(|f| (f.id, Program::compile(&f.body))).collect(),
                set.handlers.as_slice(),
            ),
            None => (Vec::new(), &[][..]),
        };
        let code = Code {
            main: Program::compile(&unit.exec.body),
            init: Program::compile(&unit.init),
            functions,
            handlers,
            partitions: unit.exec.partitions.iter().map(|p| Program::compile(&p.body)).collect(),
        };
        let cpu = Cpu {
            unit,
            regs: Regs { eof: -1, ..Regs::default() },
            host,
            input: Vec::new(),
            steps: 0,
            limit: DEFAULT_STEP_LIMIT,
        };
        Machine { code, cpu }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.cpu.limit = limit;
        self
    }

    /// Runs the initialization block.
    pub fn init(&mut self) -> Result<(), SimError> {
        self.top_level(Which::Init)
    }

    /// Runs the execution block over `input`. With `at_eof` the input ends
    /// the stream and `eof` is set to its end.
    pub fn run(&mut self, input: &[i64], at_eof: bool) -> Result<(), SimError> {
        self.cpu.input = input.to_vec();
        self.cpu.steps = 0;
        let regs = &mut self.cpu.regs;
        regs.p = 0;
        regs.pe = input.len() as i64;
        regs.eof = if at_eof { regs.pe } else { -1 };
        self.top_level(Which::Main)
    }

    pub fn regs(&self) -> &Regs {
        &self.cpu.regs
    }

    pub fn regs_mut(&mut self) -> &mut Regs {
        &mut self.cpu.regs
    }

    pub fn host(&self) -> &H {
        &self.cpu.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.cpu.host
    }

    fn top_level(&mut self, which: Which) -> Result<(), SimError> {
        let prog = match which {
            Which::Init => &self.code.init,
            Which::Main => &self.code.main,
        };
        match self.code.exec(prog, &mut self.cpu)? {
            Exit::End => Ok(()),
            _ => Err(SimError::Misplaced("control transfer at top level")),
        }
    }
}

#[derive(Clone, Copy)]
enum Which {
    Init,
    Main,
}
