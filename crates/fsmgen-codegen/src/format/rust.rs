// Rust formatter
//
// Rust has no goto. The flat shape's phase labels become arms of a `match`
// over a segment index inside a labeled loop; the recursive shape's control
// functions become arms of a `match` over a function id. Machine variables
// are `i64` positions and states; keys index the input slice.

use fsmgen_core::keys::IntType;

use crate::CodegenError;
use crate::format::{self, Formatter, Writer};
use crate::ir::{self, BinOp, DataItem, Expr, Frag, Func, Label, Lowered, Place, Stmt, Var};
use crate::options::GenOptions;
use crate::shape::Shape;

const VALUES_PER_LINE: usize = 12;

pub struct RustFormatter {
    types: Vec<IntType>,
}

impl RustFormatter {
    pub fn new() -> Self {
        RustFormatter { types: IntType::STANDARD.to_vec() }
    }
}

impl Default for RustFormatter {
    fn default() -> Self {
        Self::new()
    }
}

pub fn type_name(ty: IntType) -> &'static str {
    match (ty.signed, ty.bits) {
        (true, 8) => "i8",
        (false, 8) => "u8",
        (true, 16) => "i16",
        (false, 16) => "u16",
        (true, 32) => "i32",
        (false, 32) => "u32",
        (true, _) => "i64",
        (false, _) => "u64",
    }
}

impl Formatter for RustFormatter {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn int_types(&self) -> &[IntType] {
        &self.types
    }

    fn supports(&self, shape: Shape) -> bool {
        matches!(shape, Shape::Flat | Shape::Table | Shape::Recursive)
    }

    fn data(&self, unit: &Lowered, opts: &GenOptions) -> String {
        let mut w = Writer::new("    ");
        for item in &unit.data.items {
            match item {
                DataItem::Array(array) => {
                    w.open(format!(
                        "static {}: [{}; {}] = [",
                        format::array_name(opts, array.id).to_uppercase(),
                        type_name(array.ty),
                        array.values.len()
                    ));
                    format::value_list(&mut w, &array.values, VALUES_PER_LINE);
                    w.close("];");
                    w.line("");
                }
                DataItem::Const { id, value } => {
                    w.line(format!("const {}: i64 = {value};", format::const_name(opts, id).to_uppercase()));
                }
                DataItem::PartitionDecl(_) => {}
            }
        }
        w.finish()
    }

    fn exec(&self, unit: &Lowered, opts: &GenOptions) -> Result<String, CodegenError> {
        if !self.supports(unit.shape) {
            return Err(CodegenError::ShapeUnsupported { shape: unit.shape.name(), target: self.name() });
        }
        let em = Emitter { unit, opts, segments: segments(&unit.exec.body)? };
        let mut w = Writer::new("    ");
        w.open("{");
        for local in &unit.exec.locals {
            w.line(format!("let mut {}: i64 = 0;", format::var_name(opts, local.var)));
        }
        match &em.segments {
            Some(segs) => em.segment_loop(&mut w, segs)?,
            None => em.block(&mut w, &unit.exec.body)?,
        }
        w.close("}");
        Ok(w.finish())
    }

    fn init(&self, unit: &Lowered, opts: &GenOptions) -> String {
        let em = Emitter { unit, opts, segments: None };
        let mut w = Writer::new("    ");
        for stmt in &unit.init {
            if let Stmt::Assign(place, value) = stmt {
                w.line(format!("{} = {};", em.place(place), em.expr(value)));
            }
        }
        w.finish()
    }

    fn partitions(&self, unit: &Lowered, _opts: &GenOptions) -> Result<Vec<String>, CodegenError> {
        if unit.exec.partitions.is_empty() {
            Ok(Vec::new())
        } else {
            Err(CodegenError::ShapeUnsupported { shape: unit.shape.name(), target: self.name() })
        }
    }
}

/// A run of top-level statements entered at a label.
struct Segment<'b> {
    label: Option<Label>,
    body: &'b [Stmt],
}

/// Cuts a labeled block into segments. `None` when the block has no labels.
fn segments(block: &[Stmt]) -> Result<Option<Vec<Segment<'_>>>, CodegenError> {
    for stmt in block {
        let mut nested = None;
        if !matches!(stmt, Stmt::Label(_)) {
            ir::walk_block(std::slice::from_ref(stmt), &mut |s| {
                if let Stmt::Label(l) = s {
                    nested.get_or_insert(*l);
                }
            });
        }
        if let Some(label) = nested {
            return Err(CodegenError::NestedLabel(format!("{label:?}")));
        }
    }
    if !block.iter().any(|s| matches!(s, Stmt::Label(_))) {
        return Ok(None);
    }
    let mut segs = Vec::new();
    let mut start = 0;
    let mut label = None;
    for (i, stmt) in block.iter().enumerate() {
        if let Stmt::Label(l) = stmt {
            segs.push(Segment { label, body: &block[start..i] });
            label = Some(*l);
            start = i + 1;
        }
    }
    segs.push(Segment { label, body: &block[start..] });
    Ok(Some(segs))
}

struct Emitter<'a> {
    unit: &'a Lowered,
    opts: &'a GenOptions,
    segments: Option<Vec<Segment<'a>>>,
}

impl Emitter<'_> {
    fn var(&self, var: Var) -> String {
        format::var_name(self.opts, var)
    }

    fn place(&self, place: &Place) -> String {
        match place {
            Place::Var(v) => self.var(*v),
            Place::Stack(index) => format!("{}[({}) as usize]", self.opts.vars.stack_name(), self.expr(index)),
        }
    }

    fn expr(&self, expr: &Expr) -> String {
        match expr {
            Expr::Lit(n) => n.to_string(),
            Expr::Null => "-1".to_string(),
            Expr::Var(v) => self.var(*v),
            Expr::Key => match &self.opts.vars.get_key {
                Some(get_key) => get_key.clone(),
                None => format!("({}[{} as usize] as i64)", self.opts.vars.data_name(), self.var(Var::P)),
            },
            Expr::Const(id) => format::const_name(self.opts, id).to_uppercase(),
            Expr::Elem(array, index) => format!(
                "({}[({}) as usize] as i64)",
                format::array_name(self.opts, *array).to_uppercase(),
                self.expr(index)
            ),
            Expr::Stack(index) => {
                format!("{}[({}) as usize]", self.opts.vars.stack_name(), self.expr(index))
            }
            Expr::Bin(op, a, b) => format!("({} {} {})", self.expr(a), op_text(*op), self.expr(b)),
            Expr::Select(c, a, b) => {
                format!("(if {} {{ {} }} else {{ {} }})", self.expr(c), self.expr(a), self.expr(b))
            }
            Expr::Host(frags) => frags
                .iter()
                .map(|f| match f {
                    Frag::Text(text) => text.clone(),
                    Frag::Expr(e) => self.expr(e),
                })
                .collect(),
        }
    }

    fn segment_index(&self, label: Label) -> Result<usize, CodegenError> {
        self.segments
            .as_ref()
            .and_then(|segs| segs.iter().position(|s| s.label == Some(label)))
            .ok_or_else(|| CodegenError::NestedLabel(format!("{label:?}")))
    }

    fn segment_loop(&self, w: &mut Writer, segs: &[Segment<'_>]) -> Result<(), CodegenError> {
        w.line("let mut _goto: u32 = 0;");
        w.open("'exec: loop {");
        w.open("match _goto {");
        for (i, seg) in segs.iter().enumerate() {
            match seg.label {
                Some(label) => w.open(format!("{i} => {{ // {label:?}")),
                None => w.open(format!("{i} => {{")),
            }
            self.block(w, seg.body)?;
            if !ir::ends_in_terminator(seg.body) {
                if i + 1 < segs.len() {
                    w.line(format!("_goto = {};", i + 1));
                    w.line("continue 'exec;");
                } else {
                    w.line("break 'exec;");
                }
            }
            w.close("}");
        }
        w.line("_ => break 'exec,");
        w.close("}");
        w.close("}");
        Ok(())
    }

    fn block(&self, w: &mut Writer, block: &[Stmt]) -> Result<(), CodegenError> {
        for stmt in block {
            self.stmt(w, stmt)?;
        }
        Ok(())
    }

    fn stmt(&self, w: &mut Writer, stmt: &Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::Assign(place, value) => w.line(format!("{} = {};", self.place(place), self.expr(value))),
            Stmt::If { cond, then, otherwise } => {
                w.open(format!("if {} {{", self.expr(cond)));
                self.block(w, then)?;
                if otherwise.is_empty() {
                    w.close("}");
                } else {
                    w.reopen("} else {");
                    self.block(w, otherwise)?;
                    w.close("}");
                }
            }
            Stmt::Switch { on, cases, default } => {
                w.open(format!("match {} {{", self.expr(on)));
                for case in cases {
                    let pattern: Vec<String> = case.values.iter().map(i64::to_string).collect();
                    w.open(format!("{} => {{", pattern.join(" | ")));
                    self.block(w, &case.body)?;
                    w.close("}");
                }
                w.open("_ => {");
                self.block(w, default)?;
                w.close("}");
                w.close("}");
            }
            Stmt::Scope(body) => {
                w.open("{");
                self.block(w, body)?;
                w.close("}");
            }
            // Labels only appear at segment boundaries.
            Stmt::Label(_) => {}
            Stmt::Goto(label) => {
                let index = self.segment_index(*label)?;
                w.line(format!("_goto = {index};"));
                w.line("continue 'exec;");
            }
            Stmt::Host(frags) => w.line(self.expr(&Expr::Host(frags.clone()))),
            Stmt::Line(loc) => w.line(format!("// {}:{}", loc.file, loc.line)),
            Stmt::Transfer(func) => {
                w.line(format!("_fn = {};", self.func_id(*func)?));
                w.line("continue 'fsm;");
            }
            Stmt::Raise(signal) => {
                let func = self
                    .unit
                    .exec
                    .functions
                    .as_ref()
                    .and_then(|set| set.handler(*signal))
                    .ok_or_else(|| CodegenError::UnclosedFunctionSet(format!("{signal:?}")))?;
                w.line(format!("_fn = {};", self.func_id(func)?));
                w.line("continue 'fsm;");
            }
            Stmt::Finish => w.line("break 'fsm;"),
            Stmt::Trampoline(entry) => self.trampoline(w, *entry)?,
            Stmt::Invoke { .. } | Stmt::Return(_) => {
                return Err(CodegenError::ShapeUnsupported { shape: self.unit.shape.name(), target: "rust" });
            }
        }
        Ok(())
    }

    fn func_id(&self, func: Func) -> Result<usize, CodegenError> {
        self.unit
            .exec
            .functions
            .as_ref()
            .and_then(|set| set.functions.iter().position(|f| f.id == func))
            .ok_or_else(|| CodegenError::UnclosedFunctionSet(format!("{func:?}")))
    }

    fn trampoline(&self, w: &mut Writer, entry: Func) -> Result<(), CodegenError> {
        let functions: &[ir::Function] =
            self.unit.exec.functions.as_ref().map_or(&[], |set| set.functions.as_slice());
        w.line(format!("let mut _fn: usize = {};", self.func_id(entry)?));
        w.open("'fsm: loop {");
        w.open("match _fn {");
        for (id, function) in functions.iter().enumerate() {
            w.open(format!("{id} => {{ // {:?}", function.id));
            self.block(w, &function.body)?;
            if !ir::ends_in_terminator(&function.body) {
                w.line("break 'fsm;");
            }
            w.close("}");
        }
        w.line("_ => break 'fsm,");
        w.close("}");
        w.close("}");
        Ok(())
    }
}

fn op_text(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::And => "&&",
    }
}
