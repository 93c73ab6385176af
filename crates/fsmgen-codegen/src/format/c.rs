// C formatter
//
// Renders every shape. Labels and gotos map directly; the recursive shape's
// control functions become cases of a `switch` inside a trampoline loop, and
// split partitions become functions that reach the machine variables through
// pointer parameters.

use std::collections::BTreeSet;

use fsmgen_core::keys::IntType;

use crate::CodegenError;
use crate::format::{self, Formatter, Writer};
use crate::ir::{
    self, BinOp, DataItem, Expr, Frag, Func, FunctionSet, Label, Local, Lowered, Place, Signal, Stmt, Var,
};
use crate::options::GenOptions;
use crate::shape::Shape;

const VALUES_PER_LINE: usize = 8;

pub struct CFormatter {
    types: Vec<IntType>,
}

impl CFormatter {
    pub fn new() -> Self {
        Self::with_int_types(IntType::STANDARD.to_vec())
    }

    /// A formatter restricted to `types`, tried in order.
    pub fn with_int_types(types: Vec<IntType>) -> Self {
        CFormatter { types }
    }
}

impl Default for CFormatter {
    fn default() -> Self {
        Self::new()
    }
}

pub fn type_name(ty: IntType) -> &'static str {
    match (ty.signed, ty.bits) {
        (true, 8) => "signed char",
        (false, 8) => "unsigned char",
        (true, 16) => "short",
        (false, 16) => "unsigned short",
        (true, 32) => "int",
        (false, 32) => "unsigned int",
        (true, _) => "long long",
        (false, _) => "unsigned long long",
    }
}

impl Formatter for CFormatter {
    fn name(&self) -> &'static str {
        "c"
    }

    fn int_types(&self) -> &[IntType] {
        &self.types
    }

    fn supports(&self, _shape: Shape) -> bool {
        true
    }

    fn data(&self, unit: &Lowered, opts: &GenOptions) -> String {
        let mut w = Writer::new("\t");
        for item in &unit.data.items {
            match item {
                DataItem::Array(array) => {
                    w.open(format!(
                        "static const {} {}[] = {{",
                        type_name(array.ty),
                        format::array_name(opts, array.id)
                    ));
                    format::value_list(&mut w, &array.values, VALUES_PER_LINE);
                    w.close("};");
                    w.line("");
                }
                DataItem::Const { id, value } => {
                    w.line(format!("static const int {} = {value};", format::const_name(opts, id)));
                }
                DataItem::PartitionDecl(n) => {
                    w.line(format!("{};", partition_signature(unit, opts, *n)));
                }
            }
        }
        w.finish()
    }

    fn exec(&self, unit: &Lowered, opts: &GenOptions) -> Result<String, CodegenError> {
        let em = Emitter::new(unit, opts, Access::Direct);
        let mut w = Writer::new("\t");
        w.open("{");
        em.locals(&mut w, &unit.exec.locals);
        em.block(&mut w, &unit.exec.body)?;
        w.close("}");
        Ok(w.finish())
    }

    fn init(&self, unit: &Lowered, opts: &GenOptions) -> String {
        let em = Emitter::new(unit, opts, Access::Direct);
        let mut w = Writer::new("\t");
        w.open("{");
        // Assignments only; rendering cannot fail.
        for stmt in &unit.init {
            if let Stmt::Assign(place, value) = stmt {
                w.line(format!("{} = {};", em.place(place), em.expr(value)));
            }
        }
        w.close("}");
        w.finish()
    }

    fn partitions(&self, unit: &Lowered, opts: &GenOptions) -> Result<Vec<String>, CodegenError> {
        let em = Emitter::new(unit, opts, Access::Pointer);
        unit.exec
            .partitions
            .iter()
            .map(|part| {
                let mut w = Writer::new("\t");
                w.line(partition_signature(unit, opts, part.index));
                w.open("{");
                em.locals(&mut w, &part.locals);
                em.block(&mut w, &part.body)?;
                w.close("}");
                Ok(w.finish())
            })
            .collect()
    }
}

/// How machine variables are reached.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    /// By their configured names.
    Direct,
    /// Through the pointer parameters of a partition function.
    Pointer,
}

struct Emitter<'a> {
    unit: &'a Lowered,
    opts: &'a GenOptions,
    access: Access,
}

impl<'a> Emitter<'a> {
    fn new(unit: &'a Lowered, opts: &'a GenOptions, access: Access) -> Self {
        Emitter { unit, opts, access }
    }

    fn var(&self, var: Var) -> String {
        if self.access == Access::Pointer && var.is_machine() {
            return match var {
                Var::Eof => "_eof".to_string(),
                _ => format!("(*_{})", param_name(var)),
            };
        }
        format::var_name(self.opts, var)
    }

    fn stack(&self) -> String {
        match self.access {
            Access::Direct => self.opts.vars.stack_name(),
            Access::Pointer => "_stack".to_string(),
        }
    }

    fn place(&self, place: &Place) -> String {
        match place {
            Place::Var(v) => self.var(*v),
            Place::Stack(index) => format!("{}[{}]", self.stack(), self.expr(index)),
        }
    }

    fn expr(&self, expr: &Expr) -> String {
        match expr {
            Expr::Lit(n) => n.to_string(),
            Expr::Null => "0".to_string(),
            Expr::Var(v) => self.var(*v),
            Expr::Key => match &self.opts.vars.get_key {
                Some(get_key) => get_key.clone(),
                None => format!("(*{})", self.var(Var::P)),
            },
            Expr::Const(id) => format::const_name(self.opts, id),
            Expr::Elem(array, index) => {
                format!("{}[{}]", format::array_name(self.opts, *array), self.expr(index))
            }
            Expr::Stack(index) => format!("{}[{}]", self.stack(), self.expr(index)),
            Expr::Bin(op, a, b) => format!("({} {} {})", self.expr(a), op_text(*op), self.expr(b)),
            Expr::Select(c, a, b) => {
                format!("({} ? {} : {})", self.expr(c), self.expr(a), self.expr(b))
            }
            Expr::Host(frags) => self.frags(frags),
        }
    }

    fn frags(&self, frags: &[Frag]) -> String {
        frags
            .iter()
            .map(|f| match f {
                Frag::Text(text) => text.clone(),
                Frag::Expr(e) => self.expr(e),
            })
            .collect()
    }

    fn locals(&self, w: &mut Writer, locals: &[Local]) {
        let key = type_name(format::key_type(self.unit.keys));
        for local in locals {
            let ty = if local.is_key { key } else { "int" };
            w.line(format!("{ty} {};", self.var(local.var)));
        }
    }

    fn functions(&self) -> Option<&'a FunctionSet> {
        self.unit.exec.functions.as_ref()
    }

    fn func_id(&self, func: Func) -> Result<usize, CodegenError> {
        self.functions()
            .and_then(|set| set.functions.iter().position(|f| f.id == func))
            .ok_or_else(|| CodegenError::UnclosedFunctionSet(format!("{func:?}")))
    }

    fn signal_target(&self, signal: Signal) -> Result<usize, CodegenError> {
        let func = self
            .functions()
            .and_then(|set| set.handler(signal))
            .ok_or_else(|| CodegenError::UnclosedFunctionSet(format!("{signal:?}")))?;
        self.func_id(func)
    }

    fn block(&self, w: &mut Writer, block: &[Stmt]) -> Result<(), CodegenError> {
        for stmt in block {
            self.stmt(w, stmt)?;
        }
        Ok(())
    }

    fn stmt(&self, w: &mut Writer, stmt: &Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::Assign(place, value) => {
                w.line(format!("{} = {};", self.place(place), self.expr(value)));
            }
            Stmt::If { cond, then, otherwise } => {
                w.open(format!("if ( {} ) {{", self.expr(cond)));
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
                w.open(format!("switch ( {} ) {{", self.expr(on)));
                for case in cases {
                    for value in &case.values {
                        w.line(format!("case {value}:"));
                    }
                    w.open("{");
                    self.block(w, &case.body)?;
                    w.close("}");
                    if !ir::ends_in_terminator(&case.body) {
                        w.line("break;");
                    }
                }
                if !default.is_empty() {
                    w.line("default:");
                    w.open("{");
                    self.block(w, default)?;
                    w.close("}");
                    if !ir::ends_in_terminator(default) {
                        w.line("break;");
                    }
                }
                w.close("}");
            }
            Stmt::Scope(body) => {
                w.open("{");
                self.block(w, body)?;
                w.close("}");
            }
            Stmt::Label(label) => w.flush_left(format!("{}: {{}}", label_name(*label))),
            Stmt::Goto(label) => w.line(format!("goto {};", label_name(*label))),
            Stmt::Host(frags) => w.line(self.frags(frags)),
            Stmt::Line(loc) => w.flush_left(format!("#line {} \"{}\"", loc.line, loc.file)),
            Stmt::Transfer(func) => w.line(format!("{{ _fn = {}; continue; }}", self.func_id(*func)?)),
            Stmt::Raise(signal) => {
                w.line(format!("{{ _fn = {}; continue; }}", self.signal_target(*signal)?));
            }
            Stmt::Finish => w.line("{ _fn = -1; continue; }"),
            Stmt::Trampoline(entry) => self.trampoline(w, *entry)?,
            Stmt::Invoke { part, status } => {
                let args: Vec<String> = partition_params(self.unit)
                    .into_iter()
                    .map(|p| match p {
                        Param::Stack => self.stack(),
                        Param::Var(Var::Eof) => self.var(Var::Eof),
                        Param::Var(v) => format!("&{}", self.var(v)),
                    })
                    .collect();
                w.line(format!(
                    "{} = {}partition{part}( {} );",
                    self.var(*status),
                    self.opts.prefix(),
                    args.join(", ")
                ));
            }
            Stmt::Return(status) => w.line(format!("return {status};")),
        }
        Ok(())
    }

    fn trampoline(&self, w: &mut Writer, entry: Func) -> Result<(), CodegenError> {
        let set = self
            .functions()
            .ok_or_else(|| CodegenError::UnclosedFunctionSet("no control functions".to_string()))?;
        w.open("{");
        w.line(format!("int _fn = {};", self.func_id(entry)?));
        w.open("while ( _fn >= 0 ) {");
        w.open("switch ( _fn ) {");
        for (id, function) in set.functions.iter().enumerate() {
            w.line(format!("case {id}: /* {} */", func_name(function.id)));
            w.open("{");
            self.block(w, &function.body)?;
            if !ir::ends_in_terminator(&function.body) {
                w.line("_fn = -1;");
            }
            w.close("}");
            w.line("break;");
        }
        w.close("}");
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

pub fn label_name(label: Label) -> String {
    match label {
        Label::Resume => "_resume".to_string(),
        Label::EofTrans => "_eof_trans".to_string(),
        Label::Again => "_again".to_string(),
        Label::TestEof => "_test_eof".to_string(),
        Label::Out => "_out".to_string(),
        Label::Reenter => "_reenter".to_string(),
        Label::SingleSearch => "_single_search".to_string(),
        Label::SingleMiss => "_single_miss".to_string(),
        Label::RangeSearch => "_range_search".to_string(),
        Label::RangeMiss => "_range_miss".to_string(),
        Label::Match => "_match".to_string(),
        Label::CondSearch => "_cond_search".to_string(),
        Label::CondDone => "_cond_done".to_string(),
        Label::State(n) => format!("st{n}"),
        Label::Case(n) => format!("case{n}"),
        Label::Trans(n) => format!("tr{n}"),
        Label::Action(n) => format!("f{n}"),
        Label::StateEof(n) => format!("_test_eof{n}"),
        Label::PartState(n) => format!("pst{n}"),
    }
}

fn func_name(func: Func) -> String {
    match func {
        Func::Start => "start".to_string(),
        Func::Resume => "resume".to_string(),
        Func::Again => "again".to_string(),
        Func::TestEof => "test_eof".to_string(),
        Func::EofTrans => "eof_trans".to_string(),
        Func::Out => "out".to_string(),
        Func::Trans(n) => format!("tr{n}"),
        Func::Action(n) => format!("f{n}"),
    }
}

fn param_name(var: Var) -> &'static str {
    match var {
        Var::P => "pp",
        Var::Pe => "ppe",
        Var::Cs => "cs",
        Var::Top => "top",
        Var::Ts => "ts",
        Var::Te => "te",
        Var::Act => "act",
        _ => "eof",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Param {
    Var(Var),
    Stack,
}

/// Machine variables read or written by any partition, in declaration order.
fn partition_params(unit: &Lowered) -> Vec<Param> {
    let mut used = BTreeSet::new();
    for part in &unit.exec.partitions {
        ir::walk_block(&part.body, &mut |stmt| stmt_params(stmt, &mut used));
    }
    // The selector reads the state after every return.
    used.insert(Param::Var(Var::P));
    used.insert(Param::Var(Var::Pe));
    used.insert(Param::Var(Var::Cs));
    used.into_iter().collect()
}

fn stmt_params(stmt: &Stmt, used: &mut BTreeSet<Param>) {
    match stmt {
        Stmt::Assign(place, value) => {
            match place {
                Place::Var(v) => var_param(*v, used),
                Place::Stack(index) => {
                    used.insert(Param::Stack);
                    expr_params(index, used);
                }
            }
            expr_params(value, used);
        }
        Stmt::If { cond, .. } => expr_params(cond, used),
        Stmt::Switch { on, .. } => expr_params(on, used),
        Stmt::Host(frags) => frag_params(frags, used),
        _ => {}
    }
}

fn expr_params(expr: &Expr, used: &mut BTreeSet<Param>) {
    match expr {
        Expr::Var(v) => var_param(*v, used),
        Expr::Key => var_param(Var::P, used),
        Expr::Stack(index) => {
            used.insert(Param::Stack);
            expr_params(index, used);
        }
        Expr::Elem(_, index) => expr_params(index, used),
        Expr::Bin(_, a, b) => {
            expr_params(a, used);
            expr_params(b, used);
        }
        Expr::Select(c, a, b) => {
            expr_params(c, used);
            expr_params(a, used);
            expr_params(b, used);
        }
        Expr::Host(frags) => frag_params(frags, used),
        Expr::Lit(_) | Expr::Null | Expr::Const(_) => {}
    }
}

fn frag_params(frags: &[Frag], used: &mut BTreeSet<Param>) {
    for frag in frags {
        if let Frag::Expr(e) = frag {
            expr_params(e, used);
        }
    }
}

fn var_param(var: Var, used: &mut BTreeSet<Param>) {
    if var.is_machine() {
        used.insert(Param::Var(var));
    }
}

fn partition_signature(unit: &Lowered, opts: &GenOptions, index: usize) -> String {
    let key = type_name(unit.alphabet);
    let params: Vec<String> = partition_params(unit)
        .into_iter()
        .map(|p| match p {
            Param::Stack => "int *_stack".to_string(),
            Param::Var(Var::P) => format!("const {key} **_pp"),
            Param::Var(Var::Pe) => format!("const {key} **_ppe"),
            Param::Var(Var::Eof) => format!("const {key} *_eof"),
            Param::Var(v @ (Var::Ts | Var::Te)) => format!("const {key} **_{}", param_name(v)),
            Param::Var(v) => format!("int *_{}", param_name(v)),
        })
        .collect();
    format!("static int {}partition{index}( {} )", opts.prefix(), params.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Generator;
    use fsmgen_core::action::{Action, InlineItem};
    use fsmgen_core::builder::FsmBuilder;
    use fsmgen_core::fsm::RedFsm;
    use fsmgen_core::keys::KeyRange;

    fn counter() -> RedFsm {
        let mut b = FsmBuilder::new(IntType::U8);
        b.ensure_states(2);
        b.set_start(0);
        b.set_final(1, true);
        let count = b.add_action(Action::new(vec![InlineItem::text("count++;")]));
        b.add_transition(0, KeyRange::single(b'a' as i64), 1, &[]);
        b.set_default(0, 0, &[]);
        b.set_default(1, 0, &[]);
        b.set_to_state_actions(1, &[count]);
        b.build().unwrap()
    }

    #[test]
    fn flat_output_names_arrays_and_labels() {
        let fsm = counter();
        let c = CFormatter::new();
        let out = Generator::new(&fsm, &c).generate(Shape::Flat).unwrap();
        assert!(out.data.contains("static const signed char _fsm_trans_keys[] = {"));
        assert!(out.data.contains("static const int fsm_start = 0;"));
        assert!(out.exec.contains("_resume: {}"));
        assert!(out.exec.contains("count++;"));
        assert!(out.exec.contains("switch ( _fsm_to_state_actions[cs] ) {"));
        assert_eq!(out.init, "{\n\tcs = fsm_start;\n}\n");
    }

    #[test]
    fn table_output_searches_sorted_keys() {
        let fsm = counter();
        let out = Generator::new(&fsm, &CFormatter::new()).generate(Shape::Table).unwrap();
        assert!(out.data.contains("_fsm_key_offsets[] = {"));
        assert!(out.data.contains("_fsm_single_lengths[] = {"));
        assert!(!out.data.contains("_fsm_key_spans"));
        assert!(out.exec.contains("_single_search: {}"));
        assert!(out.exec.contains("_mid = (_lower + ((_upper - _lower) >> 1));"));
        assert!(out.exec.contains("goto _range_miss;"));
        assert!(out.exec.contains("_trans = _fsm_indicies[_trans];"));
    }

    #[test]
    fn renamed_variables_and_key_expression() {
        let fsm = counter();
        let c = CFormatter::new();
        let mut opts = GenOptions::named("m");
        opts.vars.access = Some("fsm->".into());
        opts.vars.get_key = Some("fc".into());
        let out = Generator::with_options(&fsm, &c, opts).generate(Shape::Goto).unwrap();
        assert!(out.exec.contains("switch ( fsm->cs ) {"));
        assert!(out.exec.contains("fc"));
        assert!(!out.exec.contains("(*p)"));
    }

    #[test]
    fn recursive_shape_is_a_trampoline() {
        let fsm = counter();
        let c = CFormatter::new();
        let out = Generator::new(&fsm, &c).generate(Shape::Recursive).unwrap();
        assert!(out.exec.contains("while ( _fn >= 0 ) {"));
        assert!(out.exec.contains("/* resume */"));
        assert!(out.exec.contains("{ _fn = -1; continue; }"));
    }

    #[test]
    fn partitions_take_pointer_parameters() {
        let fsm = counter();
        let c = CFormatter::new();
        let out = Generator::new(&fsm, &c).generate(Shape::Split { partitions: 2 }).unwrap();
        assert_eq!(out.partitions.len(), 2);
        assert!(out.partitions[0].starts_with("static int fsm_partition0( const unsigned char **_pp"));
        assert!(out.partitions[0].contains("(*_cs)"));
        assert!(out.exec.contains("_stat = fsm_partition"));
        assert!(out.exec.contains("&cs"));
    }
}
