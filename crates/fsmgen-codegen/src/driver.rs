// Emission driver
//
// Runs the passes of one generation unit in order: validation, state
// ordering, lowering, data and init sections, then formatting. Errors are
// collected into `Diagnostics`; a unit with any error produces no output.

use fsmgen_core::fsm::RedFsm;
use fsmgen_core::keys::KeyRange;

use crate::analysis::{self, MachineFacts};
use crate::diagnostics::{Diagnostics, GenFailure};
use crate::format::Formatter;
use crate::ir::{Block, ConstId, DataArray, DataItem, DataSection, Expr, Lowered, Stmt, Var};
use crate::options::GenOptions;
use crate::shape::{LowerCtx, Shape};
use crate::tables;
use crate::CodegenError;

/// The rendered output of one generation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub shape: Shape,
    /// Arrays and named constants.
    pub data: String,
    /// The execution block.
    pub exec: String,
    /// The initialization block.
    pub init: String,
    /// Separately compiled units of the split shape, in partition order.
    pub partitions: Vec<String>,
}

/// Generates code for one machine through one target formatter.
pub struct Generator<'a> {
    fsm: &'a RedFsm,
    opts: GenOptions,
    formatter: &'a dyn Formatter,
}

impl<'a> Generator<'a> {
    pub fn new(fsm: &'a RedFsm, formatter: &'a dyn Formatter) -> Self {
        Self::with_options(fsm, formatter, GenOptions::default())
    }

    pub fn with_options(fsm: &'a RedFsm, formatter: &'a dyn Formatter, opts: GenOptions) -> Self {
        Generator { fsm, opts, formatter }
    }

    pub fn options(&self) -> &GenOptions {
        &self.opts
    }

    /// Lowers the machine into `shape` without rendering it.
    pub fn lower(&self, shape: Shape) -> Result<Lowered, GenFailure> {
        let fsm = self.fsm;
        log::debug!(
            "lowering {} as {} for {}: {} states, {} transitions",
            self.opts.name,
            shape.name(),
            self.formatter.name(),
            fsm.state_count(),
            fsm.transitions.len()
        );

        let mut diags = Diagnostics::new();
        analysis::check_state_refs(fsm, &mut diags);
        analysis::check_shape_support(fsm, shape, &mut diags);
        if !self.formatter.supports(shape) {
            diags.error(
                CodegenError::ShapeUnsupported { shape: shape.name(), target: self.formatter.name() },
                None,
            );
        }
        std::mem::take(&mut diags).finish()?;

        let cx = LowerCtx::new(fsm, &self.opts, shape);
        if fsm.error.is_none() && !cx.facts.any_eof_activity() && fsm.states.iter().all(|s| !s.is_final) {
            log::warn!("{}: machine has no final states and no end-of-input activity", self.opts.name);
        }
        let output = shape.strategy().lower(&cx)?;

        let mut data = DataSection::default();
        for (id, values) in output.arrays {
            match tables::select_int_type(self.formatter.int_types(), id.suffix(), &values) {
                Ok(ty) => {
                    log::debug!("array {}: {} values as {:?}", id.suffix(), values.len(), ty);
                    data.items.push(DataItem::Array(DataArray { id, ty, values }));
                }
                Err(e) => diags.error(e, None),
            }
        }
        diags.finish()?;

        data.items.extend(self.constants());
        if let Shape::Split { partitions } = shape {
            data.items.extend((0..partitions).map(DataItem::PartitionDecl));
        }

        Ok(Lowered {
            shape,
            keys: KeyRange::new(fsm.min_key(), fsm.max_key),
            alphabet: fsm.alphabet,
            data,
            exec: output.exec,
            init: self.init(&cx.facts),
        })
    }

    /// Lowers and renders the machine as `shape`.
    pub fn generate(&self, shape: Shape) -> Result<Artifact, GenFailure> {
        let unit = self.lower(shape)?;
        let f = self.formatter;
        let exec = f.exec(&unit, &self.opts)?;
        let partitions = f.partitions(&unit, &self.opts)?;
        Ok(Artifact {
            shape,
            data: f.data(&unit, &self.opts),
            exec,
            init: f.init(&unit, &self.opts),
            partitions,
        })
    }

    /// Generates every requested shape. Diagnostics of all failing units are
    /// reported together.
    pub fn generate_all(&self, shapes: &[Shape]) -> Result<Vec<Artifact>, GenFailure> {
        let mut out = Vec::with_capacity(shapes.len());
        let mut diagnostics = Vec::new();
        for &shape in shapes {
            match self.generate(shape) {
                Ok(artifact) => out.push(artifact),
                Err(failure) => {
                    log::debug!("{} failed: {failure}", shape.name());
                    diagnostics.extend(failure.diagnostics);
                }
            }
        }
        if diagnostics.is_empty() { Ok(out) } else { Err(GenFailure { diagnostics }) }
    }

    fn constants(&self) -> Vec<DataItem> {
        let fsm = self.fsm;
        let mut items = vec![DataItem::Const { id: ConstId::Start, value: fsm.start as i64 }];
        if !self.opts.no_final {
            items.push(DataItem::Const { id: ConstId::FirstFinal, value: fsm.first_final() as i64 });
        }
        if !self.opts.no_error {
            let value = fsm.error.map_or(-1, |e| e as i64);
            items.push(DataItem::Const { id: ConstId::Error, value });
        }
        for (name, state) in &fsm.entry_points {
            items.push(DataItem::Const { id: ConstId::Entry(name.clone()), value: *state as i64 });
        }
        for (name, key) in &fsm.exports {
            items.push(DataItem::Const { id: ConstId::Export(name.clone()), value: *key });
        }
        items
    }

    fn init(&self, facts: &MachineFacts) -> Block {
        let mut init = Vec::new();
        if !self.opts.no_cs {
            init.push(Stmt::assign(Var::Cs, Expr::Const(ConstId::Start)));
        }
        if facts.uses_stack() {
            init.push(Stmt::assign(Var::Top, Expr::Lit(0)));
        }
        if facts.flags.longest_match {
            init.push(Stmt::assign(Var::Ts, Expr::Null));
            init.push(Stmt::assign(Var::Te, Expr::Null));
            init.push(Stmt::assign(Var::Act, Expr::Lit(0)));
        }
        init
    }
}
