//! Code generation back end for reduced automata.
//!
//! Takes a [`fsmgen_core::fsm::RedFsm`] and emits source code that re-executes
//! it over an input stream. The machine is first compacted into arrays, then
//! lowered into one of several control-flow shapes expressed in a small
//! target-independent IR, and finally rendered by a target formatter.
//!
//! # Architecture
//!
//! - [`options`] -- Generation options and variable name overrides
//! - [`diagnostics`] -- Accumulated, located fatal errors
//! - [`analysis`] -- Machine-wide predicates, state ordering and reference validation
//! - [`tables`] -- Table compaction: default spans, singles, flat and search arrays, type selection
//! - [`ir`] -- Control-flow IR shared by shapes, formatters and the simulator
//! - [`render`] -- Action renderer (inline items to IR statements)
//! - [`liveness`] -- Label liveness for the direct-jump shapes
//! - [`shape`] -- Flat, table, goto, in-place goto, split and recursive lowerings
//! - [`driver`] -- Emission driver: pass ordering, data and init sections
//! - [`format`] -- Target formatters (C and Rust)
//! - [`sim`] -- Interpreter for lowered artifacts

pub mod analysis;
pub mod diagnostics;
pub mod driver;
pub mod format;
pub mod ir;
pub mod liveness;
pub mod options;
pub mod render;
pub mod shape;
pub mod sim;
pub mod tables;

pub use diagnostics::{Diagnostic, Diagnostics, GenFailure};
pub use driver::{Artifact, Generator};
pub use options::{GenOptions, VarNames};
pub use shape::Shape;

use fsmgen_core::{ModelError, StateId};

/// Fatal configuration errors of code generation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodegenError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("no integer type can hold {min}..={max} for array {array}")]
    NoIntType { array: &'static str, min: i64, max: i64 },
    #[error("array {array} would need {entries} entries, more than the limit of {limit}")]
    TableTooLarge { array: &'static str, entries: i128, limit: i128 },
    #[error("action refers to unknown state {state}")]
    UnknownStateRef { state: StateId },
    #[error("the {shape} shape does not support {primitive}")]
    UnsupportedPrimitive { shape: &'static str, primitive: &'static str },
    #[error("the {target} target cannot render the {shape} shape")]
    ShapeUnsupported { shape: &'static str, target: &'static str },
    #[error("cannot split {states} states into {requested} partitions")]
    InvalidPartitions { requested: usize, states: usize },
    #[error("control function set is not closed: {0}")]
    UnclosedFunctionSet(String),
    #[error("label {0} is not at the top level of its block")]
    NestedLabel(String),
}
