//! Reduced automaton model for the fsmgen code generator.
//!
//! The model describes an already minimized deterministic automaton: states,
//! shared transitions over key ranges, deduplicated action tables, condition
//! spaces for guarded transitions and the named entry points of a multi-entry
//! machine. It is assembled once with [`builder::FsmBuilder`] (or from a
//! serialized [`desc::MachineDesc`]) and is read-only afterwards.
//!
//! # Architecture
//!
//! - [`keys`] -- Host integer types, keys and key ranges
//! - [`action`] -- Inline items, actions, source locations and item flags
//! - [`fsm`] -- The reduced automaton aggregate and its lookups
//! - [`builder`] -- Validating construction with deduplication and gap filling
//! - [`desc`] -- Plain machine description, the serialized front-end interface

pub mod action;
pub mod builder;
pub mod desc;
pub mod fsm;
pub mod keys;

/// State identifier. States are numbered densely from zero.
pub type StateId = u32;
/// Transition identifier, dense over the shared transition list.
pub type TransId = u32;
/// Identifier of a single deduplicated action.
pub type ActionId = u32;
/// Ordinal of a deduplicated action list (`actListId`).
pub type ActListId = u32;
/// Identifier of a condition space.
pub type CondSpaceId = u32;

/// Error type for automaton construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("no start state was set")]
    NoStartState,
    #[error("reference to unknown state {0}")]
    UnknownState(StateId),
    #[error("reference to unknown action {0}")]
    UnknownAction(ActionId),
    #[error("reference to unknown condition space {0}")]
    UnknownCondSpace(CondSpaceId),
    #[error("state {state}: inverted key range {low}..={high}")]
    InvertedRange { state: StateId, low: i64, high: i64 },
    #[error("state {state}: key {key} is covered by more than one range")]
    OverlappingRanges { state: StateId, key: i64 },
    #[error("state {state}: key {key} lies outside the key domain")]
    KeyOutOfRange { state: StateId, key: i64 },
    #[error("condition space {space} widens keys past the representable key domain")]
    KeyDomainOverflow { space: CondSpaceId },
    #[error("duplicate entry point name: {0}")]
    DuplicateEntryPoint(String),
}

/// A rejected machine: every problem the builder found, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid machine with {} problem(s)", .problems.len())]
pub struct BuildFailure {
    pub problems: Vec<ModelError>,
}

impl BuildFailure {
    /// The first problem found.
    pub fn first(&self) -> Option<&ModelError> {
        self.problems.first()
    }
}

impl From<ModelError> for BuildFailure {
    fn from(error: ModelError) -> Self {
        BuildFailure { problems: vec![error] }
    }
}
