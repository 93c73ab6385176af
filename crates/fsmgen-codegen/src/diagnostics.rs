// Accumulated, located fatal errors

use std::fmt;

use fsmgen_core::action::InputLoc;

use crate::CodegenError;

/// One fatal error, with the action source location when one is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub error: CodegenError,
    pub loc: Option<InputLoc>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.loc {
            Some(loc) => write!(f, "{loc}: error: {}", self.error),
            None => write!(f, "error: {}", self.error),
        }
    }
}

/// Collects fatal errors across passes so they can be reported together.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, error: CodegenError, loc: Option<InputLoc>) {
        log::debug!("diagnostic: {error}");
        self.entries.push(Diagnostic { error, loc });
    }

    pub fn error_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    /// `Ok` when nothing was reported.
    pub fn finish(self) -> Result<(), GenFailure> {
        if self.entries.is_empty() {
            Ok(())
        } else {
            Err(GenFailure { diagnostics: self.entries })
        }
    }
}

/// A failed generation unit. No output is produced for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("code generation failed with {} error(s)", .diagnostics.len())]
pub struct GenFailure {
    pub diagnostics: Vec<Diagnostic>,
}

impl From<CodegenError> for GenFailure {
    fn from(error: CodegenError) -> Self {
        GenFailure { diagnostics: vec![Diagnostic { error, loc: None }] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_until_finish() {
        let mut diags = Diagnostics::new();
        assert!(diags.clone().finish().is_ok());
        diags.error(CodegenError::UnknownStateRef { state: 9 }, Some(InputLoc::new("a.rl", 3, 1)));
        diags.error(CodegenError::UnknownStateRef { state: 10 }, None);
        assert_eq!(diags.error_count(), 2);
        let failure = diags.finish().unwrap_err();
        assert_eq!(failure.diagnostics.len(), 2);
        assert_eq!(failure.to_string(), "code generation failed with 2 error(s)");
        assert_eq!(
            failure.diagnostics[0].to_string(),
            "a.rl:3:1: error: action refers to unknown state 9"
        );
    }
}
