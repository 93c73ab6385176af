// Generation options and variable name overrides

use crate::ir::Var;

/// Host expressions substituted for the machine variables.
///
/// `None` keeps the default name. `access` is prepended to the machine
/// variables that live in host state (`cs`, `top`, `stack`, `ts`, `te`, `act`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarNames {
    pub p: Option<String>,
    pub pe: Option<String>,
    pub eof: Option<String>,
    pub cs: Option<String>,
    pub top: Option<String>,
    pub stack: Option<String>,
    pub ts: Option<String>,
    pub te: Option<String>,
    pub act: Option<String>,
    /// Expression yielding the current key; defaults to indexing the input at `p`.
    pub get_key: Option<String>,
    /// Name of the input buffer, for targets that index rather than dereference.
    pub data: Option<String>,
    pub access: Option<String>,
}

impl VarNames {
    /// Resolved name of a machine variable.
    pub fn machine(&self, var: Var) -> Option<String> {
        let (over, default, accessed) = match var {
            Var::P => (&self.p, "p", false),
            Var::Pe => (&self.pe, "pe", false),
            Var::Eof => (&self.eof, "eof", false),
            Var::Cs => (&self.cs, "cs", true),
            Var::Top => (&self.top, "top", true),
            Var::Ts => (&self.ts, "ts", true),
            Var::Te => (&self.te, "te", true),
            Var::Act => (&self.act, "act", true),
            _ => return None,
        };
        Some(self.resolve(over, default, accessed))
    }

    pub fn stack_name(&self) -> String {
        self.resolve(&self.stack, "stack", true)
    }

    pub fn data_name(&self) -> String {
        self.data.clone().unwrap_or_else(|| "data".to_string())
    }

    fn resolve(&self, over: &Option<String>, default: &str, accessed: bool) -> String {
        match over {
            Some(name) => name.clone(),
            None if accessed => format!("{}{default}", self.access.as_deref().unwrap_or("")),
            None => default.to_string(),
        }
    }
}

/// Options for one generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenOptions {
    /// Machine name, used as the prefix of every emitted data name.
    pub name: String,
    pub no_prefix: bool,
    /// Omit end-of-buffer tests; the input is assumed to carry its own terminator.
    pub no_end: bool,
    pub no_error: bool,
    pub no_final: bool,
    /// The init block leaves the current state alone.
    pub no_cs: bool,
    pub line_directives: bool,
    pub vars: VarNames,
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            name: "fsm".to_string(),
            no_prefix: false,
            no_end: false,
            no_error: false,
            no_final: false,
            no_cs: false,
            line_directives: false,
            vars: VarNames::default(),
        }
    }
}

impl GenOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Prefix of data names: `name_`, or nothing with `no_prefix`.
    pub fn prefix(&self) -> String {
        if self.no_prefix || self.name.is_empty() {
            String::new()
        } else {
            format!("{}_", self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_prefix_applies_to_host_state_only() {
        let vars = VarNames { access: Some("fsm->".into()), pe: Some("end".into()), ..Default::default() };
        assert_eq!(vars.machine(Var::Cs).as_deref(), Some("fsm->cs"));
        assert_eq!(vars.machine(Var::P).as_deref(), Some("p"));
        assert_eq!(vars.machine(Var::Pe).as_deref(), Some("end"));
        assert_eq!(vars.stack_name(), "fsm->stack");
        assert_eq!(vars.machine(Var::Trans), None);
    }

    #[test]
    fn prefix() {
        assert_eq!(GenOptions::named("scan").prefix(), "scan_");
        let opts = GenOptions { no_prefix: true, ..GenOptions::default() };
        assert_eq!(opts.prefix(), "");
    }
}
