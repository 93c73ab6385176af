//! Target formatters.
//!
//! A formatter owns the lexical side of emission: integer type names, array
//! literals, statement syntax and the naming of labels and control functions.
//! Shapes never see it; the driver hands it a fully lowered unit.

pub mod c;
pub mod rust;

use fsmgen_core::keys::{IntType, KeyRange};

use crate::CodegenError;
use crate::ir::{ArrayId, ConstId, Lowered, Var};
use crate::options::GenOptions;
use crate::shape::Shape;

pub trait Formatter {
    fn name(&self) -> &'static str;
    /// Array element types, in the order type selection tries them.
    fn int_types(&self) -> &[IntType];
    fn supports(&self, shape: Shape) -> bool;
    fn data(&self, unit: &Lowered, opts: &GenOptions) -> String;
    fn exec(&self, unit: &Lowered, opts: &GenOptions) -> Result<String, CodegenError>;
    fn init(&self, unit: &Lowered, opts: &GenOptions) -> String;
    /// The separately compiled units of a split shape; empty otherwise.
    fn partitions(&self, unit: &Lowered, opts: &GenOptions) -> Result<Vec<String>, CodegenError>;
}

/// `_{prefix}{suffix}`, e.g. `_fsm_trans_keys`.
pub fn array_name(opts: &GenOptions, id: ArrayId) -> String {
    format!("_{}{}", opts.prefix(), id.suffix())
}

pub fn const_name(opts: &GenOptions, id: &ConstId) -> String {
    let prefix = opts.prefix();
    match id {
        ConstId::Start => format!("{prefix}start"),
        ConstId::FirstFinal => format!("{prefix}first_final"),
        ConstId::Error => format!("{prefix}error"),
        ConstId::Entry(name) => format!("{prefix}en_{name}"),
        ConstId::Export(name) => format!("{prefix}ex_{name}"),
    }
}

/// Emitted name of a variable: machine variables resolve through `VarNames`.
pub fn var_name(opts: &GenOptions, var: Var) -> String {
    opts.vars.machine(var).unwrap_or_else(|| scratch_name(var).to_string())
}

fn scratch_name(var: Var) -> &'static str {
    match var {
        Var::Trans => "_trans",
        Var::Keys => "_keys",
        Var::Inds => "_inds",
        Var::Slen => "_slen",
        Var::Klen => "_klen",
        Var::Lower => "_lower",
        Var::Upper => "_upper",
        Var::Mid => "_mid",
        Var::Widec => "_widec",
        Var::Cond => "_cond",
        Var::Ps => "_ps",
        Var::Stat => "_stat",
        Var::P => "p",
        Var::Pe => "pe",
        Var::Eof => "eof",
        Var::Cs => "cs",
        Var::Top => "top",
        Var::Ts => "ts",
        Var::Te => "te",
        Var::Act => "act",
    }
}

/// Narrowest standard type holding every key of `keys`, widened keys included.
pub fn key_type(keys: KeyRange) -> IntType {
    IntType::STANDARD
        .iter()
        .copied()
        .find(|t| t.holds(keys.low as i128, keys.high as i128))
        .unwrap_or(IntType::I64)
}

/// Indented line writer.
pub struct Writer {
    out: String,
    depth: usize,
    indent: &'static str,
}

impl Writer {
    pub fn new(indent: &'static str) -> Self {
        Writer { out: String::new(), depth: 0, indent }
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if text.is_empty() {
            self.out.push('\n');
            return;
        }
        for _ in 0..self.depth {
            self.out.push_str(self.indent);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    /// Writes `text` at column zero, for preprocessor lines and labels.
    pub fn flush_left(&mut self, text: impl AsRef<str>) {
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    /// Writes `text`, then indents.
    pub fn open(&mut self, text: impl AsRef<str>) {
        self.line(text);
        self.depth += 1;
    }

    /// Dedents, then writes `text`.
    pub fn close(&mut self, text: impl AsRef<str>) {
        self.depth = self.depth.saturating_sub(1);
        self.line(text);
    }

    /// Dedents, writes `text`, then indents again.
    pub fn reopen(&mut self, text: impl AsRef<str>) {
        self.close(text);
        self.depth += 1;
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Comma separated values, wrapped every `per_line` values.
pub fn value_list(w: &mut Writer, values: &[i64], per_line: usize) {
    let per_line = per_line.max(1);
    let chunks: Vec<&[i64]> = values.chunks(per_line).collect();
    for (i, chunk) in chunks.iter().enumerate() {
        let text: Vec<String> = chunk.iter().map(i64::to_string).collect();
        let sep = if i + 1 < chunks.len() { "," } else { "" };
        w.line(format!("{}{sep}", text.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_prefix() {
        let opts = GenOptions::named("url");
        assert_eq!(array_name(&opts, ArrayId::TransKeys), "_url_trans_keys");
        assert_eq!(const_name(&opts, &ConstId::Entry("main".into())), "url_en_main");
        let bare = GenOptions { no_prefix: true, ..GenOptions::named("url") };
        assert_eq!(const_name(&bare, &ConstId::Start), "start");
    }

    #[test]
    fn writer_indents_blocks() {
        let mut w = Writer::new("\t");
        w.open("if ( x ) {");
        w.line("y;");
        w.close("}");
        w.flush_left("#line 3 \"a.rl\"");
        assert_eq!(w.finish(), "if ( x ) {\n\ty;\n}\n#line 3 \"a.rl\"\n");
    }

    #[test]
    fn values_wrap() {
        let mut w = Writer::new("  ");
        value_list(&mut w, &[1, 2, 3], 2);
        assert_eq!(w.finish(), "1, 2,\n3\n");
    }

    #[test]
    fn key_type_covers_widened_keys() {
        assert_eq!(key_type(KeyRange::new(0, 255)), IntType::U8);
        assert_eq!(key_type(KeyRange::new(-128, 400)), IntType::I16);
    }
}
