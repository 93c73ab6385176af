// Inline items, actions, source locations and item flags

use crate::StateId;

/// Location of action code in the grammar source, carried through for
/// diagnostics and line directives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InputLoc {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

impl InputLoc {
    pub fn new(file: impl Into<String>, line: u32, col: u32) -> Self {
        Self { file: file.into(), line, col }
    }
}

impl std::fmt::Display for InputLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

/// The smallest unit of target-independent action semantics.
///
/// Text fragments are opaque user code. Every other kind is a primitive the
/// code generator expands differently per code shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InlineItem {
    /// Verbatim user code.
    Text(String),
    /// Transfer control to a state; never returns.
    Goto(StateId),
    /// Push a return state and transfer control to a state.
    Call(StateId),
    /// Set the current state without transferring control.
    Next(StateId),
    /// `Goto` with a destination computed by the child items.
    GotoExpr(Vec<InlineItem>),
    /// `Call` with a destination computed by the child items.
    CallExpr(Vec<InlineItem>),
    /// `Next` with a destination computed by the child items.
    NextExpr(Vec<InlineItem>),
    /// Pop the call stack and transfer control to the popped state.
    Ret,
    /// Current position.
    PChar,
    /// Current input key.
    Char,
    /// Step the position back by one so the current key is read again.
    Hold,
    /// Move the position to the value of the child items.
    Exec(Vec<InlineItem>),
    /// State the machine was in before the current transition.
    Curs,
    /// Target state of the current transition.
    Targs,
    /// Id of a state, as an integer expression.
    Entry(StateId),
    /// Dispatch on the recorded match id.
    LmSwitch(Vec<LmCase>),
    /// Record a match id.
    LmSetActId(u32),
    /// Record the token end at the position plus an offset.
    LmSetTokEnd(i64),
    /// Read the recorded token end.
    LmGetTokEnd,
    /// Reset the token start to the null sentinel.
    LmInitTokStart,
    /// Reset the recorded match id.
    LmInitAct,
    /// Record the token start at the current position.
    LmSetTokStart,
    /// Nested action block.
    SubAction(Vec<InlineItem>),
    /// Leave the run loop after advancing past the current key.
    Break,
}

/// One arm of a longest-match switch. `lm_id` of `None` is the default arm.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LmCase {
    pub lm_id: Option<u32>,
    pub body: Vec<InlineItem>,
}

impl InlineItem {
    pub fn text(s: impl Into<String>) -> Self {
        InlineItem::Text(s.into())
    }

    /// Calls `f` on every nested item list directly below this item.
    pub fn for_each_child_list<'a>(&'a self, mut f: impl FnMut(&'a [InlineItem])) {
        match self {
            InlineItem::GotoExpr(c)
            | InlineItem::CallExpr(c)
            | InlineItem::NextExpr(c)
            | InlineItem::Exec(c)
            | InlineItem::SubAction(c) => f(c),
            InlineItem::LmSwitch(cases) => {
                for case in cases {
                    f(&case.body);
                }
            }
            _ => {}
        }
    }
}

/// Visits every item in `items` depth-first, nested lists included.
pub fn walk_items<'a>(items: &'a [InlineItem], f: &mut impl FnMut(&'a InlineItem)) {
    for item in items {
        f(item);
        item.for_each_child_list(|children| walk_items(children, f));
    }
}

/// A named, deduplicated list of inline items.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Action {
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub loc: Option<InputLoc>,
    pub items: Vec<InlineItem>,
}

impl Action {
    pub fn new(items: Vec<InlineItem>) -> Self {
        Self { name: None, loc: None, items }
    }

    pub fn named(name: impl Into<String>, items: Vec<InlineItem>) -> Self {
        Self { name: Some(name.into()), loc: None, items }
    }

    pub fn at(mut self, loc: InputLoc) -> Self {
        self.loc = Some(loc);
        self
    }

    /// States named by goto, call, next and entry items.
    pub fn referenced_states(&self) -> Vec<StateId> {
        let mut out = Vec::new();
        walk_items(&self.items, &mut |item| match item {
            InlineItem::Goto(s) | InlineItem::Call(s) | InlineItem::Next(s) | InlineItem::Entry(s) => {
                out.push(*s)
            }
            _ => {}
        });
        out
    }

    /// States that are direct jump or call destinations.
    pub fn jump_targets(&self) -> Vec<StateId> {
        let mut out = Vec::new();
        walk_items(&self.items, &mut |item| {
            if let InlineItem::Goto(s) | InlineItem::Call(s) = item {
                out.push(*s);
            }
        });
        out
    }

    pub fn flags(&self) -> ItemFlags {
        ItemFlags::of(&self.items)
    }
}

/// Which primitive kinds occur somewhere in an item list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemFlags {
    pub goto: bool,
    pub call: bool,
    pub ret: bool,
    pub next: bool,
    /// Goto or call with a computed destination.
    pub by_value_control: bool,
    pub cur_state_ref: bool,
    pub break_stmt: bool,
    pub longest_match: bool,
}

impl ItemFlags {
    pub fn of(items: &[InlineItem]) -> Self {
        let mut flags = ItemFlags::default();
        walk_items(items, &mut |item| match item {
            InlineItem::Goto(_) => flags.goto = true,
            InlineItem::Call(_) => flags.call = true,
            InlineItem::Ret => flags.ret = true,
            InlineItem::Next(_) | InlineItem::NextExpr(_) => flags.next = true,
            InlineItem::GotoExpr(_) => {
                flags.goto = true;
                flags.by_value_control = true;
            }
            InlineItem::CallExpr(_) => {
                flags.call = true;
                flags.by_value_control = true;
            }
            InlineItem::Curs => flags.cur_state_ref = true,
            InlineItem::Break => flags.break_stmt = true,
            InlineItem::LmSwitch(_)
            | InlineItem::LmSetActId(_)
            | InlineItem::LmSetTokEnd(_)
            | InlineItem::LmGetTokEnd
            | InlineItem::LmInitTokStart
            | InlineItem::LmInitAct
            | InlineItem::LmSetTokStart => flags.longest_match = true,
            _ => {}
        });
        flags
    }

    pub fn union(self, other: ItemFlags) -> ItemFlags {
        ItemFlags {
            goto: self.goto || other.goto,
            call: self.call || other.call,
            ret: self.ret || other.ret,
            next: self.next || other.next,
            by_value_control: self.by_value_control || other.by_value_control,
            cur_state_ref: self.cur_state_ref || other.cur_state_ref,
            break_stmt: self.break_stmt || other.break_stmt,
            longest_match: self.longest_match || other.longest_match,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lm_action() -> Action {
        Action::new(vec![InlineItem::LmSwitch(vec![
            LmCase {
                lm_id: Some(1),
                body: vec![InlineItem::Exec(vec![InlineItem::LmGetTokEnd]), InlineItem::Goto(4)],
            },
            LmCase { lm_id: None, body: vec![InlineItem::Call(7)] },
        ])])
    }

    #[test]
    fn walk_reaches_nested_items() {
        let action = lm_action();
        let mut count = 0;
        walk_items(&action.items, &mut |_| count += 1);
        // switch, exec, get-tokend, goto, call
        assert_eq!(count, 5);
    }

    #[test]
    fn flags_see_through_nesting() {
        let flags = lm_action().flags();
        assert!(flags.longest_match);
        assert!(flags.goto);
        assert!(flags.call);
        assert!(!flags.ret);
        assert!(!flags.next);
    }

    #[test]
    fn computed_destinations_mark_by_value_control() {
        let action = Action::new(vec![InlineItem::GotoExpr(vec![InlineItem::text("x")])]);
        let flags = action.flags();
        assert!(flags.by_value_control);
        assert!(flags.goto);
        let next = Action::new(vec![InlineItem::NextExpr(vec![InlineItem::text("x")])]).flags();
        assert!(next.next);
        assert!(!next.by_value_control);
    }

    #[test]
    fn referenced_and_jump_targets() {
        let action = Action::new(vec![
            InlineItem::Next(2),
            InlineItem::SubAction(vec![InlineItem::Goto(3), InlineItem::Entry(9)]),
        ]);
        assert_eq!(action.referenced_states(), vec![2, 3, 9]);
        assert_eq!(action.jump_targets(), vec![3]);
    }

    #[test]
    fn loc_display() {
        assert_eq!(InputLoc::new("scan.rl", 12, 4).to_string(), "scan.rl:12:4");
    }
}
