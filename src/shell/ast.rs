//! AST for single shell statements.
//!
//! The grammar is the subset of POSIX shell required by transcripts: simple
//! commands with assignments and redirections, pipelines, and-or lists, and
//! word syntax rich enough to validate `dep` statements (including command
//! and process substitution).

/// A statement: a command with its redirections and background flag.
#[derive(Debug, Clone)]
pub(crate) struct Stmt {
    pub cmd: Cmd,
    pub redirs: Vec<Redirect>,
    pub background: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum Cmd {
    Simple(SimpleCmd),
    /// `a | b | c`; every stage is a simple command with its own redirections.
    Pipeline(Vec<Stmt>),
    AndOr {
        op: AndOrOp,
        left: Box<Stmt>,
        right: Box<Stmt>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AndOrOp {
    /// `&&`
    And,
    /// `||`
    Or,
}

/// Simple command: `VAR=value name args... <redirs>`.
#[derive(Debug, Clone, Default)]
pub(crate) struct SimpleCmd {
    pub assigns: Vec<Assign>,
    pub words: Vec<Word>,
}

#[derive(Debug, Clone)]
pub(crate) struct Assign {
    pub name: String,
    pub value: Word,
}

/// A shell word: a concatenation of parts forming one token.
#[derive(Debug, Clone, Default)]
pub(crate) struct Word {
    pub parts: Vec<WordPart>,
}

impl Word {
    /// Returns the word's text if it is a single unquoted literal.
    pub fn literal(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [WordPart::Literal(text)] => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum WordPart {
    /// Unquoted text (subject to globbing).
    Literal(String),
    /// Backslash-escaped character.
    Escaped(char),
    /// `'...'`
    SingleQuoted(String),
    /// `"..."`, containing literal, parameter and substitution parts.
    DoubleQuoted(Vec<WordPart>),
    /// `$NAME`, `${NAME}`, `$?`, `$$`, `$0`..`$9`.
    Param(String),
    /// `$(...)` or `` `...` ``.
    CmdSubst(Vec<Stmt>),
    /// `<(...)` or `>(...)`. Parsed so that `dep` validation can reject it;
    /// execution reports it as unsupported.
    ProcSubst(Vec<Stmt>),
}

#[derive(Debug, Clone)]
pub(crate) struct Redirect {
    /// Explicit file descriptor (`2>`), if any.
    pub fd: Option<u32>,
    pub op: RedirOp,
    pub target: RedirTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RedirOp {
    /// `<`
    In,
    /// `>` (and `>|`)
    Out,
    /// `>>`
    Append,
    /// `<&`
    DupIn,
    /// `>&`
    DupOut,
    /// `<<`
    HereDoc,
    /// `<<<`
    HereString,
}

#[derive(Debug, Clone)]
pub(crate) enum RedirTarget {
    Word(Word),
    HereDoc {
        body: String,
        /// A quoted delimiter suppresses expansion of the body.
        quoted: bool,
    },
}
