//! The `dep` intrinsic: dependency declarations for outer build caches.
//!
//! A transcript can declare that it depends on files and environment
//! variables. The declaration works by side effect: the engine performs a
//! real `stat` / environment lookup, which an outer build-system cache keying
//! off the test process's probes will observe and use for invalidation.
//!
//! Because `dep` runs through the embedded shell (so quoting and parameter
//! expansion work naturally), its statement form is restricted to keep it a
//! declaration rather than a general escape hatch.

use std::{
    env, fs,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

use crate::{
    errors::DepValidationError,
    shell::{
        ast::{Cmd, RedirOp, RedirTarget, Stmt, Word, WordPart},
        ExecContext,
    },
};

/// Ensures a `dep` statement stays a dependency declaration: a single simple
/// command named `dep`, with at most a stdin redirection, and no constructs
/// that could execute other commands.
pub(crate) fn validate_dep_stmt(stmt: &Stmt) -> Result<(), DepValidationError> {
    if stmt.background {
        return Err(DepValidationError::new("unsupported: background jobs"));
    }
    let Cmd::Simple(simple) = &stmt.cmd else {
        return Err(DepValidationError::new(
            "unsupported: expected a simple command",
        ));
    };
    if !simple.assigns.is_empty() {
        return Err(DepValidationError::new("unsupported: assignments"));
    }
    let Some(name) = simple.words.first() else {
        return Err(DepValidationError::new("missing command name"));
    };
    if name.literal() != Some("dep") {
        return Err(DepValidationError::new("expected command name \"dep\""));
    }

    for redir in &stmt.redirs {
        if redir.op != RedirOp::In {
            return Err(DepValidationError::new(
                "unsupported: only stdin redirections (<) are allowed",
            ));
        }
        if !matches!(redir.fd, None | Some(0)) {
            return Err(DepValidationError::new(
                "unsupported: only fd 0 redirections (<) are allowed",
            ));
        }
    }

    for word in &simple.words {
        check_word(word)?;
    }
    for redir in &stmt.redirs {
        if let RedirTarget::Word(word) = &redir.target {
            check_word(word)?;
        }
    }
    Ok(())
}

/// Rejects word parts that can execute other commands. Words, quotes and
/// parameter expansions are all fine.
fn check_word(word: &Word) -> Result<(), DepValidationError> {
    check_parts(&word.parts)
}

fn check_parts(parts: &[WordPart]) -> Result<(), DepValidationError> {
    for part in parts {
        match part {
            WordPart::CmdSubst(_) => {
                return Err(DepValidationError::new("unsupported: command substitution"));
            }
            WordPart::ProcSubst(_) => {
                return Err(DepValidationError::new("unsupported: process substitution"));
            }
            WordPart::DoubleQuoted(inner) => check_parts(inner)?,
            _ => {}
        }
    }
    Ok(())
}

/// Attributes a failed `% dep` directive to its transcript line: validation
/// and parse failures become syntax errors, everything else passes through.
pub(crate) fn directive_error(lineno: usize, err: crate::Error) -> crate::Error {
    use crate::{errors::SyntaxError, shell::ShellError, Error};

    match err {
        Error::Dep(inner) => Error::Syntax(SyntaxError::new(lineno, inner.to_string())),
        Error::Shell(
            inner @ (ShellError::Parse(_)
            | ShellError::NotOneStatement(_)
            | ShellError::Unsupported(_)),
        ) => Error::Syntax(SyntaxError::new(lineno, inner.to_string())),
        other => other,
    }
}

/// Exec-handler hook installed by the recorder; intercepts the `dep` command
/// name and performs the probes instead of spawning a process.
pub(crate) fn exec_handler(cx: &mut ExecContext<'_>, args: &[String]) -> Option<io::Result<i32>> {
    if args.first().map(String::as_str) != Some("dep") {
        return None;
    }
    Some(run_intrinsic(cx, &args[1..]).map(|()| 0))
}

fn run_intrinsic(cx: &mut ExecContext<'_>, args: &[String]) -> io::Result<()> {
    tracing::debug!(?args, cwd = %cx.cwd.display(), "recording dependencies");
    for arg in args {
        record_dep_arg(cx.cwd, arg)?;
    }
    if let Some(stdin) = cx.stdin.take() {
        record_depfile(cx.cwd, BufReader::new(stdin))?;
    }
    Ok(())
}

fn record_dep_arg(dir: &Path, raw: &str) -> io::Result<()> {
    if raw.is_empty() {
        return Ok(());
    }
    if let Some(rest) = raw.strip_prefix('$') {
        let name = unescape(rest);
        let name = name.trim();
        if name.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid env var dependency: {raw:?}"),
            ));
        }
        let _ = env::var_os(name);
        return Ok(());
    }
    stat(dir, &unescape(raw));
    Ok(())
}

/// Reads a depfile: one entry per line, `#` comments and blank lines ignored,
/// `$`-prefixed lines are environment probes, anything else is a path.
fn record_depfile(dir: &Path, reader: impl BufRead) -> io::Result<()> {
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(rest) = line.strip_prefix('$') {
            let name = unescape(rest);
            let name = name.trim();
            if name.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid depfile env var line: {line:?}"),
                ));
            }
            let _ = env::var_os(name);
        } else {
            stat(dir, &unescape(line));
        }
    }
    Ok(())
}

fn stat(dir: &Path, path: &str) {
    if path.is_empty() {
        return;
    }
    let path = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        dir.join(path)
    };
    // Best-effort: even a failed stat has already been observed by the outer
    // cache, which is the behavior we want. Stat rather than open: opening
    // freshly-written files can disqualify cache entries on file systems
    // with coarse mtime precision.
    let _ = fs::metadata(path);
}

/// Unescapes depfile entries: `\\`, `\$` and `\n` are translated; any other
/// `\X` stays literal.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            None | Some('\\') => out.push('\\'),
            Some('$') => out.push('$'),
            Some('n') => out.push('\n'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}
