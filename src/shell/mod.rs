//! Embedded POSIX-flavored shell.
//!
//! The transcript engine needs a shell it can drive in-process: parse a
//! single statement, run it with caller-supplied stdio, observe the exit
//! status as a value, intercept the `dep` intrinsic, and expose the
//! statement's working directory. This module provides exactly that contract;
//! it is not a general-purpose shell.

use std::{error::Error as StdError, fmt, io};

pub(crate) mod ast;
pub(crate) mod exec;
pub(crate) mod expand;
mod parse;

pub(crate) use self::{
    exec::{ExecContext, Io, OutputHandle, Runner},
    parse::parse_single,
};

/// Errors reported by the embedded shell.
#[derive(Debug)]
#[non_exhaustive]
pub enum ShellError {
    /// Malformed shell syntax.
    Parse(String),
    /// The input did not contain exactly one statement.
    NotOneStatement(usize),
    /// Recognized but unsupported shell construct.
    Unsupported(String),
    /// I/O error while wiring or waiting on processes.
    Io(io::Error),
    /// Execution was cancelled.
    Cancelled,
}

impl fmt::Display for ShellError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(message) => write!(formatter, "parsing: {message}"),
            Self::NotOneStatement(count) => {
                write!(formatter, "expected exactly one statement, got {count}")
            }
            Self::Unsupported(what) => write!(formatter, "unsupported: {what}"),
            Self::Io(err) => write!(formatter, "I/O error: {err}"),
            Self::Cancelled => formatter.write_str("execution cancelled"),
        }
    }
}

impl StdError for ShellError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}
