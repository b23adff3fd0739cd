//! Recording, checking and updating of shell command transcripts.
//!
//! A *transcript* is a line-oriented text file capturing shell commands
//! together with their expected stdout, stderr and exit code:
//!
//! ```text
//! $ echo hi
//! 1 hi
//!
//! $ cat missing.txt
//! 2 cat: missing.txt: No such file or directory
//! ? 1
//! ```
//!
//! Transcripts drive black-box tests of command-line tools: checking a
//! transcript re-runs its commands in an embedded shell and diffs the
//! captured output against the expectations; updating re-runs the commands
//! and rewrites the expectations in place. Binary output is externalized
//! into *sidecar files* referenced as `1< file.bin`, and `% dep` directives
//! declare file / environment dependencies so outer build caches observing
//! the test process invalidate correctly.
//!
//! # Examples
//!
//! ```
//! use cmdt::Checker;
//!
//! # fn main() -> Result<(), cmdt::Error> {
//! let transcript = "$ echo hi\n1 hi\n";
//! Checker::new().check_transcript(transcript.as_bytes())?;
//! # Ok(())
//! # }
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

mod cancel;
mod checker;
mod classify;
mod dep;
mod errors;
mod formatter;
mod interpreter;
mod recorder;
mod shell;
mod updater;
mod writers;

pub use self::{
    cancel::CancelToken,
    checker::Checker,
    errors::{CheckFailure, CommandCheckError, DepValidationError, DiffError, Error, SyntaxError},
    formatter::Formatter,
    interpreter::{Cursor, Fd, Handler, Interpreter},
    recorder::{CommandResult, Recorder},
    shell::ShellError,
    updater::Updater,
};
