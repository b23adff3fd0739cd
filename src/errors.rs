//! Error types for transcript operations.

use similar::{ChangeTag, TextDiff};
use termcolor::{Color, ColorSpec, WriteColor};

use std::{
    error::Error as StdError,
    fmt,
    io,
    path::PathBuf,
};

use crate::shell::ShellError;

/// Errors that can occur while interpreting, checking or updating a transcript.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Malformed transcript line.
    Syntax(SyntaxError),
    /// A command block failed its check.
    Check(CommandCheckError),
    /// Invalid `dep` directive.
    Dep(DepValidationError),
    /// Error reported by the embedded shell.
    Shell(ShellError),
    /// Failed reading a sidecar file referenced from the transcript.
    ReadFile {
        /// Path as written in the transcript.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Failed writing a sidecar file next to the transcript.
    WriteFile {
        /// Resolved path of the sidecar file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Generic I/O error.
    Io(io::Error),
    /// The operation was cancelled via a [`CancelToken`](crate::CancelToken).
    Cancelled,
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(err) => fmt::Display::fmt(err, formatter),
            Self::Check(err) => fmt::Display::fmt(err, formatter),
            Self::Dep(err) => fmt::Display::fmt(err, formatter),
            Self::Shell(err) => fmt::Display::fmt(err, formatter),
            Self::ReadFile { path, source } => {
                write!(formatter, "reading expected file {path}: {source}")
            }
            Self::WriteFile { path, source } => {
                write!(
                    formatter,
                    "writing sidecar file {path}: {source}",
                    path = path.display()
                )
            }
            Self::Io(err) => write!(formatter, "I/O error: {err}"),
            Self::Cancelled => formatter.write_str("operation cancelled"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Syntax(err) => Some(err),
            Self::Check(err) => Some(err),
            Self::Dep(err) => Some(err),
            Self::Shell(err) => Some(err),
            Self::ReadFile { source, .. } | Self::WriteFile { source, .. } => Some(source),
            Self::Io(err) => Some(err),
            Self::Cancelled => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<SyntaxError> for Error {
    fn from(err: SyntaxError) -> Self {
        Self::Syntax(err)
    }
}

impl From<CommandCheckError> for Error {
    fn from(err: CommandCheckError) -> Self {
        Self::Check(err)
    }
}

impl From<DepValidationError> for Error {
    fn from(err: DepValidationError) -> Self {
        Self::Dep(err)
    }
}

impl From<ShellError> for Error {
    fn from(err: ShellError) -> Self {
        match err {
            ShellError::Cancelled => Self::Cancelled,
            other => Self::Shell(other),
        }
    }
}

/// Malformed transcript line, with its 1-based line number.
#[derive(Debug)]
pub struct SyntaxError {
    lineno: usize,
    message: String,
}

impl SyntaxError {
    pub(crate) fn new(lineno: usize, message: impl Into<String>) -> Self {
        Self {
            lineno,
            message: message.into(),
        }
    }

    /// Returns the 1-based number of the offending line.
    pub fn lineno(&self) -> usize {
        self.lineno
    }

    /// Returns the error message without the position prefix.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "syntax error on line {}: {}",
            self.lineno, self.message
        )
    }
}

impl StdError for SyntaxError {}

/// Failure of a single command block, raised at the end of the block.
///
/// Carries the command text, the line of its `$` line, and the list of
/// individual failures (an output diff and/or an exit code mismatch), or the
/// error that aborted the command's execution.
#[derive(Debug)]
pub struct CommandCheckError {
    command: String,
    lineno: usize,
    failures: Vec<CheckFailure>,
}

impl CommandCheckError {
    pub(crate) fn new(command: String, lineno: usize, failures: Vec<CheckFailure>) -> Self {
        Self {
            command,
            lineno,
            failures,
        }
    }

    /// Returns the text of the failed command.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the 1-based line number of the command's `$` line.
    pub fn lineno(&self) -> usize {
        self.lineno
    }

    /// Returns the individual failures for this command.
    pub fn failures(&self) -> &[CheckFailure] {
        &self.failures
    }
}

impl fmt::Display for CommandCheckError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("check failed")?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(formatter, "{sep}{failure}")?;
        }
        Ok(())
    }
}

impl StdError for CommandCheckError {}

/// A single reason within a [`CommandCheckError`].
#[derive(Debug)]
#[non_exhaustive]
pub enum CheckFailure {
    /// Recorded output differs from the expected output.
    Diff(DiffError),
    /// Exit code differs from the expected one.
    ExitCode {
        /// Exit code expected by the transcript (0 if unspecified).
        expected: i32,
        /// Exit code reported by the shell.
        actual: i32,
    },
    /// The command could not be executed at all.
    Exec(Box<Error>),
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Diff(err) => fmt::Display::fmt(err, formatter),
            Self::ExitCode { expected, actual } => {
                write!(formatter, "expected exit code {expected}, but got {actual}")
            }
            Self::Exec(err) => fmt::Display::fmt(err, formatter),
        }
    }
}

/// Mismatch between expected and recorded output of a command.
///
/// The enclosed strings are in transcript-encoded form (`1 ` / `2 ` prefixed
/// lines). Rendering as a diff is left to the caller; [`Self::plain()`] and
/// [`Self::write_colorized()`] provide the two standard renderings.
#[derive(Debug)]
pub struct DiffError {
    expected: String,
    actual: String,
}

impl DiffError {
    pub(crate) fn new(expected: String, actual: String) -> Self {
        Self { expected, actual }
    }

    /// Returns the expected output in transcript-encoded form.
    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// Returns the recorded output in transcript-encoded form.
    pub fn actual(&self) -> &str {
        &self.actual
    }

    /// Renders a unified plain-text diff between expected and actual output.
    pub fn plain(&self) -> String {
        let diff = TextDiff::from_lines(self.expected.as_str(), self.actual.as_str());
        let rendered = diff
            .unified_diff()
            .context_radius(3)
            .header("expected", "actual")
            .to_string();
        rendered.trim_end().to_owned()
    }

    /// Writes a line diff with removals in red and insertions in green.
    ///
    /// # Errors
    ///
    /// - Returns an I/O error should it occur when writing to `out`.
    pub fn write_colorized(&self, out: &mut impl WriteColor) -> io::Result<()> {
        let diff = TextDiff::from_lines(self.expected.as_str(), self.actual.as_str());
        for change in diff.iter_all_changes() {
            let (sign, color) = match change.tag() {
                ChangeTag::Delete => ("-", Some(Color::Red)),
                ChangeTag::Insert => ("+", Some(Color::Green)),
                ChangeTag::Equal => (" ", None),
            };
            if let Some(color) = color {
                out.set_color(ColorSpec::new().set_fg(Some(color)))?;
            }
            write!(out, "{sign}{}", change.value())?;
            if change.missing_newline() {
                writeln!(out)?;
            }
            if color.is_some() {
                out.reset()?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for DiffError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("output differs")
    }
}

impl StdError for DiffError {}

/// A `dep` statement that violates the restricted form (see the dependency
/// tracker documentation).
#[derive(Debug)]
pub struct DepValidationError {
    message: String,
}

impl DepValidationError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for DepValidationError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.message)
    }
}

impl StdError for DepValidationError {}
