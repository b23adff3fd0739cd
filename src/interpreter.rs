//! Line-driven interpreter for the transcript format.

use std::{fmt, io::BufRead};

use crate::{
    cancel::CancelToken,
    errors::{Error, SyntaxError},
};

/// Output stream of a recorded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fd {
    /// Standard output (`1` lines).
    Stdout,
    /// Standard error (`2` lines).
    Stderr,
}

impl Fd {
    /// Returns the transcript digit for this stream (`"1"` or `"2"`).
    pub fn digit(self) -> &'static str {
        match self {
            Self::Stdout => "1",
            Self::Stderr => "2",
        }
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.digit())
    }
}

/// Interpreter position, exposed to handlers so they can annotate errors.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    /// 1-based number of the line currently executing.
    pub lineno: usize,
    /// Text of the most recently seen command.
    pub command: String,
    /// Line of the most recently seen command (0 before the first command).
    pub command_lineno: usize,
}

/// Receiver of transcript events, in strict source order.
///
/// The checker, updater and formatter are the three in-crate implementations.
/// Each callback gets the interpreter [`Cursor`] for error positioning.
pub trait Handler {
    /// A comment or blank line (delivered verbatim).
    fn on_comment(&mut self, cursor: &Cursor, text: &str) -> Result<(), Error>;
    /// A `$` command line, starting a new command block.
    fn on_run(&mut self, cursor: &Cursor, command: &str) -> Result<(), Error>;
    /// An inline output expectation (`1 ` / `2 ` line).
    fn on_output(&mut self, cursor: &Cursor, fd: Fd, line: &str) -> Result<(), Error>;
    /// A sidecar file reference (`1< ` / `2< ` line).
    fn on_file_output(&mut self, cursor: &Cursor, fd: Fd, path: &str) -> Result<(), Error>;
    /// A `% no-newline` directive referring to the preceding output line.
    fn on_no_newline(&mut self, cursor: &Cursor, fd: Fd) -> Result<(), Error>;
    /// A `? N` exit code expectation.
    fn on_exit_code(&mut self, cursor: &Cursor, exit_code: i32) -> Result<(), Error>;
    /// A `% dep` dependency declaration.
    fn on_dep(&mut self, cursor: &Cursor, payload: &str) -> Result<(), Error>;
    /// End of a command block (before the next `$` line, or at EOF).
    fn on_end(&mut self, cursor: &Cursor) -> Result<(), Error>;
}

/// Single-pass interpreter turning transcript text into [`Handler`] events.
#[derive(Debug, Default)]
pub struct Interpreter {
    cursor: Cursor,
    accept_results: bool,
    prev_fd: Option<Fd>,
    cancel: CancelToken,
}

impl Interpreter {
    /// Creates an interpreter with a fresh cursor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cancellation token checked between lines.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the current interpreter position.
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Executes a whole transcript, delivering events to `handler`.
    ///
    /// # Errors
    ///
    /// - Returns a syntax error for a malformed line, any error raised by the
    ///   handler, or [`Error::Cancelled`] if the token fires between lines.
    pub fn exec_transcript<H: Handler>(
        &mut self,
        handler: &mut H,
        reader: impl BufRead,
    ) -> Result<(), Error> {
        for line in reader.lines() {
            self.cancel.check()?;
            let line = line?;
            self.cursor.lineno += 1;
            self.exec_line(handler, &line)?;
        }
        self.flush_command(handler)
    }

    /// Executes a single transcript line.
    ///
    /// # Errors
    ///
    /// - Returns a syntax error for a malformed line or any handler error.
    pub fn exec_line<H: Handler>(&mut self, handler: &mut H, text: &str) -> Result<(), Error> {
        if text.trim().is_empty() || text.starts_with('#') {
            return handler.on_comment(&self.cursor, text);
        }

        let (opcode, payload) = match text.split_once(' ') {
            Some((opcode, payload)) => (opcode, payload),
            None => (text, ""),
        };
        match opcode {
            "$" => {
                self.flush_command(handler)?;
                self.cursor.command = payload.to_owned();
                self.cursor.command_lineno = self.cursor.lineno;
                self.accept_results = true;
                handler.on_run(&self.cursor, payload)
            }

            "1" | "2" => {
                if !self.accept_results {
                    return Err(self.syntax_error("unexpected output check"));
                }
                let fd = if opcode == "1" { Fd::Stdout } else { Fd::Stderr };
                self.prev_fd = Some(fd);
                handler.on_output(&self.cursor, fd, payload)
            }

            "1<" | "2<" => {
                if !self.accept_results {
                    return Err(self.syntax_error("unexpected output check"));
                }
                let fd = if opcode == "1<" { Fd::Stdout } else { Fd::Stderr };
                handler.on_file_output(&self.cursor, fd, payload)
            }

            "?" => {
                if !self.accept_results {
                    return Err(self.syntax_error("unexpected exit status check"));
                }
                let exit_code: i32 = payload
                    .parse()
                    .map_err(|err| self.syntax_error(format!("parsing exit code: {err}")))?;
                let res = handler.on_exit_code(&self.cursor, exit_code);
                self.accept_results = false;
                res
            }

            "%" => {
                let (directive, args) = match payload.split_once(' ') {
                    Some((directive, args)) => (directive, args),
                    None => (payload, ""),
                };
                match directive {
                    "no-newline" => {
                        let Some(fd) = self.prev_fd else {
                            return Err(self.syntax_error("no output prior to no-newline"));
                        };
                        if !args.trim().is_empty() {
                            return Err(self.syntax_error("unexpected arguments"));
                        }
                        handler.on_no_newline(&self.cursor, fd)
                    }
                    // Dependency declarations may appear anywhere, including
                    // before the first command.
                    "dep" => handler.on_dep(&self.cursor, args),
                    _ => Err(self.syntax_error(format!("invalid directive: {directive:?}"))),
                }
            }

            _ => Err(self.syntax_error(format!("invalid opcode: {opcode:?}"))),
        }
    }

    fn flush_command<H: Handler>(&mut self, handler: &mut H) -> Result<(), Error> {
        if self.cursor.command_lineno == 0 {
            return Ok(());
        }
        self.prev_fd = None;
        handler.on_end(&self.cursor)
    }

    fn syntax_error(&self, message: impl Into<String>) -> Error {
        Error::Syntax(SyntaxError::new(self.cursor.lineno, message))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[derive(Debug, Default)]
    struct RecordingHandler {
        events: Vec<String>,
    }

    impl Handler for RecordingHandler {
        fn on_comment(&mut self, _: &Cursor, text: &str) -> Result<(), Error> {
            self.events.push(format!("comment({text})"));
            Ok(())
        }

        fn on_run(&mut self, cursor: &Cursor, command: &str) -> Result<(), Error> {
            self.events.push(format!("run({command}@{})", cursor.lineno));
            Ok(())
        }

        fn on_output(&mut self, _: &Cursor, fd: Fd, line: &str) -> Result<(), Error> {
            self.events.push(format!("output({fd}, {line})"));
            Ok(())
        }

        fn on_file_output(&mut self, _: &Cursor, fd: Fd, path: &str) -> Result<(), Error> {
            self.events.push(format!("file({fd}, {path})"));
            Ok(())
        }

        fn on_no_newline(&mut self, _: &Cursor, fd: Fd) -> Result<(), Error> {
            self.events.push(format!("no-newline({fd})"));
            Ok(())
        }

        fn on_exit_code(&mut self, _: &Cursor, exit_code: i32) -> Result<(), Error> {
            self.events.push(format!("exit({exit_code})"));
            Ok(())
        }

        fn on_dep(&mut self, _: &Cursor, payload: &str) -> Result<(), Error> {
            self.events.push(format!("dep({payload})"));
            Ok(())
        }

        fn on_end(&mut self, _: &Cursor) -> Result<(), Error> {
            self.events.push("end".to_owned());
            Ok(())
        }
    }

    fn exec(transcript: &str) -> Result<Vec<String>, Error> {
        let mut handler = RecordingHandler::default();
        Interpreter::new().exec_transcript(&mut handler, transcript.as_bytes())?;
        Ok(handler.events)
    }

    #[test]
    fn event_stream_for_basic_transcript() -> Result<(), Error> {
        let transcript = "# greeting\n$ echo hi\n1 hi\n2 oops\n? 1\n\n$ printf ab\n1 ab\n% no-newline\n";
        let events = exec(transcript)?;
        assert_eq!(
            events,
            [
                "comment(# greeting)",
                "run(echo hi@2)",
                "output(1, hi)",
                "output(2, oops)",
                "exit(1)",
                "comment()",
                "end",
                "run(printf ab@7)",
                "output(1, ab)",
                "no-newline(1)",
                "end",
            ]
        );
        Ok(())
    }

    #[test]
    fn file_output_and_dep_events() -> Result<(), Error> {
        let transcript = "% dep config.txt\n$ gen\n1< payload.bin\n2 warn\n";
        let events = exec(transcript)?;
        assert_eq!(
            events,
            [
                "dep(config.txt)",
                "run(gen@2)",
                "file(1, payload.bin)",
                "output(2, warn)",
                "end",
            ]
        );
        Ok(())
    }

    #[test]
    fn output_before_any_command_is_a_syntax_error() {
        let err = exec("1 stray\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "syntax error on line 1: unexpected output check"
        );
    }

    #[test]
    fn output_after_exit_code_is_refused() {
        let err = exec("$ echo hi\n? 0\n1 hi\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "syntax error on line 3: unexpected output check"
        );
    }

    #[test]
    fn exit_status_before_any_command_is_a_syntax_error() {
        let err = exec("? 0\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "syntax error on line 1: unexpected exit status check"
        );
    }

    #[test]
    fn no_newline_without_prior_output_is_refused() {
        let err = exec("$ echo hi\n% no-newline\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "syntax error on line 2: no output prior to no-newline"
        );
    }

    #[test]
    fn no_newline_with_arguments_is_refused() {
        let err = exec("$ echo hi\n1 hi\n% no-newline 2\n").unwrap_err();
        assert_eq!(err.to_string(), "syntax error on line 3: unexpected arguments");
    }

    #[test]
    fn invalid_directive_and_opcode() {
        let err = exec("$ echo hi\n% frobnicate\n").unwrap_err();
        assert_matches!(err, Error::Syntax(ref inner) if inner.message().contains("invalid directive"));

        let err = exec("@ what\n").unwrap_err();
        assert_matches!(err, Error::Syntax(ref inner) if inner.message().contains("invalid opcode"));
    }

    #[test]
    fn malformed_exit_code() {
        let err = exec("$ echo hi\n? many\n").unwrap_err();
        assert_matches!(err, Error::Syntax(ref inner) if inner.message().starts_with("parsing exit code"));
    }

    #[test]
    fn cancelled_token_aborts_between_lines() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut handler = RecordingHandler::default();
        let err = Interpreter::new()
            .with_cancel_token(cancel)
            .exec_transcript(&mut handler, "$ echo hi\n".as_bytes())
            .unwrap_err();
        assert_matches!(err, Error::Cancelled);
        assert!(handler.events.is_empty());
    }
}
