//! Transcript checking: re-run commands and compare against expectations.

use std::{
    fs,
    io::{BufRead, Write},
    mem,
    path::{Path, PathBuf},
};

use crate::{
    cancel::CancelToken,
    classify, dep,
    errors::{CheckFailure, CommandCheckError, DiffError, Error},
    interpreter::{Cursor, Fd, Handler, Interpreter},
    recorder::{CommandResult, Recorder},
    writers::PrefixingWriter,
};

/// Checks transcripts by executing their commands through a fresh [`Recorder`]
/// and comparing the recorded output and exit code of every command block
/// against the transcript's expectations.
#[derive(Debug, Default)]
pub struct Checker {
    current_dir: Option<PathBuf>,
    cancel: CancelToken,
}

impl Checker {
    /// Creates a checker whose shell starts in the process's working directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes the starting directory of the shell used for checking.
    #[must_use]
    pub fn with_current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Sets the cancellation token observed while checking.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Checks a whole transcript.
    ///
    /// # Errors
    ///
    /// - Returns [`Error::Check`] for the first failing command block,
    ///   [`Error::Syntax`] for malformed lines, or any execution error.
    #[tracing::instrument(skip_all, err)]
    pub fn check_transcript(&self, reader: impl BufRead) -> Result<(), Error> {
        let mut rec = Recorder::new()?;
        if let Some(dir) = &self.current_dir {
            rec = rec.with_current_dir(dir);
        }
        let rec = rec.with_cancel_token(self.cancel.clone());

        let mut handler = CheckHandler {
            rec,
            expected_output: vec![],
            expected_exit_code: 0,
            actual: None,
        };
        Interpreter::new()
            .with_cancel_token(self.cancel.clone())
            .exec_transcript(&mut handler, reader)
    }
}

struct CheckHandler {
    rec: Recorder,
    expected_output: Vec<u8>,
    expected_exit_code: i32,
    actual: Option<CommandResult>,
}

impl CheckHandler {
    fn expect_line(&mut self, text: &str) {
        self.expected_output.extend_from_slice(text.as_bytes());
        self.expected_output.push(b'\n');
    }
}

fn command_check_error(cursor: &Cursor, failures: Vec<CheckFailure>) -> Error {
    Error::Check(CommandCheckError::new(
        cursor.command.clone(),
        cursor.command_lineno,
        failures,
    ))
}

impl Handler for CheckHandler {
    fn on_comment(&mut self, _: &Cursor, _: &str) -> Result<(), Error> {
        Ok(())
    }

    fn on_run(&mut self, cursor: &Cursor, command: &str) -> Result<(), Error> {
        self.expected_output.clear();
        self.expected_exit_code = 0;
        match self.rec.run_command(command) {
            Ok(result) => {
                self.actual = Some(result);
                Ok(())
            }
            Err(err @ Error::Cancelled) => Err(err),
            Err(err) => Err(command_check_error(
                cursor,
                vec![CheckFailure::Exec(Box::new(err))],
            )),
        }
    }

    fn on_output(&mut self, _: &Cursor, fd: Fd, line: &str) -> Result<(), Error> {
        if line.is_empty() {
            self.expect_line(fd.digit());
        } else {
            self.expect_line(&format!("{fd} {line}"));
        }
        Ok(())
    }

    fn on_file_output(&mut self, _: &Cursor, fd: Fd, path: &str) -> Result<(), Error> {
        // Resolved relative to the *shell's* working directory, which may have
        // been moved by an earlier `cd` in the transcript.
        let resolved = self.rec.current_dir().join(path);
        let bytes = fs::read(resolved).map_err(|source| Error::ReadFile {
            path: path.to_owned(),
            source,
        })?;

        if bytes.is_empty() {
            // An empty stream records as nothing at all.
        } else if classify::is_binary(&bytes) {
            self.expect_line(&format!("{}< {path}", fd.digit()));
        } else {
            // A text file compares in inline form, exactly as the recorder
            // would have emitted the stream.
            {
                let mut writer = PrefixingWriter::new(fd.digit(), " ", &mut self.expected_output);
                writer.write_all(&bytes)?;
            }
            if !bytes.ends_with(b"\n") {
                self.expected_output.extend_from_slice(b"\n% no-newline\n");
            }
        }
        Ok(())
    }

    fn on_no_newline(&mut self, _: &Cursor, _: Fd) -> Result<(), Error> {
        // The preceding expected line is already newline-terminated; the fd is
        // implied by that line.
        self.expect_line("% no-newline");
        Ok(())
    }

    fn on_exit_code(&mut self, _: &Cursor, exit_code: i32) -> Result<(), Error> {
        self.expected_exit_code = exit_code;
        Ok(())
    }

    fn on_dep(&mut self, cursor: &Cursor, payload: &str) -> Result<(), Error> {
        self.rec
            .run_dep_directive(payload)
            .map_err(|err| dep::directive_error(cursor.lineno, err))
    }

    fn on_end(&mut self, cursor: &Cursor) -> Result<(), Error> {
        let Some(actual) = self.actual.take() else {
            return Ok(());
        };
        let expected_output = mem::take(&mut self.expected_output);
        let expected_exit_code = mem::replace(&mut self.expected_exit_code, 0);

        let mut failures = vec![];
        if expected_output != actual.output() {
            failures.push(CheckFailure::Diff(DiffError::new(
                String::from_utf8_lossy(&expected_output).into_owned(),
                String::from_utf8_lossy(actual.output()).into_owned(),
            )));
        }
        if expected_exit_code != actual.exit_code() {
            failures.push(CheckFailure::ExitCode {
                expected: expected_exit_code,
                actual: actual.exit_code(),
            });
        }

        if failures.is_empty() {
            Ok(())
        } else {
            tracing::debug!(command = %cursor.command, "command failed its check");
            Err(command_check_error(cursor, failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn check(transcript: &str) -> Result<(), Error> {
        Checker::new().check_transcript(transcript.as_bytes())
    }

    #[test]
    fn checking_a_passing_transcript() {
        check("$ echo hi\n1 hi\n").unwrap();
    }

    #[test]
    fn interleaved_streams_and_exit_codes() {
        check("$ sh -c 'echo out; echo err >&2; exit 7'\n2 err\n1 out\n? 7\n").unwrap();
    }

    #[test]
    fn mismatched_output_raises_a_diff() {
        let err = check("$ echo bye\n1 hi\n").unwrap_err();
        let Error::Check(check_err) = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(check_err.lineno(), 1);
        assert_eq!(check_err.command(), "echo bye");
        assert_matches!(
            check_err.failures(),
            [CheckFailure::Diff(diff)]
                if diff.expected() == "1 hi\n" && diff.actual() == "1 bye\n"
        );
    }

    #[test]
    fn mismatched_exit_code_is_its_own_failure() {
        let err = check("$ false\n").unwrap_err();
        let Error::Check(check_err) = err else {
            panic!("unexpected error: {err}");
        };
        assert_matches!(
            check_err.failures(),
            [CheckFailure::ExitCode { expected: 0, actual: 1 }]
        );
    }

    #[test]
    fn expected_file_reads_follow_the_shells_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/expected.txt"), "ok\n").unwrap();

        let transcript = "$ cd sub\n$ cat expected.txt\n1< expected.txt\n";
        Checker::new()
            .with_current_dir(dir.path())
            .check_transcript(transcript.as_bytes())
            .unwrap();
    }

    #[test]
    fn missing_expected_file_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = "$ echo hi\n1< missing.bin\n";
        let err = Checker::new()
            .with_current_dir(dir.path())
            .check_transcript(transcript.as_bytes())
            .unwrap_err();
        assert!(
            err.to_string().contains("reading expected file missing.bin"),
            "{err}"
        );
    }
}
