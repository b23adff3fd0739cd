//! Transcript formatting: canonical re-emission without execution.

use std::io::BufRead;

use crate::{
    cancel::CancelToken,
    errors::Error,
    interpreter::{Cursor, Fd, Handler, Interpreter},
};

/// Re-emits a transcript in canonical form: normalized comments, trimmed
/// commands and directives, and exactly one trailing newline. No command is
/// executed.
#[derive(Debug, Default)]
pub struct Formatter {
    cancel: CancelToken,
}

impl Formatter {
    /// Creates a formatter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cancellation token observed between lines.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Formats a transcript and returns the canonicalized bytes.
    ///
    /// # Errors
    ///
    /// - Returns a syntax error if the input is not a valid transcript.
    #[tracing::instrument(skip_all, err)]
    pub fn format_transcript(&self, reader: impl BufRead) -> Result<Vec<u8>, Error> {
        let mut handler = FormatHandler { buf: vec![] };
        Interpreter::new()
            .with_cancel_token(self.cancel.clone())
            .exec_transcript(&mut handler, reader)?;

        // Exactly one terminating newline; empty input stays empty.
        let mut content = handler.buf;
        while content.ends_with(b"\n") {
            content.pop();
        }
        if !content.is_empty() {
            content.push(b'\n');
        }
        Ok(content)
    }
}

struct FormatHandler {
    buf: Vec<u8>,
}

impl FormatHandler {
    fn push_line(&mut self, line: &str) {
        self.buf.extend_from_slice(line.as_bytes());
        self.buf.push(b'\n');
    }
}

impl Handler for FormatHandler {
    fn on_comment(&mut self, _: &Cursor, text: &str) -> Result<(), Error> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            self.push_line("");
        } else if let Some(comment) = trimmed.strip_prefix('#') {
            let comment = comment.trim();
            if comment.is_empty() {
                self.push_line("#");
            } else {
                self.push_line(&format!("# {comment}"));
            }
        }
        Ok(())
    }

    fn on_run(&mut self, _: &Cursor, command: &str) -> Result<(), Error> {
        self.push_line(&format!("$ {}", command.trim()));
        Ok(())
    }

    fn on_output(&mut self, _: &Cursor, fd: Fd, line: &str) -> Result<(), Error> {
        // Output lines keep their content byte-for-byte, including whitespace.
        if line.is_empty() {
            self.push_line(fd.digit());
        } else {
            self.push_line(&format!("{fd} {line}"));
        }
        Ok(())
    }

    fn on_file_output(&mut self, _: &Cursor, fd: Fd, path: &str) -> Result<(), Error> {
        self.push_line(&format!("{fd}< {}", path.trim()));
        Ok(())
    }

    fn on_no_newline(&mut self, _: &Cursor, _: Fd) -> Result<(), Error> {
        self.push_line("% no-newline");
        Ok(())
    }

    fn on_exit_code(&mut self, _: &Cursor, exit_code: i32) -> Result<(), Error> {
        self.push_line(&format!("? {exit_code}"));
        Ok(())
    }

    fn on_dep(&mut self, _: &Cursor, payload: &str) -> Result<(), Error> {
        self.push_line(&format!("% dep {}", payload.trim()));
        Ok(())
    }

    fn on_end(&mut self, _: &Cursor) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn format(input: &str) -> String {
        let bytes = Formatter::new().format_transcript(input.as_bytes()).unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn normalizing_comments_and_commands() {
        let input = "#comment   \n#\n$   echo hi   \n1 hi\n";
        assert_eq!(format(input), "# comment\n#\n$ echo hi\n1 hi\n");
    }

    #[test]
    fn output_lines_keep_inner_whitespace() {
        let input = "$ indent\n1   two leading spaces\n1\n";
        assert_eq!(format(input), "$ indent\n1   two leading spaces\n1\n");
    }

    #[test]
    fn directives_and_exit_codes() {
        let input = "% dep  config.txt \n$ run\n1< data.bin \n% no-newline\n? 3\n";
        assert_eq!(
            format(input),
            "% dep config.txt\n$ run\n1< data.bin\n% no-newline\n? 3\n"
        );
    }

    #[test]
    fn trailing_newlines_are_collapsed() {
        assert_eq!(format("$ a\n\n\n\n"), "$ a\n");
        assert_eq!(format(""), "");
        assert_eq!(format("\n\n"), "");
    }

    #[test]
    fn formatting_is_idempotent() {
        let inputs = [
            "#x\n$ a\n1 out\n? 3\n",
            "% dep a b\n$ cmd\n2 warn\n1 ok\n? 1\n\n$ other\n",
            "  \n# c\n\n$ a\n1 x\n% no-newline\n",
        ];
        for input in inputs {
            let once = Formatter::new().format_transcript(input.as_bytes()).unwrap();
            let twice = Formatter::new()
                .format_transcript(once.as_slice())
                .unwrap();
            assert_eq!(
                String::from_utf8(twice).unwrap(),
                String::from_utf8(once).unwrap(),
                "input: {input:?}"
            );
        }
    }
}
