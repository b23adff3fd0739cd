//! Transcript updating: re-run commands and refresh their expectations.

use std::{
    io::BufRead,
    mem,
    path::{Path, PathBuf},
};

use crate::{
    cancel::CancelToken,
    dep,
    errors::Error,
    interpreter::{Cursor, Fd, Handler, Interpreter},
    recorder::Recorder,
};

/// Rewrites transcripts by re-running their commands.
///
/// Comments keep their position relative to commands, and sidecar filenames
/// from the source transcript are handed back to the recorder as preferred
/// filenames, so existing sidecar files are overwritten rather than renamed.
/// Inline output, file references and exit codes are regenerated by execution.
#[derive(Debug, Default)]
pub struct Updater {
    current_dir: Option<PathBuf>,
    cancel: CancelToken,
}

impl Updater {
    /// Creates an updater whose shell starts in the process's working directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes the starting directory of the shell used for updating.
    #[must_use]
    pub fn with_current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Sets the cancellation token observed while updating.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Re-runs the transcript and returns its refreshed bytes.
    ///
    /// # Errors
    ///
    /// - Returns syntax errors for malformed input and any execution error.
    #[tracing::instrument(skip_all, err)]
    pub fn update_transcript(&self, reader: impl BufRead) -> Result<Vec<u8>, Error> {
        let mut rec = Recorder::new()?;
        if let Some(dir) = &self.current_dir {
            rec = rec.with_current_dir(dir);
        }
        let rec = rec.with_cancel_token(self.cancel.clone());

        let mut handler = UpdateHandler {
            rec,
            pending: None,
            preferred_files: vec![],
        };
        Interpreter::new()
            .with_cancel_token(self.cancel.clone())
            .exec_transcript(&mut handler, reader)?;
        Ok(handler.rec.into_transcript())
    }
}

/// Buffers one command at a time so that the `N< path` references following a
/// `$` line can be collected before the command is executed.
struct UpdateHandler {
    rec: Recorder,
    pending: Option<String>,
    preferred_files: Vec<String>,
}

impl UpdateHandler {
    fn flush(&mut self) -> Result<(), Error> {
        if let Some(command) = self.pending.take() {
            self.rec
                .set_preferred_files(mem::take(&mut self.preferred_files));
            self.rec.run_command(&command)?;
        }
        Ok(())
    }
}

impl Handler for UpdateHandler {
    fn on_comment(&mut self, _: &Cursor, text: &str) -> Result<(), Error> {
        self.flush()?;
        self.rec.record_comment(text);
        Ok(())
    }

    fn on_run(&mut self, _: &Cursor, command: &str) -> Result<(), Error> {
        self.flush()?;
        self.pending = Some(command.to_owned());
        self.preferred_files.clear();
        Ok(())
    }

    fn on_output(&mut self, _: &Cursor, _: Fd, _: &str) -> Result<(), Error> {
        Ok(())
    }

    fn on_file_output(&mut self, _: &Cursor, _: Fd, path: &str) -> Result<(), Error> {
        self.preferred_files.push(path.to_owned());
        Ok(())
    }

    fn on_no_newline(&mut self, _: &Cursor, _: Fd) -> Result<(), Error> {
        Ok(())
    }

    fn on_exit_code(&mut self, _: &Cursor, _: i32) -> Result<(), Error> {
        Ok(())
    }

    fn on_dep(&mut self, cursor: &Cursor, payload: &str) -> Result<(), Error> {
        self.flush()?;
        self.rec
            .run_dep_directive(payload)
            .map_err(|err| dep::directive_error(cursor.lineno, err))?;
        self.rec.record_directive(&format!("dep {payload}"));
        Ok(())
    }

    fn on_end(&mut self, _: &Cursor) -> Result<(), Error> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update_in(dir: &Path, transcript: &str) -> Vec<u8> {
        Updater::new()
            .with_current_dir(dir)
            .update_transcript(transcript.as_bytes())
            .unwrap()
    }

    #[test]
    fn refreshing_stale_output() {
        let dir = tempfile::tempdir().unwrap();
        let updated = update_in(dir.path(), "$ echo hi\n1 stale\n? 9\n");
        assert_eq!(updated, b"$ echo hi\n1 hi\n");
    }

    #[test]
    fn comments_keep_their_positions() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = "# header\n$ echo one\n1 stale\n\n# between\n$ echo two\n";
        let updated = update_in(dir.path(), transcript);
        assert_eq!(
            updated,
            b"# header\n$ echo one\n1 one\n\n# between\n$ echo two\n1 two\n"
        );
    }

    #[test]
    fn sidecar_filenames_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("payload.bin"), [9, 9, 9]).unwrap();

        let transcript = "$ printf '\\x01\\x00\\x02'\n1< payload.bin\n";
        let updated = update_in(dir.path(), transcript);
        assert_eq!(updated, b"$ printf '\\x01\\x00\\x02'\n1< payload.bin\n");
        assert_eq!(
            std::fs::read(dir.path().join("payload.bin")).unwrap(),
            [1, 0, 2]
        );
    }

    #[test]
    fn dep_directives_survive_an_update() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.txt"), "hello\n").unwrap();

        let transcript = "% dep config.txt\n$ cat config.txt\n1 stale\n";
        let updated = update_in(dir.path(), transcript);
        assert_eq!(updated, b"% dep config.txt\n$ cat config.txt\n1 hello\n");
    }
}
