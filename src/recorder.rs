//! Command execution and transcript-form recording.

use std::{
    collections::VecDeque,
    env, fmt, fs,
    io::{self, Read, Write},
    path::Path,
    thread,
};

use crate::{
    cancel::CancelToken,
    classify,
    dep,
    errors::Error,
    interpreter::Fd,
    shell::{self, ast::Stmt, Io, OutputHandle},
    writers::PrefixingWriter,
};

/// Outcome of a single executed command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    output: Vec<u8>,
    exit_code: i32,
}

impl CommandResult {
    /// Returns the command's output in transcript-encoded form: `1 ` / `2 `
    /// prefixed lines (stderr first), sidecar references, and a trailing
    /// `% no-newline` line where applicable.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Returns the command's exit code.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

struct CapturedStreams {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    status: i32,
}

/// Executes commands through the embedded shell and accumulates their
/// transcript form.
///
/// Commands run with stdin detached and with stdout / stderr captured into
/// per-stream buffers (optionally tee'd to pass-through writers). After each
/// command the captured streams are flushed into the transcript, stderr
/// first, inlined as text or externalized into sidecar files depending on
/// classification.
pub struct Recorder {
    transcript: Vec<u8>,
    needs_blank: bool,
    runner: shell::Runner,
    stdout: Option<Box<dyn Write + Send>>,
    stderr: Option<Box<dyn Write + Send>>,
    preferred_files: VecDeque<String>,
    binary_seq: u32,
    cancel: CancelToken,
}

impl fmt::Debug for Recorder {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Recorder")
            .field("transcript_len", &self.transcript.len())
            .field("needs_blank", &self.needs_blank)
            .field("runner", &self.runner)
            .field("preferred_files", &self.preferred_files)
            .field("binary_seq", &self.binary_seq)
            .finish_non_exhaustive()
    }
}

impl Recorder {
    /// Creates a recorder whose shell starts in the process's working
    /// directory, with the `dep` intrinsic installed.
    ///
    /// # Errors
    ///
    /// - Returns an error if the working directory cannot be determined.
    pub fn new() -> io::Result<Self> {
        let cwd = env::current_dir()?;
        let mut runner = shell::Runner::new(cwd, CancelToken::default());
        runner.set_exec_handler(dep::exec_handler);
        Ok(Self {
            transcript: vec![],
            needs_blank: false,
            runner,
            stdout: None,
            stderr: None,
            preferred_files: VecDeque::new(),
            binary_seq: 0,
            cancel: CancelToken::default(),
        })
    }

    /// Changes the shell's starting directory.
    #[must_use]
    pub fn with_current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.runner.set_current_dir(dir.as_ref().to_owned());
        self
    }

    /// Tees captured stdout into the provided writer as well.
    #[must_use]
    pub fn with_stdout(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.stdout = Some(writer);
        self
    }

    /// Tees captured stderr into the provided writer as well.
    #[must_use]
    pub fn with_stderr(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.stderr = Some(writer);
        self
    }

    /// Sets the cancellation token observed while commands run.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.runner.set_cancel_token(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// Executes a single command and appends its transcript form.
    ///
    /// # Errors
    ///
    /// - Returns an error if the command does not parse as exactly one shell
    ///   statement, on plumbing failures, or on cancellation (in which case
    ///   partial output is discarded).
    #[tracing::instrument(skip(self), err)]
    pub fn run_command(&mut self, command: &str) -> Result<CommandResult, Error> {
        self.cancel.check()?;
        let stmt = shell::parse_single(command)?;

        // Include a preceding blank line for all but the first command.
        let before_mark = self.transcript.len();
        if self.needs_blank {
            self.transcript.push(b'\n');
            self.needs_blank = false;
        }
        self.transcript.extend_from_slice(b"$ ");
        self.transcript.extend_from_slice(command.as_bytes());
        self.transcript.push(b'\n');
        let output_mark = self.transcript.len();

        let captured = match self.execute(&stmt) {
            Ok(captured) => captured,
            Err(err) => {
                // Partial capture is never flushed; roll back the `$` line.
                self.transcript.truncate(before_mark);
                return Err(err);
            }
        };

        self.flush_stream(Fd::Stderr, &captured.stderr)?;
        self.flush_stream(Fd::Stdout, &captured.stdout)?;

        let output = self.transcript[output_mark..].to_vec();
        if captured.status != 0 {
            self.transcript
                .extend_from_slice(format!("? {}\n", captured.status).as_bytes());
        }
        self.needs_blank = true;

        // Assume a final `exit` command and elide it from the transcript.
        // TODO: validate this assumption against the executed statement.
        if self.runner.exited().is_some() {
            self.transcript.truncate(before_mark);
        }

        tracing::debug!(exit_code = captured.status, "command finished");
        Ok(CommandResult {
            output,
            exit_code: captured.status,
        })
    }

    fn execute(&mut self, stmt: &Stmt) -> Result<CapturedStreams, Error> {
        let (mut out_reader, out_writer) = os_pipe::pipe()?;
        let (mut err_reader, err_writer) = os_pipe::pipe()?;
        let io = Io {
            stdout: OutputHandle::Pipe(out_writer),
            stderr: OutputHandle::Pipe(err_writer),
        };

        let Self {
            runner,
            stdout,
            stderr,
            ..
        } = self;
        let (status, out_join, err_join) = thread::scope(|scope| {
            let out_thread = scope.spawn(move || tee(&mut out_reader, stdout.as_deref_mut()));
            let err_thread = scope.spawn(move || tee(&mut err_reader, stderr.as_deref_mut()));
            let status = runner.run(stmt, &io);
            // Dropping the handles closes our ends of the pipes, letting the
            // capture threads observe EOF once all children have finished.
            drop(io);
            (status, out_thread.join(), err_thread.join())
        });

        let stdout = join_capture(out_join)?;
        let stderr = join_capture(err_join)?;
        let status = status?;
        Ok(CapturedStreams {
            stdout,
            stderr,
            status,
        })
    }

    fn flush_stream(&mut self, fd: Fd, bytes: &[u8]) -> Result<(), Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        if classify::is_binary(bytes) {
            let filename = self.next_binary_filename();
            let path = self.runner.resolve_path(&filename);
            fs::write(&path, bytes).map_err(|source| Error::WriteFile {
                path: path.clone(),
                source,
            })?;
            tracing::debug!(file = %path.display(), len = bytes.len(), "externalized binary output");
            self.transcript
                .extend_from_slice(format!("{}< {filename}\n", fd.digit()).as_bytes());
        } else {
            {
                let mut writer = PrefixingWriter::new(fd.digit(), " ", &mut self.transcript);
                writer.write_all(bytes)?;
            }
            if !bytes.ends_with(b"\n") {
                self.transcript.extend_from_slice(b"\n% no-newline\n");
            }
        }
        Ok(())
    }

    /// Returns the next sidecar filename: the next caller-preferred name if
    /// any, else an auto-generated `NNN.bin` name.
    fn next_binary_filename(&mut self) -> String {
        if let Some(name) = self.preferred_files.pop_front() {
            return name;
        }
        self.binary_seq += 1;
        format!("{:03}.bin", self.binary_seq)
    }

    /// Supplies sidecar filenames to prefer over auto-generated ones, in
    /// order. The updater uses this to keep existing sidecar files stable.
    pub fn set_preferred_files(&mut self, files: impl IntoIterator<Item = String>) {
        self.preferred_files = files.into_iter().collect();
    }

    /// Writes a literal comment or blank line into the transcript. No blank
    /// separator is inserted before the next command.
    pub fn record_comment(&mut self, text: &str) {
        self.transcript.extend_from_slice(text.as_bytes());
        self.transcript.push(b'\n');
        self.needs_blank = false;
    }

    /// Writes a `% <text>` directive line into the transcript.
    pub fn record_directive(&mut self, text: &str) {
        self.transcript.extend_from_slice(b"% ");
        self.transcript.extend_from_slice(text.as_bytes());
        self.transcript.push(b'\n');
        self.needs_blank = false;
    }

    /// Validates and executes a `% dep` directive payload.
    ///
    /// # Errors
    ///
    /// - Returns an error if the payload is not a single statement, violates
    ///   the restricted `dep` form, or if its probes fail to execute.
    pub fn run_dep_directive(&mut self, payload: &str) -> Result<(), Error> {
        self.cancel.check()?;
        let stmt = shell::parse_single(&format!("dep {payload}"))?;
        dep::validate_dep_stmt(&stmt)?;
        let io = Io {
            stdout: OutputHandle::Null,
            stderr: OutputHandle::Null,
        };
        let status = self.runner.run(&stmt, &io)?;
        if status != 0 {
            return Err(Error::Io(io::Error::other(format!(
                "dep directive failed with status {status}"
            ))));
        }
        Ok(())
    }

    /// Returns `true` once the shell has terminated via the `exit` builtin.
    pub fn exited(&self) -> bool {
        self.runner.exited().is_some()
    }

    /// Returns the shell's current working directory.
    pub fn current_dir(&self) -> &Path {
        self.runner.current_dir()
    }

    /// Returns the transcript accumulated so far.
    pub fn transcript(&self) -> &[u8] {
        &self.transcript
    }

    /// Consumes the recorder, returning the accumulated transcript.
    pub fn into_transcript(self) -> Vec<u8> {
        self.transcript
    }
}

fn tee<W: Write + ?Sized>(
    reader: &mut os_pipe::PipeReader,
    mut passthrough: Option<&mut W>,
) -> io::Result<Vec<u8>> {
    let mut captured = vec![];
    let mut buf = [0_u8; 8192];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        captured.extend_from_slice(&buf[..read]);
        if let Some(writer) = passthrough.as_deref_mut() {
            writer.write_all(&buf[..read])?;
            writer.flush()?;
        }
    }
    Ok(captured)
}

fn join_capture(
    joined: thread::Result<io::Result<Vec<u8>>>,
) -> Result<Vec<u8>, Error> {
    match joined {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(err)) => Err(Error::Io(err)),
        Err(_) => Err(Error::Io(io::Error::other("capture thread panicked"))),
    }
}
