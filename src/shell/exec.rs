//! Execution engine for parsed statements.

use os_pipe::{PipeReader, PipeWriter};

use std::{
    collections::HashMap,
    env,
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    process::{self, Child, Command, Stdio},
    thread,
    time::Duration,
};

use super::{
    ast::{AndOrOp, Cmd, Redirect, RedirOp, RedirTarget, SimpleCmd, Stmt},
    expand, ShellError,
};
use crate::cancel::CancelToken;

/// Hook invoked for every simple command before it is spawned. Returning
/// `None` falls through to regular execution. The recorder uses this to
/// intercept the `dep` intrinsic.
pub(crate) type ExecHandler = fn(&mut ExecContext<'_>, &[String]) -> Option<io::Result<i32>>;

/// Execution context handed to an [`ExecHandler`].
pub(crate) struct ExecContext<'a> {
    /// The shell's current working directory at the moment of the call.
    pub cwd: &'a Path,
    /// Redirected stdin, if the statement had one.
    pub stdin: Option<&'a mut dyn Read>,
    pub stdout: &'a mut dyn Write,
    pub stderr: &'a mut dyn Write,
}

/// Output destination handed to the runner for one statement.
#[derive(Debug)]
pub(crate) enum OutputHandle {
    Pipe(PipeWriter),
    Null,
}

impl OutputHandle {
    pub fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Pipe(writer) => Ok(Self::Pipe(writer.try_clone()?)),
            Self::Null => Ok(Self::Null),
        }
    }

    fn to_stdio(&self) -> io::Result<Stdio> {
        match self {
            Self::Pipe(writer) => Ok(writer.try_clone()?.into()),
            Self::Null => Ok(Stdio::null()),
        }
    }
}

impl Write for OutputHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Pipe(writer) => writer.write(buf),
            Self::Null => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Pipe(writer) => writer.flush(),
            Self::Null => Ok(()),
        }
    }
}

/// Per-run stdout/stderr destinations.
#[derive(Debug)]
pub(crate) struct Io {
    pub stdout: OutputHandle,
    pub stderr: OutputHandle,
}

/// Stdin of a single command.
enum StdinSource {
    Null,
    File(File),
    Bytes(Vec<u8>),
    Pipe(PipeReader),
}

impl StdinSource {
    fn into_stdio(self) -> io::Result<Stdio> {
        match self {
            Self::Null => Ok(Stdio::null()),
            Self::File(file) => Ok(file.into()),
            Self::Bytes(bytes) => {
                let (reader, mut writer) = os_pipe::pipe()?;
                thread::spawn(move || {
                    let _ = writer.write_all(&bytes);
                });
                Ok(reader.into())
            }
            Self::Pipe(reader) => Ok(reader.into()),
        }
    }
}

/// Stdout/stderr of a single command, after redirections.
enum OutSink {
    Handle(OutputHandle),
    File(File),
}

impl OutSink {
    fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Handle(handle) => Ok(Self::Handle(handle.try_clone()?)),
            Self::File(file) => Ok(Self::File(file.try_clone()?)),
        }
    }

    fn to_stdio(&self) -> io::Result<Stdio> {
        match self {
            Self::Handle(handle) => handle.to_stdio(),
            Self::File(file) => Ok(file.try_clone()?.into()),
        }
    }
}

impl Write for OutSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Handle(handle) => handle.write(buf),
            Self::File(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Handle(handle) => handle.flush(),
            Self::File(file) => file.flush(),
        }
    }
}

struct RedirSetup {
    stdin: StdinSource,
    stdout: OutSink,
    stderr: OutSink,
}

enum Spawned {
    Done(i32),
    Child(Child),
}

#[derive(Debug)]
struct Var {
    value: String,
    exported: bool,
}

/// In-process shell runner: variables, working directory, termination state.
///
/// The runner executes one statement at a time with caller-supplied output
/// handles; it deliberately has no persistent stdio of its own.
#[derive(Debug)]
pub(crate) struct Runner {
    vars: HashMap<String, Var>,
    cwd: PathBuf,
    exited: Option<i32>,
    last_status: i32,
    exec_handler: Option<ExecHandler>,
    cancel: CancelToken,
}

impl Runner {
    pub fn new(cwd: PathBuf, cancel: CancelToken) -> Self {
        Self {
            vars: HashMap::new(),
            cwd,
            exited: None,
            last_status: 0,
            exec_handler: None,
            cancel,
        }
    }

    pub fn set_exec_handler(&mut self, handler: ExecHandler) {
        self.exec_handler = Some(handler);
    }

    pub fn set_current_dir(&mut self, cwd: PathBuf) {
        self.cwd = cwd;
    }

    pub fn set_cancel_token(&mut self, cancel: CancelToken) {
        self.cancel = cancel;
    }

    pub fn current_dir(&self) -> &Path {
        &self.cwd
    }

    /// Returns `Some(code)` once the `exit` builtin has run.
    pub fn exited(&self) -> Option<i32> {
        self.exited
    }

    /// Runs a single statement, writing its output to `io`. The exit status
    /// is returned as a value; `Err` is reserved for plumbing failures and
    /// cancellation.
    pub fn run(&mut self, stmt: &Stmt, io: &Io) -> Result<i32, ShellError> {
        self.check_cancel()?;
        let status = self.run_stmt(stmt, io)?;
        self.last_status = status;
        Ok(status)
    }

    fn check_cancel(&self) -> Result<(), ShellError> {
        if self.cancel.is_cancelled() {
            Err(ShellError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn run_stmt(&mut self, stmt: &Stmt, io: &Io) -> Result<i32, ShellError> {
        match &stmt.cmd {
            Cmd::AndOr { op, left, right } => {
                let status = self.run_stmt(left, io)?;
                self.last_status = status;
                if self.exited.is_some() {
                    return Ok(status);
                }
                let continue_list = match op {
                    AndOrOp::And => status == 0,
                    AndOrOp::Or => status != 0,
                };
                if continue_list {
                    self.run_stmt(right, io)
                } else {
                    Ok(status)
                }
            }
            Cmd::Pipeline(stages) => self.run_pipeline(stages, io),
            Cmd::Simple(simple) => {
                let spawned =
                    self.spawn_simple(simple, &stmt.redirs, StdinSource::Null, io, stmt.background)?;
                self.finish(spawned)
            }
        }
    }

    fn run_pipeline(&mut self, stages: &[Stmt], io: &Io) -> Result<i32, ShellError> {
        let mut running = Vec::with_capacity(stages.len());
        let mut next_stdin = StdinSource::Null;
        let last = stages.len() - 1;

        for (i, stage) in stages.iter().enumerate() {
            let Cmd::Simple(simple) = &stage.cmd else {
                return Err(ShellError::Unsupported("compound pipeline stage".into()));
            };
            let stdin = std::mem::replace(&mut next_stdin, StdinSource::Null);
            let spawned = if i < last {
                let (reader, writer) = os_pipe::pipe().map_err(ShellError::Io)?;
                next_stdin = StdinSource::Pipe(reader);
                let stage_io = Io {
                    stdout: OutputHandle::Pipe(writer),
                    stderr: io.stderr.try_clone().map_err(ShellError::Io)?,
                };
                self.spawn_simple(simple, &stage.redirs, stdin, &stage_io, false)?
            } else {
                self.spawn_simple(simple, &stage.redirs, stdin, io, false)?
            };
            running.push(spawned);
        }

        let mut status = 0;
        let mut iter = running.into_iter();
        while let Some(spawned) = iter.next() {
            match self.finish(spawned) {
                Ok(stage_status) => status = stage_status,
                Err(err) => {
                    for rest in iter {
                        if let Spawned::Child(mut child) = rest {
                            let _ = child.kill();
                            let _ = child.wait();
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(status)
    }

    fn spawn_simple(
        &mut self,
        simple: &SimpleCmd,
        redirs: &[Redirect],
        default_stdin: StdinSource,
        io: &Io,
        background: bool,
    ) -> Result<Spawned, ShellError> {
        let mut overlay = Vec::with_capacity(simple.assigns.len());
        for assign in &simple.assigns {
            let value = expand::expand_word(self, io, &assign.value)?;
            overlay.push((assign.name.clone(), value));
        }

        let fields = expand::expand_words(self, io, &simple.words)?;
        if fields.is_empty() {
            for (name, value) in overlay {
                self.set_var(&name, value);
            }
            return Ok(Spawned::Done(0));
        }

        let mut setup = match self.resolve_redirects(redirs, default_stdin, io)? {
            Ok(setup) => setup,
            Err(message) => {
                // Failed redirection: the command does not run (status 1).
                let mut stderr = OutSink::Handle(io.stderr.try_clone().map_err(ShellError::Io)?);
                let _ = writeln!(stderr, "{message}");
                return Ok(Spawned::Done(1));
            }
        };

        if let Some(status) = self.try_builtin(&fields, &mut setup)? {
            return Ok(Spawned::Done(status));
        }

        if let Some(handler) = self.exec_handler {
            let mut bytes_cursor: io::Cursor<&[u8]>;
            let stdin_reader: Option<&mut dyn Read> = match &mut setup.stdin {
                StdinSource::Null => None,
                StdinSource::File(file) => Some(file),
                StdinSource::Bytes(bytes) => {
                    bytes_cursor = io::Cursor::new(&bytes[..]);
                    Some(&mut bytes_cursor)
                }
                StdinSource::Pipe(reader) => Some(reader),
            };
            let mut cx = ExecContext {
                cwd: &self.cwd,
                stdin: stdin_reader,
                stdout: &mut setup.stdout,
                stderr: &mut setup.stderr,
            };
            if let Some(result) = handler(&mut cx, &fields) {
                return Ok(Spawned::Done(result.map_err(ShellError::Io)?));
            }
        }

        self.spawn_external(&fields, &overlay, setup, background)
    }

    fn resolve_redirects(
        &mut self,
        redirs: &[Redirect],
        default_stdin: StdinSource,
        io: &Io,
    ) -> Result<Result<RedirSetup, String>, ShellError> {
        let mut setup = RedirSetup {
            stdin: default_stdin,
            stdout: OutSink::Handle(io.stdout.try_clone().map_err(ShellError::Io)?),
            stderr: OutSink::Handle(io.stderr.try_clone().map_err(ShellError::Io)?),
        };

        for redir in redirs {
            match redir.op {
                RedirOp::In | RedirOp::HereDoc | RedirOp::HereString | RedirOp::DupIn => {
                    if !matches!(redir.fd, None | Some(0)) {
                        return Err(ShellError::Unsupported(format!(
                            "input redirection for fd {fd}",
                            fd = redir.fd.unwrap_or(0)
                        )));
                    }
                }
                RedirOp::Out | RedirOp::Append | RedirOp::DupOut => {
                    if !matches!(redir.fd, None | Some(1) | Some(2)) {
                        return Err(ShellError::Unsupported(format!(
                            "output redirection for fd {fd}",
                            fd = redir.fd.unwrap_or(1)
                        )));
                    }
                }
            }

            match (&redir.op, &redir.target) {
                (RedirOp::In, RedirTarget::Word(word)) => {
                    let path = expand::expand_word(self, io, word)?;
                    match File::open(self.resolve_path(&path)) {
                        Ok(file) => setup.stdin = StdinSource::File(file),
                        Err(err) => return Ok(Err(format!("{path}: {err}"))),
                    }
                }
                (RedirOp::Out | RedirOp::Append, RedirTarget::Word(word)) => {
                    let path = expand::expand_word(self, io, word)?;
                    let mut options = OpenOptions::new();
                    options.write(true).create(true);
                    if redir.op == RedirOp::Append {
                        options.append(true);
                    } else {
                        options.truncate(true);
                    }
                    let file = match options.open(self.resolve_path(&path)) {
                        Ok(file) => file,
                        Err(err) => return Ok(Err(format!("{path}: {err}"))),
                    };
                    match redir.fd {
                        Some(2) => setup.stderr = OutSink::File(file),
                        _ => setup.stdout = OutSink::File(file),
                    }
                }
                (RedirOp::DupOut, RedirTarget::Word(word)) => {
                    let target = expand::expand_word(self, io, word)?;
                    let sink = match target.as_str() {
                        "1" => setup.stdout.try_clone().map_err(ShellError::Io)?,
                        "2" => setup.stderr.try_clone().map_err(ShellError::Io)?,
                        "-" => OutSink::Handle(OutputHandle::Null),
                        _ => {
                            return Err(ShellError::Unsupported(format!(
                                "duplicating fd {target:?}"
                            )))
                        }
                    };
                    match redir.fd {
                        Some(2) => setup.stderr = sink,
                        _ => setup.stdout = sink,
                    }
                }
                (RedirOp::DupIn, RedirTarget::Word(word)) => {
                    let target = expand::expand_word(self, io, word)?;
                    match target.as_str() {
                        "0" => {}
                        "-" => setup.stdin = StdinSource::Null,
                        _ => {
                            return Err(ShellError::Unsupported(format!(
                                "duplicating fd {target:?}"
                            )))
                        }
                    }
                }
                (RedirOp::HereDoc, RedirTarget::HereDoc { body, .. }) => {
                    setup.stdin = StdinSource::Bytes(body.clone().into_bytes());
                }
                (RedirOp::HereString, RedirTarget::Word(word)) => {
                    let mut text = expand::expand_word(self, io, word)?;
                    text.push('\n');
                    setup.stdin = StdinSource::Bytes(text.into_bytes());
                }
                _ => return Err(ShellError::Unsupported("redirection form".into())),
            }
        }
        Ok(Ok(setup))
    }

    fn try_builtin(
        &mut self,
        fields: &[String],
        setup: &mut RedirSetup,
    ) -> Result<Option<i32>, ShellError> {
        let status = match fields[0].as_str() {
            "cd" => self.builtin_cd(&fields[1..], &mut setup.stderr),
            "exit" => self.builtin_exit(&fields[1..], &mut setup.stderr),
            "export" => self.builtin_export(&fields[1..]),
            "unset" => {
                for name in &fields[1..] {
                    self.vars.remove(name);
                }
                0
            }
            _ => return Ok(None),
        };
        Ok(Some(status))
    }

    fn builtin_cd(&mut self, args: &[String], stderr: &mut OutSink) -> i32 {
        let target = match args.first() {
            Some(arg) => arg.clone(),
            None => match self.lookup_var("HOME") {
                Some(home) => home,
                None => {
                    let _ = writeln!(stderr, "cd: HOME not set");
                    return 1;
                }
            },
        };
        let path = self.resolve_path(&target);
        match path.canonicalize() {
            Ok(canonical) if canonical.is_dir() => {
                self.set_exported_var("PWD", canonical.display().to_string());
                self.cwd = canonical;
                0
            }
            _ => {
                let _ = writeln!(stderr, "cd: {target}: No such file or directory");
                1
            }
        }
    }

    fn builtin_exit(&mut self, args: &[String], stderr: &mut OutSink) -> i32 {
        let code = match args.first() {
            None => self.last_status,
            Some(arg) => match arg.parse() {
                Ok(code) => code,
                Err(_) => {
                    let _ = writeln!(stderr, "exit: {arg}: numeric argument required");
                    2
                }
            },
        };
        self.exited = Some(code);
        code
    }

    fn builtin_export(&mut self, args: &[String]) -> i32 {
        for arg in args {
            if let Some((name, value)) = arg.split_once('=') {
                self.set_exported_var(name, value.to_owned());
            } else if let Some(var) = self.vars.get_mut(arg) {
                var.exported = true;
            } else {
                self.set_exported_var(arg, String::new());
            }
        }
        0
    }

    fn spawn_external(
        &mut self,
        fields: &[String],
        overlay: &[(String, String)],
        setup: RedirSetup,
        background: bool,
    ) -> Result<Spawned, ShellError> {
        let mut setup = setup;
        let mut command = Command::new(&fields[0]);
        command.args(&fields[1..]).current_dir(&self.cwd);
        for (name, var) in &self.vars {
            if var.exported {
                command.env(name, &var.value);
            }
        }
        for (name, value) in overlay {
            command.env(name, value);
        }

        if background {
            // Detached stdio: capture pipes must reach EOF once the
            // foreground statement completes.
            command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            command.stdin(setup.stdin.into_stdio().map_err(ShellError::Io)?);
            command.stdout(setup.stdout.to_stdio().map_err(ShellError::Io)?);
            command.stderr(setup.stderr.to_stdio().map_err(ShellError::Io)?);
        }

        match command.spawn() {
            Ok(child) if background => {
                thread::spawn(move || {
                    let mut child = child;
                    let _ = child.wait();
                });
                Ok(Spawned::Done(0))
            }
            Ok(child) => Ok(Spawned::Child(child)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let _ = writeln!(setup.stderr, "{name}: command not found", name = fields[0]);
                Ok(Spawned::Done(127))
            }
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                let _ = writeln!(setup.stderr, "{name}: permission denied", name = fields[0]);
                Ok(Spawned::Done(126))
            }
            Err(err) => Err(ShellError::Io(err)),
        }
    }

    fn finish(&mut self, spawned: Spawned) -> Result<i32, ShellError> {
        match spawned {
            Spawned::Done(status) => {
                self.last_status = status;
                Ok(status)
            }
            Spawned::Child(mut child) => loop {
                if let Some(status) = child.try_wait().map_err(ShellError::Io)? {
                    let status = exit_code(status);
                    self.last_status = status;
                    return Ok(status);
                }
                if self.cancel.is_cancelled() {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ShellError::Cancelled);
                }
                thread::sleep(Duration::from_millis(5));
            },
        }
    }

    /// Runs `stmts` with stdout captured, for command substitution. Trailing
    /// newlines are stripped from the result.
    pub(crate) fn run_capture(&mut self, stmts: &[Stmt], io: &Io) -> Result<String, ShellError> {
        let (mut reader, writer) = os_pipe::pipe().map_err(ShellError::Io)?;
        let inner_io = Io {
            stdout: OutputHandle::Pipe(writer),
            stderr: io.stderr.try_clone().map_err(ShellError::Io)?,
        };
        let collector = thread::spawn(move || {
            let mut buf = vec![];
            reader.read_to_end(&mut buf).map(|_| buf)
        });

        let mut run_result = Ok(());
        for stmt in stmts {
            match self.run_stmt(stmt, &inner_io) {
                Ok(status) => self.last_status = status,
                Err(err) => {
                    run_result = Err(err);
                    break;
                }
            }
            if self.exited.is_some() {
                break;
            }
        }
        drop(inner_io);

        let bytes = match collector.join() {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(err)) => return Err(ShellError::Io(err)),
            Err(_) => {
                return Err(ShellError::Io(io::Error::other("capture thread panicked")));
            }
        };
        run_result?;

        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        while text.ends_with('\n') {
            text.pop();
        }
        Ok(text)
    }

    /// Looks up a variable, always probing the live process environment so
    /// that outer build caches observe the access.
    pub(crate) fn lookup_var(&self, name: &str) -> Option<String> {
        match name {
            "?" => return Some(self.last_status.to_string()),
            "$" => return Some(process::id().to_string()),
            _ => {}
        }
        let env_value = env::var(name).ok();
        if let Some(var) = self.vars.get(name) {
            return Some(var.value.clone());
        }
        env_value
    }

    fn set_var(&mut self, name: &str, value: String) {
        let exported = self.vars.get(name).is_some_and(|var| var.exported);
        self.vars
            .insert(name.to_owned(), Var { value, exported });
    }

    fn set_exported_var(&mut self, name: &str, value: String) {
        self.vars.insert(
            name.to_owned(),
            Var {
                value,
                exported: true,
            },
        );
    }

    pub(crate) fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.cwd.join(path)
        }
    }
}

fn exit_code(status: process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::shell::parse_single;

    /// Runs a command, returning `(stdout, stderr, status)`.
    fn run(runner: &mut Runner, command: &str) -> (String, String, i32) {
        let stmt = parse_single(command).unwrap();
        let (mut out_reader, out_writer) = os_pipe::pipe().unwrap();
        let (mut err_reader, err_writer) = os_pipe::pipe().unwrap();
        let io = Io {
            stdout: OutputHandle::Pipe(out_writer),
            stderr: OutputHandle::Pipe(err_writer),
        };
        let out_thread = thread::spawn(move || {
            let mut buf = String::new();
            out_reader.read_to_string(&mut buf).unwrap();
            buf
        });
        let err_thread = thread::spawn(move || {
            let mut buf = String::new();
            err_reader.read_to_string(&mut buf).unwrap();
            buf
        });
        let status = runner.run(&stmt, &io).unwrap();
        drop(io);
        (out_thread.join().unwrap(), err_thread.join().unwrap(), status)
    }

    fn test_runner() -> Runner {
        Runner::new(env::current_dir().unwrap(), CancelToken::new())
    }

    #[test]
    fn running_external_commands() {
        let mut runner = test_runner();
        let (out, err, status) = run(&mut runner, "echo hello");
        assert_eq!(out, "hello\n");
        assert_eq!(err, "");
        assert_eq!(status, 0);
    }

    #[test]
    fn routing_stderr() {
        let mut runner = test_runner();
        let (out, err, status) = run(&mut runner, "echo foo && echo bar >&2");
        assert_eq!(out, "foo\n");
        assert_eq!(err, "bar\n");
        assert_eq!(status, 0);
    }

    #[test]
    fn merging_stderr_into_stdout() {
        let mut runner = test_runner();
        let (out, err, _) = run(&mut runner, "sh -c 'echo oops >&2' 2>&1");
        assert_eq!(out, "oops\n");
        assert_eq!(err, "");
    }

    #[test]
    fn pipelines_and_exit_status() {
        let mut runner = test_runner();
        let (out, _, status) = run(&mut runner, "printf 'a\\nb\\n' | wc -l");
        assert_eq!(out.trim(), "2");
        assert_eq!(status, 0);

        let (_, _, status) = run(&mut runner, "false || echo fallback");
        assert_eq!(status, 0);
        let (_, _, status) = run(&mut runner, "false && echo skipped");
        assert_eq!(status, 1);
    }

    #[test]
    fn variables_and_expansion() {
        let mut runner = test_runner();
        let (_, _, status) = run(&mut runner, "GREETING=hi");
        assert_eq!(status, 0);
        let (out, _, _) = run(&mut runner, "echo $GREETING world");
        assert_eq!(out, "hi world\n");
        let (out, _, _) = run(&mut runner, "echo \"status: $?\"");
        assert_eq!(out, "status: 0\n");
    }

    #[test]
    fn command_substitution() {
        let mut runner = test_runner();
        let (out, _, _) = run(&mut runner, "echo $(echo nested)");
        assert_eq!(out, "nested\n");
    }

    #[test]
    fn prefix_assignments_reach_children_only() {
        let mut runner = test_runner();
        let (out, _, _) = run(&mut runner, "MARKER=42 sh -c 'echo $MARKER'");
        assert_eq!(out, "42\n");
        let (out, _, _) = run(&mut runner, "sh -c 'echo \"[$MARKER]\"'");
        assert_eq!(out, "[]\n");
    }

    #[test]
    fn command_not_found_reports_127() {
        let mut runner = test_runner();
        let (out, err, status) = run(&mut runner, "definitely-not-a-command-xyz");
        assert_eq!(out, "");
        assert_eq!(err, "definitely-not-a-command-xyz: command not found\n");
        assert_eq!(status, 127);
    }

    #[test]
    fn cd_and_exit_builtins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut runner = Runner::new(dir.path().to_owned(), CancelToken::new());

        let (_, _, status) = run(&mut runner, "cd sub");
        assert_eq!(status, 0);
        assert_eq!(
            runner.current_dir().canonicalize().unwrap(),
            dir.path().join("sub").canonicalize().unwrap()
        );

        let (_, err, status) = run(&mut runner, "cd missing");
        assert_eq!(status, 1);
        assert!(err.contains("No such file or directory"), "{err}");

        assert!(runner.exited().is_none());
        let (_, _, status) = run(&mut runner, "exit 3");
        assert_eq!(status, 3);
        assert_eq!(runner.exited(), Some(3));
    }

    #[test]
    fn children_run_in_the_shells_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/data.txt"), "inner\n").unwrap();
        let mut runner = Runner::new(dir.path().to_owned(), CancelToken::new());

        run(&mut runner, "cd sub");
        let (out, _, status) = run(&mut runner, "cat data.txt");
        assert_eq!(out, "inner\n");
        assert_eq!(status, 0);
    }

    #[test]
    fn input_redirection_and_here_strings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in.txt"), "from file\n").unwrap();
        let mut runner = Runner::new(dir.path().to_owned(), CancelToken::new());

        let (out, _, _) = run(&mut runner, "cat < in.txt");
        assert_eq!(out, "from file\n");

        let (out, _, _) = run(&mut runner, "cat <<< inline");
        assert_eq!(out, "inline\n");
    }

    #[test]
    fn output_redirection_writes_into_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = Runner::new(dir.path().to_owned(), CancelToken::new());

        let (out, _, status) = run(&mut runner, "echo hi > out.txt");
        assert_eq!(out, "");
        assert_eq!(status, 0);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "hi\n"
        );
    }

    #[test]
    fn cancellation_kills_hanging_children() {
        let cancel = CancelToken::new();
        let mut runner = Runner::new(env::current_dir().unwrap(), cancel.clone());
        let stmt = parse_single("sleep 30").unwrap();
        let io = Io {
            stdout: OutputHandle::Null,
            stderr: OutputHandle::Null,
        };

        let killer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        });
        let err = runner.run(&stmt, &io).unwrap_err();
        assert!(matches!(err, ShellError::Cancelled), "{err:?}");
        killer.join().unwrap();
    }

    #[test]
    fn glob_expansion_is_cwd_relative() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("c.log"), "").unwrap();
        let mut runner = Runner::new(dir.path().to_owned(), CancelToken::new());

        let (out, _, _) = run(&mut runner, "echo *.txt");
        assert_eq!(out, "a.txt b.txt\n");

        // No match leaves the pattern as-is.
        let (out, _, _) = run(&mut runner, "echo *.rs");
        assert_eq!(out, "*.rs\n");
    }

    #[test]
    fn resolving_paths() {
        let runner = Runner::new(PathBuf::from("/base"), CancelToken::new());
        assert_eq!(runner.resolve_path("rel"), PathBuf::from("/base/rel"));
        assert_eq!(runner.resolve_path("/abs"), PathBuf::from("/abs"));
    }
}
