//! Interactive recording sessions.

use anyhow::Context;

use std::{
    fs,
    io::{self, BufRead, Write},
    path::PathBuf,
};

use cmdt::Recorder;

/// Runs an interactive subshell and writes a transcript of the session.
///
/// The line editor is intentionally minimal: lines are read from stdin as-is,
/// with command output passed through to the terminal.
pub(crate) fn run(output: Option<PathBuf>) -> anyhow::Result<()> {
    let mut rec = Recorder::new()
        .context("initializing recorder")?
        .with_stdout(Box::new(io::stdout()))
        .with_stderr(Box::new(io::stderr()));

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("$ ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else { break };
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match rec.run_command(&line) {
            Ok(result) => {
                if result.exit_code() != 0 {
                    eprintln!("? {}", result.exit_code());
                }
            }
            // Keep the session alive on malformed input.
            Err(err) => eprintln!("error: {err}"),
        }
        if rec.exited() {
            break;
        }
    }

    let transcript = rec.into_transcript();
    match output {
        Some(path) => {
            fs::write(&path, transcript)
                .with_context(|| format!("writing output to {}", path.display()))?;
        }
        None => {
            let file = tempfile::Builder::new()
                .prefix("cmdt-")
                .suffix(".cmdt")
                .tempfile()
                .context("creating output")?;
            let (mut file, path) = file.keep().context("keeping output")?;
            file.write_all(&transcript)?;
            println!("wrote transcript: {}", path.display());
        }
    }
    Ok(())
}
