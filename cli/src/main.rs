//! CLI for the `cmdt` crate.

use anyhow::Context;
use clap::{Parser, Subcommand};
use is_terminal::IsTerminal;
use termcolor::{ColorChoice, StandardStream};
use tracing_subscriber::EnvFilter;

use std::{
    fs::File,
    io::{self, BufReader, Read, Write},
    path::{Path, PathBuf},
    process, thread,
    time::Duration,
};

use cmdt::{CancelToken, CheckFailure, Checker, CommandCheckError, Error, Formatter, Updater};

mod shell;

/// Records, checks and updates shell command transcripts.
#[derive(Debug, Parser)]
#[command(name = "cmdt")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Checks transcript files.
    Check {
        /// Paths of transcript files to check.
        #[arg(value_name = "TRANSCRIPT", required = true)]
        transcripts: Vec<PathBuf>,
        /// Cancels the run after the given duration (e.g. `30s`).
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },

    /// Updates output and exit code expectations in transcript files.
    ///
    /// Transcript files are updated in-place, unless `--dry-run` is
    /// specified. In a dry run, the updated output is printed to stdout
    /// instead.
    Update {
        /// Paths of transcript files to update.
        #[arg(value_name = "TRANSCRIPT", required = true)]
        transcripts: Vec<PathBuf>,
        /// Prints updated transcripts to stdout instead of rewriting files.
        #[arg(long, short = 'n')]
        dry_run: bool,
        /// Cancels the run after the given duration (e.g. `30s`).
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },

    /// Formats transcript files.
    ///
    /// Normalizes comments, blank lines, trailing whitespace (except in
    /// command output) and directive syntax. Reads stdin and writes stdout
    /// if no files are provided.
    Format {
        /// Paths of transcript files to format in place.
        #[arg(value_name = "TRANSCRIPT")]
        transcripts: Vec<PathBuf>,
        /// Prints formatted transcripts to stdout instead of rewriting files.
        #[arg(long, short = 'n')]
        dry_run: bool,
    },

    /// Runs an interactive subshell and records a transcript of the session.
    Shell {
        /// Output file path; a temp file is written if omitted.
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Prints the version of cmdt.
    Version {
        /// Also prints the binary name.
        #[arg(long, short = 'v')]
        verbose: bool,
    },
}

impl Command {
    fn run(self) -> anyhow::Result<()> {
        match self {
            Self::Check {
                transcripts,
                timeout,
            } => {
                let cancel = CancelToken::new();
                arm_timeout(&cancel, timeout);

                let mut failed = false;
                for path in &transcripts {
                    if let Err(err) = check_file(path, &cancel) {
                        if let Some(check_err) = as_check_error(&err) {
                            report_check_failure(path, check_err)?;
                        } else {
                            eprintln!("error checking {path}: {err}", path = path.display());
                        }
                        failed = true;
                    }
                }
                if failed {
                    eprintln!("there were transcript failures");
                    process::exit(1);
                }
            }

            Self::Update {
                transcripts,
                dry_run,
                timeout,
            } => {
                let cancel = CancelToken::new();
                arm_timeout(&cancel, timeout);

                for path in &transcripts {
                    update_file(path, dry_run, &cancel)
                        .with_context(|| format!("updating {}", path.display()))?;
                }
            }

            Self::Format {
                transcripts,
                dry_run,
            } => {
                if transcripts.is_empty() {
                    format_stdin()?;
                } else {
                    for path in &transcripts {
                        format_file(path, dry_run)
                            .with_context(|| format!("formatting {}", path.display()))?;
                    }
                }
            }

            Self::Shell { output } => shell::run(output)?,

            Self::Version { verbose } => {
                if verbose {
                    println!("cmdt {}", env!("CARGO_PKG_VERSION"));
                } else {
                    println!("{}", env!("CARGO_PKG_VERSION"));
                }
            }
        }
        Ok(())
    }
}

fn check_file(path: &Path, cancel: &CancelToken) -> Result<(), Error> {
    let file = File::open(path).map_err(Error::Io)?;
    Checker::new()
        .with_cancel_token(cancel.clone())
        .check_transcript(BufReader::new(file))
}

fn as_check_error(err: &Error) -> Option<&CommandCheckError> {
    match err {
        Error::Check(check_err) => Some(check_err),
        _ => None,
    }
}

fn report_check_failure(path: &Path, err: &CommandCheckError) -> io::Result<()> {
    println!(
        "{path}: command on line {lineno} failed check",
        path = path.display(),
        lineno = err.lineno()
    );
    println!("$ {}", err.command());
    for failure in err.failures() {
        println!("{failure}");
        if let CheckFailure::Diff(diff) = failure {
            if io::stdout().is_terminal() {
                let stream = StandardStream::stdout(ColorChoice::Auto);
                diff.write_colorized(&mut stream.lock())?;
            } else {
                println!("{}", diff.plain());
            }
        }
    }
    Ok(())
}

fn update_file(path: &Path, dry_run: bool, cancel: &CancelToken) -> anyhow::Result<()> {
    let file = File::open(path)?;
    let updated = Updater::new()
        .with_cancel_token(cancel.clone())
        .update_transcript(BufReader::new(file))?;
    if dry_run {
        io::stdout().write_all(&updated)?;
    } else {
        atomic_write(path, &updated)?;
    }
    Ok(())
}

fn format_stdin() -> anyhow::Result<()> {
    let mut input = vec![];
    io::stdin().read_to_end(&mut input)?;
    let formatted = Formatter::new().format_transcript(input.as_slice())?;
    io::stdout().write_all(&formatted)?;
    Ok(())
}

fn format_file(path: &Path, dry_run: bool) -> anyhow::Result<()> {
    let file = File::open(path)?;
    let formatted = Formatter::new().format_transcript(BufReader::new(file))?;
    if dry_run {
        io::stdout().write_all(&formatted)?;
    } else {
        atomic_write(path, &formatted)?;
    }
    Ok(())
}

/// Writes via a sibling temp file renamed over the original, so that an
/// interrupted run never leaves a truncated transcript behind.
fn atomic_write(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.persist(path)?;
    Ok(())
}

fn arm_timeout(cancel: &CancelToken, timeout: Option<Duration>) {
    if let Some(timeout) = timeout {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(timeout);
            cancel.cancel();
        });
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();
    Cli::parse().command.run()
}
