#![cfg(unix)]

use std::{
    fs,
    io::Write,
    path::Path,
    process::{Command, Stdio},
};

use pretty_assertions::assert_eq;

fn cmdt() -> Command {
    Command::new(env!("CARGO_BIN_EXE_cmdt"))
}

fn write_transcript(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn checking_a_passing_transcript() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_transcript(dir.path(), "pass.cmdt", "$ echo hi\n1 hi\n");

    let output = cmdt().arg("check").arg(&path).output().unwrap();
    assert!(output.status.success(), "{output:?}");
}

#[test]
fn checking_a_failing_transcript() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_transcript(dir.path(), "fail.cmdt", "$ echo bye\n1 hi\n");

    let output = cmdt().arg("check").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(1));

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("command on line 1 failed check"), "{stdout}");
    assert!(stdout.contains("$ echo bye"), "{stdout}");
    assert!(stdout.contains("output differs"), "{stdout}");
    // Non-tty stdout gets a plain unified diff.
    assert!(stdout.contains("-1 hi"), "{stdout}");
    assert!(stdout.contains("+1 bye"), "{stdout}");
}

#[test]
fn checking_continues_across_files() {
    let dir = tempfile::tempdir().unwrap();
    let bad = write_transcript(dir.path(), "bad.cmdt", "$ false\n");
    let good = write_transcript(dir.path(), "good.cmdt", "$ echo ok\n1 ok\n");

    let output = cmdt().arg("check").arg(&bad).arg(&good).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("there were transcript failures"), "{stderr}");
}

#[test]
fn updating_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_transcript(dir.path(), "stale.cmdt", "$ echo hi\n1 stale\n? 3\n");

    let output = cmdt().arg("update").arg(&path).output().unwrap();
    assert!(output.status.success(), "{output:?}");
    assert_eq!(fs::read_to_string(&path).unwrap(), "$ echo hi\n1 hi\n");
}

#[test]
fn updating_with_dry_run_leaves_the_file_alone() {
    let dir = tempfile::tempdir().unwrap();
    let contents = "$ echo hi\n1 stale\n";
    let path = write_transcript(dir.path(), "stale.cmdt", contents);

    let output = cmdt()
        .arg("update")
        .arg("--dry-run")
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    assert_eq!(String::from_utf8(output.stdout).unwrap(), "$ echo hi\n1 hi\n");
    assert_eq!(fs::read_to_string(&path).unwrap(), contents);
}

#[test]
fn formatting_stdin_to_stdout() {
    let mut child = cmdt()
        .arg("format")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"#hello\n$   echo hi\n1 hi\n\n\n")
        .unwrap();

    let output = child.wait_with_output().unwrap();
    assert!(output.status.success(), "{output:?}");
    assert_eq!(
        String::from_utf8(output.stdout).unwrap(),
        "# hello\n$ echo hi\n1 hi\n"
    );
}

#[test]
fn formatting_files_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_transcript(dir.path(), "messy.cmdt", "#x\n$  echo hi\n1 hi\n");

    let output = cmdt().arg("format").arg(&path).output().unwrap();
    assert!(output.status.success(), "{output:?}");
    assert_eq!(fs::read_to_string(&path).unwrap(), "# x\n$ echo hi\n1 hi\n");
}

#[test]
fn syntax_errors_are_reported_with_positions() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_transcript(dir.path(), "bad.cmdt", "1 stray\n");

    let output = cmdt().arg("check").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(
        stderr.contains("syntax error on line 1: unexpected output check"),
        "{stderr}"
    );
}

#[test]
fn printing_the_version() {
    let output = cmdt().arg("version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout.trim(), env!("CARGO_PKG_VERSION"));
}
