//! Word expansion: parameters, substitutions, field splitting and globbing.

use std::path::Path;

use super::{
    ast::{Word, WordPart},
    exec::{Io, Runner},
    ShellError,
};

/// One expanded piece of a word. Quoted pieces are exempt from field
/// splitting and glob interpretation.
#[derive(Debug, Clone)]
struct Segment {
    text: String,
    quoted: bool,
}

/// Expands words into command fields: expansion, field splitting, globbing.
pub(crate) fn expand_words(
    runner: &mut Runner,
    io: &Io,
    words: &[Word],
) -> Result<Vec<String>, ShellError> {
    let mut fields = vec![];
    for word in words {
        let mut segments = vec![];
        expand_parts(runner, io, &word.parts, false, &mut segments)?;
        for field in split_fields(&segments) {
            fields.extend(glob_field(runner, &field));
        }
    }
    Ok(fields)
}

/// Expands a word to a single string without field splitting or globbing
/// (redirection targets and assignment values).
pub(crate) fn expand_word(runner: &mut Runner, io: &Io, word: &Word) -> Result<String, ShellError> {
    let mut segments = vec![];
    expand_parts(runner, io, &word.parts, false, &mut segments)?;
    Ok(segments.into_iter().map(|segment| segment.text).collect())
}

fn expand_parts(
    runner: &mut Runner,
    io: &Io,
    parts: &[WordPart],
    in_quotes: bool,
    out: &mut Vec<Segment>,
) -> Result<(), ShellError> {
    for part in parts {
        match part {
            WordPart::Literal(text) => out.push(Segment {
                text: text.clone(),
                quoted: in_quotes,
            }),
            WordPart::Escaped(ch) => out.push(Segment {
                text: ch.to_string(),
                quoted: true,
            }),
            WordPart::SingleQuoted(text) => out.push(Segment {
                text: text.clone(),
                quoted: true,
            }),
            WordPart::DoubleQuoted(inner) => expand_parts(runner, io, inner, true, out)?,
            WordPart::Param(name) => out.push(Segment {
                text: runner.lookup_var(name).unwrap_or_default(),
                quoted: in_quotes,
            }),
            WordPart::CmdSubst(stmts) => out.push(Segment {
                text: runner.run_capture(stmts, io)?,
                quoted: in_quotes,
            }),
            WordPart::ProcSubst(_) => {
                return Err(ShellError::Unsupported("process substitution".into()));
            }
        }
    }
    Ok(())
}

/// Splits segments into fields on unquoted whitespace.
fn split_fields(segments: &[Segment]) -> Vec<Vec<Segment>> {
    let mut fields = vec![];
    let mut current: Vec<Segment> = vec![];
    let mut started = false;

    for segment in segments {
        if segment.quoted {
            current.push(segment.clone());
            started = true;
            continue;
        }
        let mut run = String::new();
        for ch in segment.text.chars() {
            if ch.is_whitespace() {
                if !run.is_empty() {
                    current.push(Segment {
                        text: std::mem::take(&mut run),
                        quoted: false,
                    });
                }
                if started {
                    fields.push(std::mem::take(&mut current));
                    started = false;
                }
            } else {
                run.push(ch);
                started = true;
            }
        }
        if !run.is_empty() {
            current.push(Segment {
                text: run,
                quoted: false,
            });
        }
    }
    if started {
        fields.push(current);
    }
    fields
}

/// Applies pathname expansion to a field. Quoted pieces are escaped in the
/// pattern; a field without unquoted glob metacharacters, or one that matches
/// nothing, expands to its literal text.
fn glob_field(runner: &Runner, field: &[Segment]) -> Vec<String> {
    let literal: String = field.iter().map(|segment| segment.text.as_str()).collect();

    let mut pattern = String::new();
    let mut has_glob = false;
    for segment in field {
        if segment.quoted {
            pattern.push_str(&glob::Pattern::escape(&segment.text));
        } else {
            if segment.text.contains(['*', '?', '[']) {
                has_glob = true;
            }
            pattern.push_str(&segment.text);
        }
    }
    if !has_glob {
        return vec![literal];
    }

    let relative = !Path::new(&literal).is_absolute();
    let full_pattern = if relative {
        runner.current_dir().join(&pattern).display().to_string()
    } else {
        pattern
    };

    let Ok(paths) = glob::glob(&full_pattern) else {
        return vec![literal];
    };
    let mut matches = vec![];
    for path in paths.flatten() {
        let path = if relative {
            path.strip_prefix(runner.current_dir())
                .map_or_else(|_| path.clone(), Path::to_owned)
        } else {
            path
        };
        matches.push(path.display().to_string());
    }
    if matches.is_empty() {
        vec![literal]
    } else {
        matches
    }
}
