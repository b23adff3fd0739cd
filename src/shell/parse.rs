//! Recursive-descent parser for shell statements.

use super::{
    ast::{
        Assign, Cmd, AndOrOp, Redirect, RedirOp, RedirTarget, SimpleCmd, Stmt, Word, WordPart,
    },
    ShellError,
};

/// Reserved words that start compound commands. The embedded shell only
/// executes simple commands, pipelines and and-or lists.
const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "if", "then", "else", "elif", "fi", "for", "while", "until", "do", "done", "case", "esac",
    "function", "{", "}", "[[", "]]", "time", "!",
];

/// Parses a script: statements separated by `;`, `&` or newlines.
pub(crate) fn parse_script(input: &str) -> Result<Vec<Stmt>, ShellError> {
    Parser::new(input).parse_script()
}

/// Parses exactly one statement, as required by the recorder.
pub(crate) fn parse_single(input: &str) -> Result<Stmt, ShellError> {
    let mut stmts = parse_script(input)?;
    if stmts.len() == 1 {
        Ok(stmts.remove(0))
    } else {
        Err(ShellError::NotOneStatement(stmts.len()))
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_blanks(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.pos += 1;
        }
    }

    /// Skips whitespace (including newlines) and whole-line comments between
    /// statements.
    fn skip_separators(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\n' | '\r') => {
                    self.pos += 1;
                }
                Some('#') => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> ShellError {
        ShellError::Parse(message.into())
    }

    fn parse_script(&mut self) -> Result<Vec<Stmt>, ShellError> {
        let mut stmts = vec![];
        loop {
            self.skip_separators();
            if self.peek().is_none() {
                break;
            }
            let mut stmt = self.parse_and_or()?;
            self.skip_blanks();
            match self.peek() {
                Some('&') if self.peek_at(1) != Some('&') => {
                    self.pos += 1;
                    stmt.background = true;
                }
                Some(';' | '\n') => {
                    self.pos += 1;
                }
                None => {}
                Some(ch) => return Err(self.error(format!("unexpected token {ch:?}"))),
            }
            stmts.push(stmt);
        }
        Ok(stmts)
    }

    fn parse_and_or(&mut self) -> Result<Stmt, ShellError> {
        let mut left = self.parse_pipeline()?;
        loop {
            self.skip_blanks();
            let op = match (self.peek(), self.peek_at(1)) {
                (Some('&'), Some('&')) => AndOrOp::And,
                (Some('|'), Some('|')) => AndOrOp::Or,
                _ => break,
            };
            self.pos += 2;
            self.skip_separators();
            let right = self.parse_pipeline()?;
            left = Stmt {
                cmd: Cmd::AndOr {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                redirs: vec![],
                background: false,
            };
        }
        Ok(left)
    }

    fn parse_pipeline(&mut self) -> Result<Stmt, ShellError> {
        let mut stages = vec![self.parse_simple()?];
        loop {
            self.skip_blanks();
            if self.peek() == Some('|') && self.peek_at(1) != Some('|') {
                self.pos += 1;
                self.skip_separators();
                stages.push(self.parse_simple()?);
            } else {
                break;
            }
        }
        if stages.len() == 1 {
            Ok(stages.remove(0))
        } else {
            Ok(Stmt {
                cmd: Cmd::Pipeline(stages),
                redirs: vec![],
                background: false,
            })
        }
    }

    fn parse_simple(&mut self) -> Result<Stmt, ShellError> {
        let mut simple = SimpleCmd::default();
        let mut redirs = vec![];
        let mut seen_word = false;

        loop {
            self.skip_blanks();
            let Some(ch) = self.peek() else { break };
            match ch {
                '\n' | ';' | '&' | '|' | ')' => break,
                '(' => return Err(ShellError::Unsupported("subshells".into())),
                '#' => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.pos += 1;
                    }
                }
                '<' | '>' if self.peek_at(1) == Some('(') => {
                    let word = self.parse_proc_subst()?;
                    simple.words.push(word);
                    seen_word = true;
                }
                '<' | '>' => redirs.push(self.parse_redirect(None)?),
                '0'..='9' => {
                    // Either an fd-prefixed redirection (`2>`) or a word that
                    // merely starts with digits.
                    let start = self.pos;
                    let mut fd = String::new();
                    while let Some(digit @ '0'..='9') = self.peek() {
                        fd.push(digit);
                        self.pos += 1;
                    }
                    if matches!(self.peek(), Some('<' | '>')) && self.peek_at(1) != Some('(') {
                        let fd = fd
                            .parse()
                            .map_err(|_| self.error("invalid file descriptor"))?;
                        redirs.push(self.parse_redirect(Some(fd))?);
                    } else {
                        self.pos = start;
                        let word = self.parse_word()?;
                        simple.words.push(word);
                        seen_word = true;
                    }
                }
                _ => {
                    let word = self.parse_word()?;
                    if word.parts.is_empty() {
                        return Err(self.error(format!("unexpected token {ch:?}")));
                    }
                    if !seen_word {
                        if let Some(assign) = split_assignment(&word) {
                            simple.assigns.push(assign);
                            continue;
                        }
                    }
                    if simple.words.is_empty() {
                        if let Some(keyword) = word
                            .literal()
                            .filter(|lit| UNSUPPORTED_KEYWORDS.contains(lit))
                        {
                            return Err(ShellError::Unsupported(format!(
                                "shell keyword {keyword:?}"
                            )));
                        }
                    }
                    simple.words.push(word);
                    seen_word = true;
                }
            }
        }

        if simple.words.is_empty() && simple.assigns.is_empty() && redirs.is_empty() {
            return Err(self.error("expected a command"));
        }
        Ok(Stmt {
            cmd: Cmd::Simple(simple),
            redirs,
            background: false,
        })
    }

    fn parse_redirect(&mut self, fd: Option<u32>) -> Result<Redirect, ShellError> {
        let op = match self.bump() {
            Some('>') => {
                if self.eat('>') {
                    RedirOp::Append
                } else if self.eat('&') {
                    RedirOp::DupOut
                } else {
                    self.eat('|');
                    RedirOp::Out
                }
            }
            Some('<') => {
                if self.eat('<') {
                    if self.eat('<') {
                        RedirOp::HereString
                    } else {
                        RedirOp::HereDoc
                    }
                } else if self.eat('&') {
                    RedirOp::DupIn
                } else {
                    RedirOp::In
                }
            }
            _ => return Err(self.error("expected a redirection operator")),
        };
        self.skip_blanks();

        if op == RedirOp::HereDoc {
            let (delim, quoted) = self.parse_heredoc_delimiter()?;
            let body = self.consume_heredoc_body(&delim)?;
            return Ok(Redirect {
                fd,
                op,
                target: RedirTarget::HereDoc { body, quoted },
            });
        }

        let word = self.parse_word()?;
        if word.parts.is_empty() {
            return Err(self.error("expected a redirection target"));
        }
        Ok(Redirect {
            fd,
            op,
            target: RedirTarget::Word(word),
        })
    }

    fn parse_heredoc_delimiter(&mut self) -> Result<(String, bool), ShellError> {
        let word = self.parse_word()?;
        let mut delim = String::new();
        let mut quoted = false;
        for part in &word.parts {
            match part {
                WordPart::Literal(text) => delim.push_str(text),
                WordPart::Escaped(ch) => {
                    quoted = true;
                    delim.push(*ch);
                }
                WordPart::SingleQuoted(text) => {
                    quoted = true;
                    delim.push_str(text);
                }
                WordPart::DoubleQuoted(parts) => {
                    quoted = true;
                    for inner in parts {
                        if let WordPart::Literal(text) = inner {
                            delim.push_str(text);
                        } else {
                            return Err(self.error("unsupported here-document delimiter"));
                        }
                    }
                }
                _ => return Err(self.error("unsupported here-document delimiter")),
            }
        }
        if delim.is_empty() {
            return Err(self.error("expected a here-document delimiter"));
        }
        Ok((delim, quoted))
    }

    /// Consumes the here-document body: the lines following the current one,
    /// up to a line equal to `delim`. The consumed region is removed from the
    /// input so that statement parsing resumes on the current line.
    fn consume_heredoc_body(&mut self, delim: &str) -> Result<String, ShellError> {
        let line_end = self.chars[self.pos..]
            .iter()
            .position(|&ch| ch == '\n')
            .map(|idx| self.pos + idx)
            .ok_or_else(|| self.error("unterminated here-document"))?;

        let mut body = String::new();
        let mut line_start = line_end + 1;
        loop {
            if line_start >= self.chars.len() {
                return Err(self.error("unterminated here-document"));
            }
            let rel_end = self.chars[line_start..]
                .iter()
                .position(|&ch| ch == '\n')
                .map_or(self.chars.len(), |idx| line_start + idx);
            let line: String = self.chars[line_start..rel_end].iter().collect();
            let next_start = (rel_end + 1).min(self.chars.len());
            if line == delim {
                self.chars.drain(line_end + 1..next_start);
                return Ok(body);
            }
            body.push_str(&line);
            body.push('\n');
            line_start = next_start;
        }
    }

    fn parse_proc_subst(&mut self) -> Result<Word, ShellError> {
        self.pos += 2; // consume `<(` or `>(`
        let content = self.scan_balanced_parens()?;
        let stmts = parse_script(&content)?;
        Ok(Word {
            parts: vec![WordPart::ProcSubst(stmts)],
        })
    }

    fn parse_word(&mut self) -> Result<Word, ShellError> {
        let mut parts = vec![];
        loop {
            let Some(ch) = self.peek() else { break };
            match ch {
                ' ' | '\t' | '\n' | ';' | '&' | '|' | '<' | '>' | '(' | ')' => break,
                '\'' => {
                    self.pos += 1;
                    let mut text = String::new();
                    loop {
                        match self.bump() {
                            Some('\'') => break,
                            Some(inner) => text.push(inner),
                            None => return Err(self.error("unterminated single quote")),
                        }
                    }
                    parts.push(WordPart::SingleQuoted(text));
                }
                '"' => parts.push(self.parse_double_quoted()?),
                '\\' => {
                    self.pos += 1;
                    match self.bump() {
                        Some('\n') => {} // line continuation
                        Some(escaped) => parts.push(WordPart::Escaped(escaped)),
                        None => parts.push(WordPart::Escaped('\\')),
                    }
                }
                '$' => parts.push(self.parse_dollar()?),
                '`' => parts.push(self.parse_backtick()?),
                _ => {
                    let mut run = String::new();
                    while let Some(plain) = self.peek() {
                        if matches!(
                            plain,
                            ' ' | '\t'
                                | '\n'
                                | ';'
                                | '&'
                                | '|'
                                | '<'
                                | '>'
                                | '('
                                | ')'
                                | '\''
                                | '"'
                                | '\\'
                                | '$'
                                | '`'
                        ) {
                            break;
                        }
                        run.push(plain);
                        self.pos += 1;
                    }
                    parts.push(WordPart::Literal(run));
                }
            }
        }
        Ok(Word { parts })
    }

    fn parse_double_quoted(&mut self) -> Result<WordPart, ShellError> {
        self.pos += 1; // consume `"`
        let mut parts = vec![];
        let mut lit = String::new();
        loop {
            let Some(ch) = self.peek() else {
                return Err(self.error("unterminated double quote"));
            };
            match ch {
                '"' => {
                    self.pos += 1;
                    break;
                }
                '\\' => {
                    self.pos += 1;
                    match self.bump() {
                        Some(escaped @ ('$' | '`' | '"' | '\\')) => lit.push(escaped),
                        Some('\n') => {}
                        Some(other) => {
                            lit.push('\\');
                            lit.push(other);
                        }
                        None => return Err(self.error("unterminated double quote")),
                    }
                }
                '$' => {
                    if !lit.is_empty() {
                        parts.push(WordPart::Literal(std::mem::take(&mut lit)));
                    }
                    parts.push(self.parse_dollar()?);
                }
                '`' => {
                    if !lit.is_empty() {
                        parts.push(WordPart::Literal(std::mem::take(&mut lit)));
                    }
                    parts.push(self.parse_backtick()?);
                }
                _ => {
                    lit.push(ch);
                    self.pos += 1;
                }
            }
        }
        if !lit.is_empty() {
            parts.push(WordPart::Literal(lit));
        }
        Ok(WordPart::DoubleQuoted(parts))
    }

    fn parse_dollar(&mut self) -> Result<WordPart, ShellError> {
        self.pos += 1; // consume `$`
        match self.peek() {
            Some('{') => {
                self.pos += 1;
                let mut name = String::new();
                loop {
                    match self.bump() {
                        Some('}') => break,
                        Some(inner) => name.push(inner),
                        None => return Err(self.error("unterminated parameter expansion")),
                    }
                }
                if !is_plain_param(&name) {
                    return Err(ShellError::Unsupported(
                        "parameter expansion operators".into(),
                    ));
                }
                Ok(WordPart::Param(name))
            }
            Some('(') => {
                self.pos += 1;
                let content = self.scan_balanced_parens()?;
                Ok(WordPart::CmdSubst(parse_script(&content)?))
            }
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {
                let mut name = String::new();
                while let Some(part) = self.peek() {
                    if part.is_ascii_alphanumeric() || part == '_' {
                        name.push(part);
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                Ok(WordPart::Param(name))
            }
            Some(special @ ('?' | '$' | '#' | '!' | '@' | '*')) => {
                self.pos += 1;
                Ok(WordPart::Param(special.to_string()))
            }
            Some(digit @ '0'..='9') => {
                self.pos += 1;
                Ok(WordPart::Param(digit.to_string()))
            }
            _ => Ok(WordPart::Literal("$".into())),
        }
    }

    fn parse_backtick(&mut self) -> Result<WordPart, ShellError> {
        self.pos += 1; // consume the backtick
        let mut content = String::new();
        loop {
            match self.bump() {
                Some('`') => break,
                Some('\\') => match self.bump() {
                    Some(escaped @ ('`' | '\\' | '$')) => content.push(escaped),
                    Some(other) => {
                        content.push('\\');
                        content.push(other);
                    }
                    None => return Err(self.error("unterminated command substitution")),
                },
                Some(inner) => content.push(inner),
                None => return Err(self.error("unterminated command substitution")),
            }
        }
        Ok(WordPart::CmdSubst(parse_script(&content)?))
    }

    /// Scans until the parenthesis matching an already-consumed `(`, honoring
    /// quotes and escapes. Returns the enclosed text.
    fn scan_balanced_parens(&mut self) -> Result<String, ShellError> {
        let start = self.pos;
        let mut depth = 1_u32;
        let mut in_single = false;
        let mut in_double = false;
        while let Some(ch) = self.bump() {
            if in_single {
                if ch == '\'' {
                    in_single = false;
                }
                continue;
            }
            match ch {
                '\\' => {
                    self.pos += 1;
                }
                '\'' if !in_double => in_single = true,
                '"' => in_double = !in_double,
                '(' if !in_double => depth += 1,
                ')' if !in_double => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(self.chars[start..self.pos - 1].iter().collect());
                    }
                }
                _ => {}
            }
        }
        Err(self.error("unterminated command substitution"))
    }
}

fn is_plain_param(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        }
        Some('?' | '$' | '#') if name.len() == 1 => true,
        _ => false,
    }
}

fn split_assignment(word: &Word) -> Option<Assign> {
    let WordPart::Literal(text) = word.parts.first()? else {
        return None;
    };
    let eq = text.find('=')?;
    let name = &text[..eq];
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return None;
    }

    let mut value_parts = vec![];
    let rest = &text[eq + 1..];
    if !rest.is_empty() {
        value_parts.push(WordPart::Literal(rest.to_owned()));
    }
    value_parts.extend(word.parts[1..].iter().cloned());
    Some(Assign {
        name: name.to_owned(),
        value: Word { parts: value_parts },
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn simple(stmt: &Stmt) -> &SimpleCmd {
        match &stmt.cmd {
            Cmd::Simple(simple) => simple,
            other => panic!("expected a simple command, got {other:?}"),
        }
    }

    #[test]
    fn parsing_words_and_quotes() {
        let stmt = parse_single(r#"echo 'a b' "c $D" e\ f"#).unwrap();
        let words = &simple(&stmt).words;
        assert_eq!(words.len(), 4);
        assert_eq!(words[0].literal(), Some("echo"));
        assert_matches!(&words[1].parts[..], [WordPart::SingleQuoted(text)] if text == "a b");
        assert_matches!(
            &words[2].parts[..],
            [WordPart::DoubleQuoted(inner)]
                if matches!(&inner[..], [WordPart::Literal(_), WordPart::Param(name)] if name == "D")
        );
        assert_matches!(
            &words[3].parts[..],
            [WordPart::Literal(e), WordPart::Escaped(' '), WordPart::Literal(f)]
                if e == "e" && f == "f"
        );
    }

    #[test]
    fn parsing_assignments_and_redirects() {
        let stmt = parse_single("FOO=bar cmd arg > out.txt 2>&1 < in.txt").unwrap();
        let cmd = simple(&stmt);
        assert_eq!(cmd.assigns.len(), 1);
        assert_eq!(cmd.assigns[0].name, "FOO");
        assert_eq!(cmd.words.len(), 2);

        assert_eq!(stmt.redirs.len(), 3);
        assert_matches!(
            &stmt.redirs[0],
            Redirect { fd: None, op: RedirOp::Out, .. }
        );
        assert_matches!(
            &stmt.redirs[1],
            Redirect { fd: Some(2), op: RedirOp::DupOut, .. }
        );
        assert_matches!(
            &stmt.redirs[2],
            Redirect { fd: None, op: RedirOp::In, .. }
        );
    }

    #[test]
    fn parsing_pipelines_and_lists() {
        let stmt = parse_single("a | b || c && d").unwrap();
        // `(a | b || c) && d`
        let Cmd::AndOr { op: AndOrOp::And, left, .. } = &stmt.cmd else {
            panic!("expected &&: {stmt:?}");
        };
        let Cmd::AndOr { op: AndOrOp::Or, left: pipeline, .. } = &left.cmd else {
            panic!("expected ||: {left:?}");
        };
        assert_matches!(&pipeline.cmd, Cmd::Pipeline(stages) if stages.len() == 2);
    }

    #[test]
    fn parsing_background_and_substitutions() {
        let stmt = parse_single("dep foo &").unwrap();
        assert!(stmt.background);

        let stmt = parse_single("dep $(echo hi)").unwrap();
        assert_matches!(
            &simple(&stmt).words[1].parts[..],
            [WordPart::CmdSubst(stmts)] if stmts.len() == 1
        );

        let stmt = parse_single("dep `echo hi`").unwrap();
        assert_matches!(&simple(&stmt).words[1].parts[..], [WordPart::CmdSubst(_)]);

        let stmt = parse_single("dep <(echo hi)").unwrap();
        assert_matches!(&simple(&stmt).words[1].parts[..], [WordPart::ProcSubst(_)]);
    }

    #[test]
    fn parsing_here_documents() {
        let stmt = parse_single("dep foo <<EOF\nbar\nEOF").unwrap();
        assert_matches!(
            &stmt.redirs[..],
            [Redirect { op: RedirOp::HereDoc, target: RedirTarget::HereDoc { body, quoted: false }, .. }]
                if body == "bar\n"
        );

        let stmt = parse_single("dep foo <<< bar").unwrap();
        assert_matches!(&stmt.redirs[..], [Redirect { op: RedirOp::HereString, .. }]);
    }

    #[test]
    fn exactly_one_statement_is_required() {
        assert_matches!(parse_single("foo; bar"), Err(ShellError::NotOneStatement(2)));
        assert_matches!(parse_single(""), Err(ShellError::NotOneStatement(0)));
        assert!(parse_single("echo hi").is_ok());
    }

    #[test]
    fn unsupported_constructs_are_rejected() {
        assert_matches!(parse_single("(echo hi)"), Err(ShellError::Unsupported(_)));
        assert_matches!(
            parse_single("for x in a b; do echo $x; done"),
            Err(ShellError::Unsupported(_))
        );
        assert_matches!(parse_single("echo ${X:-y}"), Err(ShellError::Unsupported(_)));
    }

    #[test]
    fn unterminated_quoting_is_a_parse_error() {
        assert_matches!(parse_single("echo 'oops"), Err(ShellError::Parse(_)));
        assert_matches!(parse_single("echo \"oops"), Err(ShellError::Parse(_)));
        assert_matches!(parse_single("echo $(oops"), Err(ShellError::Parse(_)));
    }
}
