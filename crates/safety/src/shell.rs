//! Quote-aware scanning of shell command strings.
//!
//! The scanner does not execute or expand anything.  It splits a command into
//! simple-command segments at `|`, `||`, `&&`, `;`, `&` and newlines that sit
//! outside quotes, collects redirections with their file descriptors, and
//! notes whether command substitution appears anywhere it would be expanded.

/// Operator that ends a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Pipe,
    And,
    Or,
    Sequence,
    Background,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Pipe => "|",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Sequence => ";",
            Operator::Background => "&",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `>`, `>|`, `&>` and `<>`
    Output,
    /// `>>`, `&>>`
    Append,
    /// `<`
    Input,
    /// `<<` and `<<-`
    Heredoc,
    /// `<<<`
    HereString,
    /// `2>&1`, `>&2`, `<&0`
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub fd: Option<u32>,
    pub kind: RedirectKind,
    pub target: String,
}

impl Redirect {
    /// Output that lands in a real file.  `/dev/null` is a sink, not a file.
    pub fn writes_file(&self) -> bool {
        matches!(self.kind, RedirectKind::Output | RedirectKind::Append)
            && self.target != "/dev/null"
    }

    /// Input the classifier cannot see: a file, heredoc or here-string.
    pub fn feeds_stdin(&self) -> bool {
        matches!(
            self.kind,
            RedirectKind::Input | RedirectKind::Heredoc | RedirectKind::HereString
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    /// Any part of the word was quoted.
    pub quoted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Segment {
    pub words: Vec<Word>,
    pub redirects: Vec<Redirect>,
    /// Source text of the segment, trimmed.
    pub raw: String,
    /// Operator that follows this segment, if any.
    pub next: Option<Operator>,
}

impl Segment {
    pub fn argv(&self) -> Vec<&str> {
        self.words.iter().map(|w| w.text.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ParsedCommand {
    pub segments: Vec<Segment>,
    /// Every opened quote was closed.
    pub balanced: bool,
    /// `$(…)`, backticks or process substitution appear outside single quotes.
    pub substitution: bool,
}

impl ParsedCommand {
    pub fn redirects(&self) -> impl Iterator<Item = &Redirect> {
        self.segments.iter().flat_map(|s| s.redirects.iter())
    }

    pub fn is_chained(&self) -> bool {
        self.segments.len() > 1
    }
}

pub fn parse(input: &str) -> ParsedCommand {
    Scanner::new(input).run()
}

/// Wrap `s` in single quotes so the shell passes it through verbatim.
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

// ── Scanner ─────────────────────────────────────────────────────────────────

struct Scanner<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    segments: Vec<Segment>,
    seg: Segment,
    seg_start: usize,
    word: String,
    word_started: bool,
    word_quoted: bool,
    pending: Option<(Option<u32>, RedirectKind)>,
    balanced: bool,
    substitution: bool,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            pos: 0,
            segments: Vec::new(),
            seg: Segment::default(),
            seg_start: 0,
            word: String::new(),
            word_started: false,
            word_quoted: false,
            pending: None,
            balanced: true,
            substitution: false,
        }
    }

    fn peek(&self, off: usize) -> Option<char> {
        self.chars.get(self.pos + off).map(|(_, c)| *c)
    }

    fn byte_at(&self, pos: usize) -> usize {
        self.chars.get(pos).map(|(b, _)| *b).unwrap_or(self.src.len())
    }

    fn push_char(&mut self, c: char) {
        self.word.push(c);
        self.word_started = true;
    }

    fn finish_word(&mut self) {
        if !self.word_started {
            return;
        }
        let word = Word {
            text: std::mem::take(&mut self.word),
            quoted: self.word_quoted,
        };
        self.word_started = false;
        self.word_quoted = false;
        match self.pending.take() {
            Some((fd, kind)) => self.seg.redirects.push(Redirect {
                fd,
                kind,
                target: word.text,
            }),
            None => self.seg.words.push(word),
        }
    }

    fn finish_segment(&mut self, op: Option<Operator>, end: usize) {
        self.finish_word();
        if let Some((fd, kind)) = self.pending.take() {
            // Operator with no target; keep it so it still counts.
            self.seg.redirects.push(Redirect {
                fd,
                kind,
                target: String::new(),
            });
        }
        let mut seg = std::mem::take(&mut self.seg);
        if seg.words.is_empty() && seg.redirects.is_empty() {
            if let (Some(op), Some(prev)) = (op, self.segments.last_mut()) {
                if prev.next.is_none() {
                    prev.next = Some(op);
                }
            }
            return;
        }
        seg.raw = self.src[self.seg_start.min(end)..end].trim().to_string();
        seg.next = op;
        self.segments.push(seg);
    }

    fn end_segment(&mut self, op: Operator, width: usize) {
        let end = self.byte_at(self.pos);
        self.pos += width;
        self.finish_segment(Some(op), end);
        self.seg_start = self.byte_at(self.pos);
    }

    fn run(mut self) -> ParsedCommand {
        while let Some(c) = self.peek(0) {
            match c {
                '\'' => self.single_quoted(),
                '"' => self.double_quoted(),
                '\\' => {
                    match self.peek(1) {
                        Some('\n') => {}
                        Some(n) => self.push_char(n),
                        None => {}
                    }
                    self.pos += 2;
                }
                '`' => {
                    self.substitution = true;
                    self.push_char('`');
                    self.pos += 1;
                }
                '$' if self.peek(1) == Some('(') => {
                    self.substitution = true;
                    self.push_char('$');
                    self.pos += 1;
                }
                ' ' | '\t' | '\r' => {
                    self.finish_word();
                    self.pos += 1;
                }
                '\n' | ';' => self.end_segment(Operator::Sequence, 1),
                '|' => match self.peek(1) {
                    Some('|') => self.end_segment(Operator::Or, 2),
                    Some('&') => self.end_segment(Operator::Pipe, 2),
                    _ => self.end_segment(Operator::Pipe, 1),
                },
                '&' => match self.peek(1) {
                    Some('&') => self.end_segment(Operator::And, 2),
                    Some('>') => {
                        self.finish_word();
                        if self.peek(2) == Some('>') {
                            self.pending = Some((None, RedirectKind::Append));
                            self.pos += 3;
                        } else {
                            self.pending = Some((None, RedirectKind::Output));
                            self.pos += 2;
                        }
                    }
                    _ => self.end_segment(Operator::Background, 1),
                },
                '>' | '<' => self.redirect(c),
                _ => {
                    self.push_char(c);
                    self.pos += 1;
                }
            }
        }
        let end = self.src.len();
        self.finish_segment(None, end);
        ParsedCommand {
            segments: self.segments,
            balanced: self.balanced,
            substitution: self.substitution,
        }
    }

    fn single_quoted(&mut self) {
        self.word_started = true;
        self.word_quoted = true;
        self.pos += 1;
        loop {
            match self.peek(0) {
                None => {
                    self.balanced = false;
                    return;
                }
                Some('\'') => {
                    self.pos += 1;
                    return;
                }
                Some(ch) => {
                    self.word.push(ch);
                    self.pos += 1;
                }
            }
        }
    }

    fn double_quoted(&mut self) {
        self.word_started = true;
        self.word_quoted = true;
        self.pos += 1;
        loop {
            match self.peek(0) {
                None => {
                    self.balanced = false;
                    return;
                }
                Some('"') => {
                    self.pos += 1;
                    return;
                }
                Some('\\') => {
                    match self.peek(1) {
                        Some(n @ ('"' | '\\' | '$' | '`')) => self.word.push(n),
                        Some('\n') => {}
                        Some(n) => {
                            self.word.push('\\');
                            self.word.push(n);
                        }
                        None => {
                            self.word.push('\\');
                            self.pos += 1;
                            continue;
                        }
                    }
                    self.pos += 2;
                }
                Some('$') if self.peek(1) == Some('(') => {
                    self.substitution = true;
                    self.word.push('$');
                    self.pos += 1;
                }
                Some('`') => {
                    self.substitution = true;
                    self.word.push('`');
                    self.pos += 1;
                }
                Some(ch) => {
                    self.word.push(ch);
                    self.pos += 1;
                }
            }
        }
    }

    fn redirect(&mut self, c: char) {
        let fd = if self.word_started
            && !self.word_quoted
            && !self.word.is_empty()
            && self.word.chars().all(|d| d.is_ascii_digit())
        {
            let fd = self.word.parse().ok();
            self.word.clear();
            self.word_started = false;
            fd
        } else {
            self.finish_word();
            None
        };

        let kind = if c == '>' {
            match self.peek(1) {
                Some('>') => {
                    self.pos += 2;
                    RedirectKind::Append
                }
                Some('&') => {
                    self.pos += 2;
                    if let Some(target) = self.dup_target() {
                        self.seg.redirects.push(Redirect {
                            fd,
                            kind: RedirectKind::Duplicate,
                            target,
                        });
                        return;
                    }
                    // `>&file` sends both streams to a file
                    RedirectKind::Output
                }
                Some('(') => {
                    self.substitution = true;
                    self.pos += 1;
                    return;
                }
                Some('|') => {
                    self.pos += 2;
                    RedirectKind::Output
                }
                _ => {
                    self.pos += 1;
                    RedirectKind::Output
                }
            }
        } else {
            match (self.peek(1), self.peek(2)) {
                (Some('<'), Some('<')) => {
                    self.pos += 3;
                    RedirectKind::HereString
                }
                (Some('<'), _) => {
                    self.pos += 2;
                    if self.peek(0) == Some('-') {
                        self.pos += 1;
                    }
                    RedirectKind::Heredoc
                }
                (Some('&'), _) => {
                    self.pos += 2;
                    let target = self.dup_target().unwrap_or_default();
                    self.seg.redirects.push(Redirect {
                        fd,
                        kind: RedirectKind::Duplicate,
                        target,
                    });
                    return;
                }
                (Some('('), _) => {
                    self.substitution = true;
                    self.pos += 1;
                    return;
                }
                (Some('>'), _) => {
                    self.pos += 2;
                    RedirectKind::Output
                }
                _ => {
                    self.pos += 1;
                    RedirectKind::Input
                }
            }
        };
        self.pending = Some((fd, kind));
    }

    /// Digits or `-` right after `>&` / `<&`.
    fn dup_target(&mut self) -> Option<String> {
        let mut target = String::new();
        while let Some(d) = self.peek(0) {
            if d.is_ascii_digit() || d == '-' {
                target.push(d);
                self.pos += 1;
            } else {
                break;
            }
        }
        (!target.is_empty()).then_some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argvs(cmd: &str) -> Vec<Vec<String>> {
        parse(cmd)
            .segments
            .iter()
            .map(|s| s.words.iter().map(|w| w.text.clone()).collect())
            .collect()
    }

    #[test]
    fn splits_on_operators_outside_quotes() {
        let p = parse("ls -la /opt | grep -v total && echo ok; uptime");
        assert_eq!(p.segments.len(), 4);
        assert_eq!(p.segments[0].next, Some(Operator::Pipe));
        assert_eq!(p.segments[1].next, Some(Operator::And));
        assert_eq!(p.segments[2].next, Some(Operator::Sequence));
        assert_eq!(p.segments[3].next, None);
        assert_eq!(p.segments[1].raw, "grep -v total");
    }

    #[test]
    fn operators_inside_quotes_are_literal() {
        let p = parse(r#"sqlite3 db.db "SELECT 1; SELECT 2" && echo done"#);
        assert_eq!(p.segments.len(), 2);
        assert_eq!(p.segments[0].words[2].text, "SELECT 1; SELECT 2");
        assert!(p.segments[0].words[2].quoted);
    }

    #[test]
    fn escaped_quotes_do_not_toggle_state() {
        let p = parse(r#"sqlite3 db.db "SELECT * FROM t WHERE name = \"O'Brien\";""#);
        assert!(p.balanced);
        assert_eq!(p.segments.len(), 1);
        assert_eq!(
            p.segments[0].words[2].text,
            r#"SELECT * FROM t WHERE name = "O'Brien";"#
        );

        let p = parse(r#"sqlite3 db.db "SELECT \"test"; rm -rf /"#);
        assert!(p.balanced);
        assert_eq!(argvs(r#"sqlite3 db.db "SELECT \"test"; rm -rf /"#)[1], vec!["rm", "-rf", "/"]);
    }

    #[test]
    fn unclosed_quote_is_unbalanced() {
        assert!(!parse(r#"sqlite3 db.db "SELECT 1; rm -rf /"#).balanced);
        assert!(!parse("echo 'oops").balanced);
        assert!(parse("echo 'fine'").balanced);
    }

    #[test]
    fn redirects_capture_fd_and_target() {
        let p = parse("cat file 2>/dev/null > /tmp/out");
        let r = &p.segments[0].redirects;
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].fd, Some(2));
        assert!(!r[0].writes_file());
        assert_eq!(r[1].target, "/tmp/out");
        assert!(r[1].writes_file());
        assert_eq!(p.segments[0].argv(), vec!["cat", "file"]);
    }

    #[test]
    fn stderr_dup_is_not_a_file() {
        let p = parse("docker logs app 2>&1 | grep -i error");
        let r = &p.segments[0].redirects[0];
        assert_eq!(r.kind, RedirectKind::Duplicate);
        assert_eq!(r.target, "1");
        assert!(!r.writes_file());
    }

    #[test]
    fn spaced_digit_is_an_argument() {
        let p = parse("echo 2 > out");
        assert_eq!(p.segments[0].argv(), vec!["echo", "2"]);
        assert_eq!(p.segments[0].redirects[0].fd, None);
    }

    #[test]
    fn stdin_forms() {
        assert_eq!(parse("mysql < a.sql").segments[0].redirects[0].kind, RedirectKind::Input);
        assert_eq!(parse("psql <<EOF\nSELECT 1;\nEOF").segments[0].redirects[0].kind, RedirectKind::Heredoc);
        assert_eq!(parse("sqlite3 db <<< 'SELECT 1'").segments[0].redirects[0].kind, RedirectKind::HereString);
        assert!(parse("mysql < a.sql").segments[0].redirects[0].feeds_stdin());
    }

    #[test]
    fn substitution_outside_single_quotes() {
        assert!(parse("echo $(whoami)").substitution);
        assert!(parse("echo `whoami`").substitution);
        assert!(parse(r#"echo "$(whoami)""#).substitution);
        assert!(!parse("echo '$(whoami)'").substitution);
        assert!(!parse("echo $HOME").substitution);
    }

    #[test]
    fn trailing_operator_does_not_add_empty_segment() {
        let p = parse("uptime;");
        assert_eq!(p.segments.len(), 1);
        assert_eq!(p.segments[0].next, Some(Operator::Sequence));
    }

    #[test]
    fn shell_escape_handles_single_quotes() {
        assert_eq!(shell_escape("plain"), "'plain'");
        assert_eq!(shell_escape("it's"), r#"'it'"'"'s'"#);
    }
}
