use std::io::BufRead;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::classify::{classify, Classification};

/// A non-blank, non-comment line read from a batch source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub number: usize,
    pub text: String,
}

impl RawLine {
    pub fn new(number: usize, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub line: usize,
    pub name: String,
    pub positional_args: Vec<String>,
    pub flags: Vec<String>,
    pub redirect_target: Option<PathBuf>,
    pub classification: Classification,
}

impl ParsedCommand {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|value| value == flag)
    }

    /// Shell-quoted form of the command, including any redirect.
    pub fn display(&self) -> String {
        let words = std::iter::once(self.name.as_str())
            .chain(self.positional_args.iter().map(String::as_str))
            .chain(self.flags.iter().map(String::as_str));
        let mut text = shell_words::join(words);
        if let Some(target) = self.redirect_target.as_ref() {
            text.push_str(" > ");
            text.push_str(&shell_words::quote(&target.to_string_lossy()));
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    /// The token opened with a quote, so it can never be a flag.
    pub quoted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tokenized {
    pub tokens: Vec<Token>,
    pub unterminated: bool,
}

impl Tokenized {
    pub fn values(&self) -> Vec<&str> {
        self.tokens.iter().map(|token| token.value.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    Normal,
    InSingleQuote,
    InDoubleQuote,
}

impl QuoteState {
    fn step(self, ch: char) -> Self {
        match (self, ch) {
            (QuoteState::Normal, '\'') => QuoteState::InSingleQuote,
            (QuoteState::Normal, '"') => QuoteState::InDoubleQuote,
            (QuoteState::InSingleQuote, '\'') | (QuoteState::InDoubleQuote, '"') => {
                QuoteState::Normal
            }
            (state, _) => state,
        }
    }
}

/// Split a line on whitespace, keeping quoted spans together.
///
/// Backslashes carry no meaning: they are kept as ordinary characters and
/// cannot escape a quote. An unterminated quote swallows the rest of the
/// line into the current token and sets `unterminated`.
pub fn tokenize(text: &str) -> Tokenized {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut state = QuoteState::Normal;

    for ch in text.chars() {
        let next = state.step(ch);
        match state {
            QuoteState::Normal if next != QuoteState::Normal => {
                if !in_token {
                    quoted = true;
                }
                in_token = true;
            }
            QuoteState::Normal if ch.is_whitespace() => {
                if in_token {
                    tokens.push(Token {
                        value: std::mem::take(&mut current),
                        quoted,
                    });
                    in_token = false;
                    quoted = false;
                }
            }
            QuoteState::Normal => {
                current.push(ch);
                in_token = true;
            }
            _ if next == QuoteState::Normal => {}
            _ => current.push(ch),
        }
        state = next;
    }

    if in_token {
        tokens.push(Token {
            value: current,
            quoted,
        });
    }

    Tokenized {
        tokens,
        unterminated: state != QuoteState::Normal,
    }
}

/// Split off a trailing `> target`. Only the last unquoted `>` counts; a
/// doubled `>>` is treated like a single one.
pub fn split_redirect(text: &str) -> (&str, Option<PathBuf>) {
    let mut state = QuoteState::Normal;
    let mut last = None;
    for (index, ch) in text.char_indices() {
        if state == QuoteState::Normal && ch == '>' {
            last = Some(index);
        }
        state = state.step(ch);
    }

    let Some(index) = last else {
        return (text, None);
    };
    let command = text[..index].trim_end_matches('>');
    let target = tokenize(&text[index + 1..]).values().join(" ");
    if target.trim().is_empty() {
        return (command, None);
    }
    (command, Some(PathBuf::from(target)))
}

pub fn parse_line(raw: &RawLine) -> Option<ParsedCommand> {
    let (command_text, redirect_target) = split_redirect(&raw.text);
    let tokenized = tokenize(command_text);
    if tokenized.unterminated {
        warn!(
            line = raw.number,
            "unterminated quote, using best-effort tokenization"
        );
    }

    let mut name: Option<String> = None;
    let mut positional_args = Vec::new();
    let mut flags: Vec<String> = Vec::new();
    for token in tokenized.tokens {
        if !token.quoted && token.value.starts_with("--") {
            if !flags.contains(&token.value) {
                flags.push(token.value);
            }
            continue;
        }
        if name.is_none() {
            if !token.value.is_empty() {
                name = Some(token.value);
            }
            continue;
        }
        positional_args.push(token.value);
    }

    let Some(name) = name else {
        debug!(line = raw.number, "no command name, skipping line");
        return None;
    };
    let classification = classify(&name);
    Some(ParsedCommand {
        line: raw.number,
        name,
        positional_args,
        flags,
        redirect_target,
        classification,
    })
}

pub fn parse_lines(lines: &[RawLine]) -> Vec<ParsedCommand> {
    lines.iter().filter_map(parse_line).collect()
}

/// Read every meaningful line from a batch source, dropping blanks and
/// `#` comments. Line numbers are 1-based against the source. Bytes that
/// are not UTF-8 are replaced on that line only.
pub fn read_batch_lines<R: BufRead>(mut reader: R) -> std::io::Result<Vec<RawLine>> {
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    let mut number = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        number += 1;
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        let text = match String::from_utf8(buf.clone()) {
            Ok(text) => text,
            Err(_) => {
                warn!(line = number, "batch line is not valid UTF-8; replacing bad bytes");
                String::from_utf8_lossy(&buf).into_owned()
            }
        };
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        lines.push(RawLine::new(number, text));
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> ParsedCommand {
        parse_line(&RawLine::new(1, text)).expect("command")
    }

    #[test]
    fn splits_name_args_and_flags() {
        let cmd = parse("quick \"Fix login\" bugfix --json --verbose");
        assert_eq!(cmd.name, "quick");
        assert_eq!(cmd.positional_args, vec!["Fix login", "bugfix"]);
        assert_eq!(cmd.flags, vec!["--json", "--verbose"]);
        assert_eq!(cmd.redirect_target, None);
        assert_eq!(cmd.classification, Classification::Write);
    }

    #[test]
    fn leading_flags_do_not_become_the_name() {
        let cmd = parse("--json list open");
        assert_eq!(cmd.name, "list");
        assert_eq!(cmd.positional_args, vec!["open"]);
        assert_eq!(cmd.flags, vec!["--json"]);
    }

    #[test]
    fn duplicate_flags_collapse_in_first_seen_order() {
        let cmd = parse("list --all --json --all");
        assert_eq!(cmd.flags, vec!["--all", "--json"]);
    }

    #[test]
    fn flag_values_are_forwarded_verbatim() {
        let cmd = parse("list --status=\"in progress\"");
        assert_eq!(cmd.flags, vec!["--status=in progress"]);
    }

    #[test]
    fn quoted_dashes_stay_positional() {
        let cmd = parse("add '--not a flag'");
        assert_eq!(cmd.positional_args, vec!["--not a flag"]);
        assert!(cmd.flags.is_empty());
    }

    #[test]
    fn empty_quoted_argument_is_kept() {
        let cmd = parse("update 3 \"\"");
        assert_eq!(cmd.positional_args, vec!["3", ""]);
    }

    #[test]
    fn backslashes_are_literal_and_do_not_escape_quotes() {
        let tokens = tokenize(r#"add "say \"hi\"" c:\tmp"#);
        assert_eq!(tokens.values(), vec![r"say \hi\", r"c:\tmp"]);
        assert!(!tokens.unterminated);
    }

    #[test]
    fn unterminated_quote_falls_back_to_rest_of_line() {
        let tokens = tokenize("add \"unfinished title here");
        assert_eq!(tokens.values(), vec!["add", "unfinished title here"]);
        assert!(tokens.unterminated);

        let cmd = parse("add 'half open");
        assert_eq!(cmd.positional_args, vec!["half open"]);
    }

    #[test]
    fn redirect_uses_last_unquoted_marker() {
        let cmd = parse("list \"a > b\" --json > out/list.json");
        assert_eq!(cmd.positional_args, vec!["a > b"]);
        assert_eq!(cmd.flags, vec!["--json"]);
        assert_eq!(cmd.redirect_target, Some(PathBuf::from("out/list.json")));

        let cmd = parse("show 1 > first.txt > second.txt");
        assert_eq!(cmd.positional_args, vec!["1", ">", "first.txt"]);
        assert_eq!(cmd.redirect_target, Some(PathBuf::from("second.txt")));
    }

    #[test]
    fn double_redirect_marker_is_treated_as_single() {
        let cmd = parse("export >> dump.json");
        assert_eq!(cmd.name, "export");
        assert!(cmd.positional_args.is_empty());
        assert_eq!(cmd.redirect_target, Some(PathBuf::from("dump.json")));
    }

    #[test]
    fn dangling_redirect_is_ignored() {
        let cmd = parse("list >   ");
        assert_eq!(cmd.name, "list");
        assert_eq!(cmd.redirect_target, None);
    }

    #[test]
    fn quoted_redirect_target_keeps_spaces() {
        let cmd = parse("list > 'my report.txt'");
        assert_eq!(cmd.redirect_target, Some(PathBuf::from("my report.txt")));
    }

    #[test]
    fn lines_without_a_name_are_dropped() {
        assert!(parse_line(&RawLine::new(4, "--json --all")).is_none());
        assert!(parse_line(&RawLine::new(5, "> out.txt")).is_none());
    }

    #[test]
    fn read_batch_lines_skips_blanks_and_comments() {
        let input = "# header\nlist --json\n\n   \n  # indented comment\nquick \"Fix login\" bugfix\n";
        let lines = read_batch_lines(input.as_bytes()).expect("read");
        assert_eq!(
            lines,
            vec![
                RawLine::new(2, "list --json"),
                RawLine::new(6, "quick \"Fix login\" bugfix"),
            ]
        );
    }

    #[test]
    fn invalid_utf8_line_keeps_its_neighbours() {
        let input: &[u8] = b"list --json\r\nadd caf\xe9\nshow 1";
        let lines = read_batch_lines(input).expect("read");
        assert_eq!(
            lines,
            vec![
                RawLine::new(1, "list --json"),
                RawLine::new(2, "add caf\u{fffd}"),
                RawLine::new(3, "show 1"),
            ]
        );
    }

    #[test]
    fn display_requotes_arguments() {
        let cmd = parse("quick \"Fix login\" bugfix --json > 'out dir/x.txt'");
        assert_eq!(cmd.display(), "quick 'Fix login' bugfix --json > 'out dir/x.txt'");
    }
}
