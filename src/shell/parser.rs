//! Shell command-line parsing
//!
//! Everything here is a pure string transformation. One quote-aware scanner
//! drives all of it:
//! 1. Pipeline splitting on unquoted `|`
//! 2. Trailing `&` detection
//! 3. `$VAR` expansion (not inside single quotes)
//! 4. Output redirection (`>` / `>>`) on the final segment
//! 5. Tokenizing into argument words
//!
//! Unterminated quotes are not an error: the rest of the line simply
//! becomes part of the open token.

use std::iter::Peekable;
use std::str::CharIndices;
use thiserror::Error;

/// Output redirection of the final pipeline segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Target path as typed
    pub target: String,
    /// `>>` rather than `>`
    pub append: bool,
}

impl Redirect {
    pub fn new(target: impl Into<String>, append: bool) -> Self {
        Self {
            target: target.into(),
            append,
        }
    }
}

/// Parse error
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// `>` or `>>` with nothing after it
    #[error("bash: syntax error near unexpected token 'newline'")]
    MissingRedirectTarget,
}

/// Character scanner that tracks the active quote
struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
    quote: Option<char>,
}

/// One scanned character
#[derive(Debug, Clone, Copy)]
struct Scanned {
    idx: usize,
    ch: char,
    /// Inside quotes, or a quote character itself
    quoted: bool,
    /// Quote that was active (or opened/closed) here
    quote: Option<char>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            quote: None,
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn next_scanned(&mut self) -> Option<Scanned> {
        let (idx, ch) = self.chars.next()?;
        match self.quote {
            Some(q) if ch == q => {
                self.quote = None;
                Some(Scanned { idx, ch, quoted: true, quote: Some(q) })
            }
            Some(q) => Some(Scanned { idx, ch, quoted: true, quote: Some(q) }),
            None if ch == '\'' || ch == '"' => {
                self.quote = Some(ch);
                Some(Scanned { idx, ch, quoted: true, quote: Some(ch) })
            }
            None => Some(Scanned { idx, ch, quoted: false, quote: None }),
        }
    }

    /// Read one argument word, consuming quote characters
    fn read_word(&mut self) -> Option<String> {
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.chars.next();
        }
        self.peek_char()?;

        let mut word = String::new();
        while let Some(c) = self.peek_char() {
            match self.quote {
                None if c.is_whitespace() => break,
                None if c == '\'' || c == '"' => {
                    self.chars.next();
                    self.quote = Some(c);
                }
                Some(q) if c == q => {
                    self.chars.next();
                    self.quote = None;
                }
                Some('"') if c == '\\' => {
                    self.chars.next();
                    // Only these are escapable inside double quotes
                    match self.peek_char() {
                        Some(e @ ('"' | '\\' | '$')) => {
                            self.chars.next();
                            word.push(e);
                        }
                        _ => word.push('\\'),
                    }
                }
                _ => {
                    self.chars.next();
                    word.push(c);
                }
            }
        }
        Some(word)
    }
}

/// Split a line into argument words.
///
/// Unquoted whitespace separates words; quote characters are dropped.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut lexer = Lexer::new(input);
    let mut words = Vec::new();
    while let Some(word) = lexer.read_word() {
        words.push(word);
    }
    words
}

/// Split a line on unquoted `|`. Segments are trimmed; empty ones dropped.
pub fn split_pipeline(input: &str) -> Vec<String> {
    let mut lexer = Lexer::new(input);
    let mut segments = Vec::new();
    let mut start = 0;
    while let Some(s) = lexer.next_scanned() {
        if s.ch == '|' && !s.quoted {
            segments.push(&input[start..s.idx]);
            start = s.idx + 1;
        }
    }
    segments.push(&input[start..]);
    segments
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Remove a trailing unquoted `&`. Returns the remaining line and whether
/// one was found.
pub fn strip_background(line: &str) -> (String, bool) {
    let trimmed = line.trim_end();
    let mut lexer = Lexer::new(trimmed);
    let mut last = None;
    while let Some(s) = lexer.next_scanned() {
        last = Some(s);
    }
    match last {
        Some(s) if s.ch == '&' && !s.quoted => {
            let rest = &trimmed[..s.idx];
            if rest.ends_with('&') {
                // `&&` is not a background marker
                return (trimmed.to_string(), false);
            }
            (rest.trim_end().to_string(), true)
        }
        _ => (trimmed.to_string(), false),
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Expand `$NAME` and `${NAME}` outside single quotes.
///
/// Unknown names expand to the empty string. A `$` not followed by a name
/// stays literal.
pub fn expand_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut lexer = Lexer::new(input);
    let mut out = String::with_capacity(input.len());
    while let Some(s) = lexer.next_scanned() {
        if s.ch != '$' || s.quote == Some('\'') {
            out.push(s.ch);
            continue;
        }
        match lexer.peek_char() {
            Some('{') => {
                lexer.chars.next();
                let mut name = String::new();
                let mut closed = false;
                while let Some(c) = lexer.peek_char() {
                    lexer.chars.next();
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if closed {
                    out.push_str(&lookup(&name).unwrap_or_default());
                } else {
                    out.push_str("${");
                    out.push_str(&name);
                }
            }
            Some(c) if is_name_start(c) => {
                let mut name = String::new();
                while let Some(c) = lexer.peek_char().filter(|c| is_name_char(*c)) {
                    lexer.chars.next();
                    name.push(c);
                }
                out.push_str(&lookup(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }
    out
}

/// Split off the first unquoted `>` or `>>` and its target word.
pub fn split_redirect(segment: &str) -> Result<(String, Option<Redirect>), ParseError> {
    let mut lexer = Lexer::new(segment);
    while let Some(s) = lexer.next_scanned() {
        if s.ch != '>' || s.quoted {
            continue;
        }
        let append = lexer.peek_char() == Some('>');
        let rest_start = s.idx + if append { 2 } else { 1 };
        let command = segment[..s.idx].trim_end().to_string();
        let target = tokenize(&segment[rest_start..])
            .into_iter()
            .next()
            .filter(|t| !t.is_empty())
            .ok_or(ParseError::MissingRedirectTarget)?;
        return Ok((command, Some(Redirect::new(target, append))));
    }
    Ok((segment.to_string(), None))
}

/// Is this token a `NAME=VALUE` assignment?
pub fn is_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            let mut chars = name.chars();
            chars.next().is_some_and(is_name_start) && chars.all(is_name_char)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/ghost".to_string()),
            "GREETING" => Some("hello world".to_string()),
            _ => None,
        }
    }

    // ============ Tokenize ============

    #[test]
    fn test_simple_words() {
        assert_eq!(tokenize("ls -la /home"), vec!["ls", "-la", "/home"]);
    }

    #[test]
    fn test_extra_whitespace() {
        assert_eq!(tokenize("  ls   -la   /home  "), vec!["ls", "-la", "/home"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_mixed_quotes() {
        assert_eq!(tokenize(r#"a "b c" 'd'"#), vec!["a", "b c", "d"]);
    }

    #[test]
    fn test_concatenated_quotes() {
        assert_eq!(tokenize(r#"echo foo"bar"baz"#), vec!["echo", "foobarbaz"]);
    }

    #[test]
    fn test_empty_quotes_make_an_empty_word() {
        assert_eq!(tokenize(r#"echo """#), vec!["echo", ""]);
    }

    #[test]
    fn test_escapes_in_double_quotes() {
        assert_eq!(tokenize(r#"echo "say \"hi\"""#), vec!["echo", "say \"hi\""]);
        assert_eq!(tokenize(r#"echo "a\nb""#), vec!["echo", "a\\nb"]);
    }

    #[test]
    fn test_unterminated_quote_takes_the_rest() {
        assert_eq!(tokenize(r#"echo "hello world"#), vec!["echo", "hello world"]);
        assert_eq!(tokenize("echo 'a b"), vec!["echo", "a b"]);
    }

    // ============ Pipelines ============

    #[test]
    fn test_split_pipeline() {
        assert_eq!(split_pipeline("echo a | grep a"), vec!["echo a", "grep a"]);
        assert_eq!(split_pipeline("cat f|sort|uniq"), vec!["cat f", "sort", "uniq"]);
    }

    #[test]
    fn test_quoted_pipe_is_not_a_boundary() {
        assert_eq!(split_pipeline(r#"echo "a|b""#), vec![r#"echo "a|b""#]);
        assert_eq!(split_pipeline("echo 'x | y' | wc"), vec!["echo 'x | y'", "wc"]);
    }

    #[test]
    fn test_empty_segments_are_dropped() {
        assert_eq!(split_pipeline("| ls |  | wc"), vec!["ls", "wc"]);
    }

    // ============ Background ============

    #[test]
    fn test_strip_background() {
        assert_eq!(strip_background("nmap 10.0.13.0/24 &"), ("nmap 10.0.13.0/24".to_string(), true));
        assert_eq!(strip_background("sleep&"), ("sleep".to_string(), true));
        assert_eq!(strip_background("echo '&'"), ("echo '&'".to_string(), false));
        assert_eq!(strip_background("a &&"), ("a &&".to_string(), false));
    }

    // ============ Expansion ============

    #[test]
    fn test_expand_vars() {
        assert_eq!(expand_vars("cd $HOME/x", env), "cd /home/ghost/x");
        assert_eq!(expand_vars("echo ${HOME}!", env), "echo /home/ghost!");
        assert_eq!(expand_vars("echo $NOPE.", env), "echo .");
    }

    #[test]
    fn test_no_expansion_in_single_quotes() {
        assert_eq!(expand_vars("echo '$HOME' \"$HOME\"", env), "echo '$HOME' \"/home/ghost\"");
    }

    #[test]
    fn test_lone_dollar_is_literal() {
        assert_eq!(expand_vars("echo $ 5$", env), "echo $ 5$");
        assert_eq!(expand_vars("echo ${HOME", env), "echo ${HOME");
    }

    #[test]
    fn test_expansion_splits_unless_quoted() {
        assert_eq!(tokenize(&expand_vars("echo $GREETING", env)), vec!["echo", "hello", "world"]);
        assert_eq!(tokenize(&expand_vars("echo \"$GREETING\"", env)), vec!["echo", "hello world"]);
    }

    // ============ Redirection ============

    #[test]
    fn test_split_redirect() {
        let (cmd, redirect) = split_redirect("echo hi > f.txt").unwrap();
        assert_eq!(cmd, "echo hi");
        assert_eq!(redirect, Some(Redirect::new("f.txt", false)));

        let (cmd, redirect) = split_redirect("echo bye>>f.txt").unwrap();
        assert_eq!(cmd, "echo bye");
        assert_eq!(redirect, Some(Redirect::new("f.txt", true)));
    }

    #[test]
    fn test_quoted_redirect_is_text() {
        let (cmd, redirect) = split_redirect("echo 'a > b'").unwrap();
        assert_eq!(cmd, "echo 'a > b'");
        assert!(redirect.is_none());
    }

    #[test]
    fn test_quoted_redirect_target() {
        let (_, redirect) = split_redirect(r#"echo x > "my file""#).unwrap();
        assert_eq!(redirect, Some(Redirect::new("my file", false)));
    }

    #[test]
    fn test_missing_redirect_target() {
        assert_eq!(split_redirect("echo hello >"), Err(ParseError::MissingRedirectTarget));
        assert_eq!(
            ParseError::MissingRedirectTarget.to_string(),
            "bash: syntax error near unexpected token 'newline'"
        );
    }

    // ============ Assignments ============

    #[test]
    fn test_is_assignment() {
        assert!(is_assignment("FOO=bar"));
        assert!(is_assignment("_x1="));
        assert!(!is_assignment("=bar"));
        assert!(!is_assignment("1X=bar"));
        assert!(!is_assignment("./a=b"));
        assert!(!is_assignment("plain"));
    }
}
