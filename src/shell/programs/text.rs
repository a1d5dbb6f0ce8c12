//! Text processing programs
//!
//! Programs for text manipulation: echo, grep, head, tail, wc, sort, uniq

use super::{args_to_strs, check_help, read_input, split_flags};
use crate::shell::executor::{CommandResult, Invocation};
use crate::shell::session::Session;
use crate::vfs::Vfs;

/// Interpret `echo -e` escapes
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('e') => out.push('\x1b'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// echo - display a line of text
pub fn prog_echo(inv: &Invocation, _vfs: &Vfs, _session: &Session) -> CommandResult {
    let mut interpret = false;
    let mut words = inv.args;
    // Leading -n/-e/-ne clusters are options; anything else is text
    while let Some(first) = words.first() {
        let is_option = first.len() > 1
            && first.starts_with('-')
            && first.chars().skip(1).all(|c| c == 'n' || c == 'e');
        if !is_option {
            break;
        }
        interpret |= first.contains('e');
        words = &words[1..];
    }

    let text = words.join(" ");
    if interpret {
        CommandResult::text(unescape(&text))
    } else {
        CommandResult::text(text)
    }
}

/// grep - search text for a pattern
pub fn prog_grep(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: grep [-ivnc] PATTERN [FILE]...\nSearch for PATTERN in files or stdin.\n  -i  Ignore case\n  -v  Invert match\n  -n  Show line numbers\n  -c  Count matches") {
        return help;
    }

    let (flags, operands) = split_flags(&args);
    let Some((pattern, files)) = operands.split_first() else {
        return CommandResult::text("Usage: grep [-ivnc] PATTERN [FILE]...");
    };
    let ignore_case = flags.contains(&'i');
    let invert = flags.contains(&'v');
    let numbered = flags.contains(&'n');
    let count = flags.contains(&'c');
    let needle = if ignore_case { pattern.to_lowercase() } else { pattern.to_string() };

    let matches = |line: &str| {
        let hit = if ignore_case {
            line.to_lowercase().contains(&needle)
        } else {
            line.contains(&needle)
        };
        hit != invert
    };

    let sources: Vec<Option<&str>> = if files.is_empty() {
        vec![None]
    } else {
        files.iter().map(|f| Some(*f)).collect()
    };
    let labelled = sources.len() > 1;

    let mut out = Vec::new();
    for source in sources {
        let text = match read_input(inv, vfs, session, source) {
            Ok(text) => text,
            Err(e) => {
                out.push(e);
                continue;
            }
        };
        let prefix = match source {
            Some(name) if labelled => format!("{}:", name),
            _ => String::new(),
        };
        let hits: Vec<(usize, &str)> = text.lines().enumerate().filter(|(_, l)| matches(*l)).collect();
        if count {
            out.push(format!("{}{}", prefix, hits.len()));
            continue;
        }
        for (i, line) in hits {
            if numbered {
                out.push(format!("{}{}:{}", prefix, i + 1, line));
            } else {
                out.push(format!("{}{}", prefix, line));
            }
        }
    }
    CommandResult::text(out.join("\n"))
}

/// Parse `-n N` / `-nN` / `-N`; returns the count and remaining operands
fn line_count<'a>(cmd: &str, args: &[&'a str]) -> Result<(usize, Vec<&'a str>), String> {
    let mut n = 10;
    let mut rest = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = args[i];
        let value = if arg == "-n" {
            i += 1;
            Some(args.get(i).copied().unwrap_or(""))
        } else if let Some(v) = arg.strip_prefix("-n") {
            Some(v)
        } else if arg.len() > 1 && arg.starts_with('-') && arg[1..].chars().all(|c| c.is_ascii_digit()) {
            Some(&arg[1..])
        } else {
            rest.push(arg);
            None
        };
        if let Some(v) = value {
            n = v
                .parse()
                .map_err(|_| format!("{}: invalid number of lines: '{}'", cmd, v))?;
        }
        i += 1;
    }
    Ok((n, rest))
}

/// head - output first lines
pub fn prog_head(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: head [-n N] [FILE]\nOutput first N lines (default 10).") {
        return help;
    }

    let (n, files) = match line_count("head", &args) {
        Ok(parsed) => parsed,
        Err(e) => return CommandResult::text(e),
    };
    match read_input(inv, vfs, session, files.first().copied()) {
        Ok(text) => CommandResult::text(text.lines().take(n).collect::<Vec<_>>().join("\n")),
        Err(e) => CommandResult::text(e),
    }
}

/// tail - output last lines
pub fn prog_tail(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: tail [-n N] [FILE]\nOutput last N lines (default 10).") {
        return help;
    }

    let (n, files) = match line_count("tail", &args) {
        Ok(parsed) => parsed,
        Err(e) => return CommandResult::text(e),
    };
    match read_input(inv, vfs, session, files.first().copied()) {
        Ok(text) => {
            let lines: Vec<&str> = text.lines().collect();
            let start = lines.len().saturating_sub(n);
            CommandResult::text(lines[start..].join("\n"))
        }
        Err(e) => CommandResult::text(e),
    }
}

/// wc - count lines, words, and bytes
pub fn prog_wc(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: wc [-lwc] [FILE]\nCount lines, words, and bytes.") {
        return help;
    }

    let (flags, files) = split_flags(&args);
    let file = files.first().copied();
    let text = match read_input(inv, vfs, session, file) {
        Ok(text) => text,
        Err(e) => return CommandResult::text(e),
    };

    let lines = text.lines().count();
    let words = text.split_whitespace().count();
    let bytes = text.len();

    let mut counts = Vec::new();
    if flags.contains(&'l') {
        counts.push(lines);
    }
    if flags.contains(&'w') {
        counts.push(words);
    }
    if flags.contains(&'c') {
        counts.push(bytes);
    }
    let mut out = if counts.is_empty() {
        format!("{} {} {}", lines, words, bytes)
    } else {
        counts.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" ")
    };
    if let Some(name) = file {
        out.push(' ');
        out.push_str(name);
    }
    CommandResult::text(out)
}

/// sort - sort lines
pub fn prog_sort(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: sort [-rnu] [FILE]\nSort lines of text.\n  -r  Reverse\n  -n  Numeric\n  -u  Unique") {
        return help;
    }

    let (flags, files) = split_flags(&args);
    let text = match read_input(inv, vfs, session, files.first().copied()) {
        Ok(text) => text,
        Err(e) => return CommandResult::text(e),
    };

    let mut lines: Vec<&str> = text.lines().collect();
    if flags.contains(&'n') {
        let key = |l: &str| l.trim().parse::<f64>().unwrap_or(0.0);
        lines.sort_by(|a, b| key(a).total_cmp(&key(b)).then_with(|| a.cmp(b)));
    } else {
        lines.sort();
    }
    if flags.contains(&'u') {
        lines.dedup();
    }
    if flags.contains(&'r') {
        lines.reverse();
    }
    CommandResult::text(lines.join("\n"))
}

/// uniq - collapse adjacent duplicate lines
pub fn prog_uniq(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: uniq [-c] [FILE]\nCollapse adjacent duplicate lines.\n  -c  Prefix lines with counts") {
        return help;
    }

    let (flags, files) = split_flags(&args);
    let text = match read_input(inv, vfs, session, files.first().copied()) {
        Ok(text) => text,
        Err(e) => return CommandResult::text(e),
    };

    let mut groups: Vec<(usize, &str)> = Vec::new();
    for line in text.lines() {
        match groups.last_mut() {
            Some((n, last)) if *last == line => *n += 1,
            _ => groups.push((1, line)),
        }
    }

    let counted = flags.contains(&'c');
    let out: Vec<String> = groups
        .into_iter()
        .map(|(n, line)| if counted { format!("{:>7} {}", n, line) } else { line.to_string() })
        .collect();
    CommandResult::text(out.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{read, read_with, world};
    use super::*;

    #[test]
    fn test_echo() {
        let (vfs, session) = world();
        assert_eq!(read(prog_echo, "echo hello   world", &vfs, &session).output, "hello world");
        assert_eq!(read(prog_echo, "echo 'a  b'", &vfs, &session).output, "a  b");
        assert_eq!(read(prog_echo, "echo -e a\\nb", &vfs, &session).output, "a\nb");
        assert_eq!(read(prog_echo, "echo -n -x", &vfs, &session).output, "-x");
        assert_eq!(read(prog_echo, "echo", &vfs, &session).output, "");
    }

    #[test]
    fn test_grep_stdin() {
        let (vfs, session) = world();
        let input = Some("alpha\nBeta\ngamma alpha");
        assert_eq!(read_with(prog_grep, "grep alpha", input, &vfs, &session).output, "alpha\ngamma alpha");
        assert_eq!(read_with(prog_grep, "grep -i beta", input, &vfs, &session).output, "Beta");
        assert_eq!(read_with(prog_grep, "grep -v alpha", input, &vfs, &session).output, "Beta");
        assert_eq!(read_with(prog_grep, "grep -c alpha", input, &vfs, &session).output, "2");
        assert_eq!(read_with(prog_grep, "grep -n gamma", input, &vfs, &session).output, "3:gamma alpha");
    }

    #[test]
    fn test_grep_files() {
        let (vfs, session) = world();
        assert_eq!(read(prog_grep, "grep ghost /etc/passwd", &vfs, &session).output, "ghost:x:1000:1000:ghost:/home/ghost:/bin/bash");
        let out = read(prog_grep, "grep root /etc/passwd /etc/hostname", &vfs, &session).output;
        assert_eq!(out, "/etc/passwd:root:x:0:0:root:/root:/bin/bash");
        assert_eq!(
            read(prog_grep, "grep x nope", &vfs, &session).output,
            "grep: nope: No such file or directory"
        );
    }

    #[test]
    fn test_head_and_tail() {
        let (vfs, session) = world();
        let input = Some("1\n2\n3\n4\n5");
        assert_eq!(read_with(prog_head, "head -n 2", input, &vfs, &session).output, "1\n2");
        assert_eq!(read_with(prog_head, "head -3", input, &vfs, &session).output, "1\n2\n3");
        assert_eq!(read_with(prog_tail, "tail -n 2", input, &vfs, &session).output, "4\n5");
        assert_eq!(read_with(prog_tail, "tail -n2", input, &vfs, &session).output, "4\n5");
        assert_eq!(
            read_with(prog_head, "head -n x", input, &vfs, &session).output,
            "head: invalid number of lines: 'x'"
        );
        assert_eq!(read(prog_head, "head -n 1 /etc/passwd", &vfs, &session).output, "root:x:0:0:root:/root:/bin/bash");
    }

    #[test]
    fn test_wc() {
        let (vfs, session) = world();
        let input = Some("one two\nthree");
        assert_eq!(read_with(prog_wc, "wc", input, &vfs, &session).output, "2 3 13");
        assert_eq!(read_with(prog_wc, "wc -l", input, &vfs, &session).output, "2");
        assert_eq!(read_with(prog_wc, "wc -w", input, &vfs, &session).output, "3");
        assert_eq!(read(prog_wc, "wc -l /etc/passwd", &vfs, &session).output, "4 /etc/passwd");
    }

    #[test]
    fn test_sort_and_uniq() {
        let (vfs, session) = world();
        let input = Some("b\na\nc\na");
        assert_eq!(read_with(prog_sort, "sort", input, &vfs, &session).output, "a\na\nb\nc");
        assert_eq!(read_with(prog_sort, "sort -r -u", input, &vfs, &session).output, "c\nb\na");
        assert_eq!(read_with(prog_sort, "sort -n", Some("10\n9\n100"), &vfs, &session).output, "9\n10\n100");
        assert_eq!(read_with(prog_uniq, "uniq", Some("a\na\nb\na"), &vfs, &session).output, "a\nb\na");
        assert_eq!(
            read_with(prog_uniq, "uniq -c", Some("a\na\nb"), &vfs, &session).output,
            "      2 a\n      1 b"
        );
    }
}
