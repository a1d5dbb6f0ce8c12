//! Filesystem navigation and inspection programs
//!
//! - `pwd`: Print the working directory
//! - `cd`: Change the working directory
//! - `find`: Search for files and directories
//! - `stat`: Display file status

use super::{args_to_strs, check_help, glob_match, guard_read, mode_column, owner_of};
use crate::shell::executor::{CommandResult, Invocation};
use crate::shell::session::Session;
use crate::vfs::perms::DIR_MODE;
use crate::vfs::{Mode, Node, Vfs, basename};
use crate::world::{self, ROOT_HOME};

/// pwd - print working directory
pub fn prog_pwd(inv: &Invocation, _vfs: &Vfs, _session: &Session) -> CommandResult {
    CommandResult::text(inv.cwd)
}

/// cd - change directory
pub fn prog_cd(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: cd [DIR]\nChange the working directory.\n  cd      Go home\n  cd -    Go to the previous directory") {
        return help;
    }

    let shown = args.first().copied();
    let target = match shown {
        None => session.home().to_string(),
        Some("-") => match session.get_env("OLDPWD") {
            Some(dir) => dir.to_string(),
            None => return CommandResult::text("cd: OLDPWD not set"),
        },
        Some(dir) => inv.path(session, dir),
    };
    let shown = shown.unwrap_or("~");

    if vfs.get_followed(&target).is_none() {
        return CommandResult::text(format!("cd: {}: No such file or directory", shown));
    }
    if guard_read(vfs, &target).is_err() {
        return CommandResult::text(format!("cd: {}: Permission denied", shown));
    }
    if !vfs.is_dir(&target) {
        return CommandResult::text(format!("cd: {}: Not a directory", shown));
    }

    session.set_env("OLDPWD", inv.cwd);
    session.set_env("PWD", target.as_str());
    let output = if shown == "-" { target.clone() } else { String::new() };
    CommandResult::text(output).with_cwd(target)
}

/// A `-perm` test: exact, all of (`-MODE`) or any of (`/MODE`)
#[derive(Debug, Clone, Copy)]
enum PermTest {
    Exact(u16),
    All(u16),
    Any(u16),
}

impl PermTest {
    fn parse(arg: &str) -> Option<PermTest> {
        let (ctor, digits): (fn(u16) -> PermTest, &str) = if let Some(rest) = arg.strip_prefix('-') {
            (PermTest::All, rest)
        } else if let Some(rest) = arg.strip_prefix('/') {
            (PermTest::Any, rest)
        } else {
            (PermTest::Exact, arg)
        };
        Mode::parse(digits).map(|m| ctor(m.bits()))
    }

    fn matches(self, bits: u16) -> bool {
        match self {
            PermTest::Exact(want) => bits == want,
            PermTest::All(want) => bits & want == want,
            PermTest::Any(want) => want == 0 || bits & want != 0,
        }
    }
}

fn type_char(node: &Node) -> char {
    match node {
        Node::Directory { .. } => 'd',
        Node::Symlink { .. } => 'l',
        n if n.is_fifo() => 'p',
        _ => 'f',
    }
}

/// Mode as `lstat` reports it
fn lstat_mode(vfs: &Vfs, path: &str) -> Mode {
    match vfs.get(path) {
        Some(Node::Symlink { .. }) => Mode::of(Some("0777")),
        Some(Node::Directory { .. }) => Mode::of(Some(DIR_MODE)),
        _ => Mode::of(vfs.permissions(path)),
    }
}

/// find - search for files and directories
pub fn prog_find(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: find [PATH] [-name PATTERN] [-type f|d|l|p] [-perm [-/]MODE]\nSearch for files.") {
        return help;
    }

    let mut start: Option<&str> = None;
    let mut name: Option<&str> = None;
    let mut kind: Option<char> = None;
    let mut perm: Option<PermTest> = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "-name" | "-type" | "-perm" => {
                let Some(&value) = iter.next() else {
                    return CommandResult::text(format!("find: missing argument to '{}'", arg));
                };
                match *arg {
                    "-name" => name = Some(value),
                    "-type" => match value.chars().next().filter(|c| "fdlp".contains(*c)) {
                        Some(c) if value.len() == 1 => kind = Some(c),
                        _ => return CommandResult::text(format!("find: Unknown argument to -type: {}", value)),
                    },
                    _ => match PermTest::parse(value) {
                        Some(test) => perm = Some(test),
                        None => return CommandResult::text(format!("find: invalid mode '{}'", value)),
                    },
                }
            }
            s if s.starts_with('-') => {
                return CommandResult::text(format!("find: unknown predicate '{}'", s));
            }
            s if start.is_none() && name.is_none() && kind.is_none() && perm.is_none() => start = Some(s),
            s => return CommandResult::text(format!("find: paths must precede expression: '{}'", s)),
        }
    }

    let shown = start.unwrap_or(".");
    let root = inv.path(session, shown);
    if vfs.get(&root).is_none() {
        return CommandResult::text(format!("find: '{}': No such file or directory", shown));
    }
    let display = |path: &str| {
        let rel = if root == "/" { path } else { &path[root.len()..] };
        if path == root {
            shown.to_string()
        } else {
            format!("{}{}", shown.trim_end_matches('/'), rel)
        }
    };
    if guard_read(vfs, &root).is_err() {
        return CommandResult::text(format!("find: '{}': Permission denied", shown));
    }

    let mut candidates = vec![root.clone()];
    if matches!(vfs.get(&root), Some(Node::Directory { .. })) {
        candidates.extend(vfs.descendants(&root));
    }

    let mut lines = Vec::new();
    for path in candidates {
        // Entries are listed without following links
        if world::needs_root(&path) && !world::is_root(vfs) {
            if path == ROOT_HOME {
                lines.push(format!("find: '{}': Permission denied", display(&path)));
            }
            continue;
        }
        let Some(node) = vfs.get(&path) else { continue };
        let wanted = name.is_none_or(|p| glob_match(p, basename(&path)))
            && kind.is_none_or(|k| type_char(node) == k)
            && perm.is_none_or(|t| t.matches(lstat_mode(vfs, &path).bits()));
        if wanted {
            lines.push(display(&path));
        }
    }
    CommandResult::text(lines.join("\n"))
}

/// stat - display file status
pub fn prog_stat(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: stat FILE...\nDisplay file status.") {
        return help;
    }
    if args.is_empty() {
        return CommandResult::text("stat: missing operand");
    }

    let mut blocks = Vec::new();
    for arg in args {
        let path = inv.path(session, arg);
        if guard_read(vfs, &path).is_err() {
            blocks.push(format!("stat: cannot statx '{}': Permission denied", arg));
            continue;
        }
        let Some(node) = vfs.get(&path) else {
            blocks.push(format!("stat: cannot statx '{}': No such file or directory", arg));
            continue;
        };

        let (file_line, kind) = match node {
            Node::Symlink { target } => (format!("  File: {} -> {}", arg, target), "symbolic link"),
            Node::Directory { .. } => (format!("  File: {}", arg), "directory"),
            n if n.is_fifo() => (format!("  File: {}", arg), "fifo"),
            n if n.size() == 0 => (format!("  File: {}", arg), "regular empty file"),
            _ => (format!("  File: {}", arg), "regular file"),
        };
        let owner = owner_of(session, &path);
        let uid = if owner == "root" { 0 } else { 1000 };
        let mut lines = vec![
            file_line,
            format!("  Size: {:<10}\t{}", node.size(), kind),
            format!(
                "Access: ({}/{})  Uid: ({:>5}/{:>8})   Gid: ({:>5}/{:>8})",
                lstat_mode(vfs, &path),
                mode_column(vfs, &path),
                uid,
                owner,
                uid,
                owner
            ),
        ];
        if !node.is_symlink() {
            if let Some(cap) = vfs.xattrs(&path).and_then(|x| x.get("security.capability")) {
                lines.push(format!("Capability: {}", cap));
            }
        }
        lines.push("Modify: 2026-01-01 00:00:00.000000000 +0000".to_string());
        blocks.push(lines.join("\n"));
    }
    CommandResult::text(blocks.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::super::file::prog_mkdir;
    use super::super::testing::{mutate, read, root_world, world};
    use super::*;

    // ============ pwd / cd ============

    #[test]
    fn test_pwd() {
        let (vfs, session) = world();
        assert_eq!(read(prog_pwd, "pwd", &vfs, &session).output, "/home/ghost");
    }

    #[test]
    fn test_cd_into_new_directory() {
        let (mut vfs, mut session) = world();
        mutate(prog_mkdir, "mkdir foo", &mut vfs, &mut session);
        let r = mutate(prog_cd, "cd foo", &mut vfs, &mut session);
        assert_eq!(r.output, "");
        assert_eq!(r.new_cwd.as_deref(), Some("/home/ghost/foo"));
        assert_eq!(session.get_env("OLDPWD"), Some("/home/ghost"));
    }

    #[test]
    fn test_cd_errors_keep_cwd() {
        let (mut vfs, mut session) = world();
        let r = mutate(prog_cd, "cd /nonexistent", &mut vfs, &mut session);
        assert_eq!(r.output, "cd: /nonexistent: No such file or directory");
        assert!(r.new_cwd.is_none());
        assert_eq!(
            mutate(prog_cd, "cd notes.txt", &mut vfs, &mut session).output,
            "cd: notes.txt: Not a directory"
        );
        assert_eq!(mutate(prog_cd, "cd /root", &mut vfs, &mut session).output, "cd: /root: Permission denied");
    }

    #[test]
    fn test_cd_home_and_dash() {
        let (mut vfs, mut session) = world();
        assert_eq!(mutate(prog_cd, "cd", &mut vfs, &mut session).new_cwd.as_deref(), Some("/home/ghost"));
        assert_eq!(mutate(prog_cd, "cd -", &mut vfs, &mut session).output, "/home/ghost");
        mutate(prog_cd, "cd /tmp", &mut vfs, &mut session);
        let r = mutate(prog_cd, "cd -", &mut vfs, &mut session);
        assert_eq!(r.new_cwd.as_deref(), Some("/home/ghost"));
    }

    // ============ find ============

    #[test]
    fn test_find_setuid_binaries() {
        let (vfs, session) = world();
        let out = read(prog_find, "find /opt/bin -perm -4000", &vfs, &session).output;
        assert_eq!(out, "/opt/bin/suidcheck\n/opt/bin/vuln");
    }

    #[test]
    fn test_find_from_root_reports_denied_subtree() {
        let (vfs, session) = world();
        let out = read(prog_find, "find / -perm -4000 -type f", &vfs, &session).output;
        assert!(out.contains("find: '/root': Permission denied"));
        assert!(out.contains("/opt/bin/vuln"));
        assert!(!out.contains("alpha.enc"));
    }

    #[test]
    fn test_find_name_and_relative_display() {
        let (vfs, session) = root_world();
        let out = read(prog_find, "find /root -name *.enc", &vfs, &session).output;
        assert_eq!(out.lines().count(), 4);
        assert!(out.contains("/root/vault/alpha.enc"));
        let out = read(prog_find, "find -name notes.txt", &vfs, &session).output;
        assert_eq!(out, "./notes.txt");
    }

    #[test]
    fn test_find_type_and_errors() {
        let (vfs, session) = world();
        assert_eq!(read(prog_find, "find /tmp -type p", &vfs, &session).output, "/tmp/ghostpipe");
        assert_eq!(read(prog_find, "find /dev -type l", &vfs, &session).output, "/dev/usb");
        assert_eq!(
            read(prog_find, "find /nope", &vfs, &session).output,
            "find: '/nope': No such file or directory"
        );
        assert!(read(prog_find, "find -type x", &vfs, &session).output.contains("Unknown argument"));
    }

    // ============ stat ============

    #[test]
    fn test_stat_setuid_binary() {
        let (vfs, session) = world();
        let out = read(prog_stat, "stat /opt/bin/vuln", &vfs, &session).output;
        assert!(out.contains("  File: /opt/bin/vuln"));
        assert!(out.contains("Access: (4755/-rwsr-xr-x)"));
        assert!(out.contains("regular file"));
    }

    #[test]
    fn test_stat_capability_and_link() {
        let (vfs, session) = world();
        let out = read(prog_stat, "stat /opt/bin/ping", &vfs, &session).output;
        assert!(out.contains("Capability: cap_net_raw+ep"));
        let out = read(prog_stat, "stat /dev/usb", &vfs, &session).output;
        assert!(out.contains("/dev/usb -> /dev/sdc1"));
        assert!(out.contains("symbolic link"));
        assert_eq!(
            read(prog_stat, "stat /root/vault", &vfs, &session).output,
            "stat: cannot statx '/root/vault': Permission denied"
        );
    }
}
