//! Shell programs
//!
//! This module contains all the programs available in the shell.
//! Programs are organized by category for maintainability. Every program
//! is a plain function; the registry decides whether it gets shared or
//! mutable access to the machine.

pub mod archive;
pub mod crack;
pub mod encoding;
pub mod file;
pub mod fs;
pub mod mount;
pub mod net;
pub mod perms;
pub mod process;
pub mod shell;
pub mod system;
pub mod text;
pub mod user;

// Re-export all program functions for the registry
pub use archive::*;
pub use crack::*;
pub use encoding::*;
pub use file::*;
pub use fs::*;
pub use mount::*;
pub use net::*;
pub use perms::*;
pub use process::*;
pub use shell::*;
pub use system::*;
pub use text::*;
pub use user::*;

use super::executor::{CommandResult, Invocation};
use super::session::Session;
use crate::mission;
use crate::vfs::{Mode, Node, Vfs, is_within};
use crate::world;

// ============ Shared Utilities ============

/// Check if args contain -h or --help and return usage message if so
pub fn check_help(args: &[&str], usage: &str) -> Option<CommandResult> {
    if args.iter().any(|a| *a == "-h" || *a == "--help") {
        Some(CommandResult::text(usage))
    } else {
        None
    }
}

/// Convert String slice to &str slice for easier handling
pub fn args_to_strs(args: &[String]) -> Vec<&str> {
    args.iter().map(|s| s.as_str()).collect()
}

/// Separate short flags from operands. `-la` yields `l` and `a`; `--`
/// ends flag parsing; a lone `-` is an operand.
pub fn split_flags<'a>(args: &[&'a str]) -> (Vec<char>, Vec<&'a str>) {
    let mut flags = Vec::new();
    let mut operands = Vec::new();
    let mut only_operands = false;
    for arg in args {
        if only_operands {
            operands.push(*arg);
        } else if *arg == "--" {
            only_operands = true;
        } else if arg.len() > 1 && arg.starts_with('-') && !arg.starts_with("--") {
            flags.extend(arg.chars().skip(1));
        } else {
            operands.push(*arg);
        }
    }
    (flags, operands)
}

/// `cmd: operand: message`
pub fn fail(cmd: &str, operand: &str, message: impl std::fmt::Display) -> String {
    format!("{}: {}: {}", cmd, operand, message)
}

/// Why the locations in `paths` may not be changed
fn check_write(vfs: &Vfs, session: &Session, paths: [&str; 2]) -> Result<(), &'static str> {
    if paths.iter().any(|p| world::is_reserved(p)) {
        return Err("Operation not permitted");
    }
    if !world::is_root(vfs) && paths.iter().any(|p| world::needs_root(p)) {
        return Err("Permission denied");
    }
    if paths.iter().any(|p| session.is_read_only(p)) {
        return Err("Read-only file system");
    }
    if paths.iter().any(|p| session.is_immutable(p)) {
        return Err("Operation not permitted");
    }
    Ok(())
}

/// Why a path may not be changed. Symlinks are followed, so the check
/// covers both the path as written and where it lands.
pub fn guard_write(vfs: &Vfs, session: &Session, path: &str) -> Result<(), &'static str> {
    check_write(vfs, session, [path, &vfs.real_path(path)])
}

/// `guard_write` for the directory entry itself: a trailing symlink is
/// not followed (rm, mv, ln).
pub fn guard_entry(vfs: &Vfs, session: &Session, path: &str) -> Result<(), &'static str> {
    check_write(vfs, session, [path, &vfs.real_entry(path)])
}

/// `guard_entry` for a path and everything below it
pub fn guard_tree(vfs: &Vfs, session: &Session, path: &str) -> Result<(), &'static str> {
    guard_entry(vfs, session, path)?;
    for p in vfs.descendants(path) {
        guard_entry(vfs, session, &p)?;
    }
    Ok(())
}

/// Why a path may not be read
pub fn guard_read(vfs: &Vfs, path: &str) -> Result<(), &'static str> {
    if world::can_access(vfs, path) {
        Ok(())
    } else {
        Err("Permission denied")
    }
}

/// Text of a file operand, or stdin when there is none
pub fn read_input(inv: &Invocation, vfs: &Vfs, session: &Session, operand: Option<&str>) -> Result<String, String> {
    let Some(operand) = operand else {
        return Ok(inv.stdin.unwrap_or_default().to_string());
    };
    let path = inv.path(session, operand);
    guard_read(vfs, &path).map_err(|e| fail(inv.name, operand, e))?;
    vfs.read_file(&path)
        .map(String::from)
        .map_err(|e| fail(inv.name, operand, e))
}

/// Owner shown for a path: the player owns their home and /tmp
pub fn owner_of<'a>(session: &'a Session, path: &str) -> &'a str {
    if is_within(path, session.home()) || is_within(path, "/tmp") {
        session.user()
    } else {
        "root"
    }
}

/// `-rwsr-xr-x` style type and mode column
pub fn mode_column(vfs: &Vfs, path: &str) -> String {
    match vfs.get(path) {
        Some(Node::Symlink { .. }) => "lrwxrwxrwx".to_string(),
        Some(Node::Directory { .. }) => format!("d{}", Mode::of(vfs.permissions(path)).symbolic()),
        Some(node) => {
            let kind = if node.is_fifo() { 'p' } else { '-' };
            format!("{}{}", kind, Mode::of(vfs.permissions(path)).symbolic())
        }
        None => "??????????".to_string(),
    }
}

/// Create the root-session marker and record the escalation
pub fn escalate(vfs: &mut Vfs) {
    world::grant_root(vfs);
    mission::mark(vfs, "escalate");
}

/// Forget session metadata of paths that no longer exist
pub fn forget_removed(vfs: &Vfs, session: &mut Session) {
    session.attributes.retain(|p, _| vfs.exists(p));
    session.fifo_listeners.retain(|p| vfs.exists(p));
    session.vault_archives.retain(|p| vfs.exists(p));
}

/// Append the intrusion warning once the alert level is high enough
pub fn with_alert(mut result: CommandResult, session: &Session) -> CommandResult {
    if session.alert_level >= ALERT_THRESHOLD {
        if !result.output.is_empty() {
            result.output.push('\n');
        }
        result.output.push_str(&format!(
            "\x1b[1;31m[!] intrusion detection alert level {}\x1b[0m",
            session.alert_level
        ));
    }
    result
}

/// Alert level from which tools print a warning
pub const ALERT_THRESHOLD: u32 = 5;

/// Shell-style glob match supporting `*` and `?`
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

/// Helpers for calling programs directly in unit tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::shell::executor::{MutateFn, ReadFn};
    use crate::shell::parser::tokenize;
    use std::collections::BTreeMap;

    pub const HOME: &str = "/home/ghost";

    /// The initial world
    pub fn world() -> (Vfs, Session) {
        let mut vfs = Vfs::new();
        let session = Session::new("ghost", "nexus", HOME);
        world::apply_fixtures(&mut vfs, &session);
        (vfs, session)
    }

    /// The initial world with a root session
    pub fn root_world() -> (Vfs, Session) {
        let (mut vfs, session) = world();
        world::grant_root(&mut vfs);
        (vfs, session)
    }

    pub fn read_with(f: ReadFn, line: &str, stdin: Option<&str>, vfs: &Vfs, session: &Session) -> CommandResult {
        let tokens = tokenize(line);
        let overlay = BTreeMap::new();
        let inv = Invocation {
            name: &tokens[0],
            cwd: HOME,
            args: &tokens[1..],
            stdin,
            overlay: &overlay,
            piped: true,
        };
        f(&inv, vfs, session)
    }

    pub fn read(f: ReadFn, line: &str, vfs: &Vfs, session: &Session) -> CommandResult {
        read_with(f, line, None, vfs, session)
    }

    pub fn mutate(f: MutateFn, line: &str, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
        let tokens = tokenize(line);
        let overlay = BTreeMap::new();
        let inv = Invocation {
            name: &tokens[0],
            cwd: HOME,
            args: &tokens[1..],
            stdin: None,
            overlay: &overlay,
            piped: true,
        };
        f(&inv, vfs, session)
    }
}
