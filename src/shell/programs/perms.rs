//! Permission and attribute programs
//!
//! chmod, chattr, lsattr, setcap, getcap

use super::{args_to_strs, check_help, guard_read, guard_write, owner_of, split_flags};
use crate::shell::executor::{CommandResult, Invocation};
use crate::shell::session::Session;
use crate::vfs::{Mode, Vfs, join};
use crate::world;

/// Extended attribute holding file capabilities
pub const CAPABILITY_XATTR: &str = "security.capability";

/// chmod - change file mode
pub fn prog_chmod(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: chmod MODE FILE...\nChange file mode.\n  MODE: 644, 4755, +x, -x, u+s, u-s, +t, -t") {
        return help;
    }

    // Modes like -x look like flags, so no flag parsing here
    let Some((mode, files)) = args.split_first().filter(|(_, f)| !f.is_empty()) else {
        return CommandResult::text("chmod: missing operand");
    };
    if Mode::of(None).apply(mode).is_none() {
        return CommandResult::text(format!("chmod: invalid mode: '{}'", mode));
    }

    let root = world::is_root(vfs);
    let mut errors = Vec::new();
    for file in files {
        let path = inv.path(session, file);
        let Ok(real) = vfs.resolve_link(&path) else {
            errors.push(format!("chmod: cannot access '{}': No such file or directory", file));
            continue;
        };
        let owned = root || owner_of(session, &real) != "root";
        let allowed = guard_write(vfs, session, &path)
            .and_then(|_| guard_write(vfs, session, &real))
            .and_then(|_| if owned { Ok(()) } else { Err("Operation not permitted") });
        if let Err(e) = allowed {
            errors.push(format!("chmod: changing permissions of '{}': {}", file, e));
            continue;
        }
        let Some(new) = Mode::of(vfs.permissions(&real)).apply(mode) else {
            continue;
        };
        if let Err(e) = vfs.set_permissions(&real, &new.to_string()) {
            errors.push(format!("chmod: changing permissions of '{}': {}", file, e));
        }
    }
    CommandResult::text(errors.join("\n"))
}

/// chattr - change file attributes
pub fn prog_chattr(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);
    let usage = "Usage: chattr [+-]i FILE...\nSet or clear the immutable attribute.";

    if let Some(help) = check_help(&args, usage) {
        return help;
    }

    let Some((spec, files)) = args.split_first().filter(|(_, f)| !f.is_empty()) else {
        return CommandResult::text(usage);
    };
    let on = match spec.chars().next() {
        Some('+') => true,
        Some('-') => false,
        _ => return CommandResult::text(usage),
    };
    let flags: Vec<char> = spec.chars().skip(1).collect();
    if flags.is_empty() || flags.iter().any(|f| *f != 'i') {
        return CommandResult::text(format!("chattr: invalid flag in '{}'", spec));
    }

    let root = world::is_root(vfs);
    let mut errors = Vec::new();
    for file in files {
        let path = inv.path(session, file);
        let Ok(real) = vfs.resolve_link(&path) else {
            errors.push(format!("chattr: No such file or directory while trying to stat {}", file));
            continue;
        };
        if !root || world::is_reserved(&real) || guard_read(vfs, &real).is_err() {
            errors.push(format!("chattr: Operation not permitted while setting flags on {}", file));
            continue;
        }
        if session.is_read_only(&real) {
            errors.push(format!("chattr: Read-only file system while setting flags on {}", file));
            continue;
        }
        log::debug!("[chattr] {}i {}", if on { '+' } else { '-' }, real);
        session.set_flag(&real, 'i', on);
    }
    CommandResult::text(errors.join("\n"))
}

fn attr_line(session: &Session, path: &str, shown: &str) -> String {
    let i = if session.is_immutable(path) { 'i' } else { '-' };
    format!("----{}--------- {}", i, shown)
}

/// lsattr - list file attributes
pub fn prog_lsattr(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: lsattr [PATH]...\nList file attributes.") {
        return help;
    }

    let (_, operands) = split_flags(&args);
    let targets = if operands.is_empty() { vec!["."] } else { operands };

    let mut lines = Vec::new();
    for target in targets {
        let path = inv.path(session, target);
        if vfs.get(&path).is_none() {
            lines.push(format!("lsattr: No such file or directory while trying to stat {}", target));
        } else if guard_read(vfs, &path).is_err() {
            lines.push(format!("lsattr: Permission denied while trying to stat {}", target));
        } else if vfs.is_dir(&path) {
            let real = vfs.resolve_link(&path).unwrap_or_else(|_| path.clone());
            for name in vfs.list_dir(&real).unwrap_or_default() {
                if name.starts_with('.') {
                    continue;
                }
                lines.push(attr_line(session, &join(&real, &name), &join(target, &name)));
            }
        } else {
            lines.push(attr_line(session, &path, target));
        }
    }
    CommandResult::text(lines.join("\n"))
}

/// setcap - set file capabilities
pub fn prog_setcap(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);
    let usage = "Usage: setcap CAPS FILE\n       setcap -r FILE\nSet or remove file capabilities.";

    if let Some(help) = check_help(&args, usage) {
        return help;
    }

    let (caps, file) = match args.as_slice() {
        ["-r", file] => (None, *file),
        [caps, file] if caps.starts_with("cap_") && (caps.contains('+') || caps.contains('=')) => {
            (Some(*caps), *file)
        }
        [caps, _] if !caps.starts_with('-') => {
            return CommandResult::text(format!("setcap: invalid capability '{}'", caps));
        }
        _ => return CommandResult::text(usage),
    };

    let path = inv.path(session, file);
    if !vfs.is_file(&path) {
        return CommandResult::text(format!("setcap: {}: No such file or directory", file));
    }
    if !world::is_root(vfs) {
        return CommandResult::text(format!("setcap: {}: Operation not permitted", file));
    }
    let real = vfs.resolve_link(&path).unwrap_or_else(|_| path.clone());
    if let Err(e) = guard_write(vfs, session, &path).and_then(|_| guard_write(vfs, session, &real)) {
        return CommandResult::text(format!("setcap: {}: {}", file, e));
    }

    let result = match caps {
        Some(caps) => vfs.set_xattr(&real, CAPABILITY_XATTR, caps),
        None => vfs.remove_xattr(&real, CAPABILITY_XATTR),
    };
    match result {
        Ok(()) => CommandResult::success(),
        Err(e) => CommandResult::text(format!("setcap: {}: {}", file, e)),
    }
}

/// getcap - print file capabilities
pub fn prog_getcap(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: getcap [-r] PATH...\nPrint file capabilities.\n  -r  Search directories recursively") {
        return help;
    }

    let (flags, operands) = split_flags(&args);
    if operands.is_empty() {
        return CommandResult::text("usage: getcap [-r] PATH...");
    }
    let recursive = flags.contains(&'r');

    let mut lines = Vec::new();
    for operand in operands {
        let path = inv.path(session, operand);
        if vfs.get(&path).is_none() {
            lines.push(format!("getcap: {}: No such file or directory", operand));
            continue;
        }
        let mut candidates = vec![(operand.to_string(), path.clone())];
        if recursive && vfs.is_dir(&path) {
            let base = operand.trim_end_matches('/');
            candidates.extend(vfs.descendants(&path).into_iter().map(|p| {
                let shown = format!("{}{}", base, &p[if path == "/" { 0 } else { path.len() }..]);
                (shown, p)
            }));
        }
        for (shown, p) in candidates {
            if !world::can_access(vfs, &p) || vfs.get(&p).is_some_and(|n| n.is_symlink()) {
                continue;
            }
            if let Some(cap) = vfs.xattrs(&p).and_then(|x| x.get(CAPABILITY_XATTR)) {
                lines.push(format!("{} {}", shown, cap));
            }
        }
    }
    CommandResult::text(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{mutate, read, root_world, world};
    use super::*;
    use crate::world::AUTH_LOG;

    // ============ chmod ============

    #[test]
    fn test_chmod_octal_and_symbolic() {
        let (mut vfs, mut session) = world();
        vfs.write_file("/home/ghost/tool", "x").unwrap();
        assert_eq!(mutate(prog_chmod, "chmod 4755 tool", &mut vfs, &mut session).output, "");
        assert_eq!(vfs.permissions("/home/ghost/tool"), Some("4755"));
        assert_eq!(mutate(prog_chmod, "chmod 644 tool", &mut vfs, &mut session).output, "");
        assert_eq!(vfs.permissions("/home/ghost/tool"), Some("0644"));
        assert_eq!(mutate(prog_chmod, "chmod +x tool", &mut vfs, &mut session).output, "");
        assert_eq!(vfs.permissions("/home/ghost/tool"), Some("0755"));
        assert_eq!(mutate(prog_chmod, "chmod -x tool", &mut vfs, &mut session).output, "");
        assert_eq!(vfs.permissions("/home/ghost/tool"), Some("0644"));
    }

    #[test]
    fn test_chmod_invalid_mode() {
        let (mut vfs, mut session) = world();
        assert_eq!(
            mutate(prog_chmod, "chmod 999 notes.txt", &mut vfs, &mut session).output,
            "chmod: invalid mode: '999'"
        );
        assert_eq!(mutate(prog_chmod, "chmod 755", &mut vfs, &mut session).output, "chmod: missing operand");
    }

    #[test]
    fn test_chmod_needs_ownership() {
        let (mut vfs, mut session) = world();
        assert_eq!(
            mutate(prog_chmod, "chmod u-s /opt/bin/vuln", &mut vfs, &mut session).output,
            "chmod: changing permissions of '/opt/bin/vuln': Operation not permitted"
        );
        assert_eq!(vfs.permissions("/opt/bin/vuln"), Some("4755"));
    }

    #[test]
    fn test_chmod_immutable_even_as_root() {
        let (mut vfs, mut session) = root_world();
        assert_eq!(
            mutate(prog_chmod, "chmod 600 /var/log/auth.log", &mut vfs, &mut session).output,
            "chmod: changing permissions of '/var/log/auth.log': Operation not permitted"
        );
    }

    // ============ chattr / lsattr ============

    #[test]
    fn test_chattr_requires_root() {
        let (mut vfs, mut session) = world();
        assert_eq!(
            mutate(prog_chattr, "chattr -i /var/log/auth.log", &mut vfs, &mut session).output,
            "chattr: Operation not permitted while setting flags on /var/log/auth.log"
        );
        assert!(session.is_immutable(AUTH_LOG));
    }

    #[test]
    fn test_chattr_toggles_immutable() {
        let (mut vfs, mut session) = root_world();
        assert_eq!(read(prog_lsattr, "lsattr /var/log/auth.log", &vfs, &session).output, "----i--------- /var/log/auth.log");
        assert_eq!(mutate(prog_chattr, "chattr -i /var/log/auth.log", &mut vfs, &mut session).output, "");
        assert!(!session.is_immutable(AUTH_LOG));
        assert_eq!(mutate(prog_chattr, "chattr +i notes.txt", &mut vfs, &mut session).output, "");
        assert!(session.is_immutable("/home/ghost/notes.txt"));
        assert!(mutate(prog_chattr, "chattr +a notes.txt", &mut vfs, &mut session).output.contains("invalid flag"));
    }

    #[test]
    fn test_lsattr_directory() {
        let (vfs, session) = world();
        let out = read(prog_lsattr, "lsattr /var/log", &vfs, &session).output;
        assert_eq!(out, "----i--------- /var/log/auth.log\n-------------- /var/log/syslog");
    }

    // ============ capabilities ============

    #[test]
    fn test_getcap() {
        let (vfs, session) = world();
        assert_eq!(read(prog_getcap, "getcap /opt/bin/ping", &vfs, &session).output, "/opt/bin/ping cap_net_raw+ep");
        assert_eq!(read(prog_getcap, "getcap -r /opt", &vfs, &session).output, "/opt/bin/ping cap_net_raw+ep");
        assert_eq!(read(prog_getcap, "getcap /opt/bin/vuln", &vfs, &session).output, "");
    }

    #[test]
    fn test_setcap_root_only() {
        let (mut vfs, mut session) = world();
        assert_eq!(
            mutate(prog_setcap, "setcap cap_setuid+ep /opt/bin/hello", &mut vfs, &mut session).output,
            "setcap: /opt/bin/hello: Operation not permitted"
        );
        crate::world::grant_root(&mut vfs);
        assert_eq!(mutate(prog_setcap, "setcap cap_setuid+ep /opt/bin/hello", &mut vfs, &mut session).output, "");
        assert_eq!(read(prog_getcap, "getcap /opt/bin/hello", &vfs, &session).output, "/opt/bin/hello cap_setuid+ep");
        assert_eq!(mutate(prog_setcap, "setcap -r /opt/bin/hello", &mut vfs, &mut session).output, "");
        assert_eq!(read(prog_getcap, "getcap /opt/bin/hello", &vfs, &session).output, "");
    }
}
