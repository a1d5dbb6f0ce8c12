//! System information and kernel programs

use super::{args_to_strs, check_help, guard_read, split_flags};
use crate::mission;
use crate::shell::executor::{CommandResult, Invocation};
use crate::shell::session::{ROOTKIT_PID, Session};
use crate::vfs::Vfs;
use crate::world::{self, ROOTKIT_MODULE};

const KERNEL_RELEASE: &str = "6.1.0-ghost";

/// id - print user identity
pub fn prog_id(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: id\nPrint user and group information.") {
        return help;
    }

    let (uid, name) = if world::is_root(vfs) { (0, "root") } else { (1000, session.user()) };
    CommandResult::text(format!("uid={0}({1}) gid={0}({1}) groups={0}({1})", uid, name))
}

/// whoami - print effective user name
pub fn prog_whoami(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: whoami\nPrint effective user name.") {
        return help;
    }

    if world::is_root(vfs) {
        CommandResult::text("root")
    } else {
        CommandResult::text(session.user())
    }
}

fn hostname(inv: &Invocation, session: &Session) -> String {
    inv.env(session, "HOSTNAME").unwrap_or_else(|| "localhost".to_string())
}

/// hostname - show system hostname
pub fn prog_hostname(inv: &Invocation, _vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: hostname\nShow the system hostname.") {
        return help;
    }

    CommandResult::text(hostname(inv, session))
}

/// uname - print system information
pub fn prog_uname(inv: &Invocation, _vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: uname [-asnrm]\nPrint system information.") {
        return help;
    }

    let (flags, _) = split_flags(&args);
    let host = hostname(inv, session);
    if flags.contains(&'a') {
        return CommandResult::text(format!("Linux {} {} #1 SMP x86_64 GNU/Linux", host, KERNEL_RELEASE));
    }

    let mut parts = Vec::new();
    for flag in flags {
        match flag {
            's' => parts.push("Linux".to_string()),
            'n' => parts.push(host.clone()),
            'r' => parts.push(KERNEL_RELEASE.to_string()),
            'm' => parts.push("x86_64".to_string()),
            other => return CommandResult::text(format!("uname: invalid option -- '{}'", other)),
        }
    }
    if parts.is_empty() {
        parts.push("Linux".to_string());
    }
    CommandResult::text(parts.join(" "))
}

/// Broken-down UTC time
struct Civil {
    year: i64,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    weekday: usize,
}

/// Convert seconds since the epoch to a UTC calendar date
fn civil(secs: i64) -> Civil {
    let days = secs.div_euclid(86_400);
    let rem = secs.rem_euclid(86_400);

    // Days-to-civil over 400-year eras, March-based years
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);

    Civil {
        year,
        month,
        day,
        hour: (rem / 3600) as u32,
        minute: (rem % 3600 / 60) as u32,
        second: (rem % 60) as u32,
        // 1970-01-01 was a Thursday
        weekday: (days + 4).rem_euclid(7) as usize,
    }
}

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const MONTHS: [&str; 12] = ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];

fn format_date(secs: i64, format: Option<&str>) -> String {
    let t = civil(secs);
    let Some(format) = format else {
        return format!(
            "{} {} {:>2} {:02}:{:02}:{:02} UTC {}",
            WEEKDAYS[t.weekday],
            MONTHS[(t.month - 1) as usize],
            t.day,
            t.hour,
            t.minute,
            t.second,
            t.year
        );
    };

    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('Y') => out.push_str(&t.year.to_string()),
            Some('m') => out.push_str(&format!("{:02}", t.month)),
            Some('d') => out.push_str(&format!("{:02}", t.day)),
            Some('H') => out.push_str(&format!("{:02}", t.hour)),
            Some('M') => out.push_str(&format!("{:02}", t.minute)),
            Some('S') => out.push_str(&format!("{:02}", t.second)),
            Some('s') => out.push_str(&secs.to_string()),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

/// Parse a relative adjustment such as `+1d`, `+6h` or `+90s`
fn parse_offset(spec: &str) -> Option<i64> {
    let body = spec.strip_prefix('+')?;
    let unit = body.chars().last()?;
    let scale = match unit {
        'd' => 86_400,
        'h' => 3600,
        'm' => 60,
        's' => 1,
        _ => return None,
    };
    let n: i64 = body[..body.len() - 1].parse().ok()?;
    (n >= 0).then_some(n * scale)
}

/// date - print or adjust the system clock
pub fn prog_date(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: date [+FORMAT]\n       date -s +N[d|h|m|s]\nPrint or move forward the system clock.") {
        return help;
    }

    match args.as_slice() {
        [] => CommandResult::text(format_date(session.now_secs(), None)),
        [format] if format.starts_with('+') => CommandResult::text(format_date(session.now_secs(), Some(&format[1..]))),
        ["-s", spec] => {
            if !world::is_root(vfs) {
                return CommandResult::text("date: cannot set date: Operation not permitted");
            }
            let Some(offset) = parse_offset(spec) else {
                return CommandResult::text(format!("date: invalid date '{}'", spec));
            };
            session.clock_offset += offset;
            log::info!("[date] clock offset now {}s", session.clock_offset);
            CommandResult::text(format_date(session.now_secs(), None))
        }
        _ => CommandResult::text(format!("date: invalid date '{}'", args.join(" "))),
    }
}

/// Module name embedded in a kernel object
fn module_name(content: &str) -> Option<&str> {
    let start = content.find("[module:")? + "[module:".len();
    let len = content[start..].find(']')?;
    Some(&content[start..start + len])
}

/// insmod - load a kernel module
pub fn prog_insmod(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: insmod FILE.ko\nLoad a kernel module.") {
        return help;
    }

    let Some(file) = args.first() else {
        return CommandResult::text("insmod: ERROR: missing filename.");
    };
    if !world::is_root(vfs) {
        return CommandResult::text(format!("insmod: ERROR: could not insert module {}: Operation not permitted", file));
    }
    let path = inv.path(session, file);
    if let Err(e) = guard_read(vfs, &path) {
        return CommandResult::text(format!("insmod: ERROR: could not load module {}: {}", file, e));
    }
    let content = match vfs.read_file(&path) {
        Ok(content) => content,
        Err(e) => return CommandResult::text(format!("insmod: ERROR: could not load module {}: {}", file, e)),
    };
    let Some(name) = module_name(content).map(String::from) else {
        return CommandResult::text(format!("insmod: ERROR: could not insert module {}: Invalid module format", file));
    };
    if session.modules.contains(&name) {
        return CommandResult::text(format!("insmod: ERROR: could not insert module {}: File exists", file));
    }

    log::info!("[kernel] module {} loaded", name);
    if name == ROOTKIT_MODULE {
        session.processes.toggle(ROOTKIT_PID, true);
        mission::mark(vfs, "persist");
    }
    session.modules.push(name);
    CommandResult::success()
}

/// rmmod - unload a kernel module
pub fn prog_rmmod(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: rmmod NAME\nUnload a kernel module.") {
        return help;
    }

    let Some(arg) = args.first() else {
        return CommandResult::text("rmmod: ERROR: missing module name.");
    };
    let name = arg.trim_end_matches(".ko");
    if !world::is_root(vfs) {
        return CommandResult::text(format!("rmmod: ERROR: could not remove '{}': Operation not permitted", name));
    }
    let Some(pos) = session.modules.iter().position(|m| m == name) else {
        return CommandResult::text(format!("rmmod: ERROR: Module {} is not currently loaded", name));
    };
    session.modules.remove(pos);
    if name == ROOTKIT_MODULE {
        session.processes.toggle(ROOTKIT_PID, false);
    }
    log::info!("[kernel] module {} unloaded", name);
    CommandResult::success()
}

/// lsmod - list loaded modules
pub fn prog_lsmod(inv: &Invocation, _vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: lsmod\nShow loaded kernel modules.") {
        return help;
    }

    let mut lines = vec![format!("{:<24}{:>6}  Used by", "Module", "Size")];
    for name in &session.modules {
        lines.push(format!("{:<24}{:>6}  0", name, 16384));
    }
    CommandResult::text(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{mutate, read, root_world, world};
    use super::*;

    #[test]
    fn test_identity() {
        let (vfs, session) = world();
        assert_eq!(read(prog_whoami, "whoami", &vfs, &session).output, "ghost");
        assert_eq!(read(prog_id, "id", &vfs, &session).output, "uid=1000(ghost) gid=1000(ghost) groups=1000(ghost)");

        let (vfs, session) = root_world();
        assert_eq!(read(prog_whoami, "whoami", &vfs, &session).output, "root");
        assert_eq!(read(prog_id, "id", &vfs, &session).output, "uid=0(root) gid=0(root) groups=0(root)");
    }

    #[test]
    fn test_uname_and_hostname() {
        let (vfs, session) = world();
        assert_eq!(read(prog_uname, "uname", &vfs, &session).output, "Linux");
        assert_eq!(read(prog_uname, "uname -a", &vfs, &session).output, "Linux nexus 6.1.0-ghost #1 SMP x86_64 GNU/Linux");
        assert_eq!(read(prog_uname, "uname -sr", &vfs, &session).output, "Linux 6.1.0-ghost");
        assert_eq!(read(prog_hostname, "hostname", &vfs, &session).output, "nexus");
    }

    #[test]
    fn test_civil_dates() {
        let t = civil(0);
        assert_eq!((t.year, t.month, t.day, t.weekday), (1970, 1, 1, 4));
        let t = civil(951_782_400);
        assert_eq!((t.year, t.month, t.day), (2000, 2, 29));
    }

    #[test]
    fn test_date_output() {
        let (mut vfs, mut session) = world();
        assert_eq!(mutate(prog_date, "date", &mut vfs, &mut session).output, "Thu Jan  1 00:00:00 UTC 2026");
        assert_eq!(mutate(prog_date, "date +%Y-%m-%d", &mut vfs, &mut session).output, "2026-01-01");
        assert_eq!(mutate(prog_date, "date +%s", &mut vfs, &mut session).output, "1767225600");
    }

    #[test]
    fn test_date_set_requires_root() {
        let (mut vfs, mut session) = world();
        assert_eq!(
            mutate(prog_date, "date -s +1d", &mut vfs, &mut session).output,
            "date: cannot set date: Operation not permitted"
        );
        assert_eq!(session.clock_offset, 0);

        let (mut vfs, mut session) = root_world();
        assert_eq!(mutate(prog_date, "date -s +1d", &mut vfs, &mut session).output, "Fri Jan  2 00:00:00 UTC 2026");
        assert_eq!(session.clock_offset, 86_400);
        assert!(mutate(prog_date, "date -s tomorrow", &mut vfs, &mut session).output.contains("invalid date"));
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("+2h"), Some(7200));
        assert_eq!(parse_offset("+90s"), Some(90));
        assert_eq!(parse_offset("-1d"), None);
        assert_eq!(parse_offset("+xd"), None);
    }

    #[test]
    fn test_insmod_rootkit() {
        let (mut vfs, mut session) = root_world();
        vfs.write_file("/tmp/rk.ko", "\x7fELF kernel module\n[module:ghost_rk]").unwrap();
        assert_eq!(mutate(prog_insmod, "insmod /tmp/rk.ko", &mut vfs, &mut session).output, "");
        assert_eq!(session.modules, vec!["ghost_rk".to_string()]);
        assert!(session.processes.is_running(ROOTKIT_PID));
        assert!(vfs.exists("/var/.mission/persist"));
        assert!(mutate(prog_insmod, "insmod /tmp/rk.ko", &mut vfs, &mut session).output.ends_with("File exists"));
        assert!(read(prog_lsmod, "lsmod", &vfs, &session).output.contains("ghost_rk"));

        assert_eq!(mutate(prog_rmmod, "rmmod ghost_rk", &mut vfs, &mut session).output, "");
        assert!(session.modules.is_empty());
        assert!(!session.processes.is_running(ROOTKIT_PID));
        assert!(vfs.exists("/var/.mission/persist"));
        assert!(mutate(prog_rmmod, "rmmod ghost_rk", &mut vfs, &mut session).output.contains("not currently loaded"));
    }

    #[test]
    fn test_insmod_refusals() {
        let (mut vfs, mut session) = world();
        vfs.write_file("/tmp/rk.ko", "[module:ghost_rk]").unwrap();
        assert!(mutate(prog_insmod, "insmod /tmp/rk.ko", &mut vfs, &mut session).output.ends_with("Operation not permitted"));

        let (mut vfs, mut session) = root_world();
        vfs.write_file("/tmp/plain.ko", "just text").unwrap();
        assert!(mutate(prog_insmod, "insmod /tmp/plain.ko", &mut vfs, &mut session).output.ends_with("Invalid module format"));
        assert!(mutate(prog_insmod, "insmod /tmp/none.ko", &mut vfs, &mut session).output.ends_with("No such file or directory"));
    }
}
