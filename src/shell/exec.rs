//! Executable runner
//!
//! Invocations whose name contains a `/` bypass the program registry and
//! land here. The file is checked like a kernel would (existence, type,
//! execute bit, `noexec` mounts) and its content decides what runs:
//! a shell script, one of the canned compiled programs, or nothing.

use super::executor::{Action, CommandResult, Invocation};
use super::parser::tokenize;
use super::programs::{escalate, guard_read};
use super::session::{LISTENER_PID, Session};
use crate::vfs::{Mode, Node, Vfs, VfsError};
use crate::world::{self, ELF_MAGIC, HOSTS};
use serde_json::json;

/// Size of the buffer the overflow binary copies its argument into
const OVERFLOW_BUFFER: usize = 64;

/// FIFO the listener program reads from
const LISTENER_FIFO: &str = "/tmp/ghostpipe";

const SHEBANGS: &[&str] = &["#!/bin/sh", "#!/bin/bash"];

/// Run the file named by `inv.name`
pub fn run(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let shown = inv.name;
    let fail = |msg: &str| CommandResult::text(format!("bash: {}: {}", shown, msg));

    let path = inv.path(session, shown);
    if let Err(e) = guard_read(vfs, &path) {
        return fail(e);
    }
    if !vfs.exists(&path) {
        return fail("No such file or directory");
    }
    let real = match vfs.resolve_link(&path) {
        Ok(real) => real,
        Err(VfsError::SymlinkLoop) => return fail("Too many levels of symbolic links"),
        Err(_) => return fail("No such file or directory"),
    };
    if let Err(e) = guard_read(vfs, &real) {
        return fail(e);
    }
    let mode = match vfs.get(&real) {
        None => return fail("No such file or directory"),
        Some(Node::Directory { .. }) => return fail("Is a directory"),
        Some(_) => Mode::of(vfs.permissions(&real)),
    };
    if !mode.owner_executable() {
        return fail("Permission denied");
    }
    let noexec = session
        .mountpoint_of(&real)
        .and_then(|mp| session.mount_options.get(mp))
        .is_some_and(|opts| opts.split(',').any(|o| o == "noexec"));
    if noexec {
        return fail("Permission denied");
    }

    let content = vfs.read_file(&real).unwrap_or_default().to_string();
    log::debug!("[exec] {}", real);

    if SHEBANGS.iter().any(|s| content.starts_with(s)) {
        return run_script(shown, &content);
    }
    if !content.starts_with(ELF_MAGIC) {
        return fail("cannot execute binary file: Exec format error");
    }
    let Some(tag) = program_tag(&content) else {
        return fail("cannot execute binary file: Exec format error");
    };

    let args: Vec<&str> = inv.args.iter().map(String::as_str).collect();
    match tag {
        "overflow" => overflow(&real, mode, &args, vfs),
        "suidcheck" => CommandResult::text(suidcheck(mode, vfs, session)),
        "fifo_reader" => fifo_reader(vfs, session),
        "hello" => CommandResult::text("Hello, world!"),
        "ping" => ping(&args),
        _ => fail("cannot execute binary file: Exec format error"),
    }
}

/// Canned program selected by a `[prog:NAME]` tag
fn program_tag(content: &str) -> Option<&str> {
    let start = content.find("[prog:")? + "[prog:".len();
    let len = content[start..].find(']')?;
    Some(&content[start..start + len])
}

/// Script mode: only `echo` is allowed
fn run_script(shown: &str, content: &str) -> CommandResult {
    let mut out = Vec::new();
    for (i, line) in content.lines().enumerate().skip(1) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens = tokenize(line);
        match tokens.split_first() {
            Some((cmd, rest)) if cmd == "echo" => out.push(rest.join(" ")),
            Some((cmd, _)) => out.push(format!("{}: line {}: {}: restricted shell", shown, i + 1, cmd)),
            None => {}
        }
    }
    CommandResult::text(out.join("\n"))
}

fn overflow(real: &str, mode: Mode, args: &[&str], vfs: &mut Vfs) -> CommandResult {
    let Some(name) = args.first() else {
        return CommandResult::text("usage: vuln NAME");
    };
    if name.len() <= OVERFLOW_BUFFER {
        return CommandResult::text(format!("Hello, {}", name));
    }
    if !mode.is_setuid() {
        return CommandResult::text("Segmentation fault (core dumped)");
    }

    log::info!("[exec] overflow in {} ({} bytes)", real, name.len());
    escalate(vfs);
    CommandResult::text(format!(
        "Hello, {}\n\x1b[1;31m*** saved return address overwritten ***\x1b[0m\nspawning /bin/sh with euid 0",
        &name[..OVERFLOW_BUFFER.min(name.len())]
    ))
    .with_action(Action::Overflow)
    .with_data(json!({
        "binary": real,
        "length": name.len(),
    }))
}

fn suidcheck(mode: Mode, vfs: &Vfs, session: &Session) -> String {
    let (uid, user) = if world::is_root(vfs) { (0, "root") } else { (1000, session.user()) };
    let (euid, euser) = if mode.is_setuid() { (0, "root") } else { (uid, user) };
    format!("uid={}({}) euid={}({})", uid, user, euid, euser)
}

fn fifo_reader(vfs: &Vfs, session: &mut Session) -> CommandResult {
    if !vfs.get(LISTENER_FIFO).is_some_and(Node::is_fifo) {
        return CommandResult::text(format!("listener: {}: No such file or directory", LISTENER_FIFO));
    }
    session.fifo_listeners.insert(LISTENER_FIFO.to_string());
    session.processes.toggle(LISTENER_PID, true);
    CommandResult::text(format!("listener: waiting for data on {}", LISTENER_FIFO))
}

fn ping(args: &[&str]) -> CommandResult {
    let Some(target) = args.iter().find(|a| !a.starts_with('-')) else {
        return CommandResult::text("ping: usage error: Destination address required");
    };
    let Some(host) = HOSTS.iter().find(|h| h.ip == *target || h.name == *target) else {
        return CommandResult::text(format!("ping: {}: Name or service not known", target));
    };
    CommandResult::text(format!(
        "PING {} ({}) 56(84) bytes of data.\n64 bytes from {}: icmp_seq=1 ttl=64 time=0.42 ms\n\n--- {} ping statistics ---\n1 packets transmitted, 1 received, 0% packet loss",
        host.name, host.ip, host.ip, host.name
    ))
}

#[cfg(test)]
mod tests {
    use super::super::programs::testing::{HOME, world};
    use super::*;
    use std::collections::BTreeMap;

    fn exec(line: &str, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
        exec_in(HOME, line, vfs, session)
    }

    fn exec_in(cwd: &str, line: &str, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
        let tokens = tokenize(line);
        let overlay = BTreeMap::new();
        let inv = Invocation {
            name: &tokens[0],
            cwd,
            args: &tokens[1..],
            stdin: None,
            overlay: &overlay,
            piped: false,
        };
        run(&inv, vfs, session)
    }

    #[test]
    fn test_overflow_escalates() {
        let (mut vfs, mut session) = world();
        let payload = "A".repeat(80);
        let r = exec_in("/opt/bin", &format!("./vuln {}", payload), &mut vfs, &mut session);
        assert_eq!(r.action, Some(Action::Overflow));
        assert!(world::is_root(&vfs));
        assert!(vfs.exists("/var/.mission/escalate"));
        assert_eq!(r.data.unwrap()["length"], 80);
    }

    #[test]
    fn test_overflow_short_and_without_setuid() {
        let (mut vfs, mut session) = world();
        assert_eq!(exec("/opt/bin/vuln neo", &mut vfs, &mut session).output, "Hello, neo");
        assert_eq!(exec("/opt/bin/vuln", &mut vfs, &mut session).output, "usage: vuln NAME");

        vfs.copy_file("/opt/bin/vuln", "/home/ghost/vuln").unwrap();
        vfs.set_permissions("/home/ghost/vuln", "0755").unwrap();
        let payload = "A".repeat(65);
        let r = exec(&format!("./vuln {}", payload), &mut vfs, &mut session);
        assert_eq!(r.output, "Segmentation fault (core dumped)");
        assert!(!world::is_root(&vfs));
    }

    #[test]
    fn test_execute_bit_and_types() {
        let (mut vfs, mut session) = world();
        assert_eq!(exec("./README.txt", &mut vfs, &mut session).output, "bash: ./README.txt: Permission denied");
        assert_eq!(exec("/tmp", &mut vfs, &mut session).output, "bash: /tmp: Is a directory");
        assert_eq!(exec("./nope", &mut vfs, &mut session).output, "bash: ./nope: No such file or directory");

        vfs.write_file("/home/ghost/blob", "just data").unwrap();
        vfs.set_permissions("/home/ghost/blob", "0755").unwrap();
        assert_eq!(
            exec("./blob", &mut vfs, &mut session).output,
            "bash: ./blob: cannot execute binary file: Exec format error"
        );
    }

    #[test]
    fn test_symlinks() {
        let (mut vfs, mut session) = world();
        vfs.symlink("/opt/bin/hello", "/home/ghost/hi").unwrap();
        assert_eq!(exec("./hi", &mut vfs, &mut session).output, "Hello, world!");
        vfs.symlink("/nowhere", "/home/ghost/dangling").unwrap();
        assert_eq!(exec("./dangling", &mut vfs, &mut session).output, "bash: ./dangling: No such file or directory");
    }

    #[test]
    fn test_script_mode() {
        let (mut vfs, mut session) = world();
        let out = exec("/opt/bin/backup.sh", &mut vfs, &mut session).output;
        assert_eq!(
            out,
            "starting backup of /etc\n/opt/bin/backup.sh: line 4: rsync: restricted shell\nbackup finished"
        );
    }

    #[test]
    fn test_suidcheck() {
        let (mut vfs, mut session) = world();
        assert_eq!(exec("/opt/bin/suidcheck", &mut vfs, &mut session).output, "uid=1000(ghost) euid=0(root)");
        assert_eq!(exec("/opt/bin/hello", &mut vfs, &mut session).output, "Hello, world!");
    }

    #[test]
    fn test_listener_registers_on_fifo() {
        let (mut vfs, mut session) = world();
        let out = exec("/opt/bin/listener", &mut vfs, &mut session).output;
        assert!(out.contains("/tmp/ghostpipe"));
        assert!(session.fifo_listeners.contains("/tmp/ghostpipe"));
        assert!(session.processes.is_running(LISTENER_PID));
    }

    #[test]
    fn test_ping_ignores_capabilities() {
        let (mut vfs, mut session) = world();
        assert!(exec("/opt/bin/ping nexus", &mut vfs, &mut session).output.starts_with("PING nexus (10.0.13.37)"));
        vfs.remove_xattr("/opt/bin/ping", "security.capability").unwrap();
        assert!(exec("/opt/bin/ping 10.0.13.66", &mut vfs, &mut session).output.starts_with("PING dropzone"));
        assert!(exec("/opt/bin/ping mars", &mut vfs, &mut session).output.contains("Name or service not known"));
    }

    #[test]
    fn test_noexec_mount() {
        let (mut vfs, mut session) = world();
        session.mount_options.insert("/mnt/backup".into(), "ro,noexec".into());
        vfs.create_node("/mnt/backup/tool", Node::file_with_mode(format!("{}\n[prog:hello]", ELF_MAGIC), "0755")).unwrap();
        assert_eq!(exec("/mnt/backup/tool", &mut vfs, &mut session).output, "bash: /mnt/backup/tool: Permission denied");
    }
}
