//! Process and job control programs
//!
//! ps, jobs, kill

use super::{args_to_strs, check_help};
use crate::shell::executor::{CommandResult, Invocation};
use crate::shell::session::{JobStatus, LISTENER_PID, Session};
use crate::vfs::Vfs;
use crate::world;

/// ps - report a snapshot of the current processes
pub fn prog_ps(inv: &Invocation, _vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: ps [aux]\nReport a snapshot of the current processes.") {
        return help;
    }

    let mut rows: Vec<(u32, &str, &str)> = session
        .processes
        .list()
        .into_iter()
        .map(|p| (p.pid, p.user, p.command))
        .collect();
    rows.extend(
        session
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Running)
            .map(|j| (j.pid, session.user(), j.command.as_str())),
    );
    rows.sort_by_key(|(pid, ..)| *pid);

    let mut out = vec![format!("{:>5} {:<8} COMMAND", "PID", "USER")];
    out.extend(rows.iter().map(|(pid, user, cmd)| format!("{:>5} {:<8} {}", pid, user, cmd)));
    CommandResult::text(out.join("\n"))
}

/// jobs - list background jobs
pub fn prog_jobs(inv: &Invocation, _vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: jobs\nList background jobs.") {
        return help;
    }

    let count = session.jobs.len();
    let lines: Vec<String> = session
        .jobs
        .iter()
        .enumerate()
        .map(|(i, job)| {
            let marker = if i + 1 == count {
                '+'
            } else if i + 2 == count {
                '-'
            } else {
                ' '
            };
            let status = match job.status {
                JobStatus::Running => "Running",
                JobStatus::Done => "Done",
            };
            format!("[{}]{}  {:<8} {} &", job.id, marker, status, job.command)
        })
        .collect();
    CommandResult::text(lines.join("\n"))
}

/// kill - send a signal to a process or job
pub fn prog_kill(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: kill [-SIGNAL] PID|%JOB...\nTerminate processes or background jobs.") {
        return help;
    }

    // The signal is irrelevant: every kill terminates
    let targets: Vec<&str> = args.into_iter().filter(|a| !a.starts_with('-')).collect();
    if targets.is_empty() {
        return CommandResult::text("kill: usage: kill [-s sigspec] pid | %jobspec ...");
    }

    let root = world::is_root(vfs);
    let mut errors = Vec::new();
    for target in targets {
        if let Some(spec) = target.strip_prefix('%') {
            let before = session.jobs.len();
            session.jobs.retain(|j| spec.parse::<u32>().ok() != Some(j.id));
            if session.jobs.len() == before {
                errors.push(format!("kill: {}: no such job", target));
            }
            continue;
        }

        let Ok(pid) = target.parse::<u32>() else {
            errors.push(format!("kill: {}: arguments must be process or job IDs", target));
            continue;
        };
        if let Some(pos) = session.jobs.iter().position(|j| j.pid == pid) {
            session.jobs.remove(pos);
            continue;
        }
        let Some(entry) = session.processes.list().into_iter().find(|p| p.pid == pid) else {
            errors.push(format!("kill: ({}) - No such process", pid));
            continue;
        };
        if pid == 1 || (entry.user == "root" && !root) {
            errors.push(format!("kill: ({}) - Operation not permitted", pid));
            continue;
        }
        log::debug!("[kill] {} ({})", pid, entry.command);
        session.processes.kill(pid);
        if pid == LISTENER_PID {
            session.fifo_listeners.clear();
        }
    }
    CommandResult::text(errors.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{mutate, read, root_world, world};
    use super::*;

    #[test]
    fn test_ps_lists_static_processes_and_jobs() {
        let (vfs, mut session) = world();
        session.add_job("sleep 100");
        let out = read(prog_ps, "ps", &vfs, &session).output;
        assert!(out.starts_with("  PID USER     COMMAND"));
        assert!(out.contains("    1 root     /sbin/init"));
        assert!(out.contains(" 4243 ghost    sleep 100"));
        assert!(!out.contains("ghost_rk"));
    }

    #[test]
    fn test_jobs_markers() {
        let (vfs, mut session) = world();
        assert_eq!(read(prog_jobs, "jobs", &vfs, &session).output, "");
        session.add_job("a");
        session.add_job("b");
        assert_eq!(
            read(prog_jobs, "jobs", &vfs, &session).output,
            "[1]-  Running  a &\n[2]+  Running  b &"
        );
    }

    #[test]
    fn test_kill_job_by_spec_and_pid() {
        let (mut vfs, mut session) = world();
        session.add_job("a");
        session.add_job("b");
        assert_eq!(mutate(prog_kill, "kill %1", &mut vfs, &mut session).output, "");
        assert_eq!(mutate(prog_kill, "kill -9 4244", &mut vfs, &mut session).output, "");
        assert!(session.jobs.is_empty());
        assert_eq!(mutate(prog_kill, "kill %7", &mut vfs, &mut session).output, "kill: %7: no such job");
    }

    #[test]
    fn test_kill_permissions() {
        let (mut vfs, mut session) = world();
        assert_eq!(mutate(prog_kill, "kill 311", &mut vfs, &mut session).output, "kill: (311) - Operation not permitted");
        assert_eq!(mutate(prog_kill, "kill 9999", &mut vfs, &mut session).output, "kill: (9999) - No such process");
        assert_eq!(mutate(prog_kill, "kill abc", &mut vfs, &mut session).output, "kill: abc: arguments must be process or job IDs");

        let (mut vfs, mut session) = root_world();
        assert_eq!(mutate(prog_kill, "kill 1", &mut vfs, &mut session).output, "kill: (1) - Operation not permitted");
        assert_eq!(mutate(prog_kill, "kill 311", &mut vfs, &mut session).output, "");
        assert!(!session.processes.is_running(311));
    }

    #[test]
    fn test_kill_listener_stops_reading() {
        let (mut vfs, mut session) = world();
        session.processes.toggle(LISTENER_PID, true);
        session.fifo_listeners.insert("/tmp/ghostpipe".to_string());
        assert_eq!(mutate(prog_kill, "kill 1402", &mut vfs, &mut session).output, "");
        assert!(session.fifo_listeners.is_empty());
        assert!(!session.processes.is_running(LISTENER_PID));
    }
}
