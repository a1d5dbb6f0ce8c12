//! Shell utility programs
//!
//! Environment, aliases, history and the session-level commands that talk
//! to the presentation layer (clear, disconnect, reset).

use super::{args_to_strs, check_help};
use crate::mission::{self, OBJECTIVES};
use crate::shell::executor::{Action, CommandResult, Invocation, ProgramRegistry};
use crate::shell::parser::is_assignment;
use crate::shell::session::Session;
use crate::vfs::Vfs;
use serde_json::json;

/// export - set environment variables
pub fn prog_export(inv: &Invocation, _vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: export [NAME=VALUE]...\nSet environment variables; with no arguments list them.") {
        return help;
    }

    let args: Vec<&str> = args.into_iter().filter(|a| *a != "-p").collect();
    if args.is_empty() {
        let lines: Vec<String> = session
            .env
            .iter()
            .map(|(k, v)| format!("declare -x {}=\"{}\"", k, v))
            .collect();
        return CommandResult::text(lines.join("\n"));
    }

    let mut errors = Vec::new();
    for arg in args {
        if is_assignment(arg) {
            if let Some((name, value)) = arg.split_once('=') {
                session.set_env(name, value);
            }
        } else if !is_assignment(&format!("{}=", arg)) {
            errors.push(format!("export: `{}': not a valid identifier", arg));
        }
    }
    CommandResult::text(errors.join("\n"))
}

/// unset - remove environment variables
pub fn prog_unset(inv: &Invocation, _vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: unset NAME...\nRemove environment variables.") {
        return help;
    }

    for name in args {
        session.unset_env(name);
    }
    CommandResult::success()
}

/// env - print the environment of this invocation
pub fn prog_env(inv: &Invocation, _vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: env\nPrint the environment.") {
        return help;
    }

    let mut env = session.env.clone();
    env.extend(inv.overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    let lines: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    CommandResult::text(lines.join("\n"))
}

/// alias - define or display aliases
pub fn prog_alias(inv: &Invocation, _vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: alias [NAME[=VALUE]]...\nDefine or display aliases.") {
        return help;
    }

    if args.is_empty() {
        let lines: Vec<String> = session
            .aliases
            .iter()
            .map(|(name, value)| format!("alias {}='{}'", name, value))
            .collect();
        return CommandResult::text(lines.join("\n"));
    }

    let mut out = Vec::new();
    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) if !name.is_empty() => session.set_alias(name, value),
            Some(_) => out.push(format!("alias: `{}': invalid alias name", arg)),
            None => match session.get_alias(arg) {
                Some(value) => out.push(format!("alias {}='{}'", arg, value)),
                None => out.push(format!("alias: {}: not found", arg)),
            },
        }
    }
    CommandResult::text(out.join("\n"))
}

/// unalias - remove aliases
pub fn prog_unalias(inv: &Invocation, _vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: unalias [-a] NAME...\nRemove aliases.") {
        return help;
    }

    if args.first() == Some(&"-a") {
        session.aliases.clear();
        return CommandResult::success();
    }
    if args.is_empty() {
        return CommandResult::text("unalias: usage: unalias [-a] name [name ...]");
    }

    let errors: Vec<String> = args
        .into_iter()
        .filter(|name| !session.unalias(name))
        .map(|name| format!("unalias: {}: not found", name))
        .collect();
    CommandResult::text(errors.join("\n"))
}

/// history - display command history
pub fn prog_history(inv: &Invocation, _vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: history [N]\nDisplay the last N commands.") {
        return help;
    }

    let count: Option<usize> = args.first().and_then(|a| a.parse().ok());
    let start = match count {
        Some(n) => session.history.len().saturating_sub(n),
        None => 0,
    };

    let lines: Vec<String> = session
        .history
        .iter()
        .enumerate()
        .skip(start)
        .map(|(i, cmd)| format!("{:5}  {}", i + 1, cmd))
        .collect();
    CommandResult::text(lines.join("\n"))
}

/// help - list available commands
pub fn prog_help(inv: &Invocation, _vfs: &Vfs, _session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: help\nList available commands. Most accept --help.") {
        return help;
    }

    let registry = ProgramRegistry::new();
    let names = registry.list();
    let mut out = String::from("Available commands:\n");
    for row in names.chunks(8) {
        let line: Vec<String> = row.iter().map(|n| format!("{:<10}", n)).collect();
        out.push_str("  ");
        out.push_str(line.concat().trim_end());
        out.push('\n');
    }
    out.push_str("Run ./PROGRAM to execute a file. Type 'status' for mission progress.");
    CommandResult::text(out)
}

/// status - mission progress panel
pub fn prog_status(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: status\nShow mission objectives and progress.") {
        return help;
    }

    CommandResult::text(mission::render(vfs, session))
}

/// clear - clear the terminal screen
pub fn prog_clear(_inv: &Invocation, _vfs: &mut Vfs, _session: &mut Session) -> CommandResult {
    CommandResult::success().with_action(Action::Clear)
}

/// disconnect - end the operation once every objective is done
pub fn prog_disconnect(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: disconnect\nLeave the target once the mission is complete.") {
        return help;
    }

    let progress = mission::evaluate(vfs, session);
    if progress.is_complete() {
        log::info!("[mission] disconnect with rank {}", progress.rank.as_str());
        return CommandResult::text(format!(
            "Connection to nexus closed.\nMission complete. Rank: {}. Alert level: {}.",
            progress.rank.as_str(),
            session.alert_level
        ))
        .with_action(Action::Disconnect)
        .with_data(json!({
            "rank": progress.rank,
            "percent": progress.percent,
            "alertLevel": session.alert_level,
        }));
    }

    let mut out = String::from("disconnect: objectives remaining:");
    for objective in OBJECTIVES.iter().filter(|o| !o.is_complete(vfs, session)) {
        out.push_str(&format!("\n  [ ] {}", objective.title));
    }
    CommandResult::text(out)
}

/// reset - wipe the machine back to its initial state
pub fn prog_reset(inv: &Invocation, _vfs: &mut Vfs, _session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: reset --hard\nRestore the initial world. All progress is lost.") {
        return help;
    }

    if args.first() != Some(&"--hard") {
        return CommandResult::text("reset: this erases all progress; run 'reset --hard' to confirm");
    }
    CommandResult::text("Machine restored to its initial state.").with_action(Action::Reset)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{mutate, read, world};
    use super::*;
    use crate::mission::DECRYPT_THRESHOLD;
    use std::collections::BTreeMap;

    #[test]
    fn test_export_and_unset() {
        let (mut vfs, mut session) = world();
        assert_eq!(mutate(prog_export, "export TARGET=10.0.13.37", &mut vfs, &mut session).output, "");
        assert_eq!(session.get_env("TARGET"), Some("10.0.13.37"));
        assert!(mutate(prog_export, "export", &mut vfs, &mut session).output.contains("declare -x TARGET=\"10.0.13.37\""));
        assert_eq!(
            mutate(prog_export, "export 1x=y", &mut vfs, &mut session).output,
            "export: `1x=y': not a valid identifier"
        );
        mutate(prog_unset, "unset TARGET", &mut vfs, &mut session);
        assert_eq!(session.get_env("TARGET"), None);
    }

    #[test]
    fn test_env_includes_overlay() {
        let (vfs, session) = world();
        let tokens: Vec<String> = Vec::new();
        let mut overlay = BTreeMap::new();
        overlay.insert("GREETING".to_string(), "hi".to_string());
        let inv = Invocation {
            name: "env",
            cwd: "/",
            args: &tokens,
            stdin: None,
            overlay: &overlay,
            piped: true,
        };
        let out = prog_env(&inv, &vfs, &session).output;
        assert!(out.contains("GREETING=hi"));
        assert!(out.contains("USER=ghost"));
    }

    #[test]
    fn test_alias_forms() {
        let (mut vfs, mut session) = world();
        assert!(mutate(prog_alias, "alias", &mut vfs, &mut session).output.contains("alias ll='ls -l'"));
        mutate(prog_alias, "alias gs='grep secret'", &mut vfs, &mut session);
        assert_eq!(session.get_alias("gs"), Some("grep secret"));
        assert_eq!(mutate(prog_alias, "alias gs", &mut vfs, &mut session).output, "alias gs='grep secret'");
        assert_eq!(mutate(prog_alias, "alias nope", &mut vfs, &mut session).output, "alias: nope: not found");
    }

    #[test]
    fn test_unalias() {
        let (mut vfs, mut session) = world();
        assert_eq!(mutate(prog_unalias, "unalias ll", &mut vfs, &mut session).output, "");
        assert_eq!(mutate(prog_unalias, "unalias ll", &mut vfs, &mut session).output, "unalias: ll: not found");
        mutate(prog_unalias, "unalias -a", &mut vfs, &mut session);
        assert!(session.aliases.is_empty());
    }

    #[test]
    fn test_history() {
        let (vfs, mut session) = world();
        session.history = vec!["ls".into(), "pwd".into(), "history 2".into()];
        assert_eq!(read(prog_history, "history 2", &vfs, &session).output, "    2  pwd\n    3  history 2");
    }

    #[test]
    fn test_help_lists_commands() {
        let (vfs, session) = world();
        let out = read(prog_help, "help", &vfs, &session).output;
        assert!(out.starts_with("Available commands:"));
        for name in ["nmap", "john", "sudo", "tar"] {
            assert!(out.contains(name));
        }
    }

    #[test]
    fn test_status_panel() {
        let (vfs, session) = world();
        let out = read(prog_status, "status", &vfs, &session).output;
        assert!(out.contains("0%"));
        assert!(out.contains("Map the target network"));
    }

    #[test]
    fn test_clear_and_reset_actions() {
        let (mut vfs, mut session) = world();
        assert_eq!(mutate(prog_clear, "clear", &mut vfs, &mut session).action, Some(Action::Clear));
        let r = mutate(prog_reset, "reset", &mut vfs, &mut session);
        assert_eq!(r.action, None);
        assert_eq!(mutate(prog_reset, "reset --hard", &mut vfs, &mut session).action, Some(Action::Reset));
    }

    #[test]
    fn test_disconnect() {
        let (mut vfs, mut session) = world();
        let r = mutate(prog_disconnect, "disconnect", &mut vfs, &mut session);
        assert_eq!(r.action, None);
        assert!(r.output.contains("[ ] Cover your tracks"));

        for o in OBJECTIVES {
            mission::mark(&mut vfs, o.id);
        }
        session.decrypt_count = DECRYPT_THRESHOLD;
        let r = mutate(prog_disconnect, "disconnect", &mut vfs, &mut session);
        assert_eq!(r.action, Some(Action::Disconnect));
        assert_eq!(r.data.unwrap()["rank"], "Ghost");
    }
}
