//! User switching programs

use super::{args_to_strs, check_help, escalate, with_alert};
use crate::shell::executor::{CommandResult, Invocation};
use crate::shell::session::Session;
use crate::vfs::Vfs;
use crate::world::{self, ROOT_PASSWORD};

/// su - switch user
pub fn prog_su(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: su [-] [USER] [PASSWORD]\nSwitch user. Defaults to root.") {
        return help;
    }

    // Login-shell flags change nothing here
    let operands: Vec<&str> = args
        .into_iter()
        .filter(|a| !matches!(*a, "-" | "-l" | "--login"))
        .collect();
    let target = operands.first().copied().unwrap_or("root");
    let password = operands.get(1).copied();

    if target == session.user() {
        if world::is_root(vfs) {
            log::info!("[su] back to {}", target);
            world::drop_root(vfs);
        }
        return CommandResult::success();
    }
    if target != "root" {
        return CommandResult::text(format!("su: user {} does not exist", target));
    }
    if world::is_root(vfs) {
        return CommandResult::success();
    }

    match password {
        Some(p) if p == ROOT_PASSWORD => {
            log::info!("[su] root session opened");
            escalate(vfs);
            CommandResult::success()
        }
        Some(_) => {
            session.raise_alert(1);
            with_alert(CommandResult::text("su: Authentication failure"), session)
        }
        None => CommandResult::text("Password: \nsu: a password is required (su root PASSWORD)"),
    }
}

/// exit / logout - leave the root shell
pub fn prog_exit(inv: &Invocation, vfs: &mut Vfs, _session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: exit\nLeave the current root shell.") {
        return help;
    }

    if !world::is_root(vfs) {
        return CommandResult::text(format!("{}: no nested shell to leave (try 'disconnect')", inv.name));
    }
    world::drop_root(vfs);
    CommandResult::text("logout")
}

#[cfg(test)]
mod tests {
    use super::super::testing::{mutate, root_world, world};
    use super::*;

    #[test]
    fn test_su_with_cracked_password() {
        let (mut vfs, mut session) = world();
        assert_eq!(mutate(prog_su, "su root n3bula", &mut vfs, &mut session).output, "");
        assert!(world::is_root(&vfs));
        assert!(vfs.exists("/var/.mission/escalate"));
    }

    #[test]
    fn test_su_wrong_password_raises_alert() {
        let (mut vfs, mut session) = world();
        assert_eq!(mutate(prog_su, "su root hunter2", &mut vfs, &mut session).output, "su: Authentication failure");
        assert_eq!(session.alert_level, 1);
        assert!(!world::is_root(&vfs));

        session.alert_level = 4;
        let out = mutate(prog_su, "su - root nope", &mut vfs, &mut session).output;
        assert!(out.starts_with("su: Authentication failure\n"));
        assert!(out.contains("alert level 5"));
    }

    #[test]
    fn test_su_without_password() {
        let (mut vfs, mut session) = world();
        assert!(mutate(prog_su, "su", &mut vfs, &mut session).output.contains("password is required"));
        assert_eq!(session.alert_level, 0);
        assert_eq!(mutate(prog_su, "su mallory x", &mut vfs, &mut session).output, "su: user mallory does not exist");
    }

    #[test]
    fn test_su_back_and_exit() {
        let (mut vfs, mut session) = root_world();
        assert_eq!(mutate(prog_su, "su ghost", &mut vfs, &mut session).output, "");
        assert!(!world::is_root(&vfs));

        let (mut vfs, mut session) = root_world();
        assert_eq!(mutate(prog_exit, "exit", &mut vfs, &mut session).output, "logout");
        assert!(!world::is_root(&vfs));
        assert!(mutate(prog_exit, "logout", &mut vfs, &mut session).output.starts_with("logout: no nested shell"));
    }
}
