//! Network programs
//!
//! Both tools talk to the scripted network in [`crate::world::HOSTS`]:
//! - `nmap`: scan a host or the target subnet
//! - `scp`: copy a file to a remote host

use super::archive::is_vault_archive;
use super::{args_to_strs, check_help, guard_read, split_flags, with_alert};
use crate::mission;
use crate::shell::executor::{Action, CommandResult, Invocation};
use crate::shell::session::Session;
use crate::vfs::{Vfs, basename, is_within};
use crate::world::{HOSTS, Host, TARGET_HOST, TARGET_SUBNET, VAULT_DIR};
use serde_json::json;

/// Prefix shared by every address on the target subnet
const SUBNET_PREFIX: &str = "10.0.13.";

fn find_host(name: &str) -> Option<&'static Host> {
    HOSTS.iter().find(|h| h.ip == name || h.name == name)
}

/// Hosts covered by a scan target; `None` if it cannot be resolved
fn scan_targets(target: &str) -> Option<Vec<&'static Host>> {
    if target == TARGET_SUBNET {
        return Some(HOSTS.iter().collect());
    }
    if let Some(host) = find_host(target) {
        return Some(vec![host]);
    }
    let last = target.strip_prefix(SUBNET_PREFIX)?;
    last.parse::<u8>().ok().map(|_| Vec::new())
}

/// nmap - network scanner
pub fn prog_nmap(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: nmap [-A] TARGET\nScan a host or subnet for open ports.\n  -A  Aggressive scan (OS detection; noisy)") {
        return help;
    }

    let (flags, operands) = split_flags(&args);
    let Some(target) = operands.first().copied() else {
        return CommandResult::text("nmap: no targets were specified, so 0 hosts scanned.");
    };
    let aggressive = flags.contains(&'A');

    let Some(hosts) = scan_targets(target) else {
        return CommandResult::text(format!(
            "Failed to resolve \"{}\".\nWARNING: No targets were specified, so 0 hosts scanned.",
            target
        ));
    };
    session.raise_alert(if aggressive { 2 } else { 1 });

    let mut out = vec!["Starting Nmap 7.94 ( https://nmap.org )".to_string()];
    for host in &hosts {
        out.push(format!("Nmap scan report for {} ({})", host.name, host.ip));
        out.push("Host is up (0.0021s latency).".to_string());
        out.push(format!("{:<9}{:<6} SERVICE", "PORT", "STATE"));
        for (port, service) in host.ports {
            out.push(format!("{:<9}{:<6} {}", format!("{}/tcp", port), "open", service));
        }
        if aggressive {
            out.push("OS details: Linux 6.1".to_string());
        }
    }
    if hosts.is_empty() {
        out.push("Note: Host seems down. If it is really up, but blocking our ping probes, try -Pn".to_string());
    }
    let addresses = if target == TARGET_SUBNET { 256 } else { 1 };
    out.push(format!(
        "Nmap done: {} IP address{} ({} host{} up) scanned",
        addresses,
        if addresses == 1 { "" } else { "es" },
        hosts.len(),
        if hosts.len() == 1 { "" } else { "s" }
    ));

    if hosts.iter().any(|h| h.ip == TARGET_HOST) {
        mission::mark(vfs, "recon");
    }
    log::debug!("[nmap] {} ({} hosts)", target, hosts.len());

    let data = json!({
        "target": target,
        "hosts": hosts
            .iter()
            .map(|h| json!({
                "ip": h.ip,
                "name": h.name,
                "ports": h.ports.iter().map(|(port, service)| json!({"port": port, "service": service})).collect::<Vec<_>>(),
            }))
            .collect::<Vec<_>>(),
    });
    with_alert(
        CommandResult::text(out.join("\n")).with_action(Action::Scan).with_data(data),
        session,
    )
}

/// Does this file carry vault contents?
fn carries_vault(vfs: &Vfs, session: &Session, path: &str, content: &str) -> bool {
    is_within(&vfs.real_path(path), VAULT_DIR) || is_vault_archive(vfs, session, path, content)
}

/// scp - secure copy to a remote host
pub fn prog_scp(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: scp SOURCE USER@HOST:PATH\nCopy a file to a remote host.") {
        return help;
    }

    let [source, destination] = args.as_slice() else {
        return CommandResult::text("usage: scp SOURCE USER@HOST:PATH");
    };
    let Some((remote, _remote_path)) = destination.split_once(':') else {
        return CommandResult::text("scp: local copies are not supported, use cp");
    };
    let host_name = remote.rsplit_once('@').map(|(_, h)| h).unwrap_or(remote);
    let Some(host) = find_host(host_name) else {
        return CommandResult::text(format!("ssh: connect to host {} port 22: No route to host", host_name));
    };
    if !host.ports.iter().any(|(port, _)| *port == 22) {
        return CommandResult::text(format!("ssh: connect to host {} port 22: Connection refused", host_name));
    }

    let path = inv.path(session, source);
    if let Err(e) = guard_read(vfs, &path) {
        return CommandResult::text(format!("scp: {}: {}", source, e));
    }
    if vfs.is_dir(&path) {
        return CommandResult::text(format!("scp: {}: not a regular file", source));
    }
    let content = match vfs.read_file(&path) {
        Ok(content) => content,
        Err(e) => return CommandResult::text(format!("scp: {}: {}", source, e)),
    };
    let bytes = content.len();
    let exfil = carries_vault(vfs, session, &path, content);

    if exfil {
        mission::mark(vfs, "exfil");
    }
    log::info!("[scp] {} -> {} ({} bytes)", path, destination, bytes);

    let output = format!("{:<24} 100% {:>6}B   1.2MB/s   00:00", basename(&path), bytes);
    with_alert(
        CommandResult::text(output)
            .with_action(Action::Transfer)
            .with_data(json!({
                "source": path,
                "destination": destination,
                "bytes": bytes,
            })),
        session,
    )
}
