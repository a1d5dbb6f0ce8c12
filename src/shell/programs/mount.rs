//! Mount and filesystem programs

use super::{args_to_strs, check_help, forget_removed};
use crate::shell::executor::{CommandResult, Invocation};
use crate::shell::session::Session;
use crate::vfs::{Node, Vfs, join};
use crate::world::{self, DISK_FULL_SENTINEL};

fn mount_usage() -> CommandResult {
    CommandResult::text("mount: usage: mount [-o options] device dir\n       mount -o remount,options dir")
}

/// mount - mount a block device or list mounts
pub fn prog_mount(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: mount [-o OPTIONS] DEVICE DIR\n       mount -o remount,OPTIONS DIR\n       mount (show all mounts)\n\nOptions:\n  -o OPTS   Mount options (ro, rw, noexec)") {
        return help;
    }

    // No arguments: list all mounts
    if args.is_empty() {
        let lines: Vec<String> = session
            .mounts
            .iter()
            .map(|(device, mountpoint)| {
                let opts = session.mount_options.get(mountpoint).map(String::as_str).unwrap_or("rw");
                format!("{} on {} type ext4 ({})", device, mountpoint, opts)
            })
            .collect();
        return CommandResult::text(lines.join("\n"));
    }

    let mut options: Option<&str> = None;
    let mut positional = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "-o" => {
                i += 1;
                match args.get(i) {
                    Some(&opts) => options = Some(opts),
                    None => return CommandResult::text("mount: option requires an argument -- 'o'"),
                }
            }
            arg if arg.starts_with('-') => return mount_usage(),
            arg => positional.push(arg),
        }
        i += 1;
    }

    if !world::is_root(vfs) {
        return CommandResult::text("mount: only root can do that");
    }

    if let Some(rest) = options.and_then(|o| o.strip_prefix("remount")) {
        let [dir] = positional.as_slice() else {
            return mount_usage();
        };
        let path = inv.path(session, dir);
        if !session.mounts.values().any(|mp| *mp == path) {
            return CommandResult::text(format!("mount: {}: mount point not mounted or bad option", dir));
        }
        let opts = rest.trim_start_matches(',');
        let opts = if opts.is_empty() { "rw" } else { opts };
        log::info!("[mount] remount {} ({})", path, opts);
        session.mount_options.insert(path, opts.to_string());
        return CommandResult::success();
    }

    let [device, dir] = positional.as_slice() else {
        return mount_usage();
    };
    let device_path = inv.path(session, device);
    let device_path = vfs.resolve_link(&device_path).unwrap_or(device_path);
    let Some(dev) = world::find_device(&device_path) else {
        return CommandResult::text(format!("mount: {}: special device {} does not exist.", dir, device));
    };
    let mountpoint = vfs.real_path(&inv.path(session, dir));
    if !vfs.is_dir(&mountpoint) {
        return CommandResult::text(format!("mount: {}: mount point does not exist.", dir));
    }
    if session.mounts.contains_key(dev.path) {
        return CommandResult::text(format!("mount: {}: {} already mounted.", dir, dev.path));
    }
    if session.mounts.values().any(|mp| *mp == mountpoint) {
        return CommandResult::text(format!("mount: {}: mount point busy.", dir));
    }
    if world::covers_reserved(&mountpoint) {
        return CommandResult::text(format!("mount: {}: Operation not permitted.", dir));
    }
    // Unmounting clears the mountpoint, so nothing may be hidden under it
    if !vfs.list_dir(&mountpoint).unwrap_or_default().is_empty() {
        return CommandResult::text(format!("mount: {}: mount point is not empty.", dir));
    }

    world::populate_mount(vfs, dev, &mountpoint);
    let opts = options.unwrap_or("rw");
    log::info!("[mount] {} on {} ({})", dev.path, mountpoint, opts);
    session.mounts.insert(dev.path.to_string(), mountpoint.clone());
    session.mount_options.insert(mountpoint, opts.to_string());
    CommandResult::success()
}

/// umount - detach a mounted device
pub fn prog_umount(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: umount TARGET\nUnmount a filesystem by mount point or device.") {
        return help;
    }

    let Some(target) = args.first() else {
        return CommandResult::text("umount: usage: umount target");
    };
    let path = inv.path(session, target);
    let path = vfs.resolve_link(&path).unwrap_or(path);
    let entry = session
        .mounts
        .iter()
        .find(|(device, mountpoint)| **device == path || **mountpoint == path)
        .map(|(d, m)| (d.clone(), m.clone()));
    let Some((device, mountpoint)) = entry else {
        return CommandResult::text(format!("umount: {}: not mounted.", target));
    };
    if !world::is_root(vfs) {
        return CommandResult::text(format!("umount: {}: must be superuser to unmount.", target));
    }
    if world::covers_reserved(&mountpoint) {
        log::warn!("[mount] refusing to clear {}", mountpoint);
        return CommandResult::text(format!("umount: {}: target is busy.", target));
    }

    log::info!("[mount] umount {}", mountpoint);
    if let Err(e) = vfs.clear_dir(&mountpoint) {
        log::warn!("[mount] could not clear {}: {}", mountpoint, e);
    }
    session.mounts.remove(&device);
    session.mount_options.remove(&mountpoint);
    forget_removed(vfs, session);
    CommandResult::success()
}

fn format_size(size: u64) -> String {
    if size >= 1024 * 1024 * 1024 {
        format!("{:.1}G", size as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if size >= 1024 * 1024 {
        format!("{:.1}M", size as f64 / (1024.0 * 1024.0))
    } else if size >= 1024 {
        format!("{:.1}K", size as f64 / 1024.0)
    } else {
        format!("{}B", size)
    }
}

/// Parse a device size label such as `2.0G` or `512M`
fn parse_size(label: &str) -> u64 {
    let Some(unit) = label.chars().last() else {
        return 0;
    };
    let number: f64 = label[..label.len() - unit.len_utf8()].parse().unwrap_or(0.0);
    let scale = match unit {
        'G' => 1024.0 * 1024.0 * 1024.0,
        'M' => 1024.0 * 1024.0,
        'K' => 1024.0,
        _ => 1.0,
    };
    (number * scale) as u64
}

fn bytes_below(vfs: &Vfs, dir: &str) -> u64 {
    vfs.descendants(dir)
        .iter()
        .filter_map(|p| vfs.get(p))
        .map(|n| n.size() as u64)
        .sum()
}

/// df - filesystem space
pub fn prog_df(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: df\nShow filesystem disk space usage.") {
        return help;
    }

    let mut rows = vec![format!("{:<12} {:>6} {:>6} {:>6} {:>4} {}", "Filesystem", "Size", "Used", "Avail", "Use%", "Mounted on")];
    let mut row = |source: &str, size: u64, used: u64, mountpoint: &str| {
        let used = used.min(size);
        let pct = if size > 0 { used * 100 / size } else { 0 };
        rows.push(format!(
            "{:<12} {:>6} {:>6} {:>6} {:>3}% {}",
            source,
            format_size(size),
            format_size(used),
            format_size(size - used),
            pct,
            mountpoint
        ));
    };

    const ROOT_SIZE: u64 = 20 * 1024 * 1024 * 1024;
    row("/dev/sda1", ROOT_SIZE, bytes_below(vfs, "/"), "/");

    // Top-level directories carrying the sentinel are reported as full partitions
    for top in vfs.list_dir("/").unwrap_or_default() {
        let dir = join("/", &top);
        if vfs.get(&join(&dir, DISK_FULL_SENTINEL)).is_some_and(Node::is_file) {
            const PART_SIZE: u64 = 1024 * 1024 * 1024;
            row("/dev/sda3", PART_SIZE, PART_SIZE, &dir);
        }
    }

    for (device, mountpoint) in &session.mounts {
        let size = world::find_device(device).map(|d| parse_size(d.size)).unwrap_or(0);
        row(device, size, bytes_below(vfs, mountpoint), mountpoint);
    }
    CommandResult::text(rows.join("\n"))
}
