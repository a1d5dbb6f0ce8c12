//! File manipulation programs
//!
//! cat, ls, mkdir, touch, rm, rmdir, cp, mv, ln, readlink, mkfifo

use super::{
    args_to_strs, check_help, fail, forget_removed, guard_entry, guard_read, guard_tree, guard_write, mode_column,
    owner_of, split_flags,
};
use crate::mission;
use crate::shell::executor::{CommandResult, Invocation};
use crate::shell::session::Session;
use crate::vfs::{Mode, Node, Vfs, VfsError, basename, is_within, join};
use crate::world::AUTH_LOG;

// ANSI color codes
const BLUE: &str = "\x1b[1;34m";
const GREEN: &str = "\x1b[1;32m";
const CYAN: &str = "\x1b[1;36m";
const YELLOW: &str = "\x1b[33m";
const SETUID: &str = "\x1b[37;41m";
const RESET: &str = "\x1b[0m";

/// Concatenate chunks, separating them with a newline where needed
fn concat(chunks: &[String]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(chunk);
    }
    out
}

/// Destination of a copy or move: inside `dst` when it is a directory
fn destination(vfs: &Vfs, src: &str, dst: &str) -> String {
    if vfs.is_dir(dst) {
        let real = vfs.resolve_link(dst).unwrap_or_else(|_| dst.to_string());
        join(&real, basename(src))
    } else {
        dst.to_string()
    }
}

/// cat - concatenate files
pub fn prog_cat(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: cat [FILE]...\nConcatenate files to standard output.") {
        return help;
    }

    let (_, files) = split_flags(&args);
    if files.is_empty() {
        return CommandResult::text(inv.stdin.unwrap_or_default());
    }

    let mut chunks = Vec::new();
    for file in files {
        if file == "-" {
            chunks.push(inv.stdin.unwrap_or_default().to_string());
            continue;
        }
        let path = inv.path(session, file);
        let text = guard_read(vfs, &path)
            .map_err(|e| fail("cat", file, e))
            .and_then(|_| vfs.read_file(&path).map(String::from).map_err(|e| fail("cat", file, e)));
        chunks.push(text.unwrap_or_else(|e| e));
    }
    CommandResult::text(concat(&chunks))
}

fn colorize(vfs: &Vfs, path: &str, name: &str) -> String {
    let color = match vfs.get(path) {
        Some(Node::Symlink { .. }) => CYAN,
        Some(Node::Directory { .. }) => BLUE,
        Some(node) if node.is_fifo() => YELLOW,
        Some(_) => {
            let mode = Mode::of(vfs.permissions(path));
            if mode.is_setuid() {
                SETUID
            } else if mode.owner_executable() {
                GREEN
            } else {
                return name.to_string();
            }
        }
        None => return name.to_string(),
    };
    format!("{}{}{}", color, name, RESET)
}

/// Render (display name, path) pairs in short or long format
fn render_entries(vfs: &Vfs, session: &Session, entries: &[(String, String)], long: bool, color: bool) -> String {
    let name_of = |name: &str, path: &str| {
        if color {
            colorize(vfs, path, name)
        } else {
            name.to_string()
        }
    };
    if !long {
        return entries
            .iter()
            .map(|(name, path)| name_of(name, path))
            .collect::<Vec<_>>()
            .join("  ");
    }
    entries
        .iter()
        .map(|(name, path)| {
            let owner = owner_of(session, path);
            let size = vfs.get(path).map(Node::size).unwrap_or(0);
            let link = match vfs.get(path) {
                Some(Node::Symlink { target }) => format!(" -> {}", target),
                _ => String::new(),
            };
            format!(
                "{} 1 {:<5} {:<5} {:>5} Jan  1 00:00 {}{}",
                mode_column(vfs, path),
                owner,
                owner,
                size,
                name_of(name, path),
                link
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// ls - list directory contents
pub fn prog_ls(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: ls [-al] [PATH]...\nList directory contents.\n  -a  Show hidden files\n  -l  Long format") {
        return help;
    }

    let (flags, operands) = split_flags(&args);
    if let Some(bad) = flags.iter().find(|f| !"al1".contains(**f)) {
        return CommandResult::text(format!("ls: invalid option -- '{}'", bad));
    }
    let all = flags.contains(&'a');
    let long = flags.contains(&'l');
    let color = !inv.piped;
    let targets = if operands.is_empty() { vec![inv.cwd] } else { operands };

    let mut sections = Vec::new();
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for target in &targets {
        let path = inv.path(session, target);
        if vfs.get(&path).is_none() {
            sections.push(fail("ls", target, VfsError::NotFound));
        } else if let Err(e) = guard_read(vfs, &path) {
            sections.push(fail("ls", target, e));
        } else if vfs.is_dir(&path) {
            dirs.push((*target, path));
        } else {
            files.push((target.to_string(), path));
        }
    }

    if !files.is_empty() {
        sections.push(render_entries(vfs, session, &files, long, color));
    }
    let labelled = targets.len() > 1;
    for (target, path) in dirs {
        let real = vfs.resolve_link(&path).unwrap_or(path);
        let entries: Vec<(String, String)> = vfs
            .list_dir(&real)
            .unwrap_or_default()
            .into_iter()
            .filter(|name| all || !name.starts_with('.'))
            .map(|name| {
                let child = join(&real, &name);
                (name, child)
            })
            .collect();
        let body = render_entries(vfs, session, &entries, long, color);
        if labelled {
            sections.push(format!("{}:\n{}", target, body));
        } else if !body.is_empty() {
            sections.push(body);
        }
    }
    CommandResult::text(sections.join("\n"))
}

/// mkdir - create directories
pub fn prog_mkdir(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: mkdir [-p] DIR...\nCreate directories.\n  -p  Create parent directories as needed") {
        return help;
    }

    let (flags, dirs) = split_flags(&args);
    if dirs.is_empty() {
        return CommandResult::text("mkdir: missing operand");
    }
    let parents = flags.contains(&'p');

    let mut errors = Vec::new();
    for dir in dirs {
        let path = inv.path(session, dir);
        if let Err(e) = guard_write(vfs, session, &path) {
            errors.push(fail("mkdir", dir, e));
            continue;
        }
        let created = if parents {
            vfs.create_dir_all(&path)
        } else {
            vfs.create_dir(&path)
        };
        if let Err(e) = created {
            errors.push(fail("mkdir", dir, e));
        }
    }
    CommandResult::text(errors.join("\n"))
}

/// touch - create empty files
pub fn prog_touch(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: touch FILE...\nCreate empty files.") {
        return help;
    }

    let (_, files) = split_flags(&args);
    if files.is_empty() {
        return CommandResult::text("touch: missing file operand");
    }

    let mut errors = Vec::new();
    for file in files {
        let path = inv.path(session, file);
        if let Err(e) = guard_write(vfs, session, &path) {
            errors.push(fail("touch", file, e));
        } else if vfs.get_followed(&path).is_none() {
            if let Err(e) = vfs.write_file(&path, "") {
                errors.push(fail("touch", file, e));
            }
        }
    }
    CommandResult::text(errors.join("\n"))
}

/// rm - remove files and directories
pub fn prog_rm(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: rm [-rf] FILE...\nRemove files.\n  -r  Remove directories recursively\n  -f  Ignore missing files") {
        return help;
    }

    let (flags, targets) = split_flags(&args);
    if targets.is_empty() {
        return CommandResult::text("rm: missing operand");
    }
    let recursive = flags.contains(&'r') || flags.contains(&'R');
    let force = flags.contains(&'f');

    let mut errors = Vec::new();
    for target in targets {
        let path = inv.path(session, target);
        let Some(is_dir) = vfs.get(&path).map(Node::is_dir) else {
            if !force {
                errors.push(fail("rm", target, VfsError::NotFound));
            }
            continue;
        };
        if path == "/" {
            errors.push("rm: it is dangerous to operate recursively on '/'".to_string());
            continue;
        }
        if is_dir && !recursive {
            errors.push(fail("rm", target, VfsError::IsADirectory));
            continue;
        }
        let guarded = if is_dir {
            guard_tree(vfs, session, &path)
        } else {
            guard_entry(vfs, session, &path)
        };
        if let Err(e) = guarded {
            errors.push(fail("rm", target, e));
            continue;
        }

        let removed = if is_dir {
            vfs.remove_tree(&path)
        } else {
            vfs.remove_file(&path)
        };
        match removed {
            Ok(()) if is_within(AUTH_LOG, &path) => {
                mission::mark(vfs, "cover");
            }
            Ok(()) => {}
            Err(e) => errors.push(fail("rm", target, e)),
        }
    }
    forget_removed(vfs, session);
    CommandResult::text(errors.join("\n"))
}

/// rmdir - remove empty directories
pub fn prog_rmdir(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: rmdir DIR...\nRemove empty directories.") {
        return help;
    }

    let (_, dirs) = split_flags(&args);
    if dirs.is_empty() {
        return CommandResult::text("rmdir: missing operand");
    }

    let mut errors = Vec::new();
    for dir in dirs {
        let path = inv.path(session, dir);
        let removed = guard_entry(vfs, session, &path)
            .map_err(|e| fail("rmdir", dir, e))
            .and_then(|_| vfs.remove_dir(&path).map_err(|e| fail("rmdir", dir, e)));
        if let Err(e) = removed {
            errors.push(e);
        }
    }
    forget_removed(vfs, session);
    CommandResult::text(errors.join("\n"))
}

/// Copy the subtree at `from` to `to`. Every destination is checked
/// before anything is written.
fn copy_tree(vfs: &mut Vfs, session: &Session, from: &str, to: &str) -> Result<(), String> {
    let nodes: Vec<(String, Node)> = vfs
        .descendants(from)
        .into_iter()
        .filter_map(|p| {
            let node = vfs.get(&p)?.clone();
            Some((format!("{}{}", to, &p[from.len()..]), node))
        })
        .collect();
    for (target, node) in &nodes {
        guard_write(vfs, session, target).map_err(|e| fail("cp", target, e))?;
        if !node.is_dir() && vfs.get(target).is_some_and(Node::is_dir) {
            return Err(fail("cp", target, VfsError::IsADirectory));
        }
    }

    vfs.create_dir_all(to).map_err(|e| fail("cp", to, e))?;
    for (target, node) in nodes {
        let written = if node.is_dir() {
            vfs.create_dir_all(&target)
        } else {
            vfs.put(&target, node)
        };
        written.map_err(|e| fail("cp", &target, e))?;
    }
    Ok(())
}

/// cp - copy files
pub fn prog_cp(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: cp [-r] SOURCE... DEST\nCopy files.\n  -r  Copy directories recursively") {
        return help;
    }

    let (flags, operands) = split_flags(&args);
    let Some((dest, sources)) = operands.split_last().filter(|(_, s)| !s.is_empty()) else {
        return CommandResult::text("cp: missing destination file operand");
    };
    let recursive = flags.contains(&'r') || flags.contains(&'R');
    let dest_path = inv.path(session, dest);
    if sources.len() > 1 && !vfs.is_dir(&dest_path) {
        return CommandResult::text(fail("cp", dest, VfsError::NotADirectory));
    }

    let mut errors = Vec::new();
    for src in sources {
        let src_path = inv.path(session, src);
        if let Err(e) = guard_read(vfs, &src_path) {
            errors.push(fail("cp", src, e));
            continue;
        }
        let Some(is_dir) = vfs.get_followed(&src_path).map(Node::is_dir) else {
            errors.push(fail("cp", src, VfsError::NotFound));
            continue;
        };
        let target = destination(vfs, &src_path, &dest_path);
        if let Err(e) = guard_write(vfs, session, &target) {
            errors.push(fail("cp", dest, e));
            continue;
        }
        let copied = if is_dir {
            if !recursive {
                errors.push(format!("cp: -r not specified; omitting directory '{}'", src));
                continue;
            }
            if is_within(&target, &src_path) {
                errors.push(format!("cp: cannot copy a directory, '{}', into itself", src));
                continue;
            }
            copy_tree(vfs, session, &src_path, &target)
        } else {
            vfs.copy_file(&src_path, &target)
                .map(|_| ())
                .map_err(|e| fail("cp", src, e))
        };
        if let Err(e) = copied {
            errors.push(e);
        }
    }
    CommandResult::text(errors.join("\n"))
}

/// mv - move or rename files
pub fn prog_mv(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: mv SOURCE... DEST\nMove or rename files.") {
        return help;
    }

    let (_, operands) = split_flags(&args);
    let Some((dest, sources)) = operands.split_last().filter(|(_, s)| !s.is_empty()) else {
        return CommandResult::text("mv: missing destination file operand");
    };
    let dest_path = inv.path(session, dest);
    if sources.len() > 1 && !vfs.is_dir(&dest_path) {
        return CommandResult::text(fail("mv", dest, VfsError::NotADirectory));
    }

    let mut errors = Vec::new();
    for src in sources {
        let src_path = inv.path(session, src);
        if !vfs.exists(&src_path) {
            errors.push(fail("mv", src, VfsError::NotFound));
            continue;
        }
        let target = destination(vfs, &src_path, &dest_path);
        let guarded = guard_tree(vfs, session, &src_path).and_then(|_| guard_write(vfs, session, &target));
        if let Err(e) = guarded {
            errors.push(fail("mv", src, e));
            continue;
        }
        match vfs.rename(&src_path, &target) {
            Ok(()) => session.move_flags(&src_path, &target),
            Err(e) => errors.push(fail("mv", src, e)),
        }
    }
    forget_removed(vfs, session);
    CommandResult::text(errors.join("\n"))
}

/// ln - make links
pub fn prog_ln(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: ln -s TARGET [LINK]\nCreate a symbolic link.") {
        return help;
    }

    let (flags, operands) = split_flags(&args);
    if !flags.contains(&'s') {
        return CommandResult::text("ln: hard links are not supported; use ln -s");
    }
    let Some(target) = operands.first() else {
        return CommandResult::text("ln: missing file operand");
    };

    let link = match operands.get(1) {
        Some(link) => {
            let path = inv.path(session, link);
            if vfs.is_dir(&path) {
                destination(vfs, target, &path)
            } else {
                path
            }
        }
        None => join(inv.cwd, basename(target)),
    };
    let shown = operands.get(1).copied().unwrap_or(basename(target));

    if let Err(e) = guard_entry(vfs, session, &link) {
        return CommandResult::text(fail("ln", shown, e));
    }
    if flags.contains(&'f') && vfs.get(&link).is_some_and(|n| !n.is_dir()) {
        let _ = vfs.remove_file(&link);
    }
    match vfs.symlink(target, &link) {
        Ok(()) => CommandResult::success(),
        Err(e) => CommandResult::text(format!("ln: failed to create symbolic link '{}': {}", shown, e)),
    }
}

/// readlink - print symlink targets
pub fn prog_readlink(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: readlink [-f] PATH\nPrint the target of a symbolic link.\n  -f  Print the fully resolved path") {
        return help;
    }

    let (flags, operands) = split_flags(&args);
    let Some(operand) = operands.first() else {
        return CommandResult::text("readlink: missing operand");
    };
    let path = inv.path(session, operand);
    if let Err(e) = guard_read(vfs, &path) {
        return CommandResult::text(fail("readlink", operand, e));
    }
    if flags.contains(&'f') {
        return match vfs.resolve_link(&path) {
            Ok(real) => CommandResult::text(real),
            Err(VfsError::NotFound) => CommandResult::text(path),
            Err(e) => CommandResult::text(fail("readlink", operand, e)),
        };
    }
    match vfs.get(&path) {
        Some(Node::Symlink { target }) => CommandResult::text(target.clone()),
        _ => CommandResult::success(),
    }
}

/// mkfifo - make named pipes
pub fn prog_mkfifo(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: mkfifo NAME...\nCreate named pipes (FIFOs).") {
        return help;
    }

    let (_, names) = split_flags(&args);
    if names.is_empty() {
        return CommandResult::text("mkfifo: missing operand");
    }

    let mut errors = Vec::new();
    for name in names {
        let path = inv.path(session, name);
        let created = guard_write(vfs, session, &path)
            .map_err(|e| e.to_string())
            .and_then(|_| vfs.create_node(&path, Node::fifo()).map_err(|e| e.to_string()));
        if let Err(e) = created {
            errors.push(format!("mkfifo: cannot create fifo '{}': {}", name, e));
        }
    }
    CommandResult::text(errors.join("\n"))
}
