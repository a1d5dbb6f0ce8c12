//! Archive programs
//!
//! `tar` stores a subtree as a JSON document. Entry paths are relative
//! (leading `/` stripped, as GNU tar does) and the absolute source paths
//! are kept alongside. The header is only a hint: whether an archive
//! really holds the vault is recorded in the session when `tar` builds it.

use super::{args_to_strs, check_help, guard_read, guard_write, mode_column};
use crate::shell::executor::{CommandResult, Invocation};
use crate::shell::session::Session;
use crate::vfs::{Node, Vfs, is_within, join, normalize, parent, top_level};
use crate::world::{DISK_FULL_SENTINEL, VAULT_DIR};
use serde::{Deserialize, Serialize};

const FORMAT: &str = "ghost-tar/1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Entry {
    File {
        path: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
    },
    Fifo {
        path: String,
    },
    Directory {
        path: String,
    },
    Symlink {
        path: String,
        target: String,
    },
}

impl Entry {
    fn path(&self) -> &str {
        match self {
            Entry::File { path, .. } | Entry::Fifo { path } | Entry::Directory { path } | Entry::Symlink { path, .. } => path,
        }
    }

    fn from_node(path: String, node: &Node) -> Self {
        match node {
            Node::Directory { .. } => Entry::Directory { path },
            Node::Symlink { target } => Entry::Symlink { path, target: target.clone() },
            node if node.is_fifo() => Entry::Fifo { path },
            Node::File { content, permissions, .. } => Entry::File {
                path,
                content: content.clone(),
                mode: permissions.clone(),
            },
        }
    }

    fn into_node(self) -> Result<Node, String> {
        Ok(match self {
            Entry::File { mode: Some(mode), .. } if crate::vfs::Mode::parse(&mode).is_none() => {
                return Err(format!("Invalid mode '{}'", mode));
            }
            Entry::File { content, mode: Some(mode), .. } => Node::file_with_mode(content, &mode),
            Entry::File { content, mode: None, .. } => Node::file(content),
            Entry::Fifo { .. } => Node::fifo(),
            Entry::Directory { .. } => Node::dir(),
            Entry::Symlink { target, .. } => Node::Symlink { target },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Archive {
    format: String,
    sources: Vec<String>,
    entries: Vec<Entry>,
}

impl Archive {
    fn parse(content: &str) -> Option<Self> {
        serde_json::from_str::<Archive>(content)
            .ok()
            .filter(|a| a.format == FORMAT)
    }
}

/// Absolute paths that went into an archive; empty for anything else
fn archive_sources(content: &str) -> Vec<String> {
    Archive::parse(content).map(|a| a.sources).unwrap_or_default()
}

/// Is the vault inside `path`, or `path` inside the vault?
fn touches_vault(path: &str) -> bool {
    is_within(path, VAULT_DIR) || is_within(VAULT_DIR, path)
}

/// Did `tar` build the archive at `path` from the vault? A header naming
/// the vault is not enough on its own.
pub fn is_vault_archive(vfs: &Vfs, session: &Session, path: &str, content: &str) -> bool {
    session.vault_archives.contains(&vfs.real_path(path))
        && archive_sources(content).iter().any(|s| touches_vault(s))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Create,
    Extract,
    List,
}

#[derive(Debug)]
struct TarArgs<'a> {
    mode: Mode,
    verbose: bool,
    archive: &'a str,
    directory: Option<&'a str>,
    operands: Vec<&'a str>,
}

fn parse_args<'a>(args: &[&'a str]) -> Result<TarArgs<'a>, String> {
    let mut mode = None;
    let mut verbose = false;
    let mut archive = None;
    let mut directory = None;
    let mut operands = Vec::new();

    let mut i = 0;
    while i < args.len() {
        let arg = args[i];
        // The first word may be an old-style cluster without a dash: `tar cvf`
        let cluster = match arg.strip_prefix('-') {
            Some(rest) if !rest.is_empty() && !rest.starts_with('-') => Some(rest),
            None if i == 0 && arg.chars().all(|c| "cxtvfzC".contains(c)) => Some(arg),
            _ => None,
        };
        let Some(cluster) = cluster else {
            operands.push(arg);
            i += 1;
            continue;
        };
        for c in cluster.chars() {
            match c {
                'c' => mode = Some(Mode::Create),
                'x' => mode = Some(Mode::Extract),
                't' => mode = Some(Mode::List),
                'v' => verbose = true,
                'z' => {}
                'f' | 'C' => {
                    i += 1;
                    let value = args
                        .get(i)
                        .copied()
                        .ok_or_else(|| format!("tar: option requires an argument -- '{}'", c))?;
                    if c == 'f' {
                        archive = Some(value);
                    } else {
                        directory = Some(value);
                    }
                }
                other => return Err(format!("tar: invalid option -- '{}'", other)),
            }
        }
        i += 1;
    }

    let mode = mode.ok_or("tar: You must specify one of the '-ctx' options")?;
    let archive = archive.ok_or("tar: Refusing to read archive contents from terminal (missing -f option?)")?;
    Ok(TarArgs {
        mode,
        verbose,
        archive,
        directory,
        operands,
    })
}

/// Name an operand is stored under
fn member_name(cwd: &str, operand: &str, abs: &str) -> String {
    if !operand.starts_with('/') && cwd != "/" && is_within(abs, cwd) && abs != cwd {
        abs[cwd.len() + 1..].to_string()
    } else {
        abs.trim_start_matches('/').to_string()
    }
}

/// Is the partition holding `path` full?
fn disk_full(vfs: &Vfs, path: &str) -> bool {
    top_level(path).is_some_and(|top| vfs.exists(&join(&top, DISK_FULL_SENTINEL)))
}

fn create(inv: &Invocation, vfs: &mut Vfs, session: &mut Session, opts: &TarArgs) -> CommandResult {
    if opts.operands.is_empty() {
        return CommandResult::text("tar: Cowardly refusing to create an empty archive");
    }

    let mut archive = Archive {
        format: FORMAT.to_string(),
        sources: Vec::new(),
        entries: Vec::new(),
    };
    let mut messages = Vec::new();
    let mut from_vault = false;
    for operand in &opts.operands {
        let abs = inv.path(session, operand);
        if let Err(e) = guard_read(vfs, &abs) {
            messages.push(format!("tar: {}: Cannot open: {}", operand, e));
            continue;
        }
        let Some(node) = vfs.get(&abs) else {
            messages.push(format!("tar: {}: Cannot stat: No such file or directory", operand));
            continue;
        };
        let name = member_name(inv.cwd, operand, &abs);
        archive.entries.push(Entry::from_node(name.clone(), node));
        if node.is_dir() {
            for path in vfs.descendants(&abs) {
                if let Some(child) = vfs.get(&path) {
                    let member = format!("{}{}", name, &path[abs.len()..]);
                    let member = member.trim_start_matches('/').to_string();
                    archive.entries.push(Entry::from_node(member, child));
                }
            }
        }
        // A symlink operand is stored as the link itself
        from_vault |= !node.is_symlink() && touches_vault(&abs);
        archive.sources.push(abs);
    }
    if archive.entries.is_empty() {
        messages.push("tar: Exiting with failure status due to previous errors".to_string());
        return CommandResult::text(messages.join("\n"));
    }

    let out = inv.path(session, opts.archive);
    if let Err(e) = guard_write(vfs, session, &out) {
        messages.push(format!("tar: {}: Cannot open: {}", opts.archive, e));
        return CommandResult::text(messages.join("\n"));
    }
    if disk_full(vfs, &out) {
        messages.push(format!("tar: {}: Cannot write: No space left on device", opts.archive));
        return CommandResult::text(messages.join("\n"));
    }
    let json = match serde_json::to_string(&archive) {
        Ok(json) => json,
        Err(e) => return CommandResult::text(format!("tar: {}", e)),
    };
    if let Err(e) = vfs.write_file(&out, &json) {
        messages.push(format!("tar: {}: Cannot open: {}", opts.archive, e));
        return CommandResult::text(messages.join("\n"));
    }
    log::debug!("[tar] {} entries into {}", archive.entries.len(), out);

    let real_out = vfs.real_path(&out);
    if from_vault {
        log::info!("[tar] vault archived into {}", real_out);
        session.vault_archives.insert(real_out);
    } else {
        session.vault_archives.remove(&real_out);
    }

    if opts.verbose {
        messages.extend(archive.entries.iter().map(|e| e.path().to_string()));
    }
    CommandResult::text(messages.join("\n"))
}

fn load(inv: &Invocation, vfs: &Vfs, session: &Session, name: &str) -> Result<Archive, String> {
    let path = inv.path(session, name);
    guard_read(vfs, &path).map_err(|e| format!("tar: {}: Cannot open: {}", name, e))?;
    let content = vfs
        .read_file(&path)
        .map_err(|e| format!("tar: {}: Cannot open: {}", name, e))?;
    Archive::parse(content).ok_or_else(|| "tar: This does not look like a tar archive".to_string())
}

fn list(inv: &Invocation, vfs: &Vfs, session: &Session, opts: &TarArgs) -> CommandResult {
    let archive = match load(inv, vfs, session, opts.archive) {
        Ok(archive) => archive,
        Err(e) => return CommandResult::text(e),
    };
    let lines: Vec<String> = archive
        .entries
        .iter()
        .map(|entry| {
            if !opts.verbose {
                return entry.path().to_string();
            }
            let mut scratch = Vfs::new();
            let path = join("/", entry.path());
            if let Some(dir) = parent(&path) {
                let _ = scratch.create_dir_all(&dir);
            }
            if let Ok(node) = entry.clone().into_node() {
                let _ = scratch.put(&path, node);
            }
            format!("{} {}", mode_column(&scratch, &path), entry.path())
        })
        .collect();
    CommandResult::text(lines.join("\n"))
}

fn extract(inv: &Invocation, vfs: &mut Vfs, session: &Session, opts: &TarArgs) -> CommandResult {
    let archive = match load(inv, vfs, session, opts.archive) {
        Ok(archive) => archive,
        Err(e) => return CommandResult::text(e),
    };
    let shown = opts.directory.unwrap_or(".");
    let dest = vfs.real_path(&inv.path(session, shown));
    if !vfs.is_dir(&dest) {
        return CommandResult::text(format!("tar: {}: Cannot open: No such file or directory", shown));
    }

    let mut messages = Vec::new();
    for entry in archive.entries {
        let member = entry.path().to_string();
        match extract_entry(vfs, session, &dest, entry) {
            Ok(()) if opts.verbose => messages.push(member),
            Ok(()) => {}
            Err(e) => messages.push(format!("tar: {}: {}", member, e)),
        }
    }
    CommandResult::text(messages.join("\n"))
}

/// Write one member below `dest`. Every path it touches is checked first,
/// and an existing directory is never replaced by a file.
fn extract_entry(vfs: &mut Vfs, session: &Session, dest: &str, entry: Entry) -> Result<(), String> {
    if entry.path().split('/').any(|part| part == "..") {
        return Err("Member name contains '..'".to_string());
    }
    let target = normalize(&join(dest, entry.path()));
    if target == dest && !matches!(entry, Entry::Directory { .. }) {
        return Err("Cannot open: Is a directory".to_string());
    }
    guard_write(vfs, session, &target).map_err(|e| format!("Cannot open: {}", e))?;
    if disk_full(vfs, &target) {
        return Err("Cannot write: No space left on device".to_string());
    }

    let existing_dir = vfs.get(&target).is_some_and(Node::is_dir);
    let node = entry.into_node()?;
    if existing_dir && !node.is_dir() {
        return Err("Cannot open: Is a directory".to_string());
    }
    if let Some(dir) = parent(&target) {
        vfs.create_dir_all(&dir).map_err(|e| format!("Cannot mkdir: {}", e))?;
    }
    let written = if existing_dir { Ok(()) } else { vfs.put(&target, node) };
    written.map_err(|e| format!("Cannot open: {}", e))
}

/// tar - create, list or extract archives
pub fn prog_tar(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(
        &args,
        "Usage: tar -c[v]f ARCHIVE PATH...\n       tar -x[v]f ARCHIVE [-C DIR]\n       tar -t[v]f ARCHIVE\n\nOptions:\n  -c  Create an archive\n  -x  Extract an archive\n  -t  List archive contents\n  -v  Verbose\n  -f  Archive file\n  -C  Extract into DIR",
    ) {
        return help;
    }

    let opts = match parse_args(&args) {
        Ok(opts) => opts,
        Err(e) => return CommandResult::text(e),
    };
    match opts.mode {
        Mode::Create => create(inv, vfs, session, &opts),
        Mode::List => list(inv, vfs, session, &opts),
        Mode::Extract => extract(inv, vfs, session, &opts),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{mutate, root_world, world};
    use super::*;
    use crate::world::AUTH_LOG;

    #[test]
    fn test_parse_args_forms() {
        let opts = parse_args(&["-cvf", "out.tar", "a", "b"]).unwrap();
        assert_eq!(opts.mode, Mode::Create);
        assert!(opts.verbose);
        assert_eq!(opts.archive, "out.tar");
        assert_eq!(opts.operands, vec!["a", "b"]);

        let opts = parse_args(&["xf", "a.tar", "-C", "/tmp"]).unwrap();
        assert_eq!(opts.mode, Mode::Extract);
        assert_eq!(opts.directory, Some("/tmp"));

        assert!(parse_args(&["-f", "a.tar"]).unwrap_err().contains("-ctx"));
        assert!(parse_args(&["-c", "a"]).unwrap_err().contains("missing -f"));
    }

    #[test]
    fn test_create_list_extract() {
        let (mut vfs, mut session) = world();
        vfs.create_dir_all("/home/ghost/loot/sub").unwrap();
        vfs.write_file("/home/ghost/loot/a.txt", "alpha").unwrap();
        vfs.write_file("/home/ghost/loot/sub/b.txt", "bravo").unwrap();

        assert_eq!(mutate(prog_tar, "tar -cf loot.tar loot", &mut vfs, &mut session).output, "");
        let content = vfs.read_file("/home/ghost/loot.tar").unwrap();
        assert_eq!(archive_sources(content), vec!["/home/ghost/loot".to_string()]);

        assert_eq!(
            mutate(prog_tar, "tar -tf loot.tar", &mut vfs, &mut session).output,
            "loot\nloot/a.txt\nloot/sub\nloot/sub/b.txt"
        );
        let verbose = mutate(prog_tar, "tar -tvf loot.tar", &mut vfs, &mut session).output;
        assert!(verbose.contains("-rw-r--r-- loot/a.txt"));
        assert!(verbose.contains("drwxr-xr-x loot/sub"));

        assert_eq!(mutate(prog_tar, "tar -xf loot.tar -C /tmp", &mut vfs, &mut session).output, "");
        assert_eq!(vfs.read_file("/tmp/loot/sub/b.txt").unwrap(), "bravo");
        vfs.check_invariants().unwrap();
    }

    #[test]
    fn test_vault_archive_needs_root() {
        let (mut vfs, mut session) = world();
        assert_eq!(
            mutate(prog_tar, "tar -cf v.tar /root/vault", &mut vfs, &mut session).output,
            "tar: /root/vault: Cannot open: Permission denied\ntar: Exiting with failure status due to previous errors"
        );

        let (mut vfs, mut session) = root_world();
        assert_eq!(mutate(prog_tar, "tar -cvf /tmp/v.tar /root/vault", &mut vfs, &mut session).output.lines().next(), Some("root/vault"));
        let content = vfs.read_file("/tmp/v.tar").unwrap();
        assert_eq!(archive_sources(content), vec!["/root/vault".to_string()]);
        assert!(content.contains("root/vault/alpha.enc"));
        assert!(is_vault_archive(&vfs, &session, "/tmp/v.tar", content));
    }

    fn write_archive(vfs: &mut Vfs, path: &str, entries: Vec<Entry>) {
        let archive = Archive {
            format: FORMAT.to_string(),
            sources: vec![],
            entries,
        };
        vfs.write_file(path, &serde_json::to_string(&archive).unwrap()).unwrap();
    }

    fn file_entry(path: &str, mode: Option<&str>) -> Entry {
        Entry::File {
            path: path.to_string(),
            content: String::new(),
            mode: mode.map(String::from),
        }
    }

    #[test]
    fn test_extract_never_replaces_directories() {
        let (mut vfs, mut session) = root_world();
        crate::mission::mark(&mut vfs, "recon");
        let log = vfs.read_file(AUTH_LOG).unwrap().to_string();
        vfs.write_file("/home/ghost/var", "").unwrap();
        mutate(prog_tar, "tar -cf /tmp/x.tar var", &mut vfs, &mut session);
        assert_eq!(
            mutate(prog_tar, "tar -xf /tmp/x.tar -C /", &mut vfs, &mut session).output,
            "tar: var: Cannot open: Is a directory"
        );
        assert!(vfs.is_dir("/var"));
        assert!(vfs.exists("/var/.mission/recon"));
        assert_eq!(vfs.read_file(AUTH_LOG).unwrap(), log);
        assert!(crate::world::is_root(&vfs));
        vfs.check_invariants().unwrap();
    }

    #[test]
    fn test_extract_checks_every_member() {
        let (mut vfs, mut session) = world();
        write_archive(
            &mut vfs,
            "/tmp/evil.tar",
            vec![
                Entry::Directory { path: "var".to_string() },
                file_entry("var/run/.root_session", None),
                file_entry("var/.mission/cover", None),
                file_entry("var/log/auth.log", None),
                file_entry("tmp/fine", None),
            ],
        );
        let out = mutate(prog_tar, "tar -xf /tmp/evil.tar -C /", &mut vfs, &mut session).output;
        assert_eq!(
            out,
            "tar: var/run/.root_session: Cannot open: Operation not permitted\n\
             tar: var/.mission/cover: Cannot open: Operation not permitted\n\
             tar: var/log/auth.log: Cannot open: Operation not permitted"
        );
        assert!(!crate::world::is_root(&vfs));
        assert!(!vfs.exists("/var/.mission/cover"));
        assert!(vfs.exists("/tmp/fine"));
        vfs.check_invariants().unwrap();
    }

    #[test]
    fn test_extract_rejects_invalid_modes() {
        let (mut vfs, mut session) = world();
        write_archive(
            &mut vfs,
            "/tmp/modes.tar",
            vec![file_entry("bad", Some("rwxrwxrwx")), file_entry("good", Some("4755"))],
        );
        assert_eq!(
            mutate(prog_tar, "tar -xf /tmp/modes.tar -C /tmp", &mut vfs, &mut session).output,
            "tar: bad: Invalid mode 'rwxrwxrwx'"
        );
        assert!(!vfs.exists("/tmp/bad"));
        assert_eq!(vfs.permissions("/tmp/good"), Some("4755"));
        vfs.check_invariants().unwrap();
        Vfs::from_json(&vfs.to_json().unwrap()).unwrap();
    }

    #[test]
    fn test_refusals() {
        let (mut vfs, mut session) = world();
        vfs.write_file("/tmp/notes.tar", "plain text").unwrap();
        assert_eq!(
            mutate(prog_tar, "tar -tf /tmp/notes.tar", &mut vfs, &mut session).output,
            "tar: This does not look like a tar archive"
        );
        assert_eq!(
            mutate(prog_tar, "tar -cf /srv/uploads/x.tar README.txt", &mut vfs, &mut session).output,
            "tar: /srv/uploads/x.tar: Cannot write: No space left on device"
        );
        assert_eq!(
            mutate(prog_tar, "tar -cf /tmp/e.tar", &mut vfs, &mut session).output,
            "tar: Cowardly refusing to create an empty archive"
        );
    }

    #[test]
    fn test_extract_rejects_parent_components() {
        let (mut vfs, mut session) = world();
        let evil = Archive {
            format: FORMAT.to_string(),
            sources: vec![],
            entries: vec![Entry::File {
                path: "../../etc/evil".to_string(),
                content: "x".to_string(),
                mode: None,
            }],
        };
        vfs.write_file("/tmp/evil.tar", &serde_json::to_string(&evil).unwrap()).unwrap();
        assert_eq!(
            mutate(prog_tar, "tar -xf /tmp/evil.tar", &mut vfs, &mut session).output,
            "tar: ../../etc/evil: Member name contains '..'"
        );
        assert!(!vfs.exists("/etc/evil"));
    }

    #[test]
    fn test_archive_sources_of_plain_file() {
        assert!(archive_sources("hello").is_empty());
        assert!(archive_sources("{\"format\":\"other\",\"sources\":[\"/x\"],\"entries\":[]}").is_empty());
    }
}
