//! World fixtures
//!
//! The initial world as a list of `(path, predicate, populate)` entries.
//! Every entry is evaluated once when a session starts (fresh, loaded or
//! reset). The predicate is an existence check, so a second evaluation over
//! an already-populated filesystem is a no-op.

use super::cipher::seal;
use super::{
    AUTH_LOG, DEVICES, DISK_FULL_SENTINEL, ELF_MAGIC, MISSION_DIR, populate_mount,
};
use crate::shell::Session;
use crate::vfs::{Node, Vfs, join};

/// One declarative world entry
pub struct Fixture {
    /// Path the entry is responsible for
    pub path: &'static str,
    /// Should `populate` run?
    pub predicate: fn(&Vfs, &Session) -> bool,
    pub populate: fn(&mut Vfs, &Session),
}

fn missing(vfs: &Vfs, path: &str) -> bool {
    !vfs.exists(path)
}

const SKELETON: &[&str] = &[
    "/bin",
    "/dev",
    "/etc",
    "/home/ghost",
    "/mnt/backup",
    "/mnt/usb",
    "/opt/bin",
    "/proc",
    "/root/vault",
    "/srv/uploads",
    "/tmp",
    "/var/log",
    "/var/run",
    MISSION_DIR,
];

const README: &str = "\x1b[1;32mBRIEFING\x1b[0m\n\
Operator,\n\
\n\
The target network is 10.0.13.0/24. Map it first (nmap).\n\
A careless admin left a backup of /etc/shadow on the backup disk (/mnt/backup).\n\
Crack it, get root, and pull what you can out of /root/vault.\n\
The vault keys are on the USB stick we planted: /dev/sdc1. Mount it.\n\
Leave a module behind so we can come back, ship the vault to the dropzone,\n\
and make sure nobody reads /var/log/auth.log afterwards.\n\
\n\
Type 'status' at any time to see how far along you are.\n\
-- H.";

const NOTES: &str = "- vuln in /opt/bin is suid root; it copies argv[1] into a 64 byte buffer\n\
- listener reads /tmp/ghostpipe, start it before writing to the pipe\n\
- the dropzone is 10.0.13.66, scp accepts anything";

const BASHRC: &str = "# ~/.bashrc\nexport PS1='\\u@\\h:\\w\\$ '\nalias ll='ls -l'\nalias la='ls -a'";

const PASSWD: &str = "root:x:0:0:root:/root:/bin/bash\n\
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
sshd:x:110:65534::/run/sshd:/usr/sbin/nologin\n\
ghost:x:1000:1000:ghost:/home/ghost:/bin/bash";

const MOTD: &str = "Welcome to nexus (GNU/Linux 6.1.0-ghost x86_64)\n\
Unauthorized access is monitored.";

const BACKUP_SH: &str = "#!/bin/sh\n\
# nightly backup helper\n\
echo starting backup of /etc\n\
rsync -a /etc /mnt/backup\n\
echo backup finished";

const AUTH_LOG_CONTENT: &str = "Jan  1 03:12:44 nexus sshd[212]: Accepted password for ghost from 10.0.13.200 port 51122\n\
Jan  1 03:12:45 nexus sshd[212]: pam_unix(sshd:session): session opened for user ghost\n\
Jan  1 03:14:02 nexus ids-monitor[311]: new login from unusual address 10.0.13.200";

const SYSLOG: &str = "Jan  1 00:00:01 nexus cron[230]: (root) CMD (/opt/bin/backup.sh)\n\
Jan  1 00:00:03 nexus kernel: sdb1: mounted read-only";

fn elf(tag: &str, banner: &str) -> String {
    format!("{}\x02\x01\x01\n[prog:{}]\n{}", ELF_MAGIC, tag, banner)
}

/// Vault files: (name, plaintext, key, time lock)
const VAULT: &[(&str, &str, &str, Option<i64>)] = &[
    ("alpha.enc", "PROJECT NIGHTJAR: phase one funding approved.", "orchid", None),
    ("bravo.enc", "Asset list: 14 relays, 3 cold wallets, 1 insider.", "tundra", None),
    ("charlie.enc", "Insider codename: LANTERN. Meets Thursdays.", "ember", None),
    ("timelock.enc", "Dead drop coordinates: 52.5163 N, 13.3777 E.", "aurora", Some(86_400)),
];

fn populate_skeleton(vfs: &mut Vfs, _: &Session) {
    for dir in SKELETON {
        let _ = vfs.create_dir_all(dir);
    }
}

fn populate_etc(vfs: &mut Vfs, _: &Session) {
    let _ = vfs.write_file("/etc/passwd", PASSWD);
    let _ = vfs.write_file("/etc/hostname", "nexus");
    let _ = vfs.write_file("/etc/motd", MOTD);
    let _ = vfs.create_node("/etc/shadow", Node::file_with_mode("root:*:19876:0:99999:7:::", "0640"));
}

fn populate_home(vfs: &mut Vfs, session: &Session) {
    let home = session.home().to_string();
    let _ = vfs.create_dir_all(&home);
    for (name, content) in [("README.txt", README), ("notes.txt", NOTES), (".bashrc", BASHRC)] {
        let path = join(&home, name);
        if !vfs.exists(&path) {
            let _ = vfs.write_file(&path, content);
        }
    }
}

fn populate_binaries(vfs: &mut Vfs, _: &Session) {
    let programs: [(&str, String, &str); 5] = [
        ("vuln", elf("overflow", "usage: vuln NAME"), "4755"),
        ("suidcheck", elf("suidcheck", "prints effective uid"), "4755"),
        ("listener", elf("fifo_reader", "reads /tmp/ghostpipe"), "0755"),
        ("hello", elf("hello", "hello world"), "0755"),
        ("backup.sh", BACKUP_SH.to_string(), "0755"),
    ];
    for (name, content, mode) in programs {
        let path = join("/opt/bin", name);
        if !vfs.exists(&path) {
            let _ = vfs.create_node(&path, Node::file_with_mode(content, mode));
        }
    }
    if !vfs.exists("/opt/bin/ping") {
        let _ = vfs.create_node("/opt/bin/ping", Node::file_with_mode(elf("ping", "ping HOST"), "0755"));
        let _ = vfs.set_xattr("/opt/bin/ping", "security.capability", "cap_net_raw+ep");
    }
}

fn populate_devices(vfs: &mut Vfs, _: &Session) {
    for device in DEVICES {
        if !vfs.exists(device.path) {
            let _ = vfs.create_node(
                device.path,
                Node::file_with_mode(format!("block device {} ({})", device.label, device.size), "0660"),
            );
        }
    }
    let _ = vfs.symlink("/dev/sdc1", "/dev/usb");
}

fn populate_mounts(vfs: &mut Vfs, session: &Session) {
    for (device, mountpoint) in &session.mounts {
        if let Some(device) = super::find_device(device) {
            let _ = vfs.create_dir_all(mountpoint);
            populate_mount(vfs, device, mountpoint);
        }
    }
}

fn mounts_incomplete(vfs: &Vfs, session: &Session) -> bool {
    session.mounts.iter().any(|(device, mountpoint)| {
        super::find_device(device)
            .is_some_and(|d| d.files.iter().any(|(rel, _, _)| missing(vfs, &join(mountpoint, rel))))
    })
}

fn populate_vault(vfs: &mut Vfs, _: &Session) {
    for (name, plaintext, key, lock) in VAULT {
        let path = join(super::VAULT_DIR, name);
        if !vfs.exists(&path) {
            let _ = vfs.create_node(&path, Node::file_with_mode(seal(plaintext, key, *lock), "0600"));
        }
    }
}

fn populate_logs(vfs: &mut Vfs, _: &Session) {
    let _ = vfs.create_dir_all("/var/log");
    let _ = vfs.write_file(AUTH_LOG, AUTH_LOG_CONTENT);
    if !vfs.exists("/var/log/syslog") {
        let _ = vfs.write_file("/var/log/syslog", SYSLOG);
    }
}

fn populate_misc(vfs: &mut Vfs, _: &Session) {
    let _ = vfs.create_node("/tmp/ghostpipe", Node::fifo());
    let sentinel = join("/srv", DISK_FULL_SENTINEL);
    if !vfs.exists(&sentinel) {
        let _ = vfs.write_file(&sentinel, "");
    }
    if !vfs.exists("/proc/version") {
        let _ = vfs.write_file("/proc/version", "Linux version 6.1.0-ghost (gcc 12.2.0) #1 SMP");
    }
}

/// The world, in evaluation order
pub const FIXTURES: &[Fixture] = &[
    Fixture {
        path: "/",
        predicate: |vfs, _| SKELETON.iter().any(|d| missing(vfs, d)),
        populate: populate_skeleton,
    },
    Fixture {
        path: "/etc/passwd",
        predicate: |vfs, _| missing(vfs, "/etc/passwd"),
        populate: populate_etc,
    },
    Fixture {
        path: "/home/ghost/README.txt",
        predicate: |vfs, session| missing(vfs, &join(session.home(), "README.txt")),
        populate: populate_home,
    },
    Fixture {
        path: "/opt/bin/vuln",
        predicate: |vfs, _| missing(vfs, "/opt/bin/vuln") || missing(vfs, "/opt/bin/ping"),
        populate: populate_binaries,
    },
    Fixture {
        path: "/dev/sdb1",
        predicate: |vfs, _| DEVICES.iter().any(|d| missing(vfs, d.path)) || missing(vfs, "/dev/usb"),
        populate: populate_devices,
    },
    Fixture {
        path: "/mnt",
        predicate: mounts_incomplete,
        populate: populate_mounts,
    },
    Fixture {
        path: "/root/vault/alpha.enc",
        predicate: |vfs, _| VAULT.iter().any(|(name, ..)| missing(vfs, &join(super::VAULT_DIR, name))),
        populate: populate_vault,
    },
    Fixture {
        path: AUTH_LOG,
        predicate: |vfs, _| missing(vfs, &join(MISSION_DIR, "cover")) && missing(vfs, AUTH_LOG),
        populate: populate_logs,
    },
    Fixture {
        path: "/tmp/ghostpipe",
        predicate: |vfs, _| missing(vfs, "/tmp/ghostpipe") || missing(vfs, "/proc/version"),
        populate: populate_misc,
    },
];

/// Evaluate every fixture once against the given state
pub fn apply_fixtures(vfs: &mut Vfs, session: &Session) {
    for fixture in FIXTURES {
        if (fixture.predicate)(vfs, session) {
            log::debug!("[world] populating {}", fixture.path);
            (fixture.populate)(vfs, session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::cipher;

    fn fresh() -> (Vfs, Session) {
        let mut vfs = Vfs::new();
        let session = Session::new("ghost", "nexus", "/home/ghost");
        apply_fixtures(&mut vfs, &session);
        (vfs, session)
    }

    #[test]
    fn test_world_is_consistent() {
        let (vfs, _) = fresh();
        vfs.check_invariants().unwrap();
        assert!(vfs.exists("/home/ghost/README.txt"));
        assert!(vfs.exists("/mnt/backup/shadow.bak"));
        assert!(!vfs.exists("/mnt/usb/keys.txt"));
        assert!(vfs.get("/tmp/ghostpipe").unwrap().is_fifo());
        assert_eq!(vfs.permissions("/opt/bin/vuln"), Some("4755"));
    }

    #[test]
    fn test_reapplying_is_a_noop() {
        let (mut vfs, session) = fresh();
        let before = vfs.clone();
        apply_fixtures(&mut vfs, &session);
        assert_eq!(vfs, before);
    }

    #[test]
    fn test_vault_files_open_with_their_keys() {
        let (vfs, _) = fresh();
        for (name, plaintext, key, lock) in VAULT {
            let content = vfs.read_file(&join("/root/vault", name)).unwrap();
            let offset = lock.unwrap_or(0);
            assert_eq!(cipher::open(content, key, offset).unwrap(), *plaintext);
        }
    }

    #[test]
    fn test_deleted_fixture_comes_back() {
        let (mut vfs, session) = fresh();
        vfs.remove_file("/home/ghost/README.txt").unwrap();
        apply_fixtures(&mut vfs, &session);
        assert!(vfs.exists("/home/ghost/README.txt"));
    }
}
