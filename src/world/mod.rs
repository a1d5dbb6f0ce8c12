//! The puzzle world
//!
//! Well-known paths, the scripted network and block devices, and the
//! privilege checks every command shares. The initial filesystem content is
//! described declaratively in [`fixtures`].

pub mod cipher;
pub mod fixtures;

pub use fixtures::{FIXTURES, Fixture, apply_fixtures};

use crate::vfs::{Node, Vfs, is_within, join};

/// Exists while the player holds a root shell
pub const ROOT_SESSION_MARKER: &str = "/var/run/.root_session";

/// Objective markers live here
pub const MISSION_DIR: &str = "/var/.mission";

/// The subtree only root may enter
pub const ROOT_HOME: &str = "/root";

/// Password `john` recovers from the leaked shadow backup
pub const ROOT_PASSWORD: &str = "n3bula";

/// Salt marker of the crackable hash
pub const CRACKABLE_HASH: &str = "$6$ghost$";

/// The leaked shadow line
pub const SHADOW_LINE: &str =
    "root:$6$ghost$Jq1Zr9aVx0cN7mXb4tL2s8uE5wK3yH6pD1fG0oR.:19876:0:99999:7:::";

/// Subnet named in the briefing
pub const TARGET_SUBNET: &str = "10.0.13.0/24";

/// The interesting host on that subnet
pub const TARGET_HOST: &str = "10.0.13.37";

/// Module name `insmod` registers for the rootkit
pub const ROOTKIT_MODULE: &str = "ghost_rk";

/// Vault whose contents count for exfiltration
pub const VAULT_DIR: &str = "/root/vault";

/// The log the player has to wipe
pub const AUTH_LOG: &str = "/var/log/auth.log";

/// Name of the per-top-level-directory disk-full sentinel
pub const DISK_FULL_SENTINEL: &str = ".disk_full";

/// Binary header every compiled program starts with
pub const ELF_MAGIC: &str = "\x7fELF";

/// A scripted host on the network
#[derive(Debug, Clone, Copy)]
pub struct Host {
    pub ip: &'static str,
    pub name: &'static str,
    pub ports: &'static [(u16, &'static str)],
}

pub const HOSTS: &[Host] = &[
    Host {
        ip: "10.0.13.1",
        name: "gateway",
        ports: &[(53, "domain"), (80, "http")],
    },
    Host {
        ip: "10.0.13.37",
        name: "nexus",
        ports: &[(22, "ssh"), (80, "http"), (3306, "mysql")],
    },
    Host {
        ip: "10.0.13.66",
        name: "dropzone",
        ports: &[(22, "ssh")],
    },
];

/// A block device and the files it exposes once mounted
#[derive(Debug, Clone, Copy)]
pub struct Device {
    pub path: &'static str,
    pub label: &'static str,
    pub size: &'static str,
    /// (relative path, content, mode)
    pub files: &'static [(&'static str, &'static str, &'static str)],
}

pub const KEYS_TXT: &str = "vault keys (do not lose)\n\
alpha.enc   orchid\n\
bravo.enc   tundra\n\
charlie.enc ember\n\
timelock.enc aurora  # opens 24h after sealing";

pub const DEVICES: &[Device] = &[
    Device {
        path: "/dev/sdb1",
        label: "backup",
        size: "2.0G",
        files: &[
            ("shadow.bak", SHADOW_LINE, "0640"),
            ("backup.log", "rsync nightly: /etc -> /mnt/backup ok\nrsync nightly: /etc/shadow -> shadow.bak ok", "0644"),
        ],
    },
    Device {
        path: "/dev/sdc1",
        label: "GHOST_USB",
        size: "512M",
        files: &[
            ("keys.txt", KEYS_TXT, "0600"),
            ("rootkit.ko", "\x7fELF kernel module\n[module:ghost_rk]\nvermagic=6.1.0-ghost SMP", "0644"),
        ],
    },
];

pub fn find_device(path: &str) -> Option<&'static Device> {
    DEVICES.iter().find(|d| d.path == path)
}

/// Copy a device's files below `mountpoint` (which must exist)
pub fn populate_mount(vfs: &mut Vfs, device: &Device, mountpoint: &str) {
    for (rel, content, mode) in device.files {
        let path = join(mountpoint, rel);
        if !vfs.exists(&path) {
            let _ = vfs.create_node(&path, Node::file_with_mode(*content, mode));
        }
    }
}

/// Is the root-session marker present?
pub fn is_root(vfs: &Vfs) -> bool {
    vfs.exists(ROOT_SESSION_MARKER)
}

/// Paths user commands may never create, change or delete
pub fn is_reserved(path: &str) -> bool {
    is_within(path, MISSION_DIR) || path == ROOT_SESSION_MARKER
}

/// Is any reserved path at or below `path`?
pub fn covers_reserved(path: &str) -> bool {
    is_reserved(path) || is_within(MISSION_DIR, path) || is_within(ROOT_SESSION_MARKER, path)
}

/// Does touching `path` need a root session?
pub fn needs_root(path: &str) -> bool {
    is_within(path, ROOT_HOME)
}

/// May the current session access `path` at all? Symlinks are followed,
/// so a link into `/root` is as protected as its target.
pub fn can_access(vfs: &Vfs, path: &str) -> bool {
    is_root(vfs) || !(needs_root(path) || needs_root(&vfs.real_path(path)))
}

/// Create the root-session marker
pub fn grant_root(vfs: &mut Vfs) {
    let _ = vfs.create_dir_all("/var/run");
    let _ = vfs.write_file(ROOT_SESSION_MARKER, "");
}

/// Remove the root-session marker
pub fn drop_root(vfs: &mut Vfs) {
    let _ = vfs.remove_file(ROOT_SESSION_MARKER);
}

/// Shell prompt for the given state
pub fn prompt(vfs: &Vfs, user: &str, hostname: &str, home: &str, cwd: &str) -> String {
    let (user, sigil) = if is_root(vfs) { ("root", '#') } else { (user, '$') };
    let shown = if is_within(cwd, home) && home != "/" {
        format!("~{}", &cwd[home.len()..])
    } else {
        cwd.to_string()
    };
    format!("{}@{}:{}{} ", user, hostname, shown, sigil)
}
