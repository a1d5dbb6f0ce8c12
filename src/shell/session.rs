//! Shell session state
//!
//! Everything a command may read or change besides the filesystem: the
//! environment, aliases, device mounts, attribute flags, counters and the
//! job/process tables. One `Session` belongs to one engine; nothing here is
//! global.

use crate::vfs::ShellSnapshot;
use crate::vfs::is_within;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Seconds since epoch of the simulated clock before any offset
pub const BASE_EPOCH: i64 = 1_767_225_600;

/// PID the first background job receives
const FIRST_JOB_PID: u32 = 4242;

/// Status of a background job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Done,
}

/// A background job started with a trailing `&`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: u32,
    pub command: String,
    pub status: JobStatus,
    pub pid: u32,
    pub started_ms: u64,
}

/// One row of `ps`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub user: &'static str,
    pub command: &'static str,
}

/// Processes always present
const STATIC_PROCESSES: &[ProcessEntry] = &[
    ProcessEntry { pid: 1, user: "root", command: "/sbin/init" },
    ProcessEntry { pid: 212, user: "root", command: "/usr/sbin/sshd -D" },
    ProcessEntry { pid: 230, user: "root", command: "/usr/sbin/cron -f" },
    ProcessEntry { pid: 311, user: "root", command: "/usr/bin/ids-monitor --watch /var/log" },
    ProcessEntry { pid: 1337, user: "ghost", command: "-bash" },
];

/// Processes that appear while some piece of state is active
const DYNAMIC_PROCESSES: &[ProcessEntry] = &[
    ProcessEntry { pid: 666, user: "root", command: "[ghost_rk]" },
    ProcessEntry { pid: 1402, user: "ghost", command: "/opt/bin/listener /tmp/ghostpipe" },
];

/// The process table: fixed entries plus toggled ones
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessTable {
    active: BTreeSet<u32>,
    killed: BTreeSet<u32>,
}

impl ProcessTable {
    /// Turn a dynamic entry on or off
    pub fn toggle(&mut self, pid: u32, on: bool) {
        if on {
            self.active.insert(pid);
            self.killed.remove(&pid);
        } else {
            self.active.remove(&pid);
        }
    }

    /// Mark a static entry as killed
    pub fn kill(&mut self, pid: u32) -> bool {
        if let Some(p) = STATIC_PROCESSES.iter().find(|p| p.pid == pid) {
            if p.pid == 1 {
                return false;
            }
            self.killed.insert(pid);
            return true;
        }
        self.active.remove(&pid)
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.list().iter().any(|p| p.pid == pid)
    }

    pub fn list(&self) -> Vec<&'static ProcessEntry> {
        STATIC_PROCESSES
            .iter()
            .filter(|p| !self.killed.contains(&p.pid))
            .chain(DYNAMIC_PROCESSES.iter().filter(|p| self.active.contains(&p.pid)))
            .collect()
    }
}

/// Dynamic process entry for the loaded rootkit
pub const ROOTKIT_PID: u32 = 666;

/// Dynamic process entry for the FIFO listener
pub const LISTENER_PID: u32 = 1402;

/// Shell state accessible to programs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Login name; unaffected by `export USER=...`
    user: String,
    pub env: BTreeMap<String, String>,
    pub aliases: BTreeMap<String, String>,
    /// device path -> mountpoint
    pub mounts: BTreeMap<String, String>,
    /// mountpoint -> options, e.g. "ro,noexec"
    pub mount_options: BTreeMap<String, String>,
    /// path -> attribute flags, e.g. ['i']
    pub attributes: BTreeMap<String, Vec<char>>,
    pub alert_level: u32,
    pub decrypt_count: u32,
    /// Vault files already counted by `decrypt`
    pub decrypted: Vec<String>,
    /// Archives `tar` built from the vault
    pub vault_archives: BTreeSet<String>,
    /// Seconds added to the simulated clock
    pub clock_offset: i64,
    pub modules: Vec<String>,
    pub jobs: Vec<Job>,
    pub processes: ProcessTable,
    /// FIFOs with a reader waiting on them
    pub fifo_listeners: BTreeSet<String>,
    pub history: Vec<String>,
    /// Host wall clock in milliseconds, as last reported by the caller
    pub clock_ms: u64,
    next_job_id: u32,
}

impl Session {
    /// A fresh session for `user` with the given home directory
    pub fn new(user: &str, hostname: &str, home: &str) -> Self {
        let mut env = BTreeMap::new();
        env.insert("HOME".to_string(), home.to_string());
        env.insert("USER".to_string(), user.to_string());
        env.insert("HOSTNAME".to_string(), hostname.to_string());
        env.insert("SHELL".to_string(), "/bin/bash".to_string());
        env.insert("PATH".to_string(), "/usr/local/bin:/usr/bin:/bin:/opt/bin".to_string());
        env.insert("TERM".to_string(), "xterm-256color".to_string());

        let mut aliases = BTreeMap::new();
        aliases.insert("ll".to_string(), "ls -l".to_string());
        aliases.insert("la".to_string(), "ls -a".to_string());

        let mut mounts = BTreeMap::new();
        mounts.insert("/dev/sdb1".to_string(), "/mnt/backup".to_string());
        let mut mount_options = BTreeMap::new();
        mount_options.insert("/mnt/backup".to_string(), "ro".to_string());

        let mut attributes = BTreeMap::new();
        attributes.insert("/var/log/auth.log".to_string(), vec!['i']);

        Self {
            user: user.to_string(),
            env,
            aliases,
            mounts,
            mount_options,
            attributes,
            alert_level: 0,
            decrypt_count: 0,
            decrypted: Vec::new(),
            vault_archives: BTreeSet::new(),
            clock_offset: 0,
            modules: Vec::new(),
            jobs: Vec::new(),
            processes: ProcessTable::default(),
            fifo_listeners: BTreeSet::new(),
            history: Vec::new(),
            clock_ms: 0,
            next_job_id: 1,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn get_env(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(|s| s.as_str())
    }

    pub fn set_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.env.insert(name.into(), value.into());
    }

    pub fn unset_env(&mut self, name: &str) -> bool {
        self.env.remove(name).is_some()
    }

    pub fn get_alias(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(|s| s.as_str())
    }

    pub fn set_alias(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.aliases.insert(name.into(), value.into());
    }

    pub fn unalias(&mut self, name: &str) -> bool {
        self.aliases.remove(name).is_some()
    }

    pub fn home(&self) -> &str {
        self.get_env("HOME").unwrap_or("/")
    }

    /// Does `path` carry the immutable flag?
    pub fn is_immutable(&self, path: &str) -> bool {
        self.attributes.get(path).is_some_and(|flags| flags.contains(&'i'))
    }

    pub fn set_flag(&mut self, path: &str, flag: char, on: bool) {
        let flags = self.attributes.entry(path.to_string()).or_default();
        if on {
            if !flags.contains(&flag) {
                flags.push(flag);
            }
        } else {
            flags.retain(|f| *f != flag);
        }
        if flags.is_empty() {
            self.attributes.remove(path);
        }
    }

    /// Move attribute flags and archive provenance along with a renamed path
    pub fn move_flags(&mut self, from: &str, to: &str) {
        let renamed = |p: &str| format!("{}{}", to, &p[from.len()..]);
        let moved: Vec<(String, Vec<char>)> = self
            .attributes
            .iter()
            .filter(|(p, _)| is_within(p, from))
            .map(|(p, f)| (renamed(p.as_str()), f.clone()))
            .collect();
        self.attributes.retain(|p, _| !is_within(p, from));
        self.attributes.extend(moved);

        let archives: Vec<String> = self
            .vault_archives
            .iter()
            .filter(|p| is_within(p, from))
            .map(|p| renamed(p.as_str()))
            .collect();
        self.vault_archives.retain(|p| !is_within(p, from));
        self.vault_archives.extend(archives);
    }

    /// Mountpoint whose subtree contains `path`, deepest first
    pub fn mountpoint_of(&self, path: &str) -> Option<&str> {
        self.mounts
            .values()
            .filter(|mp| is_within(path, mp))
            .max_by_key(|mp| mp.len())
            .map(|s| s.as_str())
    }

    /// Is `path` on a filesystem mounted read-only?
    pub fn is_read_only(&self, path: &str) -> bool {
        self.mountpoint_of(path)
            .and_then(|mp| self.mount_options.get(mp))
            .is_some_and(|opts| opts.split(',').any(|o| o == "ro"))
    }

    /// Raise the intrusion alert level
    pub fn raise_alert(&mut self, by: u32) {
        self.alert_level = self.alert_level.saturating_add(by);
    }

    /// Simulated wall clock in seconds
    pub fn now_secs(&self) -> i64 {
        BASE_EPOCH + (self.clock_ms / 1000) as i64 + self.clock_offset
    }

    /// Record a background job, returning it
    pub fn add_job(&mut self, command: &str) -> Job {
        let id = self.next_job_id;
        self.next_job_id += 1;
        let job = Job {
            id,
            command: command.to_string(),
            status: JobStatus::Running,
            pid: FIRST_JOB_PID + id,
            started_ms: self.clock_ms,
        };
        self.jobs.push(job.clone());
        job
    }

    /// Drop jobs older than `lifetime_ms`. Returns the removed jobs.
    pub fn sweep_jobs(&mut self, lifetime_ms: u64) -> Vec<Job> {
        let now = self.clock_ms;
        let (expired, alive): (Vec<Job>, Vec<Job>) = self
            .jobs
            .drain(..)
            .partition(|j| now.saturating_sub(j.started_ms) >= lifetime_ms);
        self.jobs = alive;
        if self.jobs.is_empty() {
            self.next_job_id = 1;
        }
        expired
    }

    /// Persistent subset of the session
    pub fn snapshot(&self) -> ShellSnapshot {
        ShellSnapshot {
            aliases: self.aliases.clone(),
            env: self.env.clone(),
            alert_level: self.alert_level,
            clock_offset: self.clock_offset,
            modules: self.modules.clone(),
            immutable: self.attributes.clone(),
            mounts: self.mounts.clone(),
            mount_options: self.mount_options.clone(),
            decrypt_count: self.decrypt_count,
            decrypted: self.decrypted.clone(),
            vault_archives: self.vault_archives.clone(),
        }
    }

    /// Overlay a saved snapshot onto this session
    pub fn restore(&mut self, snap: ShellSnapshot) {
        self.aliases = snap.aliases;
        self.env.extend(snap.env);
        self.alert_level = snap.alert_level;
        self.clock_offset = snap.clock_offset;
        self.modules = snap.modules;
        self.attributes = snap.immutable;
        self.mounts = snap.mounts;
        self.mount_options = snap.mount_options;
        self.decrypt_count = snap.decrypt_count;
        self.decrypted = snap.decrypted;
        self.vault_archives = snap.vault_archives;
        let rootkit = self.modules.iter().any(|m| m == "ghost_rk");
        self.processes.toggle(ROOTKIT_PID, rootkit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("ghost", "nexus", "/home/ghost")
    }

    #[test]
    fn test_env_and_alias() {
        let mut s = session();
        assert_eq!(s.home(), "/home/ghost");
        s.set_env("FOO", "bar");
        assert_eq!(s.get_env("FOO"), Some("bar"));
        assert!(s.unset_env("FOO"));
        assert!(!s.unset_env("FOO"));
        assert_eq!(s.get_alias("ll"), Some("ls -l"));
    }

    #[test]
    fn test_flags() {
        let mut s = session();
        assert!(s.is_immutable("/var/log/auth.log"));
        s.set_flag("/var/log/auth.log", 'i', false);
        assert!(!s.is_immutable("/var/log/auth.log"));
        assert!(!s.attributes.contains_key("/var/log/auth.log"));
    }

    #[test]
    fn test_read_only_mount() {
        let s = session();
        assert!(s.is_read_only("/mnt/backup/shadow.bak"));
        assert!(!s.is_read_only("/mnt/usb/x"));
        assert!(!s.is_read_only("/mnt/backupx"));
    }

    #[test]
    fn test_jobs_expire_on_sweep() {
        let mut s = session();
        s.clock_ms = 1000;
        let job = s.add_job("nmap 10.0.13.0/24");
        assert_eq!(job.id, 1);
        assert_eq!(job.status, JobStatus::Running);
        s.clock_ms = 3000;
        assert!(s.sweep_jobs(5000).is_empty());
        s.clock_ms = 6000;
        let expired = s.sweep_jobs(5000);
        assert_eq!(expired.len(), 1);
        assert!(s.jobs.is_empty());
    }

    #[test]
    fn test_process_toggle() {
        let mut s = session();
        assert!(!s.processes.is_running(ROOTKIT_PID));
        s.processes.toggle(ROOTKIT_PID, true);
        assert!(s.processes.is_running(ROOTKIT_PID));
        assert!(s.processes.kill(230));
        assert!(!s.processes.is_running(230));
        assert!(!s.processes.kill(1));
    }

    #[test]
    fn test_snapshot_restore() {
        let mut s = session();
        s.alert_level = 4;
        s.modules.push("ghost_rk".into());
        let snap = s.snapshot();
        let mut fresh = session();
        fresh.restore(snap);
        assert_eq!(fresh.alert_level, 4);
        assert!(fresh.processes.is_running(ROOTKIT_PID));
    }

    #[test]
    fn test_move_flags_carries_archive_provenance() {
        let mut s = session();
        s.vault_archives.insert("/tmp/out/vault.tar".into());
        s.move_flags("/tmp/out", "/home/ghost/stash");
        assert!(s.vault_archives.contains("/home/ghost/stash/vault.tar"));
        assert_eq!(s.vault_archives.len(), 1);

        let mut fresh = session();
        fresh.restore(s.snapshot());
        assert_eq!(fresh.vault_archives, s.vault_archives);
    }
}
