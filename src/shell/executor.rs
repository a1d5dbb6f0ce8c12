//! Shell command executor
//!
//! Runs a command line against the engine state:
//! 1. Trailing `&` detection
//! 2. Pipeline splitting, variable expansion and tokenizing per segment
//! 3. Assignment peeling and one level of alias substitution
//! 4. Dispatch through the program registry (or the executable runner)
//! 5. Output redirection of the final segment
//! 6. Background job bookkeeping and state persistence

use super::exec;
use super::parser::{self, Redirect};
use super::programs::{self, *};
use super::session::{Job, LISTENER_PID, Session};
use crate::config::EngineConfig;
use crate::mission::{self, Progress};
use crate::vfs::persist::{SHELL_KEY, VFS_KEY};
use crate::vfs::{ShellSnapshot, StateError, StateStore, Vfs, basename, join, resolve, top_level};
use crate::world::{self, AUTH_LOG, DISK_FULL_SENTINEL, ROOT_PASSWORD};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Side-effect directive for the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Clear,
    Scan,
    Crack,
    Transfer,
    Decrypt,
    Overflow,
    Disconnect,
    Reset,
}

/// Result of executing a command line
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CommandResult {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn text(output: impl Into<String>) -> Self {
        Self::success().with_output(output)
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.new_cwd = Some(cwd.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.new_prompt = Some(prompt.into());
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Serialize for a JS host
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"output\":\"\"}".to_string())
    }
}

/// Everything a program gets to know about its invocation
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    /// Program name as dispatched (after alias substitution)
    pub name: &'a str,
    pub cwd: &'a str,
    pub args: &'a [String],
    /// Output of the previous pipeline segment
    pub stdin: Option<&'a str>,
    /// `KEY=VALUE` prefixes of this invocation only
    pub overlay: &'a BTreeMap<String, String>,
    /// Output goes to another program or a file, not the terminal
    pub piped: bool,
}

impl<'a> Invocation<'a> {
    /// Resolve a path argument, expanding `~`
    pub fn path(&self, session: &Session, arg: &str) -> String {
        resolve_arg(session, self.cwd, arg)
    }

    /// Look up a variable, the overlay first
    pub fn env(&self, session: &Session, name: &str) -> Option<String> {
        self.overlay
            .get(name)
            .cloned()
            .or_else(|| session.get_env(name).map(String::from))
    }
}

/// Resolve `arg` against `cwd` with `~` expansion
pub fn resolve_arg(session: &Session, cwd: &str, arg: &str) -> String {
    if arg == "~" {
        return resolve("/", session.home());
    }
    if let Some(rest) = arg.strip_prefix("~/") {
        return resolve(session.home(), rest);
    }
    resolve(cwd, arg)
}

pub type ReadFn = fn(&Invocation, &Vfs, &Session) -> CommandResult;
pub type MutateFn = fn(&Invocation, &mut Vfs, &mut Session) -> CommandResult;

/// A registered program, classified by the access it needs
#[derive(Clone, Copy)]
pub enum Program {
    /// Sees the state through shared references only
    Read(ReadFn),
    /// May change the filesystem and session
    Mutate(MutateFn),
}

/// Registry of available programs
pub struct ProgramRegistry {
    programs: HashMap<String, Program>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        let mut reg = Self {
            programs: HashMap::new(),
        };

        // Read-only programs
        reg.register_read("pwd", prog_pwd);
        reg.register_read("ls", prog_ls);
        reg.register_read("cat", prog_cat);
        reg.register_read("echo", prog_echo);
        reg.register_read("grep", prog_grep);
        reg.register_read("head", prog_head);
        reg.register_read("tail", prog_tail);
        reg.register_read("wc", prog_wc);
        reg.register_read("sort", prog_sort);
        reg.register_read("uniq", prog_uniq);
        reg.register_read("base64", prog_base64);
        reg.register_read("readlink", prog_readlink);
        reg.register_read("find", prog_find);
        reg.register_read("stat", prog_stat);
        reg.register_read("lsattr", prog_lsattr);
        reg.register_read("getcap", prog_getcap);
        reg.register_read("df", prog_df);
        reg.register_read("ps", prog_ps);
        reg.register_read("jobs", prog_jobs);
        reg.register_read("whoami", prog_whoami);
        reg.register_read("id", prog_id);
        reg.register_read("env", prog_env);
        reg.register_read("uname", prog_uname);
        reg.register_read("hostname", prog_hostname);
        reg.register_read("lsmod", prog_lsmod);
        reg.register_read("history", prog_history);
        reg.register_read("help", prog_help);
        reg.register_read("status", prog_status);

        // State-changing programs
        reg.register_mutate("cd", prog_cd);
        reg.register_mutate("mkdir", prog_mkdir);
        reg.register_mutate("touch", prog_touch);
        reg.register_mutate("rm", prog_rm);
        reg.register_mutate("rmdir", prog_rmdir);
        reg.register_mutate("cp", prog_cp);
        reg.register_mutate("mv", prog_mv);
        reg.register_mutate("ln", prog_ln);
        reg.register_mutate("mkfifo", prog_mkfifo);
        reg.register_mutate("chmod", prog_chmod);
        reg.register_mutate("chattr", prog_chattr);
        reg.register_mutate("setcap", prog_setcap);
        reg.register_mutate("mount", prog_mount);
        reg.register_mutate("umount", prog_umount);
        reg.register_mutate("kill", prog_kill);
        reg.register_mutate("export", prog_export);
        reg.register_mutate("unset", prog_unset);
        reg.register_mutate("alias", prog_alias);
        reg.register_mutate("unalias", prog_unalias);
        reg.register_mutate("su", prog_su);
        reg.register_mutate("exit", prog_exit);
        reg.register_mutate("logout", prog_exit);
        reg.register_mutate("date", prog_date);
        reg.register_mutate("insmod", prog_insmod);
        reg.register_mutate("rmmod", prog_rmmod);
        reg.register_mutate("nmap", prog_nmap);
        reg.register_mutate("john", prog_john);
        reg.register_mutate("decrypt", prog_decrypt);
        reg.register_mutate("scp", prog_scp);
        reg.register_mutate("tar", prog_tar);
        reg.register_mutate("clear", prog_clear);
        reg.register_mutate("disconnect", prog_disconnect);
        reg.register_mutate("reset", prog_reset);

        reg
    }

    pub fn register_read(&mut self, name: &str, func: ReadFn) {
        self.programs.insert(name.to_string(), Program::Read(func));
    }

    pub fn register_mutate(&mut self, name: &str, func: MutateFn) {
        self.programs.insert(name.to_string(), Program::Mutate(func));
    }

    pub fn get(&self, name: &str) -> Option<Program> {
        self.programs.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }

    /// Does `name` only read state?
    pub fn is_read_only(&self, name: &str) -> bool {
        matches!(self.get(name), Some(Program::Read(_)))
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.programs.keys().map(|s| s.as_str()).collect();
        names.push("sudo");
        names.sort();
        names
    }
}

impl Default for ProgramRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The shell engine: all state of one simulated machine
pub struct Engine {
    vfs: Vfs,
    session: Session,
    config: EngineConfig,
    registry: ProgramRegistry,
    store: Option<Box<dyn StateStore>>,
}

impl Engine {
    /// A fresh machine without persistence
    pub fn new(config: EngineConfig) -> Self {
        let session = Session::new(&config.user, &config.hostname, &config.home);
        let mut vfs = Vfs::new();
        world::apply_fixtures(&mut vfs, &session);
        Self {
            vfs,
            session,
            config,
            registry: ProgramRegistry::new(),
            store: None,
        }
    }

    /// A machine restored from `store`, saving back into it.
    ///
    /// Missing or corrupt blobs fall back to the fresh world.
    pub fn with_store(config: EngineConfig, store: Box<dyn StateStore>) -> Self {
        let mut engine = Self::new(config);
        if let Some(vfs) = store.load(VFS_KEY).and_then(|blob| match Vfs::from_json(&blob) {
            Ok(vfs) => Some(vfs),
            Err(e) => {
                log::warn!("[engine] ignoring saved filesystem: {}", e);
                None
            }
        }) {
            engine.vfs = vfs;
        }
        if let Some(snap) = store.load(SHELL_KEY).and_then(|blob| match ShellSnapshot::from_json(&blob) {
            Ok(snap) => Some(snap),
            Err(e) => {
                log::warn!("[engine] ignoring saved shell state: {}", e);
                None
            }
        }) {
            engine.session.restore(snap);
        }
        world::apply_fixtures(&mut engine.vfs, &engine.session);
        engine.store = Some(store);
        engine
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProgramRegistry {
        &self.registry
    }

    /// Initial working directory
    pub fn home(&self) -> &str {
        &self.config.home
    }

    /// Report the host wall clock
    pub fn set_clock(&mut self, now_ms: u64) {
        self.session.clock_ms = now_ms;
    }

    /// Remove expired background jobs
    pub fn sweep_jobs(&mut self) -> Vec<Job> {
        let expired = self.session.sweep_jobs(self.config.job_lifetime_ms);
        for job in &expired {
            log::debug!("[jobs] [{}] done: {}", job.id, job.command);
        }
        expired
    }

    /// Mission progress, derived from the current state
    pub fn progress(&self) -> Progress {
        mission::evaluate(&self.vfs, &self.session)
    }

    pub fn prompt(&self, cwd: &str) -> String {
        world::prompt(&self.vfs, &self.config.user, &self.config.hostname, &self.config.home, cwd)
    }

    /// Back to the initial world; saved state is overwritten
    pub fn reset(&mut self) {
        log::info!("[engine] full reset");
        self.session = Session::new(&self.config.user, &self.config.hostname, &self.config.home);
        self.vfs = Vfs::new();
        world::apply_fixtures(&mut self.vfs, &self.session);
        self.persist();
    }

    /// Save both blobs now
    pub fn save(&mut self) -> Result<(), StateError> {
        let Some(store) = self.store.as_mut() else {
            return Ok(());
        };
        store.save(VFS_KEY, &self.vfs.to_json()?)?;
        store.save(SHELL_KEY, &self.session.snapshot().to_json()?)?;
        Ok(())
    }

    fn persist(&mut self) {
        if let Err(e) = self.save() {
            log::warn!("[engine] failed to save state: {}", e);
        }
    }

    /// Execute a command line from `cwd`
    pub fn execute(&mut self, line: &str, cwd: &str, stdin: Option<&str>) -> CommandResult {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return CommandResult::success();
        }
        log::debug!("[exec] {}", line);
        self.session.history.push(line.to_string());

        let was_root = world::is_root(&self.vfs);
        let mut result = self.execute_line(line, cwd, stdin);

        let root_changed = world::is_root(&self.vfs) != was_root;
        if (root_changed || result.new_cwd.is_some()) && result.new_prompt.is_none() {
            let cwd = result.new_cwd.clone().unwrap_or_else(|| cwd.to_string());
            result.new_prompt = Some(self.prompt(&cwd));
        }
        if self.config.autosave {
            self.persist();
        }
        result
    }

    fn execute_line(&mut self, line: &str, cwd: &str, stdin: Option<&str>) -> CommandResult {
        let (body, background) = parser::strip_background(line);

        let session = &self.session;
        let mut segments: Vec<String> = parser::split_pipeline(&body)
            .iter()
            .map(|s| parser::expand_vars(s, |name| session.get_env(name).map(String::from)))
            .collect();

        // Redirection only applies to the final segment
        let mut redirect = None;
        if let Some(last) = segments.last_mut() {
            match parser::split_redirect(last) {
                Ok((command, r)) => {
                    *last = command;
                    redirect = r;
                }
                Err(e) => return CommandResult::text(e.to_string()),
            }
        }

        let mut input = stdin.map(String::from);
        let mut result = CommandResult::success();
        let count = segments.len();
        for (i, segment) in segments.iter().enumerate() {
            let piped = i + 1 < count || redirect.is_some();
            result = self.run_segment(segment, cwd, input.as_deref(), piped);
            if result.action == Some(Action::Reset) {
                self.reset();
            }
            input = Some(result.output.clone());
        }

        if let Some(redirect) = redirect {
            result.output = self.apply_redirect(cwd, &redirect, &result.output).unwrap_or_default();
        }

        if background {
            let job = self.session.add_job(&body);
            let header = format!("[{}] {}", job.id, job.pid);
            result.output = if result.output.is_empty() {
                header
            } else {
                format!("{}\n{}", header, result.output)
            };
        }
        result
    }

    fn run_segment(&mut self, segment: &str, cwd: &str, stdin: Option<&str>, piped: bool) -> CommandResult {
        let mut tokens = parser::tokenize(segment);

        let mut overlay = BTreeMap::new();
        let assignments = tokens.iter().take_while(|t| parser::is_assignment(t)).count();
        for token in tokens.drain(..assignments) {
            if let Some((name, value)) = token.split_once('=') {
                overlay.insert(name.to_string(), value.to_string());
            }
        }
        if tokens.is_empty() {
            // Bare assignments set shell variables
            for (name, value) in overlay {
                self.session.set_env(name, value);
            }
            return CommandResult::success();
        }

        if let Some(alias) = self.session.get_alias(&tokens[0]) {
            let mut expanded = parser::tokenize(alias);
            expanded.extend(tokens.drain(1..));
            tokens = expanded;
            if tokens.is_empty() {
                return CommandResult::success();
            }
        }

        // sudo prefixes are peeled here so the wrapped command dispatches normally
        let mut start = 0;
        while tokens.get(start).is_some_and(|t| t == "sudo") {
            match self.sudo_prefix(&tokens[start + 1..]) {
                Ok(skip) => start += 1 + skip,
                Err(message) => return CommandResult::text(message),
            }
        }

        let name = tokens[start].as_str();
        let inv = Invocation {
            name,
            cwd,
            args: &tokens[start + 1..],
            stdin,
            overlay: &overlay,
            piped,
        };

        if name.contains('/') {
            return exec::run(&inv, &mut self.vfs, &mut self.session);
        }
        match self.registry.get(name) {
            Some(Program::Read(f)) => f(&inv, &self.vfs, &self.session),
            Some(Program::Mutate(f)) => f(&inv, &mut self.vfs, &mut self.session),
            None => CommandResult::text(format!("{}: command not found", name)),
        }
    }

    /// Handle the options of one `sudo`; returns how many tokens they used
    fn sudo_prefix(&mut self, rest: &[String]) -> Result<usize, String> {
        let (password, used) = match rest.first().map(String::as_str) {
            Some("-p") => (rest.get(1).map(String::as_str), 2),
            _ => (None, 0),
        };
        if rest.len() <= used {
            return Err("usage: sudo -p PASSWORD COMMAND [ARGS...]".to_string());
        }
        if world::is_root(&self.vfs) {
            return Ok(used);
        }
        match password {
            Some(p) if p == ROOT_PASSWORD => {
                programs::escalate(&mut self.vfs);
                Ok(used)
            }
            Some(_) => {
                self.session.raise_alert(1);
                Err("sudo: 1 incorrect password attempt".to_string())
            }
            None => Err(format!(
                "[sudo] password for {}: \nsudo: a password is required (sudo -p PASSWORD COMMAND)",
                self.config.user
            )),
        }
    }

    /// Write `data` to the redirect target. Returns what the terminal shows.
    fn apply_redirect(&mut self, cwd: &str, redirect: &Redirect, data: &str) -> Option<String> {
        let shown = &redirect.target;
        let path = resolve_arg(&self.session, cwd, shown);
        let fail = |msg: &str| Some(format!("bash: {}: {}", shown, msg));

        let physical = self.vfs.real_path(&path);
        let both = [path.as_str(), physical.as_str()];
        if both.iter().any(|p| world::is_reserved(p)) || !world::can_access(&self.vfs, &path) {
            return fail("Permission denied");
        }
        if both.iter().any(|p| self.session.is_read_only(p)) {
            return fail("Read-only file system");
        }
        for top in both.iter().filter_map(|p| top_level(p)) {
            if self.vfs.exists(&join(&top, DISK_FULL_SENTINEL)) {
                return fail("No space left on device");
            }
        }
        let real = self.vfs.resolve_link(&path).unwrap_or_else(|_| path.clone());
        if self.vfs.get(&real).is_some_and(|n| n.is_fifo()) {
            if self.session.fifo_listeners.remove(&real) {
                self.session.processes.toggle(LISTENER_PID, false);
                return Some(format!("[listener] received {} bytes", data.len()));
            }
            return fail("write blocked (no reader on fifo)");
        }
        if [&path, &physical, &real].iter().any(|p| self.session.is_immutable(p)) {
            return fail("Operation not permitted");
        }
        if self.vfs.is_dir(&real) {
            return fail("Is a directory");
        }

        let written = if redirect.append {
            self.vfs.append_file(&real, data)
        } else {
            self.vfs.write_file(&real, data)
        };
        if let Err(e) = written {
            return fail(&e.to_string());
        }
        if real == AUTH_LOG && !redirect.append && data.trim().is_empty() {
            mission::mark(&mut self.vfs, "cover");
        }
        log::debug!("[exec] wrote {} bytes to {}", data.len(), basename(&real));
        None
    }
}
