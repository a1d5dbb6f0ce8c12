//! ghostshell - a simulated Unix shell for a terminal hacking puzzle
//!
//! Design principles:
//! - Tractable: one engine owns all state, no globals
//! - Deterministic: the caller supplies the clock, the engine never sleeps
//! - Honest failures: every user mistake becomes shell-style text
//! - Derived progress: mission state is read from the filesystem, never cached
//!
//! Platform support:
//! - Browser (wasm32-unknown-unknown): [`wasm::WasmShell`] with localStorage persistence
//! - Native: the `ghost-cli` REPL with a directory-backed state store

pub mod config;
pub mod mission;
pub mod shell;
pub mod vfs;
pub mod world;

#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub use config::{ConfigError, EngineConfig};
pub use mission::{Progress, Rank};
pub use shell::{Action, CommandResult, Engine};
pub use vfs::{FileStore, MemoryStore, StateError, StateStore, Vfs};
