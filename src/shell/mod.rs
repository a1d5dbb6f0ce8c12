//! Shell - Command-line interpreter
//!
//! The engine behind the puzzle terminal. Features:
//! - Command parsing with pipes, redirections, quotes and variables
//! - A registry of programs, each classified as read-only or mutating
//! - Execution of files by path (scripts and canned binaries)
//! - Background jobs with caller-driven expiry
//!
//! One [`Engine`] owns the filesystem and the session; every command line
//! goes through [`Engine::execute`].

pub mod exec;
pub mod executor;
pub mod parser;
pub mod programs;
pub mod session;

pub use executor::{Action, CommandResult, Engine, Invocation, Program, ProgramRegistry};
pub use parser::{ParseError, Redirect, tokenize};
pub use session::{Job, JobStatus, Session};
