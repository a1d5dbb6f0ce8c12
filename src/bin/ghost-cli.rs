//! ghost-cli - native terminal front end
//!
//! Run with: cargo run --bin ghost-cli -- --state-dir ~/.ghostshell

#[cfg(not(target_arch = "wasm32"))]
use clap::Parser;
#[cfg(not(target_arch = "wasm32"))]
use ghostshell::{Action, Engine, EngineConfig, FileStore, StateStore};
#[cfg(not(target_arch = "wasm32"))]
use std::io::{self, BufRead, Write};
#[cfg(not(target_arch = "wasm32"))]
use std::path::PathBuf;
#[cfg(not(target_arch = "wasm32"))]
use std::process::ExitCode;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;

#[cfg(not(target_arch = "wasm32"))]
#[derive(Parser, Debug)]
#[command(name = "ghost-cli", version, about = "Terminal hacking puzzle on a simulated Unix shell")]
struct Args {
    /// Directory holding the saved machine (vfs.json, shell.json)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Discard any saved state and start from the initial world
    #[arg(long)]
    fresh: bool,
}

#[cfg(not(target_arch = "wasm32"))]
fn open_engine(args: &Args, config: EngineConfig) -> Result<Engine, Box<dyn std::error::Error>> {
    let Some(dir) = &args.state_dir else {
        return Ok(Engine::new(config));
    };
    let mut store = FileStore::open(dir)?;
    if args.fresh {
        store.clear(ghostshell::vfs::persist::VFS_KEY)?;
        store.clear(ghostshell::vfs::persist::SHELL_KEY)?;
    }
    Ok(Engine::with_store(config, Box::new(store)))
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("ghost-cli: {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };
    let mut engine = match open_engine(&args, config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("ghost-cli: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if engine.config().banner {
        if let Ok(motd) = engine.vfs().read_file("/etc/motd") {
            println!("{}", motd);
        }
        println!("Read ~/README.txt to get started. Type 'help' for commands.\n");
    }

    let started = Instant::now();
    let mut cwd = engine.home().to_string();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        engine.set_clock(started.elapsed().as_millis() as u64);
        for job in engine.sweep_jobs() {
            println!("[{}]+  Done                    {}", job.id, job.command);
        }

        print!("{}", engine.prompt(&cwd));
        let _ = stdout.flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                // EOF
                println!();
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                return ExitCode::FAILURE;
            }
        }

        engine.set_clock(started.elapsed().as_millis() as u64);
        let result = engine.execute(&line, &cwd, None);
        if let Some(new_cwd) = &result.new_cwd {
            cwd = new_cwd.clone();
        }

        match result.action {
            Some(Action::Clear) => print!("\x1b[2J\x1b[H"),
            Some(Action::Reset) => cwd = engine.home().to_string(),
            Some(action) => println!("\x1b[2m[action: {}]\x1b[0m", format!("{:?}", action).to_lowercase()),
            None => {}
        }
        if !result.output.is_empty() {
            println!("{}", result.output);
        }
        if result.action == Some(Action::Disconnect) {
            break;
        }
    }

    if let Err(e) = engine.save() {
        log::warn!("failed to save state: {}", e);
    }
    ExitCode::SUCCESS
}

#[cfg(target_arch = "wasm32")]
fn main() {}
