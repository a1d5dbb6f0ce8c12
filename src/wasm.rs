//! Browser bindings
//!
//! The page owns rendering; this module only hands JSON across the boundary.

use crate::config::EngineConfig;
use crate::shell::Engine;
use crate::vfs::persist::LocalStorageStore;
use wasm_bindgen::prelude::*;

/// Initialize panic hook for better error messages in browser console
fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

fn now_ms() -> u64 {
    js_sys::Date::now() as u64
}

#[wasm_bindgen]
pub struct WasmShell {
    engine: Engine,
}

#[wasm_bindgen]
impl WasmShell {
    /// Restore the saved machine, or start a fresh one
    #[wasm_bindgen(constructor)]
    pub fn new() -> WasmShell {
        init_panic_hook();
        let mut engine = Engine::with_store(EngineConfig::default(), Box::new(LocalStorageStore));
        engine.set_clock(now_ms());
        WasmShell { engine }
    }

    /// Run one command line; returns the serialized `CommandResult`
    pub fn exec(&mut self, line: &str, cwd: &str) -> String {
        self.engine.set_clock(now_ms());
        self.engine.execute(line, cwd, None).to_json()
    }

    /// Mission progress as JSON
    pub fn progress(&self) -> String {
        serde_json::to_string(&self.engine.progress()).unwrap_or_default()
    }

    pub fn prompt(&self, cwd: &str) -> String {
        self.engine.prompt(cwd)
    }

    /// Initial working directory
    pub fn home(&self) -> String {
        self.engine.home().to_string()
    }

    /// Expire finished background jobs; returns them as JSON
    #[wasm_bindgen(js_name = sweepJobs)]
    pub fn sweep_jobs(&mut self) -> String {
        self.engine.set_clock(now_ms());
        serde_json::to_string(&self.engine.sweep_jobs()).unwrap_or_default()
    }
}

impl Default for WasmShell {
    fn default() -> Self {
        Self::new()
    }
}
