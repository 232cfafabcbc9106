//! In-process module binding.
//!
//! The native equivalent loads a shared object and calls through a function
//! pointer table. Loading foreign code in-process is not something this
//! implementation does; instead, modules register a factory under a path and
//! entry-symbol name, and "loading" resolves against that registry. The
//! direct-call, no-serialization semantics are preserved; only the code
//! origin differs.
//!
//! Failure modes mirror the native ones: an unknown path is "file does not
//! exist", a wrong entry name is "symbol missing", and a non-zero init
//! status aborts the open.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::module::AgentModule;

type ModuleFactory = Box<dyn Fn() -> Box<dyn AgentModule> + Send + Sync>;

struct RegisteredModule {
    symbol: String,
    factory: ModuleFactory,
}

/// Registry of loadable in-process modules.
#[derive(Default)]
pub struct ModuleRegistry {
    entries: HashMap<String, RegisteredModule>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under a path, guarded by its entry-symbol name.
    pub fn register<F, M>(&mut self, path: impl Into<String>, symbol: impl Into<String>, factory: F)
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: AgentModule + 'static,
    {
        self.entries.insert(
            path.into(),
            RegisteredModule {
                symbol: symbol.into(),
                factory: Box::new(move || Box::new(factory())),
            },
        );
    }

    /// Whether a module is registered under this path.
    pub fn is_registered(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Resolve a path and entry symbol to a fresh module instance.
    pub(crate) fn resolve(&self, path: &str, symbol: &str) -> Result<Box<dyn AgentModule>> {
        let entry = self.entries.get(path).ok_or_else(|| Error::ModuleNotFound {
            path: path.to_string(),
        })?;
        if entry.symbol != symbol {
            return Err(Error::SymbolMissing {
                path: path.to_string(),
                symbol: symbol.to_string(),
            });
        }
        Ok((entry.factory)())
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("paths", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// An open in-process module: the DSO-kind connection link.
pub struct DsoBinding {
    pub(crate) module: Box<dyn AgentModule>,
    pub(crate) path: String,
}

impl std::fmt::Debug for DsoBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DsoBinding").field("path", &self.path).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
