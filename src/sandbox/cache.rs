//! Interpreter module caching and engine sharing.
//!
//! Compiled interpreter modules are cached per engine, keyed by their
//! canonical path. Compilation is deferred until the first execution that
//! needs the interpreter; parsing and import validation never touch it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError, RwLock};

use tracing::debug;
use wasmtime::{Engine, Module};

use crate::error::{Result, SandboxError};

/// A thread-safe cache for compiled interpreter modules.
///
/// ```rust,ignore
/// use asterr::SharedEngine;
///
/// let engine = SharedEngine::shared(None)?;
/// let first = engine.module("assets/rustpython.wasm")?;
/// let second = engine.module("assets/rustpython.wasm")?;
/// assert!(Arc::ptr_eq(&first, &second));
/// ```
#[derive(Debug, Default)]
pub struct ModuleCache {
    cache: RwLock<HashMap<PathBuf, Arc<Module>>>,
}

impl ModuleCache {
    /// Create a new empty module cache.
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Get a cached module or compile it if not present.
    ///
    /// The path is canonicalized before lookup, so relative paths and
    /// symlinks resolve to the same entry.
    pub fn get_or_compile(&self, engine: &Engine, path: impl AsRef<Path>) -> Result<Arc<Module>> {
        let path = path.as_ref();

        let canonical_path = std::fs::canonicalize(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SandboxError::InterpreterNotFound(path.display().to_string())
            } else {
                SandboxError::Io(e)
            }
        })?;

        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(module) = cache.get(&canonical_path) {
                return Ok(Arc::clone(module));
            }
        }

        // Compile outside any lock
        debug!(path = %canonical_path.display(), "compiling interpreter module");
        let wasm_bytes = std::fs::read(&canonical_path)?;
        let module = Module::new(engine, &wasm_bytes).map_err(|e| {
            SandboxError::ModuleLoad(anyhow::anyhow!("failed to compile module: {}", e))
        })?;
        let module = Arc::new(module);

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have compiled the same module meanwhile
        let module = cache.entry(canonical_path).or_insert(module);
        Ok(Arc::clone(module))
    }
}

/// Engines handed out by [`SharedEngine::shared`], one per stack setting.
static SHARED_ENGINES: LazyLock<Mutex<HashMap<Option<usize>, SharedEngine>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// A wasmtime engine together with the modules compiled for it.
///
/// A [`Module`] can only be instantiated by the engine that compiled it, so
/// the cache lives with the engine instead of being keyed by path alone.
#[derive(Clone)]
pub struct SharedEngine {
    engine: Arc<Engine>,
    modules: Arc<ModuleCache>,
}

impl std::fmt::Debug for SharedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEngine")
            .field("engine", &"<wasmtime::Engine>")
            .field("modules", &self.modules)
            .finish()
    }
}

impl SharedEngine {
    /// Create a private engine, optionally capping the guest's native stack.
    pub fn new(max_wasm_stack: Option<usize>) -> Result<Self> {
        let mut config = wasmtime::Config::new();
        if let Some(bytes) = max_wasm_stack {
            config.max_wasm_stack(bytes);
        }
        let engine = Engine::new(&config)
            .map_err(|e| SandboxError::RuntimeInit(anyhow::anyhow!("failed to create engine: {}", e)))?;
        Ok(Self {
            engine: Arc::new(engine),
            modules: Arc::new(ModuleCache::new()),
        })
    }

    /// The process-wide engine for this stack setting.
    ///
    /// Every caller asking for the same setting shares one engine and its
    /// compiled modules.
    pub fn shared(max_wasm_stack: Option<usize>) -> Result<Self> {
        let mut engines = SHARED_ENGINES.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(engine) = engines.get(&max_wasm_stack) {
            return Ok(engine.clone());
        }
        let engine = Self::new(max_wasm_stack)?;
        engines.insert(max_wasm_stack, engine.clone());
        Ok(engine)
    }

    /// Get a reference to the underlying engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The interpreter at `path`, compiled for this engine.
    pub fn module(&self, path: impl AsRef<Path>) -> Result<Arc<Module>> {
        self.modules.get_or_compile(&self.engine, path)
    }

    /// Whether two handles share one engine.
    pub fn same_engine(&self, other: &SharedEngine) -> bool {
        Arc::ptr_eq(&self.engine, &other.engine)
    }
}
