//! Engine configuration with builder pattern, plus the external settings file.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Result, SandboxError};
use crate::sandbox::io::DEFAULT_OUTPUT_CAPACITY;
use crate::sandbox::limits::RecursionLimit;

/// Configuration for the restricted execution engine.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Path to the RustPython wasm file.
    pub interpreter_path: PathBuf,
    /// Call depth applied to every request built from this config.
    pub recursion_limit: RecursionLimit,
    /// Modules allowed in addition to the built-in defaults.
    pub extra_allowed_modules: Vec<String>,
    /// Directory holding preset scripts.
    pub scripts_dir: PathBuf,
    /// Capacity of each captured output stream, in bytes.
    pub output_capacity: usize,
    /// Native stack available to the guest, in bytes.
    pub max_wasm_stack: Option<usize>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter_path: PathBuf::from("assets/rustpython.wasm"),
            recursion_limit: RecursionLimit::default(),
            extra_allowed_modules: Vec::new(),
            scripts_dir: PathBuf::from("scripts"),
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
            max_wasm_stack: None,
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Defaults overridden by a settings file.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::builder().settings(settings).try_build()
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    interpreter_path: Option<PathBuf>,
    recursion_limit: Option<u32>,
    extra_allowed_modules: Vec<String>,
    scripts_dir: Option<PathBuf>,
    output_capacity: Option<usize>,
    max_wasm_stack: Option<usize>,
}

impl SandboxConfigBuilder {
    /// Set the path to the RustPython wasm interpreter.
    pub fn interpreter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.interpreter_path = Some(path.into());
        self
    }

    /// Set the call depth limit.
    pub fn recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = Some(limit);
        self
    }

    /// Allow additional modules on top of the defaults.
    pub fn allow_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_allowed_modules
            .extend(modules.into_iter().map(Into::into));
        self
    }

    /// Set the preset script directory.
    pub fn scripts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scripts_dir = Some(dir.into());
        self
    }

    /// Set the capacity of each captured output stream.
    pub fn output_capacity(mut self, bytes: usize) -> Self {
        self.output_capacity = Some(bytes);
        self
    }

    /// Cap the native stack available to the guest.
    pub fn max_wasm_stack(mut self, bytes: usize) -> Self {
        self.max_wasm_stack = Some(bytes);
        self
    }

    /// Apply overrides from a settings file.
    pub fn settings(mut self, settings: &Settings) -> Self {
        if let Some(limit) = settings.recursion_limit {
            self.recursion_limit = Some(limit);
        }
        if let Some(modules) = &settings.allowed_modules {
            self.extra_allowed_modules.extend(modules.iter().cloned());
        }
        self
    }

    /// Build the SandboxConfig, rejecting a zero recursion limit.
    pub fn try_build(self) -> Result<SandboxConfig> {
        let recursion_limit = match self.recursion_limit {
            Some(limit) => RecursionLimit::new(limit)?,
            None => RecursionLimit::default(),
        };
        Ok(self.assemble(recursion_limit))
    }

    /// Build the SandboxConfig, replacing an invalid recursion limit with
    /// the default.
    pub fn build(self) -> SandboxConfig {
        let recursion_limit = match self.recursion_limit.map(RecursionLimit::new) {
            Some(Ok(limit)) => limit,
            Some(Err(err)) => {
                warn!(error = %err, "using default recursion limit");
                RecursionLimit::default()
            }
            None => RecursionLimit::default(),
        };
        self.assemble(recursion_limit)
    }

    fn assemble(self, recursion_limit: RecursionLimit) -> SandboxConfig {
        let default = SandboxConfig::default();
        SandboxConfig {
            interpreter_path: self.interpreter_path.unwrap_or(default.interpreter_path),
            recursion_limit,
            extra_allowed_modules: self.extra_allowed_modules,
            scripts_dir: self.scripts_dir.unwrap_or(default.scripts_dir),
            output_capacity: self.output_capacity.unwrap_or(default.output_capacity),
            max_wasm_stack: self.max_wasm_stack.or(default.max_wasm_stack),
        }
    }
}

/// Overrides read from the external settings file (`config.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Replaces the default recursion limit.
    pub recursion_limit: Option<u32>,
    /// Merged with, never replacing, the default allow-list.
    pub allowed_modules: Option<Vec<String>>,
}

impl Settings {
    /// Read settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Parse settings from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| SandboxError::Config(e.to_string()))
    }

    /// Read settings, logging and falling back to empty settings on failure.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(settings) => {
                info!(path = %path.display(), "settings loaded");
                settings
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "settings could not be loaded");
                Self::default()
            }
        }
    }
}
