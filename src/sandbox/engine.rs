//! The restricted execution engine.
//!
//! `run` drives one request through
//! `Created -> Parsed -> Validated -> NamespaceBuilt -> Executed` and always
//! returns an [`ExecutionOutcome`]. Failures at any stage are captured in
//! the outcome, never propagated; nothing is retried.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Result, SandboxError};
use crate::sandbox::allowlist::{AllowEntry, AllowList};
use crate::sandbox::analyzer;
use crate::sandbox::cache::SharedEngine;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::executor::WasmExecutor;
use crate::sandbox::limits::RecursionLimit;
use crate::sandbox::namespace::{self, Params, CAPABILITY_NAME};
use crate::value::Value;

/// Names a parameter may not take, since the driver owns them.
const RESERVED_NAMES: &[&str] = &["__builtins__", "__name__", CAPABILITY_NAME];

/// One invocation's inputs. Immutable once handed to the engine.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    source: String,
    params: Params,
    extra_modules: Vec<AllowEntry>,
    allow_list: AllowList,
    recursion_limit: RecursionLimit,
}

impl SandboxRequest {
    /// A request with the default allow-list and recursion limit.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            params: Params::new(),
            extra_modules: Vec::new(),
            allow_list: AllowList::defaults(),
            recursion_limit: RecursionLimit::default(),
        }
    }

    /// Bind a parameter in the execution namespace.
    ///
    /// Names must be Python identifiers and not one of the driver's own
    /// bindings.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let name = name.into();
        validate_param_name(&name)?;
        self.params.insert(name, value.into());
        Ok(self)
    }

    /// Bind every parameter from an iterator.
    pub fn params<I, K, V>(self, params: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        params
            .into_iter()
            .try_fold(self, |request, (name, value)| request.param(name, value))
    }

    /// Allow extra modules. They are consulted before the defaults.
    pub fn allow_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<AllowEntry>,
    {
        self.extra_modules
            .extend(modules.into_iter().map(Into::into));
        self.allow_list = AllowList::with_defaults(self.extra_modules.iter().cloned());
        self
    }

    /// Set the call depth limit.
    pub fn recursion_limit(mut self, limit: RecursionLimit) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn parameters(&self) -> &Params {
        &self.params
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    pub fn limit(&self) -> RecursionLimit {
        self.recursion_limit
    }
}

fn validate_param_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let is_identifier = chars
        .next()
        .is_some_and(|c| c == '_' || c.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric());
    if !is_identifier {
        return Err(SandboxError::InvalidParameter(format!(
            "{name:?} is not a valid identifier"
        )));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(SandboxError::InvalidParameter(format!("{name:?} is reserved")));
    }
    Ok(())
}

/// Pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Created,
    Parsed,
    Validated,
    NamespaceBuilt,
    Executed,
}

/// Execution metadata.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetadata {
    /// Wall-clock time spent in the pipeline.
    pub duration: Duration,
    /// Import statements the analyzer inspected.
    pub imports_checked: usize,
}

/// The uniform envelope returned by every invocation.
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Value bound to `asterr_result`, if any.
    pub result: Option<Value>,
    /// Value bound to `extra_pnginfo`, if any.
    pub extra_pnginfo: Option<Value>,
    /// The captured failure, if the invocation failed.
    pub error: Option<SandboxError>,
    /// Last stage completed.
    pub reached: Stage,
    /// The universal wildcard disabled import checking.
    pub insecure: bool,
    /// Output printed by the caller's code.
    pub stdout: String,
    /// Captured stderr of the interpreter.
    pub stderr: String,
    /// Timing and analysis details.
    pub metadata: ExecutionMetadata,
}

impl ExecutionOutcome {
    fn created() -> Self {
        Self {
            result: None,
            extra_pnginfo: None,
            error: None,
            reached: Stage::Created,
            insecure: false,
            stdout: String::new(),
            stderr: String::new(),
            metadata: ExecutionMetadata::default(),
        }
    }

    /// Check if the invocation succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Split into `(result, extra_pnginfo)` or the captured error.
    pub fn into_result(self) -> Result<(Option<Value>, Option<Value>)> {
        match self.error {
            Some(err) => Err(err),
            None => Ok((self.result, self.extra_pnginfo)),
        }
    }
}

/// Restricted execution engine.
///
/// Cheap to clone; clones share the wasmtime engine and compiled
/// interpreter.
#[derive(Debug, Clone)]
pub struct RestrictedEngine {
    config: SandboxConfig,
    executor: WasmExecutor,
}

impl RestrictedEngine {
    /// Create an engine. The interpreter is compiled lazily on first use.
    ///
    /// Engines with the same `max_wasm_stack` share one wasmtime engine and
    /// its compiled interpreter.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let engine = SharedEngine::shared(config.max_wasm_stack)?;
        Ok(Self {
            executor: WasmExecutor::new(engine, config.clone()),
            config,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// A request carrying this engine's recursion limit and extra modules.
    pub fn request(&self, source: impl Into<String>) -> SandboxRequest {
        SandboxRequest::new(source)
            .allow_modules(self.config.extra_allowed_modules.iter().map(String::as_str))
            .recursion_limit(self.config.recursion_limit)
    }

    /// Run a request on a dedicated blocking worker.
    pub async fn run(&self, request: SandboxRequest) -> ExecutionOutcome {
        let engine = self.clone();
        match tokio::task::spawn_blocking(move || engine.run_blocking(&request)).await {
            Ok(outcome) => outcome,
            Err(e) => ExecutionOutcome {
                error: Some(SandboxError::ExecutionFailed(format!("task panicked: {}", e))),
                ..ExecutionOutcome::created()
            },
        }
    }

    /// Run a request on the current thread.
    pub fn run_blocking(&self, request: &SandboxRequest) -> ExecutionOutcome {
        let started = Instant::now();
        let mut outcome = ExecutionOutcome::created();
        if let Err(err) = self.drive(request, &mut outcome) {
            debug!(stage = ?outcome.reached, error = %err, "execution failed");
            outcome.error = Some(err);
        }
        outcome.metadata.duration = started.elapsed();
        debug!(duration = ?outcome.metadata.duration, success = outcome.is_success(), "execution finished");
        outcome
    }

    fn drive(&self, request: &SandboxRequest, outcome: &mut ExecutionOutcome) -> Result<()> {
        let parsed = analyzer::parse(request.source())?;
        outcome.reached = Stage::Parsed;

        let validated = parsed.validate(request.allow_list())?;
        outcome.reached = Stage::Validated;
        outcome.insecure = validated.insecure;
        outcome.metadata.imports_checked = validated.imports_checked;
        if validated.insecure {
            warn!("allow-list contains \"*\": any module may be imported, this is a potential security risk");
        }

        let unit = namespace::build(parsed.source(), request.limit());
        outcome.reached = Stage::NamespaceBuilt;

        let run = self
            .executor
            .execute(&unit, request.parameters(), request.allow_list())?;
        outcome.reached = Stage::Executed;
        outcome.stderr = run.stderr;

        let report = run.report;
        if !report.stdout.is_empty() {
            info!(output = %report.stdout, "script output");
        }
        outcome.stdout = report.stdout;
        match report.error {
            Some(err) => Err(err),
            None => {
                outcome.result = report.result;
                outcome.extra_pnginfo = report.metadata;
                Ok(())
            }
        }
    }
}
