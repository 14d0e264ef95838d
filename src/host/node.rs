//! Graph-node wrappers around the engine.
//!
//! `AsterrNode` evaluates a script with up to eleven ad-hoc inputs and
//! re-raises captured errors to the host. `SaveScriptNode` persists a
//! script as a preset.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::error::{Result, SandboxError};
use crate::host::scripts::{SaveStatus, ScriptRepository};
use crate::sandbox::engine::RestrictedEngine;
use crate::sandbox::namespace::METADATA_NAME;
use crate::value::Value;

/// Names of the ad-hoc parameter slots.
pub const PARAM_SLOTS: [&str; 11] = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k"];

/// Preset selection meaning "use the inline script".
pub const NO_PRESET: &str = "None";

/// Trigger value that forces re-execution.
pub const TRIGGER_RUN: i64 = 1;

/// Inputs of one node evaluation.
#[derive(Debug, Clone, Default)]
pub struct NodeInputs {
    /// Inline source.
    pub script: String,
    /// Preset name overriding `script` when resolvable.
    pub preset_script: Option<String>,
    /// Forces re-execution when equal to [`TRIGGER_RUN`].
    pub trigger_run: Option<i64>,
    /// Forces re-execution on every evaluation.
    pub always_run: bool,
    /// Hidden host input: the prompt graph.
    pub prompt: Option<Value>,
    /// Hidden host input: image metadata passed through the namespace.
    pub extra_pnginfo: Option<Value>,
    params: BTreeMap<String, Value>,
}

impl NodeInputs {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            ..Self::default()
        }
    }

    /// Fill one of the slots `a` through `k`.
    pub fn with_param(mut self, slot: &str, value: impl Into<Value>) -> Result<Self> {
        if !PARAM_SLOTS.contains(&slot) {
            return Err(SandboxError::InvalidParameter(format!(
                "{slot:?} is not an input slot (expected one of a..=k)"
            )));
        }
        self.params.insert(slot.to_string(), value.into());
        Ok(self)
    }

    pub fn with_preset(mut self, name: impl Into<String>) -> Self {
        self.preset_script = Some(name.into());
        self
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }
}

/// Change-detection signal reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSignal {
    /// Never equal to a previous signal; the host must re-execute.
    AlwaysDifferent,
    /// Stable; the host may reuse a cached result.
    Stable,
}

/// Decide whether the host must re-execute.
pub fn is_changed(inputs: &NodeInputs) -> ChangeSignal {
    if inputs.trigger_run == Some(TRIGGER_RUN) || inputs.always_run {
        ChangeSignal::AlwaysDifferent
    } else {
        ChangeSignal::Stable
    }
}

/// Outputs of a successful evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
    /// Primary output.
    pub result: Option<Value>,
    /// Secondary output, present when the script produced metadata.
    pub extra_pnginfo: Option<Value>,
}

/// Host wrapper evaluating scripts.
#[derive(Debug, Clone)]
pub struct AsterrNode {
    engine: RestrictedEngine,
    scripts: ScriptRepository,
}

impl AsterrNode {
    /// Build a node whose presets live in the engine's configured directory.
    pub fn new(engine: RestrictedEngine) -> Self {
        let scripts = ScriptRepository::new(&engine.config().scripts_dir);
        Self { engine, scripts }
    }

    pub fn with_scripts(engine: RestrictedEngine, scripts: ScriptRepository) -> Self {
        Self { engine, scripts }
    }

    /// Presets selectable on the node, [`NO_PRESET`] first.
    pub fn preset_choices(&self) -> Result<Vec<String>> {
        let mut choices = vec![NO_PRESET.to_string()];
        choices.extend(self.scripts.list_scripts()?.into_keys());
        Ok(choices)
    }

    /// Evaluate the node, re-raising any captured error.
    pub async fn evaluate(&self, inputs: NodeInputs) -> Result<NodeOutput> {
        let source = self.resolve_source(&inputs)?;

        let mut request = self.engine.request(source).params(inputs.params)?;
        if let Some(prompt) = inputs.prompt {
            request = request.param("prompt", prompt)?;
        }
        if let Some(metadata) = inputs.extra_pnginfo {
            request = request.param(METADATA_NAME, metadata)?;
        }

        let (result, extra_pnginfo) = self.engine.run(request).await.into_result()?;
        Ok(NodeOutput {
            result,
            extra_pnginfo,
        })
    }

    /// The preset's source if one is selected and non-empty, else the inline script.
    fn resolve_source(&self, inputs: &NodeInputs) -> Result<String> {
        let preset = inputs
            .preset_script
            .as_deref()
            .filter(|name| !name.is_empty() && *name != NO_PRESET);
        let Some(name) = preset else {
            return Ok(inputs.script.clone());
        };

        match self.scripts.resolve(name)? {
            Some(path) => {
                info!(preset = name, path = %path.display(), "loading preset script");
                let source = self.scripts.read(name)?;
                if source.is_empty() {
                    Ok(inputs.script.clone())
                } else {
                    Ok(source)
                }
            }
            None => {
                warn!(preset = name, "preset script not found, using inline script");
                Ok(inputs.script.clone())
            }
        }
    }
}

/// Host wrapper persisting scripts as presets.
#[derive(Debug, Clone)]
pub struct SaveScriptNode {
    scripts: ScriptRepository,
}

impl SaveScriptNode {
    pub fn new(scripts: ScriptRepository) -> Self {
        Self { scripts }
    }

    /// Save `script` under `name` and pass it through unchanged.
    ///
    /// Refusals are logged; I/O failures are returned.
    pub fn save_script(&self, script: String, name: &str, overwrite: bool) -> Result<String> {
        match self.scripts.save(name, &script, overwrite)? {
            SaveStatus::Saved(path) => info!(path = %path.display(), "saved script"),
            SaveStatus::AlreadyExists(path) => {
                warn!(path = %path.display(), "script exists and overwrite is off, not saving")
            }
            SaveStatus::BlankSource => warn!("script is empty, you must provide a script to save"),
            SaveStatus::BlankName => {
                warn!("script name is empty, you must provide a valid script name")
            }
        }
        Ok(script)
    }
}
