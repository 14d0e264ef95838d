//! Prelude module for convenient imports.

pub use crate::error::{Result, SandboxError};
pub use crate::host::{AsterrNode, NodeInputs, SaveScriptNode, ScriptRepository};
pub use crate::sandbox::{
    allowlist::AllowList,
    config::{SandboxConfig, Settings},
    engine::{ExecutionOutcome, RestrictedEngine, SandboxRequest},
};
pub use crate::value::Value;
