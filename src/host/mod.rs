//! Host-side glue: preset storage and the graph-node wrappers.

pub mod node;
pub mod scripts;

pub use node::{is_changed, AsterrNode, ChangeSignal, NodeInputs, NodeOutput, SaveScriptNode};
pub use scripts::{SaveStatus, ScriptRepository};
