//! # ASTERR
//!
//! Abstract Syntax Tree Evaluated Restricted Run: run a Python snippet with
//! named inputs, after statically checking its imports against an
//! allow-list.
//!
//! Every request goes through the same pipeline:
//!
//! 1. **Parse** the source into a syntax tree (`rustpython-parser`).
//! 2. **Validate** every import statement, nested ones included, against
//!    the allow-list. Nothing runs if an import is refused.
//! 3. **Build** the runnable unit: a fixed header (recursion limit plus
//!    the `tensor2pil`/`pil2tensor` helpers) followed by the caller's source.
//! 4. **Execute** it in a fresh RustPython instance running on Wasmtime,
//!    against a capability table holding only the builtins, the helpers and
//!    the caller's parameters.
//! 5. **Capture** `asterr_result` and `extra_pnginfo`, or the raised error.
//!
//! The engine never returns an error directly; failures are data in the
//! [`ExecutionOutcome`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use asterr::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let engine = RestrictedEngine::new(SandboxConfig::default())?;
//!     let request = engine
//!         .request("asterr_result = a + b")
//!         .param("a", 2)?
//!         .param("b", 3)?;
//!
//!     let outcome = engine.run(request).await;
//!     assert_eq!(outcome.result, Some(Value::Int(5)));
//!     Ok(())
//! }
//! ```
//!
//! ## Security Model
//!
//! The allow-list is a cooperative control aimed at accidental misuse. The
//! isolation underneath it comes from WebAssembly: the guest has no
//! preopened directories, no inherited environment and no network, and
//! each execution gets its own store, so interpreter state (the recursion
//! limit included) never outlives one request.

pub mod error;
pub mod host;
pub mod prelude;
pub mod sandbox;
pub mod value;

// Re-export main types at crate root for convenience
pub use error::{ErrorKind, Result, SandboxError};
pub use host::{AsterrNode, ChangeSignal, NodeInputs, NodeOutput, SaveScriptNode, ScriptRepository};
pub use sandbox::allowlist::{is_allowed, AllowEntry, AllowList, ImportStatement};
pub use sandbox::analyzer::validate;
pub use sandbox::cache::{ModuleCache, SharedEngine};
pub use sandbox::config::{SandboxConfig, SandboxConfigBuilder, Settings};
pub use sandbox::engine::{ExecutionMetadata, ExecutionOutcome, RestrictedEngine, SandboxRequest, Stage};
pub use sandbox::limits::RecursionLimit;
pub use value::{Image, Tensor, Value};
