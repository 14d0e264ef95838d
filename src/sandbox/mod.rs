//! Sandbox module containing the validation and execution pipeline.

pub mod allowlist;
pub mod analyzer;
pub mod cache;
pub mod config;
pub mod engine;
pub mod executor;
pub mod guest;
pub mod io;
pub mod limits;
pub mod namespace;
