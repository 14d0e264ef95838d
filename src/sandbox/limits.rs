//! Call-depth bound and per-invocation store state.
//!
//! The recursion limit is applied inside the guest interpreter, and every
//! invocation gets its own `wasmtime::Store`, so the limit is scoped to that one
//! execution and never visible to concurrent ones.

use std::fmt;
use std::num::NonZeroU32;

use crate::error::{Result, SandboxError};

/// Maximum Python call depth for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecursionLimit(NonZeroU32);

impl RecursionLimit {
    /// Default call depth.
    pub const DEFAULT: u32 = 100;

    /// Create a limit; zero is rejected.
    pub fn new(limit: u32) -> Result<Self> {
        NonZeroU32::new(limit)
            .map(Self)
            .ok_or_else(|| SandboxError::Config("recursion_limit must be a positive integer".into()))
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

const DEFAULT_LIMIT: NonZeroU32 = match NonZeroU32::new(RecursionLimit::DEFAULT) {
    Some(limit) => limit,
    None => panic!("default recursion limit must be non-zero"),
};

impl Default for RecursionLimit {
    fn default() -> Self {
        Self(DEFAULT_LIMIT)
    }
}

impl fmt::Display for RecursionLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store data for one guest instance.
pub struct StoreData {
    /// WASI Preview 1 context for the sandbox.
    pub wasi: wasmtime_wasi::preview1::WasiP1Ctx,
}

impl StoreData {
    pub fn new(wasi: wasmtime_wasi::preview1::WasiP1Ctx) -> Self {
        Self { wasi }
    }
}
