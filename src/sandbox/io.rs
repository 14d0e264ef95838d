//! In-memory stdio for a guest instance.
//!
//! stdin carries the invocation payload; stdout and stderr are captured
//! into bounded buffers that stay readable after the store is dropped.

use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::WasiCtxBuilder;

/// Default capacity of each output buffer.
pub const DEFAULT_OUTPUT_CAPACITY: usize = 4 * 1024 * 1024;

/// I/O wiring for a sandbox execution.
#[derive(Clone, Debug)]
pub struct SandboxIo {
    /// Input provided to the guest.
    pub stdin: MemoryInputPipe,
    /// Captured stdout.
    pub stdout: MemoryOutputPipe,
    /// Captured stderr.
    pub stderr: MemoryOutputPipe,
}

impl SandboxIo {
    /// Create I/O with the given stdin bytes and output capacity.
    pub fn new(input: impl Into<Vec<u8>>, capacity: usize) -> Self {
        Self {
            stdin: MemoryInputPipe::new(input.into()),
            stdout: MemoryOutputPipe::new(capacity),
            stderr: MemoryOutputPipe::new(capacity),
        }
    }

    /// Attach the pipes to a WASI context under construction.
    pub fn attach(&self, builder: &mut WasiCtxBuilder) {
        builder
            .stdin(self.stdin.clone())
            .stdout(self.stdout.clone())
            .stderr(self.stderr.clone());
    }

    /// Get the captured stdout as a string.
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout.contents()).into_owned()
    }

    /// Get the captured stderr as a string.
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr.contents()).into_owned()
    }
}

impl Default for SandboxIo {
    fn default() -> Self {
        Self::new(Vec::new(), DEFAULT_OUTPUT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outputs_start_empty() {
        let io = SandboxIo::new(b"{}".to_vec(), 1024);
        assert!(io.stdout_str().is_empty());
        assert!(io.stderr_str().is_empty());
    }
}
