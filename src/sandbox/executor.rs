//! Runs a runnable unit inside a fresh interpreter instance.

use wasmtime::{Linker, Store};
use wasmtime_wasi::preview1;
use wasmtime_wasi::{I32Exit, WasiCtxBuilder};

use crate::error::{Result, SandboxError};
use crate::sandbox::allowlist::AllowList;
use crate::sandbox::cache::SharedEngine;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::guest::{read_report, GuestReport, Payload, DRIVER};
use crate::sandbox::io::SandboxIo;
use crate::sandbox::limits::StoreData;
use crate::sandbox::namespace::{Params, RunnableUnit};

/// Raw result of one guest instance.
#[derive(Debug)]
pub struct GuestRun {
    /// The driver's report.
    pub report: GuestReport,
    /// Captured stderr.
    pub stderr: String,
    /// Exit code of the interpreter (0 for success).
    pub exit_code: i32,
}

/// Executes units on the WebAssembly interpreter.
#[derive(Debug, Clone)]
pub struct WasmExecutor {
    engine: SharedEngine,
    config: SandboxConfig,
}

impl WasmExecutor {
    pub fn new(engine: SharedEngine, config: SandboxConfig) -> Self {
        Self { engine, config }
    }

    /// Run `unit` with `params` bound in its namespace.
    ///
    /// Every call instantiates a new store, so nothing the unit does,
    /// including changing the recursion limit, survives the call.
    pub fn execute(
        &self,
        unit: &RunnableUnit,
        params: &Params,
        allow_list: &AllowList,
    ) -> Result<GuestRun> {
        let module = self.engine.module(&self.config.interpreter_path)?;

        let payload = Payload::new(unit, params, allow_list).to_bytes()?;
        let io = SandboxIo::new(payload, self.config.output_capacity);

        // No preopened directories, no environment, no network
        let mut builder = WasiCtxBuilder::new();
        builder.args(&["python", "-c", DRIVER]);
        io.attach(&mut builder);
        let wasi_ctx = builder.build_p1();

        let mut store = Store::new(self.engine.engine(), StoreData::new(wasi_ctx));

        let mut linker = Linker::new(self.engine.engine());
        preview1::add_to_linker_sync(&mut linker, |data: &mut StoreData| &mut data.wasi)
            .map_err(|e| SandboxError::RuntimeInit(anyhow::anyhow!("failed to link WASI: {}", e)))?;

        let instance = linker.instantiate(&mut store, &module).map_err(|e| {
            SandboxError::ModuleLoad(anyhow::anyhow!("failed to instantiate: {}", e))
        })?;

        // WASI entry point
        let start = instance
            .get_typed_func::<(), ()>(&mut store, "_start")
            .map_err(|e| {
                SandboxError::ModuleLoad(anyhow::anyhow!("failed to get _start function: {}", e))
            })?;

        let exit_code = match start.call(&mut store, ()) {
            Ok(()) => 0,
            Err(e) => match e.downcast_ref::<I32Exit>() {
                Some(exit) => exit.0,
                None => {
                    // A trap, typically guest stack exhaustion
                    let stderr = io.stderr_str();
                    return Err(SandboxError::from_python_stderr(&stderr)
                        .unwrap_or_else(|| SandboxError::ExecutionFailed(format!("{e:#}"))));
                }
            },
        };
        drop(store);

        let stderr = io.stderr_str();
        let report = read_report(&io.stdout_str(), &stderr, exit_code)?;
        Ok(GuestRun {
            report,
            stderr,
            exit_code,
        })
    }
}
