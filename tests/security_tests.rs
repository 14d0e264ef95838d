//! Security tests for import restriction and guest isolation.
//!
//! The static checks run without the interpreter. Tests that execute code
//! need `assets/rustpython.wasm` and are ignored by default.

use std::path::{Path, PathBuf};

use asterr::prelude::*;
use asterr::sandbox::guest::OUTCOME_MARKER;
use asterr::{Image, RecursionLimit, Stage};

/// Engine whose interpreter may or may not exist; static paths never load it.
fn engine() -> RestrictedEngine {
    RestrictedEngine::new(SandboxConfig::default()).unwrap()
}

/// A guest that prints a canned outcome record, standing in for the interpreter.
fn canned_guest(dir: &Path, record: &str) -> PathBuf {
    let stdout = format!("{OUTCOME_MARKER}{record}\n");
    let data: String = stdout.bytes().map(|b| format!("\\{b:02x}")).collect();
    let wat = format!(
        r#"(module
  (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 64) "{data}")
  (func (export "_start")
    (i32.store (i32.const 0) (i32.const 64))
    (i32.store (i32.const 4) (i32.const {len}))
    (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))))"#,
        len = stdout.len(),
    );
    let path = dir.join("guest.wat");
    std::fs::write(&path, wat).unwrap();
    path
}

fn import_error_module(outcome: &ExecutionOutcome) -> Option<&str> {
    match &outcome.error {
        Some(SandboxError::ImportNotAllowed { module }) => Some(module),
        _ => None,
    }
}

#[tokio::test]
async fn test_disallowed_modules_are_refused() {
    let engine = engine();
    for module in ["os", "sys", "subprocess", "socket", "ctypes", "importlib", "shutil"] {
        let request = SandboxRequest::new(format!("import {module}\nasterr_result = 1"))
            .allow_modules(["math"]);
        let outcome = engine.run(request).await;

        assert_eq!(import_error_module(&outcome), Some(module));
        assert_eq!(outcome.reached, Stage::Parsed, "{module} must not execute");
    }
}

#[tokio::test]
async fn test_nested_import_is_refused() {
    let source = r#"
def sneaky():
    try:
        import os
    finally:
        pass

asterr_result = 1
"#;
    let outcome = engine().run(SandboxRequest::new(source)).await;
    assert_eq!(import_error_module(&outcome), Some("os"));
}

#[tokio::test]
async fn test_from_import_prefix_rules() {
    let engine = engine();

    let outcome = engine
        .run(SandboxRequest::new("from pkg.sub import thing").allow_modules(["pkg.*"]))
        .await;
    assert!(import_error_module(&outcome).is_none());

    let outcome = engine
        .run(SandboxRequest::new("from pkg.sub import thing").allow_modules(["pkg.sub"]))
        .await;
    assert!(import_error_module(&outcome).is_none());

    let outcome = engine
        .run(SandboxRequest::new("from pkg.sub import thing").allow_modules(["pkg"]))
        .await;
    assert_eq!(import_error_module(&outcome), Some("pkg.sub"));
}

#[tokio::test]
async fn test_alias_does_not_launder_import() {
    let outcome = engine()
        .run(SandboxRequest::new("import os as math"))
        .await;
    assert_eq!(import_error_module(&outcome), Some("os"));
}

#[tokio::test]
async fn test_universal_wildcard_is_insecure() {
    let outcome = engine()
        .run(SandboxRequest::new("import os").allow_modules(["*"]))
        .await;
    assert!(outcome.insecure);
    assert!(import_error_module(&outcome).is_none());
}

#[tokio::test]
async fn test_syntax_error_skips_import_check() {
    let outcome = engine()
        .run(SandboxRequest::new("import os\nname = \"unterminated"))
        .await;
    assert!(outcome.error.unwrap().is_syntax_error());
    assert_eq!(outcome.reached, Stage::Created);
}

#[tokio::test]
async fn test_independent_engines_share_interpreter() {
    let dir = tempfile::tempdir().unwrap();
    let guest = canned_guest(dir.path(), r#"{"ok": true, "result": 5}"#);

    let configs = [
        SandboxConfig::builder().interpreter_path(&guest).build(),
        SandboxConfig::builder().interpreter_path(&guest).build(),
        SandboxConfig::builder()
            .interpreter_path(&guest)
            .max_wasm_stack(512 * 1024)
            .build(),
    ];
    for config in configs {
        let engine = RestrictedEngine::new(config).unwrap();
        let outcome = engine.run(SandboxRequest::new("asterr_result = 5")).await;

        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(outcome.reached, Stage::Executed);
        assert_eq!(outcome.result, Some(Value::Int(5)));
    }
}

#[tokio::test]
async fn test_guest_exception_is_captured_after_execution() {
    let dir = tempfile::tempdir().unwrap();
    let guest = canned_guest(
        dir.path(),
        r#"{"ok": false, "error": {"kind": "ZeroDivisionError", "message": "division by zero"}}"#,
    );
    let engine = RestrictedEngine::new(SandboxConfig::builder().interpreter_path(guest).build()).unwrap();

    let outcome = engine.run(SandboxRequest::new("asterr_result = 1 / 0")).await;
    assert_eq!(outcome.reached, Stage::Executed);
    assert!(outcome.result.is_none());
    match outcome.error {
        Some(SandboxError::PythonException { exception_type, traceback, .. }) => {
            assert_eq!(exception_type, "ZeroDivisionError");
            assert!(traceback.is_none());
        }
        other => panic!("expected ZeroDivisionError, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires rustpython.wasm"]
async fn test_addition_scenario() {
    let request = SandboxRequest::new("asterr_result = a + b")
        .param("a", 2)
        .unwrap()
        .param("b", 3)
        .unwrap();
    let outcome = engine().run(request).await;

    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(outcome.result, Some(Value::Int(5)));
    assert!(outcome.extra_pnginfo.is_none());
    assert_eq!(outcome.reached, Stage::Executed);
}

#[tokio::test]
#[ignore = "requires rustpython.wasm"]
async fn test_repeated_runs_are_equal() {
    let engine = engine();
    let request = SandboxRequest::new("counter = counter + 1\nasterr_result = counter")
        .param("counter", 0)
        .unwrap();

    let first = engine.run(request.clone()).await;
    let second = engine.run(request).await;
    assert_eq!(first.result, Some(Value::Int(1)));
    assert_eq!(first.result, second.result);
}

#[tokio::test]
#[ignore = "requires rustpython.wasm"]
async fn test_runtime_errors_are_captured() {
    let outcome = engine()
        .run(SandboxRequest::new("asterr_result = undefined_name"))
        .await;
    match outcome.error {
        Some(SandboxError::PythonException { exception_type, .. }) => {
            assert_eq!(exception_type, "NameError")
        }
        other => panic!("expected NameError, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires rustpython.wasm"]
async fn test_dynamic_import_is_guarded() {
    let outcome = engine()
        .run(SandboxRequest::new("asterr_result = __import__('os').getcwd()"))
        .await;
    match outcome.error {
        Some(SandboxError::PythonException { exception_type, message, .. }) => {
            assert_eq!(exception_type, "ImportError");
            assert!(message.contains("'os'"));
        }
        other => panic!("expected ImportError, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires rustpython.wasm"]
async fn test_blocked_builtins_are_absent() {
    for builtin in ["open", "eval", "exec", "compile", "input"] {
        let outcome = engine()
            .run(SandboxRequest::new(format!("asterr_result = {builtin}")))
            .await;
        assert!(
            matches!(
                outcome.error,
                Some(SandboxError::PythonException { ref exception_type, .. }) if exception_type == "NameError"
            ),
            "{builtin} should not be reachable"
        );
    }
}

#[tokio::test]
#[ignore = "requires rustpython.wasm"]
async fn test_capability_record_is_removed() {
    let outcome = engine()
        .run(SandboxRequest::new("asterr_result = '_asterr' in globals()"))
        .await;
    assert_eq!(outcome.result, Some(Value::Bool(false)));
}

#[tokio::test]
#[ignore = "requires rustpython.wasm"]
async fn test_value_types_do_not_expose_driver() {
    let source = r#"
seen = []
seen.append(tensor2pil.__defaults__ is None)
seen.append("sys" not in type(a).__init__.__globals__)
seen.append(type(a).__init__.__globals__["__builtins__"] is __builtins__)
asterr_result = all(seen)
"#;
    let image = Image::new(1, 1, 1, vec![7]).unwrap();
    let request = SandboxRequest::new(source).param("a", image).unwrap();
    let outcome = engine().run(request).await;
    assert_eq!(outcome.result, Some(Value::Bool(true)), "{:?}", outcome.error);
}

#[tokio::test]
#[ignore = "requires rustpython.wasm"]
async fn test_recursion_limit_is_enforced() {
    let source = "def down(n):\n    return down(n + 1)\ndown(0)";
    let request = SandboxRequest::new(source).recursion_limit(RecursionLimit::new(50).unwrap());
    let outcome = engine().run(request).await;

    match outcome.error {
        Some(SandboxError::PythonException { exception_type, .. }) => {
            assert_eq!(exception_type, "RecursionError")
        }
        other => panic!("expected RecursionError, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires rustpython.wasm"]
async fn test_concurrent_limits_do_not_interfere() {
    let engine = engine();
    let probe = "def depth(n):\n    try:\n        return depth(n + 1)\n    except RecursionError:\n        return n\nasterr_result = depth(0)";

    let low = SandboxRequest::new(probe).recursion_limit(RecursionLimit::new(40).unwrap());
    let high = SandboxRequest::new(probe).recursion_limit(RecursionLimit::new(400).unwrap());
    let (low, high) = tokio::join!(engine.run(low), engine.run(high));

    let (Some(Value::Int(low)), Some(Value::Int(high))) = (low.result, high.result) else {
        panic!("both probes should report a depth");
    };
    assert!(low < 40);
    assert!(high > 40);
}

#[tokio::test]
#[ignore = "requires rustpython.wasm"]
async fn test_filesystem_access_blocked() {
    let source = r#"
import io
try:
    io.open('/etc/passwd').read()
    asterr_result = 'SECURITY_BREACH'
except Exception as e:
    asterr_result = 'BLOCKED: ' + type(e).__name__
"#;
    let outcome = engine()
        .run(SandboxRequest::new(source).allow_modules(["io"]))
        .await;
    if let Some(Value::Str(result)) = outcome.result {
        assert!(result.starts_with("BLOCKED"), "filesystem access should be blocked");
    }
}

#[tokio::test]
#[ignore = "requires rustpython.wasm"]
async fn test_image_helpers_round_trip() {
    let image = Image::new(2, 1, 3, vec![0, 51, 255, 255, 0, 102]).unwrap();
    let source = "asterr_result = tensor2pil(pil2tensor(a))";
    let request = SandboxRequest::new(source).param("a", image.clone()).unwrap();

    let outcome = engine().run(request).await;
    assert_eq!(outcome.result, Some(Value::Image(image)));
}

#[tokio::test]
#[ignore = "requires rustpython.wasm"]
async fn test_metadata_passthrough() {
    let request = SandboxRequest::new("asterr_result = 1")
        .param("extra_pnginfo", "workflow")
        .unwrap();
    let outcome = engine().run(request).await;
    assert_eq!(outcome.extra_pnginfo, Some(Value::Str("workflow".into())));
}
