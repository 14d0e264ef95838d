//! Host/guest protocol.
//!
//! The guest interpreter runs a fixed driver program. The driver reads a
//! JSON [`Payload`] from stdin, builds the capability table the runnable
//! unit executes against, runs the unit and prints one outcome record on a
//! line starting with [`OUTCOME_MARKER`]. Everything printed before that
//! line belongs to the caller's code.

use serde::{Deserialize, Serialize};

use crate::error::{parse_python_exception, Result, SandboxError};
use crate::sandbox::allowlist::AllowList;
use crate::sandbox::namespace::{Params, RunnableUnit, METADATA_NAME, RESULT_NAME};
use crate::value::Value;

/// Prefix of the line carrying the outcome record.
pub const OUTCOME_MARKER: &str = "\u{1e}ASTERR_OUTCOME ";

/// Builtins removed from the capability table.
pub const BLOCKED_BUILTINS: &[&str] = &[
    "open",
    "exec",
    "eval",
    "compile",
    "input",
    "breakpoint",
    "help",
    "exit",
    "quit",
];

/// Driver program passed to the interpreter with `-c`.
pub const DRIVER: &str = r#"import builtins
import json
import math
import sys
import traceback

MARKER = "\x1eASTERR_OUTCOME "
TAG = "__asterr__"


# Value types are defined against the capability table, so nothing reachable
# from them leads back to this module.
VALUE_TYPES = '''
class Tensor:
    __slots__ = ("shape", "data")

    def __init__(self, shape, data):
        self.shape = tuple(int(d) for d in shape)
        self.data = [float(v) for v in data]

    def __repr__(self):
        return "Tensor(shape=%r)" % (self.shape,)


class Image:
    __slots__ = ("width", "height", "channels", "pixels")

    def __init__(self, width, height, channels, pixels):
        self.width = int(width)
        self.height = int(height)
        self.channels = int(channels)
        self.pixels = [int(p) for p in pixels]

    @property
    def size(self):
        return (self.width, self.height)

    def resize(self, size):
        new_w, new_h = int(size[0]), int(size[1])
        if new_w <= 0 or new_h <= 0:
            raise ValueError("resize target must be positive, got %r" % (size,))
        c = self.channels
        out = []
        for y in range(new_h):
            row = (y * self.height // new_h) * self.width
            for x in range(new_w):
                start = (row + x * self.width // new_w) * c
                out.extend(self.pixels[start:start + c])
        return Image(new_w, new_h, c, out)

    def __repr__(self):
        return "Image(size=%r, channels=%d)" % (self.size, self.channels)
'''

Tensor = Image = None


class Capabilities:
    __slots__ = ("setrecursionlimit", "Tensor", "Image")

    def __init__(self, tensor, image):
        self.setrecursionlimit = sys.setrecursionlimit
        self.Tensor = tensor
        self.Image = image


def decode(v):
    if isinstance(v, list):
        return [decode(x) for x in v]
    if isinstance(v, dict):
        tag = v.get(TAG)
        if tag is None:
            return {k: decode(x) for k, x in v.items()}
        if tag == "tensor":
            return Tensor(v["shape"], v["data"])
        if tag == "image":
            return Image(v["width"], v["height"], v["channels"], v["pixels"])
        if tag == "float":
            return float(v["repr"])
        if tag == "dict":
            return {k: decode(x) for k, x in v["items"].items()}
        if tag == "opaque":
            return v["repr"]
        raise ValueError("unknown value tag %r" % (tag,))
    return v


def encode(v):
    if v is None or isinstance(v, (bool, str)):
        return v
    if isinstance(v, int):
        return v
    if isinstance(v, float):
        if math.isnan(v) or math.isinf(v):
            return {TAG: "float", "repr": repr(v)}
        return v
    if isinstance(v, (list, tuple)):
        return [encode(x) for x in v]
    if isinstance(v, dict) and all(isinstance(k, str) for k in v):
        items = {k: encode(x) for k, x in v.items()}
        if TAG in items:
            return {TAG: "dict", "items": items}
        return items
    if isinstance(v, Tensor):
        return {TAG: "tensor", "shape": list(v.shape), "data": v.data}
    if isinstance(v, Image):
        return {TAG: "image", "width": v.width, "height": v.height,
                "channels": v.channels, "pixels": v.pixels}
    return {TAG: "opaque", "repr": repr(v)}


def import_guard(specs, real_import):
    universal = "*" in specs

    def allowed(name, fromlist):
        if universal:
            return True
        for spec in specs:
            if spec.endswith(".*"):
                prefix = spec[:-2]
                if fromlist and (name == prefix or name.startswith(prefix + ".")):
                    return True
            elif name == spec:
                return True
        return False

    def guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
        if level == 0 and allowed(name, fromlist):
            return real_import(name, globals, locals, fromlist, level)
        raise ImportError("Module '%s' is not allowed" % ("." * level + name,))

    return guarded_import


def capability_table(specs, blocked):
    table = {}
    for name in dir(builtins):
        if name not in blocked:
            table[name] = getattr(builtins, name)
    table["__import__"] = import_guard(specs, builtins.__import__)
    return table


def main():
    global Tensor, Image
    payload = json.loads(sys.stdin.read())
    table = capability_table(payload["allow"], set(payload["blocked"]))
    types = {"__builtins__": table, "__name__": "__asterr__"}
    exec(VALUE_TYPES, types)
    Tensor, Image = types["Tensor"], types["Image"]

    scope = {
        "__builtins__": table,
        "__name__": "__asterr__",
        "_asterr": Capabilities(Tensor, Image),
    }
    for name, value in payload["params"].items():
        scope[name] = decode(value)

    report = {"ok": True}
    try:
        code = compile(payload["unit"], "<asterr>", "exec")
        exec(code, scope)
        for key, name in (("result", payload["result_name"]), ("metadata", payload["metadata_name"])):
            value = scope.get(name)
            if value is not None:
                report[key] = encode(value)
    except BaseException as exc:
        report = {
            "ok": False,
            "error": {
                "kind": type(exc).__name__,
                "message": str(exc),
                "traceback": traceback.format_exc(),
            },
        }
    sys.stdout.flush()
    sys.stdout.write("\n" + MARKER + json.dumps(report) + "\n")
    sys.stdout.flush()


main()
"#;

/// Everything the driver needs for one execution.
#[derive(Debug, Serialize)]
pub struct Payload<'a> {
    unit: &'a str,
    params: serde_json::Map<String, serde_json::Value>,
    allow: Vec<String>,
    blocked: &'static [&'static str],
    result_name: &'static str,
    metadata_name: &'static str,
}

impl<'a> Payload<'a> {
    pub fn new(unit: &'a RunnableUnit, params: &Params, allow_list: &AllowList) -> Self {
        Self {
            unit: unit.code(),
            params: params
                .iter()
                .map(|(name, value)| (name.clone(), value.to_wire()))
                .collect(),
            allow: allow_list.specifiers(),
            blocked: BLOCKED_BUILTINS,
            result_name: RESULT_NAME,
            metadata_name: METADATA_NAME,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| SandboxError::Conversion(format!("failed to encode payload: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct WireReport {
    ok: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    kind: String,
    message: String,
    #[serde(default)]
    traceback: Option<String>,
}

/// What the guest reported after running the unit.
#[derive(Debug)]
pub struct GuestReport {
    /// Output the caller's code printed.
    pub stdout: String,
    /// Bound result, if any.
    pub result: Option<Value>,
    /// Bound metadata, if any.
    pub metadata: Option<Value>,
    /// Exception raised by the unit.
    pub error: Option<SandboxError>,
}

/// Interpret the guest's captured output.
///
/// A missing outcome line means the interpreter died before the driver
/// could report; stderr is then mined for a Python exception.
pub fn read_report(stdout: &str, stderr: &str, exit_code: i32) -> Result<GuestReport> {
    let Some(marker_at) = stdout.rfind(OUTCOME_MARKER) else {
        return Err(parse_python_exception(stderr).unwrap_or_else(|| {
            SandboxError::ExecutionFailed(format!(
                "interpreter exited with code {exit_code} without reporting an outcome"
            ))
        }));
    };

    let user_stdout = stdout[..marker_at]
        .strip_suffix('\n')
        .unwrap_or(&stdout[..marker_at])
        .to_string();
    let record = stdout[marker_at + OUTCOME_MARKER.len()..].trim_end();
    let report: WireReport = serde_json::from_str(record)
        .map_err(|e| SandboxError::ExecutionFailed(format!("malformed outcome record: {e}")))?;

    if !report.ok {
        let error = report.error.map_or_else(
            || SandboxError::ExecutionFailed("guest reported failure without details".into()),
            |e| SandboxError::PythonException {
                exception_type: e.kind,
                message: e.message,
                traceback: e.traceback.filter(|t| !t.trim().is_empty()),
            },
        );
        return Ok(GuestReport {
            stdout: user_stdout,
            result: None,
            metadata: None,
            error: Some(error),
        });
    }

    Ok(GuestReport {
        stdout: user_stdout,
        result: report.result.map(Value::from_wire).transpose()?,
        metadata: report.metadata.map(Value::from_wire).transpose()?,
        error: None,
    })
}
