//! Error types for the restricted execution engine.

use thiserror::Error;

/// Errors that can occur while validating or executing a snippet.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The source text could not be parsed.
    #[error("SyntaxError: {message} (line {line}, column {column})")]
    Syntax {
        /// Parser diagnostic.
        message: String,
        /// 1-based line of the failure.
        line: usize,
        /// 1-based column of the failure.
        column: usize,
    },

    /// The source imports a module the allow-list does not admit.
    #[error("Module '{module}' is not allowed")]
    ImportNotAllowed {
        /// The offending module specifier.
        module: String,
    },

    /// A Python exception was raised while the runnable unit executed.
    #[error("Python {exception_type}: {message}")]
    PythonException {
        /// The type of Python exception (e.g., "NameError", "ZeroDivisionError").
        exception_type: String,
        /// The exception message.
        message: String,
        /// The full Python traceback, if available.
        traceback: Option<String>,
    },

    /// The guest crashed or did not report an outcome.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Failed to initialize the Wasm runtime.
    #[error("failed to initialize runtime: {0}")]
    RuntimeInit(#[source] anyhow::Error),

    /// Failed to load or instantiate the Python interpreter module.
    #[error("failed to load Python interpreter: {0}")]
    ModuleLoad(#[source] anyhow::Error),

    /// The interpreter wasm file was not found.
    #[error("Python interpreter wasm not found at: {0}")]
    InterpreterNotFound(String),

    /// I/O error on the host side.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A value could not be converted between representations.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// A parameter was rejected before execution.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A script name would escape the script directory or is otherwise unusable.
    #[error("invalid script name: {0:?}")]
    InvalidScriptName(String),
}

/// Coarse classification of a [`SandboxError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The source did not parse.
    Syntax,
    /// A disallowed import was found.
    Import,
    /// The runnable unit raised while executing.
    Runtime,
    /// Anything on the host side: runtime setup, I/O, configuration.
    Host,
}

impl SandboxError {
    /// Create a Python exception error from stderr output.
    ///
    /// Attempts to parse the stderr to extract exception type, message, and traceback.
    pub fn from_python_stderr(stderr: &str) -> Option<Self> {
        parse_python_exception(stderr)
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::Syntax { .. } => ErrorKind::Syntax,
            SandboxError::ImportNotAllowed { .. } => ErrorKind::Import,
            SandboxError::PythonException { .. } | SandboxError::ExecutionFailed(_) => {
                ErrorKind::Runtime
            }
            _ => ErrorKind::Host,
        }
    }

    /// Check if this error represents a parse failure.
    pub fn is_syntax_error(&self) -> bool {
        matches!(self, SandboxError::Syntax { .. })
    }

    /// Check if this error represents a refused import.
    pub fn is_import_error(&self) -> bool {
        matches!(self, SandboxError::ImportNotAllowed { .. })
    }

    /// Check if this error represents a Python exception.
    pub fn is_python_exception(&self) -> bool {
        matches!(self, SandboxError::PythonException { .. })
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Parse a Python exception from stderr output.
///
/// This attempts to extract the exception type, message, and traceback
/// from Python's standard error output format.
pub fn parse_python_exception(stderr: &str) -> Option<SandboxError> {
    if stderr.trim().is_empty() {
        return None;
    }

    let lines: Vec<&str> = stderr.lines().collect();

    // The exception line is the last unindented line that looks like one
    let mut exception_line = None;
    let mut traceback_start = None;

    for (i, line) in lines.iter().enumerate() {
        if line.starts_with("Traceback (most recent call last):") {
            traceback_start = Some(i);
        } else if !line.starts_with(' ') && !line.is_empty() && looks_like_exception(line) {
            exception_line = Some((i, *line));
        }
    }

    let (line_idx, exception_str) = exception_line?;
    let (exception_type, message) = match exception_str.split_once(':') {
        Some((exc_type, msg)) => (exc_type.trim().to_string(), msg.trim().to_string()),
        None => (exception_str.trim().to_string(), String::new()),
    };

    let traceback = traceback_start
        .filter(|start| *start <= line_idx)
        .map(|start| lines[start..=line_idx].join("\n"));

    Some(SandboxError::PythonException {
        exception_type,
        message,
        traceback,
    })
}

/// Check if a line looks like a Python exception.
fn looks_like_exception(line: &str) -> bool {
    const EXCEPTION_SUFFIXES: [&str; 3] = ["Error", "Exception", "Warning"];
    const STANDALONE: [&str; 4] = [
        "KeyboardInterrupt",
        "SystemExit",
        "StopIteration",
        "GeneratorExit",
    ];

    if !line.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        return false;
    }

    // Only the leading identifier (possibly dotted) counts as the type name
    let name_end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(line.len());
    let name = &line[..name_end];
    let rest = &line[name_end..];
    if !(rest.is_empty() || rest.starts_with(':')) {
        return false;
    }

    let short = name.rsplit('.').next().unwrap_or(name);
    EXCEPTION_SUFFIXES.iter().any(|suffix| short.ends_with(suffix))
        || STANDALONE.contains(&short)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_exception() {
        let stderr = "ValueError: invalid literal for int() with base 10: 'abc'";
        let result = parse_python_exception(stderr);

        if let Some(SandboxError::PythonException {
            exception_type,
            message,
            traceback,
        }) = result
        {
            assert_eq!(exception_type, "ValueError");
            assert_eq!(message, "invalid literal for int() with base 10: 'abc'");
            assert!(traceback.is_none());
        } else {
            panic!("Expected PythonException");
        }
    }

    #[test]
    fn test_parse_exception_with_traceback() {
        let stderr = r#"Traceback (most recent call last):
  File "<string>", line 1, in <module>
NameError: name 'c' is not defined"#;

        let result = parse_python_exception(stderr);

        if let Some(SandboxError::PythonException {
            exception_type,
            message,
            traceback,
        }) = result
        {
            assert_eq!(exception_type, "NameError");
            assert_eq!(message, "name 'c' is not defined");
            assert!(traceback.unwrap().starts_with("Traceback"));
        } else {
            panic!("Expected PythonException");
        }
    }

    #[test]
    fn test_parse_exception_no_message() {
        let result = parse_python_exception("StopIteration");

        if let Some(SandboxError::PythonException {
            exception_type,
            message,
            ..
        }) = result
        {
            assert_eq!(exception_type, "StopIteration");
            assert!(message.is_empty());
        } else {
            panic!("Expected PythonException");
        }
    }

    #[test]
    fn test_parse_ignores_plain_output() {
        assert!(parse_python_exception("").is_none());
        assert!(parse_python_exception("   ").is_none());
        assert!(parse_python_exception("Hello there").is_none());
        assert!(parse_python_exception("An Error happened somewhere").is_none());
    }

    #[test]
    fn test_error_kinds() {
        let syntax = SandboxError::Syntax {
            message: "unterminated string".to_string(),
            line: 1,
            column: 5,
        };
        assert_eq!(syntax.kind(), ErrorKind::Syntax);
        assert!(syntax.is_syntax_error());
        assert!(!syntax.is_import_error());

        let import = SandboxError::ImportNotAllowed {
            module: "os".to_string(),
        };
        assert_eq!(import.kind(), ErrorKind::Import);
        assert_eq!(import.to_string(), "Module 'os' is not allowed");

        let python_exc = SandboxError::PythonException {
            exception_type: "ValueError".to_string(),
            message: "test".to_string(),
            traceback: None,
        };
        assert!(python_exc.is_python_exception());
        assert_eq!(python_exc.kind(), ErrorKind::Runtime);

        assert_eq!(SandboxError::Config("x".into()).kind(), ErrorKind::Host);
    }
}
