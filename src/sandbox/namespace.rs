//! Runnable unit and namespace construction.
//!
//! The runnable unit is a fixed header followed by the caller's source,
//! verbatim. The header sets the guest recursion limit and defines the two
//! image helpers, `tensor2pil` and `pil2tensor`. It reaches the runtime
//! through the `_asterr` capability record the guest driver seeds into the
//! namespace, and deletes that record before caller code runs.

use std::collections::BTreeMap;

use crate::sandbox::limits::RecursionLimit;
use crate::value::Value;

/// Name the caller binds its result to.
pub const RESULT_NAME: &str = "asterr_result";

/// Name carrying auxiliary image metadata in and out of the namespace.
pub const METADATA_NAME: &str = "extra_pnginfo";

/// Name of the capability record consumed by the header.
pub const CAPABILITY_NAME: &str = "_asterr";

/// Caller-supplied bindings for one execution.
pub type Params = BTreeMap<String, Value>;

const HELPERS: &str = r#"def _asterr_helpers(_Image, _Tensor):
    def tensor2pil(image):
        shape = tuple(image.shape)
        if len(shape) == 4 and shape[0] == 1:
            height, width, channels = shape[1:]
        elif len(shape) == 3 and shape[0] == 1:
            height, width, channels = shape[1], shape[2], 1
        elif len(shape) == 3:
            height, width, channels = shape
        elif len(shape) == 2:
            height, width, channels = shape[0], shape[1], 1
        else:
            height, width, channels = 0, 0, 0
        if height <= 0 or width <= 0 or not 1 <= channels <= 4:
            raise ValueError("cannot convert tensor of shape %r to an image" % (shape,))
        pixels = [int(min(max(255.0 * v, 0.0), 255.0)) for v in image.data]
        return _Image(width, height, channels, pixels)
    def pil2tensor(image):
        if image.channels == 1:
            shape = (1, image.height, image.width)
        else:
            shape = (1, image.height, image.width, image.channels)
        return _Tensor(shape, [p / 255.0 for p in image.pixels])
    return tensor2pil, pil2tensor
tensor2pil, pil2tensor = _asterr_helpers(_asterr.Image, _asterr.Tensor)
del _asterr_helpers
"#;

/// Header plus caller source, ready to hand to the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnableUnit {
    code: String,
    header_lines: usize,
}

impl RunnableUnit {
    /// The complete program text.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Lines the header occupies before caller source begins.
    pub fn header_lines(&self) -> usize {
        self.header_lines
    }

    /// The caller's portion of the unit.
    pub fn caller_source(&self) -> &str {
        let offset = self
            .code
            .match_indices('\n')
            .nth(self.header_lines.saturating_sub(1))
            .map_or(0, |(i, _)| i + 1);
        &self.code[offset..]
    }
}

/// The fixed header for a given recursion limit.
pub fn header(recursion_limit: RecursionLimit) -> String {
    format!(
        "{cap}.setrecursionlimit({limit})\n{HELPERS}del {cap}\n",
        cap = CAPABILITY_NAME,
        limit = recursion_limit.get(),
    )
}

/// Prepend the header to already-validated source.
pub fn build(validated_source: &str, recursion_limit: RecursionLimit) -> RunnableUnit {
    let header = header(recursion_limit);
    let header_lines = header.lines().count();
    let mut code = String::with_capacity(header.len() + validated_source.len());
    code.push_str(&header);
    code.push_str(validated_source);
    RunnableUnit { code, header_lines }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_sets_limit_and_defines_helpers() {
        let header = header(RecursionLimit::new(250).unwrap());
        assert!(header.starts_with("_asterr.setrecursionlimit(250)\n"));
        assert!(header.contains("def tensor2pil("));
        assert!(header.contains("def pil2tensor("));
        assert!(header.ends_with("del _asterr\n"));
    }

    #[test]
    fn test_helpers_close_over_value_types() {
        let header = header(RecursionLimit::default());
        assert!(header.contains("    def tensor2pil(image):\n"));
        assert!(header.contains("    def pil2tensor(image):\n"));
        assert!(!header.contains("=_asterr."));
        assert!(header.contains("del _asterr_helpers\ndel _asterr\n"));
    }

    #[test]
    fn test_build_appends_source_verbatim() {
        let source = "asterr_result = a + b\n# trailing comment";
        let unit = build(source, RecursionLimit::default());

        assert!(unit.code().ends_with(source));
        assert_eq!(unit.caller_source(), source);
        assert_eq!(
            unit.code().lines().nth(unit.header_lines()),
            Some("asterr_result = a + b")
        );
    }

    #[test]
    fn test_header_parses() {
        let unit = build("pass", RecursionLimit::default());
        assert!(crate::sandbox::analyzer::parse(unit.code()).is_ok());
    }
}
