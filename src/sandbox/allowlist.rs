//! Import allow-list and the matcher applied to every import statement.
//!
//! Entries come in three forms:
//!
//! - `"math"`: exact module name.
//! - `"PIL.*"`: prefix wildcard, admits `from PIL... import ...` rooted at `PIL`.
//! - `"*"`: universal wildcard, disables checking (insecure mode).
//!
//! Matching is purely lexical. Aliases (`import numpy as np`) are never
//! consulted; only the canonical module name is.

use std::fmt;

/// Modules every request may import.
pub const DEFAULT_ALLOWED_MODULES: &[&str] = &[
    // host modules
    "nodes",
    "folder_paths",
    // other modules
    "math",
    "PIL",
    "PIL.*",
    "cv2",
    "random",
    "time",
    "numpy",
];

/// A single allow-list entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AllowEntry {
    /// Matches a module name exactly.
    Exact(String),
    /// Matches from-imports whose module path is rooted at the prefix.
    Prefix(String),
    /// Matches everything.
    Any,
}

impl AllowEntry {
    /// Parse an entry from its textual specifier.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if spec == "*" {
            AllowEntry::Any
        } else if let Some(prefix) = spec.strip_suffix(".*") {
            AllowEntry::Prefix(prefix.to_string())
        } else {
            AllowEntry::Exact(spec.to_string())
        }
    }
}

impl From<&str> for AllowEntry {
    fn from(spec: &str) -> Self {
        AllowEntry::parse(spec)
    }
}

impl From<String> for AllowEntry {
    fn from(spec: String) -> Self {
        AllowEntry::parse(&spec)
    }
}

impl fmt::Display for AllowEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowEntry::Exact(name) => f.write_str(name),
            AllowEntry::Prefix(prefix) => write!(f, "{prefix}.*"),
            AllowEntry::Any => f.write_str("*"),
        }
    }
}

/// An ordered list of allow-list entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    entries: Vec<AllowEntry>,
}

impl AllowList {
    /// Build a list from exactly the given specifiers, without defaults.
    pub fn new<I, S>(specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<AllowEntry>,
    {
        Self {
            entries: specs.into_iter().map(Into::into).collect(),
        }
    }

    /// The default allow-list.
    pub fn defaults() -> Self {
        Self::new(DEFAULT_ALLOWED_MODULES.iter().copied())
    }

    /// Caller entries followed by the defaults.
    pub fn with_defaults<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<AllowEntry>,
    {
        let mut list = Self::new(extra);
        list.entries.extend(Self::defaults().entries);
        list
    }

    pub fn entries(&self) -> &[AllowEntry] {
        &self.entries
    }

    /// Whether the universal wildcard is present.
    pub fn is_universal(&self) -> bool {
        self.entries.contains(&AllowEntry::Any)
    }

    /// Specifier strings in order, as shipped to the guest import guard.
    pub fn specifiers(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::defaults()
    }
}

/// An import statement reduced to what the matcher needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportStatement {
    /// `import a, b.c as d`
    Import {
        /// Canonical module names, aliases dropped.
        names: Vec<String>,
    },
    /// `from pkg.sub import x`
    From {
        /// Module path; relative imports keep their leading dots.
        module: String,
        /// Imported names.
        names: Vec<String>,
    },
}

impl ImportStatement {
    /// The module to blame when this statement is refused.
    pub fn offending_module(&self) -> &str {
        match self {
            ImportStatement::Import { names } => names.first().map(String::as_str).unwrap_or(""),
            ImportStatement::From { module, .. } => module,
        }
    }
}

/// Decide whether `statement` is admitted by `allow_list`.
///
/// Entries are tried in order and the first match wins. Exact entries are
/// compared against every name of a plain import, or against the module
/// path of a from-import. Prefix entries only admit from-imports, and
/// only when the module path is the prefix itself or one of its
/// submodules.
pub fn is_allowed(statement: &ImportStatement, allow_list: &AllowList) -> bool {
    if allow_list.is_universal() {
        return true;
    }

    allow_list.entries().iter().any(|entry| match (entry, statement) {
        (AllowEntry::Exact(name), ImportStatement::Import { names }) => {
            names.iter().any(|imported| imported == name)
        }
        (AllowEntry::Exact(name), ImportStatement::From { module, .. }) => module == name,
        (AllowEntry::Prefix(prefix), ImportStatement::From { module, .. }) => {
            is_submodule_of(module, prefix)
        }
        _ => false,
    })
}

fn is_submodule_of(module: &str, prefix: &str) -> bool {
    match module.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}
