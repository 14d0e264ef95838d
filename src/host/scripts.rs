//! Named script storage on disk.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SandboxError};

/// Extension given to saved scripts.
pub const SCRIPT_EXTENSION: &str = "py";

/// What a save attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    /// The script was written to this path.
    Saved(PathBuf),
    /// A script with that name exists and overwriting was not requested.
    AlreadyExists(PathBuf),
    /// The source was empty or whitespace.
    BlankSource,
    /// The name was empty or whitespace.
    BlankName,
}

/// A directory of preset scripts.
#[derive(Debug, Clone)]
pub struct ScriptRepository {
    root: PathBuf,
}

impl ScriptRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every regular file in the directory, by file name.
    ///
    /// The directory is created if it does not exist yet.
    pub fn list_scripts(&self) -> Result<BTreeMap<String, PathBuf>> {
        std::fs::create_dir_all(&self.root)?;
        let mut scripts = BTreeMap::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    scripts.insert(name.to_string(), entry.path());
                }
            }
        }
        Ok(scripts)
    }

    /// Locate a script by file name, or by bare name with `.py` appended.
    pub fn resolve(&self, name: &str) -> Result<Option<PathBuf>> {
        check_name(name)?;
        let exact = self.root.join(name);
        if exact.is_file() {
            return Ok(Some(exact));
        }
        let with_ext = self.script_path(name);
        Ok(with_ext.is_file().then_some(with_ext))
    }

    /// Read a script's source.
    pub fn read(&self, name: &str) -> Result<String> {
        match self.resolve(name)? {
            Some(path) => Ok(std::fs::read_to_string(path)?),
            None => Err(SandboxError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no script named {name:?} in {}", self.root.display()),
            ))),
        }
    }

    /// Save `source` as `<name>.py`.
    ///
    /// Blank input and existing scripts (without `overwrite`) are refusals,
    /// reported through [`SaveStatus`] rather than as errors.
    pub fn save(&self, name: &str, source: &str, overwrite: bool) -> Result<SaveStatus> {
        if source.trim().is_empty() {
            return Ok(SaveStatus::BlankSource);
        }
        let name = name.trim();
        if name.is_empty() {
            return Ok(SaveStatus::BlankName);
        }
        check_name(name)?;

        std::fs::create_dir_all(&self.root)?;
        let path = self.script_path(name);
        if path.exists() && !overwrite {
            return Ok(SaveStatus::AlreadyExists(path));
        }
        std::fs::write(&path, source)?;
        Ok(SaveStatus::Saved(path))
    }

    fn script_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{SCRIPT_EXTENSION}"))
    }
}

/// Reject names that are not a single plain path component.
fn check_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(()),
        _ => Err(SandboxError::InvalidScriptName(name.to_string())),
    }
}
