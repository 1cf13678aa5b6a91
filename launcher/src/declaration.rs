//! The `environment.yml` declaration beside the launcher.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::LauncherError;
use crate::fsutil::write_atomic;
use crate::snapshot::normalize;

pub const DECLARATION_FILE: &str = "environment.yml";

/// The subset of a declaration the launcher checks before overwriting the
/// file on disk.
#[derive(Debug, Deserialize)]
pub struct Declaration {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<serde_yaml::Value>,
}

impl Declaration {
    pub fn parse(content: &str) -> Result<Self, LauncherError> {
        let declaration: Declaration = serde_yaml::from_str(content)?;
        let named = declaration
            .name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty());
        if !named {
            return Err(LauncherError::Declaration(
                "environment snapshot has no name".to_string(),
            ));
        }
        Ok(declaration)
    }
}

/// Name from the first `name:` line, if it has a value.
///
/// The file is scanned line by line rather than parsed, so a declaration
/// with unrelated YAML problems still yields its name.
pub fn read_environment_name(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    environment_name(&content)
}

pub fn environment_name(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("name:"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Normalized copy of the declaration in the temp directory, removed when
/// dropped.
pub fn normalized_copy(path: &Path) -> Result<NamedTempFile, LauncherError> {
    let content = fs::read_to_string(path).map_err(|err| {
        LauncherError::Declaration(format!("failed to read {}: {err}", path.display()))
    })?;
    let mut file = tempfile::Builder::new()
        .prefix("environment-")
        .suffix(".yml")
        .tempfile()?;
    file.write_all(normalize(&content).as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Normalize a live export and replace the declaration with it.
pub fn write_snapshot(path: &Path, snapshot: &str) -> Result<Declaration, LauncherError> {
    let cleaned = normalize(snapshot);
    let declaration = Declaration::parse(&cleaned)?;
    write_atomic(path, &cleaned)?;
    Ok(declaration)
}

pub fn declaration_path(root: &Path) -> PathBuf {
    root.join(DECLARATION_FILE)
}
