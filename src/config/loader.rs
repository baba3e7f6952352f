// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{RawWorkflowConfig, WorkflowConfig};
use crate::errors::Result;

/// Load a workflow definition from a path and return the raw
/// `RawWorkflowConfig`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (graph syntax, inheritance, cycle points). Use
/// [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkflowConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawWorkflowConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a workflow definition from path and run full validation.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks graph syntax, task definitions, inheritance acyclicity,
///   queue membership, and point/interval parsing.
///
/// Configuration and graph errors are fatal here, before any task instance
/// exists.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkflowConfig> {
    let raw_config = load_from_path(&path)?;
    let config = WorkflowConfig::try_from(raw_config)?;
    Ok(config)
}

/// Helper to resolve a default workflow definition path.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("flow.toml")
}
