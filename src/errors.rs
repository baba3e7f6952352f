// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CycleflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cycling mode mismatch: {0}")]
    CyclingModeMismatch(String),

    #[error("Graph syntax error: {0}")]
    GraphSyntax(String),

    #[error("Graph reference to undefined task: {0}")]
    UnsatisfiableReference(String),

    #[error("Task not found in pool: {0}")]
    TaskNotFound(String),

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CycleflowError>;
