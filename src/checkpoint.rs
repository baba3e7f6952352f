// src/checkpoint.rs

//! The checkpoint/restore contract.
//!
//! A checkpoint captures pool state, broadcast entries, and the flow
//! counter, written at controlled points (never mid-step) so that a restart
//! reproduces scheduler state exactly, including submit numbers and retry
//! timers.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::broadcast::BroadcastEntry;
use crate::cycling::CyclePoint;
use crate::errors::{CycleflowError, Result};
use crate::flow::FlowId;
use crate::pool::task_instance::TaskInstance;

/// On-disk snapshot of scheduler state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub flow_counter: u64,
    pub active_flows: Vec<FlowId>,
    pub stop_requested: bool,
    /// Per parentless (task, recurrence expression): last spawned point.
    /// Keyed by recurrence string so the cursor survives reloads.
    pub parentless_cursor: Vec<(String, String, CyclePoint)>,
    pub broadcasts: Vec<BroadcastEntry>,
    pub tasks: Vec<TaskInstance>,
}

/// Write a checkpoint atomically (write to a temp file, then rename).
pub fn save(path: impl AsRef<Path>, checkpoint: &Checkpoint) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(checkpoint)
        .map_err(|e| CycleflowError::CheckpointError(format!("serialize: {e}")))?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;

    info!(path = %path.display(), tasks = checkpoint.tasks.len(), "checkpoint saved");
    Ok(())
}

/// Load a checkpoint written by [`save`].
pub fn load(path: impl AsRef<Path>) -> Result<Checkpoint> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let checkpoint: Checkpoint = serde_json::from_str(&contents)
        .map_err(|e| CycleflowError::CheckpointError(format!("parse {}: {e}", path.display())))?;

    info!(path = %path.display(), tasks = checkpoint.tasks.len(), "checkpoint loaded");
    Ok(checkpoint)
}
