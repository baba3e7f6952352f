// src/taskdef.rs

//! Resolved, inheritance-flattened task definitions.
//!
//! Namespace family hierarchies are compile-time field composition, not
//! run-time dispatch: each task's inheritance chain is linearized once,
//! fields are merged parents-first (last writer wins), and the resulting
//! [`TaskDefinition`] is never re-derived while the workflow runs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::model::WorkflowConfig;
use crate::cycling::Interval;
use crate::errors::{CycleflowError, Result};
use crate::graph::CompiledGraph;
use crate::graph::expr::{OUTPUT_FAILED, OUTPUT_STARTED, OUTPUT_SUCCEEDED};
use crate::types::CyclingMode;

/// One declared output: the message a job reports to complete it, and
/// whether the engine treats it as required at a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub message: String,
    pub required: bool,
}

/// Fully resolved configuration for one task name.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: String,
    /// Linearized inheritance chain, root-first, ending with the task's own
    /// name. Used for broadcast matching and queue membership.
    pub ancestry: Vec<String>,
    pub script: String,
    pub retry_delays: Vec<Interval>,
    pub expire_offset: Option<Interval>,
    /// Custom outputs only; `succeeded`/`failed`/`started` are implicit.
    pub outputs: BTreeMap<String, TaskOutput>,
    pub env: BTreeMap<String, String>,
}

impl TaskDefinition {
    /// Retry delay for the given attempt (1-based try number), if any
    /// attempts remain.
    pub fn retry_delay(&self, try_num: u32) -> Option<&Interval> {
        self.retry_delays.get(try_num as usize - 1)
    }

    /// All output names the instance tracks, standard ones first.
    pub fn output_names(&self) -> Vec<String> {
        let mut names = vec![
            OUTPUT_STARTED.to_string(),
            OUTPUT_SUCCEEDED.to_string(),
            OUTPUT_FAILED.to_string(),
        ];
        names.extend(self.outputs.keys().cloned());
        names
    }

    /// Resolve a job message to an output name: either the output name
    /// itself or its declared message text.
    pub fn output_for_message(&self, message: &str) -> Option<&str> {
        if self.outputs.contains_key(message) {
            return Some(
                self.outputs
                    .get_key_value(message)
                    .map(|(k, _)| k.as_str())
                    .expect("key just checked"),
            );
        }
        self.outputs
            .iter()
            .find(|(_, out)| out.message == message)
            .map(|(name, _)| name.as_str())
    }
}

/// Store of resolved task definitions, built once per (re)compile.
#[derive(Debug, Clone, Default)]
pub struct TaskDefStore {
    defs: BTreeMap<String, TaskDefinition>,
}

impl TaskDefStore {
    /// Build definitions for every task appearing in the compiled graph.
    pub fn build(cfg: &WorkflowConfig, graph: &CompiledGraph) -> Result<Self> {
        let mut defs = BTreeMap::new();
        for name in graph.entries.keys() {
            let def = resolve_task(cfg, graph, name)?;
            defs.insert(name.clone(), def);
        }
        debug!(tasks = defs.len(), "task definitions resolved");
        Ok(Self { defs })
    }

    pub fn get(&self, name: &str) -> Option<&TaskDefinition> {
        self.defs.get(name)
    }

    /// Carry a definition over (orphaned tasks surviving a reload).
    pub fn insert(&mut self, def: TaskDefinition) {
        self.defs.insert(def.name.clone(), def);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.defs.keys().map(|s| s.as_str())
    }
}

fn resolve_task(cfg: &WorkflowConfig, graph: &CompiledGraph, name: &str) -> Result<TaskDefinition> {
    let ancestry = linearize(cfg, name)?;
    let mode = cfg.scheduling.cycling_mode;

    let mut script = String::new();
    let mut retry_delays: Vec<Interval> = Vec::new();
    let mut expire_offset: Option<Interval> = None;
    let mut outputs: BTreeMap<String, String> = BTreeMap::new();
    let mut env: BTreeMap<String, String> = BTreeMap::new();

    // Parents first, the task itself last: last writer wins per field.
    for ns_name in &ancestry {
        let ns = cfg
            .runtime
            .get(ns_name)
            .expect("ancestry only contains defined namespaces");
        if let Some(s) = &ns.script {
            script = s.clone();
        }
        if let Some(delays) = &ns.retry_delays {
            retry_delays = delays
                .iter()
                .map(|d| Interval::parse(d, CyclingMode::Datetime))
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(offset) = &ns.expire_offset {
            expire_offset = Some(Interval::parse(offset, mode)?);
        }
        for (out, message) in &ns.outputs {
            outputs.insert(out.clone(), message.clone());
        }
        for (key, value) in &ns.env {
            env.insert(key.clone(), value.clone());
        }
    }

    let required = graph
        .required_outputs
        .get(name)
        .cloned()
        .unwrap_or_default();

    let outputs = outputs
        .into_iter()
        .map(|(out, message)| {
            let required = required.contains(&out);
            (out.clone(), TaskOutput { message, required })
        })
        .collect();

    Ok(TaskDefinition {
        name: name.to_string(),
        ancestry,
        script,
        retry_delays,
        expire_offset,
        outputs,
        env,
    })
}

/// Depth-first linearization of the inheritance chain, root-first.
///
/// With `inherit = ["A", "B"]`, A's fields are applied before B's, and the
/// namespace's own fields last.
fn linearize(cfg: &WorkflowConfig, name: &str) -> Result<Vec<String>> {
    let mut chain = Vec::new();
    let mut seen = BTreeSet::new();
    visit(cfg, name, &mut chain, &mut seen)?;
    Ok(chain)
}

fn visit(
    cfg: &WorkflowConfig,
    name: &str,
    chain: &mut Vec<String>,
    seen: &mut BTreeSet<String>,
) -> Result<()> {
    if !seen.insert(name.to_string()) {
        return Ok(());
    }
    let ns = cfg.runtime.get(name).ok_or_else(|| {
        CycleflowError::ConfigError(format!("undefined namespace '{name}' in inheritance chain"))
    })?;
    for parent in &ns.inherit {
        visit(cfg, parent, chain, seen)?;
    }
    chain.push(name.to_string());
    Ok(())
}
