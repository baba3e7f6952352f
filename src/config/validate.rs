// src/config/validate.rs

use std::collections::BTreeSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{RawWorkflowConfig, WorkflowConfig};
use crate::cycling::{CyclePoint, Interval};
use crate::errors::{CycleflowError, Result};
use crate::graph;
use crate::pool::RunaheadLimit;
use crate::types::CyclingMode;

impl TryFrom<RawWorkflowConfig> for WorkflowConfig {
    type Error = crate::errors::CycleflowError;

    fn try_from(raw: RawWorkflowConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(WorkflowConfig::new_unchecked(
            raw.scheduling,
            raw.runtime,
            raw.scheduler,
        ))
    }
}

fn validate_raw_config(cfg: &RawWorkflowConfig) -> Result<()> {
    ensure_has_graph(cfg)?;
    let (initial, final_point) = validate_points(cfg)?;
    validate_runahead(cfg)?;
    validate_inheritance(cfg)?;
    validate_namespace_intervals(cfg)?;
    let compiled = validate_graph(cfg, initial, final_point)?;
    validate_queues(cfg)?;
    validate_intra_cycle_acyclic(&compiled)?;
    Ok(())
}

fn ensure_has_graph(cfg: &RawWorkflowConfig) -> Result<()> {
    if cfg.scheduling.graph.is_empty() {
        return Err(CycleflowError::ConfigError(
            "config must contain at least one [scheduling.graph] entry".to_string(),
        ));
    }
    Ok(())
}

fn validate_points(cfg: &RawWorkflowConfig) -> Result<(CyclePoint, Option<CyclePoint>)> {
    let mode = cfg.scheduling.cycling_mode;
    let initial = CyclePoint::parse(&cfg.scheduling.initial_cycle_point, mode)?;
    let final_point = match &cfg.scheduling.final_cycle_point {
        Some(s) => {
            let p = CyclePoint::parse(s, mode)?;
            if initial.try_cmp(&p)? == std::cmp::Ordering::Greater {
                return Err(CycleflowError::ConfigError(format!(
                    "final_cycle_point {p} precedes initial_cycle_point {initial}"
                )));
            }
            Some(p)
        }
        None => None,
    };
    Ok((initial, final_point))
}

fn validate_runahead(cfg: &RawWorkflowConfig) -> Result<()> {
    if let Some(s) = &cfg.scheduling.runahead_limit {
        RunaheadLimit::parse(s, cfg.scheduling.cycling_mode)?;
    }
    Ok(())
}

fn validate_inheritance(cfg: &RawWorkflowConfig) -> Result<()> {
    for (name, ns) in cfg.runtime.iter() {
        for parent in ns.inherit.iter() {
            if !cfg.runtime.contains_key(parent) {
                return Err(CycleflowError::ConfigError(format!(
                    "namespace '{}' inherits unknown namespace '{}'",
                    name, parent
                )));
            }
            if parent == name {
                return Err(CycleflowError::ConfigError(format!(
                    "namespace '{}' cannot inherit from itself",
                    name
                )));
            }
        }
    }

    // Edge direction: parent -> child; a toposort failure is an inheritance
    // loop.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in cfg.runtime.keys() {
        graph.add_node(name.as_str());
    }
    for (name, ns) in cfg.runtime.iter() {
        for parent in ns.inherit.iter() {
            graph.add_edge(parent.as_str(), name.as_str(), ());
        }
    }
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(CycleflowError::ConfigError(format!(
            "inheritance loop involving namespace '{}'",
            cycle.node_id()
        ))),
    }
}

fn validate_namespace_intervals(cfg: &RawWorkflowConfig) -> Result<()> {
    let mode = cfg.scheduling.cycling_mode;
    for (name, ns) in cfg.runtime.iter() {
        if let Some(delays) = &ns.retry_delays {
            for delay in delays {
                // Retry delays are wall-clock durations in either mode.
                Interval::parse(delay, CyclingMode::Datetime).map_err(|_| {
                    CycleflowError::ConfigError(format!(
                        "namespace '{}' has invalid retry delay '{}'",
                        name, delay
                    ))
                })?;
            }
        }
        if let Some(offset) = &ns.expire_offset {
            if mode != CyclingMode::Datetime {
                return Err(CycleflowError::ConfigError(format!(
                    "namespace '{}' sets expire_offset, which requires date-time cycling",
                    name
                )));
            }
            Interval::parse(offset, mode)?;
        }
    }
    Ok(())
}

fn validate_graph(
    cfg: &RawWorkflowConfig,
    initial: CyclePoint,
    final_point: Option<CyclePoint>,
) -> Result<graph::CompiledGraph> {
    let defined: BTreeSet<String> = cfg.runtime.keys().cloned().collect();
    graph::compiler::compile(
        &cfg.scheduling.graph,
        &defined,
        initial,
        final_point,
        cfg.scheduling.cycling_mode,
    )
}

fn validate_queues(cfg: &RawWorkflowConfig) -> Result<()> {
    for (queue, section) in cfg.scheduling.queues.iter() {
        for member in section.members.iter() {
            if !cfg.runtime.contains_key(member) {
                return Err(CycleflowError::ConfigError(format!(
                    "queue '{}' lists unknown namespace '{}'",
                    queue, member
                )));
            }
        }
    }
    Ok(())
}

/// Same-point dependencies must form a DAG: a loop with no cycle offset can
/// never make progress within one cycle.
fn validate_intra_cycle_acyclic(compiled: &graph::CompiledGraph) -> Result<()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in compiled.entries.keys() {
        graph.add_node(name.as_str());
    }
    for (name, entries) in compiled.entries.iter() {
        for entry in entries {
            for expr in entry.prereqs.iter() {
                for cond in expr.conditions() {
                    if cond.offset.is_none() {
                        graph.add_edge(cond.task.as_str(), name.as_str(), ());
                    }
                }
            }
        }
    }
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(CycleflowError::ConfigError(format!(
            "intra-cycle dependency loop involving task '{}'",
            cycle.node_id()
        ))),
    }
}
