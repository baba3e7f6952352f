// src/graph/compiler.rs

//! Compilation of parsed graph sections into the static dependency structure
//! consumed by the task pool and matcher.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::cycling::{Interval, Sequence};
use crate::errors::{CycleflowError, Result};
use crate::graph::expr::{OUTPUT_FAILED, OUTPUT_FINISHED, OUTPUT_SUCCEEDED, PrereqExpr};
use crate::graph::parser::{self, ParsedGraph};
use crate::types::CyclingMode;

/// Compiled per-(task, sequence) dependency information.
#[derive(Debug, Clone)]
pub struct TaskGraphEntry {
    /// Index into [`CompiledGraph::sequences`].
    pub seq: usize,
    /// Normal prerequisite expressions; empty for parentless tasks.
    pub prereqs: Vec<PrereqExpr>,
    /// Suicide prerequisite expressions.
    pub suicides: Vec<PrereqExpr>,
}

impl TaskGraphEntry {
    /// A parentless entry spawns from runahead advance alone.
    pub fn is_parentless(&self) -> bool {
        self.prereqs.is_empty() && self.suicides.is_empty()
    }
}

/// Reverse-index entry: a downstream task whose prerequisite references an
/// upstream output. The downstream candidate point is the upstream point
/// minus `offset` (the offset as written on the downstream's condition).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownstreamRef {
    pub task: String,
    pub seq: usize,
    pub offset: Option<Interval>,
}

/// The full compiled dependency structure for a workflow.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    /// Recurrence sections in definition order: (recurrence expression, sequence).
    pub sequences: Vec<(String, Sequence)>,
    /// Per task name, the entries across all sequences it appears on.
    pub entries: BTreeMap<String, Vec<TaskGraphEntry>>,
    /// (upstream task, output) → downstream candidates.
    pub downstream: HashMap<(String, String), Vec<DownstreamRef>>,
    /// Per task name, the outputs that must be complete at a terminal state.
    pub required_outputs: BTreeMap<String, BTreeSet<String>>,
}

impl CompiledGraph {
    pub fn sequence(&self, idx: usize) -> &Sequence {
        &self.sequences[idx].1
    }

    pub fn entry(&self, task: &str, seq: usize) -> Option<&TaskGraphEntry> {
        self.entries.get(task)?.iter().find(|e| e.seq == seq)
    }

    pub fn downstream_of(&self, task: &str, output: &str) -> &[DownstreamRef] {
        self.downstream
            .get(&(task.to_string(), output.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Compile all graph sections against the set of defined task names.
///
/// `graph_sections` maps recurrence expressions to graph strings;
/// `defined` is the set of namespaces from the runtime configuration.
pub fn compile(
    graph_sections: &BTreeMap<String, String>,
    defined: &BTreeSet<String>,
    initial: crate::cycling::CyclePoint,
    final_point: Option<crate::cycling::CyclePoint>,
    mode: CyclingMode,
) -> Result<CompiledGraph> {
    let mut sequences = Vec::new();
    let mut parsed: Vec<ParsedGraph> = Vec::new();

    for (recurrence, text) in graph_sections {
        let seq = Sequence::from_recurrence(recurrence, initial, final_point, mode)?;
        let graph = parser::parse_graph(text, mode)?;
        check_defined(&graph, defined)?;
        sequences.push((recurrence.clone(), seq));
        parsed.push(graph);
    }

    let mut entries: BTreeMap<String, Vec<TaskGraphEntry>> = BTreeMap::new();
    for (seq_idx, graph) in parsed.iter().enumerate() {
        for (name, task) in &graph.tasks {
            entries.entry(name.clone()).or_default().push(TaskGraphEntry {
                seq: seq_idx,
                prereqs: task.triggers.clone(),
                suicides: task.suicides.clone(),
            });
        }
    }

    check_offsets(&entries, &sequences)?;

    let mut downstream: HashMap<(String, String), Vec<DownstreamRef>> = HashMap::new();
    for (name, task_entries) in &entries {
        for entry in task_entries {
            for expr in entry.prereqs.iter().chain(entry.suicides.iter()) {
                for cond in expr.conditions() {
                    let dref = DownstreamRef {
                        task: name.clone(),
                        seq: entry.seq,
                        offset: cond.offset,
                    };
                    let refs = downstream
                        .entry((cond.task.clone(), cond.output.clone()))
                        .or_default();
                    if !refs.contains(&dref) {
                        refs.push(dref);
                    }
                }
            }
        }
    }

    let required_outputs = required_outputs(&entries, &parsed);

    debug!(
        sequences = sequences.len(),
        tasks = entries.len(),
        "graph compiled"
    );

    Ok(CompiledGraph {
        sequences,
        entries,
        downstream,
        required_outputs,
    })
}

fn check_defined(graph: &ParsedGraph, defined: &BTreeSet<String>) -> Result<()> {
    for name in graph.tasks.keys() {
        if !defined.contains(name) {
            return Err(CycleflowError::UnsatisfiableReference(format!(
                "graph task '{name}' has no [runtime.{name}] definition"
            )));
        }
    }
    for task in graph.tasks.values() {
        for expr in task.triggers.iter().chain(task.suicides.iter()) {
            for cond in expr.conditions() {
                if !defined.contains(&cond.task) {
                    return Err(CycleflowError::UnsatisfiableReference(format!(
                        "graph references undefined task '{}'",
                        cond.task
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Best-effort rejection of provably always-false prerequisites: an integer
/// offset that is not a multiple of the sequence interval, where the
/// upstream task only ever runs on that same sequence, can never reference
/// an existing instance.
fn check_offsets(
    entries: &BTreeMap<String, Vec<TaskGraphEntry>>,
    sequences: &[(String, Sequence)],
) -> Result<()> {
    for (name, task_entries) in entries {
        for entry in task_entries {
            let &Interval::Integer(step) = sequences[entry.seq].1.interval() else {
                continue;
            };
            for expr in entry.prereqs.iter().chain(entry.suicides.iter()) {
                for cond in expr.conditions() {
                    let Some(Interval::Integer(offset)) = cond.offset else {
                        continue;
                    };
                    let upstream_only_here = entries
                        .get(&cond.task)
                        .is_some_and(|up| up.iter().all(|e| e.seq == entry.seq));
                    if upstream_only_here && offset % step != 0 {
                        return Err(CycleflowError::UnsatisfiableReference(format!(
                            "task '{name}' references '{}' which can never be on sequence {}",
                            cond.describe(),
                            sequences[entry.seq].0
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Derive required outputs per task from graph references.
///
/// `succeeded` is required by default; any `?`-qualified reference to the
/// task's success or finish lifts that. Custom outputs referenced without
/// `?` become required; a required reference anywhere beats an optional one.
fn required_outputs(
    entries: &BTreeMap<String, Vec<TaskGraphEntry>>,
    parsed: &[ParsedGraph],
) -> BTreeMap<String, BTreeSet<String>> {
    let mut required: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut success_optional: BTreeSet<String> = BTreeSet::new();
    let mut required_customs: BTreeSet<(String, String)> = BTreeSet::new();

    for graph in parsed {
        for r in &graph.output_refs {
            if r.output == OUTPUT_FINISHED || (r.output == OUTPUT_SUCCEEDED && r.optional) {
                success_optional.insert(r.task.clone());
            } else if r.output == OUTPUT_FAILED {
                // A failure reference means failing is an anticipated
                // outcome, so success is no longer required.
                success_optional.insert(r.task.clone());
            } else if r.output != OUTPUT_SUCCEEDED {
                if !r.optional {
                    required_customs.insert((r.task.clone(), r.output.clone()));
                }
            }
        }
    }

    for name in entries.keys() {
        let mut set = BTreeSet::new();
        if !success_optional.contains(name) {
            set.insert(OUTPUT_SUCCEEDED.to_string());
        }
        for (task, output) in &required_customs {
            if task == name {
                set.insert(output.clone());
            }
        }
        required.insert(name.clone(), set);
    }
    required
}
