// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::{CyclingMode, TimeoutAction};

/// Top-level workflow definition as read from a TOML file.
///
/// ```toml
/// [scheduling]
/// cycling_mode = "integer"
/// initial_cycle_point = "1"
/// final_cycle_point = "6"
/// runahead_limit = "P3"
///
/// [scheduling.graph]
/// P1 = "a => b & c"
///
/// [scheduling.queues.big]
/// limit = 2
/// members = ["b", "c"]
///
/// [runtime.a]
/// script = "echo a"
/// ```
///
/// All sections other than the graph are optional and have defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkflowConfig {
    #[serde(default)]
    pub scheduling: SchedulingSection,

    /// All namespaces from `[runtime.<name>]`: tasks and the families they
    /// inherit from.
    #[serde(default)]
    pub runtime: BTreeMap<String, NamespaceSection>,

    /// `[scheduler]` — timers and checkpointing.
    #[serde(default)]
    pub scheduler: SchedulerSection,
}

/// `[scheduling]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulingSection {
    #[serde(default)]
    pub cycling_mode: CyclingMode,

    #[serde(default = "default_initial_cycle_point")]
    pub initial_cycle_point: String,

    #[serde(default)]
    pub final_cycle_point: Option<String>,

    /// Interval (`P3`, `PT12H`) or a bare count of cycle points.
    /// Defaults to three cycle points past the earliest incomplete point.
    #[serde(default)]
    pub runahead_limit: Option<String>,

    /// Graph strings keyed by recurrence expression (`R1`, `P1`, `PT6H`,
    /// `P1!3`, ...).
    #[serde(default)]
    pub graph: BTreeMap<String, String>,

    /// Concurrency-limited queues from `[scheduling.queues.<name>]`.
    #[serde(default)]
    pub queues: BTreeMap<String, QueueSection>,
}

fn default_initial_cycle_point() -> String {
    "1".to_string()
}

impl Default for SchedulingSection {
    fn default() -> Self {
        Self {
            cycling_mode: CyclingMode::default(),
            initial_cycle_point: default_initial_cycle_point(),
            final_cycle_point: None,
            runahead_limit: None,
            graph: BTreeMap::new(),
            queues: BTreeMap::new(),
        }
    }
}

/// `[scheduling.queues.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct QueueSection {
    /// Maximum simultaneously active (submitted/running) members.
    /// 0 means unlimited.
    #[serde(default)]
    pub limit: usize,

    /// Member task or family names; family membership is resolved through
    /// the inheritance chain.
    #[serde(default)]
    pub members: Vec<String>,
}

/// `[runtime.<name>]` section: one namespace (task or family).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NamespaceSection {
    /// Parent namespaces; multiple inheritance allowed, later parents win
    /// on conflicting fields.
    #[serde(default)]
    pub inherit: Vec<String>,

    /// Job script run at submission.
    #[serde(default)]
    pub script: Option<String>,

    /// Retry delays as interval strings (`PT1S`); one retry per entry,
    /// measured from failure time.
    #[serde(default)]
    pub retry_delays: Option<Vec<String>>,

    /// Date-time mode only: expire the instance instead of running it when
    /// the wall clock passes point + offset.
    #[serde(default)]
    pub expire_offset: Option<String>,

    /// Custom outputs: name → message emitted by the job.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,

    /// Environment for the job script.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SchedulerSection {
    /// Seconds of stall (nothing active, nothing runnable) before acting.
    #[serde(default)]
    pub stall_timeout: Option<u64>,

    #[serde(default)]
    pub stall_action: TimeoutAction,

    /// Seconds without a status-changing event before acting.
    #[serde(default)]
    pub inactivity_timeout: Option<u64>,

    #[serde(default)]
    pub inactivity_action: TimeoutAction,

    /// Path for checkpoint snapshots; no checkpointing when unset.
    #[serde(default)]
    pub checkpoint_path: Option<String>,
}

/// A validated workflow configuration.
///
/// Construction goes through `TryFrom<RawWorkflowConfig>` (see
/// `config::validate`), so holders can rely on: the graph parses, all graph
/// tasks are defined in the runtime section, inheritance is acyclic, and all
/// points/intervals parse in the configured cycling mode.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub scheduling: SchedulingSection,
    pub runtime: BTreeMap<String, NamespaceSection>,
    pub scheduler: SchedulerSection,
}

impl WorkflowConfig {
    /// Internal constructor used by validation; not public API.
    pub(crate) fn new_unchecked(
        scheduling: SchedulingSection,
        runtime: BTreeMap<String, NamespaceSection>,
        scheduler: SchedulerSection,
    ) -> Self {
        Self {
            scheduling,
            runtime,
            scheduler,
        }
    }
}
