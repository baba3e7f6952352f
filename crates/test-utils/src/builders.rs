#![allow(dead_code)]

use std::collections::BTreeMap;

use cycleflow::config::{
    NamespaceSection, QueueSection, RawWorkflowConfig, SchedulerSection, SchedulingSection,
    WorkflowConfig,
};
use cycleflow::workflow::{self, CompiledWorkflow};

/// Builder for `WorkflowConfig` to simplify test setup.
pub struct WorkflowConfigBuilder {
    config: RawWorkflowConfig,
}

impl WorkflowConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawWorkflowConfig {
                scheduling: SchedulingSection::default(),
                runtime: BTreeMap::new(),
                scheduler: SchedulerSection::default(),
            },
        }
    }

    pub fn integer_cycling(mut self, initial: &str, final_point: Option<&str>) -> Self {
        self.config.scheduling.cycling_mode = cycleflow::types::CyclingMode::Integer;
        self.config.scheduling.initial_cycle_point = initial.to_string();
        self.config.scheduling.final_cycle_point = final_point.map(str::to_string);
        self
    }

    pub fn datetime_cycling(mut self, initial: &str, final_point: Option<&str>) -> Self {
        self.config.scheduling.cycling_mode = cycleflow::types::CyclingMode::Datetime;
        self.config.scheduling.initial_cycle_point = initial.to_string();
        self.config.scheduling.final_cycle_point = final_point.map(str::to_string);
        self
    }

    pub fn runahead_limit(mut self, limit: &str) -> Self {
        self.config.scheduling.runahead_limit = Some(limit.to_string());
        self
    }

    pub fn graph(mut self, recurrence: &str, text: &str) -> Self {
        self.config
            .scheduling
            .graph
            .insert(recurrence.to_string(), text.to_string());
        self
    }

    pub fn queue(mut self, name: &str, limit: usize, members: &[&str]) -> Self {
        self.config.scheduling.queues.insert(
            name.to_string(),
            QueueSection {
                limit,
                members: members.iter().map(|s| s.to_string()).collect(),
            },
        );
        self
    }

    pub fn task(mut self, name: &str, ns: NamespaceSection) -> Self {
        self.config.runtime.insert(name.to_string(), ns);
        self
    }

    /// Shorthand: a task with just a script.
    pub fn simple_task(self, name: &str) -> Self {
        self.task(name, NamespaceBuilder::new().script("true").build())
    }

    pub fn build(self) -> WorkflowConfig {
        WorkflowConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }

    pub fn compile(self) -> CompiledWorkflow {
        workflow::compile(self.build()).expect("Failed to compile workflow from builder")
    }
}

impl Default for WorkflowConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `NamespaceSection`.
pub struct NamespaceBuilder {
    ns: NamespaceSection,
}

impl NamespaceBuilder {
    pub fn new() -> Self {
        Self {
            ns: NamespaceSection::default(),
        }
    }

    pub fn inherit(mut self, parent: &str) -> Self {
        self.ns.inherit.push(parent.to_string());
        self
    }

    pub fn script(mut self, script: &str) -> Self {
        self.ns.script = Some(script.to_string());
        self
    }

    pub fn retry_delays(mut self, delays: &[&str]) -> Self {
        self.ns.retry_delays = Some(delays.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn expire_offset(mut self, offset: &str) -> Self {
        self.ns.expire_offset = Some(offset.to_string());
        self
    }

    pub fn output(mut self, name: &str, message: &str) -> Self {
        self.ns.outputs.insert(name.to_string(), message.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.ns.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> NamespaceSection {
        self.ns
    }
}

impl Default for NamespaceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
