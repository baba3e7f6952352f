// src/graph/expr.rs

//! Immutable prerequisite expression trees.
//!
//! A graph expression like `a[-P1]:ready & (b | c?)` compiles once into a
//! tagged tree; evaluation is tree-walking against a satisfied-condition set,
//! never re-parsing text at run time.

use crate::cycling::Interval;

/// Standard output names, always implicitly declared on every task.
pub const OUTPUT_SUCCEEDED: &str = "succeeded";
pub const OUTPUT_FAILED: &str = "failed";
pub const OUTPUT_STARTED: &str = "started";

/// Pseudo-output satisfied by either `succeeded` or `failed`.
pub const OUTPUT_FINISHED: &str = "finished";

/// One leaf condition: an output of an upstream task, optionally offset in
/// cycle relative to the dependent instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRef {
    pub task: String,
    /// Point-relative offset as written (`[-P1]` is `Interval::Integer(-1)`);
    /// `None` means same cycle point.
    pub offset: Option<Interval>,
    pub output: String,
    /// `?`-qualified references do not make the output required.
    pub optional: bool,
}

impl TriggerRef {
    pub fn describe(&self) -> String {
        let offset = match &self.offset {
            Some(o) => format!("[{o}]"),
            None => String::new(),
        };
        format!("{}{}:{}", self.task, offset, self.output)
    }
}

/// Boolean expression tree over [`TriggerRef`] leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrereqExpr {
    All(Vec<PrereqExpr>),
    Any(Vec<PrereqExpr>),
    Cond(TriggerRef),
}

impl PrereqExpr {
    /// All leaf conditions, in left-to-right order.
    pub fn conditions(&self) -> Vec<&TriggerRef> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a TriggerRef>) {
        match self {
            PrereqExpr::All(children) | PrereqExpr::Any(children) => {
                for child in children {
                    child.collect(out);
                }
            }
            PrereqExpr::Cond(c) => out.push(c),
        }
    }

    /// Evaluate against a predicate over leaves.
    pub fn evaluate<F: Fn(&TriggerRef) -> bool + Copy>(&self, satisfied: F) -> bool {
        match self {
            PrereqExpr::All(children) => children.iter().all(|c| c.evaluate(satisfied)),
            PrereqExpr::Any(children) => children.iter().any(|c| c.evaluate(satisfied)),
            PrereqExpr::Cond(c) => satisfied(c),
        }
    }
}
