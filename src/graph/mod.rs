// src/graph/mod.rs

//! Graph expression parsing and compilation.
//!
//! - [`expr`] defines the immutable prerequisite expression tree.
//! - [`parser`] turns one graph string (the content of a single recurrence
//!   section) into per-task trigger expressions.
//! - [`compiler`] combines all recurrence sections into the static dependency
//!   structure consumed by the task pool: per-(task, sequence) prerequisite
//!   and suicide expressions, the reverse output index used by the matcher,
//!   and the required-output sets.

pub mod compiler;
pub mod expr;
pub mod parser;

pub use compiler::{CompiledGraph, DownstreamRef, TaskGraphEntry};
pub use expr::{PrereqExpr, TriggerRef};
pub use parser::ParsedGraph;
