// tests/graph_parser.rs

mod common;
use crate::common::init_tracing;

use std::collections::{BTreeMap, BTreeSet};

use cycleflow::cycling::{CyclePoint, Interval};
use cycleflow::errors::CycleflowError;
use cycleflow::graph::compiler::{self, CompiledGraph};
use cycleflow::graph::expr::PrereqExpr;
use cycleflow::graph::parser::parse_graph;
use cycleflow::types::CyclingMode;

fn compile_one(graph: &str, tasks: &[&str]) -> Result<CompiledGraph, CycleflowError> {
    let mut sections = BTreeMap::new();
    sections.insert("P1".to_string(), graph.to_string());
    let defined: BTreeSet<String> = tasks.iter().map(|s| s.to_string()).collect();
    compiler::compile(
        &sections,
        &defined,
        CyclePoint::Integer(1),
        Some(CyclePoint::Integer(10)),
        CyclingMode::Integer,
    )
}

#[test]
fn chains_become_pairwise_triggers() {
    init_tracing();

    let compiled = compile_one("a => b => c", &["a", "b", "c"]).unwrap();

    let a = compiled.entry("a", 0).unwrap();
    assert!(a.prereqs.is_empty());
    assert!(a.is_parentless());

    let b = compiled.entry("b", 0).unwrap();
    assert_eq!(b.prereqs.len(), 1);
    match &b.prereqs[0] {
        PrereqExpr::Cond(c) => {
            assert_eq!(c.task, "a");
            assert_eq!(c.output, "succeeded");
            assert_eq!(c.offset, None);
        }
        other => panic!("expected single condition, got {other:?}"),
    }

    let c = compiled.entry("c", 0).unwrap();
    assert_eq!(c.prereqs.len(), 1);
}

#[test]
fn conditional_expressions_preserve_structure() {
    init_tracing();

    let compiled = compile_one("(a | b) & c => d", &["a", "b", "c", "d"]).unwrap();
    let d = compiled.entry("d", 0).unwrap();
    assert_eq!(d.prereqs.len(), 1);

    match &d.prereqs[0] {
        PrereqExpr::All(children) => {
            assert_eq!(children.len(), 2);
            assert!(matches!(children[0], PrereqExpr::Any(_)));
            assert!(matches!(children[1], PrereqExpr::Cond(_)));
        }
        other => panic!("expected AND at the root, got {other:?}"),
    }
}

#[test]
fn offsets_and_qualifiers_parse() {
    init_tracing();

    let compiled = compile_one("a[-P1]:ready => a", &["a"]).unwrap();
    let a = compiled.entry("a", 0).unwrap();
    assert_eq!(a.prereqs.len(), 1);
    match &a.prereqs[0] {
        PrereqExpr::Cond(c) => {
            assert_eq!(c.task, "a");
            assert_eq!(c.offset, Some(Interval::Integer(-1)));
            assert_eq!(c.output, "ready");
        }
        other => panic!("expected condition, got {other:?}"),
    }
}

#[test]
fn question_mark_means_finished() {
    init_tracing();

    let compiled = compile_one("a? => b", &["a", "b"]).unwrap();
    let b = compiled.entry("b", 0).unwrap();
    match &b.prereqs[0] {
        PrereqExpr::Cond(c) => {
            assert_eq!(c.output, "finished");
            assert!(c.optional);
        }
        other => panic!("expected condition, got {other:?}"),
    }
    // `a?` lifts the default success requirement.
    assert!(compiled.required_outputs.get("a").unwrap().is_empty());
}

#[test]
fn required_outputs_follow_graph_references() {
    init_tracing();

    let compiled =
        compile_one("a:ready => b\na:extra? => c\na => d", &["a", "b", "c", "d"]).unwrap();
    let required = compiled.required_outputs.get("a").unwrap();

    assert!(required.contains("succeeded"));
    assert!(required.contains("ready"));
    assert!(!required.contains("extra"));
}

#[test]
fn suicide_triggers_attach_to_the_target() {
    init_tracing();

    let compiled = compile_one("a & b\na? & b? => !c", &["a", "b", "c"]).unwrap();
    let c = compiled.entry("c", 0).unwrap();
    assert!(c.prereqs.is_empty());
    assert_eq!(c.suicides.len(), 1);
    assert!(!c.is_parentless());

    // The suicide's conditions index under "finished".
    assert!(!compiled.downstream_of("a", "finished").is_empty());
    assert!(!compiled.downstream_of("b", "finished").is_empty());
}

#[test]
fn downstream_index_covers_all_references() {
    init_tracing();

    let compiled = compile_one("a => b\na[-P1] => c", &["a", "b", "c"]).unwrap();
    let refs = compiled.downstream_of("a", "succeeded");
    assert_eq!(refs.len(), 2);

    let to_b = refs.iter().find(|r| r.task == "b").unwrap();
    assert_eq!(to_b.offset, None);
    let to_c = refs.iter().find(|r| r.task == "c").unwrap();
    assert_eq!(to_c.offset, Some(Interval::Integer(-1)));
}

#[test]
fn double_operators_are_rejected() {
    init_tracing();

    let err = compile_one("a && b => c", &["a", "b", "c"]).unwrap_err();
    assert!(matches!(err, CycleflowError::GraphSyntax(_)));
    assert!(err.to_string().contains("&"));

    let err = compile_one("a || b => c", &["a", "b", "c"]).unwrap_err();
    assert!(matches!(err, CycleflowError::GraphSyntax(_)));
}

#[test]
fn illegal_right_side_constructs_are_rejected() {
    init_tracing();

    // OR on the right.
    let err = compile_one("a => b | c", &["a", "b", "c"]).unwrap_err();
    assert!(matches!(err, CycleflowError::GraphSyntax(_)));

    // Offset on the right.
    let err = compile_one("a => b[-P1]", &["a", "b"]).unwrap_err();
    assert!(matches!(err, CycleflowError::GraphSyntax(_)));

    // Suicide marker on the left.
    let err = compile_one("!a => b", &["a", "b"]).unwrap_err();
    assert!(matches!(err, CycleflowError::GraphSyntax(_)));
}

#[test]
fn syntax_errors_name_the_offending_substring() {
    init_tracing();

    let err = compile_one("a => b%%bad", &["a", "b"]).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("b%%bad"), "got: {message}");

    let err = compile_one("(a => b", &["a", "b"]).unwrap_err();
    assert!(err.to_string().contains("(a"), "got: {err}");
}

#[test]
fn undefined_tasks_are_unsatisfiable_references() {
    init_tracing();

    let err = compile_one("a => ghost", &["a"]).unwrap_err();
    assert!(matches!(err, CycleflowError::UnsatisfiableReference(_)));
    assert!(err.to_string().contains("ghost"));
}

#[test]
fn provably_false_offsets_are_rejected() {
    init_tracing();

    // On a P2 sequence, a[-P1] can never reference a sequence member.
    let mut sections = BTreeMap::new();
    sections.insert("P2".to_string(), "a[-P1] => a".to_string());
    let defined: BTreeSet<String> = ["a".to_string()].into();
    let err = compiler::compile(
        &sections,
        &defined,
        CyclePoint::Integer(1),
        None,
        CyclingMode::Integer,
    )
    .unwrap_err();
    assert!(matches!(err, CycleflowError::UnsatisfiableReference(_)));

    // A multiple of the interval is fine.
    let mut sections = BTreeMap::new();
    sections.insert("P2".to_string(), "a[-P2] => a".to_string());
    assert!(
        compiler::compile(
            &sections,
            &defined,
            CyclePoint::Integer(1),
            None,
            CyclingMode::Integer,
        )
        .is_ok()
    );
}

#[test]
fn comments_and_blank_lines_are_ignored() {
    init_tracing();

    let graph = parse_graph(
        "# header comment\n\na => b  # trailing comment\n",
        CyclingMode::Integer,
    )
    .unwrap();
    assert!(graph.tasks.contains_key("a"));
    assert!(graph.tasks.contains_key("b"));
    assert_eq!(graph.tasks.get("b").unwrap().triggers.len(), 1);
}
