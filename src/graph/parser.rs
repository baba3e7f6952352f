// src/graph/parser.rs

//! Parser for graph strings.
//!
//! The general form of a dependency is `EXPRESSION => NODE`, where the left
//! side is a logical expression over qualified node names (`&`, `|`,
//! parentheses) and the right side is one or more node names joined by `&`.
//! A qualified node looks like `NAME([CYCLE-POINT-OFFSET])(:OUTPUT)(?)`.
//!
//! - The default output is `:succeeded`; `name?` means "finished" (either
//!   `succeeded` or `failed`) and marks the task's success optional.
//! - Chains are processed as pairs: `foo => bar => baz` is
//!   `foo => bar` plus `bar => baz`. Output qualifiers on the right of a
//!   pair do not affect that pair's structure (they matter when the node
//!   reappears on the left, and for output-optionality accounting).
//! - `!NAME` on the right declares a suicide trigger: the left expression
//!   removes the instance instead of spawning it.
//!
//! Parsing is pure and deterministic; malformed input fails with a
//! `GraphSyntax` error naming the offending substring.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::cycling::Interval;
use crate::errors::{CycleflowError, Result};
use crate::graph::expr::{
    OUTPUT_FAILED, OUTPUT_FINISHED, OUTPUT_STARTED, OUTPUT_SUCCEEDED, PrereqExpr, TriggerRef,
};
use crate::types::CyclingMode;

const ARROW: &str = "=>";

static REC_NODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_][A-Za-z0-9_\-]*)(?:\[([^\]]+)\])?(?::([A-Za-z_][A-Za-z0-9_\-]*))?(\?)?$")
        .expect("node regex is valid")
});

/// Per-task parse results for one graph section.
#[derive(Debug, Clone, Default)]
pub struct ParsedTask {
    /// Normal prerequisite expressions (one per `=> task` occurrence).
    pub triggers: Vec<PrereqExpr>,
    /// Suicide prerequisite expressions (`=> !task`).
    pub suicides: Vec<PrereqExpr>,
}

/// Every output reference seen while parsing, used to derive the
/// required/optional flag on declared outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRef {
    pub task: String,
    pub output: String,
    pub optional: bool,
}

/// Result of parsing one graph section.
#[derive(Debug, Clone, Default)]
pub struct ParsedGraph {
    pub tasks: BTreeMap<String, ParsedTask>,
    pub output_refs: Vec<OutputRef>,
}

impl ParsedGraph {
    fn task_entry(&mut self, name: &str) -> &mut ParsedTask {
        self.tasks.entry(name.to_string()).or_default()
    }
}

/// Parse a complete graph section (possibly multi-line).
pub fn parse_graph(text: &str, mode: CyclingMode) -> Result<ParsedGraph> {
    let mut graph = ParsedGraph::default();

    for raw_line in text.lines() {
        let line = match raw_line.split_once('#') {
            Some((code, _comment)) => code.trim(),
            None => raw_line.trim(),
        };
        if line.is_empty() {
            continue;
        }
        if line.contains("&&") {
            return Err(syntax(format!("the graph AND operator is '&': {line}")));
        }
        if line.contains("||") {
            return Err(syntax(format!("the graph OR operator is '|': {line}")));
        }

        let chain: Vec<&str> = line.split(ARROW).map(str::trim).collect();
        if chain.iter().any(|seg| seg.is_empty()) {
            return Err(syntax(format!("null task name in graph: {line}")));
        }

        if chain.len() == 1 {
            // A lone node list declares tasks with no prerequisites.
            register_lone_nodes(&mut graph, chain[0], mode)?;
            continue;
        }

        // First segment's offset-free nodes are auto-registered so that
        // upstream tasks always have an entry of their own.
        register_lone_nodes(&mut graph, chain[0], mode)?;

        for pair in chain.windows(2) {
            process_pair(&mut graph, pair[0], pair[1], mode)?;
        }
    }

    Ok(graph)
}

fn syntax(msg: String) -> CycleflowError {
    CycleflowError::GraphSyntax(msg)
}

/// Register offset-free nodes of an expression as known tasks (with no
/// triggers of their own), and record their output references.
fn register_lone_nodes(graph: &mut ParsedGraph, segment: &str, mode: CyclingMode) -> Result<()> {
    for token in split_atoms(segment) {
        let token = token.trim_start_matches('!');
        let node = parse_node(token, mode)?;
        if node.offset.is_none() {
            graph.task_entry(&node.name);
        }
        record_output_ref(graph, &node);
    }
    Ok(())
}

/// Process a single dependency pair `left => right`.
fn process_pair(graph: &mut ParsedGraph, left: &str, right: &str, mode: CyclingMode) -> Result<()> {
    if right.contains('|') {
        return Err(syntax(format!("illegal OR on right side: {left} => {right}")));
    }
    if right.contains('[') {
        return Err(syntax(format!(
            "illegal cycle point offset on right side: {left} => {right}"
        )));
    }
    if left.contains('!') {
        return Err(syntax(format!(
            "suicide markers must be on the right of a trigger: {left}"
        )));
    }
    let opens = left.chars().filter(|c| *c == '(').count();
    let closes = left.chars().filter(|c| *c == ')').count();
    if opens != closes {
        return Err(syntax(format!("parenthesis mismatch in: {left}")));
    }

    let expr = parse_expression(graph, left, mode)?;

    for part in right.split('&') {
        let part = part.trim();
        if part.is_empty() {
            return Err(syntax(format!("null task name in graph: {left} => {right}")));
        }
        let (suicide, node_str) = match part.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, part),
        };
        let node = parse_node(node_str, mode)?;
        record_output_ref(graph, &node);

        let entry = graph.task_entry(&node.name);
        if suicide {
            entry.suicides.push(expr.clone());
        } else {
            entry.triggers.push(expr.clone());
        }
    }
    Ok(())
}

/// Parse a left-side logical expression into a [`PrereqExpr`].
///
/// Grammar: `expr := term ('|' term)*`, `term := factor ('&' factor)*`,
/// `factor := '(' expr ')' | node`.
fn parse_expression(graph: &mut ParsedGraph, text: &str, mode: CyclingMode) -> Result<PrereqExpr> {
    let tokens = tokenize(text)?;
    let mut pos = 0;
    let expr = parse_or(graph, &tokens, &mut pos, text, mode)?;
    if pos != tokens.len() {
        return Err(syntax(format!(
            "unexpected '{}' in expression: {text}",
            tokens[pos]
        )));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    And,
    Or,
    Node(String),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Open => write!(f, "("),
            Token::Close => write!(f, ")"),
            Token::And => write!(f, "&"),
            Token::Or => write!(f, "|"),
            Token::Node(s) => write!(f, "{s}"),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut atom = String::new();
    for c in text.chars() {
        match c {
            '(' | ')' | '&' | '|' => {
                if !atom.trim().is_empty() {
                    tokens.push(Token::Node(atom.trim().to_string()));
                }
                atom.clear();
                tokens.push(match c {
                    '(' => Token::Open,
                    ')' => Token::Close,
                    '&' => Token::And,
                    _ => Token::Or,
                });
            }
            _ => atom.push(c),
        }
    }
    if !atom.trim().is_empty() {
        tokens.push(Token::Node(atom.trim().to_string()));
    }
    Ok(tokens)
}

fn parse_or(
    graph: &mut ParsedGraph,
    tokens: &[Token],
    pos: &mut usize,
    text: &str,
    mode: CyclingMode,
) -> Result<PrereqExpr> {
    let mut children = vec![parse_and(graph, tokens, pos, text, mode)?];
    while *pos < tokens.len() && tokens[*pos] == Token::Or {
        *pos += 1;
        children.push(parse_and(graph, tokens, pos, text, mode)?);
    }
    Ok(if children.len() == 1 {
        children.pop().expect("one child")
    } else {
        PrereqExpr::Any(children)
    })
}

fn parse_and(
    graph: &mut ParsedGraph,
    tokens: &[Token],
    pos: &mut usize,
    text: &str,
    mode: CyclingMode,
) -> Result<PrereqExpr> {
    let mut children = vec![parse_factor(graph, tokens, pos, text, mode)?];
    while *pos < tokens.len() && tokens[*pos] == Token::And {
        *pos += 1;
        children.push(parse_factor(graph, tokens, pos, text, mode)?);
    }
    Ok(if children.len() == 1 {
        children.pop().expect("one child")
    } else {
        PrereqExpr::All(children)
    })
}

fn parse_factor(
    graph: &mut ParsedGraph,
    tokens: &[Token],
    pos: &mut usize,
    text: &str,
    mode: CyclingMode,
) -> Result<PrereqExpr> {
    match tokens.get(*pos) {
        Some(Token::Open) => {
            *pos += 1;
            let inner = parse_or(graph, tokens, pos, text, mode)?;
            match tokens.get(*pos) {
                Some(Token::Close) => {
                    *pos += 1;
                    Ok(inner)
                }
                _ => Err(syntax(format!("missing ')' in expression: {text}"))),
            }
        }
        Some(Token::Node(s)) => {
            *pos += 1;
            let node = parse_node(s, mode)?;
            record_output_ref(graph, &node);
            Ok(PrereqExpr::Cond(node.into_trigger_ref()))
        }
        Some(other) => Err(syntax(format!("unexpected '{other}' in expression: {text}"))),
        None => Err(syntax(format!("truncated expression: {text}"))),
    }
}

/// A parsed node occurrence, before conversion to a [`TriggerRef`].
struct ParsedNode {
    name: String,
    offset: Option<Interval>,
    output: String,
    finished: bool,
    optional: bool,
}

impl ParsedNode {
    fn into_trigger_ref(self) -> TriggerRef {
        TriggerRef {
            task: self.name,
            offset: self.offset,
            output: if self.finished {
                OUTPUT_FINISHED.to_string()
            } else {
                self.output
            },
            optional: self.optional || self.finished,
        }
    }
}

fn parse_node(token: &str, mode: CyclingMode) -> Result<ParsedNode> {
    let caps = REC_NODE.captures(token).ok_or_else(|| {
        syntax(format!(
            "bad graph node format: '{token}' (expected NAME([OFFSET])(:OUTPUT)(?))"
        ))
    })?;

    let name = caps.get(1).expect("node name group").as_str().to_string();
    let offset = match caps.get(2) {
        Some(m) => {
            let interval = Interval::parse(m.as_str(), mode)
                .map_err(|_| syntax(format!("bad cycle point offset '[{}]' on node '{token}'", m.as_str())))?;
            if interval.is_zero() { None } else { Some(interval) }
        }
        None => None,
    };
    let qualifier = caps.get(3).map(|m| m.as_str());
    let question = caps.get(4).is_some();

    let (output, finished) = match qualifier {
        None => (OUTPUT_SUCCEEDED.to_string(), question),
        Some(q) => match q {
            "succeed" | "succeeded" => (OUTPUT_SUCCEEDED.to_string(), false),
            "fail" | "failed" => (OUTPUT_FAILED.to_string(), false),
            "start" | "started" => (OUTPUT_STARTED.to_string(), false),
            "finish" | "finished" => (OUTPUT_FINISHED.to_string(), true),
            custom => (custom.to_string(), false),
        },
    };

    Ok(ParsedNode {
        name,
        offset,
        output,
        finished,
        optional: question,
    })
}

fn record_output_ref(graph: &mut ParsedGraph, node: &ParsedNode) {
    graph.output_refs.push(OutputRef {
        task: node.name.clone(),
        output: if node.finished {
            OUTPUT_FINISHED.to_string()
        } else {
            node.output.clone()
        },
        optional: node.optional || node.finished,
    });
}

/// Split a plain (non-conditional) node list on `&`, dropping parentheses.
fn split_atoms(segment: &str) -> Vec<String> {
    segment
        .replace(['(', ')'], " ")
        .split(['&', '|'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
