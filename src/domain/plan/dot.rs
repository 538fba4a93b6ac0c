use std::fmt::Write;

use crate::domain::plan::action::{Action, Operation};
use crate::domain::plan::timed_reconfiguration_plan::TimedReconfigurationPlan;

const HEADER: &str = "digraph TimedExecutionGraph{";
const RANK: &str = "rankdir=LR;";

/// Renders the plan as a graph: nodes are physical nodes, one edge per action.
/// Runs and instantiations come from an invisible source node, stops go to an
/// invisible sink node. Node actions are drawn as self-loops.
pub fn to_dot(plan: &TimedReconfigurationPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", HEADER);
    let _ = writeln!(out, "{}", RANK);

    for action in plan.actions() {
        let edge = edge_of(action);

        if let Some(pseudo) = &edge.pseudo {
            let _ = writeln!(out, "\"{}\" [label=\"\", shape=none];", pseudo);
        }

        let _ = writeln!(
            out,
            "\"{}\" -> \"{}\" [label=\"{}({})\", headlabel=\"{}\", taillabel=\"{}\", color=\"{}\"];",
            edge.from, edge.to, edge.verb, edge.subject, action.end, action.start, edge.color
        );
    }

    out.push('}');
    out.push('\n');
    out
}

struct Edge {
    from: String,
    to: String,
    verb: &'static str,
    subject: String,
    color: &'static str,
    pseudo: Option<String>,
}

fn edge_of(action: &Action) -> Edge {
    match &action.operation {
        Operation::Migration { vm, from, to } => Edge::between(from.as_str(), to.as_str(), "migrate", vm.as_str(), "black"),
        Operation::Suspend { vm, from, to } => Edge::between(from.as_str(), to.as_str(), "suspend", vm.as_str(), "orange"),
        Operation::Resume { vm, from, to } => Edge::between(from.as_str(), to.as_str(), "resume", vm.as_str(), "darkgreen"),
        Operation::Run { vm, node } => Edge::entering(vm.as_str(), node.as_str(), "run", "blue"),
        Operation::Instantiate { vm, node } => Edge::entering(vm.id.as_str(), node.as_str(), "instantiate", "purple"),
        Operation::Stop { vm, node } => {
            let sink = format!("out_{}", vm);
            Edge { from: node.to_string(), to: sink.clone(), verb: "stop", subject: vm.to_string(), color: "red", pseudo: Some(sink) }
        }
        Operation::Startup { node } => Edge::between(node.as_str(), node.as_str(), "boot", node.as_str(), "green"),
        Operation::Shutdown { node } => Edge::between(node.as_str(), node.as_str(), "halt", node.as_str(), "gray"),
        Operation::Deploy { node, platform } => Edge::between(node.as_str(), node.as_str(), "deploy", platform.as_str(), "brown"),
    }
}

impl Edge {
    fn between(from: &str, to: &str, verb: &'static str, subject: &str, color: &'static str) -> Self {
        Edge { from: from.to_string(), to: to.to_string(), verb, subject: subject.to_string(), color, pseudo: None }
    }

    fn entering(vm: &str, node: &str, verb: &'static str, color: &'static str) -> Self {
        let source = format!("in_{}", vm);
        Edge { from: source.clone(), to: node.to_string(), verb, subject: vm.to_string(), color, pseudo: Some(source) }
    }
}

/// One edge read back from a graph produced by [`to_dot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotEdge {
    pub from: String,
    pub to: String,
    pub label: String,
    pub start: i64,
    pub end: i64,
}

/// Parsed content of a graph produced by [`to_dot`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DotGraph {
    pub edges: Vec<DotEdge>,
    pub pseudo_nodes: Vec<String>,
}

/// Reads back the edges and pseudo-nodes of a graph. Returns `None` if the
/// text is not wrapped in the expected header and footer or if a line cannot
/// be parsed.
pub fn parse_edges(dot: &str) -> Option<DotGraph> {
    let mut lines = dot.lines().map(str::trim).filter(|l| !l.is_empty());

    if lines.next()? != HEADER || lines.next()? != RANK {
        return None;
    }

    let mut graph = DotGraph::default();
    let mut closed = false;

    for line in lines {
        if closed {
            return None;
        }
        if line == "}" {
            closed = true;
            continue;
        }

        if line.contains("->") {
            graph.edges.push(parse_edge(line)?);
        } else if line.ends_with("[label=\"\", shape=none];") {
            graph.pseudo_nodes.push(quoted(line, 0)?.0);
        } else {
            return None;
        }
    }

    closed.then_some(graph)
}

fn parse_edge(line: &str) -> Option<DotEdge> {
    let (from, rest) = quoted(line, 0)?;
    let arrow = line[rest..].find("->")? + rest;
    let (to, _) = quoted(line, arrow)?;

    Some(DotEdge {
        from,
        to,
        label: attribute(line, "label")?,
        start: attribute(line, "taillabel")?.parse().ok()?,
        end: attribute(line, "headlabel")?.parse().ok()?,
    })
}

/// First quoted string found at or after `from`, with the index following it.
fn quoted(line: &str, from: usize) -> Option<(String, usize)> {
    let open = line[from..].find('"')? + from + 1;
    let close = line[open..].find('"')? + open;
    Some((line[open..close].to_string(), close + 1))
}

fn attribute(line: &str, name: &str) -> Option<String> {
    let key = format!(" {}=\"", name);
    let key_alt = format!("[{}=\"", name);
    let start = line.find(&key).map(|i| i + key.len()).or_else(|| line.find(&key_alt).map(|i| i + key_alt.len()))?;
    let end = line[start..].find('"')? + start;
    Some(line[start..end].to_string())
}
