//! Graph rendering for external tools.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::Graph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Dot,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "dot" | "graphviz" => Ok(ExportFormat::Dot),
            other => Err(format!("unknown export format `{other}` (expected json|dot)")),
        }
    }
}

pub fn render(graph: &Graph, format: ExportFormat) -> serde_json::Result<String> {
    match format {
        ExportFormat::Json => serde_json::to_string_pretty(graph),
        ExportFormat::Dot => Ok(render_dot(graph)),
    }
}

fn dot_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn shape_for(kind: &str) -> &'static str {
    match kind {
        "vpc" | "subnet" => "folder",
        "security-group" => "octagon",
        "s3-bucket" | "ebs-volume" | "efs" => "cylinder",
        "rds-instance" | "rds-cluster" | "dynamodb-table" | "redshift-cluster" => "cylinder",
        "error" => "note",
        _ => "box",
    }
}

/// Graphviz DOT, nodes clustered by region.
pub fn render_dot(graph: &Graph) -> String {
    let mut out = String::new();
    out.push_str("digraph skymap {\n");
    out.push_str("  rankdir=LR;\n");
    out.push_str("  node [shape=box, fontname=\"Helvetica\"];\n");
    out.push_str("  edge [fontname=\"Helvetica\"];\n\n");

    let mut by_region: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, node) in graph.nodes.iter().enumerate() {
        by_region.entry(node.region.as_str()).or_default().push(i);
    }

    for (n, (region, members)) in by_region.iter().enumerate() {
        let _ = writeln!(out, "  subgraph cluster_{n} {{");
        let _ = writeln!(out, "    label=\"{}\";", dot_escape(region));
        for &i in members {
            let node = &graph.nodes[i];
            let label = format!("{}\n({})", node.label, node.kind);
            let _ = writeln!(
                out,
                "    \"{}\" [label=\"{}\", shape={}];",
                dot_escape(&node.id),
                dot_escape(&label),
                shape_for(&node.kind)
            );
        }
        out.push_str("  }\n");
    }

    if !graph.edges.is_empty() {
        out.push('\n');
    }
    for edge in &graph.edges {
        let style = if edge.kind == "security-flow" {
            ", style=dashed"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "  \"{}\" -> \"{}\" [label=\"{}\"{style}];",
            dot_escape(&edge.source),
            dot_escape(&edge.target),
            dot_escape(&edge.label)
        );
    }

    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Edge, Node};
    use serde_json::Map;

    fn graph() -> Graph {
        Graph {
            nodes: vec![
                Node {
                    id: "sg:sg-1".into(),
                    label: "web \"front\"".into(),
                    kind: "security-group".into(),
                    region: "us-east-1".into(),
                    service: "ec2".into(),
                    metadata: Map::new(),
                },
                Node {
                    id: "s3:logs".into(),
                    label: "logs".into(),
                    kind: "s3-bucket".into(),
                    region: "global".into(),
                    service: "s3".into(),
                    metadata: Map::new(),
                },
            ],
            edges: vec![Edge {
                source: "sg:sg-0".into(),
                target: "sg:sg-1".into(),
                label: "allows-traffic-to".into(),
                kind: "security-flow".into(),
            }],
        }
    }

    #[test]
    fn dot_output_escapes_and_clusters() {
        let dot = render_dot(&graph());
        assert!(dot.starts_with("digraph skymap {"));
        assert!(dot.contains("label=\"global\""));
        assert!(dot.contains("\"sg:sg-1\" [label=\"web \\\"front\\\"\\n(security-group)\", shape=octagon];"));
        assert!(dot.contains("\"sg:sg-0\" -> \"sg:sg-1\" [label=\"allows-traffic-to\", style=dashed];"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn formats_parse() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("dot".parse::<ExportFormat>().unwrap(), ExportFormat::Dot);
        assert!("svg".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn json_round_trips_through_the_wire_names() {
        let text = render(&graph(), ExportFormat::Json).unwrap();
        let back: Graph = serde_json::from_str(&text).unwrap();
        assert_eq!(back, graph());
    }
}
