//! Skymap relationship graph
//!
//! Turns one inventory document into a graph of resource nodes and typed,
//! directed edges, and answers filtered queries over it.
//!
//! - [`ident`]: node identifiers and display labels
//! - [`kinds`]: the per-kind translation registry
//! - [`builder`]: the single-pass graph builder
//! - [`index`]: region/service/adjacency indexes and filtered views
//! - [`snapshot`]: versioned, atomically swapped graph snapshots
//! - [`export`]: DOT and JSON rendering

pub mod builder;
pub mod export;
pub mod ident;
pub mod index;
pub mod kinds;
pub mod snapshot;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use builder::{build_graph, CrossRefs, GraphBuilder};
pub use index::{FacetFilter, GraphIndex, GraphQuery, NONE_SENTINEL};
pub use snapshot::{GraphSnapshot, SnapshotCell};

/// One graph vertex: a cloud resource or an access-error marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// `<kind-prefix>:<local-id>`, unique across the graph.
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Region code, or `"global"`.
    pub region: String,
    pub service: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A directed relationship between two node ids.
///
/// Endpoints are not required to exist among the built nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    /// Relationship verb (`contains`, `member-of`, ...).
    pub label: String,
    /// Relationship category (`network`, `security`, `iam`, ...).
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn filters(&self) -> GraphFilters {
        GraphFilters::from_nodes(&self.nodes)
    }
}

/// Distinct facet values present among a graph's nodes, each sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphFilters {
    pub regions: Vec<String>,
    pub services: Vec<String>,
    pub types: Vec<String>,
}

impl GraphFilters {
    pub fn from_nodes(nodes: &[Node]) -> Self {
        let mut regions = BTreeSet::new();
        let mut services = BTreeSet::new();
        let mut types = BTreeSet::new();
        for node in nodes {
            regions.insert(node.region.as_str());
            services.insert(node.service.as_str());
            types.insert(node.kind.as_str());
        }
        let owned = |set: BTreeSet<&str>| set.into_iter().map(str::to_string).collect();
        Self {
            regions: owned(regions),
            services: owned(services),
            types: owned(types),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, kind: &str, region: &str, service: &str) -> Node {
        Node {
            id: id.to_string(),
            label: id.to_string(),
            kind: kind.to_string(),
            region: region.to_string(),
            service: service.to_string(),
            metadata: Map::new(),
        }
    }

    #[test]
    fn filters_are_sorted_and_distinct() {
        let graph = Graph {
            nodes: vec![
                node("vpc:b", "vpc", "us-west-2", "ec2"),
                node("s3:x", "s3-bucket", "global", "s3"),
                node("vpc:a", "vpc", "us-east-1", "ec2"),
            ],
            edges: Vec::new(),
        };
        let filters = graph.filters();
        assert_eq!(filters.regions, vec!["global", "us-east-1", "us-west-2"]);
        assert_eq!(filters.services, vec!["ec2", "s3"]);
        assert_eq!(filters.types, vec!["s3-bucket", "vpc"]);
    }

    #[test]
    fn node_and_edge_use_type_on_the_wire() {
        let v = serde_json::to_value(node("sg:sg-1", "security-group", "us-east-1", "ec2")).unwrap();
        assert_eq!(v["type"], "security-group");
        assert!(v.get("kind").is_none());

        let edge = Edge {
            source: "a".into(),
            target: "b".into(),
            label: "contains".into(),
            kind: "network".into(),
        };
        let v = serde_json::to_value(&edge).unwrap();
        assert_eq!(v["type"], "network");
    }
}
