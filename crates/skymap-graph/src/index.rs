//! Post-build query indexes.
//!
//! Node positions are grouped per region and per service in roaring bitmaps,
//! so a filtered view is one union per facet and one intersection across
//! facets. Every edge position is listed under both of its endpoints.
//!
//! Views keep graph order: nodes in emission order, edges in emission order,
//! each edge at most once, and only edges whose two endpoints are in the
//! selected node set. Dangling edges therefore never appear in a view, even
//! an unfiltered one.

use std::collections::{BTreeMap, BTreeSet};

use ahash::AHashMap;
use roaring::RoaringBitmap;

use crate::{Edge, Graph, Node};

/// Filter value meaning "nothing matches".
pub const NONE_SENTINEL: &str = "_none_";

/// Restriction on one facet (region or service).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FacetFilter {
    #[default]
    Any,
    OneOf(BTreeSet<String>),
    NoMatches,
}

impl FacetFilter {
    /// Parse a comma separated query parameter. Absent or empty means no
    /// restriction; a list naming [`NONE_SENTINEL`] matches nothing.
    pub fn parse(param: Option<&str>) -> Self {
        let values: BTreeSet<String> = param
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        if values.contains(NONE_SENTINEL) {
            FacetFilter::NoMatches
        } else if values.is_empty() {
            FacetFilter::Any
        } else {
            FacetFilter::OneOf(values)
        }
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FacetFilter::OneOf(values.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            FacetFilter::Any => true,
            FacetFilter::OneOf(values) => values.contains(value),
            FacetFilter::NoMatches => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphQuery {
    pub regions: FacetFilter,
    pub services: FacetFilter,
}

impl GraphQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from_params(regions: Option<&str>, services: Option<&str>) -> Self {
        Self {
            regions: FacetFilter::parse(regions),
            services: FacetFilter::parse(services),
        }
    }

    pub fn is_unfiltered(&self) -> bool {
        self.regions == FacetFilter::Any && self.services == FacetFilter::Any
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphIndex {
    by_region: BTreeMap<String, RoaringBitmap>,
    by_service: BTreeMap<String, RoaringBitmap>,
    /// Node id -> position of the node.
    positions: AHashMap<String, u32>,
    /// Node id -> positions of the edges touching it.
    adjacency: AHashMap<String, Vec<u32>>,
    node_count: u32,
}

impl GraphIndex {
    pub fn build(graph: &Graph) -> Self {
        let mut index = GraphIndex::default();
        for (pos, node) in (0u32..).zip(&graph.nodes) {
            index
                .by_region
                .entry(node.region.clone())
                .or_default()
                .insert(pos);
            index
                .by_service
                .entry(node.service.clone())
                .or_default()
                .insert(pos);
            index.positions.entry(node.id.clone()).or_insert(pos);
            index.node_count = pos + 1;
        }
        for (pos, edge) in (0u32..).zip(&graph.edges) {
            index.adjacency.entry(edge.source.clone()).or_default().push(pos);
            if edge.target != edge.source {
                index.adjacency.entry(edge.target.clone()).or_default().push(pos);
            }
        }
        index
    }

    pub fn node_count(&self) -> usize {
        self.node_count as usize
    }

    pub fn position(&self, id: &str) -> Option<u32> {
        self.positions.get(id).copied()
    }

    /// Positions of the edges touching `id`, in emission order.
    pub fn edges_of(&self, id: &str) -> &[u32] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Node positions matching `query`.
    pub fn matching_nodes(&self, query: &GraphQuery) -> RoaringBitmap {
        let regions = Self::facet(&self.by_region, &query.regions);
        let services = Self::facet(&self.by_service, &query.services);
        match (regions, services) {
            (Some(r), Some(s)) => r & s,
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => {
                let mut all = RoaringBitmap::new();
                all.insert_range(0..self.node_count);
                all
            }
        }
    }

    /// `None` means the facet does not restrict anything.
    fn facet(groups: &BTreeMap<String, RoaringBitmap>, filter: &FacetFilter) -> Option<RoaringBitmap> {
        match filter {
            FacetFilter::Any => None,
            FacetFilter::NoMatches => Some(RoaringBitmap::new()),
            FacetFilter::OneOf(values) => {
                let mut out = RoaringBitmap::new();
                for value in values {
                    if let Some(bitmap) = groups.get(value) {
                        out |= bitmap;
                    }
                }
                Some(out)
            }
        }
    }

    /// The subgraph selected by `query`.
    pub fn query(&self, graph: &Graph, query: &GraphQuery) -> Graph {
        if query.regions == FacetFilter::NoMatches || query.services == FacetFilter::NoMatches {
            return Graph::default();
        }
        let node_positions = self.matching_nodes(query);
        let nodes: Vec<Node> = node_positions
            .iter()
            .filter_map(|pos| graph.nodes.get(pos as usize).cloned())
            .collect();

        let selected = |id: &str| {
            self.position(id)
                .map(|pos| node_positions.contains(pos))
                .unwrap_or(false)
        };
        let mut edge_positions = RoaringBitmap::new();
        for node in &nodes {
            for &pos in self.edges_of(&node.id) {
                if edge_positions.contains(pos) {
                    continue;
                }
                if let Some(edge) = graph.edges.get(pos as usize) {
                    if selected(&edge.source) && selected(&edge.target) {
                        edge_positions.insert(pos);
                    }
                }
            }
        }
        let edges: Vec<Edge> = edge_positions
            .iter()
            .filter_map(|pos| graph.edges.get(pos as usize).cloned())
            .collect();

        Graph { nodes, edges }
    }

    /// A node and every edge touching it.
    pub fn node_detail(&self, graph: &Graph, id: &str) -> Option<(Node, Vec<Edge>)> {
        let node = graph.nodes.get(self.position(id)? as usize)?.clone();
        let edges = self
            .edges_of(id)
            .iter()
            .filter_map(|&pos| graph.edges.get(pos as usize).cloned())
            .collect();
        Some((node, edges))
    }
}
