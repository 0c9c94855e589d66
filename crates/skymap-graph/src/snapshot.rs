//! Versioned graph snapshots.
//!
//! A snapshot bundles everything readers need (graph, indexes, filter options,
//! statistics) and is never mutated after construction. [`SnapshotCell`]
//! builds a replacement off to the side and swaps the shared pointer under a
//! short write lock, so a reader holds either the old snapshot or the new one
//! in full.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use skymap_inventory::{merge, InventoryDocument, InventoryStats};

use crate::index::{GraphIndex, GraphQuery};
use crate::{build_graph, Edge, Graph, GraphFilters, Node};

#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    pub version: u64,
    pub built_at: DateTime<Utc>,
    pub source_count: usize,
    pub graph: Graph,
    pub index: GraphIndex,
    pub filters: GraphFilters,
    pub stats: InventoryStats,
}

impl GraphSnapshot {
    pub fn empty() -> Self {
        Self {
            version: 0,
            built_at: Utc::now(),
            source_count: 0,
            graph: Graph::default(),
            index: GraphIndex::default(),
            filters: GraphFilters::default(),
            stats: InventoryStats::default(),
        }
    }

    /// Merge `sources` and derive every read-side structure from the result.
    pub fn build(version: u64, sources: &[InventoryDocument]) -> Self {
        if sources.is_empty() {
            return Self {
                version,
                ..Self::empty()
            };
        }
        let combined = merge(sources);
        Self::from_document(version, sources.len(), &combined)
    }

    pub fn from_document(version: u64, source_count: usize, doc: &InventoryDocument) -> Self {
        let graph = build_graph(doc);
        let index = GraphIndex::build(&graph);
        let filters = graph.filters();
        Self {
            version,
            built_at: Utc::now(),
            source_count,
            index,
            filters,
            stats: InventoryStats::compute(doc),
            graph,
        }
    }

    pub fn query(&self, query: &GraphQuery) -> Graph {
        self.index.query(&self.graph, query)
    }

    pub fn node_detail(&self, id: &str) -> Option<(Node, Vec<Edge>)> {
        self.index.node_detail(&self.graph, id)
    }
}

/// Shared holder of the current snapshot.
pub struct SnapshotCell {
    current: RwLock<Arc<GraphSnapshot>>,
    next_version: AtomicU64,
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(GraphSnapshot::empty())),
            next_version: AtomicU64::new(1),
        }
    }

    pub fn load(&self) -> Arc<GraphSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Build a snapshot from `sources` and make it current.
    pub fn rebuild(&self, sources: &[InventoryDocument]) -> Arc<GraphSnapshot> {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let snapshot = GraphSnapshot::build(version, sources);
        tracing::info!(
            version,
            sources = sources.len(),
            nodes = snapshot.graph.nodes.len(),
            edges = snapshot.graph.edges.len(),
            "rebuilt graph snapshot"
        );
        self.store(snapshot)
    }

    /// Install `snapshot` unless a newer one is already current.
    pub fn store(&self, snapshot: GraphSnapshot) -> Arc<GraphSnapshot> {
        let snapshot = Arc::new(snapshot);
        let mut current = self.current.write();
        if snapshot.version >= current.version {
            *current = Arc::clone(&snapshot);
            snapshot
        } else {
            tracing::debug!(
                stale = snapshot.version,
                current = current.version,
                "discarding stale graph snapshot"
            );
            Arc::clone(&current)
        }
    }
}
