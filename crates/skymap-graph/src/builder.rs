//! Single-pass graph construction.
//!
//! Pass order:
//! 1. global kinds (identity, storage, DNS, organization, CDN)
//! 2. regional kinds, region by region in sorted region order
//! 3. deferred edges whose target must exist (bucket logging, CDN origins)
//! 4. derived security-flow edges from recorded ingress peers
//! 5. one error marker per collected access error
//!
//! Node ids are gated by a seen-set: the first record to produce an id wins
//! and later ones are dropped silently. Edges are never deduplicated and may
//! reference ids that were never emitted.

use std::collections::{BTreeMap, HashMap};

use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use serde_json::{Map, Value};
use skymap_inventory::{AccessError, InventoryDocument, Record, ServiceMap};

use crate::ident::{composite_id, error_label, error_node_id, node_id, ERROR_KIND, GLOBAL_REGION};
use crate::kinds::{Child, Direction, KindSpec, GLOBAL_KINDS, REGIONAL_KINDS};
use crate::{Edge, Graph, Node};

/// Cross-references gathered while visiting records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrossRefs {
    /// security group -> owning network
    pub sg_vpc: BTreeMap<String, Option<String>>,
    /// subnet -> owning network
    pub subnet_vpc: BTreeMap<String, Option<String>>,
    /// instance -> attached security groups
    pub instance_sgs: BTreeMap<String, Vec<String>>,
    /// security group -> peer groups allowed in as traffic sources, in the
    /// order groups were first seen
    pub sg_inbound: Vec<(String, Vec<String>)>,
    #[serde(skip)]
    inbound_pos: HashMap<String, usize>,
}

impl CrossRefs {
    pub fn add_inbound_peer(&mut self, group: &str, peer: &str) {
        let pos = match self.inbound_pos.get(group) {
            Some(&pos) => pos,
            None => {
                self.sg_inbound.push((group.to_string(), Vec::new()));
                let pos = self.sg_inbound.len() - 1;
                self.inbound_pos.insert(group.to_string(), pos);
                pos
            }
        };
        self.sg_inbound[pos].1.push(peer.to_string());
    }

    pub fn inbound_peers(&self, group: &str) -> &[String] {
        self.inbound_pos
            .get(group)
            .map(|&pos| self.sg_inbound[pos].1.as_slice())
            .unwrap_or(&[])
    }
}

/// One emitted record, as seen by a kind's hook.
#[derive(Debug, Clone)]
pub struct Visit<'a> {
    pub region: &'a str,
    pub node_id: String,
    pub local_id: String,
    pub record: Record<'a>,
}

struct PendingEdge {
    edge: Edge,
}

/// Builds one graph from one document. Not reusable: every build starts from
/// fresh index state.
pub struct GraphBuilder<'a> {
    doc: &'a InventoryDocument,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    seen: AHashSet<String>,
    deferred: Vec<PendingEdge>,
    error_seq: u64,
    skipped: usize,
    pub(crate) refs: CrossRefs,
    /// role ARN -> role node ids
    pub(crate) roles_by_arn: AHashMap<&'a str, Vec<String>>,
    /// (region, load balancer ARN) -> load balancer names
    pub(crate) lb_names: AHashMap<(&'a str, &'a str), Vec<&'a str>>,
    /// (region, target group ARN) -> target group node id
    pub(crate) tg_ids: AHashMap<(&'a str, &'a str), String>,
}

/// Build the graph for `doc`.
pub fn build_graph(doc: &InventoryDocument) -> Graph {
    GraphBuilder::new(doc).build().0
}

impl<'a> GraphBuilder<'a> {
    pub fn new(doc: &'a InventoryDocument) -> Self {
        Self {
            doc,
            nodes: Vec::new(),
            edges: Vec::new(),
            seen: AHashSet::new(),
            deferred: Vec::new(),
            error_seq: 0,
            skipped: 0,
            refs: CrossRefs::default(),
            roles_by_arn: AHashMap::new(),
            lb_names: AHashMap::new(),
            tg_ids: AHashMap::new(),
        }
    }

    pub fn doc(&self) -> &'a InventoryDocument {
        self.doc
    }

    /// Run every pass and return the graph with the gathered cross-references.
    pub fn build(mut self) -> (Graph, CrossRefs) {
        let doc = self.doc;

        self.visit_scope(GLOBAL_KINDS, GLOBAL_REGION, &doc.global_services);
        for (region, services) in &doc.regional_services {
            self.visit_scope(REGIONAL_KINDS, region, services);
        }

        self.resolve_deferred();
        self.emit_security_flows();

        self.emit_errors(GLOBAL_REGION, &doc.errors.global);
        for (region, errors) in &doc.errors.regional {
            self.emit_errors(region, errors);
        }

        tracing::debug!(
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            skipped = self.skipped,
            "built graph"
        );

        let graph = Graph {
            nodes: self.nodes,
            edges: self.edges,
        };
        (graph, self.refs)
    }

    pub fn add_edge(&mut self, source: &str, target: &str, label: &str, kind: &str) {
        self.edges.push(Edge {
            source: source.to_string(),
            target: target.to_string(),
            label: label.to_string(),
            kind: kind.to_string(),
        });
    }

    /// Queue an edge that is kept only if `target` is emitted by the end of
    /// the resource passes.
    pub fn defer_edge(&mut self, source: &str, target: &str, label: &str, kind: &str) {
        self.deferred.push(PendingEdge {
            edge: Edge {
                source: source.to_string(),
                target: target.to_string(),
                label: label.to_string(),
                kind: kind.to_string(),
            },
        });
    }

    fn add_node(&mut self, node: Node) -> bool {
        if self.seen.contains(&node.id) {
            return false;
        }
        self.seen.insert(node.id.clone());
        self.nodes.push(node);
        true
    }

    fn visit_scope(&mut self, kinds: &'static [KindSpec], region: &'a str, services: &'a ServiceMap) {
        for spec in kinds {
            let Some(records) = services.get(spec.service) else {
                continue;
            };
            for record in records_in(records.get(spec.field)) {
                match spec.nested {
                    Some(inner) => {
                        for nested in record.records_at(&[inner]) {
                            self.visit(spec, region, nested, None);
                        }
                    }
                    None => {
                        self.visit(spec, region, record, None);
                    }
                }
            }
        }
    }

    /// Emit one record's node, its direct edges, its children and its hook.
    fn visit(
        &mut self,
        spec: &'static KindSpec,
        region: &'a str,
        record: Record<'a>,
        parent: Option<(&Child, &str, &str)>,
    ) {
        let Some(own_id) = spec.id.local_id(record) else {
            self.skipped += 1;
            tracing::debug!(kind = spec.kind, region, "skipping record without an identifier");
            return;
        };
        let local_id = match parent {
            Some((child, _, parent_local)) => match child.join {
                Some(sep) => composite_id(parent_local, sep, &own_id),
                None => own_id,
            },
            None => own_id,
        };
        let id = node_id(spec.prefix, &local_id);

        let metadata: Map<String, Value> = spec
            .metadata
            .iter()
            .map(|(key, meta)| (key.to_string(), meta.eval(record)))
            .collect();
        self.add_node(Node {
            id: id.clone(),
            label: spec.label.render(record, &local_id),
            kind: spec.kind.to_string(),
            region: region.to_string(),
            service: spec.service.to_string(),
            metadata,
        });

        if let Some((child, parent_id, _)) = parent {
            self.add_edge(parent_id, &id, child.label, child.edge_type);
        }

        for link in spec.links {
            if let Some(when) = link.when {
                if record.text_at(when).is_none() {
                    continue;
                }
            }
            for peer in link.peer.ids(record) {
                let peer_id = node_id(link.prefix, &peer);
                match link.direction {
                    Direction::Outgoing => self.add_edge(&id, &peer_id, link.label, link.edge_type),
                    Direction::Incoming => self.add_edge(&peer_id, &id, link.label, link.edge_type),
                }
            }
        }

        for child in spec.children {
            for nested in records_in(record.get(child.spec.field)) {
                self.visit(child.spec, region, nested, Some((child, &id, &local_id)));
            }
        }

        if let Some(hook) = spec.hook {
            let visit = Visit {
                region,
                node_id: id,
                local_id,
                record,
            };
            hook(self, &visit);
        }
    }

    fn resolve_deferred(&mut self) {
        for pending in std::mem::take(&mut self.deferred) {
            if self.seen.contains(&pending.edge.target) {
                self.edges.push(pending.edge);
            } else {
                tracing::debug!(
                    source = %pending.edge.source,
                    target = %pending.edge.target,
                    "dropping edge to a resource that was not collected"
                );
            }
        }
    }

    fn emit_security_flows(&mut self) {
        let inbound = std::mem::take(&mut self.refs.sg_inbound);
        for (group, peers) in &inbound {
            let target = node_id("sg", group);
            for peer in peers {
                self.add_edge(&node_id("sg", peer), &target, "allows-traffic-to", "security-flow");
            }
        }
        self.refs.sg_inbound = inbound;
    }

    fn emit_errors(&mut self, scope: &str, errors: &[AccessError]) {
        for error in errors {
            self.error_seq += 1;
            let mut metadata = Map::new();
            metadata.insert("resource".to_string(), Value::from(error.resource.clone()));
            metadata.insert("code".to_string(), opt_string(&error.code));
            metadata.insert("message".to_string(), opt_string(&error.message));
            self.add_node(Node {
                id: error_node_id(scope, self.error_seq),
                label: error_label(&error.resource),
                kind: ERROR_KIND.to_string(),
                region: scope.to_string(),
                service: ERROR_KIND.to_string(),
                metadata,
            });
        }
    }
}

fn opt_string(value: &Option<String>) -> Value {
    value.clone().map(Value::from).unwrap_or(Value::Null)
}

/// Records stored under a field: every object of a list, or a single
/// described resource.
fn records_in(value: Option<&Value>) -> Vec<Record<'_>> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(Record::from_value).collect(),
        Some(Value::Object(fields)) => vec![Record::new(fields)],
        _ => Vec::new(),
    }
}
