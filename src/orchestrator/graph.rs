use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashSet};

use crate::error::OrchestratorError;
use crate::orchestrator::spec::{ServiceKind, ServiceSpec};

/// An ordered collection of service specs with dependencies resolved.
///
/// Edges point from dependency to dependent (if B depends on A, the edge is
/// A -> B), so a topological sort yields the startup order: dependencies
/// strictly before their dependents. Construction fails eagerly on unknown
/// dependencies and cycles -- before anything is started.
#[derive(Debug)]
pub struct ServiceGraph {
    ordered: Vec<ServiceSpec>,
}

impl ServiceGraph {
    pub fn new(specs: Vec<ServiceSpec>) -> Result<Self, OrchestratorError> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut node_map: BTreeMap<String, NodeIndex> = BTreeMap::new();

        for (idx, spec) in specs.iter().enumerate() {
            if node_map.contains_key(&spec.id) {
                return Err(OrchestratorError::Configuration {
                    reason: format!("service '{}' is declared more than once", spec.id),
                });
            }
            let node = graph.add_node(idx);
            node_map.insert(spec.id.clone(), node);
        }

        for spec in &specs {
            let dependent = node_map[&spec.id];
            for dep in &spec.depends_on {
                let dep_node = node_map.get(dep).ok_or_else(|| {
                    OrchestratorError::Configuration {
                        reason: format!(
                            "service '{}' depends on '{}', which is not defined",
                            spec.id, dep
                        ),
                    }
                })?;
                graph.add_edge(*dep_node, dependent, ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            let offending = graph[cycle.node_id()];
            OrchestratorError::Configuration {
                reason: format!(
                    "dependency cycle detected involving '{}'",
                    specs[offending].id
                ),
            }
        })?;

        let mut by_position: Vec<Option<ServiceSpec>> = specs.into_iter().map(Some).collect();
        let ordered = order
            .into_iter()
            .map(|node| by_position[graph[node]].take().expect("each node visited once"))
            .collect();

        Ok(Self { ordered })
    }

    /// Specs in startup order.
    pub fn start_order(&self) -> &[ServiceSpec] {
        &self.ordered
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ordered.iter().any(|s| s.id == id)
    }

    pub fn has_containers(&self) -> bool {
        self.ordered
            .iter()
            .any(|s| s.kind() == ServiceKind::Container)
    }

    /// Restrict the graph to the named services plus their transitive
    /// dependencies, preserving startup order. Unknown names are an error.
    pub fn filtered(self, names: &[String]) -> Result<Self, OrchestratorError> {
        if names.is_empty() {
            return Ok(self);
        }

        for name in names {
            if !self.contains(name) {
                return Err(OrchestratorError::Configuration {
                    reason: format!(
                        "unknown service '{}' (available: {})",
                        name,
                        self.ordered
                            .iter()
                            .map(|s| s.id.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                });
            }
        }

        let mut needed: HashSet<String> = names.iter().cloned().collect();
        let mut changed = true;
        while changed {
            changed = false;
            let snapshot: Vec<String> = needed.iter().cloned().collect();
            for name in &snapshot {
                if let Some(spec) = self.ordered.iter().find(|s| &s.id == name) {
                    for dep in &spec.depends_on {
                        if needed.insert(dep.clone()) {
                            changed = true;
                        }
                    }
                }
            }
        }

        Ok(Self {
            ordered: self
                .ordered
                .into_iter()
                .filter(|s| needed.contains(&s.id))
                .collect(),
        })
    }
}
