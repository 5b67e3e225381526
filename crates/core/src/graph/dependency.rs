//! Ticket dependency graph.
//!
//! Edges point from a ticket to the ticket it depends on. Export order is the
//! reverse direction: every dependency target is exported before its source.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use thiserror::Error;

use crate::ticket::{DependencyEdge, TicketNode};

/// Why an edge was refused by [`DependencyGraph::add_edge`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EdgeRejection {
    /// A ticket cannot depend on itself.
    #[error("self-dependency: ticket {ticket_id} cannot depend on itself")]
    SelfDependency { ticket_id: String },

    /// The edge would close a cycle. `cycle` starts and ends with `from`.
    #[error("adding {from} -> {to} would create a cycle: {}", cycle.join(" -> "))]
    WouldCreateCycle {
        from: String,
        to: String,
        cycle: Vec<String>,
    },
}

/// Result of a successful [`DependencyGraph::add_edge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeInsertion {
    Added,
    AlreadyPresent,
}

/// A cycle found while ordering. `ticket_ids` lists the cycle in dependency
/// order and repeats the first id at the end.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("dependency cycle detected: {}", ticket_ids.join(" -> "))]
pub struct CycleError {
    pub ticket_ids: Vec<String>,
}

/// In-memory adjacency model over ticket ids.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// ticket id -> ids it depends on
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load persisted edges as-is.
    ///
    /// No cycle checks happen here: data written before insertion-time checks
    /// existed must still surface as a [`CycleError`] at ordering time.
    pub fn from_edges<'a>(edges: impl IntoIterator<Item = &'a DependencyEdge>) -> Self {
        let mut graph = Self::new();
        for edge in edges {
            graph
                .dependencies
                .entry(edge.from.clone())
                .or_default()
                .insert(edge.to.clone());
        }
        graph
    }

    /// Add `from -> to` unless it is a self-edge or would create a cycle.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<EdgeInsertion, EdgeRejection> {
        if from == to {
            return Err(EdgeRejection::SelfDependency {
                ticket_id: from.to_string(),
            });
        }

        if self.contains_edge(from, to) {
            return Ok(EdgeInsertion::AlreadyPresent);
        }

        if let Some(path) = self.find_path(to, from) {
            let mut cycle = Vec::with_capacity(path.len() + 1);
            cycle.push(from.to_string());
            cycle.extend(path);
            return Err(EdgeRejection::WouldCreateCycle {
                from: from.to_string(),
                to: to.to_string(),
                cycle,
            });
        }

        self.dependencies
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        Ok(EdgeInsertion::Added)
    }

    /// Remove `from -> to`. Returns whether the edge existed.
    pub fn remove_edge(&mut self, from: &str, to: &str) -> bool {
        let Some(targets) = self.dependencies.get_mut(from) else {
            return false;
        };
        let removed = targets.remove(to);
        if targets.is_empty() {
            self.dependencies.remove(from);
        }
        removed
    }

    /// Whether `from -> to` is present.
    pub fn contains_edge(&self, from: &str, to: &str) -> bool {
        self.dependencies
            .get(from)
            .is_some_and(|targets| targets.contains(to))
    }

    /// Ids `id` depends on, in sorted order.
    pub fn dependencies_of(&self, id: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(id)
            .into_iter()
            .flat_map(|targets| targets.iter().map(String::as_str))
    }

    /// All edges, sorted.
    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.dependencies
            .iter()
            .flat_map(|(from, targets)| targets.iter().map(move |to| DependencyEdge::new(from, to)))
            .collect()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(BTreeSet::len).sum()
    }

    /// Depth-first search for a dependency path `start -> ... -> target`.
    fn find_path(&self, start: &str, target: &str) -> Option<Vec<String>> {
        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut stack: Vec<&str> = vec![start];

        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            if node == target {
                let mut path = vec![node.to_string()];
                let mut current = node;
                while let Some(&prev) = parent.get(current) {
                    path.push(prev.to_string());
                    current = prev;
                }
                path.reverse();
                return Some(path);
            }
            for next in self.dependencies_of(node) {
                if !visited.contains(next) {
                    parent.entry(next).or_insert(node);
                    stack.push(next);
                }
            }
        }

        None
    }

    /// Order `nodes` so that every dependency precedes its dependents.
    ///
    /// Among tickets whose dependencies are all satisfied, the next one is
    /// picked by entity-group priority, then user order, then id. The result
    /// is a pure function of the edges and the node attributes. Edges that
    /// leave the given node set are ignored. Duplicate ids keep the first
    /// occurrence.
    pub fn topological_order(&self, nodes: Vec<TicketNode>) -> Result<Vec<TicketNode>, CycleError> {
        let mut slots: Vec<Option<TicketNode>> = Vec::with_capacity(nodes.len());
        let mut index_of: HashMap<String, usize> = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if index_of.contains_key(&node.id) {
                continue;
            }
            index_of.insert(node.id.clone(), slots.len());
            slots.push(Some(node));
        }

        let count = slots.len();
        let mut pending_deps = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (id, &idx) in &index_of {
            for dep in self.dependencies_of(id) {
                if let Some(&dep_idx) = index_of.get(dep) {
                    pending_deps[idx] += 1;
                    dependents[dep_idx].push(idx);
                }
            }
        }

        let sort_key = |idx: usize, slots: &[Option<TicketNode>]| {
            let node = slots[idx].as_ref().map(|n| {
                (n.entity_group.priority(), n.user_order, n.id.clone())
            });
            let (group, order, id) = node.unwrap_or((u8::MAX, i64::MAX, String::new()));
            (group, order, id, idx)
        };

        let mut ready: BTreeSet<(u8, i64, String, usize)> = (0..count)
            .filter(|&idx| pending_deps[idx] == 0)
            .map(|idx| sort_key(idx, &slots))
            .collect();

        let mut order: Vec<usize> = Vec::with_capacity(count);
        while let Some((_, _, _, idx)) = ready.pop_first() {
            order.push(idx);
            for &dependent in &dependents[idx] {
                pending_deps[dependent] -= 1;
                if pending_deps[dependent] == 0 {
                    ready.insert(sort_key(dependent, &slots));
                }
            }
        }

        if order.len() < count {
            return Err(self.extract_cycle(&slots, &index_of, &pending_deps));
        }

        Ok(order
            .into_iter()
            .filter_map(|idx| slots[idx].take())
            .collect())
    }

    /// Walk unresolved dependencies until a ticket repeats.
    ///
    /// Every ticket left unresolved by Kahn's pass has at least one
    /// unresolved dependency, so the walk always closes a cycle.
    fn extract_cycle(
        &self,
        slots: &[Option<TicketNode>],
        index_of: &HashMap<String, usize>,
        pending_deps: &[usize],
    ) -> CycleError {
        let unresolved = |id: &str| {
            index_of
                .get(id)
                .is_some_and(|&idx| pending_deps[idx] > 0)
        };

        let start = slots
            .iter()
            .flatten()
            .map(|n| n.id.as_str())
            .filter(|id| unresolved(id))
            .min();

        let Some(start) = start else {
            return CycleError {
                ticket_ids: Vec::new(),
            };
        };

        let mut walk: Vec<&str> = vec![start];
        let mut position: HashMap<&str, usize> = HashMap::from([(start, 0)]);
        let mut current = start;
        loop {
            let next = self.dependencies_of(current).find(|dep| unresolved(dep));
            let Some(next) = next else {
                return CycleError {
                    ticket_ids: walk.iter().map(|s| s.to_string()).collect(),
                };
            };
            if let Some(&pos) = position.get(next) {
                let mut ticket_ids: Vec<String> =
                    walk[pos..].iter().map(|s| s.to_string()).collect();
                ticket_ids.push(next.to_string());
                return CycleError { ticket_ids };
            }
            position.insert(next, walk.len());
            walk.push(next);
            current = next;
        }
    }
}
