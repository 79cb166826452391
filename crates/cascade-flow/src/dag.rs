//! Dependency ordering for module graphs.
//!
//! A thin wrapper over a petgraph digraph keyed by module name. Node
//! indices are handed out in insertion order, and that order doubles as
//! the tie-break during sorting: whenever several modules are ready at
//! once, the one declared first in the manifest comes first, so the
//! same manifest always yields the same execution order.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;
use std::hash::Hash;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::error::{Error, Result};

/// A dependency graph over module names.
#[derive(Debug, Clone)]
pub(crate) struct Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    graph: DiGraph<T, ()>,
    nodes: HashMap<T, NodeIndex>,
}

impl<T> Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    pub(crate) fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            nodes: HashMap::new(),
        }
    }

    /// Adds a node; re-adding an existing value returns its index.
    pub(crate) fn add_node(&mut self, value: T) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(&value) {
            return idx;
        }
        let idx = self.graph.add_node(value.clone());
        self.nodes.insert(value, idx);
        idx
    }

    /// Adds a dependency edge: `from` must run before `to`.
    pub(crate) fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) {
        self.graph.add_edge(from, to, ());
    }

    /// Returns nodes in dependency order.
    ///
    /// Peels off ready nodes (no unprocessed predecessors) smallest
    /// index first; since indices follow insertion order, declaration
    /// order breaks every tie.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleDetected`] when the graph has a cycle,
    /// naming one node on it.
    pub(crate) fn toposort(&self) -> Result<Vec<T>> {
        let mut blockers: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                let incoming = self
                    .graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count();
                (idx, incoming)
            })
            .collect();

        let mut ready: BTreeSet<NodeIndex> = blockers
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(&idx, _)| idx)
            .collect();

        let mut sorted = Vec::with_capacity(blockers.len());
        while let Some(idx) = ready.pop_first() {
            blockers.remove(&idx);
            if let Some(value) = self.graph.node_weight(idx) {
                sorted.push(value.clone());
            }
            for successor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(count) = blockers.get_mut(&successor) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.insert(successor);
                    }
                }
            }
        }

        // Whatever never became ready sits on a cycle; name the
        // earliest-declared such node.
        if let Some(&stuck) = blockers.keys().min() {
            let node = self
                .graph
                .node_weight(stuck)
                .map_or_else(|| "unknown".to_string(), ToString::to_string);
            return Err(Error::CycleDetected { cycle: vec![node] });
        }

        Ok(sorted)
    }
}
