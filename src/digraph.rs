//! Directed graph over opaque node identifiers.
//!
//! Stores forward and back adjacency in insertion-ordered maps so that
//! [`DirectedGraph::serialize`] is deterministic: when several nodes are
//! removable at once, the one registered first wins.

use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};

/// Topological ordering failed because the graph contains a cycle.
///
/// `unresolved` holds every node that still had incoming edges once no more
/// nodes could be removed, in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError<N> {
    pub unresolved: Vec<N>,
}

impl<N: fmt::Debug> fmt::Display for CycleError<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph contains a cycle; unresolved nodes: {:?}", self.unresolved)
    }
}

impl<N: fmt::Debug> std::error::Error for CycleError<N> {}

/// A directed graph with forward and back edge indices.
#[derive(Debug, Clone)]
pub struct DirectedGraph<N> {
    forward: IndexMap<N, IndexSet<N>>,
    back: IndexMap<N, IndexSet<N>>,
}

impl<N> Default for DirectedGraph<N> {
    fn default() -> Self {
        Self {
            forward: IndexMap::new(),
            back: IndexMap::new(),
        }
    }
}

impl<N: Clone + Eq + Hash> DirectedGraph<N> {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node. Returns `false` if it was already present.
    pub fn add_node(&mut self, node: N) -> bool {
        if self.forward.contains_key(&node) {
            return false;
        }
        self.forward.insert(node.clone(), IndexSet::new());
        self.back.insert(node, IndexSet::new());
        true
    }

    /// Adds the edge `from -> to`, registering either endpoint if needed.
    ///
    /// Repeated edges are stored once.
    pub fn add_edge(&mut self, from: N, to: N) {
        self.add_node(from.clone());
        self.add_node(to.clone());
        if let Some(out) = self.forward.get_mut(&from) {
            out.insert(to.clone());
        }
        if let Some(incoming) = self.back.get_mut(&to) {
            incoming.insert(from);
        }
    }

    pub fn contains(&self, node: &N) -> bool {
        self.forward.contains_key(node)
    }

    pub fn node_count(&self) -> usize {
        self.forward.len()
    }

    pub fn edge_count(&self) -> usize {
        self.forward.values().map(IndexSet::len).sum()
    }

    /// All nodes in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &N> {
        self.forward.keys()
    }

    /// Direct successors of `node` (targets of its outgoing edges).
    pub fn successors<'a>(&'a self, node: &N) -> impl Iterator<Item = &'a N> + 'a {
        self.forward.get(node).into_iter().flatten()
    }

    /// Direct predecessors of `node` (sources of its incoming edges).
    pub fn predecessors<'a>(&'a self, node: &N) -> impl Iterator<Item = &'a N> + 'a {
        self.back.get(node).into_iter().flatten()
    }

    /// Linearizes the graph with Kahn's algorithm.
    ///
    /// Every node appears exactly once, and for every edge `a -> b`, `a`
    /// comes before `b`. The graph itself is left untouched; removal works on
    /// a copy of the in-degree table.
    pub fn serialize(&self) -> Result<Vec<N>, CycleError<N>> {
        let mut in_degree: IndexMap<&N, usize> = self
            .back
            .iter()
            .map(|(node, incoming)| (node, incoming.len()))
            .collect();

        let mut frontier: VecDeque<&N> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| *node)
            .collect();

        let mut order = Vec::with_capacity(self.forward.len());
        while let Some(node) = frontier.pop_front() {
            order.push(node.clone());
            for succ in self.successors(node) {
                if let Some(degree) = in_degree.get_mut(succ) {
                    *degree -= 1;
                    if *degree == 0 {
                        frontier.push_back(succ);
                    }
                }
            }
        }

        if order.len() == self.forward.len() {
            Ok(order)
        } else {
            let unresolved = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(node, _)| node.clone())
                .collect();
            Err(CycleError { unresolved })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[&str], node: &str) -> usize {
        order.iter().position(|n| *n == node).unwrap()
    }

    #[test]
    fn empty_graph_serializes_to_nothing() {
        let graph: DirectedGraph<&str> = DirectedGraph::new();
        assert_eq!(graph.serialize().unwrap(), Vec::<&str>::new());
    }

    #[test]
    fn chain_is_ordered() {
        let mut graph = DirectedGraph::new();
        graph.add_edge("c", "d");
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");

        let order = graph.serialize().unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "a") < position(&order, "b"));
        assert!(position(&order, "b") < position(&order, "c"));
        assert!(position(&order, "c") < position(&order, "d"));
    }

    #[test]
    fn every_edge_respected_in_diamond() {
        let mut graph = DirectedGraph::new();
        let edges = [("tex", "terrain"), ("tex", "objects"), ("terrain", "mix"), ("objects", "mix"), ("mix", "blur")];
        for (a, b) in edges {
            graph.add_edge(a, b);
        }
        graph.add_node("overlay");

        let order = graph.serialize().unwrap();
        assert_eq!(order.len(), 6);
        for (a, b) in edges {
            assert!(position(&order, a) < position(&order, b), "{a} before {b}");
        }
    }

    #[test]
    fn ties_break_in_insertion_order() {
        let mut graph = DirectedGraph::new();
        graph.add_node("x");
        graph.add_node("y");
        graph.add_node("z");
        graph.add_edge("x", "z");

        assert_eq!(graph.serialize().unwrap(), vec!["x", "y", "z"]);
    }

    #[test]
    fn cycle_is_reported() {
        let mut graph = DirectedGraph::new();
        graph.add_edge("root", "a");
        graph.add_edge("a", "b");
        graph.add_edge("b", "a");

        let err = graph.serialize().unwrap_err();
        assert_eq!(err.unresolved, vec!["a", "b"]);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut graph = DirectedGraph::new();
        graph.add_edge("a", "a");
        assert!(graph.serialize().is_err());
    }

    #[test]
    fn serialize_does_not_mutate() {
        let mut graph = DirectedGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        let first = graph.serialize().unwrap();
        let second = graph.serialize().unwrap();
        assert_eq!(first, second);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.predecessors(&3).copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn duplicate_edges_stored_once() {
        let mut graph = DirectedGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("a", "b");
        assert_eq!(graph.edge_count(), 1);
        assert!(!graph.add_node("a"));
    }
}
