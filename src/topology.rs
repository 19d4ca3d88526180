//! Graph queries over circuit connectivity.
//!
//! The solver needs three things from the topology: connected components (one
//! ground reference each), which elements sit on a loop (bridges can never
//! carry current), and node voltages for the parts that are not solved.

use std::collections::HashMap;

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;

use crate::circuit::NodeId;

/// Undirected multigraph keyed by [`NodeId`]. Edge weights are dense edge ids
/// in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    graph: UnGraph<NodeId, usize>,
    index: HashMap<NodeId, NodeIndex>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges(edges: impl IntoIterator<Item = (NodeId, NodeId)>) -> Self {
        let mut graph = Graph::new();
        for (a, b) in edges {
            graph.add_edge(a, b);
        }
        graph
    }

    /// Register a node and return its dense index
    pub fn add_node(&mut self, id: NodeId) -> usize {
        if let Some(&idx) = self.index.get(&id) {
            return idx.index();
        }
        let idx = self.graph.add_node(id);
        self.index.insert(id, idx);
        idx.index()
    }

    pub fn add_edge(&mut self, a: NodeId, b: NodeId) -> usize {
        self.add_node(a);
        self.add_node(b);
        let edge = self.graph.edge_count();
        self.graph.add_edge(self.index[&a], self.index[&b], edge);
        edge
    }

    /// Nodes in order of first appearance
    pub fn nodes(&self) -> Vec<NodeId> {
        self.graph.node_weights().copied().collect()
    }

    pub fn node_index(&self, id: NodeId) -> Option<usize> {
        self.index.get(&id).map(|idx| idx.index())
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Connected components; the first node of each is the earliest-added one.
    pub fn components(&self) -> Vec<Vec<NodeId>> {
        let labels = self.label_components(|_| true);
        let mut slots: HashMap<usize, usize> = HashMap::new();
        let mut components: Vec<Vec<NodeId>> = Vec::new();
        for node in self.graph.node_indices() {
            let next = components.len();
            let slot = *slots.entry(labels[node.index()]).or_insert(next);
            if slot == next {
                components.push(Vec::new());
            }
            components[slot].push(self.graph[node]);
        }
        components
    }

    /// Flags every edge whose removal disconnects its endpoints.
    ///
    /// Lowlink walk that skips the edge id it arrived by, not the parent node,
    /// so parallel edges (a battery across a resistor) and self-loops are
    /// never bridges.
    pub fn bridges(&self) -> Vec<bool> {
        const UNVISITED: usize = usize::MAX;
        let n = self.graph.node_count();
        let adjacency: Vec<Vec<(usize, usize)>> = self
            .graph
            .node_indices()
            .map(|v| {
                self.graph
                    .edges(v)
                    .map(|e| {
                        let other = if e.source() == v { e.target() } else { e.source() };
                        (other.index(), *e.weight())
                    })
                    .collect()
            })
            .collect();

        let mut discovered = vec![UNVISITED; n];
        let mut low = vec![0usize; n];
        let mut is_bridge = vec![false; self.graph.edge_count()];
        let mut timer = 0;

        for root in 0..n {
            if discovered[root] != UNVISITED {
                continue;
            }
            discovered[root] = timer;
            low[root] = timer;
            timer += 1;

            // (node, edge used to reach it, next adjacency slot)
            let mut stack: Vec<(usize, Option<usize>, usize)> = vec![(root, None, 0)];
            while let Some(top) = stack.last_mut() {
                let (v, parent_edge) = (top.0, top.1);
                if top.2 < adjacency[v].len() {
                    let (w, edge) = adjacency[v][top.2];
                    top.2 += 1;
                    if Some(edge) == parent_edge {
                        continue;
                    }
                    if discovered[w] == UNVISITED {
                        discovered[w] = timer;
                        low[w] = timer;
                        timer += 1;
                        stack.push((w, Some(edge), 0));
                    } else {
                        low[v] = low[v].min(discovered[w]);
                    }
                } else {
                    stack.pop();
                    if let (Some(edge), Some(parent)) = (parent_edge, stack.last()) {
                        let p = parent.0;
                        low[p] = low[p].min(low[v]);
                        if low[v] > discovered[p] {
                            is_bridge[edge] = true;
                        }
                    }
                }
            }
        }

        is_bridge
    }

    /// Group label per edge for the graph with bridges removed; bridges get `None`.
    pub fn loop_groups(&self, is_bridge: &[bool]) -> Vec<Option<usize>> {
        let labels = self.label_components(|edge| !is_bridge[edge]);

        let mut groups = vec![None; self.graph.edge_count()];
        for edge in self.graph.edge_references() {
            let id = *edge.weight();
            if !is_bridge[id] {
                groups[id] = Some(labels[edge.source().index()]);
            }
        }
        groups
    }

    /// Representative node index per node over the kept edges
    fn label_components(&self, keep: impl Fn(usize) -> bool) -> Vec<usize> {
        let mut sets = UnionFind::<usize>::new(self.graph.node_count());
        for edge in self.graph.edge_references() {
            if keep(*edge.weight()) {
                sets.union(edge.source().index(), edge.target().index());
            }
        }
        sets.into_labeling()
    }
}

/// How an element relates its terminal voltages during propagation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Link {
    /// V(node1) = V(node0)
    Equal,
    /// V(node1) = V(node0) + offset
    Offset(f64),
    /// Terminals are independent
    Open,
}

/// Fill in node voltages by depth-first traversal.
///
/// Each traversal starts from the first node not yet reached: `seeds` in
/// order at their given voltage, then the remaining `nodes` at 0 V. A seed
/// that an earlier traversal already reached keeps the propagated value.
pub fn propagate_voltages(
    nodes: &[NodeId],
    links: &[(NodeId, NodeId, Link)],
    seeds: &[(NodeId, f64)],
) -> HashMap<NodeId, f64> {
    let mut adjacency: HashMap<NodeId, Vec<(NodeId, f64)>> = HashMap::new();
    for &(node0, node1, link) in links {
        let offset = match link {
            Link::Equal => 0.0,
            Link::Offset(offset) => offset,
            Link::Open => continue,
        };
        adjacency.entry(node0).or_default().push((node1, offset));
        adjacency.entry(node1).or_default().push((node0, -offset));
    }

    let starts = seeds.iter().copied().chain(nodes.iter().map(|&node| (node, 0.0)));

    let mut voltages: HashMap<NodeId, f64> = HashMap::with_capacity(nodes.len());
    let mut stack = Vec::new();
    for (start, start_voltage) in starts {
        if voltages.contains_key(&start) {
            continue;
        }
        voltages.insert(start, start_voltage);
        stack.push((start, start_voltage));
        while let Some((node, voltage)) = stack.pop() {
            if let Some(neighbors) = adjacency.get(&node) {
                for &(next, offset) in neighbors {
                    if !voltages.contains_key(&next) {
                        let next_voltage = voltage + offset;
                        voltages.insert(next, next_voltage);
                        stack.push((next, next_voltage));
                    }
                }
            }
        }
    }

    voltages
}
