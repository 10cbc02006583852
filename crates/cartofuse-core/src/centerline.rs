//! Centerline extraction from a skeleton graph.
//!
//! A straight skeleton has a branch for every polygon vertex, far too
//! many for a label. This module reduces it to one polyline. It defines
//! the [`CenterlineExtractor`] trait and the [`CenterlineKind`] enum for
//! runtime selection.
//!
//! All traversals use explicit stacks; skeletons of long, detailed
//! polygons are deep enough to exhaust the call stack otherwise.

use std::collections::VecDeque;

use geo::{Coord, LineString};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::skeleton::SkeletonGraph;

/// Selects which centerline strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CenterlineKind {
    /// From the graph center, follow the two branches carrying the most
    /// skeleton length.
    ///
    /// Favors the visually dominant part of the polygon (a glacier's
    /// tongue rather than a long thin tributary).
    #[default]
    HeaviestPath,

    /// The longest weighted path through the skeleton.
    Diameter,
}

/// Why no centerline could be extracted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CenterlineError {
    /// The skeleton graph falls apart into several pieces.
    #[error("skeleton graph is disconnected ({components} components)")]
    Disconnected {
        /// Number of connected components.
        components: usize,
    },
}

/// Trait for centerline strategies.
pub trait CenterlineExtractor {
    /// Reduce the skeleton to a single polyline.
    ///
    /// # Errors
    ///
    /// [`CenterlineError::Disconnected`] when the graph is not connected.
    fn extract(&self, graph: &SkeletonGraph) -> Result<LineString<f64>, CenterlineError>;
}

impl CenterlineExtractor for CenterlineKind {
    fn extract(&self, graph: &SkeletonGraph) -> Result<LineString<f64>, CenterlineError> {
        match *self {
            Self::HeaviestPath => heaviest_path(graph),
            Self::Diameter => diameter(graph),
        }
    }
}

fn ensure_connected(graph: &SkeletonGraph) -> Result<(), CenterlineError> {
    let components = petgraph::algo::connected_components(graph.graph());
    if components > 1 {
        return Err(CenterlineError::Disconnected { components });
    }
    Ok(())
}

fn line(graph: &SkeletonGraph, nodes: impl IntoIterator<Item = NodeIndex>) -> LineString<f64> {
    nodes.into_iter().map(|n| graph.point(n)).collect::<Vec<Coord<f64>>>().into()
}

/// Node minimizing the hop-count eccentricity. The lowest index wins ties.
///
/// Trees are solved by peeling leaves layer by layer; anything else falls
/// back to a breadth-first search from every node.
#[must_use]
pub fn graph_center(graph: &SkeletonGraph) -> Option<NodeIndex> {
    let g = graph.graph();
    let n = g.node_count();
    if n == 0 {
        return None;
    }
    if g.edge_count() + 1 == n && graph.is_connected() {
        return Some(tree_center(graph));
    }

    let mut best: Option<(usize, NodeIndex)> = None;
    for start in g.node_indices() {
        let ecc = eccentricity(graph, start);
        if best.is_none_or(|(e, _)| ecc < e) {
            best = Some((ecc, start));
        }
    }
    best.map(|(_, node)| node)
}

fn tree_center(graph: &SkeletonGraph) -> NodeIndex {
    let g = graph.graph();
    let mut degree: Vec<usize> = g.node_indices().map(|n| g.neighbors(n).count()).collect();
    let mut layer: Vec<NodeIndex> = g.node_indices().filter(|n| degree[n.index()] <= 1).collect();
    let mut remaining = g.node_count();

    while remaining > 2 {
        remaining -= layer.len();
        let mut next = Vec::new();
        for &leaf in &layer {
            for neighbor in g.neighbors(leaf) {
                let d = &mut degree[neighbor.index()];
                if *d > 1 {
                    *d -= 1;
                    if *d == 1 {
                        next.push(neighbor);
                    }
                }
            }
        }
        layer = next;
    }

    layer.into_iter().min().unwrap_or_else(|| NodeIndex::new(0))
}

fn eccentricity(graph: &SkeletonGraph, start: NodeIndex) -> usize {
    let g = graph.graph();
    let mut hops = vec![usize::MAX; g.node_count()];
    hops[start.index()] = 0;
    let mut queue = VecDeque::from([start]);
    let mut farthest = 0;
    while let Some(node) = queue.pop_front() {
        let h = hops[node.index()];
        farthest = farthest.max(h);
        for neighbor in g.neighbors(node) {
            if hops[neighbor.index()] == usize::MAX {
                hops[neighbor.index()] = h + 1;
                queue.push_back(neighbor);
            }
        }
    }
    farthest
}

/// Depth-first traversal rooted at `root`.
struct RootedTree {
    /// Parent of each node; `None` for the root and unreached nodes.
    parent: Vec<Option<NodeIndex>>,
    /// Children of each node in discovery order.
    children: Vec<Vec<(NodeIndex, f64)>>,
    /// Nodes in visit order (parents before children).
    order: Vec<NodeIndex>,
}

impl RootedTree {
    fn new(graph: &SkeletonGraph, root: NodeIndex) -> Self {
        let g = graph.graph();
        let n = g.node_count();
        let mut parent = vec![None; n];
        let mut children = vec![Vec::new(); n];
        let mut visited = vec![false; n];
        let mut order = Vec::with_capacity(n);

        visited[root.index()] = true;
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            order.push(node);
            for edge in g.edges(node) {
                let child = edge.target();
                if visited[child.index()] {
                    continue;
                }
                visited[child.index()] = true;
                parent[child.index()] = Some(node);
                children[node.index()].push((child, *edge.weight()));
                stack.push(child);
            }
        }

        Self {
            parent,
            children,
            order,
        }
    }

    /// Per-node subtree weight: the sum over children of the child's
    /// weight plus the connecting edge length. Leaves weigh zero.
    fn subtree_weights(&self) -> Vec<f64> {
        let mut weight = vec![0.0; self.children.len()];
        for &node in self.order.iter().rev() {
            weight[node.index()] = self.children[node.index()]
                .iter()
                .map(|&(child, length)| weight[child.index()] + length)
                .sum();
        }
        weight
    }

    /// Follow the heaviest child from `start` down to a leaf.
    fn descend(&self, start: NodeIndex, weight: &[f64]) -> Vec<NodeIndex> {
        let mut path = vec![start];
        let mut current = start;
        loop {
            let mut heaviest: Option<NodeIndex> = None;
            for &(child, _) in &self.children[current.index()] {
                if heaviest.is_none_or(|h| weight[child.index()] > weight[h.index()]) {
                    heaviest = Some(child);
                }
            }
            let Some(next) = heaviest else {
                return path;
            };
            path.push(next);
            current = next;
        }
    }

    /// Weighted depth of every reached node.
    fn depths(&self) -> Vec<f64> {
        let mut depth = vec![0.0; self.children.len()];
        for &node in &self.order {
            for &(child, length) in &self.children[node.index()] {
                depth[child.index()] = depth[node.index()] + length;
            }
        }
        depth
    }
}

/// Per-node subtree weights for a traversal rooted at `root`.
#[must_use]
pub fn subtree_weights(graph: &SkeletonGraph, root: NodeIndex) -> Vec<f64> {
    RootedTree::new(graph, root).subtree_weights()
}

/// Heaviest-path centerline.
///
/// From the graph center, the two neighbors with the largest subtree
/// weight are chosen (the first seen wins ties) and each is followed to a
/// leaf along its heaviest children. The result runs from the end of the
/// heaviest branch through the center to the end of the second.
///
/// With one neighbor the result is a single branch ending at the center;
/// with none it is the center alone; an empty graph yields an empty line.
///
/// # Errors
///
/// [`CenterlineError::Disconnected`] when the graph is not connected.
pub fn heaviest_path(graph: &SkeletonGraph) -> Result<LineString<f64>, CenterlineError> {
    ensure_connected(graph)?;
    let Some(center) = graph_center(graph) else {
        return Ok(LineString::new(Vec::new()));
    };

    let tree = RootedTree::new(graph, center);
    let weight = tree.subtree_weights();

    let mut branches: Vec<NodeIndex> = tree.children[center.index()]
        .iter()
        .map(|&(child, _)| child)
        .collect();
    branches.sort_by(|a, b| weight[b.index()].total_cmp(&weight[a.index()]));

    let mut nodes: Vec<NodeIndex> = Vec::new();
    if let Some(&first) = branches.first() {
        let mut path = tree.descend(first, &weight);
        path.reverse();
        nodes.extend(path);
    }
    nodes.push(center);
    if let Some(&second) = branches.get(1) {
        nodes.extend(tree.descend(second, &weight));
    }

    Ok(line(graph, nodes))
}

/// Longest weighted path, found with two farthest-node sweeps.
///
/// # Errors
///
/// [`CenterlineError::Disconnected`] when the graph is not connected.
pub fn diameter(graph: &SkeletonGraph) -> Result<LineString<f64>, CenterlineError> {
    ensure_connected(graph)?;
    let Some(start) = graph.graph().node_indices().next() else {
        return Ok(LineString::new(Vec::new()));
    };

    let farthest = |tree: &RootedTree| {
        let depth = tree.depths();
        tree.order
            .iter()
            .copied()
            .fold(None::<NodeIndex>, |best, n| match best {
                Some(b) if depth[b.index()] >= depth[n.index()] => Some(b),
                _ => Some(n),
            })
            .unwrap_or(start)
    };

    let one_end = farthest(&RootedTree::new(graph, start));
    let tree = RootedTree::new(graph, one_end);
    let other_end = farthest(&tree);

    let mut nodes = vec![other_end];
    let mut current = other_end;
    while let Some(parent) = tree.parent[current.index()] {
        nodes.push(parent);
        current = parent;
    }
    Ok(line(graph, nodes))
}
