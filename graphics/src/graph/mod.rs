//! Frame graph declaration.
//!
//! A [`NodeGraph`] holds the nodes of a frame and the data dependencies
//! between them. It is turned into an executable task graph by
//! [`Pipeline::create_from_nodes_list`](crate::pipeline::Pipeline::create_from_nodes_list).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use frameflow_graphics::graph::{FnNode, FnTask, NodeGraph, TaskFragment};
//!
//! let mut graph = NodeGraph::new();
//! let shadows = graph.add_node(Arc::new(FnNode::new("shadows", || {
//!     TaskFragment::single(FnTask::new("shadow_draw", |_| Ok(())))
//! })));
//! let lighting = graph.add_node(Arc::new(FnNode::new("lighting", || {
//!     TaskFragment::single(FnTask::new("light_draw", |_| Ok(())))
//! })));
//! graph.add_dependency(lighting, shadows).unwrap();
//! assert_eq!(graph.topological_order().unwrap(), vec![shadows, lighting]);
//! ```

mod node;

use std::collections::VecDeque;
use std::sync::Arc;

pub use node::{FnNode, FnTask, Node, Task, TaskFragment};

/// Handle to a node in a [`NodeGraph`].
///
/// Only valid within the graph that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u32);

impl NodeHandle {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Errors of graph construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The node graph or a node's task fragment is not a DAG.
    #[error("graph contains a cyclic dependency")]
    CyclicDependency,
    #[error("invalid node handle: {0:?}")]
    InvalidNodeHandle(NodeHandle),
    /// A fragment edge names a task index outside the fragment.
    #[error("node '{node}' has an edge to missing task {task}")]
    InvalidTaskIndex { node: String, task: usize },
}

/// Nodes of a frame and their dependencies.
#[derive(Default)]
pub struct NodeGraph {
    nodes: Vec<Arc<dyn Node>>,
    /// `(dependent, dependency)` pairs.
    edges: Vec<(NodeHandle, NodeHandle)>,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Arc<dyn Node>) -> NodeHandle {
        let index = self.nodes.len() as u32;
        self.nodes.push(node);
        NodeHandle::new(index)
    }

    /// Make `dependent` run after `dependency`.
    pub fn add_dependency(
        &mut self,
        dependent: NodeHandle,
        dependency: NodeHandle,
    ) -> Result<(), GraphError> {
        for handle in [dependent, dependency] {
            if handle.index() >= self.nodes.len() {
                return Err(GraphError::InvalidNodeHandle(handle));
            }
        }
        if dependent == dependency {
            return Err(GraphError::CyclicDependency);
        }
        if !self.edges.contains(&(dependent, dependency)) {
            self.edges.push((dependent, dependency));
        }
        Ok(())
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&Arc<dyn Node>> {
        self.nodes.get(handle.index())
    }

    pub fn nodes(&self) -> &[Arc<dyn Node>] {
        &self.nodes
    }

    pub fn edges(&self) -> &[(NodeHandle, NodeHandle)] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependencies of `handle`.
    pub fn dependencies(&self, handle: NodeHandle) -> impl Iterator<Item = NodeHandle> + '_ {
        self.edges
            .iter()
            .filter(move |&&(dependent, _)| dependent == handle)
            .map(|&(_, dependency)| dependency)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
    }

    /// Node order respecting every dependency (Kahn's algorithm).
    pub fn topological_order(&self) -> Result<Vec<NodeHandle>, GraphError> {
        let n = self.nodes.len();
        let mut in_degree = vec![0u32; n];
        for &(dependent, _) in &self.edges {
            in_degree[dependent.index()] += 1;
        }

        let mut queue: VecDeque<NodeHandle> = (0..n as u32)
            .map(NodeHandle::new)
            .filter(|handle| in_degree[handle.index()] == 0)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(handle) = queue.pop_front() {
            order.push(handle);
            for &(dependent, dependency) in &self.edges {
                if dependency == handle {
                    in_degree[dependent.index()] -= 1;
                    if in_degree[dependent.index()] == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if order.len() != n {
            return Err(GraphError::CyclicDependency);
        }
        Ok(order)
    }
}

impl std::fmt::Debug for NodeGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.nodes.iter().map(|node| node.name()).collect();
        f.debug_struct("NodeGraph")
            .field("nodes", &names)
            .field("edges", &self.edges)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_of(count: usize) -> (NodeGraph, Vec<NodeHandle>) {
        let mut graph = NodeGraph::new();
        let handles = (0..count)
            .map(|i| graph.add_node(Arc::new(FnNode::empty(format!("n{i}")))))
            .collect();
        (graph, handles)
    }

    #[test]
    fn test_empty_graph_orders_nothing() {
        let graph = NodeGraph::new();
        assert!(graph.topological_order().unwrap().is_empty());
    }

    #[test]
    fn test_diamond_order() {
        //     a
        //    / \
        //   b   c
        //    \ /
        //     d
        let (mut graph, h) = graph_of(4);
        graph.add_dependency(h[1], h[0]).unwrap();
        graph.add_dependency(h[2], h[0]).unwrap();
        graph.add_dependency(h[3], h[1]).unwrap();
        graph.add_dependency(h[3], h[2]).unwrap();

        let order = graph.topological_order().unwrap();
        assert_eq!(order.first(), Some(&h[0]));
        assert_eq!(order.last(), Some(&h[3]));
    }

    #[test]
    fn test_cycle_detected() {
        let (mut graph, h) = graph_of(3);
        graph.add_dependency(h[1], h[0]).unwrap();
        graph.add_dependency(h[2], h[1]).unwrap();
        graph.add_dependency(h[0], h[2]).unwrap();
        assert_eq!(graph.topological_order(), Err(GraphError::CyclicDependency));
    }

    #[test]
    fn test_invalid_handles_rejected() {
        let (mut graph, h) = graph_of(1);
        let stranger = NodeHandle::new(7);
        assert_eq!(
            graph.add_dependency(stranger, h[0]),
            Err(GraphError::InvalidNodeHandle(stranger))
        );
        assert_eq!(graph.add_dependency(h[0], h[0]), Err(GraphError::CyclicDependency));
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let (mut graph, h) = graph_of(2);
        graph.add_dependency(h[1], h[0]).unwrap();
        graph.add_dependency(h[1], h[0]).unwrap();
        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.dependencies(h[1]).collect::<Vec<_>>(), vec![h[0]]);
    }
}
