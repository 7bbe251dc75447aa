//! Executable task graph.
//!
//! [`Pipeline::create_from_nodes_list`] asks every node of a [`NodeGraph`]
//! for its [`TaskFragment`], connects the fragments along the node edges and
//! keeps the transitive reduction of the result:
//!
//! ```text
//! Node graph:       shadows ──► lighting ──► post
//!
//! Fragments:        [cull ─► draw]   [light]   (none)
//!
//! Task graph:       cull ─► draw ─► light
//! ```
//!
//! A node without tasks passes its dependencies through to its dependents.
//! An edge whose source has a single successor and whose target has a single
//! predecessor is a *forwarding* edge: the scheduler hands the source's open
//! command list to the target instead of submitting it.

mod reduce;

use parking_lot::{Mutex, MutexGuard};

use crate::graph::{GraphError, NodeGraph, NodeHandle, Task};

/// Handle to a task of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u32);

impl TaskId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

struct TaskEntry {
    node: NodeHandle,
    name: String,
    task: Mutex<Box<dyn Task>>,
}

/// Tasks of a frame and the reduced ordering edges between them.
#[derive(Default)]
pub struct Pipeline {
    tasks: Vec<TaskEntry>,
    edges: Vec<(TaskId, TaskId)>,
    successors: Vec<Vec<TaskId>>,
    predecessors: Vec<Vec<TaskId>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `graph`, replacing any previous contents.
    ///
    /// On error the pipeline is left empty.
    pub fn create_from_nodes_list(&mut self, graph: &NodeGraph) -> Result<(), GraphError> {
        frameflow_core::profile_function!();
        self.clear();
        let result = self.build(graph);
        if result.is_err() {
            self.clear();
        }
        result
    }

    fn build(&mut self, graph: &NodeGraph) -> Result<(), GraphError> {
        let order = graph.topological_order()?;
        let mut entries: Vec<Vec<usize>> = vec![Vec::new(); graph.len()];
        let mut exposed_exits: Vec<Vec<usize>> = vec![Vec::new(); graph.len()];
        let mut raw_edges = Vec::new();

        for handle in order {
            let Some(node) = graph.node(handle) else {
                return Err(GraphError::InvalidNodeHandle(handle));
            };
            let fragment = node.create_tasks();
            if let Some(&(before, after)) = fragment
                .edges()
                .iter()
                .find(|&&(before, after)| before >= fragment.len() || after >= fragment.len())
            {
                return Err(GraphError::InvalidTaskIndex {
                    node: node.name().to_string(),
                    task: before.max(after),
                });
            }
            reduce::topological_order(fragment.len(), fragment.edges())?;

            let base = self.tasks.len();
            let fragment_entries = fragment.entries();
            let fragment_exits = fragment.exits();
            let (tasks, edges) = fragment.into_parts();

            if tasks.is_empty() {
                let mut passed: Vec<usize> = graph
                    .dependencies(handle)
                    .flat_map(|dependency| exposed_exits[dependency.index()].iter().copied())
                    .collect();
                passed.sort_unstable();
                passed.dedup();
                exposed_exits[handle.index()] = passed;
                continue;
            }

            raw_edges.extend(edges.iter().map(|&(before, after)| (base + before, base + after)));
            entries[handle.index()] = fragment_entries.iter().map(|task| base + task).collect();
            exposed_exits[handle.index()] = fragment_exits.iter().map(|task| base + task).collect();

            for dependency in graph.dependencies(handle) {
                for &exit in &exposed_exits[dependency.index()] {
                    for &entry in &entries[handle.index()] {
                        raw_edges.push((exit, entry));
                    }
                }
            }

            self.tasks.extend(tasks.into_iter().map(|task| TaskEntry {
                node: handle,
                name: task.name().to_string(),
                task: Mutex::new(task),
            }));
        }

        let reduced = reduce::transitive_reduction(self.tasks.len(), &raw_edges)?;
        self.successors = vec![Vec::new(); self.tasks.len()];
        self.predecessors = vec![Vec::new(); self.tasks.len()];
        for &(before, after) in &reduced {
            self.successors[before].push(TaskId::new(after));
            self.predecessors[after].push(TaskId::new(before));
        }
        self.edges = reduced
            .into_iter()
            .map(|(before, after)| (TaskId::new(before), TaskId::new(after)))
            .collect();

        log::debug!(
            "Built pipeline: {} nodes, {} tasks, {} edges ({} raw)",
            graph.len(),
            self.tasks.len(),
            self.edges.len(),
            raw_edges.len()
        );
        Ok(())
    }

    /// Drop every task and edge.
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.edges.clear();
        self.successors.clear();
        self.predecessors.clear();
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        (0..self.tasks.len()).map(TaskId::new)
    }

    /// Reduced `(before, after)` edges, sorted.
    pub fn edges(&self) -> &[(TaskId, TaskId)] {
        &self.edges
    }

    pub fn successors(&self, task: TaskId) -> &[TaskId] {
        self.successors.get(task.index()).map_or(&[], Vec::as_slice)
    }

    pub fn predecessors(&self, task: TaskId) -> &[TaskId] {
        self.predecessors.get(task.index()).map_or(&[], Vec::as_slice)
    }

    /// Tasks without predecessors.
    pub fn sources(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.task_ids().filter(|&task| self.predecessors(task).is_empty())
    }

    pub fn task_name(&self, task: TaskId) -> &str {
        self.tasks.get(task.index()).map_or("", |entry| entry.name.as_str())
    }

    /// Node the task was created by.
    pub fn task_node(&self, task: TaskId) -> Option<NodeHandle> {
        self.tasks.get(task.index()).map(|entry| entry.node)
    }

    /// Whether `(before, after)` is an edge with out-degree 1 at `before` and
    /// in-degree 1 at `after`.
    pub fn is_forwarding_edge(&self, before: TaskId, after: TaskId) -> bool {
        self.successors(before) == [after] && self.predecessors(after) == [before]
    }

    /// Successor receiving the task's open command list, if any.
    pub fn forwarding_successor(&self, task: TaskId) -> Option<TaskId> {
        match self.successors(task) {
            &[next] if self.predecessors(next).len() == 1 => Some(next),
            _ => None,
        }
    }

    /// Every forwarding edge.
    pub fn forwarding_edges(&self) -> Vec<(TaskId, TaskId)> {
        self.edges
            .iter()
            .copied()
            .filter(|&(before, after)| self.is_forwarding_edge(before, after))
            .collect()
    }

    /// Lock a task for one of its phases.
    ///
    /// # Panics
    ///
    /// Panics if `task` does not belong to this pipeline.
    pub(crate) fn lock_task(&self, task: TaskId) -> MutexGuard<'_, Box<dyn Task>> {
        self.tasks[task.index()].task.lock()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.tasks.iter().map(|entry| entry.name.as_str()).collect();
        f.debug_struct("Pipeline")
            .field("tasks", &names)
            .field("edges", &self.edges)
            .finish()
    }
}

static_assertions::assert_impl_all!(Pipeline: Send, Sync);
