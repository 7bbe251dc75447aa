//! Nodes and the tasks they decompose into.

use crate::context::{RenderContext, SetupContext};
use crate::error::FrameResult;

/// A unit of frame work with a Setup and an Execute phase.
///
/// Setup declares resource usage and prepares data; Execute records device
/// commands. Both phases of one task run on the job pool, never concurrently
/// with each other.
pub trait Task: Send {
    /// Name used in logs, profiling zones and errors.
    fn name(&self) -> &str;

    fn setup(&mut self, _ctx: &mut SetupContext<'_>) -> FrameResult<()> {
        Ok(())
    }

    fn execute(&mut self, ctx: &mut RenderContext<'_>) -> FrameResult<()>;
}

/// A declared node of the frame graph.
///
/// Nodes are shared by the [`NodeGraph`](super::NodeGraph) and the
/// [`Pipeline`](crate::pipeline::Pipeline) built from it. A node is asked for
/// fresh tasks every time a pipeline is built.
pub trait Node: Send + Sync {
    fn name(&self) -> &str;

    /// Decompose into tasks. An empty fragment passes dependencies through.
    fn create_tasks(&self) -> TaskFragment;
}

/// Tasks of one node plus the edges between them.
#[derive(Default)]
pub struct TaskFragment {
    tasks: Vec<Box<dyn Task>>,
    /// `(before, after)` indices into `tasks`.
    edges: Vec<(usize, usize)>,
}

impl TaskFragment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragment of a single task.
    pub fn single(task: impl Task + 'static) -> Self {
        let mut fragment = Self::new();
        fragment.add_task(task);
        fragment
    }

    /// Add a task and return its index inside the fragment.
    pub fn add_task(&mut self, task: impl Task + 'static) -> usize {
        self.tasks.push(Box::new(task));
        self.tasks.len() - 1
    }

    /// Order task `after` behind task `before`.
    pub fn add_edge(&mut self, before: usize, after: usize) {
        self.edges.push((before, after));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Tasks without a predecessor inside the fragment.
    pub fn entries(&self) -> Vec<usize> {
        (0..self.tasks.len())
            .filter(|&task| !self.edges.iter().any(|&(_, after)| after == task))
            .collect()
    }

    /// Tasks without a successor inside the fragment.
    pub fn exits(&self) -> Vec<usize> {
        (0..self.tasks.len())
            .filter(|&task| !self.edges.iter().any(|&(before, _)| before == task))
            .collect()
    }

    pub(crate) fn into_parts(self) -> (Vec<Box<dyn Task>>, Vec<(usize, usize)>) {
        (self.tasks, self.edges)
    }
}

impl std::fmt::Debug for TaskFragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.tasks.iter().map(|task| task.name()).collect();
        f.debug_struct("TaskFragment")
            .field("tasks", &names)
            .field("edges", &self.edges)
            .finish()
    }
}

type SetupFn = Box<dyn FnMut(&mut SetupContext<'_>) -> FrameResult<()> + Send>;
type ExecuteFn = Box<dyn FnMut(&mut RenderContext<'_>) -> FrameResult<()> + Send>;

/// A task built from closures.
///
/// ```
/// use frameflow_graphics::graph::FnTask;
///
/// let task = FnTask::new("clear", |_ctx| Ok(()));
/// ```
pub struct FnTask {
    name: String,
    setup: Option<SetupFn>,
    execute: ExecuteFn,
}

impl FnTask {
    pub fn new<F>(name: impl Into<String>, execute: F) -> Self
    where
        F: FnMut(&mut RenderContext<'_>) -> FrameResult<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            setup: None,
            execute: Box::new(execute),
        }
    }

    pub fn with_setup<F>(mut self, setup: F) -> Self
    where
        F: FnMut(&mut SetupContext<'_>) -> FrameResult<()> + Send + 'static,
    {
        self.setup = Some(Box::new(setup));
        self
    }
}

impl Task for FnTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> FrameResult<()> {
        match &mut self.setup {
            Some(setup) => setup(ctx),
            None => Ok(()),
        }
    }

    fn execute(&mut self, ctx: &mut RenderContext<'_>) -> FrameResult<()> {
        (self.execute)(ctx)
    }
}

impl std::fmt::Debug for FnTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTask")
            .field("name", &self.name)
            .field("has_setup", &self.setup.is_some())
            .finish()
    }
}

/// A node whose tasks come from a factory closure.
pub struct FnNode {
    name: String,
    factory: Box<dyn Fn() -> TaskFragment + Send + Sync>,
}

impl FnNode {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> TaskFragment + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(factory),
        }
    }

    /// A node contributing no tasks.
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, TaskFragment::new)
    }
}

impl Node for FnNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_tasks(&self) -> TaskFragment {
        (self.factory)()
    }
}

impl std::fmt::Debug for FnNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnNode").field("name", &self.name).finish()
    }
}
