//! Shared fixtures for the frame integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use frameflow_graphics::backend::{Device, DummyDevice};
use frameflow_graphics::graph::{FnNode, FnTask, NodeGraph, TaskFragment};
use frameflow_graphics::types::{AllocationDesc, HeapKind};
use frameflow_graphics::{
    FrameContext, FrameResult, MemoryObject, RenderContext, Scheduler, SchedulerConfig,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A scheduler running on a [`DummyDevice`].
pub struct TestContext {
    pub dummy: Arc<DummyDevice>,
    pub device: Arc<dyn Device>,
    pub scheduler: Scheduler,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default().with_worker_threads(4))
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        init_logging();
        let dummy = Arc::new(DummyDevice::new());
        let device: Arc<dyn Device> = dummy.clone();
        let scheduler = Scheduler::new(Arc::clone(&device), config).expect("scheduler");
        Self {
            dummy,
            device,
            scheduler,
        }
    }

    pub fn texture(&self, width: u32, height: u32) -> MemoryObject {
        MemoryObject::create_committed(
            &self.device,
            &AllocationDesc::texture_2d(width, height, 1, 4, HeapKind::Default),
        )
        .expect("texture")
    }

    pub fn buffer(&self, size: u64) -> MemoryObject {
        MemoryObject::create_committed(
            &self.device,
            &AllocationDesc::buffer(size, HeapKind::Default),
        )
        .expect("buffer")
    }

    /// Build the pipeline from `graph` and run frame `index`.
    pub fn run_graph(&mut self, graph: &NodeGraph, index: u64) -> FrameResult<()> {
        self.scheduler.set_pipeline(graph)?;
        self.run_frame(FrameContext::new(index, Duration::from_millis(16 * index)))
    }

    /// Run one frame of the current pipeline and wait for it.
    pub fn run_frame(&mut self, frame: FrameContext) -> FrameResult<()> {
        let point = self.scheduler.execute(&frame)?;
        point.wait(Duration::from_secs(5))?;
        self.scheduler.wait_idle()
    }
}

/// A node with one task running `execute`.
pub fn task_node<F>(name: &'static str, execute: F) -> Arc<FnNode>
where
    F: Fn(&mut RenderContext<'_>) -> FrameResult<()> + Clone + Send + Sync + 'static,
{
    Arc::new(FnNode::new(name, move || {
        TaskFragment::single(FnTask::new(name, execute.clone()))
    }))
}

/// A node clearing `target` to `color`.
pub fn clear_node(name: &'static str, target: &MemoryObject, color: [f32; 4]) -> Arc<FnNode> {
    let target = target.clone();
    task_node(name, move |ctx| {
        ctx.graphics_list()?.clear_render_target(&target, color)
    })
}
