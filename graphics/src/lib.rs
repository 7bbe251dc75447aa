//! # frameflow graphics
//!
//! Frame execution core: turns a graph of render nodes into per-frame GPU
//! submissions.
//!
//! ## Overview
//!
//! - [`graph::NodeGraph`] - nodes and their dependencies
//! - [`pipeline::Pipeline`] - task graph derived from the nodes, transitively reduced
//! - [`Scheduler`] - runs the pipeline every frame on a job pool and submits
//!   recorded [`command::CommandList`]s from a dedicated thread
//! - [`binding::BindingLayout`] - compiles shader parameters into root tables
//! - [`residency::ResidencyQueue`] - background residency and eviction
//! - [`backend::Device`] - the device collaborator, with an in-memory
//!   [`backend::DummyDevice`] for tests
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use frameflow_graphics::backend::{Device, DummyDevice};
//! use frameflow_graphics::graph::{FnNode, FnTask, NodeGraph, TaskFragment};
//! use frameflow_graphics::types::{AllocationDesc, HeapKind};
//! use frameflow_graphics::{FrameContext, MemoryObject, Scheduler, SchedulerConfig};
//!
//! let device: Arc<dyn Device> = Arc::new(DummyDevice::new());
//! let back_buffer = MemoryObject::create_committed(
//!     &device,
//!     &AllocationDesc::texture_2d(64, 64, 1, 4, HeapKind::Default),
//! )
//! .unwrap();
//!
//! let mut graph = NodeGraph::new();
//! let target = back_buffer.clone();
//! graph.add_node(Arc::new(FnNode::new("clear", move || {
//!     let target = target.clone();
//!     TaskFragment::single(FnTask::new("clear", move |ctx| {
//!         ctx.graphics_list()?.clear_render_target(&target, [0.0, 0.0, 0.0, 1.0])
//!     }))
//! })));
//!
//! let mut scheduler = Scheduler::new(device, SchedulerConfig::default()).unwrap();
//! scheduler.set_pipeline(&graph).unwrap();
//! let frame = FrameContext::new(0, Duration::ZERO).with_back_buffer(back_buffer);
//! scheduler.execute(&frame).unwrap();
//! scheduler.wait_idle().unwrap();
//! ```

pub mod backend;
pub mod binding;
pub mod command;
pub mod config;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod residency;
pub mod resources;
pub mod scheduler;
pub mod types;

pub use backend::{Device, DeviceError, DummyDevice};
pub use command::{CommandList, CommandListKind, ListCapabilities};
pub use config::SchedulerConfig;
pub use context::{FrameContext, FrameResources, RenderContext, SetupContext};
pub use error::{FrameError, FrameResult};
pub use graph::{GraphError, Node, NodeGraph, NodeHandle, Task, TaskFragment};
pub use pipeline::{Pipeline, TaskId};
pub use resources::{MemoryObject, Subresource};
pub use scheduler::{Scheduler, SyncPoint};
pub use types::ResourceState;

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version.
pub fn init() {
    log::info!("frameflow graphics v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_empty_pipeline() {
        let pipeline = Pipeline::new();
        assert!(pipeline.is_empty());
    }
}
