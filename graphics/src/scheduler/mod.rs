//! Frame scheduling.
//!
//! The scheduler is split the same way the work is:
//!
//! | Layer | Type | Runs on |
//! |-------|------|---------|
//! | Facade | [`Scheduler`] | caller thread |
//! | Frames in flight | [`FramesInFlight`] | caller thread |
//! | Task phases | [`SchedulerCpu`] | job pool |
//! | Submission | [`SchedulerGpu`] | `gpu-submit` thread |
//! | Residency | [`ResidencyQueue`] | `residency-init` / `residency-clean` threads |
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use frameflow_graphics::backend::{Device, DummyDevice};
//! use frameflow_graphics::graph::{FnNode, FnTask, NodeGraph, TaskFragment};
//! use frameflow_graphics::{FrameContext, Scheduler, SchedulerConfig};
//!
//! let device: Arc<dyn Device> = Arc::new(DummyDevice::new());
//! let mut scheduler = Scheduler::new(device, SchedulerConfig::default()).unwrap();
//!
//! let mut graph = NodeGraph::new();
//! graph.add_node(Arc::new(FnNode::new("noop", || {
//!     TaskFragment::single(FnTask::new("noop", |_| Ok(())))
//! })));
//! scheduler.set_pipeline(&graph).unwrap();
//!
//! let done = scheduler.execute(&FrameContext::new(0, Duration::ZERO)).unwrap();
//! done.wait(Duration::from_secs(1)).unwrap();
//! ```

mod barriers;
mod cpu;
mod frames;
mod gpu;
mod sync;

pub use cpu::SchedulerCpu;
pub use frames::FramesInFlight;
pub use gpu::{QueueItem, SchedulerGpu, SubmissionStats};
pub use sync::{CpuFence, SyncPoint};

use std::sync::Arc;

use crate::backend::Device;
use crate::command::{CommandList, CommandListKind};
use crate::config::SchedulerConfig;
use crate::context::{FrameContext, FrameResources};
use crate::error::{FrameError, FrameResult};
use crate::graph::NodeGraph;
use crate::pipeline::Pipeline;
use crate::residency::{FailureHandler, ResidencyQueue};
use crate::resources::MemoryObject;

/// Runs a [`Pipeline`] once per frame.
pub struct Scheduler {
    config: SchedulerConfig,
    resources: Arc<FrameResources>,
    residency: Arc<ResidencyQueue>,
    gpu: SchedulerGpu,
    cpu: SchedulerCpu,
    pipeline: Pipeline,
    frames: FramesInFlight,
    fatal_handler: Option<FailureHandler>,
}

impl Scheduler {
    pub fn new(device: Arc<dyn Device>, config: SchedulerConfig) -> FrameResult<Self> {
        if config.frames_in_flight == 0 {
            return Err(FrameError::InvalidUsage("frames_in_flight must be at least 1".to_string()));
        }
        log::info!(
            "Creating scheduler on '{}': {} workers, {} frames in flight",
            device.name(),
            config.worker_threads,
            config.frames_in_flight
        );
        let resources = Arc::new(FrameResources::new(Arc::clone(&device), &config));
        let residency = Arc::new(ResidencyQueue::new(
            device,
            config.eviction_policy,
            config.fence_timeout,
        )?);
        let gpu = SchedulerGpu::new(Arc::clone(&resources), Arc::clone(&residency))?;

        Ok(Self {
            cpu: SchedulerCpu::new(config.worker_threads)?,
            frames: FramesInFlight::new(config.frames_in_flight),
            pipeline: Pipeline::new(),
            fatal_handler: None,
            config,
            resources,
            residency,
            gpu,
        })
    }

    /// Rebuild the task graph from `graph`.
    pub fn set_pipeline(&mut self, graph: &NodeGraph) -> FrameResult<()> {
        self.pipeline.create_from_nodes_list(graph)?;
        log::debug!(
            "Pipeline rebuilt: {} nodes, {} tasks, {} edges",
            graph.len(),
            self.pipeline.task_count(),
            self.pipeline.edges().len()
        );
        Ok(())
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn resources(&self) -> &Arc<FrameResources> {
        &self.resources
    }

    pub fn residency(&self) -> &Arc<ResidencyQueue> {
        &self.residency
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        self.resources.device()
    }

    pub fn gpu(&self) -> &SchedulerGpu {
        &self.gpu
    }

    /// Register the callback for errors raised on background threads.
    pub fn set_error_callback(&self, callback: FailureHandler) {
        self.gpu.set_error_callback(Arc::clone(&callback));
        self.residency.set_failure_handler(callback);
    }

    /// Register the callback invoked for fatal frame errors, before the
    /// fallback frame is recorded.
    pub fn set_fatal_handler(&mut self, handler: FailureHandler) {
        self.fatal_handler = Some(handler);
    }

    /// Run every task of the pipeline for one frame.
    ///
    /// Blocks while the frame slot is still in use by an earlier frame.
    /// Returns the point reached once the frame finished on the device.
    ///
    /// On a fatal error the frame is abandoned: a fallback frame clearing
    /// the back buffer is presented instead and the error is returned.
    pub fn execute(&mut self, frame: &FrameContext) -> FrameResult<SyncPoint> {
        frameflow_core::profile_function!();

        match self.frames.begin_frame(self.config.fence_timeout) {
            Ok(Some(completed)) => self.resources.frame_completed(completed),
            Ok(None) => {}
            Err(err) => return Err(self.fail_frame(frame, err)),
        }
        self.resources.begin_frame(frame.frame_index);
        self.gpu.begin_frame(frame.frame_index);

        let recorded = self
            .cpu
            .run_pipeline(&self.pipeline, frame, &self.resources, &self.gpu);
        let back_buffer = match &recorded {
            Ok(()) => frame.back_buffer.clone(),
            Err(_) => None,
        };
        let submitted = self.gpu.finalize_frame(back_buffer);
        frameflow_core::frame_mark!();

        let err = match (recorded, submitted) {
            (Ok(()), Ok(point)) => {
                self.frames.end_frame(frame.frame_index, point.clone());
                log::trace!("Frame {} done at value {}", frame.frame_index, point.value());
                return Ok(point);
            }
            (Err(err), Ok(point)) if !err.is_fatal() => {
                // keep the frame's pages alive until its lists finish
                self.frames.end_frame(frame.frame_index, point);
                log::warn!("Frame {} abandoned: {err}", frame.frame_index);
                return Err(err);
            }
            (Err(recording), Err(submission)) if submission.is_fatal() => {
                log::error!("Frame {} failed recording: {recording}", frame.frame_index);
                submission
            }
            (Err(err), _) | (Ok(()), Err(err)) => err,
        };
        if !err.is_fatal() {
            // batches submitted before the failure still run
            self.frames.end_frame(frame.frame_index, self.gpu.last_submitted());
        }
        Err(self.fail_frame(frame, err))
    }

    /// Wait for the device to go idle and release pooled device objects.
    pub fn reset(&mut self) -> FrameResult<()> {
        self.wait_idle()?;
        self.frames.clear();
        self.resources.clear();
        log::debug!("Scheduler reset");
        Ok(())
    }

    /// Block until every submitted frame finished.
    pub fn wait_idle(&mut self) -> FrameResult<()> {
        self.frames.wait_idle(self.config.fence_timeout)?;
        self.gpu.wait_idle()
    }

    fn fail_frame(&mut self, frame: &FrameContext, err: FrameError) -> FrameError {
        if !err.is_fatal() {
            log::error!("Frame {} failed: {err}", frame.frame_index);
            return err;
        }

        log::error!("Fatal error in frame {}: {err}", frame.frame_index);
        if let Some(handler) = &self.fatal_handler {
            handler(err.clone());
        }
        if let Some(back_buffer) = &frame.back_buffer {
            match self.present_fallback(frame.frame_index, back_buffer) {
                Ok(point) => self.frames.end_frame(frame.frame_index, point),
                Err(fallback) => log::error!("Fallback frame failed: {fallback}"),
            }
        }
        err
    }

    fn present_fallback(&self, frame: u64, back_buffer: &MemoryObject) -> FrameResult<SyncPoint> {
        log::warn!("Presenting fallback frame {frame}");
        self.gpu.begin_frame(frame);
        let mut list = CommandList::new(&self.resources, CommandListKind::Graphics)?;
        list.clear_render_target(back_buffer, self.config.fallback_clear_color)?;
        self.gpu.enqueue_command_list(list.finish());
        self.gpu.finalize_frame(Some(back_buffer.clone()))
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(err) = self.wait_idle() {
            log::error!("Failed to idle scheduler on drop: {err}");
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pipeline", &self.pipeline)
            .field("frames", &self.frames)
            .field("gpu", &self.gpu)
            .finish()
    }
}

static_assertions::assert_impl_all!(Scheduler: Send);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;
    use crate::backend::Fence;
    use crate::graph::{FnNode, FnTask, TaskFragment};
    use crate::types::{AllocationDesc, HeapKind, ResourceState};
    use parking_lot::Mutex;
    use std::time::Duration;

    fn scheduler(config: SchedulerConfig) -> (Arc<DummyDevice>, Scheduler) {
        let dummy = Arc::new(DummyDevice::new());
        let device: Arc<dyn Device> = dummy.clone();
        (dummy, Scheduler::new(device, config).unwrap())
    }

    fn clear_graph(target: &MemoryObject) -> NodeGraph {
        let target = target.clone();
        let mut graph = NodeGraph::new();
        graph.add_node(Arc::new(FnNode::new("clear", move || {
            let target = target.clone();
            TaskFragment::single(FnTask::new("clear", move |ctx| {
                ctx.graphics_list()?.clear_render_target(&target, [0.0; 4])
            }))
        })));
        graph
    }

    #[test]
    fn test_zero_frames_in_flight_rejected() {
        let device: Arc<dyn Device> = Arc::new(DummyDevice::new());
        let config = SchedulerConfig {
            frames_in_flight: 0,
            ..SchedulerConfig::default()
        };
        let err = Scheduler::new(device, config).unwrap_err();
        assert!(matches!(err, FrameError::InvalidUsage(_)));
    }

    #[test]
    fn test_stalled_slot_runs_fatal_handler() {
        let (dummy, mut scheduler) = scheduler(
            SchedulerConfig::default()
                .with_frames_in_flight(1)
                .with_fence_timeout(Duration::from_millis(20)),
        );
        let back_buffer = MemoryObject::create_committed(
            scheduler.device(),
            &AllocationDesc::texture_2d(8, 8, 1, 4, HeapKind::Default),
        )
        .unwrap();
        let fatal = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fatal);
        scheduler.set_fatal_handler(Arc::new(move |err| sink.lock().push(err)));

        // the previous frame of the only slot never completes
        let stalled: Arc<dyn Fence> = Arc::new(CpuFence::new(0));
        scheduler.frames.end_frame(0, SyncPoint::new(Arc::clone(&stalled), 1));

        let frame = FrameContext::new(1, Duration::ZERO).with_back_buffer(back_buffer.clone());
        let err = scheduler.execute(&frame).unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(fatal.lock().len(), 1);
        // fallback frame cleared and presented the back buffer
        assert_eq!(back_buffer.state(0), ResourceState::PRESENT);
        assert_eq!(dummy.submitted_lists().len(), 2);
        stalled.signal(1);
    }

    #[test]
    fn test_rejected_submit_still_occupies_slot() {
        let (dummy, mut scheduler) = scheduler(SchedulerConfig::default().with_frames_in_flight(2));
        let target = MemoryObject::create_committed(
            scheduler.device(),
            &AllocationDesc::texture_2d(8, 8, 1, 4, HeapKind::Default),
        )
        .unwrap();
        scheduler.set_pipeline(&clear_graph(&target)).unwrap();

        scheduler.execute(&FrameContext::new(0, Duration::ZERO)).unwrap();
        assert_eq!(scheduler.frames.current_slot(), 1);

        dummy.reject_next_submit(1);
        let err = scheduler.execute(&FrameContext::new(1, Duration::ZERO)).unwrap_err();
        assert!(!err.is_fatal());
        // the slot holds the point of the batches that did submit
        assert_eq!(scheduler.frames.current_slot(), 0);
        scheduler.wait_idle().unwrap();
        assert_eq!(scheduler.frames.completed_frame(), Some(1));
    }
}
