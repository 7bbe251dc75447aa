//! Task traversal on the job pool.
//!
//! Both phases of a frame run as a wavefront over the task graph: source
//! tasks are spawned first and every completion event decrements the
//! dependency counters of the task's successors, spawning those that reach
//! zero. The coordinator is the only owner of the counters; jobs report
//! back over a channel.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc;

use frameflow_core::JobPool;
use parking_lot::Mutex;

use crate::command::{CommandList, CommandListKind, UsageSet};
use crate::context::{FrameContext, FrameResources, RenderContext, SetupContext};
use crate::error::{FrameError, FrameResult};
use crate::pipeline::{Pipeline, TaskId};
use crate::scheduler::SchedulerGpu;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Setup,
    Execute,
}

/// Drives task phases on a [`JobPool`].
#[derive(Debug, Clone)]
pub struct SchedulerCpu {
    jobs: JobPool,
}

impl SchedulerCpu {
    pub fn new(worker_threads: usize) -> FrameResult<Self> {
        let jobs = JobPool::new(worker_threads)
            .map_err(|err| FrameError::DeviceLost(format!("failed to start task workers: {err}")))?;
        Ok(Self { jobs })
    }

    pub fn worker_threads(&self) -> usize {
        self.jobs.num_threads()
    }

    /// Run one frame of `pipeline`.
    ///
    /// Copies staged by earlier frames go first, then every task's Setup,
    /// then every task's Execute. Recorded lists are handed to `gpu` as soon
    /// as they are finished.
    pub fn run_pipeline(
        &self,
        pipeline: &Pipeline,
        frame: &FrameContext,
        resources: &Arc<FrameResources>,
        gpu: &SchedulerGpu,
    ) -> FrameResult<()> {
        frameflow_core::profile_function!();

        self.run_uploads(resources, gpu)?;

        let usages: Vec<Mutex<UsageSet>> = pipeline
            .task_ids()
            .map(|_| Mutex::new(UsageSet::new()))
            .collect();
        self.run_wavefront(pipeline, Phase::Setup, |id| {
            let name = pipeline.task_name(id);
            frameflow_core::profile_scope_dynamic!(name);
            let mut usage = UsageSet::new();
            {
                let mut ctx = SetupContext::new(frame, resources, name, &mut usage);
                pipeline.lock_task(id).setup(&mut ctx)?;
            }
            *usages[id.index()].lock() = usage;
            Ok(())
        })?;
        let usages: Vec<UsageSet> = usages.into_iter().map(Mutex::into_inner).collect();

        let inherited: Vec<Mutex<Option<CommandList>>> =
            pipeline.task_ids().map(|_| Mutex::new(None)).collect();
        self.run_wavefront(pipeline, Phase::Execute, |id| {
            let name = pipeline.task_name(id);
            frameflow_core::profile_scope_dynamic!(name);
            let list = inherited[id.index()].lock().take();
            let mut ctx = RenderContext::new(frame, resources, name, &usages[id.index()], list);
            pipeline.lock_task(id).execute(&mut ctx)?;

            let (open, finished) = ctx.into_parts();
            for list in finished {
                gpu.enqueue_command_list(list);
            }
            if let Some(list) = open {
                match pipeline.forwarding_successor(id) {
                    Some(next) => {
                        log::trace!(
                            "Forwarding list of '{name}' to '{}'",
                            pipeline.task_name(next)
                        );
                        *inherited[next.index()].lock() = Some(list);
                    }
                    None => gpu.enqueue_command_list(list.finish()),
                }
            }
            Ok(())
        })
    }

    /// Record the copies staged for this frame into one copy list.
    fn run_uploads(&self, resources: &Arc<FrameResources>, gpu: &SchedulerGpu) -> FrameResult<()> {
        let copies = resources.uploads().take_queued_uploads();
        if copies.is_empty() {
            return Ok(());
        }
        frameflow_core::profile_scope!("uploads");
        log::trace!("Recording {} staged copies", copies.len());
        let mut list = CommandList::new(resources, CommandListKind::Copy)?;
        for copy in copies {
            list.copy_upload(copy)?;
        }
        gpu.enqueue_command_list(list.finish());
        Ok(())
    }

    /// Run `body` for every task, never before its predecessors finished.
    ///
    /// After the first failure nothing new is spawned. Jobs already running
    /// finish and the first error is returned.
    fn run_wavefront<F>(&self, pipeline: &Pipeline, phase: Phase, body: F) -> FrameResult<()>
    where
        F: Fn(TaskId) -> FrameResult<()> + Sync,
    {
        if pipeline.is_empty() {
            return Ok(());
        }

        let mut pending: Vec<usize> = pipeline
            .task_ids()
            .map(|id| pipeline.predecessors(id).len())
            .collect();
        let body = &body;

        self.jobs.scope(|s| {
            let (done, completions) = mpsc::channel::<(TaskId, FrameResult<()>)>();
            let spawn = |id: TaskId| {
                let done = done.clone();
                s.spawn(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| body(id))).unwrap_or_else(|_| {
                        Err(FrameError::TaskPanicked {
                            task: pipeline.task_name(id).to_string(),
                        })
                    });
                    let _ = done.send((id, result));
                });
            };

            let mut in_flight = 0usize;
            for id in pipeline.sources() {
                spawn(id);
                in_flight += 1;
            }

            let mut first_error: Option<FrameError> = None;
            while in_flight > 0 {
                let Ok((id, result)) = completions.recv() else {
                    break;
                };
                in_flight -= 1;

                if let Err(err) = result {
                    log::error!("{phase:?} of task '{}' failed: {err}", pipeline.task_name(id));
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                    continue;
                }
                if first_error.is_some() {
                    continue;
                }
                for &next in pipeline.successors(id) {
                    let counter = &mut pending[next.index()];
                    *counter -= 1;
                    if *counter == 0 {
                        spawn(next);
                        in_flight += 1;
                    }
                }
            }

            match first_error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Device, DummyDevice};
    use crate::config::SchedulerConfig;
    use crate::graph::{FnNode, FnTask, NodeGraph, TaskFragment};
    use crate::residency::{EvictionPolicy, ResidencyQueue};
    use crate::resources::{MemoryObject, Subresource};
    use crate::types::{AllocationDesc, HeapKind, ResourceState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Harness {
        dummy: Arc<DummyDevice>,
        resources: Arc<FrameResources>,
        gpu: SchedulerGpu,
        cpu: SchedulerCpu,
    }

    fn harness() -> Harness {
        let dummy = Arc::new(DummyDevice::new());
        let device: Arc<dyn Device> = dummy.clone();
        let resources = Arc::new(FrameResources::new(device.clone(), &SchedulerConfig::default()));
        let residency = Arc::new(
            ResidencyQueue::new(device, EvictionPolicy::Immediate, Duration::from_secs(5)).unwrap(),
        );
        let gpu = SchedulerGpu::new(Arc::clone(&resources), residency).unwrap();
        Harness {
            dummy,
            resources,
            gpu,
            cpu: SchedulerCpu::new(4).unwrap(),
        }
    }

    fn run(harness: &Harness, graph: &NodeGraph) -> FrameResult<()> {
        let mut pipeline = Pipeline::new();
        pipeline.create_from_nodes_list(graph).unwrap();
        let frame = FrameContext::new(0, Duration::ZERO);
        harness.gpu.begin_frame(0);
        let result = harness.cpu.run_pipeline(&pipeline, &frame, &harness.resources, &harness.gpu);
        harness.gpu.finalize_frame(None).unwrap();
        result
    }

    fn texture(resources: &FrameResources) -> MemoryObject {
        MemoryObject::create_committed(
            resources.device(),
            &AllocationDesc::texture_2d(4, 4, 1, 4, HeapKind::Default),
        )
        .unwrap()
    }

    fn clear_node(name: &'static str, target: MemoryObject) -> Arc<FnNode> {
        Arc::new(FnNode::new(name, move || {
            let target = target.clone();
            TaskFragment::single(FnTask::new(name, move |ctx| {
                ctx.graphics_list()?.clear_render_target(&target, [0.0; 4])
            }))
        }))
    }

    #[test]
    fn test_dependencies_finish_first() {
        let harness = harness();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = NodeGraph::new();
        let mut handles = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let order = Arc::clone(&order);
            handles.push(graph.add_node(Arc::new(FnNode::new(name, move || {
                let order = Arc::clone(&order);
                TaskFragment::single(FnTask::new(name, move |_| {
                    order.lock().push(name);
                    Ok(())
                }))
            }))));
        }
        // a -> {b, c} -> d
        graph.add_dependency(handles[1], handles[0]).unwrap();
        graph.add_dependency(handles[2], handles[0]).unwrap();
        graph.add_dependency(handles[3], handles[1]).unwrap();
        graph.add_dependency(handles[3], handles[2]).unwrap();

        run(&harness, &graph).unwrap();
        let order = order.lock();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], "a");
        assert_eq!(order[3], "d");
    }

    #[test]
    fn test_forwarding_chain_submits_one_list() {
        let harness = harness();
        let target = texture(&harness.resources);
        let mut graph = NodeGraph::new();
        let a = graph.add_node(clear_node("a", target.clone()));
        let b = graph.add_node(clear_node("b", target.clone()));
        let c = graph.add_node(clear_node("c", target.clone()));
        graph.add_dependency(b, a).unwrap();
        graph.add_dependency(c, b).unwrap();

        run(&harness, &graph).unwrap();
        let lists = harness.dummy.submitted_lists();
        assert_eq!(lists.len(), 1);
        assert_eq!(target.state(0), ResourceState::RENDER_TARGET);
    }

    #[test]
    fn test_failure_stops_dependents() {
        let harness = harness();
        let reached = Arc::new(AtomicUsize::new(0));
        let mut graph = NodeGraph::new();
        let failing = graph.add_node(Arc::new(FnNode::new("failing", || {
            TaskFragment::single(FnTask::new("failing", |_| {
                Err(FrameError::InvalidBinding("bad slot".to_string()))
            }))
        })));
        let counter = Arc::clone(&reached);
        let dependent = graph.add_node(Arc::new(FnNode::new("dependent", move || {
            let counter = Arc::clone(&counter);
            TaskFragment::single(FnTask::new("dependent", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
        })));
        graph.add_dependency(dependent, failing).unwrap();

        let err = run(&harness, &graph).unwrap_err();
        assert_eq!(err, FrameError::InvalidBinding("bad slot".to_string()));
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panic_becomes_error() {
        let harness = harness();
        let mut graph = NodeGraph::new();
        graph.add_node(Arc::new(FnNode::new("panicking", || {
            TaskFragment::single(FnTask::new("panicking", |_| panic!("boom")))
        })));

        let err = run(&harness, &graph).unwrap_err();
        assert_eq!(
            err,
            FrameError::TaskPanicked {
                task: "panicking".to_string()
            }
        );
    }

    #[test]
    fn test_conflicting_setup_declaration_rejected() {
        let harness = harness();
        let target = texture(&harness.resources);
        let mut graph = NodeGraph::new();
        graph.add_node(Arc::new(FnNode::new("conflict", move || {
            let target = target.clone();
            TaskFragment::single(FnTask::new("conflict", |_| Ok(())).with_setup(move |ctx| {
                ctx.declare_usage(&target, Subresource::All, ResourceState::PIXEL_SHADER_RESOURCE)?;
                ctx.declare_usage(&target, Subresource::All, ResourceState::UNORDERED_ACCESS)
            }))
        })));

        let err = run(&harness, &graph).unwrap_err();
        assert!(matches!(err, FrameError::InvalidUsage(_)));
    }

    #[test]
    fn test_staged_uploads_recorded_first() {
        let harness = harness();
        let buffer = MemoryObject::create_committed(
            harness.resources.device(),
            &AllocationDesc::buffer(256, HeapKind::Default),
        )
        .unwrap();
        harness.resources.uploads().upload_buffer(&buffer, 0, &[7; 64]).unwrap();

        run(&harness, &NodeGraph::new()).unwrap();
        let lists = harness.dummy.submitted_lists();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].kind, CommandListKind::Copy);
        assert_eq!(buffer.state(0), ResourceState::COPY_DEST);
    }
}
