//! Submission thread.
//!
//! [`SchedulerGpu`] owns one dedicated thread that consumes a FIFO of
//! [`QueueItem`]s. For every run of consecutive lists it:
//!
//! 1. splits the run into batches that pass the hazard check,
//! 2. queues the batch's memory on the residency init worker and makes the
//!    device queue wait for it,
//! 3. injects barriers, submits, and signals the queue fence,
//! 4. hands the lists to the residency clean worker, which returns pooled
//!    objects once the signalled value is reached.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::backend::{Device, Fence, ListSubmission};
use crate::command::{CommandList, CommandListKind, RecordedList};
use crate::context::FrameResources;
use crate::error::{FrameError, FrameResult};
use crate::residency::{FailureHandler, ResidencyQueue};
use crate::resources::{MemoryObject, ResourceId, Subresource};
use crate::scheduler::SyncPoint;
use crate::scheduler::barriers::{StateSnapshot, inject_barriers, is_hazard_free};
use crate::types::ResourceState;

/// Work item of the submission thread.
pub enum QueueItem {
    List(RecordedList),
    /// Present `back_buffer` if set, then report the frame's final point.
    EndOfFrame {
        back_buffer: Option<MemoryObject>,
        done: mpsc::Sender<FrameResult<SyncPoint>>,
    },
    Shutdown,
}

#[derive(Debug, Default)]
struct Session {
    frame: u64,
    error: Option<FrameError>,
    batches: u64,
    lists: u64,
}

/// Counters of the current frame's submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmissionStats {
    pub batches: u64,
    pub lists: u64,
}

struct Shared {
    device: Arc<dyn Device>,
    resources: Arc<FrameResources>,
    residency: Arc<ResidencyQueue>,
    fence: Arc<dyn Fence>,
    /// Fence value of the last batch handed to the device.
    submitted: AtomicU64,
    queue: Mutex<VecDeque<QueueItem>>,
    available: Condvar,
    session: Mutex<Session>,
    callback: Mutex<Option<FailureHandler>>,
}

impl Shared {
    fn push(&self, item: QueueItem) {
        self.queue.lock().push_back(item);
        self.available.notify_one();
    }

    /// Block for the next item, then take every list directly behind it.
    fn pop_run(&self) -> (Vec<RecordedList>, Option<QueueItem>) {
        let mut queue = self.queue.lock();
        while queue.is_empty() {
            self.available.wait(&mut queue);
        }
        let mut lists = Vec::new();
        while let Some(item) = queue.pop_front() {
            match item {
                QueueItem::List(list) => lists.push(list),
                other => return (lists, Some(other)),
            }
        }
        (lists, None)
    }

    fn fail(&self, err: FrameError) {
        log::error!("Submission failed: {err}");
        {
            let mut session = self.session.lock();
            if session.error.is_none() {
                session.error = Some(err.clone());
            }
        }
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(err);
        }
    }
}

/// Worker-side state.
struct Submitter {
    shared: Arc<Shared>,
    last_value: u64,
}

impl Submitter {
    fn run(mut self) {
        frameflow_core::set_thread_name!("gpu-submit");
        loop {
            let (lists, control) = self.shared.pop_run();
            if !lists.is_empty() {
                self.submit_run(lists);
            }
            match control {
                Some(QueueItem::EndOfFrame { back_buffer, done }) => {
                    let result = self.end_frame(back_buffer);
                    let _ = done.send(result);
                }
                Some(QueueItem::Shutdown) => break,
                Some(QueueItem::List(_)) | None => {}
            }
        }
        log::debug!("Submission thread stopped");
    }

    fn submit_run(&mut self, lists: Vec<RecordedList>) {
        let mut batch: Vec<RecordedList> = Vec::new();
        for list in lists {
            if !batch.is_empty() && !is_hazard_free(&batch, &list) {
                self.submit_batch(std::mem::take(&mut batch));
            }
            batch.push(list);
        }
        if !batch.is_empty() {
            self.submit_batch(batch);
        }
    }

    fn submit_batch(&mut self, mut batch: Vec<RecordedList>) {
        frameflow_core::profile_scope!("submit_batch");

        let mut touched: BTreeMap<ResourceId, MemoryObject> = BTreeMap::new();
        for list in &batch {
            for object in list.usage().resources() {
                touched.entry(object.id()).or_insert_with(|| object.clone());
            }
        }
        let touched: Vec<MemoryObject> = touched.into_values().collect();
        let resident = self.shared.residency.enqueue_init(touched.clone());

        let poisoned = self
            .shared
            .session
            .lock()
            .error
            .as_ref()
            .is_some_and(FrameError::is_fatal);

        let result = if poisoned {
            log::warn!("Dropping batch of {} lists after device loss", batch.len());
            Err(None)
        } else {
            self.execute_batch(&mut batch, &resident).map_err(Some)
        };

        let mut retained = Vec::new();
        for list in batch {
            let (_, list_retained) = list.into_release();
            retained.extend(list_retained);
        }

        match result {
            Ok(point) => self.shared.residency.enqueue_clean(point, touched, retained),
            Err(err) => {
                if let Some(err) = err {
                    self.shared.fail(err);
                }
                // never executed; release as soon as residency caught up
                self.shared.residency.enqueue_clean(resident, touched, retained);
            }
        }
    }

    fn execute_batch(
        &mut self,
        batch: &mut [RecordedList],
        resident: &SyncPoint,
    ) -> FrameResult<SyncPoint> {
        let device = &self.shared.device;
        device.queue_wait(resident.fence(), resident.value())?;

        let mut snapshot = StateSnapshot::default();
        let transitions: usize = batch
            .iter_mut()
            .map(|list| inject_barriers(list, &mut snapshot))
            .sum();
        let submissions: Vec<ListSubmission<'_>> = batch
            .iter()
            .map(|list| ListSubmission {
                list: list.native_id(),
                kind: list.kind(),
                commands: list.commands(),
            })
            .collect();
        if let Err(err) = device.submit(&submissions) {
            // the lists never ran
            snapshot.restore();
            return Err(err.into());
        }

        self.last_value += 1;
        self.shared.submitted.store(self.last_value, Ordering::Release);
        device.queue_signal(&self.shared.fence, self.last_value)?;

        let mut session = self.shared.session.lock();
        session.batches += 1;
        session.lists += batch.len() as u64;
        log::trace!(
            "Frame {}: submitted {} lists ({transitions} transitions) as value {}",
            session.frame,
            batch.len(),
            self.last_value
        );
        Ok(SyncPoint::new(Arc::clone(&self.shared.fence), self.last_value))
    }

    fn end_frame(&mut self, back_buffer: Option<MemoryObject>) -> FrameResult<SyncPoint> {
        if let Some(back_buffer) = back_buffer {
            match self.present_list(&back_buffer) {
                Ok(list) => self.submit_batch(vec![list]),
                Err(err) => self.shared.fail(err),
            }
        }

        let mut session = self.shared.session.lock();
        frameflow_core::profile_plot!("submitted_batches", session.batches);
        log::debug!(
            "Frame {} finalized: {} batches, {} lists",
            session.frame,
            session.batches,
            session.lists
        );
        match session.error.take() {
            Some(err) => Err(err),
            None => Ok(SyncPoint::new(Arc::clone(&self.shared.fence), self.last_value)),
        }
    }

    fn present_list(&self, back_buffer: &MemoryObject) -> FrameResult<RecordedList> {
        let mut list = CommandList::new(&self.shared.resources, CommandListKind::Graphics)?;
        list.request_state(back_buffer, Subresource::All, ResourceState::PRESENT)?;
        Ok(list.finish())
    }
}

/// FIFO submission of recorded lists to the device queue.
pub struct SchedulerGpu {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl SchedulerGpu {
    pub fn new(
        resources: Arc<FrameResources>,
        residency: Arc<ResidencyQueue>,
    ) -> FrameResult<Self> {
        let device = Arc::clone(resources.device());
        let fence = device.create_fence(0)?;
        let shared = Arc::new(Shared {
            device,
            resources,
            residency,
            fence,
            submitted: AtomicU64::new(0),
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            session: Mutex::new(Session::default()),
            callback: Mutex::new(None),
        });

        let submitter = Submitter {
            shared: Arc::clone(&shared),
            last_value: 0,
        };
        let worker = std::thread::Builder::new()
            .name("gpu-submit".to_string())
            .spawn(move || submitter.run())
            .map_err(|err| {
                FrameError::DeviceLost(format!("failed to start submission thread: {err}"))
            })?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Register the callback receiving submission errors.
    pub fn set_error_callback(&self, callback: FailureHandler) {
        *self.shared.callback.lock() = Some(callback);
    }

    /// Open the submission session of `frame`.
    pub fn begin_frame(&self, frame: u64) {
        *self.shared.session.lock() = Session {
            frame,
            ..Session::default()
        };
    }

    pub fn enqueue_command_list(&self, list: RecordedList) {
        self.shared.push(QueueItem::List(list));
    }

    /// Present `back_buffer` if set and drain the queue.
    ///
    /// Returns the point reached once every list of the frame finished, or
    /// the first submission error of the frame.
    pub fn finalize_frame(&self, back_buffer: Option<MemoryObject>) -> FrameResult<SyncPoint> {
        frameflow_core::profile_function!();
        let (done, result) = mpsc::channel();
        self.shared.push(QueueItem::EndOfFrame { back_buffer, done });
        result
            .recv()
            .unwrap_or_else(|_| {
                Err(FrameError::DeviceLost(
                    "submission thread stopped".to_string(),
                ))
            })
    }

    /// Counters of the current session.
    pub fn stats(&self) -> SubmissionStats {
        let session = self.shared.session.lock();
        SubmissionStats {
            batches: session.batches,
            lists: session.lists,
        }
    }

    /// Point reached once every batch submitted so far finished.
    pub fn last_submitted(&self) -> SyncPoint {
        SyncPoint::new(
            Arc::clone(&self.shared.fence),
            self.shared.submitted.load(Ordering::Acquire),
        )
    }

    /// Highest value the device queue has reached.
    pub fn completed_value(&self) -> u64 {
        self.shared.fence.completed_value()
    }

    /// Block until the device and the residency workers are idle.
    pub fn wait_idle(&self) -> FrameResult<()> {
        self.shared.device.wait_idle()?;
        self.shared.residency.flush();
        Ok(())
    }
}

impl Drop for SchedulerGpu {
    fn drop(&mut self) {
        self.shared.push(QueueItem::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Submission thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for SchedulerGpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerGpu")
            .field("completed", &self.shared.fence.completed_value())
            .field("queued", &self.shared.queue.lock().len())
            .finish()
    }
}

static_assertions::assert_impl_all!(SchedulerGpu: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;
    use crate::command::Command;
    use crate::config::SchedulerConfig;
    use crate::residency::EvictionPolicy;
    use crate::types::{AllocationDesc, HeapKind};
    use std::time::Duration;

    fn setup() -> (Arc<DummyDevice>, Arc<FrameResources>, SchedulerGpu) {
        let dummy = Arc::new(DummyDevice::new());
        let device: Arc<dyn Device> = dummy.clone();
        let resources = Arc::new(FrameResources::new(device.clone(), &SchedulerConfig::default()));
        let residency = Arc::new(
            ResidencyQueue::new(device, EvictionPolicy::Immediate, Duration::from_secs(5)).unwrap(),
        );
        let gpu = SchedulerGpu::new(Arc::clone(&resources), residency).unwrap();
        (dummy, resources, gpu)
    }

    fn texture(resources: &FrameResources) -> MemoryObject {
        MemoryObject::create_committed(
            resources.device(),
            &AllocationDesc::texture_2d(8, 8, 1, 4, HeapKind::Default),
        )
        .unwrap()
    }

    fn list_requesting(
        resources: &Arc<FrameResources>,
        object: &MemoryObject,
        state: ResourceState,
    ) -> RecordedList {
        let mut list = CommandList::new(resources, CommandListKind::Graphics).unwrap();
        list.request_state(object, Subresource::All, state).unwrap();
        list.finish()
    }

    #[test]
    fn test_independent_lists_share_a_batch() {
        let (dummy, resources, gpu) = setup();
        let a = texture(&resources);
        let b = texture(&resources);
        gpu.begin_frame(0);
        gpu.enqueue_command_list(list_requesting(&resources, &a, ResourceState::RENDER_TARGET));
        gpu.enqueue_command_list(list_requesting(&resources, &b, ResourceState::RENDER_TARGET));
        let point = gpu.finalize_frame(None).unwrap();

        assert!(point.is_reached());
        let batches = dummy.submitted_batches();
        let total: usize = batches.iter().map(|batch| batch.lists.len()).sum();
        assert_eq!(total, 2);
        // both may land in one batch unless the thread woke in between
        assert!(batches.len() <= 2);
    }

    #[test]
    fn test_conflicting_lists_split_batches() {
        let (dummy, resources, gpu) = setup();
        let target = texture(&resources);
        gpu.begin_frame(0);
        gpu.enqueue_command_list(list_requesting(
            &resources,
            &target,
            ResourceState::RENDER_TARGET,
        ));
        gpu.enqueue_command_list(list_requesting(
            &resources,
            &target,
            ResourceState::PIXEL_SHADER_RESOURCE,
        ));
        gpu.finalize_frame(None).unwrap();

        let batches = dummy.submitted_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(target.state(0), ResourceState::PIXEL_SHADER_RESOURCE);
        for batch in &batches {
            assert!(matches!(batch.lists[0].commands[0], Command::Barrier(_)));
        }
    }

    #[test]
    fn test_back_buffer_presented() {
        let (_dummy, resources, gpu) = setup();
        let back_buffer = texture(&resources);
        gpu.begin_frame(0);
        gpu.enqueue_command_list(list_requesting(
            &resources,
            &back_buffer,
            ResourceState::RENDER_TARGET,
        ));
        gpu.finalize_frame(Some(back_buffer.clone())).unwrap();
        assert_eq!(back_buffer.state(0), ResourceState::PRESENT);
    }

    #[test]
    fn test_submit_failure_reported() {
        let (dummy, resources, gpu) = setup();
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        gpu.set_error_callback(Arc::new(move |err| sink.lock().push(err)));

        let target = texture(&resources);
        dummy.fail_next_submit(1);
        gpu.begin_frame(0);
        gpu.enqueue_command_list(list_requesting(
            &resources,
            &target,
            ResourceState::RENDER_TARGET,
        ));
        let err = gpu.finalize_frame(None).unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(reported.lock().len(), 1);

        // next frame submits again
        gpu.begin_frame(1);
        gpu.enqueue_command_list(list_requesting(
            &resources,
            &target,
            ResourceState::RENDER_TARGET,
        ));
        gpu.finalize_frame(None).unwrap();
    }

    #[test]
    fn test_rejected_submit_keeps_tracked_state() {
        let (dummy, resources, gpu) = setup();
        let target = texture(&resources);
        dummy.reject_next_submit(1);
        gpu.begin_frame(0);
        gpu.enqueue_command_list(list_requesting(
            &resources,
            &target,
            ResourceState::RENDER_TARGET,
        ));
        let err = gpu.finalize_frame(None).unwrap_err();

        assert!(!err.is_fatal());
        assert!(dummy.submitted_lists().is_empty());
        assert_eq!(gpu.last_submitted().value(), 0);
        assert_eq!(target.state(0), ResourceState::COMMON);

        // the first list that runs still gets its transition
        gpu.begin_frame(1);
        gpu.enqueue_command_list(list_requesting(
            &resources,
            &target,
            ResourceState::RENDER_TARGET,
        ));
        gpu.finalize_frame(None).unwrap();
        let lists = dummy.submitted_lists();
        assert_eq!(lists.len(), 1);
        let Command::Barrier(transitions) = &lists[0].commands[0] else {
            panic!("expected a leading barrier");
        };
        assert_eq!(transitions[0].before, ResourceState::COMMON);
        assert_eq!(transitions[0].after, ResourceState::RENDER_TARGET);
        assert_eq!(target.state(0), ResourceState::RENDER_TARGET);
    }

    #[test]
    fn test_pooled_lists_return_after_completion() {
        let (_dummy, resources, gpu) = setup();
        let target = texture(&resources);
        gpu.begin_frame(0);
        gpu.enqueue_command_list(list_requesting(
            &resources,
            &target,
            ResourceState::RENDER_TARGET,
        ));
        gpu.finalize_frame(None).unwrap();
        gpu.wait_idle().unwrap();

        let (allocators, lists) = resources.command_pools().stats(CommandListKind::Graphics);
        assert_eq!(allocators.in_use, 0);
        assert_eq!(lists.in_use, 0);
    }
}
