//! Residency of device memory.
//!
//! The [`ResidencyQueue`] runs two background workers:
//!
//! - the **init** worker makes the memory of a submission resident before the
//!   device queue is allowed to run it, and signals a fence value per batch;
//! - the **clean** worker waits until a submission's [`SyncPoint`] is reached,
//!   then evicts (or marks evictable) memory no other submission uses, and
//!   drops whatever the submission kept alive (pool handles, staging pages).
//!
//! Both workers block on their own threads. Callers never wait on them except
//! through [`ResidencyQueue::flush`].

use std::any::Any;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{AllocationId, Device, DeviceError, Fence};
use crate::error::{FrameError, FrameResult};
use crate::resources::{MemoryObject, WeakMemoryObject};
use crate::scheduler::SyncPoint;

/// What the clean worker does with memory no submission uses anymore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Evict as soon as the last submission using it completed.
    #[default]
    Immediate,
    /// Keep resident, but evict first when the device runs out of memory.
    Deferred,
}

/// Callback receiving errors raised on the residency workers.
pub type FailureHandler = Arc<dyn Fn(FrameError) + Send + Sync>;

/// Objects kept alive until a submission completed.
pub type Retained = Vec<Box<dyn Any + Send>>;

enum InitMessage {
    Batch {
        value: u64,
        resources: Vec<MemoryObject>,
    },
    Flush(mpsc::Sender<()>),
    Shutdown,
}

struct CleanBatch {
    wait_for: SyncPoint,
    resources: Vec<MemoryObject>,
    retained: Retained,
}

enum CleanMessage {
    Batch(CleanBatch),
    Flush(mpsc::Sender<()>),
    Shutdown,
}

struct InitSender {
    sender: mpsc::Sender<InitMessage>,
    next_value: u64,
}

struct Shared {
    device: Arc<dyn Device>,
    fence: Arc<dyn Fence>,
    policy: EvictionPolicy,
    timeout: Duration,
    handler: Mutex<Option<FailureHandler>>,
    evictable: Mutex<Vec<WeakMemoryObject>>,
    /// Serializes make-resident and evict decisions of the two workers.
    device_ops: Mutex<()>,
}

impl Shared {
    fn report(&self, err: FrameError) {
        log::error!("Residency worker failure: {err}");
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(err);
        }
    }

    fn make_resident(&self, resources: &[MemoryObject]) {
        let _ops = self.device_ops.lock();

        let pending: Vec<&MemoryObject> = resources
            .iter()
            .filter(|object| !object.lock_residency().resident)
            .collect();
        if pending.is_empty() {
            return;
        }
        let ids: Vec<AllocationId> = pending.iter().map(|object| object.allocation()).collect();

        let result = match self.device.make_resident(&ids) {
            Err(DeviceError::OutOfMemory) => {
                log::warn!(
                    "Out of device memory making {} allocations resident, evicting and retrying",
                    ids.len()
                );
                self.evict_evictable();
                self.device.make_resident(&ids)
            }
            other => other,
        };

        match result {
            Ok(()) => {
                for object in pending {
                    object.lock_residency().resident = true;
                }
            }
            Err(err) => self.report(FrameError::ResidencyFailure(format!(
                "could not make {} allocations resident: {err}",
                ids.len()
            ))),
        }
    }

    /// Evict everything on the evictable list that is still unused.
    fn evict_evictable(&self) {
        let candidates: Vec<WeakMemoryObject> = std::mem::take(&mut *self.evictable.lock());
        let victims: Vec<MemoryObject> = candidates
            .iter()
            .filter_map(WeakMemoryObject::upgrade)
            .filter(|object| {
                let mut residency = object.lock_residency();
                if residency.in_flight == 0 && residency.resident {
                    residency.resident = false;
                    true
                } else {
                    false
                }
            })
            .collect();
        self.evict(&victims);
    }

    fn evict(&self, victims: &[MemoryObject]) {
        if victims.is_empty() {
            return;
        }
        let ids: Vec<AllocationId> = victims.iter().map(MemoryObject::allocation).collect();
        log::debug!("Evicting {} allocations", ids.len());
        if let Err(err) = self.device.evict(&ids) {
            self.report(FrameError::ResidencyFailure(format!("eviction failed: {err}")));
        }
    }

    /// Release a batch whose point was reached, then drop what it retained.
    fn clean(&self, batch: CleanBatch) {
        let _ops = self.device_ops.lock();
        let mut victims = Vec::new();
        for object in &batch.resources {
            let mut residency = object.lock_residency();
            residency.in_flight = residency.in_flight.saturating_sub(1);
            if residency.in_flight > 0 || !residency.resident || !object.is_evictable() {
                continue;
            }
            match self.policy {
                EvictionPolicy::Immediate => {
                    residency.resident = false;
                    victims.push(object.clone());
                }
                EvictionPolicy::Deferred => self.evictable.lock().push(object.downgrade()),
            }
        }
        self.evict(&victims);
        drop(batch.retained);
    }

    /// Clean the parked batches whose point has been reached since.
    fn clean_reached(&self, parked: &mut Vec<CleanBatch>) {
        for batch in std::mem::take(parked) {
            if batch.wait_for.is_reached() {
                self.clean(batch);
            } else {
                parked.push(batch);
            }
        }
    }
}

/// FIFO residency work performed off the submission thread.
pub struct ResidencyQueue {
    shared: Arc<Shared>,
    init: Mutex<InitSender>,
    clean: Mutex<mpsc::Sender<CleanMessage>>,
    workers: Vec<JoinHandle<()>>,
}

impl ResidencyQueue {
    pub fn new(
        device: Arc<dyn Device>,
        policy: EvictionPolicy,
        timeout: Duration,
    ) -> FrameResult<Self> {
        let fence = device.create_fence(0)?;
        let shared = Arc::new(Shared {
            device,
            fence,
            policy,
            timeout,
            handler: Mutex::new(None),
            evictable: Mutex::new(Vec::new()),
            device_ops: Mutex::new(()),
        });

        let (init_tx, init_rx) = mpsc::channel();
        let (clean_tx, clean_rx) = mpsc::channel();

        let init_shared = Arc::clone(&shared);
        let init_worker = std::thread::Builder::new()
            .name("residency-init".to_string())
            .spawn(move || run_init_worker(&init_shared, init_rx))
            .map_err(|err| {
                FrameError::ResidencyFailure(format!("failed to start init worker: {err}"))
            })?;

        let clean_shared = Arc::clone(&shared);
        let clean_worker = std::thread::Builder::new()
            .name("residency-clean".to_string())
            .spawn(move || run_clean_worker(&clean_shared, clean_rx))
            .map_err(|err| {
                FrameError::ResidencyFailure(format!("failed to start clean worker: {err}"))
            })?;

        Ok(Self {
            shared,
            init: Mutex::new(InitSender {
                sender: init_tx,
                next_value: 0,
            }),
            clean: Mutex::new(clean_tx),
            workers: vec![init_worker, clean_worker],
        })
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.shared.policy
    }

    /// Register the callback for errors raised on the workers.
    pub fn set_failure_handler(&self, handler: FailureHandler) {
        *self.shared.handler.lock() = Some(handler);
    }

    /// Queue `resources` to be made resident.
    ///
    /// The returned point is reached once the batch was processed, even if
    /// it failed; failures go to the failure handler.
    pub fn enqueue_init(&self, resources: Vec<MemoryObject>) -> SyncPoint {
        for object in &resources {
            object.lock_residency().in_flight += 1;
        }

        let mut init = self.init.lock();
        init.next_value += 1;
        let value = init.next_value;
        if init
            .sender
            .send(InitMessage::Batch { value, resources })
            .is_err()
        {
            log::error!("Residency init worker is gone, signalling batch {value} directly");
            self.shared.fence.signal(value);
        }
        SyncPoint::new(Arc::clone(&self.shared.fence), value)
    }

    /// Release `resources` and drop `retained` once `wait_for` is reached.
    pub fn enqueue_clean(
        &self,
        wait_for: SyncPoint,
        resources: Vec<MemoryObject>,
        retained: Retained,
    ) {
        let message = CleanMessage::Batch(CleanBatch {
            wait_for,
            resources,
            retained,
        });
        if self.clean.lock().send(message).is_err() {
            log::error!("Residency clean worker is gone, dropping clean batch");
        }
    }

    /// Block until every batch queued so far was processed.
    pub fn flush(&self) {
        let (tx, rx) = mpsc::channel();
        if self.init.lock().sender.send(InitMessage::Flush(tx)).is_ok() {
            let _ = rx.recv();
        }
        let (tx, rx) = mpsc::channel();
        if self.clean.lock().send(CleanMessage::Flush(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    /// Number of objects waiting on the evictable list.
    pub fn evictable_count(&self) -> usize {
        self.shared.evictable.lock().len()
    }
}

impl Drop for ResidencyQueue {
    fn drop(&mut self) {
        let _ = self.init.lock().sender.send(InitMessage::Shutdown);
        let _ = self.clean.lock().send(CleanMessage::Shutdown);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Residency worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for ResidencyQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResidencyQueue")
            .field("policy", &self.shared.policy)
            .field("completed", &self.shared.fence.completed_value())
            .finish_non_exhaustive()
    }
}

fn run_init_worker(shared: &Shared, receiver: mpsc::Receiver<InitMessage>) {
    frameflow_core::set_thread_name!("residency-init");
    for message in receiver {
        match message {
            InitMessage::Batch { value, resources } => {
                frameflow_core::profile_scope!("residency_init");
                shared.make_resident(&resources);
                shared.fence.signal(value);
            }
            InitMessage::Flush(done) => {
                let _ = done.send(());
            }
            InitMessage::Shutdown => break,
        }
    }
}

fn run_clean_worker(shared: &Shared, receiver: mpsc::Receiver<CleanMessage>) {
    frameflow_core::set_thread_name!("residency-clean");
    // batches whose point timed out stay resident until it is reached
    let mut parked: Vec<CleanBatch> = Vec::new();
    for message in receiver {
        shared.clean_reached(&mut parked);
        match message {
            CleanMessage::Batch(batch) => match batch.wait_for.wait(shared.timeout) {
                Ok(()) => shared.clean(batch),
                Err(err) => {
                    shared.report(err);
                    parked.push(batch);
                }
            },
            CleanMessage::Flush(done) => {
                let _ = done.send(());
            }
            CleanMessage::Shutdown => break,
        }
    }
    if !parked.is_empty() {
        log::warn!(
            "Dropping {} clean batches whose sync point was never reached",
            parked.len()
        );
    }
}

static_assertions::assert_impl_all!(ResidencyQueue: Send, Sync);
