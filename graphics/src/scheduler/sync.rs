//! CPU/GPU synchronization primitives.
//!
//! Every timeline in the scheduler (device queue, residency workers) is a
//! monotonic [`Fence`]. A [`SyncPoint`] names one value on one fence and is
//! the currency for "has this work completed".

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::backend::{DeviceError, DeviceResult, Fence};
use crate::error::FrameResult;

/// Monotonic fence signalled from the CPU.
///
/// Used as the fence implementation of the dummy device and for
/// CPU-only timelines.
#[derive(Debug, Default)]
pub struct CpuFence {
    value: Mutex<u64>,
    changed: Condvar,
}

impl CpuFence {
    /// Create a fence whose completed value is `initial_value`.
    pub fn new(initial_value: u64) -> Self {
        Self {
            value: Mutex::new(initial_value),
            changed: Condvar::new(),
        }
    }
}

impl Fence for CpuFence {
    fn completed_value(&self) -> u64 {
        *self.value.lock()
    }

    fn signal(&self, value: u64) {
        let mut current = self.value.lock();
        if value > *current {
            *current = value;
            self.changed.notify_all();
        }
    }

    fn wait(&self, value: u64, timeout: Duration) -> DeviceResult<()> {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut current = self.value.lock();
        while *current < value {
            if self.changed.wait_until(&mut current, deadline).timed_out() && *current < value {
                return Err(DeviceError::Timeout {
                    value,
                    waited: start.elapsed(),
                });
            }
        }
        Ok(())
    }
}

/// A target value on a fence.
///
/// Immutable once created. Cloning shares the fence.
#[derive(Debug, Clone)]
pub struct SyncPoint {
    fence: Arc<dyn Fence>,
    value: u64,
}

impl SyncPoint {
    /// Name `value` on `fence`.
    pub fn new(fence: Arc<dyn Fence>, value: u64) -> Self {
        Self { fence, value }
    }

    /// The fence this point lives on.
    pub fn fence(&self) -> &Arc<dyn Fence> {
        &self.fence
    }

    /// The target value.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Whether the fence has reached the target value (non-blocking).
    pub fn is_reached(&self) -> bool {
        self.fence.completed_value() >= self.value
    }

    /// Block until the target value is reached.
    ///
    /// A timeout is reported as device loss.
    pub fn wait(&self, timeout: Duration) -> FrameResult<()> {
        if self.is_reached() {
            return Ok(());
        }
        self.fence.wait(self.value, timeout)?;
        Ok(())
    }
}
