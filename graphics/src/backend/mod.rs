//! Device abstraction layer.
//!
//! The frame scheduler never talks to a native graphics API directly. It
//! drives a [`Device`], the thin translation layer that owns queues,
//! allocations, descriptor heaps and fences.
//!
//! # Available Backends
//!
//! - [`DummyDevice`]: in-memory device for testing and development
//!
//! # Surface
//!
//! A device provides:
//! - Command allocators and lists of copy, compute and graphics kinds
//! - Monotonic fences ([`Fence`])
//! - Committed allocations with a heap kind and initial state
//! - Shader-visible and CPU-only descriptor heaps
//! - Batched submission of recorded command streams
//! - Residency control (make resident / evict)

pub mod dummy;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::command::{Command, CommandListKind};
use crate::types::{
    AllocationDesc, DescriptorHandle, DescriptorHeapId, DescriptorHeapKind, ViewDesc,
};

pub use dummy::DummyDevice;

/// Device error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("out of device memory")]
    OutOfMemory,
    #[error("device lost")]
    DeviceLost,
    #[error("fence wait for value {value} timed out after {waited:?}")]
    Timeout { value: u64, waited: Duration },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Handle to a committed allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationId(u64);

/// Handle to a command allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandAllocatorId(u64);

/// Handle to a native command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeListId(u64);

macro_rules! raw_handle {
    ($($name:ident),*) => {$(
        impl $name {
            /// Wrap a backend identifier.
            pub fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Backend identifier.
            pub fn raw(self) -> u64 {
                self.0
            }
        }
    )*};
}

raw_handle!(AllocationId, CommandAllocatorId, NativeListId);

/// A monotonic counter shared between the CPU and the device queue.
///
/// Values only move forward: signalling a value at or below the completed
/// value is a no-op, so a value once observed as reached stays reached.
pub trait Fence: Send + Sync + fmt::Debug {
    /// Highest value signalled so far.
    fn completed_value(&self) -> u64;

    /// Signal `value` from the CPU.
    fn signal(&self, value: u64);

    /// Block until `value` is reached or `timeout` elapses.
    fn wait(&self, value: u64, timeout: Duration) -> DeviceResult<()>;
}

/// One recorded list handed to [`Device::submit`].
#[derive(Debug, Clone, Copy)]
pub struct ListSubmission<'a> {
    pub list: NativeListId,
    pub kind: CommandListKind,
    pub commands: &'a [Command],
}

/// The device collaborator consumed by the scheduler.
///
/// Implementations must be callable from any thread. Submission and queue
/// signal/wait calls are issued from one dedicated thread only, in order.
pub trait Device: Send + Sync + 'static {
    /// Backend name for logging.
    fn name(&self) -> &str;

    // --- command recording objects ---

    fn create_command_allocator(&self, kind: CommandListKind) -> DeviceResult<CommandAllocatorId>;
    /// Reset an allocator whose lists are no longer executing.
    fn reset_command_allocator(&self, allocator: CommandAllocatorId) -> DeviceResult<()>;
    fn destroy_command_allocator(&self, allocator: CommandAllocatorId);
    fn create_command_list(
        &self,
        kind: CommandListKind,
        allocator: CommandAllocatorId,
    ) -> DeviceResult<NativeListId>;
    /// Reopen a list for recording against `allocator`.
    fn reset_command_list(
        &self,
        list: NativeListId,
        allocator: CommandAllocatorId,
    ) -> DeviceResult<()>;
    fn destroy_command_list(&self, list: NativeListId);

    // --- synchronization ---

    fn create_fence(&self, initial_value: u64) -> DeviceResult<Arc<dyn Fence>>;
    /// Make the queue signal `value` once previously submitted work finishes.
    fn queue_signal(&self, fence: &Arc<dyn Fence>, value: u64) -> DeviceResult<()>;
    /// Make the queue wait for `value` before executing later submissions.
    fn queue_wait(&self, fence: &Arc<dyn Fence>, value: u64) -> DeviceResult<()>;
    /// Block until every submitted batch has finished.
    fn wait_idle(&self) -> DeviceResult<()>;

    // --- memory ---

    fn create_committed(&self, desc: &AllocationDesc) -> DeviceResult<AllocationId>;
    fn release_allocation(&self, allocation: AllocationId);
    /// Device virtual address of the allocation start.
    fn gpu_address(&self, allocation: AllocationId) -> u64;
    /// Copy bytes into a host-visible allocation.
    fn write_allocation(
        &self,
        allocation: AllocationId,
        offset: u64,
        data: &[u8],
    ) -> DeviceResult<()>;
    fn make_resident(&self, allocations: &[AllocationId]) -> DeviceResult<()>;
    fn evict(&self, allocations: &[AllocationId]) -> DeviceResult<()>;

    // --- descriptors ---

    fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> DeviceResult<DescriptorHeapId>;
    fn destroy_descriptor_heap(&self, heap: DescriptorHeapId);
    fn write_descriptor(&self, dst: DescriptorHandle, view: &ViewDesc);
    /// Copy `count` consecutive descriptors from `src` to `dst`.
    fn copy_descriptors(&self, dst: DescriptorHandle, src: DescriptorHandle, count: u32);

    // --- submission ---

    /// Submit lists to the queue. They start in slice order.
    fn submit(&self, lists: &[ListSubmission<'_>]) -> DeviceResult<()>;
}

impl fmt::Debug for dyn Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device").field("name", &self.name()).finish()
    }
}
