//! Non-evictable allocations.

use std::sync::Arc;

use crate::backend::Device;
use crate::error::FrameResult;
use crate::resources::MemoryObject;
use crate::types::{AllocationDesc, HeapKind, ResourceState};

/// Creates one committed allocation per request on the critical heap.
///
/// Critical allocations are always resident and never touched by the
/// residency queue. They are released as soon as the last handle drops.
#[derive(Debug, Clone)]
pub struct CriticalBufferHeap {
    device: Arc<dyn Device>,
}

impl CriticalBufferHeap {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self { device }
    }

    /// Create a critical buffer of `size` bytes.
    pub fn create_buffer(&self, size: u64, label: &str) -> FrameResult<MemoryObject> {
        self.create(&AllocationDesc::buffer(size, HeapKind::Critical).with_label(label))
    }

    /// Create a critical 2D texture.
    pub fn create_texture(
        &self,
        width: u32,
        height: u32,
        mip_levels: u32,
        bytes_per_pixel: u32,
        label: &str,
    ) -> FrameResult<MemoryObject> {
        self.create(
            &AllocationDesc::texture_2d(
                width,
                height,
                mip_levels,
                bytes_per_pixel,
                HeapKind::Critical,
            )
                .with_label(label),
        )
    }

    /// Create a critical allocation starting in `state`.
    pub fn create_with_state(
        &self,
        size: u64,
        state: ResourceState,
        label: &str,
    ) -> FrameResult<MemoryObject> {
        self.create(
            &AllocationDesc::buffer(size, HeapKind::Critical)
                .with_initial_state(state)
                .with_label(label),
        )
    }

    fn create(&self, desc: &AllocationDesc) -> FrameResult<MemoryObject> {
        // residency flags are meaningless for critical memory
        let mut desc = desc.clone();
        desc.create_not_resident = false;
        MemoryObject::create_committed(&self.device, &desc)
    }
}
