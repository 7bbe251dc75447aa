//! Shader-visible scratch descriptor heaps.

use std::sync::Arc;

use frameflow_core::pool::{ObjectPool, PoolHandle, PoolStats, Poolable};

use crate::backend::Device;
use crate::error::{FrameError, FrameResult};
use crate::types::{DescriptorHeapId, DescriptorHeapKind, DescriptorRange};

/// A shader-visible heap handed out as bump-allocated ranges.
///
/// Ranges are never freed individually. The whole heap is rewound when it
/// returns to its pool, which happens after every list using it finished.
pub struct ScratchDescriptorHeap {
    id: DescriptorHeapId,
    kind: DescriptorHeapKind,
    capacity: u32,
    cursor: u32,
    device: Arc<dyn Device>,
}

impl ScratchDescriptorHeap {
    pub fn new(
        device: Arc<dyn Device>,
        kind: DescriptorHeapKind,
        capacity: u32,
    ) -> FrameResult<Self> {
        let id = device.create_descriptor_heap(kind, capacity, true)?;
        log::trace!("Created {kind:?} scratch heap {id:?} with {capacity} descriptors");
        Ok(Self {
            id,
            kind,
            capacity,
            cursor: 0,
            device,
        })
    }

    pub fn id(&self) -> DescriptorHeapId {
        self.id
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Descriptors still available.
    pub fn remaining(&self) -> u32 {
        self.capacity - self.cursor
    }

    /// Reserve `count` consecutive descriptors.
    pub fn allocate(&mut self, count: u32) -> FrameResult<DescriptorRange> {
        if count > self.remaining() {
            return Err(FrameError::AllocationExhausted(format!(
                "{:?} scratch heap has {} of {} descriptors left, {count} requested",
                self.kind,
                self.remaining(),
                self.capacity
            )));
        }
        let start = self.cursor;
        self.cursor += count;
        Ok(DescriptorRange {
            heap: self.id,
            start,
            count,
        })
    }
}

impl Poolable for ScratchDescriptorHeap {
    fn reset(&mut self) {
        self.cursor = 0;
    }
}

impl Drop for ScratchDescriptorHeap {
    fn drop(&mut self) {
        self.device.destroy_descriptor_heap(self.id);
    }
}

impl std::fmt::Debug for ScratchDescriptorHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchDescriptorHeap")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("capacity", &self.capacity)
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// Scratch heap pools, one per descriptor heap kind.
#[derive(Clone)]
pub struct ScratchPools {
    device: Arc<dyn Device>,
    resources: ObjectPool<ScratchDescriptorHeap>,
    samplers: ObjectPool<ScratchDescriptorHeap>,
    resource_capacity: u32,
    sampler_capacity: u32,
}

impl ScratchPools {
    pub fn new(
        device: Arc<dyn Device>,
        resource_capacity: u32,
        sampler_capacity: u32,
        initial_size: usize,
    ) -> Self {
        Self {
            device,
            resources: ObjectPool::new("scratch_resource_heaps", initial_size),
            samplers: ObjectPool::new("scratch_sampler_heaps", initial_size),
            resource_capacity,
            sampler_capacity,
        }
    }

    /// Take a rewound heap of `kind`.
    pub fn acquire(
        &self,
        kind: DescriptorHeapKind,
    ) -> FrameResult<PoolHandle<ScratchDescriptorHeap>> {
        let (pool, capacity) = match kind {
            DescriptorHeapKind::Resources => (&self.resources, self.resource_capacity),
            DescriptorHeapKind::Samplers => (&self.samplers, self.sampler_capacity),
        };
        pool.acquire(|| ScratchDescriptorHeap::new(Arc::clone(&self.device), kind, capacity))
    }

    pub fn stats(&self, kind: DescriptorHeapKind) -> PoolStats {
        match kind {
            DescriptorHeapKind::Resources => self.resources.stats(),
            DescriptorHeapKind::Samplers => self.samplers.stats(),
        }
    }

    pub fn clear(&self) {
        self.resources.clear();
        self.samplers.clear();
    }
}

impl std::fmt::Debug for ScratchPools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchPools")
            .field("resources", &self.resources)
            .field("samplers", &self.samplers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    #[test]
    fn test_bump_allocation_and_exhaustion() {
        let device: Arc<dyn Device> = Arc::new(DummyDevice::new());
        let mut heap =
            ScratchDescriptorHeap::new(device, DescriptorHeapKind::Resources, 8).unwrap();

        let a = heap.allocate(5).unwrap();
        let b = heap.allocate(3).unwrap();
        assert_eq!(a.start, 0);
        assert_eq!(b.start, 5);
        assert_eq!(heap.remaining(), 0);
        assert!(matches!(heap.allocate(1), Err(FrameError::AllocationExhausted(_))));
    }

    #[test]
    fn test_pooled_heaps_are_rewound() {
        let device: Arc<dyn Device> = Arc::new(DummyDevice::new());
        let pools = ScratchPools::new(device, 16, 4, 1);

        let mut heap = pools.acquire(DescriptorHeapKind::Resources).unwrap();
        heap.allocate(16).unwrap();
        let id = heap.id();
        drop(heap);

        let heap = pools.acquire(DescriptorHeapKind::Resources).unwrap();
        assert_eq!(heap.id(), id);
        assert_eq!(heap.remaining(), 16);

        let samplers = pools.acquire(DescriptorHeapKind::Samplers).unwrap();
        assert_eq!(samplers.capacity(), 4);
    }
}
