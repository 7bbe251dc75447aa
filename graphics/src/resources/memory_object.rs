//! Shared handles to device allocations.

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::backend::{AllocationId, Device};
use crate::error::{FrameError, FrameResult};
use crate::types::{AllocationDesc, HeapKind, MemoryLayout, ResourceState};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`MemoryObject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identifier, for logging.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Selects subresources of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subresource {
    /// Every subresource.
    All,
    /// A single subresource (mip level for textures).
    Index(u32),
}

impl Subresource {
    /// Subresource indices selected out of `count`.
    pub fn indices(self, count: u32) -> Range<u32> {
        match self {
            Self::All => 0..count,
            Self::Index(index) => index..index + 1,
        }
    }
}

/// Residency bookkeeping, mutated only by the residency queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Residency {
    pub(crate) resident: bool,
    /// Submissions that still use the allocation.
    pub(crate) in_flight: u32,
}

struct MemoryInner {
    id: ResourceId,
    allocation: AllocationId,
    heap: HeapKind,
    size: u64,
    layout: MemoryLayout,
    gpu_address: u64,
    states: Mutex<Vec<ResourceState>>,
    residency: Mutex<Residency>,
    name: Mutex<String>,
    device: Arc<dyn Device>,
}

impl Drop for MemoryInner {
    fn drop(&mut self) {
        log::trace!(
            "Releasing allocation {:?} ({}, {} bytes)",
            self.allocation,
            self.name.get_mut(),
            self.size
        );
        self.device.release_allocation(self.allocation);
    }
}

/// Reference-counted handle to a committed device allocation.
///
/// Clones share the allocation, its per-subresource state and its residency
/// flag. The allocation is released when the last clone drops.
///
/// Tracked state is the state the device will see once every list submitted
/// so far has executed. It is advanced only by barrier injection on the
/// submission thread.
#[derive(Clone)]
pub struct MemoryObject {
    inner: Arc<MemoryInner>,
}

impl MemoryObject {
    /// Create a committed allocation described by `desc`.
    pub fn create_committed(device: &Arc<dyn Device>, desc: &AllocationDesc) -> FrameResult<Self> {
        if desc.size == 0 {
            return Err(FrameError::InvalidUsage(
                "committed allocation of zero bytes".to_string(),
            ));
        }

        let allocation = device.create_committed(desc)?;
        let subresources = desc.layout.subresource_count() as usize;
        let name = desc.label.clone().unwrap_or_default();

        log::trace!(
            "Created {:?} allocation {:?} '{}' ({} bytes)",
            desc.heap,
            allocation,
            name,
            desc.size
        );

        Ok(Self {
            inner: Arc::new(MemoryInner {
                id: ResourceId::next(),
                allocation,
                heap: desc.heap,
                size: desc.size,
                layout: desc.layout,
                gpu_address: device.gpu_address(allocation),
                states: Mutex::new(vec![desc.initial_state; subresources]),
                residency: Mutex::new(Residency {
                    resident: !desc.create_not_resident,
                    in_flight: 0,
                }),
                name: Mutex::new(name),
                device: Arc::clone(device),
            }),
        })
    }

    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    pub fn allocation(&self) -> AllocationId {
        self.inner.allocation
    }

    pub fn heap(&self) -> HeapKind {
        self.inner.heap
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.inner.size
    }

    pub fn layout(&self) -> MemoryLayout {
        self.inner.layout
    }

    pub fn subresource_count(&self) -> u32 {
        self.inner.layout.subresource_count()
    }

    /// Device virtual address of the first byte.
    pub fn gpu_address(&self) -> u64 {
        self.inner.gpu_address
    }

    pub fn name(&self) -> String {
        self.inner.name.lock().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.inner.name.lock() = name.into();
    }

    /// Tracked state of one subresource.
    ///
    /// # Panics
    ///
    /// Panics if `subresource` is out of range.
    pub fn state(&self, subresource: u32) -> ResourceState {
        self.inner.states.lock()[subresource as usize]
    }

    /// Tracked state of every subresource.
    pub fn states(&self) -> Vec<ResourceState> {
        self.inner.states.lock().clone()
    }

    pub(crate) fn lock_states(&self) -> MutexGuard<'_, Vec<ResourceState>> {
        self.inner.states.lock()
    }

    /// Whether the allocation currently occupies device memory.
    pub fn is_resident(&self) -> bool {
        self.inner.residency.lock().resident
    }

    /// Whether the residency queue may evict the allocation.
    pub fn is_evictable(&self) -> bool {
        self.inner.heap.is_evictable()
    }

    pub(crate) fn lock_residency(&self) -> MutexGuard<'_, Residency> {
        self.inner.residency.lock()
    }

    /// Write bytes into a host-visible allocation.
    pub fn write(&self, offset: u64, data: &[u8]) -> FrameResult<()> {
        if !self.inner.heap.is_host_visible() {
            return Err(FrameError::InvalidUsage(format!(
                "allocation '{}' lives in a {:?} heap and is not host visible",
                self.name(),
                self.inner.heap
            )));
        }
        if offset + data.len() as u64 > self.inner.size {
            return Err(FrameError::InvalidUsage(format!(
                "write of {} bytes at {offset} overflows allocation of {} bytes",
                data.len(),
                self.inner.size
            )));
        }
        self.inner.device.write_allocation(self.inner.allocation, offset, data)?;
        Ok(())
    }

    /// Non-owning handle that does not keep the allocation alive.
    pub fn downgrade(&self) -> WeakMemoryObject {
        WeakMemoryObject(Arc::downgrade(&self.inner))
    }

    /// Number of live handles.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl PartialEq for MemoryObject {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for MemoryObject {}

impl fmt::Debug for MemoryObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryObject")
            .field("id", &self.inner.id)
            .field("name", &*self.inner.name.lock())
            .field("heap", &self.inner.heap)
            .field("size", &self.inner.size)
            .finish_non_exhaustive()
    }
}

/// Weak counterpart of [`MemoryObject`].
#[derive(Clone)]
pub struct WeakMemoryObject(Weak<MemoryInner>);

impl WeakMemoryObject {
    /// Recover a strong handle if the allocation is still alive.
    pub fn upgrade(&self) -> Option<MemoryObject> {
        self.0.upgrade().map(|inner| MemoryObject { inner })
    }
}

impl fmt::Debug for WeakMemoryObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakMemoryObject(alive: {})", self.0.strong_count() > 0)
    }
}

static_assertions::assert_impl_all!(MemoryObject: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    #[test]
    fn test_release_on_last_drop() {
        let dummy = Arc::new(DummyDevice::new());
        let device: Arc<dyn Device> = dummy.clone();
        let memory =
            MemoryObject::create_committed(&device, &AllocationDesc::buffer(64, HeapKind::Default))
                .unwrap();
        let clone = memory.clone();
        assert_eq!(dummy.live_allocation_count(), 1);

        drop(memory);
        assert_eq!(dummy.live_allocation_count(), 1);
        drop(clone);
        assert_eq!(dummy.live_allocation_count(), 0);
    }

    #[test]
    fn test_initial_state_and_residency() {
        let device: Arc<dyn Device> = Arc::new(DummyDevice::new());
        let desc = AllocationDesc::texture_2d(8, 8, 4, 4, HeapKind::Default)
            .with_initial_state(ResourceState::COPY_DEST)
            .not_resident()
            .with_label("albedo");
        let memory = MemoryObject::create_committed(&device, &desc).unwrap();

        assert_eq!(memory.subresource_count(), 4);
        assert!(memory.states().iter().all(|&s| s == ResourceState::COPY_DEST));
        assert!(!memory.is_resident());
        assert_eq!(memory.name(), "albedo");
    }

    #[test]
    fn test_write_requires_host_visible_heap() {
        let device: Arc<dyn Device> = Arc::new(DummyDevice::new());
        let memory =
            MemoryObject::create_committed(&device, &AllocationDesc::buffer(16, HeapKind::Default))
                .unwrap();
        assert!(matches!(memory.write(0, &[1, 2, 3]), Err(FrameError::InvalidUsage(_))));

        let upload =
            MemoryObject::create_committed(&device, &AllocationDesc::buffer(16, HeapKind::Upload))
                .unwrap();
        upload.write(4, &[1, 2, 3, 4]).unwrap();
        assert!(matches!(upload.write(14, &[0; 4]), Err(FrameError::InvalidUsage(_))));
    }

    #[test]
    fn test_subresource_selection() {
        assert_eq!(Subresource::All.indices(3), 0..3);
        assert_eq!(Subresource::Index(2).indices(3), 2..3);
    }
}
