//! Device memory.
//!
//! - [`MemoryObject`] - shared handle to a committed allocation with tracked
//!   per-subresource state and residency
//! - [`CriticalBufferHeap`] - non-evictable allocations
//! - [`ConstantBufferHeap`] - per-frame constant data
//! - [`UploadManager`] - staged copies into device-local memory
//! - [`PageRing`] - frame-tagged page allocator behind the last two

mod constant_heap;
mod critical_heap;
mod memory_object;
pub(crate) mod page_ring;
mod upload;

pub use constant_heap::{ConstantBuffer, ConstantBufferHeap};
pub use critical_heap::CriticalBufferHeap;
pub(crate) use memory_object::Residency;
pub use memory_object::{MemoryObject, ResourceId, Subresource, WeakMemoryObject};
pub use page_ring::{PageAllocation, PageRing};
pub use upload::{TextureRegion, UploadCopy, UploadManager};
