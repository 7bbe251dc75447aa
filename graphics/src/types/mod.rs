//! Common types and descriptors for device resources.
//!
//! This module contains resource states, heap kinds, allocation
//! descriptors and descriptor-heap handles used throughout the crate.

mod descriptor;
mod memory;
mod state;

pub use descriptor::{
    AddressMode, DescriptorHandle, DescriptorHeapId, DescriptorHeapKind, DescriptorRange,
    FilterMode, ViewDesc,
};
pub use memory::{AllocationDesc, HeapKind, MemoryLayout};
pub use state::ResourceState;
