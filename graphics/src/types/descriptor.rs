//! Descriptor heap handles and view descriptions.

use crate::backend::AllocationId;

/// Device descriptor heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorHeapId(u64);

impl DescriptorHeapId {
    /// Wrap a backend heap identifier.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Backend heap identifier.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// What a descriptor heap stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    /// Constant buffer, shader resource and unordered access views.
    Resources,
    /// Samplers.
    Samplers,
}

/// A single descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorHandle {
    pub heap: DescriptorHeapId,
    pub index: u32,
}

impl DescriptorHandle {
    /// Create a handle to slot `index` of `heap`.
    pub fn new(heap: DescriptorHeapId, index: u32) -> Self {
        Self { heap, index }
    }

    /// Handle `count` slots further into the same heap.
    pub fn offset(self, count: u32) -> Self {
        Self {
            heap: self.heap,
            index: self.index + count,
        }
    }
}

/// A contiguous run of descriptor slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    pub heap: DescriptorHeapId,
    pub start: u32,
    pub count: u32,
}

impl DescriptorRange {
    /// Handle of the `index`-th slot.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the range.
    pub fn handle(&self, index: u32) -> DescriptorHandle {
        assert!(index < self.count, "descriptor index {index} outside range of {}", self.count);
        DescriptorHandle::new(self.heap, self.start + index)
    }

    /// Handle of the first slot.
    pub fn base(&self) -> DescriptorHandle {
        DescriptorHandle::new(self.heap, self.start)
    }
}

/// Texture filtering mode for samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

/// Texture addressing mode for samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Clamp,
    Repeat,
}

/// What a descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewDesc {
    /// Constant buffer view over a byte range.
    ConstantBuffer {
        allocation: AllocationId,
        offset: u64,
        size: u64,
    },
    /// Read-only view; `None` covers every subresource.
    ShaderResource {
        allocation: AllocationId,
        subresource: Option<u32>,
    },
    /// Read-write view of one subresource.
    UnorderedAccess {
        allocation: AllocationId,
        subresource: u32,
    },
    /// Sampler state.
    Sampler {
        filter: FilterMode,
        address: AddressMode,
    },
}
