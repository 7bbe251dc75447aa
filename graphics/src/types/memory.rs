//! Device memory descriptors.

use super::ResourceState;

/// Heap a device allocation lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// Device-local memory that must never be evicted.
    Critical,
    /// Device-local memory managed by the residency queue.
    Default,
    /// Host-visible memory the CPU writes and the device reads.
    Upload,
    /// Host-visible memory the device writes and the CPU reads.
    Readback,
}

impl HeapKind {
    /// Whether the CPU can write the allocation directly.
    pub fn is_host_visible(self) -> bool {
        matches!(self, Self::Upload | Self::Readback)
    }

    /// Whether the residency queue may evict allocations of this heap.
    pub fn is_evictable(self) -> bool {
        self == Self::Default
    }
}

/// Shape of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLayout {
    /// Linear buffer with a single subresource.
    Buffer,
    /// 2D texture, one subresource per mip level.
    Texture2d {
        width: u32,
        height: u32,
        mip_levels: u32,
        bytes_per_pixel: u32,
    },
}

impl MemoryLayout {
    /// Number of independently tracked subresources.
    pub fn subresource_count(&self) -> u32 {
        match self {
            Self::Buffer => 1,
            Self::Texture2d { mip_levels, .. } => (*mip_levels).max(1),
        }
    }

    /// Width and height of a mip level, `None` for buffers.
    pub fn mip_extent(&self, mip: u32) -> Option<(u32, u32)> {
        match self {
            Self::Buffer => None,
            Self::Texture2d { width, height, .. } => {
                Some(((width >> mip).max(1), (height >> mip).max(1)))
            }
        }
    }
}

/// Descriptor for creating a committed allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AllocationDesc {
    /// Debug label for the allocation.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Heap to allocate from.
    pub heap: HeapKind,
    /// Buffer or texture shape.
    pub layout: MemoryLayout,
    /// State every subresource starts in.
    pub initial_state: ResourceState,
    /// Create the allocation without making it resident.
    pub create_not_resident: bool,
}

impl AllocationDesc {
    /// Describe a buffer of `size` bytes.
    pub fn buffer(size: u64, heap: HeapKind) -> Self {
        let initial_state = match heap {
            HeapKind::Upload => ResourceState::GENERIC_READ,
            HeapKind::Readback => ResourceState::COPY_DEST,
            HeapKind::Critical | HeapKind::Default => ResourceState::COMMON,
        };
        Self {
            label: None,
            size,
            heap,
            layout: MemoryLayout::Buffer,
            initial_state,
            create_not_resident: false,
        }
    }

    /// Describe a 2D texture. The size covers the full mip chain.
    pub fn texture_2d(
        width: u32,
        height: u32,
        mip_levels: u32,
        bytes_per_pixel: u32,
        heap: HeapKind,
    ) -> Self {
        let layout = MemoryLayout::Texture2d {
            width,
            height,
            mip_levels: mip_levels.max(1),
            bytes_per_pixel,
        };
        let size = (0..layout.subresource_count())
            .filter_map(|mip| layout.mip_extent(mip))
            .map(|(w, h)| w as u64 * h as u64 * bytes_per_pixel as u64)
            .sum();
        Self {
            label: None,
            size,
            heap,
            layout,
            initial_state: ResourceState::COMMON,
            create_not_resident: false,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the initial state.
    pub fn with_initial_state(mut self, state: ResourceState) -> Self {
        self.initial_state = state;
        self
    }

    /// Create without making the allocation resident.
    pub fn not_resident(mut self) -> Self {
        self.create_not_resident = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_size_covers_mips() {
        let desc = AllocationDesc::texture_2d(4, 4, 3, 4, HeapKind::Default);
        // 4x4 + 2x2 + 1x1 pixels
        assert_eq!(desc.size, (16 + 4 + 1) * 4);
        assert_eq!(desc.layout.subresource_count(), 3);
        assert_eq!(desc.layout.mip_extent(2), Some((1, 1)));
    }

    #[test]
    fn test_upload_buffers_start_generic_read() {
        let desc = AllocationDesc::buffer(256, HeapKind::Upload);
        assert_eq!(desc.initial_state, ResourceState::GENERIC_READ);
        assert!(HeapKind::Upload.is_host_visible());
        assert!(!HeapKind::Critical.is_evictable());
    }
}
