//! Per-frame constant buffer memory.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::Device;
use crate::error::FrameResult;
use crate::resources::{PageAllocation, PageRing};
use crate::types::{HeapKind, ViewDesc};

/// Constant data written once and read by the device in the same frame.
#[derive(Debug, Clone)]
pub struct ConstantBuffer {
    pub allocation: PageAllocation,
}

impl ConstantBuffer {
    /// Address bound through a buffer-view root entry.
    pub fn gpu_address(&self) -> u64 {
        self.allocation.gpu_address()
    }

    /// View for binding through a descriptor table.
    pub fn view(&self) -> ViewDesc {
        ViewDesc::ConstantBuffer {
            allocation: self.allocation.memory.allocation(),
            offset: self.allocation.offset,
            size: self.allocation.size,
        }
    }
}

/// Sub-allocates constant buffers from frame-tagged upload pages.
pub struct ConstantBufferHeap {
    ring: Mutex<PageRing>,
}

impl ConstantBufferHeap {
    pub fn new(
        device: Arc<dyn Device>,
        page_size: u64,
        alignment: u64,
        max_large_pages: usize,
    ) -> Self {
        Self {
            ring: Mutex::new(PageRing::new(
                device,
                "constant_pages",
                HeapKind::Upload,
                page_size,
                alignment,
                max_large_pages,
            )),
        }
    }

    /// Copy `data` into fresh constant memory.
    pub fn create_constant_buffer(&self, data: &[u8]) -> FrameResult<ConstantBuffer> {
        let allocation = self.ring.lock().allocate(data.len() as u64)?;
        allocation.write(data)?;
        Ok(ConstantBuffer { allocation })
    }

    pub fn begin_frame(&self, frame: u64) {
        self.ring.lock().begin_frame(frame);
    }

    pub fn frame_completed(&self, frame: u64) {
        self.ring.lock().frame_completed(frame);
    }

    /// Number of pages currently owned, large pages included.
    pub fn page_count(&self) -> usize {
        let ring = self.ring.lock();
        ring.page_count() + ring.large_page_count()
    }

    pub fn clear(&self) {
        self.ring.lock().clear();
    }
}

impl std::fmt::Debug for ConstantBufferHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstantBufferHeap")
            .field("ring", &*self.ring.lock())
            .finish()
    }
}
