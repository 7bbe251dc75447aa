//! CPU-only descriptor storage for views created while recording.

use std::sync::Arc;

use crate::backend::Device;
use crate::error::FrameResult;
use crate::types::{DescriptorHandle, DescriptorHeapId, DescriptorHeapKind, ViewDesc};

/// Growable non-shader-visible descriptor storage owned by one list.
///
/// Views written here are copied into scratch heaps when bound. The heap
/// travels with its list and is destroyed after the list finished executing.
pub struct TransientViewHeap {
    kind: DescriptorHeapKind,
    chunk_size: u32,
    chunks: Vec<DescriptorHeapId>,
    used: u32,
    device: Arc<dyn Device>,
}

impl TransientViewHeap {
    pub fn new(device: Arc<dyn Device>, kind: DescriptorHeapKind, chunk_size: u32) -> Self {
        Self {
            kind,
            chunk_size: chunk_size.max(1),
            chunks: Vec::new(),
            used: 0,
            device,
        }
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    /// Descriptors written so far.
    pub fn view_count(&self) -> u32 {
        self.chunks.len().saturating_sub(1) as u32 * self.chunk_size + self.used
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Write `view` into the next free slot.
    pub fn create_view(&mut self, view: &ViewDesc) -> FrameResult<DescriptorHandle> {
        let heap = match self.chunks.last() {
            Some(&heap) if self.used < self.chunk_size => heap,
            _ => {
                let heap = self
                    .device
                    .create_descriptor_heap(self.kind, self.chunk_size, false)?;
                self.chunks.push(heap);
                self.used = 0;
                heap
            }
        };
        let handle = DescriptorHandle::new(heap, self.used);
        self.used += 1;
        self.device.write_descriptor(handle, view);
        Ok(handle)
    }
}

impl Drop for TransientViewHeap {
    fn drop(&mut self) {
        for heap in self.chunks.drain(..) {
            self.device.destroy_descriptor_heap(heap);
        }
    }
}

impl std::fmt::Debug for TransientViewHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientViewHeap")
            .field("kind", &self.kind)
            .field("chunks", &self.chunks.len())
            .field("views", &self.view_count())
            .finish()
    }
}
