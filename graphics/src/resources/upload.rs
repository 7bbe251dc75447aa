//! Staged uploads into device-local memory.
//!
//! [`UploadManager`] copies caller data into upload pages right away and
//! queues a device copy for the next upload task. Queues are kept per frame:
//! uploads requested while frame `N` runs are copied at the start of frame
//! `N + 1`, so staging pages are tagged one frame ahead.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::Device;
use crate::error::{FrameError, FrameResult};
use crate::resources::page_ring::align_up;
use crate::resources::{MemoryObject, PageAllocation, PageRing};
use crate::types::{HeapKind, MemoryLayout};

/// Texel rectangle inside one texture subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TextureRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Region covering a whole `width` x `height` subresource.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// A pending staged copy.
#[derive(Debug, Clone)]
pub enum UploadCopy {
    Buffer {
        target: MemoryObject,
        offset: u64,
        source: PageAllocation,
    },
    Texture {
        target: MemoryObject,
        subresource: u32,
        region: TextureRegion,
        source: PageAllocation,
        row_pitch: u32,
    },
}

impl UploadCopy {
    pub fn target(&self) -> &MemoryObject {
        match self {
            Self::Buffer { target, .. } | Self::Texture { target, .. } => target,
        }
    }
}

struct UploadState {
    ring: PageRing,
    queues: VecDeque<Vec<UploadCopy>>,
}

/// Per-frame upload queues over a shared staging ring.
pub struct UploadManager {
    state: Mutex<UploadState>,
    row_pitch_alignment: u32,
}

impl UploadManager {
    /// Row pitch alignment of staged texture data.
    pub const ROW_PITCH_ALIGNMENT: u32 = 256;

    pub fn new(
        device: Arc<dyn Device>,
        page_size: u64,
        alignment: u64,
        max_large_pages: usize,
    ) -> Self {
        let mut queues = VecDeque::new();
        queues.push_back(Vec::new());
        Self {
            state: Mutex::new(UploadState {
                ring: PageRing::new(
                    device,
                    "upload_pages",
                    HeapKind::Upload,
                    page_size,
                    alignment,
                    max_large_pages,
                ),
                queues,
            }),
            row_pitch_alignment: Self::ROW_PITCH_ALIGNMENT,
        }
    }

    /// Stage `data` for a copy into `target` at `offset`.
    pub fn upload_buffer(
        &self,
        target: &MemoryObject,
        offset: u64,
        data: &[u8],
    ) -> FrameResult<()> {
        if target.layout() != MemoryLayout::Buffer {
            return Err(FrameError::InvalidUsage(format!(
                "buffer upload into texture '{}'",
                target.name()
            )));
        }
        if data.is_empty() {
            return Err(FrameError::InvalidUsage(format!(
                "empty upload into '{}'",
                target.name()
            )));
        }
        let end = offset.checked_add(data.len() as u64);
        if end.is_none_or(|end| end > target.size()) {
            return Err(FrameError::InvalidUsage(format!(
                "upload of {} bytes at offset {offset} overflows '{}' ({} bytes)",
                data.len(),
                target.name(),
                target.size()
            )));
        }

        let mut state = self.state.lock();
        let source = state.ring.allocate(data.len() as u64)?;
        source.write(data)?;
        state.push(UploadCopy::Buffer {
            target: target.clone(),
            offset,
            source,
        });
        Ok(())
    }

    /// Stage tightly packed texel rows for a copy into `region` of one subresource.
    pub fn upload_texture(
        &self,
        target: &MemoryObject,
        subresource: u32,
        region: TextureRegion,
        data: &[u8],
    ) -> FrameResult<()> {
        let MemoryLayout::Texture2d { bytes_per_pixel, .. } = target.layout() else {
            return Err(FrameError::InvalidUsage(format!(
                "texture upload into buffer '{}'",
                target.name()
            )));
        };
        let Some((mip_width, mip_height)) = target.layout().mip_extent(subresource) else {
            return Err(FrameError::InvalidUsage(format!(
                "texture upload into buffer '{}'",
                target.name()
            )));
        };
        if subresource >= target.subresource_count() {
            return Err(FrameError::InvalidUsage(format!(
                "subresource {subresource} out of range for '{}'",
                target.name()
            )));
        }
        let fits = |start: u32, extent: u32, limit: u32| {
            extent > 0 && start.checked_add(extent).is_some_and(|end| end <= limit)
        };
        if !fits(region.x, region.width, mip_width) || !fits(region.y, region.height, mip_height) {
            return Err(FrameError::InvalidUsage(format!(
                "region {region:?} outside {mip_width}x{mip_height} \
                 subresource {subresource} of '{}'",
                target.name()
            )));
        }

        let row_bytes = region.width as u64 * bytes_per_pixel as u64;
        let expected = row_bytes * region.height as u64;
        if data.len() as u64 != expected {
            return Err(FrameError::InvalidUsage(format!(
                "texture upload expects {expected} bytes, got {}",
                data.len()
            )));
        }

        let row_pitch = align_up(row_bytes, self.row_pitch_alignment as u64);
        let mut state = self.state.lock();
        let source = state.ring.allocate(row_pitch * region.height as u64)?;
        for (row, bytes) in data.chunks_exact(row_bytes as usize).enumerate() {
            source.write_at(row as u64 * row_pitch, bytes)?;
        }
        state.push(UploadCopy::Texture {
            target: target.clone(),
            subresource,
            region,
            source,
            row_pitch: row_pitch as u32,
        });
        Ok(())
    }

    /// Open the queue for uploads requested while `frame` runs.
    pub fn begin_frame(&self, frame: u64) {
        let mut state = self.state.lock();
        state.ring.begin_frame(frame + 1);
        state.queues.push_back(Vec::new());
    }

    pub fn frame_completed(&self, frame: u64) {
        self.state.lock().ring.frame_completed(frame);
    }

    /// Take the oldest queue of staged copies.
    pub fn take_queued_uploads(&self) -> Vec<UploadCopy> {
        let mut state = self.state.lock();
        let uploads = state.queues.pop_front().unwrap_or_default();
        if state.queues.is_empty() {
            state.queues.push_back(Vec::new());
        }
        uploads
    }

    /// Number of staged copies across all queues.
    pub fn pending_count(&self) -> usize {
        self.state.lock().queues.iter().map(Vec::len).sum()
    }

    /// Drop every queued copy and staging page.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.queues.clear();
        state.queues.push_back(Vec::new());
        state.ring.clear();
    }
}

impl UploadState {
    fn push(&mut self, copy: UploadCopy) {
        if self.queues.is_empty() {
            self.queues.push_back(Vec::new());
        }
        if let Some(queue) = self.queues.back_mut() {
            queue.push(copy);
        }
    }
}

impl std::fmt::Debug for UploadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("UploadManager")
            .field("ring", &state.ring)
            .field("queues", &state.queues.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;
    use crate::types::AllocationDesc;

    fn setup() -> (Arc<DummyDevice>, Arc<dyn Device>, UploadManager) {
        let dummy = Arc::new(DummyDevice::new());
        let device: Arc<dyn Device> = dummy.clone();
        let uploads = UploadManager::new(device.clone(), 64 * 1024, 512, 5);
        (dummy, device, uploads)
    }

    #[test]
    fn test_buffer_upload_is_queued() {
        let (_dummy, device, uploads) = setup();
        let target =
            MemoryObject::create_committed(&device, &AllocationDesc::buffer(64, HeapKind::Default))
                .unwrap();

        uploads.upload_buffer(&target, 16, &[1; 32]).unwrap();
        assert_eq!(uploads.pending_count(), 1);

        let queued = uploads.take_queued_uploads();
        assert_eq!(queued.len(), 1);
        assert!(matches!(&queued[0], UploadCopy::Buffer { offset: 16, .. }));
        assert_eq!(uploads.pending_count(), 0);
    }

    #[test]
    fn test_buffer_upload_bounds() {
        let (_dummy, device, uploads) = setup();
        let target =
            MemoryObject::create_committed(&device, &AllocationDesc::buffer(64, HeapKind::Default))
                .unwrap();

        let err = uploads.upload_buffer(&target, 48, &[0; 32]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidUsage(_)));
        assert!(uploads.upload_buffer(&target, 0, &[]).is_err());
    }

    #[test]
    fn test_texture_rows_use_aligned_pitch() {
        let (dummy, device, uploads) = setup();
        let target = MemoryObject::create_committed(
            &device,
            &AllocationDesc::texture_2d(8, 8, 2, 4, HeapKind::Default),
        )
        .unwrap();

        // 4x2 texels of 4 bytes: 16-byte rows staged at a 256-byte pitch
        let data: Vec<u8> = (0..32).collect();
        uploads
            .upload_texture(&target, 1, TextureRegion::new(0, 0, 4, 2), &data)
            .unwrap();

        let queued = uploads.take_queued_uploads();
        let UploadCopy::Texture { source, row_pitch, .. } = &queued[0] else {
            panic!("expected a texture copy");
        };
        assert_eq!(*row_pitch, 256);
        let second_row = dummy
            .read_allocation(source.memory.allocation(), source.offset + 256, 16)
            .unwrap();
        assert_eq!(second_row, &data[16..32]);
    }

    #[test]
    fn test_texture_region_validation() {
        let (_dummy, device, uploads) = setup();
        let target = MemoryObject::create_committed(
            &device,
            &AllocationDesc::texture_2d(8, 8, 2, 4, HeapKind::Default),
        )
        .unwrap();

        // mip 1 is 4x4
        let err = uploads
            .upload_texture(&target, 1, TextureRegion::new(2, 0, 4, 1), &[0; 16])
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidUsage(_)));
        let err = uploads
            .upload_texture(&target, 0, TextureRegion::full(8, 8), &[0; 10])
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidUsage(_)));
        // offsets near u32::MAX must not wrap
        let err = uploads
            .upload_texture(&target, 0, TextureRegion::new(u32::MAX, 0, 2, 1), &[0; 8])
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidUsage(_)));
        let err = uploads
            .upload_texture(&target, 0, TextureRegion::new(0, u32::MAX - 1, 1, 4), &[0; 16])
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidUsage(_)));
    }

    #[test]
    fn test_queues_are_per_frame() {
        let (_dummy, device, uploads) = setup();
        let target =
            MemoryObject::create_committed(&device, &AllocationDesc::buffer(64, HeapKind::Default))
                .unwrap();

        uploads.upload_buffer(&target, 0, &[1; 4]).unwrap();
        uploads.begin_frame(1);
        uploads.upload_buffer(&target, 4, &[2; 4]).unwrap();
        uploads.upload_buffer(&target, 8, &[3; 4]).unwrap();

        assert_eq!(uploads.take_queued_uploads().len(), 1);
        assert_eq!(uploads.take_queued_uploads().len(), 2);
        assert!(uploads.take_queued_uploads().is_empty());
    }
}
