//! Frame-tagged page allocator for streaming data.
//!
//! A [`PageRing`] hands out sub-allocations of fixed-size host-visible pages.
//! Every page remembers the last frame that wrote to it and is only recycled
//! once that frame has completed on the device. Requests larger than a page
//! get a dedicated large page, a few of which are kept around for reuse.
//!
//! # Example
//!
//! ```ignore
//! let mut ring = PageRing::new(device, "constants", HeapKind::Upload, 64 * 1024, 256, 5);
//! ring.begin_frame(7);
//! let alloc = ring.allocate(192)?;
//! alloc.write(bytemuck::bytes_of(&camera))?;
//! // ... once frame 7 is known to be complete
//! ring.frame_completed(7);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use crate::backend::Device;
use crate::error::{FrameError, FrameResult};
use crate::resources::MemoryObject;
use crate::types::{AllocationDesc, HeapKind};

/// A sub-allocation of a page.
#[derive(Debug, Clone)]
pub struct PageAllocation {
    /// Page the bytes live in.
    pub memory: MemoryObject,
    /// Byte offset into the page.
    pub offset: u64,
    /// Size of the allocation in bytes.
    pub size: u64,
}

impl PageAllocation {
    /// Device address of the first byte.
    pub fn gpu_address(&self) -> u64 {
        self.memory.gpu_address() + self.offset
    }

    /// Write `data` at `offset` bytes into the allocation.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> FrameResult<()> {
        if offset + data.len() as u64 > self.size {
            return Err(FrameError::InvalidUsage(format!(
                "write of {} bytes at {offset} overflows page allocation of {} bytes",
                data.len(),
                self.size
            )));
        }
        self.memory.write(self.offset + offset, data)
    }

    /// Write `data` at the start of the allocation.
    pub fn write(&self, data: &[u8]) -> FrameResult<()> {
        self.write_at(0, data)
    }
}

#[derive(Debug)]
struct Page {
    memory: MemoryObject,
    cursor: u64,
    frame: u64,
}

impl Page {
    fn is_reclaimable(&self, completed: Option<u64>) -> bool {
        completed.is_some_and(|completed| self.frame <= completed)
    }
}

/// Ring of frame-tagged pages.
///
/// Not thread-safe; owners wrap it in a mutex.
pub struct PageRing {
    device: Arc<dyn Device>,
    label: &'static str,
    heap: HeapKind,
    page_size: u64,
    alignment: u64,
    max_large_pages: usize,
    pages: VecDeque<Page>,
    large_pages: Vec<Page>,
    current_frame: u64,
    completed_frame: Option<u64>,
}

impl PageRing {
    /// Create an empty ring. Pages are allocated on demand.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two or does not divide `page_size`.
    pub fn new(
        device: Arc<dyn Device>,
        label: &'static str,
        heap: HeapKind,
        page_size: u64,
        alignment: u64,
        max_large_pages: usize,
    ) -> Self {
        assert!(alignment.is_power_of_two(), "alignment must be a power of 2, got {alignment}");
        assert!(
            page_size > 0 && page_size % alignment == 0,
            "page size {page_size} must be a non-zero multiple of {alignment}"
        );
        Self {
            device,
            label,
            heap,
            page_size,
            alignment,
            max_large_pages,
            pages: VecDeque::new(),
            large_pages: Vec::new(),
            current_frame: 0,
            completed_frame: None,
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Number of regular pages owned by the ring.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of large pages owned by the ring.
    pub fn large_page_count(&self) -> usize {
        self.large_pages.len()
    }

    /// Tag subsequent allocations with `frame`.
    pub fn begin_frame(&mut self, frame: u64) {
        self.current_frame = frame;
    }

    /// Record that every frame up to and including `frame` has completed.
    pub fn frame_completed(&mut self, frame: u64) {
        self.completed_frame = Some(self.completed_frame.map_or(frame, |c| c.max(frame)));

        let completed = self.completed_frame;
        while self.large_pages.len() > self.max_large_pages {
            match self
                .large_pages
                .iter()
                .position(|page| page.is_reclaimable(completed))
            {
                Some(index) => {
                    let page = self.large_pages.swap_remove(index);
                    log::trace!(
                        "{}: pruned large page of {} bytes",
                        self.label,
                        page.memory.size()
                    );
                }
                None => break,
            }
        }
    }

    /// Allocate `size` bytes aligned to the ring alignment.
    pub fn allocate(&mut self, size: u64) -> FrameResult<PageAllocation> {
        if size == 0 {
            return Err(FrameError::InvalidUsage(format!(
                "{}: zero-sized page allocation",
                self.label
            )));
        }
        if size > self.page_size {
            return self.allocate_large(size);
        }

        let frame = self.current_frame;
        if let Some(back) = self.pages.back_mut() {
            let offset = align_up(back.cursor, self.alignment);
            if offset + size <= self.page_size {
                back.cursor = offset + size;
                back.frame = back.frame.max(frame);
                return Ok(PageAllocation {
                    memory: back.memory.clone(),
                    offset,
                    size,
                });
            }
        }

        let completed = self.completed_frame;
        let reuse_front = self
            .pages
            .front()
            .is_some_and(|page| page.is_reclaimable(completed));

        let mut page = if reuse_front {
            match self.pages.pop_front() {
                Some(page) => page,
                None => self.create_page(self.page_size)?,
            }
        } else {
            self.create_page(self.page_size)?
        };
        page.cursor = size;
        page.frame = frame;
        let allocation = PageAllocation {
            memory: page.memory.clone(),
            offset: 0,
            size,
        };
        self.pages.push_back(page);
        Ok(allocation)
    }

    fn allocate_large(&mut self, size: u64) -> FrameResult<PageAllocation> {
        let completed = self.completed_frame;
        let frame = self.current_frame;

        let reusable = self
            .large_pages
            .iter_mut()
            .filter(|page| page.is_reclaimable(completed) && page.memory.size() >= size)
            .min_by_key(|page| page.memory.size());

        if let Some(page) = reusable {
            page.cursor = size;
            page.frame = frame;
            return Ok(PageAllocation {
                memory: page.memory.clone(),
                offset: 0,
                size,
            });
        }

        let mut page = self.create_page(align_up(size, self.alignment))?;
        page.cursor = size;
        page.frame = frame;
        let allocation = PageAllocation {
            memory: page.memory.clone(),
            offset: 0,
            size,
        };
        self.large_pages.push(page);
        Ok(allocation)
    }

    fn create_page(&self, size: u64) -> FrameResult<Page> {
        let desc = AllocationDesc::buffer(size, self.heap).with_label(self.label);
        let memory = MemoryObject::create_committed(&self.device, &desc)?;
        log::debug!("{}: created page of {size} bytes", self.label);
        Ok(Page {
            memory,
            cursor: 0,
            frame: self.current_frame,
        })
    }

    /// Release every page.
    pub fn clear(&mut self) {
        self.pages.clear();
        self.large_pages.clear();
        self.completed_frame = None;
    }
}

impl std::fmt::Debug for PageRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRing")
            .field("label", &self.label)
            .field("page_size", &self.page_size)
            .field("alignment", &self.alignment)
            .field("pages", &self.pages.len())
            .field("large_pages", &self.large_pages.len())
            .field("current_frame", &self.current_frame)
            .field("completed_frame", &self.completed_frame)
            .finish()
    }
}

/// Align a value up to the given alignment.
#[inline]
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}
