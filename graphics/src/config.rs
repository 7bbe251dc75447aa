//! Scheduler configuration.

use std::time::Duration;

use crate::residency::EvictionPolicy;

/// Tunables of a [`Scheduler`](crate::scheduler::Scheduler).
///
/// # Example
///
/// ```
/// use frameflow_graphics::SchedulerConfig;
/// use std::time::Duration;
///
/// let config = SchedulerConfig::default()
///     .with_worker_threads(2)
///     .with_fence_timeout(Duration::from_secs(1));
/// assert_eq!(config.frames_in_flight, 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Worker threads running task Setup and Execute bodies.
    pub worker_threads: usize,
    /// Frames the CPU may record ahead of the device.
    pub frames_in_flight: usize,
    /// Longest wait on any fence before the device is considered lost.
    pub fence_timeout: Duration,
    /// Descriptors per shader-visible resource scratch heap.
    pub scratch_heap_size: u32,
    /// Descriptors per shader-visible sampler scratch heap.
    pub sampler_scratch_size: u32,
    /// Descriptors per transient view heap chunk.
    pub transient_chunk_size: u32,
    /// Root table budget, in words, of layouts compiled through
    /// [`FrameResources::compile_layout`](crate::context::FrameResources::compile_layout).
    pub binding_budget_words: u32,
    pub constant_page_size: u64,
    pub constant_alignment: u64,
    pub upload_page_size: u64,
    pub upload_alignment: u64,
    /// Oversized pages kept alive after their frame completed.
    pub large_page_retention: usize,
    /// Objects created up front by each device-object pool.
    pub initial_pool_size: usize,
    pub eviction_policy: EvictionPolicy,
    /// Colour of the fallback frame recorded after a fatal failure.
    pub fallback_clear_color: [f32; 4],
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
            frames_in_flight: 2,
            fence_timeout: Duration::from_secs(5),
            scratch_heap_size: 4096,
            sampler_scratch_size: 2048,
            transient_chunk_size: 256,
            binding_budget_words: crate::binding::DEFAULT_BUDGET_WORDS,
            constant_page_size: 64 * 1024,
            constant_alignment: 256,
            upload_page_size: 64 * 1024,
            upload_alignment: 512,
            large_page_retention: 5,
            initial_pool_size: 4,
            eviction_policy: EvictionPolicy::Immediate,
            fallback_clear_color: [1.0, 0.0, 1.0, 1.0],
        }
    }
}

impl SchedulerConfig {
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads.max(1);
        self
    }

    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight.max(1);
        self
    }

    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }

    pub fn with_scratch_heap_size(mut self, descriptors: u32) -> Self {
        self.scratch_heap_size = descriptors;
        self
    }

    pub fn with_sampler_scratch_size(mut self, descriptors: u32) -> Self {
        self.sampler_scratch_size = descriptors;
        self
    }

    pub fn with_transient_chunk_size(mut self, descriptors: u32) -> Self {
        self.transient_chunk_size = descriptors.max(1);
        self
    }

    pub fn with_binding_budget(mut self, words: u32) -> Self {
        self.binding_budget_words = words;
        self
    }

    /// Page size and alignment of the constant buffer heap.
    pub fn with_constant_pages(mut self, page_size: u64, alignment: u64) -> Self {
        self.constant_page_size = page_size;
        self.constant_alignment = alignment;
        self
    }

    /// Page size and alignment of the upload staging ring.
    pub fn with_upload_pages(mut self, page_size: u64, alignment: u64) -> Self {
        self.upload_page_size = page_size;
        self.upload_alignment = alignment;
        self
    }

    pub fn with_large_page_retention(mut self, pages: usize) -> Self {
        self.large_page_retention = pages;
        self
    }

    pub fn with_initial_pool_size(mut self, size: usize) -> Self {
        self.initial_pool_size = size;
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn with_fallback_clear_color(mut self, color: [f32; 4]) -> Self {
        self.fallback_clear_color = color;
        self
    }
}
