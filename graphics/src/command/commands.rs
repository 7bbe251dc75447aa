//! Recorded device commands.
//!
//! A [`CommandList`](super::CommandList) records a stream of [`Command`]s that
//! the device replays on submission.

use crate::backend::AllocationId;
use crate::types::{DescriptorHandle, DescriptorHeapId, ResourceState};

/// A subresource state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transition {
    pub allocation: AllocationId,
    pub subresource: u32,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// Which pipeline a binding layout is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindPoint {
    Compute,
    Graphics,
}

/// A single recorded instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Transition barrier covering every listed subresource.
    Barrier(Vec<Transition>),
    CopyBuffer {
        dst: AllocationId,
        dst_offset: u64,
        src: AllocationId,
        src_offset: u64,
        size: u64,
    },
    /// Copy linear rows into a texture region.
    CopyBufferToTexture {
        dst: AllocationId,
        subresource: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        src: AllocationId,
        src_offset: u64,
        row_pitch: u32,
    },
    SetDescriptorHeaps {
        resources: Option<DescriptorHeapId>,
        samplers: Option<DescriptorHeapId>,
    },
    SetBindingLayout {
        bind_point: BindPoint,
        layout: u64,
    },
    SetRootConstants {
        bind_point: BindPoint,
        slot: u32,
        words: Vec<u32>,
    },
    SetRootBufferView {
        bind_point: BindPoint,
        slot: u32,
        address: u64,
    },
    SetRootTable {
        bind_point: BindPoint,
        slot: u32,
        base: DescriptorHandle,
    },
    ClearRenderTarget {
        target: AllocationId,
        color: [f32; 4],
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
}

impl Command {
    /// Whether the command is a barrier.
    pub fn is_barrier(&self) -> bool {
        matches!(self, Self::Barrier(_))
    }
}
