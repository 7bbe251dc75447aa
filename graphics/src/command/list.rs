//! Command list recording.

use std::any::Any;
use std::sync::Arc;

use frameflow_core::pool::PoolHandle;

use crate::backend::NativeListId;
use crate::binding::{BindParameter, BindingLayout, RootEntry};
use crate::context::FrameResources;
use crate::descriptors::{BindingRuntime, TransientViewHeap};
use crate::error::{FrameError, FrameResult};
use crate::residency::Retained;
use crate::resources::{MemoryObject, Subresource, UploadCopy};
use crate::types::{AddressMode, DescriptorHeapKind, FilterMode, ResourceState, ViewDesc};

use super::{
    BindPoint, Command, CommandAllocator, CommandListKind, ListCapabilities, NativeCommandList,
    Transition, UsageSet,
};

/// A list being recorded by a task.
///
/// A list is owned by exactly one task at a time; it moves to the next task
/// along a forwarding edge and is turned into a [`RecordedList`] by
/// [`finish`](Self::finish).
pub struct CommandList {
    kind: CommandListKind,
    allocator: PoolHandle<CommandAllocator>,
    native: PoolHandle<NativeCommandList>,
    commands: Vec<Command>,
    usage: UsageSet,
    binding: BindingRuntime,
    resource_views: TransientViewHeap,
    sampler_views: TransientViewHeap,
    resources: Arc<FrameResources>,
    retained: Retained,
}

impl CommandList {
    /// Open a list of `kind` from the shared pools.
    pub fn new(resources: &Arc<FrameResources>, kind: CommandListKind) -> FrameResult<Self> {
        let (allocator, native) = resources.command_pools().acquire(kind)?;
        let device = resources.device();
        let chunk_size = resources.config().transient_chunk_size;
        log::trace!("Opened {kind:?} list {:?}", native.id());
        Ok(Self {
            kind,
            allocator,
            native,
            commands: Vec::new(),
            usage: UsageSet::new(),
            binding: BindingRuntime::new(Arc::clone(device), resources.scratch_pools().clone()),
            resource_views: TransientViewHeap::new(
                Arc::clone(device),
                DescriptorHeapKind::Resources,
                chunk_size,
            ),
            sampler_views: TransientViewHeap::new(
                Arc::clone(device),
                DescriptorHeapKind::Samplers,
                chunk_size,
            ),
            resources: Arc::clone(resources),
            retained: Vec::new(),
        })
    }

    pub fn kind(&self) -> CommandListKind {
        self.kind
    }

    pub fn native_id(&self) -> NativeListId {
        self.native.id()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn usage(&self) -> &UsageSet {
        &self.usage
    }

    pub fn binding(&self) -> &BindingRuntime {
        &self.binding
    }

    /// Views created while recording, in the CPU-only resource heap.
    pub fn transient_view_count(&self) -> u32 {
        self.resource_views.view_count() + self.sampler_views.view_count()
    }

    fn require(&self, required: ListCapabilities) -> FrameResult<()> {
        if self.kind.supports(required) {
            Ok(())
        } else {
            Err(FrameError::MissingCapability {
                kind: self.kind,
                required,
            })
        }
    }

    /// Make the next command see `object` in `state`.
    ///
    /// Host-visible memory keeps its heap state and is not tracked.
    pub fn request_state(
        &mut self,
        object: &MemoryObject,
        subresource: Subresource,
        state: ResourceState,
    ) -> FrameResult<()> {
        if let Subresource::Index(index) = subresource {
            if index >= object.subresource_count() {
                return Err(FrameError::InvalidUsage(format!(
                    "subresource {index} of '{}' out of range",
                    object.name()
                )));
            }
        }
        if object.heap().is_host_visible() {
            self.retained.push(Box::new(object.clone()));
            return Ok(());
        }
        let transitions = self.usage.request(object, subresource, state);
        if !transitions.is_empty() {
            self.commands.push(Command::Barrier(transitions));
        }
        Ok(())
    }

    /// Keep `value` alive until the list finished executing.
    pub fn retain(&mut self, value: impl Any + Send) {
        self.retained.push(Box::new(value));
    }

    // --- copies ---

    pub fn copy_buffer(
        &mut self,
        dst: &MemoryObject,
        dst_offset: u64,
        src: &MemoryObject,
        src_offset: u64,
        size: u64,
    ) -> FrameResult<()> {
        self.require(ListCapabilities::COPY)?;
        for (object, offset) in [(dst, dst_offset), (src, src_offset)] {
            if offset.checked_add(size).is_none_or(|end| end > object.size()) {
                return Err(FrameError::InvalidUsage(format!(
                    "copy of {size} bytes at {offset} overflows '{}'",
                    object.name()
                )));
            }
        }
        self.request_state(dst, Subresource::All, ResourceState::COPY_DEST)?;
        self.request_state(src, Subresource::All, ResourceState::COPY_SOURCE)?;
        self.commands.push(Command::CopyBuffer {
            dst: dst.allocation(),
            dst_offset,
            src: src.allocation(),
            src_offset,
            size,
        });
        Ok(())
    }

    /// Record a staged upload.
    pub fn copy_upload(&mut self, copy: UploadCopy) -> FrameResult<()> {
        self.require(ListCapabilities::COPY)?;
        match copy {
            UploadCopy::Buffer {
                target,
                offset,
                source,
            } => {
                self.request_state(&target, Subresource::All, ResourceState::COPY_DEST)?;
                self.commands.push(Command::CopyBuffer {
                    dst: target.allocation(),
                    dst_offset: offset,
                    src: source.memory.allocation(),
                    src_offset: source.offset,
                    size: source.size,
                });
                self.retain(source);
            }
            UploadCopy::Texture {
                target,
                subresource,
                region,
                source,
                row_pitch,
            } => {
                self.request_state(
                    &target,
                    Subresource::Index(subresource),
                    ResourceState::COPY_DEST,
                )?;
                self.commands.push(Command::CopyBufferToTexture {
                    dst: target.allocation(),
                    subresource,
                    x: region.x,
                    y: region.y,
                    width: region.width,
                    height: region.height,
                    src: source.memory.allocation(),
                    src_offset: source.offset,
                    row_pitch,
                });
                self.retain(source);
            }
        }
        Ok(())
    }

    // --- binding ---

    pub fn set_graphics_layout(&mut self, layout: Arc<BindingLayout>) -> FrameResult<()> {
        self.require(ListCapabilities::GRAPHICS)?;
        self.binding.set_layout(layout, BindPoint::Graphics, &mut self.commands);
        Ok(())
    }

    pub fn set_compute_layout(&mut self, layout: Arc<BindingLayout>) -> FrameResult<()> {
        self.require(ListCapabilities::COMPUTE)?;
        self.binding.set_layout(layout, BindPoint::Compute, &mut self.commands);
        Ok(())
    }

    fn layout(&self) -> FrameResult<Arc<BindingLayout>> {
        self.binding
            .layout()
            .cloned()
            .ok_or_else(|| FrameError::InvalidBinding("no binding layout set".to_string()))
    }

    /// Slot and table offset of a tabled parameter.
    fn table_position(&self, parameter: &BindParameter) -> FrameResult<(u32, u32)> {
        let mapping = self.layout()?.resolve(parameter)?;
        mapping.table_offset.map(|offset| (mapping.slot, offset)).ok_or_else(|| {
            FrameError::InvalidBinding(format!("{parameter:?} is not a table parameter"))
        })
    }

    /// Bind a read-only view of `object`; `None` covers every subresource.
    pub fn bind_texture(
        &mut self,
        parameter: BindParameter,
        object: &MemoryObject,
        subresource: Option<u32>,
    ) -> FrameResult<()> {
        let (slot, offset) = self.table_position(&parameter)?;
        let state = match self.binding.bind_point() {
            BindPoint::Graphics => {
                ResourceState::PIXEL_SHADER_RESOURCE | ResourceState::NON_PIXEL_SHADER_RESOURCE
            }
            BindPoint::Compute => ResourceState::NON_PIXEL_SHADER_RESOURCE,
        };
        let selection = subresource.map_or(Subresource::All, Subresource::Index);
        self.request_state(object, selection, state)?;

        let handle = self.resource_views.create_view(&ViewDesc::ShaderResource {
            allocation: object.allocation(),
            subresource,
        })?;
        self.binding.update_binding(slot, offset, handle)
    }

    /// Bind a read-write view of one subresource.
    pub fn bind_unordered(
        &mut self,
        parameter: BindParameter,
        object: &MemoryObject,
        subresource: u32,
    ) -> FrameResult<()> {
        let (slot, offset) = self.table_position(&parameter)?;
        self.request_state(
            object,
            Subresource::Index(subresource),
            ResourceState::UNORDERED_ACCESS,
        )?;
        let handle = self.resource_views.create_view(&ViewDesc::UnorderedAccess {
            allocation: object.allocation(),
            subresource,
        })?;
        self.binding.update_binding(slot, offset, handle)
    }

    pub fn bind_sampler(
        &mut self,
        parameter: BindParameter,
        filter: FilterMode,
        address: AddressMode,
    ) -> FrameResult<()> {
        let (slot, offset) = self.table_position(&parameter)?;
        let handle = self
            .sampler_views
            .create_view(&ViewDesc::Sampler { filter, address })?;
        self.binding.update_binding(slot, offset, handle)
    }

    /// Bind constant data wherever the layout placed the parameter.
    ///
    /// Inline constants must match the declared size exactly; buffer-view
    /// and tabled constants are copied into the constant heap.
    pub fn bind_constants(&mut self, parameter: BindParameter, data: &[u8]) -> FrameResult<()> {
        let layout = self.layout()?;
        let mapping = layout.resolve(&parameter)?;
        let bind_point = self.binding.bind_point();

        if let Some(offset) = mapping.table_offset {
            let buffer = self.resources.constant_heap().create_constant_buffer(data)?;
            let handle = self.resource_views.create_view(&buffer.view())?;
            return self.binding.update_binding(mapping.slot, offset, handle);
        }

        match layout.entry(mapping.slot) {
            Some(RootEntry::Constants { words, .. }) => {
                if data.len() != *words as usize * 4 {
                    return Err(FrameError::InvalidBinding(format!(
                        "{parameter:?} expects {} bytes of constants, got {}",
                        *words * 4,
                        data.len()
                    )));
                }
                self.commands.push(Command::SetRootConstants {
                    bind_point,
                    slot: mapping.slot,
                    words: bytemuck::pod_collect_to_vec(data),
                });
            }
            Some(RootEntry::ConstantBufferView { .. }) => {
                let buffer = self.resources.constant_heap().create_constant_buffer(data)?;
                self.commands.push(Command::SetRootBufferView {
                    bind_point,
                    slot: mapping.slot,
                    address: buffer.gpu_address(),
                });
            }
            _ => {
                return Err(FrameError::InvalidBinding(format!(
                    "{parameter:?} resolves to a non-constant slot {}",
                    mapping.slot
                )));
            }
        }
        Ok(())
    }

    /// Bind a plain-data value as constants.
    pub fn bind_value<T: bytemuck::Pod>(
        &mut self,
        parameter: BindParameter,
        value: &T,
    ) -> FrameResult<()> {
        self.bind_constants(parameter, bytemuck::bytes_of(value))
    }

    // --- draws and dispatches ---

    pub fn clear_render_target(
        &mut self,
        target: &MemoryObject,
        color: [f32; 4],
    ) -> FrameResult<()> {
        self.require(ListCapabilities::GRAPHICS)?;
        self.request_state(target, Subresource::Index(0), ResourceState::RENDER_TARGET)?;
        self.commands.push(Command::ClearRenderTarget {
            target: target.allocation(),
            color,
        });
        Ok(())
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> FrameResult<()> {
        self.require(ListCapabilities::GRAPHICS)?;
        self.binding.commit_draw_call(&mut self.commands)?;
        self.commands.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> FrameResult<()> {
        self.require(ListCapabilities::GRAPHICS)?;
        self.binding.commit_draw_call(&mut self.commands)?;
        self.commands.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        });
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> FrameResult<()> {
        self.require(ListCapabilities::COMPUTE)?;
        self.binding.commit_draw_call(&mut self.commands)?;
        self.commands.push(Command::Dispatch { x, y, z });
        Ok(())
    }

    /// Close the list for submission.
    pub fn finish(self) -> RecordedList {
        let Self {
            kind,
            allocator,
            native,
            commands,
            usage,
            binding,
            resource_views,
            sampler_views,
            mut retained,
            ..
        } = self;

        retained.extend(
            binding
                .into_heaps()
                .into_iter()
                .map(|heap| Box::new(heap) as Box<dyn Any + Send>),
        );
        retained.push(Box::new(resource_views));
        retained.push(Box::new(sampler_views));
        log::trace!("Finished {kind:?} list {:?} with {} commands", native.id(), commands.len());

        RecordedList {
            kind,
            allocator,
            native,
            commands,
            usage,
            retained,
        }
    }
}

impl std::fmt::Debug for CommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandList")
            .field("kind", &self.kind)
            .field("native", &self.native.id())
            .field("commands", &self.commands.len())
            .field("resources", &self.usage.len())
            .finish()
    }
}

/// A closed list waiting for submission.
pub struct RecordedList {
    kind: CommandListKind,
    allocator: PoolHandle<CommandAllocator>,
    native: PoolHandle<NativeCommandList>,
    commands: Vec<Command>,
    usage: UsageSet,
    retained: Retained,
}

impl RecordedList {
    pub fn kind(&self) -> CommandListKind {
        self.kind
    }

    pub fn native_id(&self) -> NativeListId {
        self.native.id()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn usage(&self) -> &UsageSet {
        &self.usage
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Insert a barrier ahead of every recorded command.
    pub(crate) fn prepend_barrier(&mut self, transitions: Vec<Transition>) {
        if !transitions.is_empty() {
            self.commands.insert(0, Command::Barrier(transitions));
        }
    }

    /// Touched memory and everything to release once the list completed.
    pub(crate) fn into_release(self) -> (Vec<MemoryObject>, Retained) {
        let resources: Vec<MemoryObject> = self.usage.resources().cloned().collect();
        let mut retained = self.retained;
        retained.push(Box::new(self.native));
        retained.push(Box::new(self.allocator));
        (resources, retained)
    }
}

impl std::fmt::Debug for RecordedList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordedList")
            .field("kind", &self.kind)
            .field("native", &self.native.id())
            .field("commands", &self.commands.len())
            .field("resources", &self.usage.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(CommandList: Send);
static_assertions::assert_impl_all!(RecordedList: Send);
