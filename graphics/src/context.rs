//! Contexts handed to the application and to tasks.
//!
//! | Type | Lifetime | Purpose |
//! |------|----------|---------|
//! | [`FrameContext`] | one frame | Input of [`Scheduler::execute`] |
//! | [`FrameResources`] | scheduler | Heaps and pools shared by every task |
//! | [`SetupContext`] | one Setup call | Declare usage, stage uploads |
//! | [`RenderContext`] | one Execute call | Record commands |

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::Device;
use crate::binding::{BindParameterDesc, BindingLayout};
use crate::command::{
    CommandList, CommandListKind, CommandPools, ListCapabilities, RecordedList, UsageSet,
};
use crate::config::SchedulerConfig;
use crate::descriptors::ScratchPools;
use crate::error::FrameResult;
use crate::resources::{
    ConstantBuffer, ConstantBufferHeap, CriticalBufferHeap, MemoryObject, Subresource,
    TextureRegion, UploadManager,
};
use crate::types::ResourceState;

#[cfg(doc)]
use crate::scheduler::Scheduler;

/// Per-frame input of the scheduler.
#[derive(Clone, Default)]
pub struct FrameContext {
    /// Time since the application started.
    pub elapsed: Duration,
    pub frame_index: u64,
    /// Texture presented at the end of the frame.
    pub back_buffer: Option<MemoryObject>,
    /// Application data the tasks render.
    pub scene: Option<Arc<dyn Any + Send + Sync>>,
}

impl FrameContext {
    pub fn new(frame_index: u64, elapsed: Duration) -> Self {
        Self {
            elapsed,
            frame_index,
            back_buffer: None,
            scene: None,
        }
    }

    pub fn with_back_buffer(mut self, back_buffer: MemoryObject) -> Self {
        self.back_buffer = Some(back_buffer);
        self
    }

    pub fn with_scene<T: Any + Send + Sync>(mut self, scene: Arc<T>) -> Self {
        self.scene = Some(scene);
        self
    }

    /// The scene set, if it is a `T`.
    pub fn scene<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.scene.as_deref().and_then(|scene| scene.downcast_ref::<T>())
    }
}

impl std::fmt::Debug for FrameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameContext")
            .field("elapsed", &self.elapsed)
            .field("frame_index", &self.frame_index)
            .field("back_buffer", &self.back_buffer)
            .field("has_scene", &self.scene.is_some())
            .finish()
    }
}

/// Heaps and pools shared by every list of a scheduler.
pub struct FrameResources {
    device: Arc<dyn Device>,
    config: SchedulerConfig,
    critical: CriticalBufferHeap,
    constants: ConstantBufferHeap,
    uploads: UploadManager,
    scratch: ScratchPools,
    commands: CommandPools,
}

impl FrameResources {
    pub fn new(device: Arc<dyn Device>, config: &SchedulerConfig) -> Self {
        Self {
            critical: CriticalBufferHeap::new(Arc::clone(&device)),
            constants: ConstantBufferHeap::new(
                Arc::clone(&device),
                config.constant_page_size,
                config.constant_alignment,
                config.large_page_retention,
            ),
            uploads: UploadManager::new(
                Arc::clone(&device),
                config.upload_page_size,
                config.upload_alignment,
                config.large_page_retention,
            ),
            scratch: ScratchPools::new(
                Arc::clone(&device),
                config.scratch_heap_size,
                config.sampler_scratch_size,
                config.initial_pool_size,
            ),
            commands: CommandPools::new(Arc::clone(&device), config.initial_pool_size),
            config: config.clone(),
            device,
        }
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn critical_heap(&self) -> &CriticalBufferHeap {
        &self.critical
    }

    pub fn constant_heap(&self) -> &ConstantBufferHeap {
        &self.constants
    }

    pub fn uploads(&self) -> &UploadManager {
        &self.uploads
    }

    pub fn scratch_pools(&self) -> &ScratchPools {
        &self.scratch
    }

    pub fn command_pools(&self) -> &CommandPools {
        &self.commands
    }

    /// Compile `parameters` against the configured root table budget.
    pub fn compile_layout(
        &self,
        parameters: &[BindParameterDesc],
    ) -> FrameResult<Arc<BindingLayout>> {
        BindingLayout::compile_with_budget(parameters, self.config.binding_budget_words)
            .map(Arc::new)
    }

    pub(crate) fn begin_frame(&self, frame: u64) {
        self.constants.begin_frame(frame);
        self.uploads.begin_frame(frame);
    }

    pub(crate) fn frame_completed(&self, frame: u64) {
        self.constants.frame_completed(frame);
        self.uploads.frame_completed(frame);
    }

    /// Release every parked pooled object and page.
    pub(crate) fn clear(&self) {
        self.commands.clear();
        self.scratch.clear();
        self.constants.clear();
        self.uploads.clear();
    }
}

impl std::fmt::Debug for FrameResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameResources")
            .field("device", &self.device.name())
            .field("constants", &self.constants)
            .field("uploads", &self.uploads)
            .finish_non_exhaustive()
    }
}

/// Context of one task's Setup phase.
pub struct SetupContext<'a> {
    frame: &'a FrameContext,
    resources: &'a Arc<FrameResources>,
    task: &'a str,
    usage: &'a mut UsageSet,
}

impl<'a> SetupContext<'a> {
    pub(crate) fn new(
        frame: &'a FrameContext,
        resources: &'a Arc<FrameResources>,
        task: &'a str,
        usage: &'a mut UsageSet,
    ) -> Self {
        Self {
            frame,
            resources,
            task,
            usage,
        }
    }

    pub fn frame(&self) -> &FrameContext {
        self.frame
    }

    pub fn resources(&self) -> &Arc<FrameResources> {
        self.resources
    }

    pub fn task_name(&self) -> &str {
        self.task
    }

    /// Declare that Execute uses `object` in `state`.
    ///
    /// Declared resources are made resident before the task's list runs and
    /// requested on the list before the first recorded command.
    pub fn declare_usage(
        &mut self,
        object: &MemoryObject,
        subresource: Subresource,
        state: ResourceState,
    ) -> FrameResult<()> {
        self.usage.declare(object, subresource, state)
    }

    pub fn declared(&self) -> &UsageSet {
        self.usage
    }

    /// Stage a buffer upload copied before the next frame's tasks run.
    pub fn upload_buffer(
        &self,
        target: &MemoryObject,
        offset: u64,
        data: &[u8],
    ) -> FrameResult<()> {
        self.resources.uploads().upload_buffer(target, offset, data)
    }

    pub fn upload_texture(
        &self,
        target: &MemoryObject,
        subresource: u32,
        region: TextureRegion,
        data: &[u8],
    ) -> FrameResult<()> {
        self.resources
            .uploads()
            .upload_texture(target, subresource, region, data)
    }

    pub fn create_constant_buffer(&self, data: &[u8]) -> FrameResult<ConstantBuffer> {
        self.resources.constant_heap().create_constant_buffer(data)
    }
}

/// Context of one task's Execute phase.
///
/// Owns the task's open [`CommandList`], which may have been inherited
/// from the previous task.
pub struct RenderContext<'a> {
    frame: &'a FrameContext,
    resources: &'a Arc<FrameResources>,
    task: &'a str,
    declared: &'a UsageSet,
    list: Option<CommandList>,
    /// Whether the declared usage was requested on the current list.
    declared_applied: bool,
    finished: Vec<RecordedList>,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(
        frame: &'a FrameContext,
        resources: &'a Arc<FrameResources>,
        task: &'a str,
        declared: &'a UsageSet,
        inherited: Option<CommandList>,
    ) -> Self {
        Self {
            frame,
            resources,
            task,
            declared,
            list: inherited,
            declared_applied: false,
            finished: Vec::new(),
        }
    }

    pub fn frame(&self) -> &FrameContext {
        self.frame
    }

    pub fn resources(&self) -> &Arc<FrameResources> {
        self.resources
    }

    pub fn task_name(&self) -> &str {
        self.task
    }

    /// Whether a list is open (own or inherited).
    pub fn has_list(&self) -> bool {
        self.list.is_some()
    }

    /// Open list able to record `required` commands.
    ///
    /// An open list lacking the capability is finished and a new list of
    /// the smallest sufficient kind is opened.
    pub fn command_list(&mut self, required: ListCapabilities) -> FrameResult<&mut CommandList> {
        let mut list = match self.list.take() {
            Some(list) if list.kind().supports(required) => list,
            Some(list) => {
                log::trace!(
                    "Task '{}' needs {required:?}, finishing {:?} list",
                    self.task,
                    list.kind()
                );
                self.finished.push(list.finish());
                self.declared_applied = false;
                CommandList::new(self.resources, CommandListKind::minimal_for(required))?
            }
            None => CommandList::new(self.resources, CommandListKind::minimal_for(required))?,
        };

        if !self.declared_applied {
            for (object, subresource, usage) in self.declared.iter() {
                list.request_state(object, Subresource::Index(subresource), usage.first)?;
            }
            self.declared_applied = true;
        }
        Ok(self.list.insert(list))
    }

    pub fn graphics_list(&mut self) -> FrameResult<&mut CommandList> {
        self.command_list(ListCapabilities::GRAPHICS)
    }

    pub fn compute_list(&mut self) -> FrameResult<&mut CommandList> {
        self.command_list(ListCapabilities::COMPUTE)
    }

    pub fn copy_list(&mut self) -> FrameResult<&mut CommandList> {
        self.command_list(ListCapabilities::COPY)
    }

    /// Finish the open list now instead of at the end of the task.
    pub fn submit_list(&mut self) {
        if let Some(list) = self.list.take() {
            self.finished.push(list.finish());
            self.declared_applied = false;
        }
    }

    /// Open list and lists finished during the call.
    pub(crate) fn into_parts(self) -> (Option<CommandList>, Vec<RecordedList>) {
        (self.list, self.finished)
    }
}

impl std::fmt::Debug for RenderContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("task", &self.task)
            .field("list", &self.list.as_ref().map(CommandList::kind))
            .field("finished", &self.finished.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(FrameResources: Send, Sync);
static_assertions::assert_impl_all!(FrameContext: Send, Sync);
