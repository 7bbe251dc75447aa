//! Pools of native command allocators and lists.

use std::sync::Arc;

use frameflow_core::pool::{ObjectPool, PoolHandle, PoolStats, Poolable};

use crate::backend::{CommandAllocatorId, Device, NativeListId};
use crate::error::{FrameError, FrameResult};

use super::CommandListKind;

/// A native command allocator.
///
/// Returning the handle to its pool resets the allocator, so the handle must
/// only drop once every list recorded from it has finished executing.
pub struct CommandAllocator {
    id: CommandAllocatorId,
    kind: CommandListKind,
    device: Arc<dyn Device>,
}

impl CommandAllocator {
    pub fn id(&self) -> CommandAllocatorId {
        self.id
    }

    pub fn kind(&self) -> CommandListKind {
        self.kind
    }
}

impl Poolable for CommandAllocator {
    fn reset(&mut self) {
        if let Err(err) = self.device.reset_command_allocator(self.id) {
            log::error!("Failed to reset {:?} command allocator {:?}: {err}", self.kind, self.id);
        }
    }
}

impl Drop for CommandAllocator {
    fn drop(&mut self) {
        self.device.destroy_command_allocator(self.id);
    }
}

impl std::fmt::Debug for CommandAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandAllocator")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// A native command list.
pub struct NativeCommandList {
    id: NativeListId,
    kind: CommandListKind,
    device: Arc<dyn Device>,
}

impl NativeCommandList {
    pub fn id(&self) -> NativeListId {
        self.id
    }

    pub fn kind(&self) -> CommandListKind {
        self.kind
    }
}

// Lists are reopened against a fresh allocator when they leave the pool.
impl Poolable for NativeCommandList {
    fn reset(&mut self) {}
}

impl Drop for NativeCommandList {
    fn drop(&mut self) {
        self.device.destroy_command_list(self.id);
    }
}

impl std::fmt::Debug for NativeCommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeCommandList")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// One allocator pool and one list pool per [`CommandListKind`].
pub struct CommandPools {
    device: Arc<dyn Device>,
    allocators: [ObjectPool<CommandAllocator>; 3],
    lists: [ObjectPool<NativeCommandList>; 3],
}

impl CommandPools {
    pub fn new(device: Arc<dyn Device>, initial_size: usize) -> Self {
        Self {
            device,
            allocators: [
                ObjectPool::new("copy_allocators", initial_size),
                ObjectPool::new("compute_allocators", initial_size),
                ObjectPool::new("graphics_allocators", initial_size),
            ],
            lists: [
                ObjectPool::new("copy_lists", initial_size),
                ObjectPool::new("compute_lists", initial_size),
                ObjectPool::new("graphics_lists", initial_size),
            ],
        }
    }

    /// Take an allocator and a list opened for recording against it.
    pub fn acquire(
        &self,
        kind: CommandListKind,
    ) -> FrameResult<(PoolHandle<CommandAllocator>, PoolHandle<NativeCommandList>)> {
        let allocator = self.allocators[kind.index()].acquire(|| {
            let id = self.device.create_command_allocator(kind)?;
            log::trace!("Created {kind:?} command allocator {id:?}");
            Ok::<_, FrameError>(CommandAllocator {
                id,
                kind,
                device: Arc::clone(&self.device),
            })
        })?;

        let mut created = false;
        let list = self.lists[kind.index()].acquire(|| {
            let id = self.device.create_command_list(kind, allocator.id())?;
            log::trace!("Created {kind:?} command list {id:?}");
            created = true;
            Ok::<_, FrameError>(NativeCommandList {
                id,
                kind,
                device: Arc::clone(&self.device),
            })
        })?;

        if !created {
            self.device.reset_command_list(list.id(), allocator.id())?;
        }
        Ok((allocator, list))
    }

    /// Occupancy of the allocator and list pools of `kind`.
    pub fn stats(&self, kind: CommandListKind) -> (PoolStats, PoolStats) {
        (
            self.allocators[kind.index()].stats(),
            self.lists[kind.index()].stats(),
        )
    }

    /// Destroy every parked allocator and list.
    pub fn clear(&self) {
        for pool in &self.allocators {
            pool.clear();
        }
        for pool in &self.lists {
            pool.clear();
        }
    }
}

impl std::fmt::Debug for CommandPools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPools")
            .field("device", &self.device.name())
            .finish_non_exhaustive()
    }
}
