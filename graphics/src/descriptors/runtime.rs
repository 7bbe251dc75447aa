//! Descriptor table state while recording.

use std::sync::Arc;

use frameflow_core::pool::PoolHandle;

use crate::backend::Device;
use crate::binding::{BindingLayout, RootEntry, TableKind};
use crate::command::{BindPoint, Command};
use crate::error::{FrameError, FrameResult};
use crate::types::{DescriptorHandle, DescriptorHeapKind, DescriptorRange};

use super::{ScratchDescriptorHeap, ScratchPools};

/// Runtime record of one descriptor table of the current layout.
#[derive(Debug, Clone)]
pub struct DescriptorTableState {
    slot: u32,
    heap_kind: DescriptorHeapKind,
    range: Option<DescriptorRange>,
    /// Set once a draw or dispatch read the range.
    committed: bool,
    /// The range changed since the root table was last set.
    dirty: bool,
    bindings: Vec<Option<DescriptorHandle>>,
}

impl DescriptorTableState {
    fn new(slot: u32, heap_kind: DescriptorHeapKind, size: u32) -> Self {
        Self {
            slot,
            heap_kind,
            range: None,
            committed: false,
            dirty: false,
            bindings: vec![None; size as usize],
        }
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn heap_kind(&self) -> DescriptorHeapKind {
        self.heap_kind
    }

    /// Scratch range currently holding the table.
    pub fn range(&self) -> Option<DescriptorRange> {
        self.range
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Source descriptors bound so far.
    pub fn bindings(&self) -> &[Option<DescriptorHandle>] {
        &self.bindings
    }
}

fn heap_index(kind: DescriptorHeapKind) -> usize {
    match kind {
        DescriptorHeapKind::Resources => 0,
        DescriptorHeapKind::Samplers => 1,
    }
}

/// Copy every maximal run of bound descriptors from `src` to `dst`.
fn copy_bound_runs(
    device: &dyn Device,
    bindings: &[Option<DescriptorHandle>],
    src: DescriptorRange,
    dst: DescriptorRange,
) -> u32 {
    let mut copies = 0;
    let mut index = 0;
    while index < bindings.len() {
        if bindings[index].is_none() {
            index += 1;
            continue;
        }
        let start = index;
        while index < bindings.len() && bindings[index].is_some() {
            index += 1;
        }
        let count = (index - start) as u32;
        device.copy_descriptors(dst.handle(start as u32), src.handle(start as u32), count);
        copies += 1;
    }
    copies
}

/// Binds shader parameters of one list through scratch descriptor tables.
///
/// Table ranges are copy-on-write: once a draw or dispatch has read a range
/// it is never written again, the next update duplicates it first.
pub struct BindingRuntime {
    device: Arc<dyn Device>,
    pools: ScratchPools,
    layout: Option<Arc<BindingLayout>>,
    bind_point: BindPoint,
    tables: Vec<DescriptorTableState>,
    heaps: [Option<PoolHandle<ScratchDescriptorHeap>>; 2],
    retired: Vec<PoolHandle<ScratchDescriptorHeap>>,
    heaps_dirty: bool,
    duplications: u32,
}

impl BindingRuntime {
    pub fn new(device: Arc<dyn Device>, pools: ScratchPools) -> Self {
        Self {
            device,
            pools,
            layout: None,
            bind_point: BindPoint::Graphics,
            tables: Vec::new(),
            heaps: [None, None],
            retired: Vec::new(),
            heaps_dirty: false,
            duplications: 0,
        }
    }

    /// Switch to `layout`. Table contents of the previous layout are dropped.
    pub fn set_layout(
        &mut self,
        layout: Arc<BindingLayout>,
        bind_point: BindPoint,
        commands: &mut Vec<Command>,
    ) {
        self.tables = layout
            .entries()
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| match entry {
                RootEntry::Table { kind, .. } => {
                    let heap_kind = match kind {
                        TableKind::Resources => DescriptorHeapKind::Resources,
                        TableKind::Samplers => DescriptorHeapKind::Samplers,
                    };
                    Some(DescriptorTableState::new(
                        slot as u32,
                        heap_kind,
                        entry.table_size(),
                    ))
                }
                _ => None,
            })
            .collect();
        commands.push(Command::SetBindingLayout {
            bind_point,
            layout: layout.id(),
        });
        self.bind_point = bind_point;
        self.layout = Some(layout);
    }

    pub fn layout(&self) -> Option<&Arc<BindingLayout>> {
        self.layout.as_ref()
    }

    pub fn bind_point(&self) -> BindPoint {
        self.bind_point
    }

    pub fn tables(&self) -> &[DescriptorTableState] {
        &self.tables
    }

    /// Number of copy-on-write duplications performed so far.
    pub fn duplications(&self) -> u32 {
        self.duplications
    }

    /// Number of scratch heaps replaced after running out of space.
    pub fn retired_heap_count(&self) -> usize {
        self.retired.len()
    }

    /// Bind `source` at `index` of the table in root slot `slot`.
    pub fn update_binding(
        &mut self,
        slot: u32,
        index: u32,
        source: DescriptorHandle,
    ) -> FrameResult<()> {
        let table = self.table_index(slot)?;
        let size = self.tables[table].bindings.len() as u32;
        if index >= size {
            return Err(FrameError::InvalidBinding(format!(
                "table offset {index} outside table of {size} descriptors at slot {slot}"
            )));
        }

        self.ensure_writable(table)?;
        let state = &mut self.tables[table];
        let Some(range) = state.range else {
            return Err(FrameError::AllocationExhausted(format!(
                "no scratch range for table at slot {slot}"
            )));
        };
        self.device.copy_descriptors(range.handle(index), source, 1);
        state.bindings[index as usize] = Some(source);
        Ok(())
    }

    /// Flush pending root table changes before a draw or dispatch.
    ///
    /// Every table becomes committed, so the next update duplicates it.
    pub fn commit_draw_call(&mut self, commands: &mut Vec<Command>) -> FrameResult<()> {
        for table in 0..self.tables.len() {
            if self.tables[table].range.is_none() {
                self.ensure_writable(table)?;
            }
        }

        if self.heaps_dirty {
            commands.push(Command::SetDescriptorHeaps {
                resources: self.heaps[0].as_ref().map(|heap| heap.id()),
                samplers: self.heaps[1].as_ref().map(|heap| heap.id()),
            });
            self.heaps_dirty = false;
        }

        for state in &mut self.tables {
            if state.dirty {
                if let Some(range) = state.range {
                    commands.push(Command::SetRootTable {
                        bind_point: self.bind_point,
                        slot: state.slot,
                        base: range.base(),
                    });
                }
                state.dirty = false;
            }
            state.committed = true;
        }
        Ok(())
    }

    /// Release the scratch heaps used so far, current ones included.
    pub fn into_heaps(self) -> Vec<PoolHandle<ScratchDescriptorHeap>> {
        let mut heaps = self.retired;
        heaps.extend(self.heaps.into_iter().flatten());
        heaps
    }

    fn table_index(&self, slot: u32) -> FrameResult<usize> {
        self.tables
            .iter()
            .position(|state| state.slot == slot)
            .ok_or_else(|| {
                FrameError::InvalidBinding(format!("root slot {slot} is not a descriptor table"))
            })
    }

    /// Make the table's range safe to overwrite.
    fn ensure_writable(&mut self, table: usize) -> FrameResult<()> {
        let state = &self.tables[table];
        if state.range.is_some() && !state.committed {
            return Ok(());
        }
        let kind = state.heap_kind;
        let count = state.bindings.len() as u32;

        let range = match self.allocate(kind, count) {
            Ok(range) => range,
            Err(FrameError::AllocationExhausted(reason)) => {
                log::warn!("Scratch heap exhausted ({reason}), switching to a fresh heap");
                self.replace_heap(kind)?;
                if self.tables[table].range.is_some() {
                    // already relocated into fresh memory
                    return Ok(());
                }
                self.allocate(kind, count)?
            }
            Err(err) => return Err(err),
        };

        let state = &mut self.tables[table];
        if let Some(old) = state.range.replace(range) {
            copy_bound_runs(self.device.as_ref(), &state.bindings, old, range);
            self.duplications += 1;
        }
        state.committed = false;
        state.dirty = true;
        Ok(())
    }

    fn allocate(&mut self, kind: DescriptorHeapKind, count: u32) -> FrameResult<DescriptorRange> {
        let slot = &mut self.heaps[heap_index(kind)];
        if slot.is_none() {
            *slot = Some(self.pools.acquire(kind)?);
            self.heaps_dirty = true;
        }
        match slot {
            Some(heap) => heap.allocate(count),
            None => Err(FrameError::AllocationExhausted(format!("no {kind:?} scratch heap"))),
        }
    }

    /// Retire the current heap of `kind` and re-copy every table into a fresh one.
    fn replace_heap(&mut self, kind: DescriptorHeapKind) -> FrameResult<()> {
        let fresh = self.pools.acquire(kind)?;
        if let Some(old) = self.heaps[heap_index(kind)].replace(fresh) {
            self.retired.push(old);
        }
        self.heaps_dirty = true;

        for table in 0..self.tables.len() {
            let state = &self.tables[table];
            if state.heap_kind != kind {
                continue;
            }
            let Some(old) = state.range else {
                continue;
            };
            let count = state.bindings.len() as u32;
            let range = self.allocate(kind, count)?;
            let state = &mut self.tables[table];
            copy_bound_runs(self.device.as_ref(), &state.bindings, old, range);
            state.range = Some(range);
            state.committed = false;
            state.dirty = true;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BindingRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingRuntime")
            .field("layout", &self.layout.as_ref().map(|layout| layout.id()))
            .field("bind_point", &self.bind_point)
            .field("tables", &self.tables)
            .field("retired", &self.retired.len())
            .field("duplications", &self.duplications)
            .finish()
    }
}
