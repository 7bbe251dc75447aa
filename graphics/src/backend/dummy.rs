//! In-memory device for testing and development.
//!
//! The dummy device executes nothing. Submissions complete as soon as they
//! are made, host-visible allocations keep their bytes in memory, descriptor
//! heaps store the [`ViewDesc`] written to every slot, and every call is
//! counted in [`DummyStats`] so tests can assert on what the scheduler did.
//!
//! A few hooks inject failures and stalls:
//! - [`DummyDevice::fail_next_make_resident`] reports out-of-memory
//! - [`DummyDevice::fail_next_submit`] reports device loss
//! - [`DummyDevice::reject_next_submit`] rejects a batch as invalid
//! - [`DummyDevice::set_residency_blocked`] stalls `make_resident` calls

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::command::{Command, CommandListKind};
use crate::scheduler::CpuFence;
use crate::types::{
    AllocationDesc, DescriptorHandle, DescriptorHeapId, DescriptorHeapKind, ViewDesc,
};

use super::{
    AllocationId, CommandAllocatorId, Device, DeviceError, DeviceResult, Fence, ListSubmission,
    NativeListId,
};

const QUEUE_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const ADDRESS_ALIGNMENT: u64 = 64 * 1024;

/// Call counters of a [`DummyDevice`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DummyStats {
    pub allocations_created: u64,
    pub allocations_released: u64,
    pub allocator_resets: u64,
    pub list_resets: u64,
    /// Calls to `submit`.
    pub batches_submitted: u64,
    pub lists_submitted: u64,
    /// Barrier commands across all submitted lists.
    pub barriers_submitted: u64,
    pub descriptor_writes: u64,
    /// Calls to `copy_descriptors`.
    pub descriptor_copies: u64,
    pub make_resident_calls: u64,
    pub evict_calls: u64,
    /// Allocations evicted across all `evict` calls.
    pub evicted_allocations: u64,
    pub queue_signals: u64,
    pub queue_waits: u64,
}

/// A list as seen by [`Device::submit`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedList {
    pub list: NativeListId,
    pub kind: CommandListKind,
    pub commands: Vec<Command>,
}

/// Lists passed to one `submit` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedBatch {
    pub lists: Vec<SubmittedList>,
}

#[derive(Debug)]
struct AllocationRecord {
    desc: AllocationDesc,
    address: u64,
    data: Option<Vec<u8>>,
    resident: bool,
}

#[derive(Debug, Default)]
struct DummyState {
    next_id: u64,
    next_address: u64,
    allocations: HashMap<AllocationId, AllocationRecord>,
    descriptor_heaps: HashMap<DescriptorHeapId, (DescriptorHeapKind, Vec<Option<ViewDesc>>)>,
    allocators: HashSet<CommandAllocatorId>,
    lists: HashSet<NativeListId>,
    submitted: Vec<SubmittedBatch>,
    stats: DummyStats,
    fail_make_resident: u32,
    fail_submit: u32,
    reject_submit: u32,
}

impl DummyState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Device that keeps everything in memory.
#[derive(Debug, Default)]
pub struct DummyDevice {
    state: Mutex<DummyState>,
    residency_blocked: Mutex<bool>,
    residency_unblocked: Condvar,
}

impl DummyDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> DummyStats {
        self.state.lock().stats.clone()
    }

    /// Every batch submitted so far, oldest first.
    pub fn submitted_batches(&self) -> Vec<SubmittedBatch> {
        self.state.lock().submitted.clone()
    }

    /// Every list submitted so far, in submission order.
    pub fn submitted_lists(&self) -> Vec<SubmittedList> {
        self.state
            .lock()
            .submitted
            .iter()
            .flat_map(|batch| batch.lists.iter().cloned())
            .collect()
    }

    /// Forget the submission log.
    pub fn clear_submissions(&self) {
        self.state.lock().submitted.clear();
    }

    pub fn live_allocation_count(&self) -> usize {
        self.state.lock().allocations.len()
    }

    pub fn live_descriptor_heap_count(&self) -> usize {
        self.state.lock().descriptor_heaps.len()
    }

    pub fn live_command_list_count(&self) -> usize {
        self.state.lock().lists.len()
    }

    /// View stored at `handle`, if any.
    pub fn descriptor(&self, handle: DescriptorHandle) -> Option<ViewDesc> {
        self.state
            .lock()
            .descriptor_heaps
            .get(&handle.heap)
            .and_then(|(_, slots)| slots.get(handle.index as usize).copied().flatten())
    }

    /// Device residency of an allocation, `None` once released.
    pub fn is_resident(&self, allocation: AllocationId) -> Option<bool> {
        self.state
            .lock()
            .allocations
            .get(&allocation)
            .map(|record| record.resident)
    }

    /// Bytes of a host-visible allocation.
    pub fn read_allocation(
        &self,
        allocation: AllocationId,
        offset: u64,
        len: usize,
    ) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let data = state.allocations.get(&allocation)?.data.as_ref()?;
        let start = offset as usize;
        data.get(start..start + len).map(<[u8]>::to_vec)
    }

    /// Make the next `count` calls to `make_resident` fail with out-of-memory.
    pub fn fail_next_make_resident(&self, count: u32) {
        self.state.lock().fail_make_resident = count;
    }

    /// Make the next `count` calls to `submit` fail with device loss.
    pub fn fail_next_submit(&self, count: u32) {
        self.state.lock().fail_submit = count;
    }

    /// Make the next `count` calls to `submit` fail with an invalid parameter.
    pub fn reject_next_submit(&self, count: u32) {
        self.state.lock().reject_submit = count;
    }

    /// Stall `make_resident` callers until unblocked.
    pub fn set_residency_blocked(&self, blocked: bool) {
        *self.residency_blocked.lock() = blocked;
        if !blocked {
            self.residency_unblocked.notify_all();
        }
    }

    fn wait_residency_gate(&self) {
        let mut blocked = self.residency_blocked.lock();
        while *blocked {
            self.residency_unblocked.wait(&mut blocked);
        }
    }
}

impl Device for DummyDevice {
    fn name(&self) -> &str {
        "Dummy Device"
    }

    fn create_command_allocator(&self, kind: CommandListKind) -> DeviceResult<CommandAllocatorId> {
        let mut state = self.state.lock();
        let id = CommandAllocatorId::new(state.next_id());
        state.allocators.insert(id);
        log::trace!("DummyDevice: created {kind:?} allocator {id:?}");
        Ok(id)
    }

    fn reset_command_allocator(&self, allocator: CommandAllocatorId) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if !state.allocators.contains(&allocator) {
            return Err(DeviceError::InvalidParameter(format!(
                "unknown allocator {allocator:?}"
            )));
        }
        state.stats.allocator_resets += 1;
        Ok(())
    }

    fn destroy_command_allocator(&self, allocator: CommandAllocatorId) {
        self.state.lock().allocators.remove(&allocator);
    }

    fn create_command_list(
        &self,
        kind: CommandListKind,
        allocator: CommandAllocatorId,
    ) -> DeviceResult<NativeListId> {
        let mut state = self.state.lock();
        if !state.allocators.contains(&allocator) {
            return Err(DeviceError::InvalidParameter(format!(
                "unknown allocator {allocator:?}"
            )));
        }
        let id = NativeListId::new(state.next_id());
        state.lists.insert(id);
        log::trace!("DummyDevice: created {kind:?} list {id:?}");
        Ok(id)
    }

    fn reset_command_list(
        &self,
        list: NativeListId,
        allocator: CommandAllocatorId,
    ) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if !state.lists.contains(&list) || !state.allocators.contains(&allocator) {
            return Err(DeviceError::InvalidParameter(format!(
                "cannot reset list {list:?} against {allocator:?}"
            )));
        }
        state.stats.list_resets += 1;
        Ok(())
    }

    fn destroy_command_list(&self, list: NativeListId) {
        self.state.lock().lists.remove(&list);
    }

    fn create_fence(&self, initial_value: u64) -> DeviceResult<Arc<dyn Fence>> {
        Ok(Arc::new(CpuFence::new(initial_value)))
    }

    fn queue_signal(&self, fence: &Arc<dyn Fence>, value: u64) -> DeviceResult<()> {
        self.state.lock().stats.queue_signals += 1;
        fence.signal(value);
        Ok(())
    }

    fn queue_wait(&self, fence: &Arc<dyn Fence>, value: u64) -> DeviceResult<()> {
        self.state.lock().stats.queue_waits += 1;
        fence.wait(value, QUEUE_WAIT_TIMEOUT)
    }

    fn wait_idle(&self) -> DeviceResult<()> {
        Ok(())
    }

    fn create_committed(&self, desc: &AllocationDesc) -> DeviceResult<AllocationId> {
        if desc.size == 0 {
            return Err(DeviceError::InvalidParameter("zero-sized allocation".to_string()));
        }
        let mut state = self.state.lock();
        let id = AllocationId::new(state.next_id());
        let address = state.next_address + ADDRESS_ALIGNMENT;
        state.next_address = address + desc.size.div_ceil(ADDRESS_ALIGNMENT) * ADDRESS_ALIGNMENT;
        let data = desc.heap.is_host_visible().then(|| vec![0; desc.size as usize]);
        state.allocations.insert(
            id,
            AllocationRecord {
                desc: desc.clone(),
                address,
                data,
                resident: !desc.create_not_resident,
            },
        );
        state.stats.allocations_created += 1;
        Ok(id)
    }

    fn release_allocation(&self, allocation: AllocationId) {
        let mut state = self.state.lock();
        if state.allocations.remove(&allocation).is_some() {
            state.stats.allocations_released += 1;
        } else {
            log::error!("DummyDevice: double release of {allocation:?}");
        }
    }

    fn gpu_address(&self, allocation: AllocationId) -> u64 {
        self.state
            .lock()
            .allocations
            .get(&allocation)
            .map_or(0, |record| record.address)
    }

    fn write_allocation(
        &self,
        allocation: AllocationId,
        offset: u64,
        data: &[u8],
    ) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let record = state
            .allocations
            .get_mut(&allocation)
            .ok_or_else(|| {
                DeviceError::InvalidParameter(format!("unknown allocation {allocation:?}"))
            })?;
        let label = record.desc.label.clone().unwrap_or_default();
        let bytes = record.data.as_mut().ok_or_else(|| {
            DeviceError::InvalidParameter(format!("allocation '{label}' is not host visible"))
        })?;
        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            return Err(DeviceError::InvalidParameter(format!(
                "write of {} bytes at {offset} overflows '{label}'",
                data.len()
            )));
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn make_resident(&self, allocations: &[AllocationId]) -> DeviceResult<()> {
        self.wait_residency_gate();

        let mut state = self.state.lock();
        state.stats.make_resident_calls += 1;
        if state.fail_make_resident > 0 {
            state.fail_make_resident -= 1;
            return Err(DeviceError::OutOfMemory);
        }
        for allocation in allocations {
            if let Some(record) = state.allocations.get_mut(allocation) {
                record.resident = true;
            }
        }
        Ok(())
    }

    fn evict(&self, allocations: &[AllocationId]) -> DeviceResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.stats.evict_calls += 1;
        for allocation in allocations {
            if let Some(record) = state.allocations.get_mut(allocation) {
                record.resident = false;
                state.stats.evicted_allocations += 1;
            }
        }
        Ok(())
    }

    fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> DeviceResult<DescriptorHeapId> {
        if capacity == 0 {
            return Err(DeviceError::InvalidParameter("empty descriptor heap".to_string()));
        }
        let mut state = self.state.lock();
        let id = DescriptorHeapId::new(state.next_id());
        state
            .descriptor_heaps
            .insert(id, (kind, vec![None; capacity as usize]));
        log::trace!(
            "DummyDevice: created {kind:?} descriptor heap {id:?} \
             ({capacity}, shader visible: {shader_visible})"
        );
        Ok(id)
    }

    fn destroy_descriptor_heap(&self, heap: DescriptorHeapId) {
        self.state.lock().descriptor_heaps.remove(&heap);
    }

    fn write_descriptor(&self, dst: DescriptorHandle, view: &ViewDesc) {
        let mut state = self.state.lock();
        state.stats.descriptor_writes += 1;
        match state
            .descriptor_heaps
            .get_mut(&dst.heap)
            .and_then(|(_, slots)| slots.get_mut(dst.index as usize))
        {
            Some(slot) => *slot = Some(*view),
            None => log::error!("DummyDevice: descriptor write to invalid handle {dst:?}"),
        }
    }

    fn copy_descriptors(&self, dst: DescriptorHandle, src: DescriptorHandle, count: u32) {
        let mut state = self.state.lock();
        state.stats.descriptor_copies += 1;

        let source: Option<Vec<Option<ViewDesc>>> =
            state.descriptor_heaps.get(&src.heap).and_then(|(_, slots)| {
                let start = src.index as usize;
                slots.get(start..start + count as usize).map(<[_]>::to_vec)
            });
        let Some(source) = source else {
            log::error!("DummyDevice: descriptor copy from invalid range {src:?} x{count}");
            return;
        };
        match state.descriptor_heaps.get_mut(&dst.heap).and_then(|(_, slots)| {
            let start = dst.index as usize;
            slots.get_mut(start..start + count as usize)
        }) {
            Some(target) => target.copy_from_slice(&source),
            None => log::error!("DummyDevice: descriptor copy to invalid range {dst:?} x{count}"),
        }
    }

    fn submit(&self, lists: &[ListSubmission<'_>]) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if state.fail_submit > 0 {
            state.fail_submit -= 1;
            return Err(DeviceError::DeviceLost);
        }
        if state.reject_submit > 0 {
            state.reject_submit -= 1;
            return Err(DeviceError::InvalidParameter("rejected batch".to_string()));
        }
        for submission in lists {
            if !state.lists.contains(&submission.list) {
                return Err(DeviceError::InvalidParameter(format!(
                    "submitted unknown list {:?}",
                    submission.list
                )));
            }
        }

        state.stats.batches_submitted += 1;
        state.stats.lists_submitted += lists.len() as u64;
        state.stats.barriers_submitted += lists
            .iter()
            .flat_map(|submission| submission.commands.iter())
            .filter(|command| command.is_barrier())
            .count() as u64;
        state.submitted.push(SubmittedBatch {
            lists: lists
                .iter()
                .map(|submission| SubmittedList {
                    list: submission.list,
                    kind: submission.kind,
                    commands: submission.commands.to_vec(),
                })
                .collect(),
        });
        Ok(())
    }
}
