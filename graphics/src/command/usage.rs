//! Per-subresource usage tracking.

use std::collections::BTreeMap;

use crate::error::{FrameError, FrameResult};
use crate::resources::{MemoryObject, ResourceId, Subresource};
use crate::types::ResourceState;

use super::Transition;

/// How one subresource is used by a single list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceUsage {
    /// State requested by the first command touching the subresource.
    pub first: ResourceState,
    /// State after the last in-list transition.
    pub last: ResourceState,
    /// Whether the list moved the subresource through more than one state.
    pub multiple: bool,
}

impl SubresourceUsage {
    fn single(state: ResourceState) -> Self {
        Self {
            first: state,
            last: state,
            multiple: false,
        }
    }

    /// Whether the subresource stays in one state for the whole list.
    pub fn is_single_state(&self) -> bool {
        !self.multiple && self.first == self.last
    }
}

#[derive(Debug, Clone)]
struct UsageEntry {
    object: MemoryObject,
    subresources: BTreeMap<u32, SubresourceUsage>,
}

/// Every subresource touched by a list, keyed by resource id.
#[derive(Debug, Clone, Default)]
pub struct UsageSet {
    entries: BTreeMap<ResourceId, UsageEntry>,
}

impl UsageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct resources touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record that the next command needs `state` for the selected subresources.
    ///
    /// The first request for a subresource only records it. A later request
    /// for a different state returns the in-list transitions to record.
    pub fn request(
        &mut self,
        object: &MemoryObject,
        subresource: Subresource,
        state: ResourceState,
    ) -> Vec<Transition> {
        let count = object.subresource_count();
        let entry = self.entries.entry(object.id()).or_insert_with(|| UsageEntry {
            object: object.clone(),
            subresources: BTreeMap::new(),
        });

        let mut transitions = Vec::new();
        for index in subresource.indices(count) {
            match entry.subresources.get_mut(&index) {
                None => {
                    entry.subresources.insert(index, SubresourceUsage::single(state));
                }
                Some(usage) if usage.last != state => {
                    transitions.push(Transition {
                        allocation: object.allocation(),
                        subresource: index,
                        before: usage.last,
                        after: state,
                    });
                    usage.last = state;
                    usage.multiple = true;
                }
                Some(_) => {}
            }
        }
        transitions
    }

    /// Declare a usage ahead of recording.
    ///
    /// Read-only declarations of the same subresource merge. Two different
    /// declarations where either writes are rejected.
    pub fn declare(
        &mut self,
        object: &MemoryObject,
        subresource: Subresource,
        state: ResourceState,
    ) -> FrameResult<()> {
        let count = object.subresource_count();
        if let Subresource::Index(index) = subresource {
            if index >= count {
                return Err(FrameError::InvalidUsage(format!(
                    "subresource {index} of '{}' out of range ({count} subresources)",
                    object.name()
                )));
            }
        }

        let entry = self.entries.entry(object.id()).or_insert_with(|| UsageEntry {
            object: object.clone(),
            subresources: BTreeMap::new(),
        });

        for index in subresource.indices(count) {
            if let Some(existing) = entry.subresources.get(&index) {
                if existing.first != state && (existing.first.is_write() || state.is_write()) {
                    return Err(FrameError::InvalidUsage(format!(
                        "subresource {index} of '{}' declared as both {:?} and {:?}",
                        object.name(),
                        existing.first,
                        state
                    )));
                }
            }
        }

        for index in subresource.indices(count) {
            let usage = entry
                .subresources
                .entry(index)
                .or_insert_with(|| SubresourceUsage::single(state));
            usage.first |= state;
            usage.last = usage.first;
        }
        Ok(())
    }

    /// Usage of one subresource, if touched.
    pub fn get(&self, resource: ResourceId, subresource: u32) -> Option<SubresourceUsage> {
        self.entries
            .get(&resource)
            .and_then(|entry| entry.subresources.get(&subresource))
            .copied()
    }

    /// Touched resources in id order.
    pub fn resources(&self) -> impl Iterator<Item = &MemoryObject> + '_ {
        self.entries.values().map(|entry| &entry.object)
    }

    /// Every touched subresource with its usage.
    pub fn iter(&self) -> impl Iterator<Item = (&MemoryObject, u32, SubresourceUsage)> + '_ {
        self.entries.values().flat_map(|entry| {
            entry
                .subresources
                .iter()
                .map(move |(&index, &usage)| (&entry.object, index, usage))
        })
    }

    /// Whether two lists may execute without ordering between them.
    ///
    /// True when the sets are disjoint, or every shared subresource stays in
    /// one identical state in both lists.
    pub fn can_run_in_parallel(&self, other: &UsageSet) -> bool {
        let (small, large) = if self.entries.len() <= other.entries.len() {
            (self, other)
        } else {
            (other, self)
        };

        small.entries.iter().all(|(id, entry)| {
            let Some(other_entry) = large.entries.get(id) else {
                return true;
            };
            entry.subresources.iter().all(|(index, usage)| {
                match other_entry.subresources.get(index) {
                    None => true,
                    Some(other_usage) => {
                        usage.is_single_state()
                            && other_usage.is_single_state()
                            && usage.first == other_usage.first
                    }
                }
            })
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Device, DummyDevice};
    use crate::types::{AllocationDesc, HeapKind};
    use std::sync::Arc;

    fn device() -> Arc<dyn Device> {
        Arc::new(DummyDevice::new())
    }

    fn buffer(device: &Arc<dyn Device>) -> MemoryObject {
        MemoryObject::create_committed(device, &AllocationDesc::buffer(256, HeapKind::Default))
            .unwrap()
    }

    #[test]
    fn test_first_request_records_without_transition() {
        let device = device();
        let a = buffer(&device);
        let mut usage = UsageSet::new();

        assert!(usage
            .request(&a, Subresource::All, ResourceState::COPY_DEST)
            .is_empty());
        let recorded = usage.get(a.id(), 0).unwrap();
        assert_eq!(recorded.first, ResourceState::COPY_DEST);
        assert!(recorded.is_single_state());
    }

    #[test]
    fn test_state_change_emits_in_list_transition() {
        let device = device();
        let a = buffer(&device);
        let mut usage = UsageSet::new();

        usage.request(&a, Subresource::All, ResourceState::COPY_DEST);
        let transitions = usage.request(&a, Subresource::All, ResourceState::PIXEL_SHADER_RESOURCE);

        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].before, ResourceState::COPY_DEST);
        assert_eq!(transitions[0].after, ResourceState::PIXEL_SHADER_RESOURCE);

        let recorded = usage.get(a.id(), 0).unwrap();
        assert_eq!(recorded.first, ResourceState::COPY_DEST);
        assert_eq!(recorded.last, ResourceState::PIXEL_SHADER_RESOURCE);
        assert!(recorded.multiple);
    }

    #[test]
    fn test_disjoint_sets_run_in_parallel() {
        let device = device();
        let a = buffer(&device);
        let b = buffer(&device);

        let mut left = UsageSet::new();
        left.request(&a, Subresource::All, ResourceState::UNORDERED_ACCESS);
        let mut right = UsageSet::new();
        right.request(&b, Subresource::All, ResourceState::UNORDERED_ACCESS);

        assert!(left.can_run_in_parallel(&right));
    }

    #[test]
    fn test_shared_single_state_runs_in_parallel() {
        let device = device();
        let a = buffer(&device);

        let mut left = UsageSet::new();
        left.request(&a, Subresource::All, ResourceState::PIXEL_SHADER_RESOURCE);
        let mut right = UsageSet::new();
        right.request(&a, Subresource::All, ResourceState::PIXEL_SHADER_RESOURCE);

        assert!(left.can_run_in_parallel(&right));
    }

    #[test]
    fn test_conflicting_states_force_ordering() {
        let device = device();
        let a = buffer(&device);

        let mut writer = UsageSet::new();
        writer.request(&a, Subresource::All, ResourceState::COPY_DEST);
        let mut reader = UsageSet::new();
        reader.request(&a, Subresource::All, ResourceState::PIXEL_SHADER_RESOURCE);
        assert!(!writer.can_run_in_parallel(&reader));

        let mut multi = UsageSet::new();
        multi.request(&a, Subresource::All, ResourceState::PIXEL_SHADER_RESOURCE);
        multi.request(&a, Subresource::All, ResourceState::COPY_DEST);
        multi.request(&a, Subresource::All, ResourceState::PIXEL_SHADER_RESOURCE);
        assert!(!multi.can_run_in_parallel(&reader));
    }

    #[test]
    fn test_distinct_mips_do_not_conflict() {
        let device = device();
        let texture = MemoryObject::create_committed(
            &device,
            &AllocationDesc::texture_2d(16, 16, 2, 4, HeapKind::Default),
        )
        .unwrap();

        let mut left = UsageSet::new();
        left.request(&texture, Subresource::Index(0), ResourceState::RENDER_TARGET);
        let mut right = UsageSet::new();
        right.request(&texture, Subresource::Index(1), ResourceState::PIXEL_SHADER_RESOURCE);

        assert!(left.can_run_in_parallel(&right));
    }

    #[test]
    fn test_declare_merges_reads_rejects_writes() {
        let device = device();
        let a = buffer(&device);
        let mut declared = UsageSet::new();

        declared
            .declare(&a, Subresource::All, ResourceState::PIXEL_SHADER_RESOURCE)
            .unwrap();
        declared
            .declare(&a, Subresource::All, ResourceState::NON_PIXEL_SHADER_RESOURCE)
            .unwrap();
        assert_eq!(
            declared.get(a.id(), 0).unwrap().first,
            ResourceState::PIXEL_SHADER_RESOURCE | ResourceState::NON_PIXEL_SHADER_RESOURCE
        );

        let err = declared
            .declare(&a, Subresource::All, ResourceState::UNORDERED_ACCESS)
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidUsage(_)));
    }
}
