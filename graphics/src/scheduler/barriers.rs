//! Barrier injection and the submission hazard check.
//!
//! Lists record the state they *first* need for every subresource without
//! knowing the state it will be in. When a list reaches the queue its first
//! states are compared with the globally tracked states; mismatches become a
//! single barrier in front of the list, then the tracked states advance to
//! the list's last states.

use crate::command::{RecordedList, Transition};
use crate::resources::MemoryObject;
use crate::types::ResourceState;

/// Tracked states replaced by [`inject_barriers`], in injection order.
///
/// Restoring puts every subresource back where it was, so a batch the device
/// never ran leaves no trace in the tracked states.
#[derive(Default)]
pub(crate) struct StateSnapshot {
    previous: Vec<(MemoryObject, u32, ResourceState)>,
}

impl StateSnapshot {
    pub(crate) fn len(&self) -> usize {
        self.previous.len()
    }

    pub(crate) fn restore(self) {
        for (object, subresource, state) in self.previous.into_iter().rev() {
            if let Some(current) = object.lock_states().get_mut(subresource as usize) {
                *current = state;
            }
        }
    }
}

/// Prepend the barrier a list needs and advance tracked states.
///
/// Must be called in submission order. Replaced states are pushed to
/// `snapshot`. Returns the number of transitions.
pub(crate) fn inject_barriers(list: &mut RecordedList, snapshot: &mut StateSnapshot) -> usize {
    let mut transitions = Vec::new();
    for (object, subresource, usage) in list.usage().iter() {
        let mut states = object.lock_states();
        let Some(current) = states.get_mut(subresource as usize) else {
            continue;
        };
        if *current != usage.first {
            transitions.push(Transition {
                allocation: object.allocation(),
                subresource,
                before: *current,
                after: usage.first,
            });
        }
        snapshot.previous.push((object.clone(), subresource, *current));
        *current = usage.last;
    }

    let count = transitions.len();
    if count > 0 {
        log::trace!("Injecting {count} transitions before list {:?}", list.native_id());
    }
    list.prepend_barrier(transitions);
    count
}

/// Whether `next` may join `batch` without ordering against its lists.
pub(crate) fn is_hazard_free(batch: &[RecordedList], next: &RecordedList) -> bool {
    batch
        .iter()
        .all(|list| list.usage().can_run_in_parallel(next.usage()))
}
