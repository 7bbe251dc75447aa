//! Object pooling with RAII return-on-drop.
//!
//! [`ObjectPool<T>`] keeps a dense array of slots. Acquiring pops a free slot
//! index from an [`IndexPool`], reuses the object parked in that slot (or
//! builds a new one with the caller's factory) and hands it out inside a
//! [`PoolHandle`]. Dropping the handle resets the object and parks it back in
//! its slot.
//!
//! Slots are identified by [`SlotId`], a dense index plus a generation
//! counter. The generation advances each time a slot is recycled, so a stale
//! id never matches the slot's next occupant.
//!
//! # Example
//!
//! ```
//! use frameflow_core::pool::{ObjectPool, PoolError, Poolable};
//!
//! #[derive(Debug, Default)]
//! struct Buffer {
//!     data: Vec<u8>,
//! }
//!
//! impl Poolable for Buffer {
//!     fn reset(&mut self) {
//!         self.data.clear();
//!     }
//! }
//!
//! let pool = ObjectPool::<Buffer>::new("buffers", 2);
//! let mut buf = pool.acquire(|| Ok::<_, PoolError>(Buffer::default())).unwrap();
//! buf.data.extend_from_slice(&[1, 2, 3]);
//! let first = buf.slot_id();
//! drop(buf);
//!
//! // The parked buffer comes back cleared, with a new generation.
//! let buf = pool.acquire(|| Ok::<_, PoolError>(Buffer::default())).unwrap();
//! assert!(buf.data.is_empty());
//! assert_ne!(buf.slot_id(), first);
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::index_pool::IndexPool;

/// Errors raised by pools and index allocators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Every index is handed out and the pool may not grow further.
    #[error("allocation exhausted: all {size} slots are in use")]
    Exhausted { size: usize },
}

/// Trait for types that can be parked in a pool and reused.
pub trait Poolable {
    /// Reset the value to an empty state, preserving allocated capacity.
    ///
    /// For example, call `Vec::clear()` rather than replacing with a new `Vec`.
    fn reset(&mut self);
}

/// Generation-checked identity of a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    /// Dense slot index.
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Number of times the slot had been recycled when this id was issued.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Snapshot of a pool's occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of slots.
    pub capacity: usize,
    /// Slots owned by outstanding handles.
    pub in_use: usize,
    /// Free slots holding a reusable object.
    pub parked: usize,
    /// Objects built by factories over the pool's lifetime.
    pub created: usize,
}

struct Slot<T> {
    parked: Option<T>,
    generation: u32,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            parked: None,
            generation: 0,
        }
    }
}

struct State<T> {
    slots: Vec<Slot<T>>,
    indices: IndexPool,
    created: usize,
}

struct Shared<T> {
    name: &'static str,
    max_size: Option<usize>,
    state: Mutex<State<T>>,
}

impl<T> Shared<T> {
    /// Grow the slot array by at least one slot and a quarter of its size.
    fn grow(&self, state: &mut State<T>) -> Result<(), PoolError> {
        let current = state.slots.len();
        let mut target = (current + current / 4).max(current + 1);
        if let Some(max) = self.max_size {
            target = target.min(max);
        }
        if target <= current {
            return Err(PoolError::Exhausted { size: current });
        }

        log::warn!("Pool '{}' exhausted, growing {} -> {}", self.name, current, target);
        state.slots.resize_with(target, Slot::default);
        state.indices.resize(target);
        Ok(())
    }
}

/// A thread-safe pool of reusable objects.
///
/// Cloning the pool is cheap and yields another handle to the same slots.
pub struct ObjectPool<T: Poolable> {
    shared: Arc<Shared<T>>,
}

impl<T: Poolable> ObjectPool<T> {
    /// Create a pool with `initial_size` empty slots and unbounded growth.
    pub fn new(name: &'static str, initial_size: usize) -> Self {
        Self::build(name, initial_size, None)
    }

    /// Create a pool that never grows past `max_size` slots.
    pub fn with_max_size(name: &'static str, initial_size: usize, max_size: usize) -> Self {
        Self::build(name, initial_size.min(max_size), Some(max_size))
    }

    fn build(name: &'static str, initial_size: usize, max_size: Option<usize>) -> Self {
        let mut slots = Vec::with_capacity(initial_size);
        slots.resize_with(initial_size, Slot::default);
        Self {
            shared: Arc::new(Shared {
                name,
                max_size,
                state: Mutex::new(State {
                    slots,
                    indices: IndexPool::new(initial_size),
                    created: 0,
                }),
            }),
        }
    }

    /// Debug name of the pool.
    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Take an object from the pool.
    ///
    /// A parked object is reused when the free slot holds one; otherwise
    /// `create` builds a new object outside the pool lock. When every slot is
    /// in use the pool grows once and retries; if it may not grow, the call
    /// fails with [`PoolError::Exhausted`]. A factory error is returned
    /// unchanged and the slot goes back to the free list.
    pub fn acquire<E, F>(&self, create: F) -> Result<PoolHandle<T>, E>
    where
        E: From<PoolError>,
        F: FnOnce() -> Result<T, E>,
    {
        let (index, generation, parked) = {
            let mut state = self.shared.state.lock();
            let index = match state.indices.allocate() {
                Ok(index) => index,
                Err(_) => {
                    self.shared.grow(&mut state)?;
                    state.indices.allocate()?
                }
            };
            let slot = &mut state.slots[index];
            (index, slot.generation, slot.parked.take())
        };

        let value = match parked {
            Some(value) => value,
            None => match create() {
                Ok(value) => {
                    self.shared.state.lock().created += 1;
                    value
                }
                Err(err) => {
                    self.shared.state.lock().indices.deallocate(index);
                    return Err(err);
                }
            },
        };

        Ok(PoolHandle {
            value: Some(value),
            id: SlotId {
                index: index as u32,
                generation,
            },
            shared: Arc::clone(&self.shared),
        })
    }

    /// Whether `id` still names an outstanding handle.
    pub fn is_live(&self, id: SlotId) -> bool {
        let state = self.shared.state.lock();
        state
            .slots
            .get(id.index())
            .is_some_and(|slot| slot.generation == id.generation)
            && state.indices.is_allocated(id.index())
    }

    /// Drop every parked object. Outstanding handles are unaffected.
    pub fn clear(&self) {
        let parked: Vec<T> = {
            let mut state = self.shared.state.lock();
            state.slots.iter_mut().filter_map(|slot| slot.parked.take()).collect()
        };
        log::debug!("Pool '{}' released {} parked objects", self.shared.name, parked.len());
    }

    /// Current occupancy.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            capacity: state.slots.len(),
            in_use: state.indices.allocated_count(),
            parked: state.slots.iter().filter(|slot| slot.parked.is_some()).count(),
            created: state.created,
        }
    }
}

impl<T: Poolable> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Poolable> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("name", &self.shared.name)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Exclusive ownership of a pooled object.
///
/// Dereferences to the object. Dropping the handle recycles it.
pub struct PoolHandle<T: Poolable> {
    value: Option<T>,
    id: SlotId,
    shared: Arc<Shared<T>>,
}

impl<T: Poolable> PoolHandle<T> {
    /// Identity of the slot this handle owns.
    pub fn slot_id(&self) -> SlotId {
        self.id
    }

    /// Name of the owning pool.
    pub fn pool_name(&self) -> &'static str {
        self.shared.name
    }
}

impl<T: Poolable> Deref for PoolHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("pool handle accessed after recycle"),
        }
    }
}

impl<T: Poolable> DerefMut for PoolHandle<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("pool handle accessed after recycle"),
        }
    }
}

impl<T: Poolable> Drop for PoolHandle<T> {
    fn drop(&mut self) {
        let Some(mut value) = self.value.take() else {
            return;
        };
        value.reset();

        let mut state = self.shared.state.lock();
        let index = self.id.index();
        let slot = &mut state.slots[index];
        slot.parked = Some(value);
        slot.generation = slot.generation.wrapping_add(1);
        state.indices.deallocate(index);
    }
}

impl<T: Poolable + std::fmt::Debug> std::fmt::Debug for PoolHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("pool", &self.shared.name)
            .field("id", &self.id)
            .field("value", &self.value)
            .finish()
    }
}
