//! Descriptor management.
//!
//! - [`ScratchDescriptorHeap`] - pooled shader-visible heaps, bump allocated
//! - [`TransientViewHeap`] - per-list CPU-only storage for freshly created views
//! - [`BindingRuntime`] - copy-on-write descriptor tables of the current layout

mod runtime;
mod scratch;
mod transient;

pub use runtime::{BindingRuntime, DescriptorTableState};
pub use scratch::{ScratchDescriptorHeap, ScratchPools};
pub use transient::TransientViewHeap;
