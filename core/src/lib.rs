//! # frameflow core
//!
//! Primitives shared by the frame scheduler:
//!
//! - [`index_pool::IndexPool`] - bitmap free-list of slot indices
//! - [`pool::ObjectPool`] - RAII object pool with generation-checked slots
//! - [`jobs::JobPool`] - scoped worker pool for continuation-style jobs
//! - [`profiling`] - optional Tracy instrumentation

pub mod index_pool;
pub mod jobs;
pub mod pool;
pub mod profiling;

pub use index_pool::IndexPool;
pub use jobs::{JobPool, JobScope};
pub use pool::{ObjectPool, PoolError, PoolHandle, PoolStats, Poolable, SlotId};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
