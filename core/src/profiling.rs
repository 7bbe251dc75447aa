//! Profiling support via Tracy.
//!
//! Zones are RAII guards returned by [`zone`]. The macros below are thin
//! wrappers that fill in the source location. Without the `profiling`
//! feature a [`Zone`] is zero-sized and every call compiles away.
//!
//! ```toml
//! [dependencies]
//! frameflow-core = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! ```ignore
//! use frameflow_core::{profile_function, profile_scope};
//!
//! fn run_pipeline() {
//!     profile_function!();
//!
//!     {
//!         profile_scope!("setup wavefront");
//!         // ...
//!     }
//! }
//! ```
//!
//! Task names are only known at runtime, so [`profile_scope_dynamic!`]
//! accepts any `&str`. Schedulers call [`frame_mark!`] once per executed frame.

#[cfg(feature = "profiling")]
#[doc(hidden)]
pub use tracy_client;

/// An open profiler zone, closed on drop.
#[must_use = "the zone closes as soon as it is dropped"]
pub struct Zone {
    #[cfg(feature = "profiling")]
    _span: Option<tracy_client::Span>,
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone").finish_non_exhaustive()
    }
}

/// Open a zone named `name` at the given source location.
///
/// Only records anything while a Tracy client is running.
#[inline]
pub fn zone(name: &str, function: &str, file: &str, line: u32) -> Zone {
    #[cfg(feature = "profiling")]
    {
        Zone {
            _span: tracy_client::Client::running()
                .map(|client| client.span_alloc(Some(name), function, file, line, 0)),
        }
    }
    #[cfg(not(feature = "profiling"))]
    {
        let _ = (name, function, file, line);
        Zone {}
    }
}

/// Signal the end of a frame.
#[inline]
#[cfg(feature = "profiling")]
pub fn mark_frame() {
    if tracy_client::Client::running().is_some() {
        tracy_client::frame_mark();
    }
}

/// Signal the end of a frame (no-op without the `profiling` feature).
#[inline]
#[cfg(not(feature = "profiling"))]
pub fn mark_frame() {}

/// Whether instrumentation was compiled in.
pub const fn enabled() -> bool {
    cfg!(feature = "profiling")
}

/// Mark the end of a frame.
#[macro_export]
macro_rules! frame_mark {
    () => {
        $crate::profiling::mark_frame()
    };
}

/// Open a zone with a literal name for the rest of the enclosing scope.
#[macro_export]
macro_rules! profile_scope {
    ($name:literal) => {
        let _profile_zone = $crate::profiling::zone($name, module_path!(), file!(), line!());
    };
}

/// Open a zone named after the enclosing module for the rest of the function.
#[macro_export]
macro_rules! profile_function {
    () => {
        let _profile_zone =
            $crate::profiling::zone(module_path!(), module_path!(), file!(), line!());
    };
}

/// Open a zone whose name is computed at runtime.
#[macro_export]
macro_rules! profile_scope_dynamic {
    ($name:expr) => {
        let _profile_zone = $crate::profiling::zone($name, module_path!(), file!(), line!());
    };
}

/// Plot a numeric value under a literal name.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_plot {
    ($name:literal, $value:expr) => {
        $crate::profiling::tracy_client::plot!($name, $value as f64)
    };
}

#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_plot {
    ($name:literal, $value:expr) => {
        let _ = $value;
    };
}

/// Name the calling thread in the timeline.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! set_thread_name {
    ($name:literal) => {
        $crate::profiling::tracy_client::set_thread_name!($name)
    };
}

#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! set_thread_name {
    ($name:literal) => {};
}

pub use frame_mark;
pub use profile_function;
pub use profile_plot;
pub use profile_scope;
pub use profile_scope_dynamic;
pub use set_thread_name;
