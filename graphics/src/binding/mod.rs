//! Shader parameter binding.
//!
//! [`BindingLayout::compile`] turns a list of [`BindParameterDesc`] into a
//! root table layout. Lists bind against a compiled layout through the
//! [`BindingRuntime`](crate::descriptors::BindingRuntime).

mod layout;

pub use layout::{
    BindKind, BindParameter, BindParameterDesc, BindingLayout, BindingMapping, DEFAULT_BUDGET_WORDS,
    RootEntry, ShaderVisibility, TableKind, TableRange,
};
