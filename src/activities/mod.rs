//! Activity types and their property contracts.

pub mod kind;
pub mod registry;

pub use kind::ActivityKind;
pub use registry::{ActivityRegistry, ActivitySpec, PropertyShape, PropertySpec};
