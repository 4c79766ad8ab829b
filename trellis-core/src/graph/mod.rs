//! The block graph: nodes, properties, bindings, and change dispatch.

pub(crate) mod binding;
pub(crate) mod block;
pub(crate) mod dispatch;
pub(crate) mod engine;
pub mod naming;
pub(crate) mod path;
pub(crate) mod property;
pub(crate) mod serialize;

pub use block::DEFAULT_PRIORITY;
