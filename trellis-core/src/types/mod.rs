//! Core identifier and storage types shared across the engine.

mod arena;
mod ids;

pub(crate) use arena::Arena;
pub(crate) use ids::ArenaId;
pub use ids::{BlockId, ChainId, PropId, TaskId, WatchId};
