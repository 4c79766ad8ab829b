//! Prelude for convenient imports.
//!
//! This module re-exports the most commonly used types and traits.
//!
//! # Example
//!
//! ```ignore
//! use trellis_core::prelude::*;
//! ```

// Core types
pub use crate::types::{BlockId, PropId, TaskId, WatchId};

// Error handling
pub use crate::error::{EngineError, Result, ResultExt};

// Data model
pub use crate::event::{Event, EventKind};
pub use crate::value::{DataMap, Value};

// Functions
pub use crate::func::{
    FuncContext, FuncDesc, FuncMode, Function, PropDesc, PropEntry, PropGroupDesc, PropType,
    Registry, RunResult,
};

// Engine
pub use crate::clock::{EngineClock, MockClock, RealClock};
pub use crate::config::RootConfig;
pub use crate::root::Root;
pub use crate::{DEFAULT_PRIORITY, PRIORITY_LEVELS};

// Storage
pub use crate::storage::{FileStorage, FlowStorage, MemoryStorage, Storage, StorageListener};
