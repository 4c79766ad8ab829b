//! Trellis core engine.
//!
//! This crate provides the reactive block graph at the heart of trellis:
//! blocks wired together by property bindings, driven by a cooperative
//! priority scheduler, with pluggable functions and flow persistence.
//!
//! # Key Components
//!
//! - **Root**: one engine instance; the host-facing API for flows, paths,
//!   and driving the scheduler
//! - **Value / Event**: the data model that travels along bindings,
//!   including the wait/error sentinels
//! - **Function / Registry**: the `#is`-selected behavior attached to a
//!   block, with descriptor inheritance
//! - **Storage**: flow persistence behind [`storage::Storage`], with
//!   in-memory and directory-backed backends
//!
//! # Example
//!
//! ```ignore
//! use trellis_core::prelude::*;
//!
//! let mut root = Root::new();
//! root.add_flow("main", None)?;
//! root.set_value_at("main.a.value", Value::int(3))?;
//! root.set_binding_at("main.b.input", Some("##.a.value"))?;
//! root.run();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod func;
mod graph;
pub mod prelude;
mod root;
mod scheduler;
pub mod storage;
pub mod types;
pub mod value;
mod worker;

// Re-export key types at crate root for convenience
pub use error::{EngineError, Result};
pub use event::Event;
pub use func::{FuncContext, FuncDesc, FuncMode, Function, Registry, RunResult};
pub use graph::naming;
pub use graph::DEFAULT_PRIORITY;
pub use root::Root;
pub use scheduler::PRIORITY_LEVELS;
pub use value::{DataMap, Value};
