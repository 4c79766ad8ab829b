//! Built-in function catalog for the trellis engine.
//!
//! This crate provides the small standard set of block functions used to
//! exercise the engine contract:
//!
//! ## Math (`math::*`)
//! - [`math::AddFunction`] - `math:add`, variadic sum
//! - [`math::SubtractFunction`] - `math:subtract`, left fold subtraction
//! - [`math::MultiplyFunction`] - `math:multiply`, variadic product
//!
//! ## Strings (`strings::*`)
//! - [`strings::JoinFunction`] - `str:join`, part concatenation with separator
//!
//! ## Logic (`logic::*`)
//! - [`logic::NotFunction`] - `logic:not`, truthiness inversion
//!
//! ## Test (`probe::*`)
//! - [`probe::ProbeFunction`] - `test:probe`, run counter for tests
//!
//! Call [`register_builtins`] on a registry (typically through
//! `Root::registry_mut`) before loading flows that name these functions.

#![warn(clippy::all)]

pub mod logic;
pub mod math;
pub mod probe;
pub mod strings;

pub use logic::NotFunction;
pub use math::{AddFunction, MultiplyFunction, SubtractFunction};
pub use probe::ProbeFunction;
pub use strings::JoinFunction;

use trellis_core::{Registry, Result};

/// Register every built-in function and base descriptor.
pub fn register_builtins(registry: &mut Registry) -> Result<()> {
    math::register(registry)?;
    strings::register(registry)?;
    logic::register(registry)?;
    probe::register(registry)?;
    Ok(())
}

/// Prelude for commonly used types.
pub mod prelude {
    pub use crate::logic::NotFunction;
    pub use crate::math::{AddFunction, MultiplyFunction, SubtractFunction};
    pub use crate::probe::ProbeFunction;
    pub use crate::strings::JoinFunction;
    pub use crate::register_builtins;
}
