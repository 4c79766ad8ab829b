//! Priority scheduling for block runs.

mod resolver;

pub(crate) use resolver::Resolver;
pub use resolver::PRIORITY_LEVELS;
