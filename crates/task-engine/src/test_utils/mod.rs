//! Test utilities for the task engine.

mod bytecode;
mod fixtures;
mod logging;
mod proposal;

pub use bytecode::*;
pub use fixtures::*;
pub use logging::*;
pub use proposal::*;
