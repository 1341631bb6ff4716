use auto_impl::auto_impl;

use super::{BuildContext, ValidationContext};
use crate::Result;

/// The task-specific half of a governance task.
///
/// `build_actions` is written as ordinary imperative calls against live contracts; the engine
/// records those calls, rolls them back and derives the actions the Safe must execute.
/// `validate_extra` runs after the generic checks and may reject the simulated result for
/// reasons only the task knows about.
#[auto_impl(&, Box, Arc)]
pub trait Proposal {
    /// Makes the calls the Safe should make. Invoked once, inside the recording window.
    fn build_actions(&self, ctx: &mut BuildContext<'_>) -> Result<()>;

    /// Checks the post-simulation state beyond the generic authorization checks.
    fn validate_extra(&self, ctx: &ValidationContext<'_>) -> Result<()>;
}
