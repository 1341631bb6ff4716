use crate::{
    task::{BuildContext, Proposal, ValidationContext},
    Result,
};

/// Signature of a validation hook.
pub type ValidateFn = fn(&ValidationContext<'_>) -> Result<()>;

/// A [`Proposal`] made of closures.
pub struct FnProposal<B, V = ValidateFn> {
    build: B,
    validate: V,
}

impl<B, V> core::fmt::Debug for FnProposal<B, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FnProposal").finish_non_exhaustive()
    }
}

impl<B> FnProposal<B>
where
    B: Fn(&mut BuildContext<'_>) -> Result<()>,
{
    /// Creates a proposal from its build logic, with no extra validation.
    pub fn new(build: B) -> Self {
        Self { build, validate: |_| Ok(()) }
    }
}

impl<B, V> FnProposal<B, V> {
    /// Replaces the validation hook.
    pub fn with_validation<V2>(self, validate: V2) -> FnProposal<B, V2>
    where
        V2: Fn(&ValidationContext<'_>) -> Result<()>,
    {
        FnProposal { build: self.build, validate }
    }
}

impl<B, V> Proposal for FnProposal<B, V>
where
    B: Fn(&mut BuildContext<'_>) -> Result<()>,
    V: Fn(&ValidationContext<'_>) -> Result<()>,
{
    fn build_actions(&self, ctx: &mut BuildContext<'_>) -> Result<()> {
        (self.build)(ctx)
    }

    fn validate_extra(&self, ctx: &ValidationContext<'_>) -> Result<()> {
        (self.validate)(ctx)
    }
}
