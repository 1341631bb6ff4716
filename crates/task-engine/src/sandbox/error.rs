//! Error types for sandbox operations.

/// Errors raised by a [`Sandbox`](super::Sandbox).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    /// A rollback failed earlier and the sandbox state can no longer be trusted.
    #[error("sandbox is poisoned by a failed rollback")]
    Poisoned,
    /// The EVM rejected the transaction before executing it.
    #[error("evm error: {0}")]
    Evm(String),
    /// The backing database failed.
    #[error("database error: {0}")]
    Database(String),
}
