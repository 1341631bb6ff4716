//! Safe multisig support: signer payloads and configuration snapshots.

mod payload;
pub use payload::*;

mod state;
pub use state::*;
