//! Authoring and verification engine for multisig governance tasks.
//!
//! A task author writes a [`Proposal`] as ordinary calls against live contracts. The engine
//! runs that logic as the Safe inside a recording window of a [`Sandbox`](sandbox::Sandbox),
//! rolls the state back, and derives from the recorded trace:
//!
//! - the deduplicated list of [`Action`]s the Safe must execute,
//! - the native and token transfers, and the storage writes, they cause,
//! - the `Multicall3.aggregate3Value` batch calldata and the Safe payload owners sign.
//!
//! The batch is then replayed as the Safe and the result is checked against the task's
//! storage allow-list and the Safe's configuration invariants.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use task_contracts;

mod action;
pub use action::*;

pub mod classify;

mod config;
pub use config::*;

mod encode;
pub use encode::*;

mod error;
pub use error::*;

pub mod registry;

mod report;
pub use report::*;

pub mod safe;

pub mod sandbox;

pub mod simulate;

mod task;
pub use task::*;

mod types;
pub use types::*;

pub mod validate;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
