//! Shared types for the cross-chain deployment coordinator.
//!
//! Every other crate in the workspace speaks in terms of these types: chain
//! identifiers, transaction requests and receipts, deployment plans and
//! results, deployment parameters, the module catalogue and verification
//! records.

pub mod deployment;
pub mod modules;
pub mod params;
pub mod transaction;
pub mod verification;

pub use deployment::*;
pub use modules::*;
pub use params::*;
pub use transaction::*;
pub use verification::*;

/// Numeric EVM chain identifier.
pub type ChainId = u64;
