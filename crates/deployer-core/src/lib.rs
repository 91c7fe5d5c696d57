//! Cross-chain deployment engine.
//!
//! The [`DeploymentOrchestrator`] places one contract at the same CREATE
//! address on every chain of a run by aligning the deployer nonce before
//! submission. The [`ModuleDeploymentOrchestrator`] repeats the protocol for
//! auxiliary contracts at consecutive nonces, and [`Deployer`] drives a
//! complete run from stored parameters to a persisted [`RunReport`].
//!
//! [`RunReport`]: deployer_types::RunReport

pub mod engine;
pub mod error;
pub mod fees;
pub mod lifecycle;
pub mod logo;
pub mod modules;
pub mod orchestrator;

pub use engine::{predict_addresses, Deployer, DeployerBuilder, DEFAULT_MODULES};
pub use error::DeployError;
pub use fees::{FeePolicy, GasPolicy};
pub use lifecycle::ChainLifecycle;
pub use logo::{current_logo_uri, LogoInitializer};
pub use modules::{ModuleDeploymentOrchestrator, ModuleWave};
pub use orchestrator::{AbortSignal, ChainJob, DeploySettings, DeploymentOrchestrator, WaveOutcome};
