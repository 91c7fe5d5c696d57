//! RPC plumbing for the deployer.
//!
//! The [`ChainClient`] trait is the seam between the deployment protocol and
//! a node: every read and every signed send goes through it. Two
//! implementations ship with the crate, an alloy HTTP client for real
//! networks and an in-memory simulated chain for dry runs and tests.
//! [`RpcConnectionManager`] opens, probes and caches clients and retries
//! transient failures.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use deployer_types::{ChainId, FeeData, TxReceipt, TxRequest};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod error;
pub mod manager;
pub mod registry;

pub mod implementations {
	pub mod alloy;
	pub mod simulated;
}

pub use error::RpcError;
pub use implementations::alloy::{AlloyChainClient, AlloyConnector};
pub use implementations::simulated::{
	SimulatedChain, SimulatedClient, SimulatedNetwork, SimulatedSend,
};
pub use manager::{
	ConnectionFailure, ConnectionOptions, MultiConnection, RetryPolicy, RpcConnectionManager,
	SendOutcome,
};
pub use registry::{
	resolve_rpc_urls, RpcProviderEntry, RpcRegistry, StaticRpcTable, StorageRpcRegistry,
};

/// Client for one chain, optionally bound to a signing key.
#[async_trait]
pub trait ChainClient: Send + Sync {
	/// Address of the signing key, if any.
	fn sender(&self) -> Option<Address>;

	async fn chain_id(&self) -> Result<ChainId, RpcError>;

	/// Pending-inclusive transaction count of `address`.
	async fn transaction_count(&self, address: Address) -> Result<u64, RpcError>;

	async fn code_at(&self, address: Address) -> Result<Bytes, RpcError>;

	async fn balance(&self, address: Address) -> Result<U256, RpcError>;

	async fn fee_data(&self) -> Result<FeeData, RpcError>;

	async fn estimate_gas(&self, tx: &TxRequest) -> Result<u64, RpcError>;

	/// Read-only call from the sender.
	async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError>;

	/// Signs and broadcasts `tx` at exactly `tx.nonce`.
	async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, RpcError>;

	/// Waits until `hash` is included with `confirmations` blocks on top of
	/// and including its own, or fails with [`RpcError::Timeout`].
	async fn wait_for_receipt(
		&self,
		hash: TxHash,
		confirmations: u64,
		timeout: Duration,
	) -> Result<TxReceipt, RpcError>;
}

/// Opens chain clients from endpoint URLs.
#[async_trait]
pub trait ChainConnector: Send + Sync {
	async fn connect(
		&self,
		rpc_url: &str,
		private_key: Option<&str>,
	) -> Result<Arc<dyn ChainClient>, RpcError>;
}

/// A probed client bound to its chain and signing address.
#[derive(Clone)]
pub struct Connection {
	pub chain_id: ChainId,
	pub rpc_url: String,
	pub client: Arc<dyn ChainClient>,
	pub address: Address,
}

impl fmt::Debug for Connection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Connection")
			.field("chain_id", &self.chain_id)
			.field("rpc_url", &self.rpc_url)
			.field("address", &self.address)
			.finish()
	}
}

/// Parses a hex private key into its address.
pub fn address_from_key(private_key: &str) -> Result<Address, RpcError> {
	let signer: alloy::signers::local::PrivateKeySigner = private_key
		.trim()
		.parse()
		.map_err(|e| RpcError::InvalidConfiguration(format!("Invalid private key: {}", e)))?;
	Ok(signer.address())
}
