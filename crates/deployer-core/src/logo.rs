//! One-shot logo URI initializer of the primary contract.

use crate::error::DeployError;
use crate::fees::FeePolicy;
use alloy::primitives::{Address, Bytes};
use alloy::sol;
use alloy::sol_types::SolCall;
use deployer_nonce::NonceManager;
use deployer_rpc::{Connection, RpcConnectionManager};
use deployer_types::{truncate_hash, TxRequest};
use std::time::Duration;
use tracing::{debug, info};

sol! {
	interface ILogoURI {
		function logoURI() external view returns (string);
		function initializeLogoURI(string uri) external;
	}
}

const LOGO_GAS_FALLBACK: u64 = 200_000;

/// Current logo URI, empty when unset or unreadable.
pub async fn current_logo_uri(connection: &Connection, contract: Address) -> String {
	let data = Bytes::from(ILogoURI::logoURICall {}.abi_encode());
	match connection.client.call(contract, data).await {
		Ok(raw) => ILogoURI::logoURICall::abi_decode_returns(&raw).unwrap_or_default(),
		Err(e) => {
			debug!(chain_id = connection.chain_id, "logoURI() call failed: {}", e);
			String::new()
		}
	}
}

/// Sends `initializeLogoURI(uri)` on contracts whose logo is unset.
pub struct LogoInitializer<'a> {
	pub rpc: &'a RpcConnectionManager,
	pub nonces: &'a NonceManager,
	pub fees: FeePolicy,
	pub send_max_retries: u32,
	pub confirmations: u64,
	pub timeout: Duration,
}

impl LogoInitializer<'_> {
	/// Consumes one nonce when it sends; the caller must hold the sender's
	/// nonce lease. Returns whether a transaction was sent.
	pub async fn ensure(
		&self,
		connection: &Connection,
		contract: Address,
		uri: &str,
	) -> Result<bool, DeployError> {
		let chain_id = connection.chain_id;
		if !current_logo_uri(connection, contract).await.is_empty() {
			debug!(chain_id, %contract, "Logo URI already set");
			return Ok(false);
		}

		let client = connection.client.as_ref();
		let nonce = self
			.nonces
			.get_nonce_with_client(client, connection.address, chain_id)
			.await?;
		let input = Bytes::from(
			ILogoURI::initializeLogoURICall {
				uri: uri.to_string(),
			}
			.abi_encode(),
		);
		let tx = TxRequest::call(contract, input, nonce)
			.with_fees(self.fees.fetch(client, chain_id).await?);
		let gas_limit = client
			.estimate_gas(&tx)
			.await
			.map(|estimate| estimate.saturating_add(estimate / 5))
			.unwrap_or(LOGO_GAS_FALLBACK);

		let outcome = self
			.rpc
			.send_transaction_with_retry(
				client,
				tx.with_gas_limit(gas_limit),
				self.send_max_retries,
				self.confirmations,
				self.timeout,
			)
			.await
			.map_err(|e| DeployError::rpc(chain_id, e))?;
		self.nonces
			.reserve_nonce(connection.address, chain_id, nonce);

		info!(
			chain_id,
			nonce,
			tx_hash = %truncate_hash(&outcome.tx_hash),
			"Logo URI initialized"
		);
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::sol_types::SolValue;
	use deployer_rpc::{ConnectionOptions, SimulatedNetwork};
	use std::sync::Arc;

	const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

	async fn setup() -> (SimulatedNetwork, RpcConnectionManager, NonceManager, Connection) {
		let network = SimulatedNetwork::new();
		network.add_chain("sim://one", 1);
		let rpc = RpcConnectionManager::new(Arc::new(network.clone()));
		let nonces = NonceManager::new(Arc::new(network.clone()));
		let connection = rpc
			.create_connection("sim://one", KEY, ConnectionOptions::default())
			.await
			.unwrap();
		(network, rpc, nonces, connection)
	}

	fn initializer<'a>(
		rpc: &'a RpcConnectionManager,
		nonces: &'a NonceManager,
		fees: FeePolicy,
	) -> LogoInitializer<'a> {
		LogoInitializer {
			rpc,
			nonces,
			fees,
			send_max_retries: 3,
			confirmations: 1,
			timeout: Duration::from_secs(5),
		}
	}

	#[tokio::test]
	async fn test_initializes_empty_logo() {
		let (network, rpc, nonces, connection) = setup().await;
		let chain = network.chain("sim://one").unwrap();
		let contract = Address::repeat_byte(0x42);
		let fees = FeePolicy {
			min_priority_fee: 1,
			min_max_fee: 1,
		};

		let sent = initializer(&rpc, &nonces, fees)
			.ensure(&connection, contract, "ipfs://logo")
			.await
			.unwrap();
		assert!(sent);

		let txs = chain.sent_by(connection.address);
		assert_eq!(txs.len(), 1);
		assert_eq!(txs[0].tx.to, Some(contract));
		let call = ILogoURI::initializeLogoURICall::abi_decode(&txs[0].tx.input).unwrap();
		assert_eq!(call.uri, "ipfs://logo");
		assert_eq!(nonces.cached_nonce(connection.address, 1), Some(1));
	}

	#[tokio::test]
	async fn test_skips_when_logo_set() {
		let (network, rpc, nonces, connection) = setup().await;
		let chain = network.chain("sim://one").unwrap();
		let contract = Address::repeat_byte(0x42);
		chain.set_call_response(
			contract,
			Bytes::from(("ipfs://existing".to_string(),).abi_encode_params()),
		);

		assert_eq!(current_logo_uri(&connection, contract).await, "ipfs://existing");
		let sent = initializer(&rpc, &nonces, FeePolicy::from_config(&Default::default()))
			.ensure(&connection, contract, "ipfs://logo")
			.await
			.unwrap();
		assert!(!sent);
		assert!(chain.sent_by(connection.address).is_empty());
	}
}
