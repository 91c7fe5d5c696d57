//! Chain client backed by an alloy HTTP provider.
//!
//! Transactions are signed locally by the provider's wallet. The nonce,
//! gas limit and fees of outgoing transactions are set explicitly whenever
//! the caller provides them, so the provider's fillers only complete what
//! was left open.

use crate::{ChainClient, ChainConnector, RpcError};
use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use deployer_types::{truncate_hash, ChainId, FeeData, FeeOverrides, TxReceipt, TxRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

fn rpc_err(context: &str, e: impl std::fmt::Display) -> RpcError {
	RpcError::from_message(format!("{}: {}", context, e))
}

pub struct AlloyChainClient {
	provider: DynProvider,
	sender: Option<Address>,
	poll_interval: Duration,
}

impl AlloyChainClient {
	/// Builds a client for `rpc_url`, signing with `private_key` when given.
	pub fn new(rpc_url: &str, private_key: Option<&str>) -> Result<Self, RpcError> {
		let url: reqwest::Url = rpc_url.parse().map_err(|e| {
			RpcError::InvalidConfiguration(format!("Invalid RPC URL {}: {}", rpc_url, e))
		})?;

		let (provider, sender) = match private_key {
			Some(key) => {
				let signer: PrivateKeySigner = key.trim().parse().map_err(|e| {
					RpcError::InvalidConfiguration(format!("Invalid private key: {}", e))
				})?;
				let sender = signer.address();
				let provider = ProviderBuilder::new()
					.wallet(EthereumWallet::from(signer))
					.connect_http(url)
					.erased();
				(provider, Some(sender))
			}
			None => (ProviderBuilder::new().connect_http(url).erased(), None),
		};

		Ok(Self {
			provider,
			sender,
			poll_interval: Duration::from_secs(3),
		})
	}

	pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
		self.poll_interval = poll_interval;
		self
	}

	fn to_request(&self, tx: &TxRequest) -> TransactionRequest {
		let mut request = TransactionRequest::default()
			.with_nonce(tx.nonce)
			.with_value(tx.value);

		request = match tx.to {
			Some(to) => request.with_to(to).with_input(tx.input.clone()),
			None => request.with_deploy_code(tx.input.clone()),
		};

		if let Some(from) = self.sender {
			request = request.with_from(from);
		}
		if let Some(gas_limit) = tx.gas_limit {
			request = request.with_gas_limit(gas_limit);
		}

		match tx.fees {
			Some(FeeOverrides::Eip1559 {
				max_fee_per_gas,
				max_priority_fee_per_gas,
			}) => request
				.with_max_fee_per_gas(max_fee_per_gas)
				.with_max_priority_fee_per_gas(max_priority_fee_per_gas),
			Some(FeeOverrides::Legacy { gas_price }) => request.with_gas_price(gas_price),
			None => request,
		}
	}
}

#[async_trait]
impl ChainClient for AlloyChainClient {
	fn sender(&self) -> Option<Address> {
		self.sender
	}

	async fn chain_id(&self) -> Result<ChainId, RpcError> {
		self.provider
			.get_chain_id()
			.await
			.map_err(|e| rpc_err("Failed to get chain id", e))
	}

	async fn transaction_count(&self, address: Address) -> Result<u64, RpcError> {
		self.provider
			.get_transaction_count(address)
			.pending()
			.await
			.map_err(|e| rpc_err("Failed to get transaction count", e))
	}

	async fn code_at(&self, address: Address) -> Result<Bytes, RpcError> {
		self.provider
			.get_code_at(address)
			.await
			.map_err(|e| rpc_err("Failed to get code", e))
	}

	async fn balance(&self, address: Address) -> Result<U256, RpcError> {
		self.provider
			.get_balance(address)
			.await
			.map_err(|e| rpc_err("Failed to get balance", e))
	}

	async fn fee_data(&self) -> Result<FeeData, RpcError> {
		let gas_price = self.provider.get_gas_price().await.ok();

		match self.provider.estimate_eip1559_fees().await {
			Ok(estimate) => Ok(FeeData {
				max_fee_per_gas: Some(estimate.max_fee_per_gas),
				max_priority_fee_per_gas: Some(estimate.max_priority_fee_per_gas),
				gas_price,
			}),
			Err(e) => {
				debug!("EIP-1559 fee estimation unavailable: {}", e);
				let gas_price =
					gas_price.ok_or_else(|| rpc_err("Failed to get fee data", e))?;
				Ok(FeeData {
					max_fee_per_gas: None,
					max_priority_fee_per_gas: None,
					gas_price: Some(gas_price),
				})
			}
		}
	}

	async fn estimate_gas(&self, tx: &TxRequest) -> Result<u64, RpcError> {
		let mut request = self.to_request(tx);
		request.gas = None;
		self.provider
			.estimate_gas(request)
			.await
			.map_err(|e| rpc_err("Failed to estimate gas", e))
	}

	async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
		let mut request = TransactionRequest::default().with_to(to).with_input(data);
		if let Some(from) = self.sender {
			request = request.with_from(from);
		}
		self.provider
			.call(request)
			.await
			.map_err(|e| rpc_err("Call failed", e))
	}

	async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, RpcError> {
		if self.sender.is_none() {
			return Err(RpcError::InvalidConfiguration(
				"Client has no signing key".to_string(),
			));
		}

		let request = self.to_request(&tx);
		let pending = self
			.provider
			.send_transaction(request)
			.await
			.map_err(|e| rpc_err("Failed to send transaction", e))?;

		let tx_hash = *pending.tx_hash();
		info!(tx_hash = %truncate_hash(&tx_hash), nonce = tx.nonce, "Submitted transaction");
		Ok(tx_hash)
	}

	async fn wait_for_receipt(
		&self,
		hash: TxHash,
		confirmations: u64,
		timeout: Duration,
	) -> Result<TxReceipt, RpcError> {
		let start_time = tokio::time::Instant::now();
		let confirmations = confirmations.max(1);

		debug!(
			tx_hash = %truncate_hash(&hash),
			"Waiting for {} confirmations (timeout: {}s)",
			confirmations,
			timeout.as_secs()
		);

		loop {
			if start_time.elapsed() > timeout {
				return Err(RpcError::Timeout(format!(
					"Transaction timeout waiting for {} confirmations of {}",
					confirmations,
					truncate_hash(&hash)
				)));
			}

			let receipt = match self.provider.get_transaction_receipt(hash).await {
				Ok(Some(receipt)) => receipt,
				Ok(None) => {
					tokio::time::sleep(self.poll_interval).await;
					continue;
				}
				Err(e) => return Err(rpc_err("Failed to get receipt", e)),
			};

			let tx_block = receipt.block_number().unwrap_or(0);
			let current_block = self
				.provider
				.get_block_number()
				.await
				.map_err(|e| rpc_err("Failed to get block number", e))?;

			if current_block.saturating_sub(tx_block) + 1 >= confirmations {
				return Ok(TxReceipt {
					tx_hash: receipt.transaction_hash(),
					block_number: tx_block,
					success: receipt.status(),
					contract_address: receipt.contract_address(),
					gas_used: receipt.gas_used(),
				});
			}

			tokio::time::sleep(self.poll_interval).await;
		}
	}
}

/// Opens [`AlloyChainClient`]s over HTTP.
#[derive(Debug, Clone, Default)]
pub struct AlloyConnector {
	poll_interval: Option<Duration>,
}

impl AlloyConnector {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
		self.poll_interval = Some(poll_interval);
		self
	}
}

#[async_trait]
impl ChainConnector for AlloyConnector {
	async fn connect(
		&self,
		rpc_url: &str,
		private_key: Option<&str>,
	) -> Result<Arc<dyn ChainClient>, RpcError> {
		let mut client = AlloyChainClient::new(rpc_url, private_key)?;
		if let Some(poll_interval) = self.poll_interval {
			client = client.with_poll_interval(poll_interval);
		}
		Ok(Arc::new(client))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use deployer_types::BURN_ADDRESS;

	const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

	#[test]
	fn test_rejects_bad_inputs() {
		assert!(matches!(
			AlloyChainClient::new("not a url", None),
			Err(RpcError::InvalidConfiguration(_))
		));
		assert!(matches!(
			AlloyChainClient::new("http://localhost:8545", Some("0x1234")),
			Err(RpcError::InvalidConfiguration(_))
		));
	}

	#[test]
	fn test_request_carries_explicit_fields() {
		let client = AlloyChainClient::new("http://localhost:8545", Some(KEY)).unwrap();
		assert!(client.sender().is_some());

		let filler = TxRequest::filler(BURN_ADDRESS, 4, 21_000).with_fees(Some(
			FeeOverrides::Eip1559 {
				max_fee_per_gas: 20,
				max_priority_fee_per_gas: 1,
			},
		));
		let request = client.to_request(&filler);
		assert_eq!(request.nonce, Some(4));
		assert_eq!(request.gas, Some(21_000));
		assert_eq!(request.max_fee_per_gas, Some(20));
		assert_eq!(request.max_priority_fee_per_gas, Some(1));
		assert_eq!(request.from, client.sender());

		let create = client.to_request(&TxRequest::create(Bytes::from(vec![0x60, 0x80]), 0));
		assert_eq!(request.to, Some(BURN_ADDRESS.into()));
		assert_eq!(create.to, Some(alloy::primitives::TxKind::Create));
	}
}
