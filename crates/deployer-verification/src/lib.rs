//! Source verification for deployed contracts.
//!
//! Verification is advisory: failures are recorded and logged but never
//! change the outcome of a deployment. Every submission and every polled
//! status is persisted per contract address, so a later refresh can poll
//! outstanding requests and resubmit chains whose previous attempt was lost
//! or rejected for a transient reason.

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use chrono::Utc;
use deployer_storage::{StorageError, StorageService, VERIFICATION_NAMESPACE};
use deployer_types::{ChainId, ChainVerification, VerificationRecord};
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub mod implementations {
	pub mod etherscan;
}

pub use implementations::etherscan::EtherscanV2Verifier;

#[derive(Debug, Error)]
pub enum VerificationError {
	#[error("Missing required field: {0}")]
	MissingField(&'static str),
	#[error("HTTP error: {0}")]
	Http(String),
	#[error("Verification rejected: {0}")]
	Rejected(String),
	#[error("Invalid response: {0}")]
	InvalidResponse(String),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// Everything needed to verify one contract on one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRequest {
	pub chain_id: ChainId,
	pub address: Address,
	/// Fully qualified name, e.g. `contracts/DLE.sol:DLE`.
	pub contract_name: String,
	pub compiler_version: String,
	pub standard_json_input: serde_json::Value,
	/// ABI-encoded constructor arguments.
	pub constructor_args: Bytes,
	pub api_key: String,
}

impl VerificationRequest {
	pub fn validate(&self) -> Result<(), VerificationError> {
		if self.api_key.trim().is_empty() {
			return Err(VerificationError::MissingField("api_key"));
		}
		if self.contract_name.trim().is_empty() {
			return Err(VerificationError::MissingField("contract_name"));
		}
		if self.compiler_version.trim().is_empty() {
			return Err(VerificationError::MissingField("compiler_version"));
		}
		if self.standard_json_input.is_null() {
			return Err(VerificationError::MissingField("standard_json_input"));
		}
		Ok(())
	}

	/// Constructor arguments as hex without a `0x` prefix.
	pub fn constructor_args_hex(&self) -> String {
		hex::encode(&self.constructor_args)
	}
}

/// Third-party verification service.
#[async_trait]
pub trait VerificationInterface: Send + Sync {
	/// Submits sources, returning the service's request id.
	async fn submit(&self, request: &VerificationRequest) -> Result<String, VerificationError>;

	/// Raw status of a previous submission.
	async fn check_status(
		&self,
		chain_id: ChainId,
		guid: &str,
		api_key: &str,
	) -> Result<String, VerificationError>;
}

/// Storage key of a contract's record.
pub fn record_key(address: Address) -> String {
	format!("{:#x}", address)
}

/// Submits, polls and resubmits verification with durable records.
pub struct VerificationCoordinator {
	verifier: Arc<dyn VerificationInterface>,
	storage: Arc<StorageService>,
	write_lock: Mutex<()>,
}

impl VerificationCoordinator {
	pub fn new(verifier: Arc<dyn VerificationInterface>, storage: Arc<StorageService>) -> Self {
		Self {
			verifier,
			storage,
			write_lock: Mutex::new(()),
		}
	}

	pub async fn record(
		&self,
		address: Address,
	) -> Result<Option<VerificationRecord>, VerificationError> {
		Ok(self
			.storage
			.retrieve_optional(VERIFICATION_NAMESPACE, &record_key(address))
			.await?)
	}

	async fn update<F>(
		&self,
		address: Address,
		apply: F,
	) -> Result<VerificationRecord, VerificationError>
	where
		F: FnOnce(&mut VerificationRecord),
	{
		let _guard = self.write_lock.lock().await;
		let mut record = self.record(address).await?.unwrap_or_default();
		apply(&mut record);
		self.storage
			.store(VERIFICATION_NAMESPACE, &record_key(address), &record)
			.await?;
		Ok(record)
	}

	/// Submits `request` and persists the guid with status `submitted`.
	///
	/// A rejected submission is persisted without a guid so that the next
	/// refresh resubmits it.
	pub async fn submit(&self, request: &VerificationRequest) -> Result<String, VerificationError> {
		request.validate()?;
		let chain_id = request.chain_id;

		match self.verifier.submit(request).await {
			Ok(guid) => {
				info!(chain_id, address = %request.address, guid = %guid, "Verification submitted");
				let stored = guid.clone();
				self.update(request.address, |record| {
					record.set_chain(chain_id, ChainVerification::submitted(stored));
				})
				.await?;
				Ok(guid)
			}
			Err(e) => {
				warn!(chain_id, address = %request.address, "Verification submission failed: {}", e);
				let status = e.to_string();
				self.update(request.address, |record| {
					record.set_chain(
						chain_id,
						ChainVerification {
							guid: None,
							status: Some(status),
							updated_at: Utc::now(),
						},
					);
				})
				.await?;
				Err(e)
			}
		}
	}

	/// Submits several requests concurrently.
	pub async fn submit_all(
		&self,
		requests: &[VerificationRequest],
	) -> Vec<(ChainId, Result<String, VerificationError>)> {
		let submissions = requests
			.iter()
			.map(|request| async move { (request.chain_id, self.submit(request).await) });
		join_all(submissions).await
	}

	/// Polls `guid` and persists the raw status verbatim.
	pub async fn check_status(
		&self,
		chain_id: ChainId,
		address: Address,
		guid: &str,
		api_key: &str,
	) -> Result<String, VerificationError> {
		let status = self.verifier.check_status(chain_id, guid, api_key).await?;
		info!(chain_id, %address, status = %status, "Verification status");
		let stored = status.clone();
		self.update(address, |record| record.set_status(chain_id, stored))
			.await?;
		Ok(status)
	}

	/// Resubmits chains that need it, then polls every chain with a guid.
	///
	/// `reconstruct` rebuilds the request for a chain from the persisted
	/// deployment parameters; chains it cannot rebuild are only polled.
	pub async fn refresh<F>(
		&self,
		address: Address,
		api_key: &str,
		reconstruct: F,
	) -> Result<VerificationRecord, VerificationError>
	where
		F: Fn(ChainId) -> Option<VerificationRequest>,
	{
		let record = self.record(address).await?.unwrap_or_default();

		for chain_id in record.chain_ids() {
			let needs_resubmission = record
				.chain(chain_id)
				.is_some_and(ChainVerification::needs_resubmission);
			if !needs_resubmission {
				continue;
			}

			match reconstruct(chain_id) {
				Some(request) => {
					info!(chain_id, %address, "Resubmitting verification");
					if let Err(e) = self.submit(&request).await {
						warn!(chain_id, %address, "Resubmission failed: {}", e);
					}
				}
				None => warn!(chain_id, %address, "Cannot rebuild verification request"),
			}
		}

		let record = self.record(address).await?.unwrap_or_default();
		for chain_id in record.chain_ids() {
			let Some(guid) = record.chain(chain_id).and_then(|c| c.guid.clone()) else {
				continue;
			};
			if let Err(e) = self.check_status(chain_id, address, &guid, api_key).await {
				warn!(chain_id, %address, "Status check failed: {}", e);
			}
		}

		Ok(self.record(address).await?.unwrap_or_default())
	}
}
