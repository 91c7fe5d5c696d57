//! Same-address deployment of one contract across chains.
//!
//! Every chain of a wave sends its creation transaction at the same nonce.
//! With the same sender and init code the CREATE address is then identical
//! everywhere. Chains whose nonce is behind the target first burn the
//! missing nonces with zero-value transfers to the burn address.
//!
//! Each chain runs in its own task and moves through
//! [`ChainDeployState`]; a fatal error on one chain raises the run's
//! [`AbortSignal`], which stops every chain that has not submitted yet.

use crate::error::DeployError;
use crate::fees::{FeePolicy, GasPolicy};
use crate::lifecycle::ChainLifecycle;
use crate::logo::LogoInitializer;
use alloy::primitives::{Address, Bytes, TxHash};
use deployer_config::DeployerConfig;
use deployer_nonce::NonceManager;
use deployer_rpc::{Connection, RpcConnectionManager, RpcError};
use deployer_types::{
	truncate_hash, AddressAgreement, ChainDeployState, ChainId, DeploymentPlan, DeploymentResult,
	TxReceipt, TxRequest, BURN_ADDRESS,
};
use futures::future::join_all;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Protocol settings shared by every wave of a run.
#[derive(Debug, Clone)]
pub struct DeploySettings {
	pub confirmations: u64,
	pub confirmation_timeout: Duration,
	/// Receipt waits per transaction before a timeout is final.
	pub confirmation_rounds: u32,
	/// Total attempts for a creation transaction.
	pub submit_attempts: u32,
	pub submit_retry_delay: Duration,
	/// Total attempts for transient failures of other sends.
	pub send_max_retries: u32,
	pub filler_gas_limit: u64,
	pub filler_gas_limit_escalated: u64,
	pub filler_confirmations: u64,
	pub fees: FeePolicy,
	pub primary_gas: GasPolicy,
	pub module_gas: GasPolicy,
}

impl DeploySettings {
	pub fn from_config(config: &DeployerConfig) -> Self {
		Self {
			confirmations: config.deployment.confirmations,
			confirmation_timeout: config.deployment.confirmation_timeout(),
			confirmation_rounds: config.deployment.confirmation_rounds,
			submit_attempts: config.deployment.submit_attempts,
			submit_retry_delay: config.deployment.submit_retry_delay(),
			send_max_retries: config.rpc.send_max_retries,
			filler_gas_limit: config.gas.filler_gas_limit,
			filler_gas_limit_escalated: config.gas.filler_gas_limit_escalated,
			filler_confirmations: 1,
			fees: FeePolicy::from_config(&config.fees),
			primary_gas: GasPolicy::primary(&config.gas),
			module_gas: GasPolicy::module(&config.gas),
		}
	}
}

impl Default for DeploySettings {
	fn default() -> Self {
		Self::from_config(&DeployerConfig::default())
	}
}

/// Run-wide abort flag; the first reason wins.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
	reason: Arc<OnceLock<String>>,
}

impl AbortSignal {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns false when the signal was already raised.
	pub fn trigger(&self, reason: impl Into<String>) -> bool {
		self.reason.set(reason.into()).is_ok()
	}

	pub fn is_triggered(&self) -> bool {
		self.reason.get().is_some()
	}

	pub fn reason(&self) -> Option<String> {
		self.reason.get().cloned()
	}
}

/// What one chain deploys within a wave.
#[derive(Debug, Clone)]
pub struct ChainJob {
	pub label: String,
	pub init_code: Bytes,
	pub target_nonce: u64,
	pub gas: GasPolicy,
	/// Logo URI to initialize on the deployed contract, if any.
	pub logo_uri: Option<String>,
}

/// Results of one wave.
#[derive(Debug, Clone)]
pub struct WaveOutcome {
	pub target_nonce: u64,
	pub results: Vec<DeploymentResult>,
}

impl WaveOutcome {
	pub fn agreement(&self) -> AddressAgreement {
		AddressAgreement::from_results(&self.results)
	}

	pub fn all_succeeded(&self) -> bool {
		!self.results.is_empty() && self.results.iter().all(|r| r.success)
	}
}

enum Submission {
	Sent(TxHash),
	/// An earlier attempt whose response was lost created the contract.
	Landed,
	AlreadyDeployed,
}

/// On-chain effect that proves a transaction was mined.
#[derive(Debug, Clone, Copy)]
enum Landing {
	CodeAt(Address),
	NonceUsed(u64),
}

#[derive(Default)]
struct ChainProgress {
	fillers_sent: u64,
	tx_hash: Option<TxHash>,
	already_deployed: bool,
}

/// Drives deployment waves across chains.
#[derive(Clone)]
pub struct DeploymentOrchestrator {
	rpc: Arc<RpcConnectionManager>,
	nonces: Arc<NonceManager>,
	settings: Arc<DeploySettings>,
	abort: AbortSignal,
}

impl DeploymentOrchestrator {
	pub fn new(
		rpc: Arc<RpcConnectionManager>,
		nonces: Arc<NonceManager>,
		settings: DeploySettings,
	) -> Self {
		Self {
			rpc,
			nonces,
			settings: Arc::new(settings),
			abort: AbortSignal::new(),
		}
	}

	pub fn abort_signal(&self) -> &AbortSignal {
		&self.abort
	}

	pub fn nonces(&self) -> &Arc<NonceManager> {
		&self.nonces
	}

	pub fn settings(&self) -> &DeploySettings {
		&self.settings
	}

	/// Authoritative nonce of every connection, read concurrently.
	pub async fn read_nonces(
		&self,
		connections: &[Connection],
	) -> Vec<(ChainId, Result<u64, DeployError>)> {
		let reads = connections.iter().map(|connection| async move {
			let nonce = self
				.nonces
				.get_nonce_with_client(
					connection.client.as_ref(),
					connection.address,
					connection.chain_id,
				)
				.await
				.map_err(DeployError::from);
			(connection.chain_id, nonce)
		});
		join_all(reads).await
	}

	/// Reads every chain's nonce and fixes the wave target at their maximum.
	///
	/// Chains whose nonce cannot be read are left out of the plan and
	/// returned as failed results.
	pub async fn plan(
		&self,
		label: &str,
		init_code: Bytes,
		connections: &[Connection],
	) -> Result<(DeploymentPlan, Vec<DeploymentResult>), DeployError> {
		let mut chains = Vec::new();
		let mut failures = Vec::new();
		let mut target_nonce = 0;

		for (chain_id, nonce) in self.read_nonces(connections).await {
			match nonce {
				Ok(nonce) => {
					target_nonce = target_nonce.max(nonce);
					chains.push(chain_id);
				}
				Err(e) => {
					warn!(chain_id, contract = label, "Dropping chain from wave: {}", e);
					failures.push(DeploymentResult::failure(chain_id, e.to_string()));
				}
			}
		}

		if chains.is_empty() {
			return Err(DeployError::NoConnections(format!(
				"no chain reported a nonce for {}",
				label
			)));
		}

		info!(
			contract = label,
			target_nonce,
			chains = ?chains,
			"Deployment wave planned"
		);
		Ok((
			DeploymentPlan {
				label: label.to_string(),
				init_code,
				target_nonce,
				chains,
			},
			failures,
		))
	}

	/// Runs `plan` with one task per chain.
	pub async fn execute(
		&self,
		plan: &DeploymentPlan,
		connections: &[Connection],
		logo_uri: Option<&str>,
	) -> Vec<DeploymentResult> {
		let mut results = Vec::with_capacity(plan.chains.len());
		let mut handles = Vec::with_capacity(plan.chains.len());

		for &chain_id in &plan.chains {
			let Some(connection) = connections.iter().find(|c| c.chain_id == chain_id).cloned()
			else {
				results.push(DeploymentResult::failure(chain_id, "No connection for chain"));
				continue;
			};

			let job = ChainJob {
				label: plan.label.clone(),
				init_code: plan.init_code.clone(),
				target_nonce: plan.target_nonce,
				gas: self.settings.primary_gas,
				logo_uri: logo_uri.map(str::to_string),
			};
			let orchestrator = self.clone();
			let handle = tokio::spawn(async move {
				let _lease = orchestrator
					.nonces
					.lease(connection.address, connection.chain_id)
					.await;
				orchestrator.deploy_on_chain(&connection, &job).await
			});
			handles.push((chain_id, handle));
		}

		for (chain_id, handle) in handles {
			match handle.await {
				Ok(result) => results.push(result),
				Err(e) => results.push(DeploymentResult::failure(
					chain_id,
					format!("Deployment task failed: {}", e),
				)),
			}
		}

		results
	}

	/// Plans and executes one wave.
	pub async fn deploy(
		&self,
		label: &str,
		init_code: Bytes,
		connections: &[Connection],
		logo_uri: Option<&str>,
	) -> Result<WaveOutcome, DeployError> {
		let (plan, mut results) = self.plan(label, init_code, connections).await?;
		results.extend(self.execute(&plan, connections, logo_uri).await);
		Ok(WaveOutcome {
			target_nonce: plan.target_nonce,
			results,
		})
	}

	/// Deploys `job` on one chain.
	///
	/// The caller must hold the sender's nonce lease for the chain.
	pub async fn deploy_on_chain(&self, connection: &Connection, job: &ChainJob) -> DeploymentResult {
		let chain_id = connection.chain_id;
		let predicted = connection.address.create(job.target_nonce);
		let mut lifecycle = ChainLifecycle::new(chain_id, &job.label);
		let mut progress = ChainProgress::default();

		let outcome = self
			.run_chain(connection, job, &mut lifecycle, &mut progress)
			.await;

		let (success, address, error) = match outcome {
			Ok(()) => (true, Some(predicted), None),
			Err(e) => {
				if e.is_fatal() && self.abort.trigger(e.to_string()) {
					error!(chain_id, contract = %job.label, "Aborting run: {}", e);
				} else {
					error!(chain_id, contract = %job.label, "Deployment failed: {}", e);
				}
				lifecycle.fail();
				(false, None, Some(e.to_string()))
			}
		};

		DeploymentResult {
			chain_id,
			address,
			success,
			error,
			verification: None,
			nonce: Some(job.target_nonce),
			tx_hash: progress.tx_hash,
			fillers_sent: progress.fillers_sent,
			already_deployed: progress.already_deployed,
			final_state: lifecycle.state(),
		}
	}

	async fn run_chain(
		&self,
		connection: &Connection,
		job: &ChainJob,
		lifecycle: &mut ChainLifecycle,
		progress: &mut ChainProgress,
	) -> Result<(), DeployError> {
		let chain_id = connection.chain_id;
		let client = connection.client.as_ref();
		let sender = connection.address;
		let target = job.target_nonce;
		let predicted = sender.create(target);

		self.check_abort(chain_id)?;
		let current = self
			.nonces
			.get_nonce_with_client(client, sender, chain_id)
			.await?;
		lifecycle.set_state(ChainDeployState::NonceRead)?;
		info!(
			chain_id,
			contract = %job.label,
			nonce = current,
			target,
			%predicted,
			"Nonce read"
		);

		if current > target {
			if self.has_code(connection, predicted).await? {
				lifecycle.set_state(ChainDeployState::Aligned)?;
				return self
					.finish_existing(connection, job, predicted, lifecycle, progress)
					.await;
			}
			return Err(DeployError::NonceRace {
				chain_id,
				expected: target,
				found: current,
			});
		}

		if current < target {
			lifecycle.set_state(ChainDeployState::Aligning)?;
			self.align(connection, current, target, progress).await?;
		}
		lifecycle.set_state(ChainDeployState::Aligned)?;

		if self.has_code(connection, predicted).await? {
			return self
				.finish_existing(connection, job, predicted, lifecycle, progress)
				.await;
		}
		self.check_abort(chain_id)?;

		let fees = self.settings.fees.fetch(client, chain_id).await?;
		let tx = TxRequest::create(job.init_code.clone(), target).with_fees(fees);
		let gas_limit = job.gas.gas_limit(client, &tx, sender, chain_id).await?;

		let tx_hash = match self
			.submit(connection, tx.with_gas_limit(gas_limit), predicted)
			.await?
		{
			Submission::Sent(tx_hash) => tx_hash,
			Submission::Landed => {
				lifecycle.set_state(ChainDeployState::DeploySubmitted)?;
				return self
					.finish_landed(connection, job, predicted, lifecycle)
					.await;
			}
			Submission::AlreadyDeployed => {
				return self
					.finish_existing(connection, job, predicted, lifecycle, progress)
					.await;
			}
		};
		progress.tx_hash = Some(tx_hash);
		lifecycle.set_state(ChainDeployState::DeploySubmitted)?;

		let receipt = self
			.confirm(
				connection,
				tx_hash,
				self.settings.confirmations,
				Landing::CodeAt(predicted),
			)
			.await
			.map_err(|e| DeployError::rpc(chain_id, e))?;
		self.nonces
			.mark_transaction_confirmed(sender, chain_id, tx_hash);

		let Some(receipt) = receipt else {
			return self
				.finish_landed(connection, job, predicted, lifecycle)
				.await;
		};
		if !receipt.success {
			return Err(DeployError::rpc(
				chain_id,
				RpcError::Rpc(format!(
					"Creation transaction {} reverted",
					truncate_hash(&tx_hash)
				)),
			));
		}
		if receipt.contract_address != Some(predicted) {
			return Err(DeployError::AddressMismatch {
				chain_id,
				predicted,
				actual: receipt.contract_address,
			});
		}

		lifecycle.set_state(ChainDeployState::Confirmed)?;
		info!(
			chain_id,
			contract = %job.label,
			address = %predicted,
			block = receipt.block_number,
			"Contract deployed"
		);

		if let Some(uri) = &job.logo_uri {
			self.initialize_logo(connection, predicted, uri).await;
		}
		Ok(())
	}

	/// Completes a creation confirmed by code at `predicted` instead of a
	/// receipt.
	async fn finish_landed(
		&self,
		connection: &Connection,
		job: &ChainJob,
		predicted: Address,
		lifecycle: &mut ChainLifecycle,
	) -> Result<(), DeployError> {
		lifecycle.set_state(ChainDeployState::Confirmed)?;
		info!(
			chain_id = connection.chain_id,
			contract = %job.label,
			address = %predicted,
			"Contract deployed, confirmed by code at predicted address"
		);

		if let Some(uri) = &job.logo_uri {
			self.initialize_logo(connection, predicted, uri).await;
		}
		Ok(())
	}

	async fn finish_existing(
		&self,
		connection: &Connection,
		job: &ChainJob,
		predicted: Address,
		lifecycle: &mut ChainLifecycle,
		progress: &mut ChainProgress,
	) -> Result<(), DeployError> {
		lifecycle.set_state(ChainDeployState::Confirmed)?;
		progress.already_deployed = true;
		info!(
			chain_id = connection.chain_id,
			contract = %job.label,
			address = %predicted,
			"Code already present at predicted address, skipping creation"
		);

		if let Some(uri) = &job.logo_uri {
			self.initialize_logo(connection, predicted, uri).await;
		}
		Ok(())
	}

	async fn initialize_logo(&self, connection: &Connection, contract: Address, uri: &str) {
		let initializer = LogoInitializer {
			rpc: &self.rpc,
			nonces: &self.nonces,
			fees: self.settings.fees,
			send_max_retries: self.settings.send_max_retries,
			confirmations: self.settings.confirmations,
			timeout: self.settings.confirmation_timeout,
		};
		if let Err(e) = initializer.ensure(connection, contract, uri).await {
			warn!(
				chain_id = connection.chain_id,
				%contract,
				"Logo URI initialization failed: {}",
				e
			);
		}
	}

	/// Sends zero-value transfers at `current..target`, one at a time.
	async fn align(
		&self,
		connection: &Connection,
		mut current: u64,
		target: u64,
		progress: &mut ChainProgress,
	) -> Result<(), DeployError> {
		let chain_id = connection.chain_id;
		let client = connection.client.as_ref();
		let sender = connection.address;
		let mut gas_limit = self.settings.filler_gas_limit;

		info!(
			chain_id,
			from = current,
			to = target,
			"Aligning nonce with {} filler transactions",
			target - current
		);

		while current < target {
			self.check_abort(chain_id)?;
			let fees = self.settings.fees.fetch(client, chain_id).await?;
			let tx = TxRequest::filler(BURN_ADDRESS, current, gas_limit).with_fees(fees);

			match self.send_filler(connection, tx).await {
				Ok(tx_hash) => {
					self.nonces.reserve_nonce(sender, chain_id, current);
					progress.fillers_sent += 1;
					debug!(
						chain_id,
						nonce = current,
						tx_hash = %truncate_hash(&tx_hash),
						"Filler confirmed"
					);
					current += 1;
				}
				Err(RpcError::IntrinsicGasTooLow(message))
					if gas_limit < self.settings.filler_gas_limit_escalated =>
				{
					gas_limit = self.settings.filler_gas_limit_escalated;
					warn!(
						chain_id,
						nonce = current,
						gas_limit,
						"Filler rejected ({}), retrying with higher gas",
						message
					);
				}
				Err(RpcError::NonceTooLow(message)) => {
					warn!(chain_id, nonce = current, "Filler nonce taken, refreshing: {}", message);
					self.nonces.reset_nonce(sender, chain_id);
					let refreshed = self
						.nonces
						.get_nonce_with_client(client, sender, chain_id)
						.await?;
					if refreshed > target {
						return Err(DeployError::Alignment {
							chain_id,
							message: format!(
								"nonce moved to {} past target {}",
								refreshed, target
							),
						});
					}
					current = refreshed;
				}
				Err(RpcError::InsufficientFunds(message)) => {
					return Err(DeployError::InsufficientFunds { chain_id, message });
				}
				Err(e) => {
					return Err(DeployError::Alignment {
						chain_id,
						message: format!("filler at nonce {} failed: {}", current, e),
					});
				}
			}
		}

		info!(chain_id, nonce = current, "Nonce aligned");
		Ok(())
	}

	async fn send_filler(&self, connection: &Connection, tx: TxRequest) -> Result<TxHash, RpcError> {
		let client = connection.client.as_ref();
		let nonce = tx.nonce;

		let tx_hash = self
			.rpc
			.with_retry("Filler send", self.settings.send_max_retries, || {
				client.send_transaction(tx.clone())
			})
			.await?;
		self.nonces
			.mark_transaction_pending(connection.address, connection.chain_id, nonce, tx_hash);

		let receipt = self
			.confirm(
				connection,
				tx_hash,
				self.settings.filler_confirmations,
				Landing::NonceUsed(nonce),
			)
			.await?;
		self.nonces
			.mark_transaction_confirmed(connection.address, connection.chain_id, tx_hash);

		if receipt.is_some_and(|r| !r.success) {
			return Err(RpcError::Rpc(format!(
				"Filler {} reverted",
				truncate_hash(&tx_hash)
			)));
		}
		Ok(tx_hash)
	}

	/// Sends the creation transaction with a fixed delay between attempts.
	///
	/// A failed attempt may still have reached the node. When a later attempt
	/// finds the nonce used or the transaction known, the earlier broadcast is
	/// awaited before the chain is declared raced.
	async fn submit(
		&self,
		connection: &Connection,
		tx: TxRequest,
		predicted: Address,
	) -> Result<Submission, DeployError> {
		let chain_id = connection.chain_id;
		let client = connection.client.as_ref();
		let sender = connection.address;
		let attempts = self.settings.submit_attempts.max(1);
		let mut attempt = 0;
		let mut maybe_broadcast = false;

		loop {
			attempt += 1;
			match client.send_transaction(tx.clone()).await {
				Ok(tx_hash) => {
					self.nonces
						.mark_transaction_pending(sender, chain_id, tx.nonce, tx_hash);
					info!(
						chain_id,
						nonce = tx.nonce,
						tx_hash = %truncate_hash(&tx_hash),
						"Creation transaction sent"
					);
					return Ok(Submission::Sent(tx_hash));
				}
				Err(RpcError::AlreadyKnown(message)) => {
					info!(chain_id, nonce = tx.nonce, "Creation already in mempool: {}", message);
					if let Some(submission) = self
						.await_in_flight(connection, tx.nonce, predicted)
						.await?
					{
						return Ok(submission);
					}
					return Err(DeployError::rpc(chain_id, RpcError::AlreadyKnown(message)));
				}
				Err(RpcError::NonceTooLow(message)) => {
					warn!(chain_id, nonce = tx.nonce, "Nonce taken at submit, refreshing: {}", message);
					self.nonces.reset_nonce(sender, chain_id);
					let live = self
						.nonces
						.get_nonce_with_client(client, sender, chain_id)
						.await?;

					if live > tx.nonce {
						if self.has_code(connection, predicted).await? {
							return Ok(if maybe_broadcast {
								Submission::Landed
							} else {
								Submission::AlreadyDeployed
							});
						}
						if maybe_broadcast || self.pending_hash(sender, chain_id, tx.nonce).is_some() {
							if let Some(submission) = self
								.await_in_flight(connection, tx.nonce, predicted)
								.await?
							{
								return Ok(submission);
							}
						}
						return Err(DeployError::NonceRace {
							chain_id,
							expected: tx.nonce,
							found: live,
						});
					}
					if attempt >= attempts {
						return Err(DeployError::rpc(chain_id, RpcError::NonceTooLow(message)));
					}
				}
				Err(RpcError::InsufficientFunds(message)) => {
					return Err(DeployError::InsufficientFunds { chain_id, message });
				}
				Err(e) => {
					maybe_broadcast |= e.is_retryable();
					if attempt >= attempts {
						return Err(DeployError::rpc(chain_id, e));
					}
					warn!(
						chain_id,
						"Creation send failed, attempt {}/{}, retrying in {:?}: {}",
						attempt,
						attempts,
						self.settings.submit_retry_delay,
						e
					);
					tokio::time::sleep(self.settings.submit_retry_delay).await;
				}
			}
		}
	}

	fn pending_hash(&self, sender: Address, chain_id: ChainId, nonce: u64) -> Option<TxHash> {
		self.nonces
			.pending_transactions(sender, chain_id)
			.into_iter()
			.rev()
			.find(|pending| pending.nonce == nonce)
			.map(|pending| pending.tx_hash)
	}

	/// Waits for a creation at `nonce` that was sent but not acknowledged.
	///
	/// A hash recorded in the pending ledger is handed back for the regular
	/// receipt wait. Otherwise the predicted address is polled for code;
	/// `None` means nothing landed within the confirmation rounds.
	async fn await_in_flight(
		&self,
		connection: &Connection,
		nonce: u64,
		predicted: Address,
	) -> Result<Option<Submission>, DeployError> {
		if let Some(tx_hash) = self.pending_hash(connection.address, connection.chain_id, nonce) {
			info!(
				chain_id = connection.chain_id,
				nonce,
				tx_hash = %truncate_hash(&tx_hash),
				"Awaiting earlier creation transaction"
			);
			return Ok(Some(Submission::Sent(tx_hash)));
		}

		let rounds = self.settings.confirmation_rounds.max(1);
		for round in 1..=rounds {
			if self.has_code(connection, predicted).await? {
				return Ok(Some(Submission::Landed));
			}
			debug!(
				chain_id = connection.chain_id,
				nonce,
				"No code at {} yet, round {}/{}",
				predicted,
				round,
				rounds
			);
			if round < rounds {
				tokio::time::sleep(self.settings.submit_retry_delay).await;
			}
		}
		Ok(None)
	}

	/// Waits for the receipt of `tx_hash`, re-waiting after timeouts.
	///
	/// Between rounds `landing` is checked; when it shows the transaction
	/// mined the wait ends with `None` instead of a receipt.
	async fn confirm(
		&self,
		connection: &Connection,
		tx_hash: TxHash,
		confirmations: u64,
		landing: Landing,
	) -> Result<Option<TxReceipt>, RpcError> {
		let client = connection.client.as_ref();
		let rounds = self.settings.confirmation_rounds.max(1);
		let mut round = 0;

		loop {
			round += 1;
			match client
				.wait_for_receipt(tx_hash, confirmations, self.settings.confirmation_timeout)
				.await
			{
				Ok(receipt) => return Ok(Some(receipt)),
				Err(RpcError::Timeout(message)) => {
					if self.has_landed(connection, landing).await? {
						info!(
							chain_id = connection.chain_id,
							tx_hash = %truncate_hash(&tx_hash),
							?landing,
							"Receipt wait timed out but transaction is mined"
						);
						return Ok(None);
					}
					if round >= rounds {
						return Err(RpcError::Timeout(message));
					}
					warn!(
						chain_id = connection.chain_id,
						tx_hash = %truncate_hash(&tx_hash),
						"Confirmation timed out, round {}/{}: {}",
						round,
						rounds,
						message
					);
				}
				Err(e) => return Err(e),
			}
		}
	}

	async fn has_landed(&self, connection: &Connection, landing: Landing) -> Result<bool, RpcError> {
		let client = connection.client.as_ref();
		match landing {
			Landing::CodeAt(address) => Ok(!client.code_at(address).await?.is_empty()),
			Landing::NonceUsed(nonce) => {
				Ok(client.transaction_count(connection.address).await? > nonce)
			}
		}
	}

	async fn has_code(&self, connection: &Connection, address: Address) -> Result<bool, DeployError> {
		connection
			.client
			.code_at(address)
			.await
			.map(|code| !code.is_empty())
			.map_err(|e| DeployError::rpc(connection.chain_id, e))
	}

	fn check_abort(&self, chain_id: ChainId) -> Result<(), DeployError> {
		match self.abort.reason() {
			Some(reason) => Err(DeployError::Aborted { chain_id, reason }),
			None => Ok(()),
		}
	}
}
