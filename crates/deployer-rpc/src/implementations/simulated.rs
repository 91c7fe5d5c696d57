//! In-memory EVM chain simulation.
//!
//! Models exactly what the deployment protocol depends on: per-account
//! nonces with strict ordering, CREATE addresses derived from (sender,
//! nonce), deployed code, balances, fee data and receipts. Faults such as
//! transient send errors, lost send responses, slow mining, failing probes,
//! concurrent external transactions and misreported receipts can be injected
//! to exercise recovery paths.

use crate::{address_from_key, ChainClient, ChainConnector, RpcError};
use alloy::primitives::{keccak256, Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use deployer_types::{ChainId, FeeData, TxReceipt, TxRequest, TRANSFER_GAS};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const CREATE_GAS_USED: u64 = 150_000;
const DEFAULT_BALANCE_WEI: u128 = 100_000_000_000_000_000_000;

/// A transaction accepted by a simulated chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedSend {
	pub from: Address,
	pub tx: TxRequest,
	pub hash: TxHash,
}

/// Accepted transaction not yet mined.
struct InFlight {
	from: Address,
	nonce: u64,
	created: Option<(Address, Bytes)>,
	receipt: TxReceipt,
	polls_left: u32,
}

struct ChainState {
	chain_id: ChainId,
	block_number: u64,
	nonces: HashMap<Address, u64>,
	balances: HashMap<Address, U256>,
	code: HashMap<Address, Bytes>,
	receipts: HashMap<TxHash, TxReceipt>,
	sent: Vec<SimulatedSend>,
	call_responses: HashMap<Address, Bytes>,
	fee_data: FeeData,
	min_transfer_gas: u64,
	create_gas_estimate: Option<u64>,
	send_failures: VecDeque<RpcError>,
	probe_failures: u32,
	nonce_read_failures: u32,
	external_before_create: u64,
	misreported_address: Option<Address>,
	in_flight: Vec<InFlight>,
	held_create_polls: u32,
	dropped_send_responses: u32,
	receipt_wait_failures: u32,
	known_as_nonce_too_low: bool,
	signer_override: Option<Address>,
}

impl ChainState {
	fn nonce(&self, address: Address) -> u64 {
		self.nonces.get(&address).copied().unwrap_or(0)
	}

	fn balance(&self, address: Address) -> U256 {
		self.balances
			.get(&address)
			.copied()
			.unwrap_or(U256::from(DEFAULT_BALANCE_WEI))
	}

	fn next_hash(&self, from: Address, nonce: u64) -> TxHash {
		let mut preimage = Vec::with_capacity(36);
		preimage.extend_from_slice(&self.chain_id.to_be_bytes());
		preimage.extend_from_slice(from.as_slice());
		preimage.extend_from_slice(&nonce.to_be_bytes());
		preimage.extend_from_slice(&(self.sent.len() as u64).to_be_bytes());
		keccak256(preimage)
	}

	/// Nonce advanced by someone else using the same key.
	fn apply_external(&mut self, from: Address, count: u64) {
		for _ in 0..count {
			let nonce = self.nonce(from);
			let hash = self.next_hash(from, nonce);
			let tx = TxRequest::filler(Address::ZERO, nonce, TRANSFER_GAS);
			self.nonces.insert(from, nonce + 1);
			self.block_number += 1;
			self.sent.push(SimulatedSend { from, tx, hash });
		}
	}

	fn accept(&mut self, from: Address, tx: TxRequest) -> Result<TxHash, RpcError> {
		if let Some(failure) = self.send_failures.pop_front() {
			return Err(failure);
		}
		if self
			.in_flight
			.iter()
			.any(|pending| pending.from == from && pending.nonce == tx.nonce)
		{
			let message = if self.known_as_nonce_too_low {
				format!("nonce too low: next nonce {}, tx nonce {}", self.nonce(from), tx.nonce)
			} else {
				"already known".to_string()
			};
			return Err(RpcError::from_message(message));
		}

		if tx.is_create() && self.external_before_create > 0 {
			let count = std::mem::take(&mut self.external_before_create);
			self.apply_external(from, count);
		}

		let expected = self.nonce(from);
		if tx.nonce < expected {
			return Err(RpcError::NonceTooLow(format!(
				"nonce too low: next nonce {}, tx nonce {}",
				expected, tx.nonce
			)));
		}
		if tx.nonce > expected {
			return Err(RpcError::Rpc(format!(
				"nonce too high: next nonce {}, tx nonce {}",
				expected, tx.nonce
			)));
		}

		let intrinsic = if tx.is_create() {
			53_000
		} else {
			self.min_transfer_gas
		};
		let gas_limit = tx.gas_limit.unwrap_or(intrinsic.max(CREATE_GAS_USED));
		if gas_limit < intrinsic {
			return Err(RpcError::IntrinsicGasTooLow(format!(
				"intrinsic gas too low: have {}, want {}",
				gas_limit, intrinsic
			)));
		}

		let price = tx
			.fees
			.map(|f| f.effective_price())
			.or(self.fee_data.max_fee_per_gas)
			.or(self.fee_data.gas_price)
			.unwrap_or(0);
		let cost = U256::from(gas_limit) * U256::from(price) + tx.value;
		let balance = self.balance(from);
		if balance < cost {
			return Err(RpcError::InsufficientFunds(
				"insufficient funds for gas * price + value".to_string(),
			));
		}

		let gas_used = if tx.is_create() {
			CREATE_GAS_USED.min(gas_limit)
		} else {
			intrinsic
		};
		self.balances
			.insert(from, balance - U256::from(gas_used) * U256::from(price) - tx.value);

		let hash = self.next_hash(from, tx.nonce);
		self.block_number += 1;

		let created = tx
			.is_create()
			.then(|| (from.create(tx.nonce), tx.input.clone()));
		let receipt = TxReceipt {
			tx_hash: hash,
			block_number: self.block_number,
			success: true,
			contract_address: created
				.as_ref()
				.map(|(address, _)| self.misreported_address.unwrap_or(*address)),
			gas_used,
		};

		self.nonces.insert(from, tx.nonce + 1);
		let held = if tx.is_create() {
			std::mem::take(&mut self.held_create_polls)
		} else {
			0
		};
		if held > 0 {
			self.in_flight.push(InFlight {
				from,
				nonce: tx.nonce,
				created,
				receipt,
				polls_left: held,
			});
		} else {
			if let Some((address, code)) = created {
				self.code.insert(address, code);
			}
			self.receipts.insert(hash, receipt);
		}
		self.sent.push(SimulatedSend { from, tx, hash });

		Ok(hash)
	}

	/// One code or receipt query; mines in-flight transactions that are due.
	fn poll(&mut self) {
		for pending in &mut self.in_flight {
			pending.polls_left = pending.polls_left.saturating_sub(1);
		}
		let (mined, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
			.into_iter()
			.partition(|pending| pending.polls_left == 0);
		self.in_flight = waiting;

		for pending in mined {
			self.block_number += 1;
			if let Some((address, code)) = pending.created {
				self.code.insert(address, code);
			}
			let mut receipt = pending.receipt;
			receipt.block_number = self.block_number;
			self.receipts.insert(receipt.tx_hash, receipt);
		}
	}
}

/// Handle to one simulated chain; clones share state.
#[derive(Clone)]
pub struct SimulatedChain {
	state: Arc<Mutex<ChainState>>,
}

impl SimulatedChain {
	pub fn new(chain_id: ChainId) -> Self {
		Self {
			state: Arc::new(Mutex::new(ChainState {
				chain_id,
				block_number: 1,
				nonces: HashMap::new(),
				balances: HashMap::new(),
				code: HashMap::new(),
				receipts: HashMap::new(),
				sent: Vec::new(),
				call_responses: HashMap::new(),
				fee_data: FeeData {
					max_fee_per_gas: Some(2_000_000_000),
					max_priority_fee_per_gas: Some(100_000_000),
					gas_price: Some(1_000_000_000),
				},
				min_transfer_gas: TRANSFER_GAS,
				create_gas_estimate: Some(1_200_000),
				send_failures: VecDeque::new(),
				probe_failures: 0,
				nonce_read_failures: 0,
				external_before_create: 0,
				misreported_address: None,
				in_flight: Vec::new(),
				held_create_polls: 0,
				dropped_send_responses: 0,
				receipt_wait_failures: 0,
				known_as_nonce_too_low: false,
				signer_override: None,
			})),
		}
	}

	fn lock(&self) -> MutexGuard<'_, ChainState> {
		self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	pub fn chain_id(&self) -> ChainId {
		self.lock().chain_id
	}

	/// Client signing as the owner of `private_key`.
	pub fn client(&self, private_key: &str) -> Result<SimulatedClient, RpcError> {
		let sender = address_from_key(private_key)?;
		Ok(SimulatedClient {
			chain: self.clone(),
			sender: Some(self.lock().signer_override.unwrap_or(sender)),
		})
	}

	/// Clients sign as the owner of `private_key` whatever key they are
	/// given, like a node-managed signer.
	pub fn override_signer(&self, private_key: &str) -> Result<(), RpcError> {
		self.lock().signer_override = Some(address_from_key(private_key)?);
		Ok(())
	}

	/// Client without a signing key.
	pub fn reader(&self) -> SimulatedClient {
		SimulatedClient {
			chain: self.clone(),
			sender: None,
		}
	}

	/// Advances `address` by `count` external transactions.
	pub fn advance_nonce(&self, address: Address, count: u64) {
		self.lock().apply_external(address, count);
	}

	pub fn nonce_of(&self, address: Address) -> u64 {
		self.lock().nonce(address)
	}

	pub fn set_balance(&self, address: Address, balance: U256) {
		self.lock().balances.insert(address, balance);
	}

	pub fn set_fee_data(&self, fee_data: FeeData) {
		self.lock().fee_data = fee_data;
	}

	/// Minimum gas accepted for plain transfers, as on chains with a raised
	/// intrinsic cost.
	pub fn set_min_transfer_gas(&self, gas: u64) {
		self.lock().min_transfer_gas = gas;
	}

	/// `None` makes every gas estimate fail.
	pub fn set_create_gas_estimate(&self, estimate: Option<u64>) {
		self.lock().create_gas_estimate = estimate;
	}

	pub fn set_code(&self, address: Address, code: Bytes) {
		self.lock().code.insert(address, code);
	}

	pub fn code_of(&self, address: Address) -> Bytes {
		self.lock().code.get(&address).cloned().unwrap_or_default()
	}

	/// Return data for calls to `address`.
	pub fn set_call_response(&self, address: Address, data: Bytes) {
		self.lock().call_responses.insert(address, data);
	}

	/// Queues errors returned by the next sends, in order.
	pub fn fail_next_sends(&self, errors: impl IntoIterator<Item = RpcError>) {
		self.lock().send_failures.extend(errors);
	}

	/// Makes the next `count` chain id probes fail with a connection error.
	pub fn fail_next_probes(&self, count: u32) {
		self.lock().probe_failures = count;
	}

	/// Makes the next `count` nonce reads fail with a timeout.
	pub fn fail_next_nonce_reads(&self, count: u32) {
		self.lock().nonce_read_failures = count;
	}

	/// Lets `count` external transactions from the sender land right before
	/// its next contract creation.
	pub fn race_before_next_create(&self, count: u64) {
		self.lock().external_before_create = count;
	}

	/// Receipts of creations report `address` instead of the real one.
	pub fn misreport_contract_address(&self, address: Address) {
		self.lock().misreported_address = Some(address);
	}

	/// Leaves the next creation pending until `polls` code or receipt
	/// queries have been made. The sender's nonce advances on acceptance.
	pub fn mine_next_create_after(&self, polls: u32) {
		self.lock().held_create_polls = polls;
	}

	/// The next `count` accepted sends report a timeout to the caller.
	pub fn drop_next_send_responses(&self, count: u32) {
		self.lock().dropped_send_responses = count;
	}

	/// Resending a pending transaction fails with nonce too low instead of
	/// already known, as some nodes report it.
	pub fn report_known_as_nonce_too_low(&self) {
		self.lock().known_as_nonce_too_low = true;
	}

	/// The next `count` receipt waits time out, mined or not.
	pub fn fail_next_receipt_waits(&self, count: u32) {
		self.lock().receipt_wait_failures = count;
	}

	/// All accepted transactions, external ones included.
	pub fn sent(&self) -> Vec<SimulatedSend> {
		self.lock().sent.clone()
	}

	pub fn sent_by(&self, address: Address) -> Vec<SimulatedSend> {
		self.lock()
			.sent
			.iter()
			.filter(|s| s.from == address)
			.cloned()
			.collect()
	}
}

/// [`ChainClient`] over a [`SimulatedChain`].
#[derive(Clone)]
pub struct SimulatedClient {
	chain: SimulatedChain,
	sender: Option<Address>,
}

#[async_trait]
impl ChainClient for SimulatedClient {
	fn sender(&self) -> Option<Address> {
		self.sender
	}

	async fn chain_id(&self) -> Result<ChainId, RpcError> {
		let mut state = self.chain.lock();
		if state.probe_failures > 0 {
			state.probe_failures -= 1;
			return Err(RpcError::Connection("connect ECONNREFUSED".to_string()));
		}
		Ok(state.chain_id)
	}

	async fn transaction_count(&self, address: Address) -> Result<u64, RpcError> {
		let mut state = self.chain.lock();
		if state.nonce_read_failures > 0 {
			state.nonce_read_failures -= 1;
			return Err(RpcError::Timeout("RPC timeout".to_string()));
		}
		Ok(state.nonce(address))
	}

	async fn code_at(&self, address: Address) -> Result<Bytes, RpcError> {
		let mut state = self.chain.lock();
		state.poll();
		Ok(state.code.get(&address).cloned().unwrap_or_default())
	}

	async fn balance(&self, address: Address) -> Result<U256, RpcError> {
		Ok(self.chain.lock().balance(address))
	}

	async fn fee_data(&self) -> Result<FeeData, RpcError> {
		Ok(self.chain.lock().fee_data)
	}

	async fn estimate_gas(&self, tx: &TxRequest) -> Result<u64, RpcError> {
		let state = self.chain.lock();
		let estimate = state.create_gas_estimate.ok_or_else(|| {
			RpcError::Rpc("execution reverted: gas required exceeds allowance".to_string())
		})?;
		if tx.is_create() {
			Ok(estimate)
		} else {
			Ok(state.min_transfer_gas.max(estimate / 10))
		}
	}

	async fn call(&self, to: Address, _data: Bytes) -> Result<Bytes, RpcError> {
		Ok(self
			.chain
			.lock()
			.call_responses
			.get(&to)
			.cloned()
			.unwrap_or_default())
	}

	async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, RpcError> {
		let from = self.sender.ok_or_else(|| {
			RpcError::InvalidConfiguration("Client has no signing key".to_string())
		})?;
		let mut state = self.chain.lock();
		let hash = state.accept(from, tx)?;
		if state.dropped_send_responses > 0 {
			state.dropped_send_responses -= 1;
			return Err(RpcError::Timeout("request timed out".to_string()));
		}
		Ok(hash)
	}

	async fn wait_for_receipt(
		&self,
		hash: TxHash,
		_confirmations: u64,
		_timeout: Duration,
	) -> Result<TxReceipt, RpcError> {
		let mut state = self.chain.lock();
		state.poll();
		if state.receipt_wait_failures > 0 {
			state.receipt_wait_failures -= 1;
			return Err(RpcError::Timeout("confirmation timeout".to_string()));
		}
		state
			.receipts
			.get(&hash)
			.cloned()
			.ok_or_else(|| RpcError::Timeout(format!("Transaction timeout: {} not found", hash)))
	}
}

/// A set of simulated chains addressed by URL.
#[derive(Clone, Default)]
pub struct SimulatedNetwork {
	chains: Arc<Mutex<HashMap<String, SimulatedChain>>>,
}

impl SimulatedNetwork {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a new chain reachable at `rpc_url`.
	pub fn add_chain(&self, rpc_url: impl Into<String>, chain_id: ChainId) -> SimulatedChain {
		let chain = SimulatedChain::new(chain_id);
		self.chains
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.insert(rpc_url.into(), chain.clone());
		chain
	}

	/// Makes an existing chain reachable at an additional URL.
	pub fn alias(&self, rpc_url: impl Into<String>, chain: &SimulatedChain) {
		self.chains
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.insert(rpc_url.into(), chain.clone());
	}

	pub fn chain(&self, rpc_url: &str) -> Option<SimulatedChain> {
		self.chains
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.get(rpc_url)
			.cloned()
	}
}

#[async_trait]
impl ChainConnector for SimulatedNetwork {
	async fn connect(
		&self,
		rpc_url: &str,
		private_key: Option<&str>,
	) -> Result<Arc<dyn ChainClient>, RpcError> {
		let chain = self.chain(rpc_url).ok_or_else(|| {
			RpcError::Connection(format!("getaddrinfo ENOTFOUND {}", rpc_url))
		})?;
		let client = match private_key {
			Some(key) => chain.client(key)?,
			None => chain.reader(),
		};
		Ok(Arc::new(client))
	}
}
