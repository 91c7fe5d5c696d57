//! Nonce bookkeeping for one deployment run.
//!
//! A [`NonceManager`] is created per run and tracks, for every
//! (address, chain) pair, the highest nonce known to be taken and a ledger
//! of transactions sent but not yet confirmed. Authoritative reads always go
//! to the network. Callers that perform a sequence of nonce-consuming sends
//! hold the pair's [`NonceLease`] for the duration, which makes them the
//! only writer for that key.

use alloy::primitives::{Address, TxHash};
use dashmap::DashMap;
use deployer_rpc::{ChainClient, ChainConnector, RpcError};
use deployer_types::{truncate_hash, ChainId};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default age after which pending entries are purged.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Error)]
pub enum NonceError {
	#[error("Nonce unavailable for {address} on chain {chain_id}: {reason}")]
	Unavailable {
		address: Address,
		chain_id: ChainId,
		reason: String,
	},
}

/// Options of an authoritative nonce read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceReadOptions {
	/// Timeout of a single read.
	pub timeout: Duration,
	/// Total attempts.
	pub max_retries: u32,
	/// Delay unit; attempt `n` is followed by `n * retry_delay`.
	pub retry_delay: Duration,
}

impl Default for NonceReadOptions {
	fn default() -> Self {
		Self {
			timeout: Duration::from_secs(10),
			max_retries: 3,
			retry_delay: Duration::from_secs(1),
		}
	}
}

/// A sent, unconfirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTx {
	pub nonce: u64,
	pub tx_hash: TxHash,
	pub submitted_at: Instant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NonceRecord {
	/// Next nonce known to be free, if observed.
	pub cached_nonce: Option<u64>,
	pub pending: Vec<PendingTx>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NonceStats {
	pub tracked_keys: usize,
	pub pending_transactions: usize,
}

#[derive(Default)]
struct KeyState {
	lease: Arc<tokio::sync::Mutex<()>>,
	record: Mutex<NonceRecord>,
}

impl KeyState {
	fn record(&self) -> MutexGuard<'_, NonceRecord> {
		self.record
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

/// Exclusive right to issue nonce-consuming sends for one (address, chain).
pub struct NonceLease {
	_guard: OwnedMutexGuard<()>,
}

/// Run-scoped nonce session.
pub struct NonceManager {
	connector: Arc<dyn ChainConnector>,
	keys: DashMap<(Address, ChainId), Arc<KeyState>>,
	readers: DashMap<String, Arc<dyn ChainClient>>,
	options: NonceReadOptions,
	pending_ttl: Duration,
}

impl NonceManager {
	pub fn new(connector: Arc<dyn ChainConnector>) -> Self {
		Self {
			connector,
			keys: DashMap::new(),
			readers: DashMap::new(),
			options: NonceReadOptions::default(),
			pending_ttl: DEFAULT_PENDING_TTL,
		}
	}

	pub fn with_options(mut self, options: NonceReadOptions) -> Self {
		self.options = options;
		self
	}

	pub fn with_pending_ttl(mut self, pending_ttl: Duration) -> Self {
		self.pending_ttl = pending_ttl;
		self
	}

	fn key(&self, address: Address, chain_id: ChainId) -> Arc<KeyState> {
		self.keys
			.entry((address, chain_id))
			.or_default()
			.value()
			.clone()
	}

	/// Waits for and takes the single-writer lease of (address, chain).
	pub async fn lease(&self, address: Address, chain_id: ChainId) -> NonceLease {
		let lock = self.key(address, chain_id).lease.clone();
		let guard = lock.lock_owned().await;
		debug!(chain_id, %address, "Nonce lease acquired");
		NonceLease { _guard: guard }
	}

	/// Authoritative read through the endpoint at `rpc_url`.
	pub async fn get_nonce(
		&self,
		address: Address,
		rpc_url: &str,
		chain_id: ChainId,
	) -> Result<u64, NonceError> {
		let client = self
			.reader(rpc_url)
			.await
			.map_err(|e| Self::unavailable(address, chain_id, e.to_string()))?;
		self.get_nonce_with_client(client.as_ref(), address, chain_id)
			.await
	}

	/// Authoritative read through an already open client.
	///
	/// Always round-trips to the network; the cache is only moved forward.
	pub async fn get_nonce_with_client(
		&self,
		client: &dyn ChainClient,
		address: Address,
		chain_id: ChainId,
	) -> Result<u64, NonceError> {
		let max_retries = self.options.max_retries.max(1);
		let mut last_error = String::new();

		for attempt in 1..=max_retries {
			match tokio::time::timeout(self.options.timeout, client.transaction_count(address))
				.await
			{
				Ok(Ok(nonce)) => {
					self.observe(address, chain_id, nonce);
					debug!(chain_id, nonce, "Read nonce");
					return Ok(nonce);
				}
				Ok(Err(e)) => last_error = e.to_string(),
				Err(_) => last_error = "RPC timeout".to_string(),
			}

			if attempt < max_retries {
				let delay = self.options.retry_delay * attempt;
				warn!(
					chain_id,
					"Nonce read failed, attempt {}/{}, retrying in {:?}: {}",
					attempt,
					max_retries,
					delay,
					last_error
				);
				tokio::time::sleep(delay).await;
			}
		}

		Err(Self::unavailable(address, chain_id, last_error))
	}

	/// Cache first, then each of `rpc_urls` in order.
	///
	/// Fails when nothing is cached and every endpoint fails.
	pub async fn get_nonce_fast(
		&self,
		address: Address,
		chain_id: ChainId,
		rpc_urls: &[String],
	) -> Result<u64, NonceError> {
		if let Some(nonce) = self.cached_nonce(address, chain_id) {
			return Ok(nonce);
		}

		let mut errors = Vec::new();
		for url in rpc_urls {
			let client = match self.reader(url).await {
				Ok(client) => client,
				Err(e) => {
					errors.push(format!("{}: {}", url, e));
					continue;
				}
			};

			match tokio::time::timeout(self.options.timeout, client.transaction_count(address))
				.await
			{
				Ok(Ok(nonce)) => {
					self.observe(address, chain_id, nonce);
					return Ok(nonce);
				}
				Ok(Err(e)) => errors.push(format!("{}: {}", url, e)),
				Err(_) => errors.push(format!("{}: RPC timeout", url)),
			}
		}

		let reason = if errors.is_empty() {
			"no RPC endpoints available".to_string()
		} else {
			errors.join("; ")
		};
		Err(Self::unavailable(address, chain_id, reason))
	}

	/// Marks `nonce` as taken. Stale reservations below the cache are ignored.
	pub fn reserve_nonce(&self, address: Address, chain_id: ChainId, nonce: u64) -> bool {
		let key = self.key(address, chain_id);
		let mut record = key.record();
		match record.cached_nonce {
			Some(cached) if nonce < cached => {
				warn!(
					chain_id,
					nonce, cached, "Ignoring stale nonce reservation"
				);
				false
			}
			_ => {
				record.cached_nonce = Some(nonce + 1);
				true
			}
		}
	}

	pub fn mark_transaction_pending(
		&self,
		address: Address,
		chain_id: ChainId,
		nonce: u64,
		tx_hash: TxHash,
	) {
		let key = self.key(address, chain_id);
		key.record().pending.push(PendingTx {
			nonce,
			tx_hash,
			submitted_at: Instant::now(),
		});
		debug!(chain_id, nonce, tx_hash = %truncate_hash(&tx_hash), "Transaction pending");
	}

	pub fn mark_transaction_confirmed(&self, address: Address, chain_id: ChainId, tx_hash: TxHash) {
		let key = self.key(address, chain_id);
		key.record().pending.retain(|p| p.tx_hash != tx_hash);
	}

	pub fn pending_transactions(&self, address: Address, chain_id: ChainId) -> Vec<PendingTx> {
		self.keys
			.get(&(address, chain_id))
			.map(|key| key.record().pending.clone())
			.unwrap_or_default()
	}

	/// Purges pending entries older than the TTL, returning how many were dropped.
	pub fn clear_old_pending_transactions(&self) -> usize {
		let ttl = self.pending_ttl;
		let mut purged = 0;
		for entry in self.keys.iter() {
			let mut record = entry.value().record();
			let before = record.pending.len();
			record.pending.retain(|p| p.submitted_at.elapsed() < ttl);
			purged += before - record.pending.len();
		}
		if purged > 0 {
			info!("Purged {} stale pending transactions", purged);
		}
		purged
	}

	/// Forgets everything known about (address, chain) so the next read
	/// re-queries the network.
	pub fn reset_nonce(&self, address: Address, chain_id: ChainId) {
		if let Some(key) = self.keys.get(&(address, chain_id)) {
			*key.record() = NonceRecord::default();
		}
		info!(chain_id, %address, "Nonce cache reset");
	}

	pub fn cached_nonce(&self, address: Address, chain_id: ChainId) -> Option<u64> {
		self.keys
			.get(&(address, chain_id))
			.and_then(|key| key.record().cached_nonce)
	}

	pub fn stats(&self) -> NonceStats {
		let mut stats = NonceStats {
			tracked_keys: self.keys.len(),
			pending_transactions: 0,
		};
		for entry in self.keys.iter() {
			stats.pending_transactions += entry.value().record().pending.len();
		}
		stats
	}

	fn observe(&self, address: Address, chain_id: ChainId, network_nonce: u64) {
		let key = self.key(address, chain_id);
		let mut record = key.record();
		record.cached_nonce = Some(record.cached_nonce.map_or(network_nonce, |c| c.max(network_nonce)));
	}

	async fn reader(&self, rpc_url: &str) -> Result<Arc<dyn ChainClient>, RpcError> {
		if let Some(client) = self.readers.get(rpc_url) {
			return Ok(client.value().clone());
		}
		let client = self.connector.connect(rpc_url, None).await?;
		self.readers.insert(rpc_url.to_string(), client.clone());
		Ok(client)
	}

	fn unavailable(address: Address, chain_id: ChainId, reason: String) -> NonceError {
		NonceError::Unavailable {
			address,
			chain_id,
			reason,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use deployer_rpc::SimulatedNetwork;

	fn setup() -> (SimulatedNetwork, NonceManager, Address) {
		let network = SimulatedNetwork::new();
		let manager = NonceManager::new(Arc::new(network.clone()));
		(network, manager, Address::repeat_byte(0xaa))
	}

	#[tokio::test(start_paused = true)]
	async fn test_get_nonce_reads_network_with_linear_backoff() {
		let (network, manager, address) = setup();
		let chain = network.add_chain("sim://a", 1);
		chain.advance_nonce(address, 4);
		chain.fail_next_nonce_reads(2);

		let started = Instant::now();
		assert_eq!(manager.get_nonce(address, "sim://a", 1).await.unwrap(), 4);
		// 1s after the first failure, 2s after the second
		assert!(started.elapsed() >= Duration::from_secs(3));
		assert_eq!(manager.cached_nonce(address, 1), Some(4));

		chain.advance_nonce(address, 1);
		assert_eq!(manager.get_nonce(address, "sim://a", 1).await.unwrap(), 5);
	}

	#[tokio::test(start_paused = true)]
	async fn test_get_nonce_exhaustion_is_unavailable() {
		let (network, manager, address) = setup();
		let chain = network.add_chain("sim://a", 1);
		chain.fail_next_nonce_reads(3);

		let err = manager.get_nonce(address, "sim://a", 1).await.unwrap_err();
		assert!(matches!(err, NonceError::Unavailable { chain_id: 1, .. }));
	}

	#[tokio::test]
	async fn test_reserve_is_monotonic() {
		let (_network, manager, address) = setup();

		assert!(manager.reserve_nonce(address, 1, 3));
		assert_eq!(manager.cached_nonce(address, 1), Some(4));
		assert!(!manager.reserve_nonce(address, 1, 2));
		assert_eq!(manager.cached_nonce(address, 1), Some(4));
		assert!(manager.reserve_nonce(address, 1, 4));
		assert_eq!(manager.cached_nonce(address, 1), Some(5));

		// Other chains are independent
		assert_eq!(manager.cached_nonce(address, 2), None);
	}

	#[tokio::test(start_paused = true)]
	async fn test_pending_ledger_and_purge() {
		let (_network, manager, address) = setup();
		let first = TxHash::repeat_byte(1);
		let second = TxHash::repeat_byte(2);

		manager.mark_transaction_pending(address, 1, 0, first);
		tokio::time::advance(Duration::from_secs(200)).await;
		manager.mark_transaction_pending(address, 1, 1, second);
		assert_eq!(manager.stats().pending_transactions, 2);

		tokio::time::advance(Duration::from_secs(150)).await;
		assert_eq!(manager.clear_old_pending_transactions(), 1);
		let pending = manager.pending_transactions(address, 1);
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].tx_hash, second);

		manager.mark_transaction_confirmed(address, 1, second);
		assert!(manager.pending_transactions(address, 1).is_empty());
	}

	#[tokio::test]
	async fn test_reset_forces_requery() {
		let (network, manager, address) = setup();
		let chain = network.add_chain("sim://a", 1);
		manager.reserve_nonce(address, 1, 9);
		manager.mark_transaction_pending(address, 1, 9, TxHash::repeat_byte(3));

		manager.reset_nonce(address, 1);
		assert_eq!(manager.cached_nonce(address, 1), None);
		assert!(manager.pending_transactions(address, 1).is_empty());

		chain.advance_nonce(address, 2);
		let urls = vec!["sim://a".to_string()];
		assert_eq!(manager.get_nonce_fast(address, 1, &urls).await.unwrap(), 2);
	}

	#[tokio::test]
	async fn test_get_nonce_fast_prefers_cache_and_fails_over() {
		let (network, manager, address) = setup();
		let chain = network.add_chain("sim://b", 1);
		chain.advance_nonce(address, 7);

		let urls = vec!["sim://down".to_string(), "sim://b".to_string()];
		assert_eq!(manager.get_nonce_fast(address, 1, &urls).await.unwrap(), 7);

		// Cached now, even though the network moved on
		chain.advance_nonce(address, 1);
		assert_eq!(manager.get_nonce_fast(address, 1, &urls).await.unwrap(), 7);
	}

	#[tokio::test]
	async fn test_get_nonce_fast_never_degrades_to_zero() {
		let (_network, manager, address) = setup();
		let urls = vec!["sim://down".to_string(), "sim://gone".to_string()];

		let err = manager.get_nonce_fast(address, 1, &urls).await.unwrap_err();
		let NonceError::Unavailable { reason, .. } = err;
		assert!(reason.contains("sim://down"));
		assert!(reason.contains("sim://gone"));
	}

	#[tokio::test]
	async fn test_lease_is_exclusive_per_key() {
		let (_network, manager, address) = setup();

		let lease = manager.lease(address, 1).await;

		let blocked =
			tokio::time::timeout(Duration::from_millis(20), manager.lease(address, 1)).await;
		assert!(blocked.is_err());

		// A different chain is not blocked
		let other = tokio::time::timeout(Duration::from_millis(20), manager.lease(address, 2)).await;
		assert!(other.is_ok());

		drop(lease);
		let reacquired =
			tokio::time::timeout(Duration::from_millis(20), manager.lease(address, 1)).await;
		assert!(reacquired.is_ok());
	}
}
