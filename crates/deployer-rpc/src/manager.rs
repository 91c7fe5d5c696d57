//! Connection management with retry and caching.

use crate::{ChainClient, ChainConnector, Connection, RpcError};
use alloy::primitives::{keccak256, TxHash};
use backoff::{backoff::Backoff, ExponentialBackoff};
use dashmap::DashMap;
use deployer_config::RpcConfig;
use deployer_types::{truncate_hash, ChainId, TxReceipt, TxRequest};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Exponential backoff between attempts of a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	pub base_delay: Duration,
	pub max_delay: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(10),
		}
	}
}

impl RetryPolicy {
	pub fn from_config(config: &RpcConfig) -> Self {
		Self {
			base_delay: config.base_delay(),
			max_delay: config.max_delay(),
		}
	}

	/// Doubling delays from `base_delay`, capped at `max_delay`, no jitter.
	pub fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoff {
			current_interval: self.base_delay,
			initial_interval: self.base_delay,
			randomization_factor: 0.0,
			multiplier: 2.0,
			max_interval: self.max_delay,
			max_elapsed_time: None,
			..Default::default()
		}
	}
}

/// Options for opening a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
	/// Total probe attempts.
	pub max_retries: u32,
	/// Timeout of a single probe.
	pub timeout: Duration,
}

impl Default for ConnectionOptions {
	fn default() -> Self {
		Self {
			max_retries: 3,
			timeout: Duration::from_secs(30),
		}
	}
}

impl ConnectionOptions {
	pub fn from_config(config: &RpcConfig) -> Self {
		Self {
			max_retries: config.max_retries,
			timeout: config.connect_timeout(),
		}
	}
}

/// An endpoint that could not be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFailure {
	pub rpc_url: String,
	pub chain_id: Option<ChainId>,
	pub error: RpcError,
}

/// Result of opening several endpoints at once.
#[derive(Debug, Clone)]
pub struct MultiConnection {
	pub connections: Vec<Connection>,
	pub failures: Vec<ConnectionFailure>,
}

/// A confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
	pub tx_hash: TxHash,
	pub receipt: TxReceipt,
}

struct CachedConnection {
	connection: Connection,
	created_at: Instant,
}

/// Opens, probes and caches chain connections.
pub struct RpcConnectionManager {
	connector: Arc<dyn ChainConnector>,
	policy: RetryPolicy,
	cache_ttl: Duration,
	cache: DashMap<String, CachedConnection>,
}

impl RpcConnectionManager {
	pub fn new(connector: Arc<dyn ChainConnector>) -> Self {
		Self {
			connector,
			policy: RetryPolicy::default(),
			cache_ttl: Duration::from_secs(60),
			cache: DashMap::new(),
		}
	}

	pub fn from_config(connector: Arc<dyn ChainConnector>, config: &RpcConfig) -> Self {
		Self::new(connector)
			.with_policy(RetryPolicy::from_config(config))
			.with_cache_ttl(config.connection_cache_ttl())
	}

	pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
		self.policy = policy;
		self
	}

	pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
		self.cache_ttl = cache_ttl;
		self
	}

	pub fn connector(&self) -> Arc<dyn ChainConnector> {
		self.connector.clone()
	}

	fn cache_key(rpc_url: &str, private_key: &str) -> String {
		let key_hash = keccak256(private_key.trim().as_bytes());
		format!("{}#{}", rpc_url, hex::encode(&key_hash[..8]))
	}

	/// Runs `op` until it succeeds, fails with a non-retryable error or
	/// `max_attempts` attempts are used up.
	pub async fn with_retry<T, F, Fut>(
		&self,
		operation: &str,
		max_attempts: u32,
		mut op: F,
	) -> Result<T, RpcError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, RpcError>>,
	{
		let mut backoff = self.policy.backoff();
		let mut attempts = 0;

		loop {
			match op().await {
				Ok(value) => return Ok(value),
				Err(e) if !e.is_retryable() => return Err(e),
				Err(e) => {
					attempts += 1;

					if attempts >= max_attempts.max(1) {
						warn!(
							"{} failed after {} attempts, giving up: {}",
							operation, attempts, e
						);
						return Err(e);
					}

					if let Some(delay) = backoff.next_backoff() {
						warn!(
							"{} failed, attempt {}/{}, retrying in {:?}: {}",
							operation, attempts, max_attempts, delay, e
						);
						tokio::time::sleep(delay).await;
					} else {
						return Err(e);
					}
				}
			}
		}
	}

	/// Opens a signing connection to `rpc_url`, probing it with `eth_chainId`.
	pub async fn create_connection(
		&self,
		rpc_url: &str,
		private_key: &str,
		options: ConnectionOptions,
	) -> Result<Connection, RpcError> {
		let cache_key = Self::cache_key(rpc_url, private_key);
		if let Some(cached) = self.cache.get(&cache_key) {
			if cached.created_at.elapsed() < self.cache_ttl {
				debug!(rpc_url, "Using cached connection");
				return Ok(cached.connection.clone());
			}
		}

		let connection = self
			.with_retry("RPC connection", options.max_retries, || async move {
				let client = self.connector.connect(rpc_url, Some(private_key)).await?;
				let chain_id = tokio::time::timeout(options.timeout, client.chain_id())
					.await
					.map_err(|_| {
						RpcError::Timeout(format!("RPC timeout connecting to {}", rpc_url))
					})??;
				let address = client.sender().ok_or_else(|| {
					RpcError::InvalidConfiguration("Connection has no signing key".to_string())
				})?;

				Ok(Connection {
					chain_id,
					rpc_url: rpc_url.to_string(),
					client,
					address,
				})
			})
			.await?;

		info!(chain_id = connection.chain_id, rpc_url, "Connected");
		self.cache.insert(
			cache_key,
			CachedConnection {
				connection: connection.clone(),
				created_at: Instant::now(),
			},
		);
		Ok(connection)
	}

	/// Opens all endpoints concurrently, keeping whichever succeed.
	pub async fn create_multiple_connections(
		&self,
		rpc_urls: &[String],
		private_key: &str,
		options: ConnectionOptions,
	) -> Result<MultiConnection, RpcError> {
		let attempts = rpc_urls
			.iter()
			.map(|url| async move { (url, self.create_connection(url, private_key, options).await) });

		let mut connections = Vec::new();
		let mut failures = Vec::new();
		for (url, result) in join_all(attempts).await {
			match result {
				Ok(connection) => connections.push(connection),
				Err(error) => {
					warn!(rpc_url = %url, "Connection failed: {}", error);
					failures.push(ConnectionFailure {
						rpc_url: url.clone(),
						chain_id: None,
						error,
					});
				}
			}
		}

		if connections.is_empty() {
			return Err(RpcError::Connection(format!(
				"No RPC connection could be established ({} endpoints failed)",
				failures.len()
			)));
		}

		Ok(MultiConnection {
			connections,
			failures,
		})
	}

	/// Connects to `chain_id` through the first working endpoint of `rpc_urls`.
	///
	/// Endpoints serving a different chain are skipped.
	pub async fn connect_chain(
		&self,
		chain_id: ChainId,
		rpc_urls: &[String],
		private_key: &str,
		options: ConnectionOptions,
	) -> Result<Connection, RpcError> {
		let mut last_error = RpcError::InvalidConfiguration(format!(
			"No RPC URL configured for chain {}",
			chain_id
		));

		for url in rpc_urls {
			match self.create_connection(url, private_key, options).await {
				Ok(connection) if connection.chain_id == chain_id => return Ok(connection),
				Ok(connection) => {
					warn!(
						chain_id,
						rpc_url = %url,
						"Endpoint serves chain {}, skipping",
						connection.chain_id
					);
					last_error = RpcError::InvalidConfiguration(format!(
						"RPC {} serves chain {} instead of {}",
						url, connection.chain_id, chain_id
					));
				}
				Err(e) => {
					warn!(chain_id, rpc_url = %url, "Endpoint unavailable: {}", e);
					last_error = e;
				}
			}
		}

		Err(last_error)
	}

	/// Sends `tx`, retrying transient failures, and waits for its receipt.
	pub async fn send_transaction_with_retry(
		&self,
		client: &dyn ChainClient,
		tx: TxRequest,
		max_retries: u32,
		confirmations: u64,
		timeout: Duration,
	) -> Result<SendOutcome, RpcError> {
		let tx_hash = self
			.with_retry("Transaction send", max_retries, || {
				client.send_transaction(tx.clone())
			})
			.await?;

		let receipt = client
			.wait_for_receipt(tx_hash, confirmations, timeout)
			.await?;
		if !receipt.success {
			return Err(RpcError::Rpc(format!(
				"Transaction {} reverted",
				truncate_hash(&tx_hash)
			)));
		}

		Ok(SendOutcome { tx_hash, receipt })
	}

	/// Drops every cached connection.
	pub fn clear_cache(&self) {
		self.cache.clear();
	}
}
