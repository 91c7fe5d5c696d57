//! RPC endpoint discovery.
//!
//! Endpoints for a chain come from three places, tried in order: the
//! preferred URL of the run, the external provider registry kept in storage,
//! and a static table of configured and public fallbacks.

use crate::RpcError;
use async_trait::async_trait;
use deployer_config::DeployerConfig;
use deployer_storage::{StorageError, StorageService, RPC_PROVIDERS_NAMESPACE};
use deployer_types::ChainId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Registry entry stored under `rpc_providers:<chain_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcProviderEntry {
	pub chain_id: ChainId,
	#[serde(default)]
	pub network_id: Option<String>,
	pub rpc_urls: Vec<String>,
}

#[async_trait]
pub trait RpcRegistry: Send + Sync {
	/// Endpoints known for `chain_id`, most preferred first.
	async fn rpc_urls(&self, chain_id: ChainId) -> Result<Vec<String>, RpcError>;
}

/// Provider registry persisted in the parameter store.
pub struct StorageRpcRegistry {
	storage: Arc<StorageService>,
}

impl StorageRpcRegistry {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	pub async fn register(&self, entry: &RpcProviderEntry) -> Result<(), StorageError> {
		self.storage
			.store(RPC_PROVIDERS_NAMESPACE, &entry.chain_id.to_string(), entry)
			.await
	}
}

#[async_trait]
impl RpcRegistry for StorageRpcRegistry {
	async fn rpc_urls(&self, chain_id: ChainId) -> Result<Vec<String>, RpcError> {
		let entry: Option<RpcProviderEntry> = self
			.storage
			.retrieve_optional(RPC_PROVIDERS_NAMESPACE, &chain_id.to_string())
			.await
			.map_err(|e| RpcError::Rpc(format!("RPC registry unavailable: {}", e)))?;
		Ok(entry.map(|e| e.rpc_urls).unwrap_or_default())
	}
}

/// Built-in public endpoints.
const PUBLIC_RPC_URLS: &[(ChainId, &str)] = &[
	(1, "https://ethereum-rpc.publicnode.com"),
	(11155111, "https://1rpc.io/sepolia"),
	(17000, "https://ethereum-holesky.publicnode.com"),
	(421614, "https://sepolia-rollup.arbitrum.io/rpc"),
	(84532, "https://sepolia.base.org"),
	(11155420, "https://sepolia.optimism.io"),
	(80002, "https://rpc-amoy.polygon.technology"),
];

/// Static fallback table.
#[derive(Debug, Clone, Default)]
pub struct StaticRpcTable {
	table: HashMap<ChainId, Vec<String>>,
}

impl StaticRpcTable {
	pub fn empty() -> Self {
		Self::default()
	}

	pub fn builtin() -> Self {
		let mut table = Self::empty();
		for (chain_id, url) in PUBLIC_RPC_URLS {
			table.push(*chain_id, url.to_string());
		}
		table
	}

	/// Configured fallbacks first, then the built-in public endpoints.
	pub fn from_config(config: &DeployerConfig) -> Self {
		let mut table = Self::empty();
		for (chain_id, chain) in &config.chains {
			for url in &chain.fallback_rpc_urls {
				table.push(*chain_id, url.clone());
			}
		}
		for (chain_id, url) in PUBLIC_RPC_URLS {
			table.push(*chain_id, url.to_string());
		}
		table
	}

	pub fn push(&mut self, chain_id: ChainId, url: String) {
		self.table.entry(chain_id).or_default().push(url);
	}

	pub fn urls(&self, chain_id: ChainId) -> Vec<String> {
		self.table.get(&chain_id).cloned().unwrap_or_default()
	}
}

#[async_trait]
impl RpcRegistry for StaticRpcTable {
	async fn rpc_urls(&self, chain_id: ChainId) -> Result<Vec<String>, RpcError> {
		Ok(self.urls(chain_id))
	}
}

/// Ordered, de-duplicated endpoint list for `chain_id`.
///
/// A failing registry is logged and skipped.
pub async fn resolve_rpc_urls(
	chain_id: ChainId,
	primary: Option<&str>,
	registry: &dyn RpcRegistry,
	fallback: &StaticRpcTable,
) -> Vec<String> {
	let mut urls: Vec<String> = primary.map(str::to_string).into_iter().collect();

	match registry.rpc_urls(chain_id).await {
		Ok(registered) => urls.extend(registered),
		Err(e) => warn!(chain_id, "Skipping RPC registry: {}", e),
	}
	urls.extend(fallback.urls(chain_id));

	let mut resolved: Vec<String> = Vec::with_capacity(urls.len());
	for url in urls {
		let url = url.trim().to_string();
		if !url.is_empty() && !resolved.contains(&url) {
			resolved.push(url);
		}
	}
	resolved
}

#[cfg(test)]
mod tests {
	use super::*;
	use deployer_config::ChainConfig;

	#[tokio::test]
	async fn test_resolution_order_and_dedup() {
		let storage = Arc::new(StorageService::in_memory());
		let registry = StorageRpcRegistry::new(storage);
		registry
			.register(&RpcProviderEntry {
				chain_id: 17000,
				network_id: Some("holesky".to_string()),
				rpc_urls: vec![
					"https://registry.example".to_string(),
					"https://primary.example".to_string(),
				],
			})
			.await
			.unwrap();

		let urls = resolve_rpc_urls(
			17000,
			Some("https://primary.example"),
			&registry,
			&StaticRpcTable::builtin(),
		)
		.await;

		assert_eq!(
			urls,
			vec![
				"https://primary.example".to_string(),
				"https://registry.example".to_string(),
				"https://ethereum-holesky.publicnode.com".to_string(),
			]
		);
	}

	#[tokio::test]
	async fn test_config_fallbacks_precede_public_defaults() {
		let mut config = DeployerConfig::default();
		config.chains.insert(
			84532,
			ChainConfig {
				name: Some("base-sepolia".to_string()),
				rpc_url: None,
				fallback_rpc_urls: vec!["https://base.example".to_string()],
			},
		);
		let table = StaticRpcTable::from_config(&config);

		let urls = resolve_rpc_urls(84532, None, &StaticRpcTable::empty(), &table).await;
		assert_eq!(urls[0], "https://base.example");
		assert_eq!(urls[1], "https://sepolia.base.org");
		assert!(resolve_rpc_urls(999_999, None, &table, &table).await.is_empty());
	}
}
