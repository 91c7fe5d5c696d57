//! Configuration types for the deployer.

use crate::serde_helpers::{deserialize_chain_id_map, serialize_chain_id_map};
use deployer_types::{ChainId, ConstructorLayout, ModuleCatalogue, ModuleSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const GWEI: u128 = 1_000_000_000;

/// Complete deployer configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DeployerConfig {
	pub deployer: DeployerSettings,
	pub storage: StorageConfig,
	pub rpc: RpcConfig,
	/// Per-chain endpoint settings, keyed by chain id
	#[serde(
		deserialize_with = "deserialize_chain_id_map",
		serialize_with = "serialize_chain_id_map"
	)]
	pub chains: HashMap<ChainId, ChainConfig>,
	pub fees: FeeConfig,
	pub gas: GasConfig,
	pub deployment: DeploymentConfig,
	pub verification: VerificationConfig,
	/// Additional or overriding module catalogue entries, keyed by module type
	pub modules: HashMap<String, ModuleConfig>,
}

impl DeployerConfig {
	/// Built-in catalogue extended with the configured modules.
	pub fn module_catalogue(&self) -> ModuleCatalogue {
		self.modules
			.iter()
			.fold(ModuleCatalogue::builtin(), |catalogue, (module_type, module)| {
				catalogue.with_spec(ModuleSpec::new(
					module_type.clone(),
					module.contract_name.clone(),
					module.layout,
				))
			})
	}
}

/// Deployer identity and logging
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeployerSettings {
	pub name: String,
	pub log_level: String,
}

impl Default for DeployerSettings {
	fn default() -> Self {
		Self {
			name: "dle-deployer".to_string(),
			log_level: "info".to_string(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
	File,
	Memory,
}

/// Parameter store and report persistence
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
	pub backend: StorageBackend,
	/// Root directory of the file backend
	pub path: PathBuf,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: StorageBackend::File,
			path: PathBuf::from("./data/deployer"),
		}
	}
}

/// RPC connection and retry settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
	/// Probe attempts when opening a connection
	pub max_retries: u32,
	pub base_delay_ms: u64,
	pub max_delay_ms: u64,
	/// Timeout of a single connection probe
	pub connect_timeout_secs: u64,
	/// Timeout of a single read such as a nonce query
	pub read_timeout_secs: u64,
	pub connection_cache_ttl_secs: u64,
	/// Attempts for transient send failures
	pub send_max_retries: u32,
	/// Attempts for authoritative nonce reads
	pub nonce_max_retries: u32,
}

impl Default for RpcConfig {
	fn default() -> Self {
		Self {
			max_retries: 3,
			base_delay_ms: 1_000,
			max_delay_ms: 10_000,
			connect_timeout_secs: 30,
			read_timeout_secs: 10,
			connection_cache_ttl_secs: 60,
			send_max_retries: 3,
			nonce_max_retries: 3,
		}
	}
}

impl RpcConfig {
	pub fn base_delay(&self) -> Duration {
		Duration::from_millis(self.base_delay_ms)
	}

	pub fn max_delay(&self) -> Duration {
		Duration::from_millis(self.max_delay_ms)
	}

	pub fn connect_timeout(&self) -> Duration {
		Duration::from_secs(self.connect_timeout_secs)
	}

	pub fn read_timeout(&self) -> Duration {
		Duration::from_secs(self.read_timeout_secs)
	}

	pub fn connection_cache_ttl(&self) -> Duration {
		Duration::from_secs(self.connection_cache_ttl_secs)
	}
}

/// Chain-specific endpoint configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ChainConfig {
	/// Chain name for logging
	pub name: Option<String>,
	/// Preferred RPC endpoint
	pub rpc_url: Option<String>,
	/// Ordered fallbacks tried after the registry
	pub fallback_rpc_urls: Vec<String>,
}

/// Fee floors applied to every transaction
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeeConfig {
	pub min_priority_fee_gwei: u64,
	pub min_max_fee_gwei: u64,
}

impl Default for FeeConfig {
	fn default() -> Self {
		Self {
			min_priority_fee_gwei: 1,
			min_max_fee_gwei: 20,
		}
	}
}

impl FeeConfig {
	pub fn min_priority_fee_wei(&self) -> u128 {
		self.min_priority_fee_gwei as u128 * GWEI
	}

	pub fn min_max_fee_wei(&self) -> u128 {
		self.min_max_fee_gwei as u128 * GWEI
	}
}

/// Gas limit bounds used when estimation fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct GasProfile {
	pub min: u64,
	pub max: u64,
	pub default: u64,
}

impl GasProfile {
	pub fn primary() -> Self {
		Self {
			min: 2_500_000,
			max: 5_000_000,
			default: 3_000_000,
		}
	}

	pub fn module() -> Self {
		Self {
			min: 500_000,
			max: 2_000_000,
			default: 1_000_000,
		}
	}

	pub fn clamp(&self, gas: u64) -> u64 {
		gas.clamp(self.min, self.max)
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GasConfig {
	pub filler_gas_limit: u64,
	/// Filler gas used after a node reports intrinsic gas too low
	pub filler_gas_limit_escalated: u64,
	/// Safety margin added to gas estimates
	pub estimate_buffer_percent: u64,
	/// Balance kept aside when deriving a gas ceiling
	pub balance_reserve_wei: u64,
	pub primary: GasProfile,
	pub modules: GasProfile,
}

impl Default for GasConfig {
	fn default() -> Self {
		Self {
			filler_gas_limit: 21_000,
			filler_gas_limit_escalated: 50_000,
			estimate_buffer_percent: 20,
			balance_reserve_wei: 5_000_000_000_000_000,
			primary: GasProfile::primary(),
			modules: GasProfile::module(),
		}
	}
}

/// Deployment protocol timing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeploymentConfig {
	pub confirmations: u64,
	pub confirmation_timeout_secs: u64,
	/// Receipt waits per transaction before a confirmation timeout is final
	pub confirmation_rounds: u32,
	/// Total attempts for a creation transaction
	pub submit_attempts: u32,
	pub submit_retry_delay_ms: u64,
	/// Pause between the module wave and verification submission
	pub module_settle_delay_secs: u64,
	/// Age after which pending ledger entries are purged
	pub pending_tx_ttl_secs: u64,
}

impl Default for DeploymentConfig {
	fn default() -> Self {
		Self {
			confirmations: 2,
			confirmation_timeout_secs: 300,
			confirmation_rounds: 3,
			submit_attempts: 5,
			submit_retry_delay_ms: 2_000,
			module_settle_delay_secs: 30,
			pending_tx_ttl_secs: 300,
		}
	}
}

impl DeploymentConfig {
	pub fn confirmation_timeout(&self) -> Duration {
		Duration::from_secs(self.confirmation_timeout_secs)
	}

	pub fn submit_retry_delay(&self) -> Duration {
		Duration::from_millis(self.submit_retry_delay_ms)
	}

	pub fn module_settle_delay(&self) -> Duration {
		Duration::from_secs(self.module_settle_delay_secs)
	}

	pub fn pending_tx_ttl(&self) -> Duration {
		Duration::from_secs(self.pending_tx_ttl_secs)
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VerificationConfig {
	pub enabled: bool,
	pub api_url: String,
	/// Used when the deployment parameters carry no key
	pub api_key: Option<String>,
	pub request_timeout_secs: u64,
}

impl Default for VerificationConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			api_url: "https://api.etherscan.io/v2/api".to_string(),
			api_key: None,
			request_timeout_secs: 30,
		}
	}
}

/// Config-defined module catalogue entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleConfig {
	pub contract_name: String,
	#[serde(default = "default_layout")]
	pub layout: ConstructorLayout,
}

fn default_layout() -> ConstructorLayout {
	ConstructorLayout::Primary
}
