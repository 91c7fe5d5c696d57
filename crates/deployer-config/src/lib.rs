//! Configuration loading for the deployer.
//!
//! A configuration file (TOML, JSON or YAML, chosen by extension) is read,
//! `${VAR}` references are substituted from the environment, prefixed
//! environment variables override selected settings, and the result is
//! validated before use. Every section has defaults, so an empty file is a
//! valid configuration.

pub mod serde_helpers;
pub mod types;

pub use types::*;

use regex::Regex;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
	Toml,
	Json,
	Yaml,
}

impl ConfigFormat {
	pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
		match path.extension().and_then(|s| s.to_str()) {
			Some("toml") => Ok(Self::Toml),
			Some("json") => Ok(Self::Json),
			Some("yaml") | Some("yml") => Ok(Self::Yaml),
			_ => Err(ConfigError::ParseError(format!(
				"Unsupported config format: {}",
				path.display()
			))),
		}
	}
}

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "DEPLOYER_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<DeployerConfig, ConfigError> {
		let mut config = if let Some(file_path) = &self.file_path {
			self.load_from_file(file_path).await?
		} else {
			return Err(ConfigError::FileNotFound(
				"No configuration file specified".to_string(),
			));
		};

		self.apply_env_overrides(&mut config)?;
		validate_config(&config)?;

		Ok(config)
	}

	/// Parses configuration text, applying substitution, overrides and
	/// validation exactly as [`ConfigLoader::load`] does for a file.
	pub fn load_str(
		&self,
		content: &str,
		format: ConfigFormat,
	) -> Result<DeployerConfig, ConfigError> {
		let mut config = self.parse(content, format)?;
		self.apply_env_overrides(&mut config)?;
		validate_config(&config)?;
		Ok(config)
	}

	async fn load_from_file(&self, file_path: &str) -> Result<DeployerConfig, ConfigError> {
		let path = Path::new(file_path);
		if !path.exists() {
			return Err(ConfigError::FileNotFound(file_path.to_string()));
		}
		info!("Loading configuration from {}", file_path);

		let format = ConfigFormat::from_path(path)?;
		let content = tokio::fs::read_to_string(path).await?;
		self.parse(&content, format)
	}

	fn parse(&self, content: &str, format: ConfigFormat) -> Result<DeployerConfig, ConfigError> {
		let substituted = self.substitute_env_vars(content)?;

		match format {
			ConfigFormat::Toml => {
				toml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))
			}
			ConfigFormat::Json => serde_json::from_str(&substituted)
				.map_err(|e| ConfigError::ParseError(e.to_string())),
			ConfigFormat::Yaml => serde_yaml::from_str(&substituted)
				.map_err(|e| ConfigError::ParseError(e.to_string())),
		}
	}

	fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
		let mut result = content.to_string();

		// Find and replace ${VAR_NAME} patterns
		let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::ParseError(e.to_string()))?;

		for cap in re.captures_iter(content) {
			let full_match = &cap[0];
			let var_name = &cap[1];

			let env_value = env::var(var_name)
				.map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;

			result = result.replace(full_match, &env_value);
		}

		Ok(result)
	}

	fn apply_env_overrides(&self, config: &mut DeployerConfig) -> Result<(), ConfigError> {
		if let Ok(log_level) = env::var(format!("{}LOG_LEVEL", self.env_prefix)) {
			config.deployer.log_level = log_level;
		}

		if let Ok(path) = env::var(format!("{}STORAGE_PATH", self.env_prefix)) {
			config.storage.path = path.into();
		}

		if let Ok(key) = env::var(format!("{}ETHERSCAN_API_KEY", self.env_prefix)) {
			debug!("Overriding verification API key from environment");
			config.verification.api_key = Some(key);
		}

		if let Ok(delay) = env::var(format!("{}MODULE_SETTLE_DELAY_SECS", self.env_prefix)) {
			config.deployment.module_settle_delay_secs = delay.parse().map_err(|e| {
				ConfigError::ValidationError(format!("Invalid module settle delay: {}", e))
			})?;
		}

		let rpc_prefix = format!("{}RPC_URL_", self.env_prefix);
		for (name, url) in env::vars() {
			if let Some(chain_id) = name.strip_prefix(&rpc_prefix) {
				let id = chain_id.parse::<u64>().map_err(|_| {
					ConfigError::ValidationError(format!("Invalid chain ID in {}", name))
				})?;
				debug!("Overriding RPC URL for chain {} from environment", id);
				config.chains.entry(id).or_default().rpc_url = Some(url);
			}
		}

		Ok(())
	}
}

fn is_http_url(url: &str) -> bool {
	let rest = url
		.strip_prefix("https://")
		.or_else(|| url.strip_prefix("http://"));
	rest.is_some_and(|r| !r.is_empty())
}

pub fn validate_config(config: &DeployerConfig) -> Result<(), ConfigError> {
	let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

	if config.rpc.max_retries == 0 || config.rpc.send_max_retries == 0 {
		return invalid("RPC retry counts must be positive".to_string());
	}
	if config.rpc.nonce_max_retries == 0 {
		return invalid("Nonce retry count must be positive".to_string());
	}
	if config.rpc.base_delay_ms > config.rpc.max_delay_ms {
		return invalid("rpc.base_delay_ms exceeds rpc.max_delay_ms".to_string());
	}

	for (chain_id, chain) in &config.chains {
		let urls = chain.rpc_url.iter().chain(chain.fallback_rpc_urls.iter());
		for url in urls {
			if !is_http_url(url) {
				return invalid(format!("Chain {} has malformed RPC URL: {}", chain_id, url));
			}
		}
	}

	if config.gas.filler_gas_limit < deployer_types::TRANSFER_GAS {
		return invalid("gas.filler_gas_limit is below the transfer minimum".to_string());
	}
	if config.gas.filler_gas_limit_escalated < config.gas.filler_gas_limit {
		return invalid("gas.filler_gas_limit_escalated must be >= gas.filler_gas_limit".to_string());
	}
	for (name, profile) in [("primary", config.gas.primary), ("modules", config.gas.modules)] {
		if profile.min > profile.max || profile.default < profile.min || profile.default > profile.max
		{
			return invalid(format!("gas.{} requires min <= default <= max", name));
		}
	}

	if config.deployment.confirmations == 0 {
		return invalid("deployment.confirmations must be at least 1".to_string());
	}
	if config.deployment.confirmation_rounds == 0 {
		return invalid("deployment.confirmation_rounds must be positive".to_string());
	}
	if config.deployment.submit_attempts == 0 {
		return invalid("deployment.submit_attempts must be positive".to_string());
	}

	if config.verification.enabled && !is_http_url(&config.verification.api_url) {
		return invalid(format!(
			"Malformed verification API URL: {}",
			config.verification.api_url
		));
	}

	for (module_type, module) in &config.modules {
		if module.contract_name.trim().is_empty() {
			return invalid(format!("Module {} has no contract name", module_type));
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	fn loader(prefix: &str) -> ConfigLoader {
		ConfigLoader::new().with_env_prefix(prefix)
	}

	#[test]
	fn test_empty_config_uses_defaults() {
		let config = loader("CFG_TEST_EMPTY_")
			.load_str("", ConfigFormat::Toml)
			.unwrap();
		assert_eq!(config.deployer.log_level, "info");
		assert_eq!(config.rpc.max_retries, 3);
		assert_eq!(config.gas.filler_gas_limit, 21_000);
		assert_eq!(config.gas.filler_gas_limit_escalated, 50_000);
		assert_eq!(config.deployment.confirmations, 2);
		assert_eq!(config.fees.min_max_fee_wei(), 20_000_000_000);
		assert_eq!(config.gas.primary, GasProfile::primary());
	}

	#[test]
	fn test_toml_parsing() {
		let toml = r#"
[deployer]
log_level = "debug"

[chains.11155111]
name = "sepolia"
rpc_url = "https://sepolia.example"
fallback_rpc_urls = ["https://rpc.sepolia.org"]

[gas.modules]
min = 400000
max = 1500000
default = 800000

[modules.vault]
contract_name = "VaultModule"
layout = "primary_chain_admin"
"#;

		let config = loader("CFG_TEST_TOML_")
			.load_str(toml, ConfigFormat::Toml)
			.unwrap();
		assert_eq!(config.deployer.log_level, "debug");
		let sepolia = config.chains.get(&11155111).unwrap();
		assert_eq!(sepolia.rpc_url.as_deref(), Some("https://sepolia.example"));
		assert_eq!(config.gas.modules.default, 800_000);

		let catalogue = config.module_catalogue();
		assert_eq!(catalogue.get("vault").unwrap().contract_name, "VaultModule");
		assert!(catalogue.get("treasury").is_some());
	}

	#[test]
	fn test_env_substitution_and_overrides() {
		env::set_var("CFG_TEST_ENV_SEPOLIA_URL", "https://substituted.example");
		env::set_var("CFG_TEST_ENV_RPC_URL_17000", "https://holesky.override");
		env::set_var("CFG_TEST_ENV_LOG_LEVEL", "trace");

		let toml = r#"
[chains.11155111]
rpc_url = "${CFG_TEST_ENV_SEPOLIA_URL}"
"#;
		let config = loader("CFG_TEST_ENV_")
			.load_str(toml, ConfigFormat::Toml)
			.unwrap();

		assert_eq!(
			config.chains.get(&11155111).unwrap().rpc_url.as_deref(),
			Some("https://substituted.example")
		);
		assert_eq!(
			config.chains.get(&17000).unwrap().rpc_url.as_deref(),
			Some("https://holesky.override")
		);
		assert_eq!(config.deployer.log_level, "trace");
	}

	#[test]
	fn test_missing_env_var() {
		let err = loader("CFG_TEST_MISSING_")
			.load_str("[deployer]\nname = \"${CFG_TEST_DOES_NOT_EXIST}\"\n", ConfigFormat::Toml)
			.unwrap_err();
		assert!(matches!(err, ConfigError::EnvVarNotFound(name) if name == "CFG_TEST_DOES_NOT_EXIST"));
	}

	#[test]
	fn test_validation_failures() {
		let cases = [
			"[rpc]\nmax_retries = 0\n",
			"[chains.1]\nrpc_url = \"ftp://nope\"\n",
			"[gas]\nfiller_gas_limit = 30000\nfiller_gas_limit_escalated = 25000\n",
			"[deployment]\nconfirmations = 0\n",
			"[deployment]\nconfirmation_rounds = 0\n",
			"[gas.primary]\nmin = 10\nmax = 5\ndefault = 7\n",
		];

		for case in cases {
			let result = loader("CFG_TEST_VALIDATE_").load_str(case, ConfigFormat::Toml);
			assert!(
				matches!(result, Err(ConfigError::ValidationError(_))),
				"expected validation error for {:?}",
				case
			);
		}
	}

	#[tokio::test]
	async fn test_load_yaml_file() {
		let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
		writeln!(file, "deployment:\n  module_settle_delay_secs: 0").unwrap();

		let config = loader("CFG_TEST_YAML_").with_file(file.path()).load().await.unwrap();
		assert_eq!(config.deployment.module_settle_delay_secs, 0);
	}

	#[tokio::test]
	async fn test_missing_file() {
		let err = loader("CFG_TEST_NOFILE_")
			.with_file("/nonexistent/deployer.toml")
			.load()
			.await
			.unwrap_err();
		assert!(matches!(err, ConfigError::FileNotFound(_)));
	}
}
