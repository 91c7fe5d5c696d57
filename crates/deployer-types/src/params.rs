//! Deployment parameters as stored in the external parameter store.

use crate::ChainId;
use alloy::primitives::{Bytes, B256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamsError {
	#[error("Missing required field: {0}")]
	MissingField(&'static str),
	#[error("Duplicate chain id: {0}")]
	DuplicateChain(ChainId),
}

/// Source material needed to verify one contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSource {
	/// Fully qualified name, e.g. `contracts/DLE.sol:DLE`.
	pub contract_name: String,
	/// Compiler version, e.g. `v0.8.24+commit.e11b9ed9`.
	pub compiler_version: String,
	/// Solidity standard-JSON input.
	pub standard_json_input: serde_json::Value,
}

/// Parameters of one deployment run.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentParams {
	pub name: String,
	pub symbol: String,
	pub supported_chain_ids: Vec<ChainId>,
	pub private_key: String,
	/// Creation bytecode of the primary contract, constructor arguments included.
	pub init_code: Bytes,
	/// Stored and reported but not used for address prediction.
	#[serde(default, alias = "CREATE2_SALT")]
	pub create2_salt: Option<B256>,
	#[serde(default, rename = "logoURI")]
	pub logo_uri: Option<String>,
	#[serde(default)]
	pub etherscan_api_key: Option<String>,
	#[serde(default)]
	pub modules_to_deploy: Vec<String>,
	/// Creation bytecode (without constructor arguments) per module type.
	#[serde(default)]
	pub module_init_codes: HashMap<String, Bytes>,
	/// ABI-encoded constructor arguments of the primary contract.
	#[serde(default)]
	pub primary_constructor_args: Option<Bytes>,
	#[serde(default)]
	pub verification: Option<VerificationSource>,
	#[serde(default)]
	pub module_verification: HashMap<String, VerificationSource>,
	/// Preferred RPC endpoint per chain, ahead of the registry.
	#[serde(default)]
	pub rpc_urls: HashMap<ChainId, String>,
}

impl DeploymentParams {
	pub fn validate(&self) -> Result<(), ParamsError> {
		if self.name.trim().is_empty() {
			return Err(ParamsError::MissingField("name"));
		}
		if self.symbol.trim().is_empty() {
			return Err(ParamsError::MissingField("symbol"));
		}
		if self.private_key.trim().is_empty() {
			return Err(ParamsError::MissingField("privateKey"));
		}
		if self.init_code.is_empty() {
			return Err(ParamsError::MissingField("initCode"));
		}
		if self.supported_chain_ids.is_empty() {
			return Err(ParamsError::MissingField("supportedChainIds"));
		}

		let mut seen = BTreeSet::new();
		for chain_id in &self.supported_chain_ids {
			if !seen.insert(*chain_id) {
				return Err(ParamsError::DuplicateChain(*chain_id));
			}
		}

		Ok(())
	}
}

impl fmt::Debug for DeploymentParams {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DeploymentParams")
			.field("name", &self.name)
			.field("symbol", &self.symbol)
			.field("supported_chain_ids", &self.supported_chain_ids)
			.field("private_key", &"<redacted>")
			.field("init_code_len", &self.init_code.len())
			.field("create2_salt", &self.create2_salt)
			.field("logo_uri", &self.logo_uri)
			.field("modules_to_deploy", &self.modules_to_deploy)
			.finish()
	}
}
