//! Catalogue of auxiliary contracts deployed next to the primary contract.
//!
//! Every module takes the primary contract address as its first constructor
//! argument. The catalogue is open: built-in entries can be extended from
//! configuration without touching the orchestrator.

use crate::ChainId;
use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModuleError {
	#[error("Unknown module type: {0}")]
	UnknownModule(String),
	#[error("No init code for module: {0}")]
	MissingInitCode(String),
	#[error("Module requested twice: {0}")]
	Duplicate(String),
}

/// Shape of a module constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructorLayout {
	/// `constructor(address primary)`
	Primary,
	/// `constructor(address primary, uint256 chainId, address emergencyAdmin)`
	PrimaryChainAdmin,
}

impl ConstructorLayout {
	/// ABI-encoded constructor arguments for one chain.
	pub fn encode(self, primary: Address, chain_id: ChainId, deployer: Address) -> Bytes {
		match self {
			Self::Primary => (primary,).abi_encode_params().into(),
			Self::PrimaryChainAdmin => {
				(primary, U256::from(chain_id), deployer).abi_encode_params().into()
			}
		}
	}
}

/// One catalogue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
	pub module_type: String,
	pub contract_name: String,
	pub layout: ConstructorLayout,
}

impl ModuleSpec {
	pub fn new(
		module_type: impl Into<String>,
		contract_name: impl Into<String>,
		layout: ConstructorLayout,
	) -> Self {
		Self {
			module_type: module_type.into(),
			contract_name: contract_name.into(),
			layout,
		}
	}

	pub fn constructor_args(&self, primary: Address, chain_id: ChainId, deployer: Address) -> Bytes {
		self.layout.encode(primary, chain_id, deployer)
	}

	/// Creation bytecode followed by the encoded constructor arguments.
	pub fn init_code(
		&self,
		bytecode: &Bytes,
		primary: Address,
		chain_id: ChainId,
		deployer: Address,
	) -> Bytes {
		let args = self.constructor_args(primary, chain_id, deployer);
		let mut code = Vec::with_capacity(bytecode.len() + args.len());
		code.extend_from_slice(bytecode);
		code.extend_from_slice(&args);
		code.into()
	}

}

/// Registry of deployable module types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCatalogue {
	specs: BTreeMap<String, ModuleSpec>,
}

impl ModuleCatalogue {
	pub fn builtin() -> Self {
		let mut specs = BTreeMap::new();
		for spec in [
			ModuleSpec::new("treasury", "TreasuryModule", ConstructorLayout::PrimaryChainAdmin),
			ModuleSpec::new("timelock", "TimelockModule", ConstructorLayout::Primary),
			ModuleSpec::new("reader", "DLEReader", ConstructorLayout::Primary),
			ModuleSpec::new(
				"hierarchicalVoting",
				"HierarchicalVotingModule",
				ConstructorLayout::Primary,
			),
			ModuleSpec::new("extensible", "ExtensibleModule", ConstructorLayout::Primary),
		] {
			specs.insert(spec.module_type.clone(), spec);
		}
		Self { specs }
	}

	/// Adds or replaces a catalogue entry.
	pub fn with_spec(mut self, spec: ModuleSpec) -> Self {
		self.specs.insert(spec.module_type.clone(), spec);
		self
	}

	pub fn get(&self, module_type: &str) -> Option<&ModuleSpec> {
		self.specs.get(module_type)
	}

	pub fn module_types(&self) -> impl Iterator<Item = &str> {
		self.specs.keys().map(String::as_str)
	}

	/// Resolves a requested module list, rejecting unknown and repeated types.
	pub fn validate_requested(&self, requested: &[String]) -> Result<Vec<ModuleSpec>, ModuleError> {
		let mut resolved: Vec<ModuleSpec> = Vec::with_capacity(requested.len());
		for module_type in requested {
			if resolved.iter().any(|s| &s.module_type == module_type) {
				return Err(ModuleError::Duplicate(module_type.clone()));
			}
			let spec = self
				.get(module_type)
				.ok_or_else(|| ModuleError::UnknownModule(module_type.clone()))?;
			resolved.push(spec.clone());
		}
		Ok(resolved)
	}
}

impl Default for ModuleCatalogue {
	fn default() -> Self {
		Self::builtin()
	}
}

/// A module scheduled at a fixed nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleTarget {
	pub spec: ModuleSpec,
	pub target_nonce: u64,
}

/// Nonce schedule of the module wave, identical across chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModulePlan {
	pub base_nonce: u64,
	pub targets: Vec<ModuleTarget>,
}

impl ModulePlan {
	/// Module `i` of the requested list lands at `base_nonce + i`.
	pub fn new(base_nonce: u64, specs: Vec<ModuleSpec>) -> Self {
		let targets = specs
			.into_iter()
			.enumerate()
			.map(|(index, spec)| ModuleTarget {
				spec,
				target_nonce: base_nonce + index as u64,
			})
			.collect();
		Self {
			base_nonce,
			targets,
		}
	}

	pub fn target_nonce(&self, module_type: &str) -> Option<u64> {
		self.targets
			.iter()
			.find(|t| t.spec.module_type == module_type)
			.map(|t| t.target_nonce)
	}

	pub fn is_empty(&self) -> bool {
		self.targets.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_treasury_args_are_chain_specific() {
		let catalogue = ModuleCatalogue::builtin();
		let treasury = catalogue.get("treasury").unwrap();
		let primary = Address::repeat_byte(0x11);
		let deployer = Address::repeat_byte(0x22);

		let a = treasury.constructor_args(primary, 1, deployer);
		let b = treasury.constructor_args(primary, 10, deployer);
		assert_eq!(a.len(), 96);
		assert_ne!(a, b);
		assert_eq!(&a[12..32], primary.as_slice());
		assert_eq!(a[63], 1);
		assert_eq!(&a[76..96], deployer.as_slice());

		let timelock = catalogue.get("timelock").unwrap();
		assert_eq!(
			timelock.constructor_args(primary, 1, deployer),
			timelock.constructor_args(primary, 10, deployer)
		);
	}

	#[test]
	fn test_init_code_appends_args() {
		let spec = ModuleSpec::new("reader", "DLEReader", ConstructorLayout::Primary);
		let bytecode = Bytes::from(vec![0x60, 0x80]);
		let code = spec.init_code(&bytecode, Address::repeat_byte(1), 1, Address::ZERO);
		assert_eq!(code.len(), 34);
		assert_eq!(&code[..2], &[0x60, 0x80]);
	}

	#[test]
	fn test_validate_requested() {
		let catalogue = ModuleCatalogue::builtin()
			.with_spec(ModuleSpec::new("vault", "VaultModule", ConstructorLayout::Primary));

		let ok = catalogue
			.validate_requested(&["vault".to_string(), "reader".to_string()])
			.unwrap();
		assert_eq!(ok[0].contract_name, "VaultModule");

		assert_eq!(
			catalogue.validate_requested(&["nope".to_string()]),
			Err(ModuleError::UnknownModule("nope".to_string()))
		);
		assert_eq!(
			catalogue.validate_requested(&["reader".to_string(), "reader".to_string()]),
			Err(ModuleError::Duplicate("reader".to_string()))
		);
	}

	#[test]
	fn test_module_plan_offsets() {
		let catalogue = ModuleCatalogue::builtin();
		let specs = catalogue
			.validate_requested(&[
				"treasury".to_string(),
				"timelock".to_string(),
				"reader".to_string(),
			])
			.unwrap();
		let plan = ModulePlan::new(4, specs);
		assert_eq!(plan.target_nonce("treasury"), Some(4));
		assert_eq!(plan.target_nonce("timelock"), Some(5));
		assert_eq!(plan.target_nonce("reader"), Some(6));
		assert_eq!(plan.target_nonce("extensible"), None);
	}
}
