//! Deployment plans, per-chain results and run reports.

use crate::ChainId;
use alloy::primitives::{Address, Bytes, TxHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Per-chain progress of a single contract deployment.
///
/// `Init -> NonceRead -> (Aligning -> Aligned) -> DeploySubmitted -> Confirmed | Failed`.
/// A chain whose predicted address already holds code moves from `Aligned`
/// straight to `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainDeployState {
	Init,
	NonceRead,
	Aligning,
	Aligned,
	DeploySubmitted,
	Confirmed,
	Failed,
}

impl ChainDeployState {
	pub fn can_transition_to(self, next: ChainDeployState) -> bool {
		use ChainDeployState::*;

		if next == Failed {
			return !self.is_terminal();
		}

		matches!(
			(self, next),
			(Init, NonceRead)
				| (NonceRead, Aligning)
				| (NonceRead, Aligned)
				| (Aligning, Aligned)
				| (Aligned, DeploySubmitted)
				| (Aligned, Confirmed)
				| (DeploySubmitted, Confirmed)
		)
	}

	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Confirmed | Self::Failed)
	}
}

impl fmt::Display for ChainDeployState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Init => write!(f, "INIT"),
			Self::NonceRead => write!(f, "NONCE_READ"),
			Self::Aligning => write!(f, "ALIGNING"),
			Self::Aligned => write!(f, "ALIGNED"),
			Self::DeploySubmitted => write!(f, "DEPLOY_SUBMITTED"),
			Self::Confirmed => write!(f, "CONFIRMED"),
			Self::Failed => write!(f, "FAILED"),
		}
	}
}

/// One wave of identical deployments across chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentPlan {
	/// Human-readable contract label used in logs and reports.
	pub label: String,
	/// Creation bytecode including constructor arguments.
	pub init_code: Bytes,
	/// Nonce at which the creation transaction is sent on every chain.
	pub target_nonce: u64,
	/// Chains participating in the wave.
	pub chains: Vec<ChainId>,
}

/// Outcome of one deployment on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResult {
	pub chain_id: ChainId,
	pub address: Option<Address>,
	pub success: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub verification: Option<String>,
	/// Nonce the creation transaction occupied (or would have).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub nonce: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tx_hash: Option<TxHash>,
	/// Number of filler transactions sent to reach the target nonce.
	#[serde(default)]
	pub fillers_sent: u64,
	/// True when code was already present at the predicted address.
	#[serde(default)]
	pub already_deployed: bool,
	pub final_state: ChainDeployState,
}

impl DeploymentResult {
	pub fn failure(chain_id: ChainId, error: impl Into<String>) -> Self {
		Self {
			chain_id,
			address: None,
			success: false,
			error: Some(error.into()),
			verification: None,
			nonce: None,
			tx_hash: None,
			fillers_sent: 0,
			already_deployed: false,
			final_state: ChainDeployState::Failed,
		}
	}
}

/// Cross-chain agreement of the addresses reported by successful chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressAgreement {
	/// No chain succeeded.
	Empty,
	/// Every successful chain reported the same address.
	Agreed(Address),
	/// Successful chains disagree.
	Diverged(Vec<Address>),
}

impl AddressAgreement {
	pub fn from_results(results: &[DeploymentResult]) -> Self {
		let distinct: BTreeSet<Address> = results
			.iter()
			.filter(|r| r.success)
			.filter_map(|r| r.address)
			.collect();

		let mut addresses: Vec<Address> = distinct.into_iter().collect();
		match addresses.len() {
			0 => Self::Empty,
			1 => Self::Agreed(addresses.remove(0)),
			_ => Self::Diverged(addresses),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
	Completed,
	Failed,
}

/// Per-module slice of a run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleReport {
	pub module_type: String,
	pub contract_name: String,
	pub target_nonce: u64,
	pub address: Option<Address>,
	pub success: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub networks: Vec<DeploymentResult>,
}

/// Structured outcome of a whole run, persisted at the end of each wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
	pub deployment_id: String,
	pub status: RunStatus,
	pub target_nonce: Option<u64>,
	pub primary_address: Option<Address>,
	pub primary: Vec<DeploymentResult>,
	#[serde(default)]
	pub modules: Vec<ModuleReport>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub started_at: DateTime<Utc>,
	pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
	pub fn new(deployment_id: impl Into<String>) -> Self {
		Self {
			deployment_id: deployment_id.into(),
			status: RunStatus::Failed,
			target_nonce: None,
			primary_address: None,
			primary: Vec::new(),
			modules: Vec::new(),
			error: None,
			started_at: Utc::now(),
			finished_at: None,
		}
	}

	pub fn is_success(&self) -> bool {
		self.status == RunStatus::Completed
	}

	/// Result for `chain_id` in the primary wave.
	pub fn primary_result(&self, chain_id: ChainId) -> Option<&DeploymentResult> {
		self.primary.iter().find(|r| r.chain_id == chain_id)
	}

	pub fn module(&self, module_type: &str) -> Option<&ModuleReport> {
		self.modules.iter().find(|m| m.module_type == module_type)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ok(chain_id: ChainId, address: Address) -> DeploymentResult {
		DeploymentResult {
			chain_id,
			address: Some(address),
			success: true,
			error: None,
			verification: None,
			nonce: Some(0),
			tx_hash: None,
			fillers_sent: 0,
			already_deployed: false,
			final_state: ChainDeployState::Confirmed,
		}
	}

	#[test]
	fn test_state_transitions() {
		use ChainDeployState::*;

		assert!(Init.can_transition_to(NonceRead));
		assert!(NonceRead.can_transition_to(Aligned));
		assert!(Aligned.can_transition_to(Confirmed));
		assert!(DeploySubmitted.can_transition_to(Failed));
		assert!(!Init.can_transition_to(DeploySubmitted));
		assert!(!Confirmed.can_transition_to(Failed));
		assert!(!Failed.can_transition_to(NonceRead));
	}

	#[test]
	fn test_address_agreement() {
		let a = Address::repeat_byte(1);
		let b = Address::repeat_byte(2);

		assert_eq!(AddressAgreement::from_results(&[]), AddressAgreement::Empty);
		assert_eq!(
			AddressAgreement::from_results(&[ok(1, a), ok(2, a), DeploymentResult::failure(3, "x")]),
			AddressAgreement::Agreed(a)
		);
		assert_eq!(
			AddressAgreement::from_results(&[ok(1, a), ok(2, b)]),
			AddressAgreement::Diverged(vec![a, b])
		);
	}

	#[test]
	fn test_report_serializes_camel_case() {
		let mut report = RunReport::new("deploy-1");
		report.primary.push(DeploymentResult::failure(5, "boom"));
		let json = serde_json::to_value(&report).unwrap();
		assert_eq!(json["deploymentId"], "deploy-1");
		assert_eq!(json["primary"][0]["chainId"], 5);
		assert_eq!(json["primary"][0]["finalState"], "failed");
	}
}
