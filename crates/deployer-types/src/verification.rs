//! Durable verification records, one per contract address.

use crate::ChainId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status stored right after a successful submission.
pub const STATUS_SUBMITTED: &str = "submitted";

/// Status fragments indicating the explorer rejected the request for a
/// transient reason; such chains are resubmitted before polling.
pub const TRANSIENT_STATUS_SIGNATURES: &[&str] = &["missing or unsupported chainid"];

/// Verification state on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
	#[serde(default)]
	pub guid: Option<String>,
	/// Raw status string as returned by the explorer.
	#[serde(default)]
	pub status: Option<String>,
	pub updated_at: DateTime<Utc>,
}

impl ChainVerification {
	pub fn submitted(guid: impl Into<String>) -> Self {
		Self {
			guid: Some(guid.into()),
			status: Some(STATUS_SUBMITTED.to_string()),
			updated_at: Utc::now(),
		}
	}

	pub fn needs_resubmission(&self) -> bool {
		let guid_missing = self.guid.as_deref().map_or(true, |g| g.trim().is_empty());
		guid_missing || self.status.as_deref().is_some_and(is_transient_status)
	}
}

/// True when `status` matches one of the transient-fault signatures.
pub fn is_transient_status(status: &str) -> bool {
	let lowered = status.to_lowercase();
	TRANSIENT_STATUS_SIGNATURES
		.iter()
		.any(|sig| lowered.contains(sig))
}

/// Verification state of a contract address across chains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
	/// Keyed by the decimal chain id.
	#[serde(default)]
	pub chains: BTreeMap<String, ChainVerification>,
	#[serde(default)]
	pub updated_at: Option<DateTime<Utc>>,
}

impl VerificationRecord {
	pub fn chain(&self, chain_id: ChainId) -> Option<&ChainVerification> {
		self.chains.get(&chain_id.to_string())
	}

	pub fn set_chain(&mut self, chain_id: ChainId, entry: ChainVerification) {
		self.updated_at = Some(entry.updated_at);
		self.chains.insert(chain_id.to_string(), entry);
	}

	/// Records a new raw status, keeping the stored guid.
	pub fn set_status(&mut self, chain_id: ChainId, status: impl Into<String>) {
		let now = Utc::now();
		let entry = self
			.chains
			.entry(chain_id.to_string())
			.or_insert_with(|| ChainVerification {
				guid: None,
				status: None,
				updated_at: now,
			});
		entry.status = Some(status.into());
		entry.updated_at = now;
		self.updated_at = Some(now);
	}

	pub fn chain_ids(&self) -> Vec<ChainId> {
		self.chains.keys().filter_map(|k| k.parse().ok()).collect()
	}
}
