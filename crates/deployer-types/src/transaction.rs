//! Transaction types exchanged with chain clients.
//!
//! These types are deliberately independent of any particular RPC library so
//! that the orchestration logic can run against a real node or an in-memory
//! simulation.

use alloy::primitives::{address, Address, Bytes, TxHash, U256};
use serde::{Deserialize, Serialize};

/// Destination of filler transactions.
pub const BURN_ADDRESS: Address = address!("000000000000000000000000000000000000dEaD");

/// Intrinsic gas of a plain value transfer.
pub const TRANSFER_GAS: u64 = 21_000;

/// Utility function to truncate a transaction hash for display.
pub fn truncate_hash(hash: &TxHash) -> String {
	let hash_str = hex::encode(hash.as_slice());
	if hash_str.len() <= 8 {
		hash_str
	} else {
		format!("{}..", &hash_str[..8])
	}
}

/// Fee information reported by a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeData {
	/// Suggested EIP-1559 max fee, if the chain supports it.
	pub max_fee_per_gas: Option<u128>,
	/// Suggested EIP-1559 priority fee.
	pub max_priority_fee_per_gas: Option<u128>,
	/// Legacy gas price.
	pub gas_price: Option<u128>,
}

/// Fee fields applied to an outgoing transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeeOverrides {
	Eip1559 {
		max_fee_per_gas: u128,
		max_priority_fee_per_gas: u128,
	},
	Legacy {
		gas_price: u128,
	},
}

impl FeeOverrides {
	/// Upper bound of the per-gas price paid by a transaction with these fees.
	pub fn effective_price(&self) -> u128 {
		match self {
			Self::Eip1559 {
				max_fee_per_gas, ..
			} => *max_fee_per_gas,
			Self::Legacy { gas_price } => *gas_price,
		}
	}
}

/// A fully specified transaction ready to be signed by the sending client.
///
/// The nonce is always explicit: the coordinator owns nonce assignment and
/// never lets a provider pick one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
	/// Recipient, `None` for contract creation.
	pub to: Option<Address>,
	/// Calldata or init code.
	pub input: Bytes,
	/// Value in wei.
	pub value: U256,
	/// Nonce this transaction must occupy.
	pub nonce: u64,
	/// Gas limit; `None` lets the client estimate.
	pub gas_limit: Option<u64>,
	/// Fee fields; `None` lets the client decide.
	pub fees: Option<FeeOverrides>,
}

impl TxRequest {
	/// Zero-value transfer to `to` consuming the nonce slot `nonce`.
	pub fn filler(to: Address, nonce: u64, gas_limit: u64) -> Self {
		Self {
			to: Some(to),
			input: Bytes::new(),
			value: U256::ZERO,
			nonce,
			gas_limit: Some(gas_limit),
			fees: None,
		}
	}

	/// Contract creation with the given init code.
	pub fn create(init_code: Bytes, nonce: u64) -> Self {
		Self {
			to: None,
			input: init_code,
			value: U256::ZERO,
			nonce,
			gas_limit: None,
			fees: None,
		}
	}

	/// Contract call with the given calldata.
	pub fn call(to: Address, input: Bytes, nonce: u64) -> Self {
		Self {
			to: Some(to),
			input,
			value: U256::ZERO,
			nonce,
			gas_limit: None,
			fees: None,
		}
	}

	pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
		self.gas_limit = Some(gas_limit);
		self
	}

	pub fn with_fees(mut self, fees: Option<FeeOverrides>) -> Self {
		self.fees = fees;
		self
	}

	pub fn is_create(&self) -> bool {
		self.to.is_none()
	}
}

/// Receipt of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
	/// The hash of the transaction.
	pub tx_hash: TxHash,
	/// The block number where the transaction was included.
	pub block_number: u64,
	/// Whether the transaction executed successfully.
	pub success: bool,
	/// Address created by the transaction, for contract creations.
	pub contract_address: Option<Address>,
	/// Gas consumed.
	pub gas_used: u64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_filler_request() {
		let tx = TxRequest::filler(BURN_ADDRESS, 7, TRANSFER_GAS);
		assert_eq!(tx.to, Some(BURN_ADDRESS));
		assert_eq!(tx.nonce, 7);
		assert_eq!(tx.gas_limit, Some(21_000));
		assert_eq!(tx.value, U256::ZERO);
		assert!(!tx.is_create());
	}

	#[test]
	fn test_effective_price() {
		let eip1559 = FeeOverrides::Eip1559 {
			max_fee_per_gas: 30,
			max_priority_fee_per_gas: 2,
		};
		assert_eq!(eip1559.effective_price(), 30);
		assert_eq!(FeeOverrides::Legacy { gas_price: 11 }.effective_price(), 11);
	}

	#[test]
	fn test_truncate_hash() {
		let hash = TxHash::repeat_byte(0xab);
		assert_eq!(truncate_hash(&hash), "abababab..");
	}
}
