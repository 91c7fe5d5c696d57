use alloy::primitives::Address;
use deployer_config::ConfigError;
use deployer_nonce::NonceError;
use deployer_rpc::RpcError;
use deployer_storage::StorageError;
use deployer_types::{ChainDeployState, ChainId, ModuleError, ParamsError};
use deployer_verification::VerificationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
	#[error("Connection error on chain {chain_id}: {message}")]
	Connection { chain_id: ChainId, message: String },

	#[error("Nonce unavailable on chain {chain_id}: {message}")]
	NonceUnavailable { chain_id: ChainId, message: String },

	#[error("Nonce race on chain {chain_id}: expected {expected}, found {found}")]
	NonceRace {
		chain_id: ChainId,
		expected: u64,
		found: u64,
	},

	#[error("Alignment failed on chain {chain_id}: {message}")]
	Alignment { chain_id: ChainId, message: String },

	#[error("Address mismatch on chain {chain_id}: predicted {predicted}, receipt reported {actual:?}")]
	AddressMismatch {
		chain_id: ChainId,
		predicted: Address,
		actual: Option<Address>,
	},

	#[error("Insufficient funds on chain {chain_id}: {message}")]
	InsufficientFunds { chain_id: ChainId, message: String },

	#[error("Cross-chain address divergence: {addresses:?}")]
	CrossChainDivergence { addresses: Vec<Address> },

	#[error("RPC error on chain {chain_id}: {source}")]
	Rpc { chain_id: ChainId, source: RpcError },

	#[error("Aborted on chain {chain_id}: {reason}")]
	Aborted { chain_id: ChainId, reason: String },

	#[error("Invalid state transition on chain {chain_id} from {from} to {to}")]
	Lifecycle {
		chain_id: ChainId,
		from: ChainDeployState,
		to: ChainDeployState,
	},

	#[error("Configuration error: {0}")]
	Configuration(String),

	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("No connections: {0}")]
	NoConnections(String),

	#[error("Verification error: {0}")]
	Verification(#[from] VerificationError),
}

impl DeployError {
	/// Attributes an RPC failure to `chain_id`, lifting the classes the
	/// protocol treats specially.
	pub fn rpc(chain_id: ChainId, error: RpcError) -> Self {
		match error {
			RpcError::Connection(message) => Self::Connection { chain_id, message },
			RpcError::InsufficientFunds(message) => Self::InsufficientFunds { chain_id, message },
			source => Self::Rpc { chain_id, source },
		}
	}

	pub fn chain_id(&self) -> Option<ChainId> {
		match self {
			Self::Connection { chain_id, .. }
			| Self::NonceUnavailable { chain_id, .. }
			| Self::NonceRace { chain_id, .. }
			| Self::Alignment { chain_id, .. }
			| Self::AddressMismatch { chain_id, .. }
			| Self::InsufficientFunds { chain_id, .. }
			| Self::Rpc { chain_id, .. }
			| Self::Aborted { chain_id, .. }
			| Self::Lifecycle { chain_id, .. } => Some(*chain_id),
			_ => None,
		}
	}

	/// Errors that stop the whole run.
	pub fn is_fatal(&self) -> bool {
		matches!(self, Self::AddressMismatch { .. })
	}
}

impl From<NonceError> for DeployError {
	fn from(error: NonceError) -> Self {
		match error {
			NonceError::Unavailable {
				chain_id, reason, ..
			} => Self::NonceUnavailable {
				chain_id,
				message: reason,
			},
		}
	}
}

impl From<ParamsError> for DeployError {
	fn from(error: ParamsError) -> Self {
		Self::Configuration(format!("Invalid deployment parameters: {}", error))
	}
}

impl From<ModuleError> for DeployError {
	fn from(error: ModuleError) -> Self {
		Self::Configuration(error.to_string())
	}
}

impl From<ConfigError> for DeployError {
	fn from(error: ConfigError) -> Self {
		Self::Configuration(error.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_rpc_attribution() {
		let err = DeployError::rpc(5, RpcError::InsufficientFunds("low".into()));
		assert!(matches!(err, DeployError::InsufficientFunds { chain_id: 5, .. }));

		let err = DeployError::rpc(5, RpcError::Connection("ECONNRESET".into()));
		assert!(matches!(err, DeployError::Connection { chain_id: 5, .. }));

		let err = DeployError::rpc(7, RpcError::Timeout("slow".into()));
		assert_eq!(err.chain_id(), Some(7));
		assert!(err.to_string().contains("Timeout"));
	}

	#[test]
	fn test_only_address_mismatch_is_fatal() {
		let mismatch = DeployError::AddressMismatch {
			chain_id: 1,
			predicted: Address::repeat_byte(1),
			actual: Some(Address::repeat_byte(2)),
		};
		assert!(mismatch.is_fatal());
		assert!(!DeployError::NonceRace {
			chain_id: 1,
			expected: 3,
			found: 4
		}
		.is_fatal());
	}

	#[test]
	fn test_nonce_error_conversion() {
		let err: DeployError = NonceError::Unavailable {
			address: Address::ZERO,
			chain_id: 9,
			reason: "RPC timeout".into(),
		}
		.into();
		assert!(matches!(err, DeployError::NonceUnavailable { chain_id: 9, .. }));
	}
}
