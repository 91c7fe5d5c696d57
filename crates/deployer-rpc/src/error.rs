//! Classified RPC errors.

use thiserror::Error;

/// Error returned by chain clients, classified from the node's message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
	#[error("Connection error: {0}")]
	Connection(String),
	#[error("Timeout: {0}")]
	Timeout(String),
	#[error("Nonce too low: {0}")]
	NonceTooLow(String),
	/// The node already holds an identical transaction.
	#[error("Already known: {0}")]
	AlreadyKnown(String),
	#[error("Insufficient funds: {0}")]
	InsufficientFunds(String),
	#[error("Intrinsic gas too low: {0}")]
	IntrinsicGasTooLow(String),
	#[error("Invalid configuration: {0}")]
	InvalidConfiguration(String),
	#[error("RPC error: {0}")]
	Rpc(String),
}

const NONCE_TOO_LOW: &[&str] = &["nonce too low", "nonce has already been used", "nonce_expired"];
const ALREADY_KNOWN: &[&str] = &["already known", "known transaction", "already imported"];
const INSUFFICIENT_FUNDS: &[&str] = &["insufficient funds", "insufficient_funds"];
const INTRINSIC_GAS: &[&str] = &["intrinsic gas too low"];
const TIMEOUT: &[&str] = &["timeout", "timed out", "etimedout"];
const CONNECTION: &[&str] = &[
	"network_error",
	"econnreset",
	"econnrefused",
	"enotfound",
	"connection reset",
	"connection refused",
	"connection closed",
	"error sending request",
	"dns error",
];

impl RpcError {
	/// Classifies a raw node or transport message.
	pub fn from_message(message: impl Into<String>) -> Self {
		let message = message.into();
		let lowered = message.to_lowercase();
		let matches = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

		if matches(NONCE_TOO_LOW) {
			Self::NonceTooLow(message)
		} else if matches(ALREADY_KNOWN) {
			Self::AlreadyKnown(message)
		} else if matches(INSUFFICIENT_FUNDS) {
			Self::InsufficientFunds(message)
		} else if matches(INTRINSIC_GAS) {
			Self::IntrinsicGasTooLow(message)
		} else if matches(TIMEOUT) {
			Self::Timeout(message)
		} else if matches(CONNECTION) {
			Self::Connection(message)
		} else {
			Self::Rpc(message)
		}
	}

	/// Transient transport failures worth retrying with backoff.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Connection(_) | Self::Timeout(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_classification() {
		assert!(matches!(
			RpcError::from_message("nonce too low: next nonce 5, tx nonce 3"),
			RpcError::NonceTooLow(_)
		));
		assert!(matches!(
			RpcError::from_message("already known"),
			RpcError::AlreadyKnown(_)
		));
		assert!(matches!(
			RpcError::from_message("known transaction: 0xabc"),
			RpcError::AlreadyKnown(_)
		));
		assert!(matches!(
			RpcError::from_message("insufficient funds for gas * price + value"),
			RpcError::InsufficientFunds(_)
		));
		assert!(matches!(
			RpcError::from_message("intrinsic gas too low: have 21000, want 42000"),
			RpcError::IntrinsicGasTooLow(_)
		));
		assert!(matches!(RpcError::from_message("RPC timeout"), RpcError::Timeout(_)));
		assert!(matches!(
			RpcError::from_message("Transaction timeout after 30s"),
			RpcError::Timeout(_)
		));
		assert!(matches!(
			RpcError::from_message("read ECONNRESET"),
			RpcError::Connection(_)
		));
		assert!(matches!(
			RpcError::from_message("getaddrinfo ENOTFOUND rpc.example"),
			RpcError::Connection(_)
		));
		assert!(matches!(
			RpcError::from_message("execution reverted"),
			RpcError::Rpc(_)
		));
	}

	#[test]
	fn test_retryable() {
		assert!(RpcError::Timeout("x".into()).is_retryable());
		assert!(RpcError::Connection("x".into()).is_retryable());
		assert!(!RpcError::NonceTooLow("x".into()).is_retryable());
		assert!(!RpcError::AlreadyKnown("x".into()).is_retryable());
		assert!(!RpcError::InsufficientFunds("x".into()).is_retryable());
		assert!(!RpcError::IntrinsicGasTooLow("x".into()).is_retryable());
		assert!(!RpcError::Rpc("x".into()).is_retryable());
	}
}
