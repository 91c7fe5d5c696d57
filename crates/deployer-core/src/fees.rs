//! Fee overrides and gas limits for outgoing transactions.

use crate::error::DeployError;
use alloy::primitives::{Address, U256};
use deployer_config::{FeeConfig, GasConfig, GasProfile};
use deployer_rpc::ChainClient;
use deployer_types::{ChainId, FeeData, FeeOverrides, TxRequest};
use tracing::{debug, warn};

/// Applies minimum fees on top of what the node suggests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
	pub min_priority_fee: u128,
	pub min_max_fee: u128,
}

impl FeePolicy {
	pub fn from_config(config: &FeeConfig) -> Self {
		Self {
			min_priority_fee: config.min_priority_fee_wei(),
			min_max_fee: config.min_max_fee_wei(),
		}
	}

	/// EIP-1559 fields when the node reports a max fee, a legacy gas price
	/// otherwise. `None` when the node reports neither.
	pub fn overrides(&self, fee_data: &FeeData) -> Option<FeeOverrides> {
		if let Some(max_fee) = fee_data.max_fee_per_gas {
			let max_fee_per_gas = max_fee.max(self.min_max_fee);
			let priority = fee_data
				.max_priority_fee_per_gas
				.filter(|p| *p > 0)
				.unwrap_or(self.min_priority_fee);
			return Some(FeeOverrides::Eip1559 {
				max_fee_per_gas,
				max_priority_fee_per_gas: priority.min(max_fee_per_gas),
			});
		}

		fee_data.gas_price.map(|gas_price| FeeOverrides::Legacy {
			gas_price: gas_price.max(self.min_max_fee),
		})
	}

	pub async fn fetch(
		&self,
		client: &dyn ChainClient,
		chain_id: ChainId,
	) -> Result<Option<FeeOverrides>, DeployError> {
		let fee_data = client
			.fee_data()
			.await
			.map_err(|e| DeployError::rpc(chain_id, e))?;
		Ok(self.overrides(&fee_data))
	}
}

/// Gas limit selection for contract creations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPolicy {
	pub profile: GasProfile,
	pub buffer_percent: u64,
	pub balance_reserve: U256,
}

impl GasPolicy {
	pub fn new(config: &GasConfig, profile: GasProfile) -> Self {
		Self {
			profile,
			buffer_percent: config.estimate_buffer_percent,
			balance_reserve: U256::from(config.balance_reserve_wei),
		}
	}

	pub fn primary(config: &GasConfig) -> Self {
		Self::new(config, config.primary)
	}

	pub fn module(config: &GasConfig) -> Self {
		Self::new(config, config.modules)
	}

	pub fn buffered(&self, estimate: u64) -> u64 {
		estimate.saturating_add(estimate.saturating_mul(self.buffer_percent) / 100)
	}

	/// Ceiling derived from what the balance can pay, clamped to the profile.
	///
	/// `None` when the balance does not exceed the reserve.
	pub fn balance_ceiling(&self, balance: U256, effective_price: u128) -> Option<u64> {
		if balance <= self.balance_reserve {
			return None;
		}
		if effective_price == 0 {
			return Some(self.profile.default);
		}
		let affordable = (balance - self.balance_reserve) / U256::from(effective_price);
		Some(self.profile.clamp(affordable.saturating_to::<u64>()))
	}

	/// Buffered estimate, or the balance ceiling when estimation fails.
	pub async fn gas_limit(
		&self,
		client: &dyn ChainClient,
		tx: &TxRequest,
		sender: Address,
		chain_id: ChainId,
	) -> Result<u64, DeployError> {
		match client.estimate_gas(tx).await {
			Ok(estimate) => {
				let gas_limit = self.buffered(estimate);
				debug!(chain_id, estimate, gas_limit, "Gas estimated");
				Ok(gas_limit)
			}
			Err(e) => {
				warn!(chain_id, "Gas estimation failed, deriving limit from balance: {}", e);
				let balance = client
					.balance(sender)
					.await
					.map_err(|e| DeployError::rpc(chain_id, e))?;
				let price = tx.fees.map(|f| f.effective_price()).unwrap_or(0);
				self.balance_ceiling(balance, price)
					.ok_or_else(|| DeployError::InsufficientFunds {
						chain_id,
						message: format!(
							"balance {} wei does not exceed the reserve of {} wei",
							balance, self.balance_reserve
						),
					})
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::Bytes;
	use deployer_rpc::SimulatedChain;

	const GWEI: u128 = 1_000_000_000;
	const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

	fn policy() -> FeePolicy {
		FeePolicy::from_config(&FeeConfig::default())
	}

	#[test]
	fn test_eip1559_floors() {
		let overrides = policy().overrides(&FeeData {
			max_fee_per_gas: Some(3 * GWEI),
			max_priority_fee_per_gas: Some(0),
			gas_price: Some(2 * GWEI),
		});
		assert_eq!(
			overrides,
			Some(FeeOverrides::Eip1559 {
				max_fee_per_gas: 20 * GWEI,
				max_priority_fee_per_gas: GWEI,
			})
		);
	}

	#[test]
	fn test_eip1559_keeps_higher_node_fees() {
		let overrides = policy().overrides(&FeeData {
			max_fee_per_gas: Some(50 * GWEI),
			max_priority_fee_per_gas: Some(3 * GWEI),
			gas_price: None,
		});
		assert_eq!(
			overrides,
			Some(FeeOverrides::Eip1559 {
				max_fee_per_gas: 50 * GWEI,
				max_priority_fee_per_gas: 3 * GWEI,
			})
		);
	}

	#[test]
	fn test_legacy_and_missing_fee_data() {
		let overrides = policy().overrides(&FeeData {
			max_fee_per_gas: None,
			max_priority_fee_per_gas: None,
			gas_price: Some(GWEI),
		});
		assert_eq!(
			overrides,
			Some(FeeOverrides::Legacy {
				gas_price: 20 * GWEI
			})
		);
		assert_eq!(policy().overrides(&FeeData::default()), None);
	}

	#[test]
	fn test_balance_ceiling() {
		let gas = GasPolicy::primary(&GasConfig::default());
		let reserve = gas.balance_reserve;

		assert_eq!(gas.balance_ceiling(reserve, 20 * GWEI), None);
		assert_eq!(
			gas.balance_ceiling(reserve + U256::from(1u64), 0),
			Some(3_000_000)
		);
		// 0.01 ETH spare at 20 gwei buys 500k gas, below the primary floor.
		let spare = U256::from(10_000_000_000_000_000u128);
		assert_eq!(
			gas.balance_ceiling(reserve + spare, 20 * GWEI),
			Some(2_500_000)
		);
		// 1 ETH spare buys 50M gas, above the primary cap.
		let spare = U256::from(1_000_000_000_000_000_000u128);
		assert_eq!(
			gas.balance_ceiling(reserve + spare, 20 * GWEI),
			Some(5_000_000)
		);
	}

	#[test]
	fn test_buffered_estimate() {
		let gas = GasPolicy::module(&GasConfig::default());
		assert_eq!(gas.buffered(1_000_000), 1_200_000);
	}

	#[tokio::test]
	async fn test_gas_limit_falls_back_to_balance() {
		let chain = SimulatedChain::new(1);
		let client = chain.client(KEY).unwrap();
		let sender = client.sender().unwrap();
		let gas = GasPolicy::primary(&GasConfig::default());
		let tx = TxRequest::create(Bytes::from(vec![0x60]), 0).with_fees(Some(
			FeeOverrides::Legacy {
				gas_price: 20 * GWEI,
			},
		));

		assert_eq!(gas.gas_limit(&client, &tx, sender, 1).await.unwrap(), 1_440_000);

		chain.set_create_gas_estimate(None);
		assert_eq!(gas.gas_limit(&client, &tx, sender, 1).await.unwrap(), 5_000_000);

		chain.set_balance(sender, U256::from(1_000u64));
		let err = gas.gas_limit(&client, &tx, sender, 1).await.unwrap_err();
		assert!(matches!(err, DeployError::InsufficientFunds { chain_id: 1, .. }));
	}
}
