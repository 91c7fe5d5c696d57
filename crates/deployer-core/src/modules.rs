//! Module wave: auxiliary contracts deployed after the primary contract.
//!
//! Module `i` of the requested list is created at
//! `max(live nonces at wave start) + i` on every chain, so each module lands
//! at the same address everywhere. Chains run concurrently; on one chain the
//! modules are deployed in list order under a single nonce lease.

use crate::error::DeployError;
use crate::orchestrator::{ChainJob, DeploymentOrchestrator};
use alloy::primitives::{Address, Bytes};
use deployer_rpc::Connection;
use deployer_types::{
	AddressAgreement, ChainId, DeploymentResult, ModuleCatalogue, ModuleError, ModulePlan,
	ModuleReport, ModuleSpec,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// A planned module wave.
#[derive(Debug, Clone)]
pub struct ModuleWave {
	pub plan: ModulePlan,
	/// Chains whose nonce was read at wave start.
	pub chains: Vec<ChainId>,
	/// Chains left out of the wave.
	pub failures: Vec<DeploymentResult>,
}

pub struct ModuleDeploymentOrchestrator {
	deployments: DeploymentOrchestrator,
	catalogue: ModuleCatalogue,
	settle_delay: Duration,
}

impl ModuleDeploymentOrchestrator {
	pub fn new(
		deployments: DeploymentOrchestrator,
		catalogue: ModuleCatalogue,
		settle_delay: Duration,
	) -> Self {
		Self {
			deployments,
			catalogue,
			settle_delay,
		}
	}

	pub fn catalogue(&self) -> &ModuleCatalogue {
		&self.catalogue
	}

	/// Resolves the requested module types against the catalogue.
	///
	/// Unknown types and missing bytecode are rejected here, before any
	/// transaction is sent.
	pub fn resolve(
		&self,
		requested: &[String],
		init_codes: &HashMap<String, Bytes>,
	) -> Result<Vec<ModuleSpec>, DeployError> {
		let specs = self.catalogue.validate_requested(requested)?;
		for spec in &specs {
			let present = init_codes
				.get(&spec.module_type)
				.is_some_and(|code| !code.is_empty());
			if !present {
				return Err(ModuleError::MissingInitCode(spec.module_type.clone()).into());
			}
		}
		Ok(specs)
	}

	/// Reads live nonces and schedules the modules from their maximum.
	pub async fn plan(
		&self,
		specs: Vec<ModuleSpec>,
		connections: &[Connection],
	) -> Result<ModuleWave, DeployError> {
		let mut chains = Vec::new();
		let mut failures = Vec::new();
		let mut base_nonce = 0;

		for (chain_id, nonce) in self.deployments.read_nonces(connections).await {
			match nonce {
				Ok(nonce) => {
					base_nonce = base_nonce.max(nonce);
					chains.push(chain_id);
				}
				Err(e) => {
					warn!(chain_id, "Dropping chain from module wave: {}", e);
					failures.push(DeploymentResult::failure(chain_id, e.to_string()));
				}
			}
		}

		if chains.is_empty() {
			return Err(DeployError::NoConnections(
				"no chain reported a nonce for the module wave".to_string(),
			));
		}

		let plan = ModulePlan::new(base_nonce, specs);
		for target in &plan.targets {
			info!(
				module = %target.spec.module_type,
				target_nonce = target.target_nonce,
				"Module scheduled"
			);
		}

		Ok(ModuleWave {
			plan,
			chains,
			failures,
		})
	}

	/// Deploys every planned module on every chain of the wave.
	pub async fn deploy(
		&self,
		wave: &ModuleWave,
		init_codes: &HashMap<String, Bytes>,
		primary: Address,
		connections: &[Connection],
	) -> Vec<ModuleReport> {
		let mut per_chain: Vec<(ChainId, Vec<DeploymentResult>)> = Vec::new();
		let mut handles = Vec::new();

		for &chain_id in &wave.chains {
			let Some(connection) = connections.iter().find(|c| c.chain_id == chain_id).cloned()
			else {
				let missing = wave
					.plan
					.targets
					.iter()
					.map(|_| DeploymentResult::failure(chain_id, "No connection for chain"))
					.collect();
				per_chain.push((chain_id, missing));
				continue;
			};

			let gas = self.deployments.settings().module_gas;
			let jobs: Vec<ChainJob> = wave
				.plan
				.targets
				.iter()
				.map(|target| {
					let bytecode = init_codes
						.get(&target.spec.module_type)
						.cloned()
						.unwrap_or_default();
					ChainJob {
						label: target.spec.contract_name.clone(),
						init_code: target.spec.init_code(
							&bytecode,
							primary,
							chain_id,
							connection.address,
						),
						target_nonce: target.target_nonce,
						gas,
						logo_uri: None,
					}
				})
				.collect();

			let deployments = self.deployments.clone();
			let handle = tokio::spawn(async move {
				let _lease = deployments
					.nonces()
					.lease(connection.address, connection.chain_id)
					.await;
				let mut results = Vec::with_capacity(jobs.len());
				for job in &jobs {
					results.push(deployments.deploy_on_chain(&connection, job).await);
				}
				results
			});
			handles.push((chain_id, handle));
		}

		for (chain_id, handle) in handles {
			let results = match handle.await {
				Ok(results) => results,
				Err(e) => wave
					.plan
					.targets
					.iter()
					.map(|_| {
						DeploymentResult::failure(chain_id, format!("Module task failed: {}", e))
					})
					.collect(),
			};
			per_chain.push((chain_id, results));
		}

		wave.plan
			.targets
			.iter()
			.enumerate()
			.map(|(index, target)| {
				let mut networks: Vec<DeploymentResult> = per_chain
					.iter()
					.filter_map(|(_, results)| results.get(index).cloned())
					.collect();
				networks.extend(wave.failures.iter().cloned());
				module_report(&target.spec, target.target_nonce, networks)
			})
			.collect()
	}

	/// Waits before verification so explorers index the new contracts.
	pub async fn settle(&self) {
		if !self.settle_delay.is_zero() {
			info!("Waiting {:?} before verification", self.settle_delay);
			tokio::time::sleep(self.settle_delay).await;
		}
	}
}

fn module_report(spec: &ModuleSpec, target_nonce: u64, networks: Vec<DeploymentResult>) -> ModuleReport {
	let failed = networks.iter().filter(|r| !r.success).count();
	let (address, error) = match AddressAgreement::from_results(&networks) {
		AddressAgreement::Agreed(address) if failed == 0 => (Some(address), None),
		AddressAgreement::Agreed(address) => (
			Some(address),
			Some(format!("{} of {} chains failed", failed, networks.len())),
		),
		AddressAgreement::Diverged(addresses) => (
			None,
			Some(DeployError::CrossChainDivergence { addresses }.to_string()),
		),
		AddressAgreement::Empty => (None, Some("no chain deployed the module".to_string())),
	};

	if let Some(error) = &error {
		warn!(module = %spec.module_type, "Module wave incomplete: {}", error);
	} else {
		info!(module = %spec.module_type, address = ?address, "Module deployed on all chains");
	}

	ModuleReport {
		module_type: spec.module_type.clone(),
		contract_name: spec.contract_name.clone(),
		target_nonce,
		address,
		success: error.is_none(),
		error,
		networks,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::orchestrator::tests::{creations, fillers, harness, init_code, Harness};

	fn modules() -> Vec<String> {
		vec![
			"treasury".to_string(),
			"timelock".to_string(),
			"reader".to_string(),
		]
	}

	fn module_codes() -> HashMap<String, Bytes> {
		modules()
			.into_iter()
			.enumerate()
			.map(|(i, m)| (m, Bytes::from(vec![0x60, i as u8 + 1])))
			.collect()
	}

	fn module_orchestrator(h: &Harness) -> ModuleDeploymentOrchestrator {
		ModuleDeploymentOrchestrator::new(
			h.orchestrator.clone(),
			ModuleCatalogue::builtin(),
			Duration::from_secs(30),
		)
	}

	async fn deploy_primary(h: &Harness) -> Address {
		let outcome = h
			.orchestrator
			.deploy("DLE", init_code(), &h.connections, None)
			.await
			.unwrap();
		match outcome.agreement() {
			AddressAgreement::Agreed(address) => address,
			other => panic!("primary not agreed: {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_modules_land_at_consecutive_nonces() {
		let h = harness(&[1, 2]).await;
		let primary = deploy_primary(&h).await;
		let modules_orchestrator = module_orchestrator(&h);

		let specs = modules_orchestrator
			.resolve(&modules(), &module_codes())
			.unwrap();
		let wave = modules_orchestrator
			.plan(specs, &h.connections)
			.await
			.unwrap();
		assert_eq!(wave.plan.base_nonce, 1);

		let reports = modules_orchestrator
			.deploy(&wave, &module_codes(), primary, &h.connections)
			.await;
		assert_eq!(reports.len(), 3);

		for (offset, report) in reports.iter().enumerate() {
			let nonce = 1 + offset as u64;
			let expected = h.sender.create(nonce);
			assert!(report.success, "{:?}", report.error);
			assert_eq!(report.target_nonce, nonce);
			assert_eq!(report.address, Some(expected));
			assert_ne!(report.address, Some(primary));
			assert_eq!(report.networks.len(), 2);
			assert!(report.networks.iter().all(|r| r.address == Some(expected)));
		}
		assert_eq!(reports[0].module_type, "treasury");
		assert_eq!(reports[0].contract_name, "TreasuryModule");

		// Treasury arguments embed the chain id, yet the address is shared.
		let treasury_inputs: Vec<Bytes> = h
			.chains
			.iter()
			.map(|chain| {
				creations(chain, h.sender)
					.into_iter()
					.find(|s| s.tx.nonce == 1)
					.unwrap()
					.tx
					.input
			})
			.collect();
		assert_ne!(treasury_inputs[0], treasury_inputs[1]);
	}

	#[tokio::test]
	async fn test_wave_base_is_global_max() {
		let h = harness(&[1, 2]).await;
		let primary = deploy_primary(&h).await;
		h.chains[1].advance_nonce(h.sender, 3);
		let modules_orchestrator = module_orchestrator(&h);

		let requested = vec!["timelock".to_string()];
		let specs = modules_orchestrator
			.resolve(&requested, &module_codes())
			.unwrap();
		let wave = modules_orchestrator
			.plan(specs, &h.connections)
			.await
			.unwrap();
		assert_eq!(wave.plan.target_nonce("timelock"), Some(4));

		let reports = modules_orchestrator
			.deploy(&wave, &module_codes(), primary, &h.connections)
			.await;
		assert!(reports[0].success);
		assert_eq!(reports[0].networks[0].fillers_sent, 3);
		assert_eq!(reports[0].networks[1].fillers_sent, 0);
		assert_eq!(fillers(&h.chains[0], h.sender).len(), 3);
	}

	#[tokio::test]
	async fn test_unknown_module_rejected_before_any_send() {
		let h = harness(&[1]).await;
		let modules_orchestrator = module_orchestrator(&h);

		let requested = vec!["treasury".to_string(), "bogus".to_string()];
		let err = modules_orchestrator
			.resolve(&requested, &module_codes())
			.unwrap_err();
		assert!(err.to_string().contains("Unknown module type: bogus"));

		let mut codes = module_codes();
		codes.remove("reader");
		let err = modules_orchestrator.resolve(&modules(), &codes).unwrap_err();
		assert!(err.to_string().contains("reader"));

		assert!(h.chains[0].sent().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_settle_waits_configured_delay() {
		let h = harness(&[1]).await;
		let modules_orchestrator = module_orchestrator(&h);

		let start = tokio::time::Instant::now();
		modules_orchestrator.settle().await;
		assert!(start.elapsed() >= Duration::from_secs(30));
	}
}
