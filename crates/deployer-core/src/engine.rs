//! Run driver: loads parameters, opens connections, runs the primary and
//! module waves, persists the report and submits verification.

use crate::error::DeployError;
use crate::modules::ModuleDeploymentOrchestrator;
use crate::orchestrator::{DeploySettings, DeploymentOrchestrator};
use alloy::primitives::{Address, Bytes};
use chrono::Utc;
use deployer_config::DeployerConfig;
use deployer_nonce::{NonceManager, NonceReadOptions};
use deployer_rpc::{
	address_from_key, resolve_rpc_urls, AlloyConnector, ChainConnector, Connection,
	ConnectionOptions, RpcConnectionManager, RpcRegistry, StaticRpcTable, StorageRpcRegistry,
};
use deployer_storage::{create_storage, StorageService, PARAMS_NAMESPACE, REPORTS_NAMESPACE};
use deployer_types::{
	AddressAgreement, ChainId, DeploymentParams, DeploymentResult, ModuleCatalogue, ModuleSpec,
	RunReport, RunStatus, VerificationRecord, VerificationSource,
};
use deployer_verification::{
	EtherscanV2Verifier, VerificationCoordinator, VerificationInterface, VerificationRequest,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Modules deployed next to an existing contract when neither the caller nor
/// the stored parameters name any.
pub const DEFAULT_MODULES: &[&str] = &["treasury", "timelock", "reader"];

/// CREATE addresses of `count` consecutive nonces starting at `nonce`.
pub fn predict_addresses(deployer: Address, nonce: u64, count: u64) -> Vec<(u64, Address)> {
	(nonce..nonce.saturating_add(count))
		.map(|n| (n, deployer.create(n)))
		.collect()
}

/// Per-run protocol state: one nonce session shared by every wave.
struct Session {
	rpc: Arc<RpcConnectionManager>,
	nonces: Arc<NonceManager>,
	orchestrator: DeploymentOrchestrator,
	modules: ModuleDeploymentOrchestrator,
}

pub struct Deployer {
	config: DeployerConfig,
	storage: Arc<StorageService>,
	connector: Arc<dyn ChainConnector>,
	registry: Arc<dyn RpcRegistry>,
	static_rpcs: StaticRpcTable,
	verifier: Option<Arc<VerificationCoordinator>>,
	catalogue: ModuleCatalogue,
}

impl Deployer {
	pub fn config(&self) -> &DeployerConfig {
		&self.config
	}

	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub async fn load_params(&self, deployment_id: &str) -> Result<DeploymentParams, DeployError> {
		Ok(self.storage.retrieve(PARAMS_NAMESPACE, deployment_id).await?)
	}

	pub async fn store_params(
		&self,
		deployment_id: &str,
		params: &DeploymentParams,
	) -> Result<(), DeployError> {
		Ok(self
			.storage
			.store(PARAMS_NAMESPACE, deployment_id, params)
			.await?)
	}

	pub async fn report(&self, deployment_id: &str) -> Result<Option<RunReport>, DeployError> {
		Ok(self
			.storage
			.retrieve_optional(REPORTS_NAMESPACE, deployment_id)
			.await?)
	}

	/// Deploys the stored parameters of `deployment_id`.
	pub async fn run(&self, deployment_id: &str) -> Result<RunReport, DeployError> {
		let params = self.load_params(deployment_id).await?;
		self.deploy(deployment_id, &params).await
	}

	/// Runs both waves for `params`.
	///
	/// Errors are returned only for rejected parameters and storage
	/// failures; chain failures are reported in the returned report.
	pub async fn deploy(
		&self,
		deployment_id: &str,
		params: &DeploymentParams,
	) -> Result<RunReport, DeployError> {
		params.validate()?;
		let deployer = address_from_key(&params.private_key)
			.map_err(|e| DeployError::Configuration(e.to_string()))?;

		let Session {
			rpc,
			nonces,
			orchestrator,
			modules,
		} = self.session();
		let module_specs = modules.resolve(&params.modules_to_deploy, &params.module_init_codes)?;

		info!(
			deployment_id,
			contract = %params.name,
			%deployer,
			chains = ?params.supported_chain_ids,
			modules = ?params.modules_to_deploy,
			"Starting deployment"
		);
		if let Some(salt) = params.create2_salt {
			info!(%salt, "CREATE2 salt recorded; addresses follow the deployer nonce");
		}

		let mut report = RunReport::new(deployment_id);
		let (connections, connection_failures) = self.connect_all(&rpc, params).await;

		if connections.is_empty() {
			let err = DeployError::NoConnections(format!(
				"no RPC endpoint reachable for chains {:?}",
				params.supported_chain_ids
			));
			error!(deployment_id, "{}", err);
			report.primary = connection_failures;
			report.error = Some(err.to_string());
			return self.finish(report).await;
		}

		let outcome = match orchestrator
			.deploy(
				&params.name,
				params.init_code.clone(),
				&connections,
				params.logo_uri.as_deref(),
			)
			.await
		{
			Ok(outcome) => outcome,
			Err(e) => {
				error!(deployment_id, "Primary wave failed: {}", e);
				report.primary = connection_failures;
				report.error = Some(e.to_string());
				return self.finish(report).await;
			}
		};

		report.target_nonce = Some(outcome.target_nonce);
		report.primary = outcome.results.clone();
		report.primary.extend(connection_failures);
		let all_succeeded = report.primary.iter().all(|r| r.success);

		match AddressAgreement::from_results(&report.primary) {
			AddressAgreement::Agreed(address) => {
				report.primary_address = Some(address);
				if !all_succeeded {
					report.error = Some(format!(
						"{} of {} chains failed",
						report.primary.iter().filter(|r| !r.success).count(),
						report.primary.len()
					));
				}
			}
			AddressAgreement::Diverged(addresses) => {
				let err = DeployError::CrossChainDivergence { addresses };
				error!(deployment_id, "{}", err);
				report.error = Some(err.to_string());
			}
			AddressAgreement::Empty => {
				report.error = Some("no chain deployed the contract".to_string());
			}
		}
		self.persist(&report).await?;

		if !module_specs.is_empty() {
			if let Some(reason) = orchestrator.abort_signal().reason() {
				warn!(deployment_id, "Skipping module wave after abort: {}", reason);
			} else if let Some(primary) = report.primary_address {
				let deployed: Vec<Connection> = connections
					.iter()
					.filter(|c| report.primary_result(c.chain_id).is_some_and(|r| r.success))
					.cloned()
					.collect();
				match modules.plan(module_specs, &deployed).await {
					Ok(wave) => {
						report.modules = modules
							.deploy(&wave, &params.module_init_codes, primary, &deployed)
							.await;
					}
					Err(e) => {
						warn!(deployment_id, "Module wave not started: {}", e);
						report.error.get_or_insert_with(|| e.to_string());
					}
				}
				self.persist(&report).await?;
			} else {
				warn!(deployment_id, "Skipping module wave without a primary address");
			}
		}

		let modules_ok = report.modules.iter().all(|m| m.success)
			&& report.modules.len() == params.modules_to_deploy.len();
		if report.error.is_none() && !modules_ok {
			report.error = Some("module wave incomplete".to_string());
		}

		self.verify(&modules, params, deployer, &mut report, true).await;
		nonces.clear_old_pending_transactions();
		self.finish(report).await
	}

	/// Deploys modules next to an already deployed `primary` contract.
	///
	/// `requested` takes precedence over the module list of the stored
	/// parameters, which falls back to [`DEFAULT_MODULES`]. The module
	/// reports are merged into the stored report of `deployment_id`.
	pub async fn deploy_modules(
		&self,
		deployment_id: &str,
		primary: Address,
		requested: &[String],
	) -> Result<RunReport, DeployError> {
		let params = self.load_params(deployment_id).await?;
		params.validate()?;
		let deployer = address_from_key(&params.private_key)
			.map_err(|e| DeployError::Configuration(e.to_string()))?;

		let requested: Vec<String> = if !requested.is_empty() {
			requested.to_vec()
		} else if !params.modules_to_deploy.is_empty() {
			params.modules_to_deploy.clone()
		} else {
			DEFAULT_MODULES.iter().map(|m| m.to_string()).collect()
		};

		let Session {
			rpc,
			nonces,
			modules,
			..
		} = self.session();
		let specs = modules.resolve(&requested, &params.module_init_codes)?;

		info!(
			deployment_id,
			%primary,
			%deployer,
			modules = ?requested,
			"Starting module deployment"
		);

		let mut report = self
			.report(deployment_id)
			.await?
			.unwrap_or_else(|| RunReport::new(deployment_id));
		report.primary_address = Some(primary);
		report.error = None;
		report.finished_at = None;

		let (connections, connection_failures) = self.connect_all(&rpc, &params).await;
		let wave = if connections.is_empty() {
			Err(DeployError::NoConnections(format!(
				"no RPC endpoint reachable for chains {:?}",
				params.supported_chain_ids
			)))
		} else {
			modules.plan(specs, &connections).await
		};

		match wave {
			Ok(mut wave) => {
				wave.failures.extend(connection_failures);
				for module in modules
					.deploy(&wave, &params.module_init_codes, primary, &connections)
					.await
				{
					report.modules.retain(|m| m.module_type != module.module_type);
					report.modules.push(module);
				}
				let incomplete: Vec<&str> = report
					.modules
					.iter()
					.filter(|m| !m.success && requested.contains(&m.module_type))
					.map(|m| m.module_type.as_str())
					.collect();
				if !incomplete.is_empty() {
					report.error = Some(format!("module wave incomplete: {}", incomplete.join(", ")));
				}
			}
			Err(e) => {
				error!(deployment_id, "Module wave not started: {}", e);
				report.error = Some(e.to_string());
			}
		}
		self.persist(&report).await?;

		self.verify(&modules, &params, deployer, &mut report, false)
			.await;
		nonces.clear_old_pending_transactions();
		self.finish(report).await
	}

	fn session(&self) -> Session {
		let rpc = Arc::new(RpcConnectionManager::from_config(
			self.connector.clone(),
			&self.config.rpc,
		));
		let nonces = Arc::new(
			NonceManager::new(self.connector.clone())
				.with_options(NonceReadOptions {
					timeout: self.config.rpc.read_timeout(),
					max_retries: self.config.rpc.nonce_max_retries,
					retry_delay: self.config.rpc.base_delay(),
				})
				.with_pending_ttl(self.config.deployment.pending_tx_ttl()),
		);
		let orchestrator = DeploymentOrchestrator::new(
			rpc.clone(),
			nonces.clone(),
			DeploySettings::from_config(&self.config),
		);
		let modules = ModuleDeploymentOrchestrator::new(
			orchestrator.clone(),
			self.catalogue.clone(),
			self.config.deployment.module_settle_delay(),
		);
		Session {
			rpc,
			nonces,
			orchestrator,
			modules,
		}
	}

	/// Resubmits and polls verification of `address`.
	///
	/// `module` selects the module whose sources and constructor arguments
	/// apply; the primary contract otherwise.
	pub async fn refresh_verification(
		&self,
		deployment_id: &str,
		address: Address,
		module: Option<&str>,
	) -> Result<VerificationRecord, DeployError> {
		let verifier = self
			.verifier
			.as_ref()
			.ok_or_else(|| DeployError::Configuration("verification is disabled".to_string()))?;
		let params = self.load_params(deployment_id).await?;
		let api_key = self.api_key(&params).ok_or_else(|| {
			DeployError::Configuration("no explorer API key configured".to_string())
		})?;
		let deployer = address_from_key(&params.private_key)
			.map_err(|e| DeployError::Configuration(e.to_string()))?;

		let (source, args) = match module {
			None => (
				params.verification.clone(),
				ConstructorArgs::Fixed(params.primary_constructor_args.clone().unwrap_or_default()),
			),
			Some(module_type) => {
				let spec = self
					.catalogue
					.get(module_type)
					.cloned()
					.ok_or_else(|| DeployError::Configuration(format!(
						"Unknown module type: {}",
						module_type
					)))?;
				let primary = self
					.report(deployment_id)
					.await?
					.and_then(|r| r.primary_address)
					.ok_or_else(|| DeployError::Configuration(format!(
						"no primary address recorded for {}",
						deployment_id
					)))?;
				(
					params.module_verification.get(module_type).cloned(),
					ConstructorArgs::Module {
						spec,
						primary,
						deployer,
					},
				)
			}
		};
		let source = source.ok_or_else(|| {
			DeployError::Configuration("no verification sources for this contract".to_string())
		})?;

		let record = verifier
			.refresh(address, &api_key, |chain_id| {
				Some(request(&source, chain_id, address, args.for_chain(chain_id), &api_key))
			})
			.await?;
		Ok(record)
	}

	async fn connect_all(
		&self,
		rpc: &RpcConnectionManager,
		params: &DeploymentParams,
	) -> (Vec<Connection>, Vec<DeploymentResult>) {
		let options = ConnectionOptions::from_config(&self.config.rpc);
		let attempts = params.supported_chain_ids.iter().map(|&chain_id| async move {
			let primary = params
				.rpc_urls
				.get(&chain_id)
				.cloned()
				.or_else(|| self.config.chains.get(&chain_id).and_then(|c| c.rpc_url.clone()));
			let urls = resolve_rpc_urls(
				chain_id,
				primary.as_deref(),
				self.registry.as_ref(),
				&self.static_rpcs,
			)
			.await;
			let connection = rpc
				.connect_chain(chain_id, &urls, &params.private_key, options)
				.await;
			(chain_id, connection)
		});

		let mut connections = Vec::new();
		let mut failures = Vec::new();
		for (chain_id, connection) in join_all(attempts).await {
			match connection {
				Ok(connection) => {
					info!(chain_id, rpc_url = %connection.rpc_url, "Connected");
					connections.push(connection);
				}
				Err(e) => {
					let err = DeployError::rpc(chain_id, e);
					warn!(chain_id, "Chain unreachable: {}", err);
					failures.push(DeploymentResult::failure(chain_id, err.to_string()));
				}
			}
		}
		(connections, failures)
	}

	/// Submits verification for the deployed modules, and the primary
	/// contract with `include_primary`, and records the outcome on the
	/// results. Never fails the run.
	async fn verify(
		&self,
		modules: &ModuleDeploymentOrchestrator,
		params: &DeploymentParams,
		deployer: Address,
		report: &mut RunReport,
		include_primary: bool,
	) {
		let Some(verifier) = &self.verifier else {
			return;
		};
		let Some(api_key) = self.api_key(params) else {
			warn!(
				deployment_id = %report.deployment_id,
				"No explorer API key, skipping verification"
			);
			return;
		};
		let Some(primary) = report.primary_address else {
			return;
		};

		modules.settle().await;

		if let Some(source) = params.verification.as_ref().filter(|_| include_primary) {
			let primary_args = params.primary_constructor_args.clone().unwrap_or_default();
			let requests: Vec<VerificationRequest> = report
				.primary
				.iter()
				.filter(|r| r.success)
				.map(|r| request(source, r.chain_id, primary, primary_args.clone(), &api_key))
				.collect();
			annotate(&mut report.primary, verifier.submit_all(&requests).await);
		}

		for module in &mut report.modules {
			let (Some(address), Some(source)) = (
				module.address,
				params.module_verification.get(&module.module_type),
			) else {
				continue;
			};
			let Some(spec) = modules.catalogue().get(&module.module_type) else {
				continue;
			};
			let requests: Vec<VerificationRequest> = module
				.networks
				.iter()
				.filter(|r| r.success)
				.map(|r| {
					let args = spec.constructor_args(primary, r.chain_id, deployer);
					request(source, r.chain_id, address, args, &api_key)
				})
				.collect();
			annotate(&mut module.networks, verifier.submit_all(&requests).await);
		}
	}

	fn api_key(&self, params: &DeploymentParams) -> Option<String> {
		params
			.etherscan_api_key
			.clone()
			.or_else(|| self.config.verification.api_key.clone())
			.filter(|key| !key.trim().is_empty())
	}

	async fn persist(&self, report: &RunReport) -> Result<(), DeployError> {
		Ok(self
			.storage
			.store(REPORTS_NAMESPACE, &report.deployment_id, report)
			.await?)
	}

	async fn finish(&self, mut report: RunReport) -> Result<RunReport, DeployError> {
		let deployed_any = !report.primary.is_empty() || !report.modules.is_empty();
		report.status = if report.error.is_none() && deployed_any {
			RunStatus::Completed
		} else {
			RunStatus::Failed
		};
		report.finished_at = Some(Utc::now());
		self.persist(&report).await?;

		info!(
			deployment_id = %report.deployment_id,
			status = ?report.status,
			address = ?report.primary_address,
			"Deployment finished"
		);
		Ok(report)
	}
}

enum ConstructorArgs {
	Fixed(Bytes),
	Module {
		spec: ModuleSpec,
		primary: Address,
		deployer: Address,
	},
}

impl ConstructorArgs {
	fn for_chain(&self, chain_id: ChainId) -> Bytes {
		match self {
			Self::Fixed(args) => args.clone(),
			Self::Module {
				spec,
				primary,
				deployer,
			} => spec.constructor_args(*primary, chain_id, *deployer),
		}
	}
}

fn request(
	source: &VerificationSource,
	chain_id: ChainId,
	address: Address,
	constructor_args: Bytes,
	api_key: &str,
) -> VerificationRequest {
	VerificationRequest {
		chain_id,
		address,
		contract_name: source.contract_name.clone(),
		compiler_version: source.compiler_version.clone(),
		standard_json_input: source.standard_json_input.clone(),
		constructor_args,
		api_key: api_key.to_string(),
	}
}

fn annotate<E: std::fmt::Display>(
	results: &mut [DeploymentResult],
	submissions: Vec<(ChainId, Result<String, E>)>,
) {
	for (chain_id, submission) in submissions {
		if let Some(result) = results.iter_mut().find(|r| r.chain_id == chain_id) {
			result.verification = Some(match submission {
				Ok(guid) => guid,
				Err(e) => format!("failed: {}", e),
			});
		}
	}
}

/// Assembles a [`Deployer`], defaulting every unset seam from configuration.
pub struct DeployerBuilder {
	config: DeployerConfig,
	storage: Option<Arc<StorageService>>,
	connector: Option<Arc<dyn ChainConnector>>,
	registry: Option<Arc<dyn RpcRegistry>>,
	verifier: Option<Arc<dyn VerificationInterface>>,
}

impl DeployerBuilder {
	pub fn new(config: DeployerConfig) -> Self {
		Self {
			config,
			storage: None,
			connector: None,
			registry: None,
			verifier: None,
		}
	}

	pub fn with_storage(mut self, storage: Arc<StorageService>) -> Self {
		self.storage = Some(storage);
		self
	}

	pub fn with_connector(mut self, connector: Arc<dyn ChainConnector>) -> Self {
		self.connector = Some(connector);
		self
	}

	pub fn with_registry(mut self, registry: Arc<dyn RpcRegistry>) -> Self {
		self.registry = Some(registry);
		self
	}

	pub fn with_verifier(mut self, verifier: Arc<dyn VerificationInterface>) -> Self {
		self.verifier = Some(verifier);
		self
	}

	pub fn build(self) -> Result<Deployer, DeployError> {
		let storage = self
			.storage
			.unwrap_or_else(|| Arc::new(StorageService::new(create_storage(&self.config.storage))));
		let connector = self
			.connector
			.unwrap_or_else(|| Arc::new(AlloyConnector::new()));
		let registry = self
			.registry
			.unwrap_or_else(|| Arc::new(StorageRpcRegistry::new(storage.clone())));

		let verifier = if self.config.verification.enabled {
			let interface: Arc<dyn VerificationInterface> = match self.verifier {
				Some(verifier) => verifier,
				None => Arc::new(EtherscanV2Verifier::new(
					self.config.verification.api_url.clone(),
					Duration::from_secs(self.config.verification.request_timeout_secs),
				)?),
			};
			Some(Arc::new(VerificationCoordinator::new(
				interface,
				storage.clone(),
			)))
		} else {
			None
		};

		Ok(Deployer {
			static_rpcs: StaticRpcTable::from_config(&self.config),
			catalogue: self.config.module_catalogue(),
			config: self.config,
			storage,
			connector,
			registry,
			verifier,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::orchestrator::tests::KEY;
	use alloy::primitives::B256;
	use async_trait::async_trait;
	use deployer_config::ChainConfig;
	use deployer_rpc::{SimulatedChain, SimulatedNetwork};
	use deployer_storage::VERIFICATION_NAMESPACE;
	use deployer_verification::{record_key, VerificationError};
	use std::collections::HashMap;
	use std::sync::Mutex;

	const CHAIN_A: ChainId = 31337;
	const CHAIN_B: ChainId = 31338;
	const OTHER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

	#[derive(Default)]
	struct RecordingVerifier {
		submitted: Mutex<Vec<(ChainId, Address, Bytes)>>,
	}

	#[async_trait]
	impl VerificationInterface for RecordingVerifier {
		async fn submit(&self, request: &VerificationRequest) -> Result<String, VerificationError> {
			let mut submitted = self.submitted.lock().unwrap();
			submitted.push((
				request.chain_id,
				request.address,
				request.constructor_args.clone(),
			));
			Ok(format!("guid-{}", submitted.len()))
		}

		async fn check_status(
			&self,
			_chain_id: ChainId,
			_guid: &str,
			_api_key: &str,
		) -> Result<String, VerificationError> {
			Ok("Pass - Verified".to_string())
		}
	}

	struct Setup {
		network: SimulatedNetwork,
		chains: Vec<SimulatedChain>,
		sender: Address,
	}

	fn setup() -> Setup {
		let network = SimulatedNetwork::new();
		let chains = vec![
			network.add_chain("sim://a", CHAIN_A),
			network.add_chain("sim://b", CHAIN_B),
		];
		Setup {
			network,
			chains,
			sender: address_from_key(KEY).unwrap(),
		}
	}

	fn config(verification: bool) -> DeployerConfig {
		let mut config = DeployerConfig::default();
		config.deployment.module_settle_delay_secs = 0;
		config.verification.enabled = verification;
		config.chains.insert(
			CHAIN_B,
			ChainConfig {
				name: Some("b".to_string()),
				rpc_url: Some("sim://b".to_string()),
				fallback_rpc_urls: Vec::new(),
			},
		);
		config
	}

	fn params() -> DeploymentParams {
		DeploymentParams {
			name: "Acme".to_string(),
			symbol: "ACM".to_string(),
			supported_chain_ids: vec![CHAIN_A, CHAIN_B],
			private_key: KEY.to_string(),
			init_code: Bytes::from(vec![0x60, 0x80, 0x60, 0x40, 0x52]),
			create2_salt: Some(B256::repeat_byte(0x01)),
			logo_uri: None,
			etherscan_api_key: None,
			modules_to_deploy: Vec::new(),
			module_init_codes: HashMap::new(),
			primary_constructor_args: None,
			verification: None,
			module_verification: HashMap::new(),
			rpc_urls: HashMap::from([(CHAIN_A, "sim://a".to_string())]),
		}
	}

	fn module_codes() -> HashMap<String, Bytes> {
		DEFAULT_MODULES
			.iter()
			.enumerate()
			.map(|(i, m)| (m.to_string(), Bytes::from(vec![0x60, i as u8 + 1])))
			.collect()
	}

	fn creations(chain: &SimulatedChain, sender: Address) -> Vec<u64> {
		chain
			.sent_by(sender)
			.into_iter()
			.filter(|s| s.tx.is_create())
			.map(|s| s.tx.nonce)
			.collect()
	}

	fn source() -> VerificationSource {
		VerificationSource {
			contract_name: "contracts/DLE.sol:DLE".to_string(),
			compiler_version: "v0.8.24+commit.e11b9ed9".to_string(),
			standard_json_input: serde_json::json!({ "language": "Solidity" }),
		}
	}

	fn deployer(s: &Setup, config: DeployerConfig, verifier: Option<Arc<RecordingVerifier>>) -> Deployer {
		let mut builder = DeployerBuilder::new(config)
			.with_storage(Arc::new(StorageService::in_memory()))
			.with_connector(Arc::new(s.network.clone()));
		if let Some(verifier) = verifier {
			builder = builder.with_verifier(verifier);
		}
		builder.build().unwrap()
	}

	#[tokio::test]
	async fn test_end_to_end_aligns_lagging_chain() {
		let s = setup();
		s.chains[0].advance_nonce(s.sender, 2);
		let deployer = deployer(&s, config(false), None);
		deployer.store_params("dep-1", &params()).await.unwrap();

		let report = deployer.run("dep-1").await.unwrap();

		assert!(report.is_success(), "{:?}", report.error);
		assert_eq!(report.target_nonce, Some(2));
		assert_eq!(report.primary_address, Some(s.sender.create(2)));
		let a = report.primary_result(CHAIN_A).unwrap();
		let b = report.primary_result(CHAIN_B).unwrap();
		assert_eq!(a.fillers_sent, 0);
		assert_eq!(b.fillers_sent, 2);
		assert_eq!(a.address, b.address);
		assert!(report.finished_at.is_some());

		let stored = deployer.report("dep-1").await.unwrap().unwrap();
		assert_eq!(stored.status, RunStatus::Completed);
		assert_eq!(stored.primary_address, report.primary_address);
	}

	#[tokio::test]
	async fn test_modules_and_verification() {
		let s = setup();
		let verifier = Arc::new(RecordingVerifier::default());
		let deployer = deployer(&s, config(true), Some(verifier.clone()));

		let mut params = params();
		params.etherscan_api_key = Some("key".to_string());
		params.verification = Some(source());
		params.primary_constructor_args = Some(Bytes::from(vec![0xaa]));
		params.modules_to_deploy = vec!["treasury".to_string()];
		params.module_init_codes =
			HashMap::from([("treasury".to_string(), Bytes::from(vec![0x60, 0x01]))]);
		params
			.module_verification
			.insert("treasury".to_string(), source());

		let report = deployer.deploy("dep-2", &params).await.unwrap();
		assert!(report.is_success(), "{:?}", report.error);

		let primary = s.sender.create(0);
		let treasury = report.module("treasury").unwrap();
		assert_eq!(treasury.target_nonce, 1);
		assert_eq!(treasury.address, Some(s.sender.create(1)));
		assert!(report.primary.iter().all(|r| r.verification.is_some()));
		assert!(treasury.networks.iter().all(|r| r.verification.is_some()));

		let submitted = verifier.submitted.lock().unwrap().clone();
		assert_eq!(submitted.len(), 4);
		let primary_args: Vec<Bytes> = submitted
			.iter()
			.filter(|(_, address, _)| *address == primary)
			.map(|(_, _, args)| args.clone())
			.collect();
		assert_eq!(primary_args, vec![Bytes::from(vec![0xaa]); 2]);

		let record: Option<VerificationRecord> = deployer
			.storage()
			.retrieve_optional(VERIFICATION_NAMESPACE, &record_key(primary))
			.await
			.unwrap();
		assert_eq!(record.unwrap().chain_ids().len(), 2);

		let refreshed = deployer
			.refresh_verification("dep-2", primary, None)
			.await
			.unwrap();
		assert_eq!(
			refreshed.chain(CHAIN_A).and_then(|c| c.status.clone()),
			Some("Pass - Verified".to_string())
		);
	}

	#[tokio::test]
	async fn test_unreachable_chains_produce_failed_report() {
		let s = setup();
		let deployer = deployer(&s, config(false), None);
		let mut params = params();
		params.supported_chain_ids = vec![999_999];
		params.rpc_urls.clear();

		let report = deployer.deploy("dep-3", &params).await.unwrap();
		assert_eq!(report.status, RunStatus::Failed);
		assert!(report.error.unwrap().contains("No connections"));
		assert_eq!(report.primary.len(), 1);
		assert!(!report.primary[0].success);
		assert!(s.chains.iter().all(|c| c.sent().is_empty()));
	}

	#[tokio::test]
	async fn test_unknown_module_rejected_before_connecting() {
		let s = setup();
		let deployer = deployer(&s, config(false), None);
		let mut params = params();
		params.modules_to_deploy = vec!["bogus".to_string()];

		let err = deployer.deploy("dep-4", &params).await.unwrap_err();
		assert!(matches!(err, DeployError::Configuration(_)));
		assert!(s.chains.iter().all(|c| c.sent().is_empty()));
		assert!(deployer.report("dep-4").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_divergent_addresses_fail_run() {
		let s = setup();
		s.chains[1].override_signer(OTHER_KEY).unwrap();
		let deployer = deployer(&s, config(false), None);
		let mut params = params();
		params.modules_to_deploy = vec!["timelock".to_string()];
		params.module_init_codes = module_codes();

		let report = deployer.deploy("dep-5", &params).await.unwrap();

		let a = report.primary_result(CHAIN_A).unwrap();
		let b = report.primary_result(CHAIN_B).unwrap();
		assert!(a.success && b.success);
		assert_ne!(a.address, b.address);
		assert_eq!(report.status, RunStatus::Failed);
		assert!(report.primary_address.is_none());
		assert!(report.error.as_deref().unwrap().contains("divergence"));
		assert!(report.modules.is_empty());

		let stored = deployer.report("dep-5").await.unwrap().unwrap();
		assert_eq!(stored.status, RunStatus::Failed);
	}

	#[tokio::test]
	async fn test_address_mismatch_skips_module_wave() {
		let s = setup();
		s.chains[0].misreport_contract_address(Address::repeat_byte(0xbb));
		let deployer = deployer(&s, config(false), None);
		let mut params = params();
		params.modules_to_deploy = vec!["timelock".to_string()];
		params.module_init_codes = module_codes();

		let report = deployer.deploy("dep-6", &params).await.unwrap();

		assert_eq!(report.status, RunStatus::Failed);
		let a = report.primary_result(CHAIN_A).unwrap();
		assert!(!a.success);
		assert!(a.error.as_deref().unwrap().contains("Address mismatch"));
		assert!(report.modules.is_empty());
		for chain in &s.chains {
			assert!(creations(chain, s.sender).iter().all(|&nonce| nonce == 0));
		}
	}

	#[tokio::test]
	async fn test_deploy_modules_next_to_existing_contract() {
		let s = setup();
		let deployer = deployer(&s, config(false), None);
		let mut params = params();
		params.module_init_codes = module_codes();
		deployer.store_params("dep-7", &params).await.unwrap();

		let primary = deployer
			.run("dep-7")
			.await
			.unwrap()
			.primary_address
			.unwrap();

		let report = deployer.deploy_modules("dep-7", primary, &[]).await.unwrap();
		assert!(report.is_success(), "{:?}", report.error);
		assert_eq!(report.primary.len(), 2);
		let types: Vec<&str> = report.modules.iter().map(|m| m.module_type.as_str()).collect();
		assert_eq!(types, DEFAULT_MODULES);
		for (offset, module) in report.modules.iter().enumerate() {
			assert_eq!(module.address, Some(s.sender.create(1 + offset as u64)));
		}

		let requested = vec!["reader".to_string()];
		let report = deployer
			.deploy_modules("dep-7", primary, &requested)
			.await
			.unwrap();
		assert!(report.is_success(), "{:?}", report.error);
		assert_eq!(report.modules.len(), 3);
		assert_eq!(report.module("reader").unwrap().target_nonce, 4);

		let stored = deployer.report("dep-7").await.unwrap().unwrap();
		assert_eq!(stored.module("reader").unwrap().address, Some(s.sender.create(4)));
		for chain in &s.chains {
			assert_eq!(creations(chain, s.sender), vec![0, 1, 2, 3, 4]);
		}
	}

	#[tokio::test]
	async fn test_deploy_modules_rejects_unknown_type() {
		let s = setup();
		let deployer = deployer(&s, config(false), None);
		let mut params = params();
		params.module_init_codes = module_codes();
		deployer.store_params("dep-8", &params).await.unwrap();

		let err = deployer
			.deploy_modules("dep-8", Address::repeat_byte(0x01), &["bogus".to_string()])
			.await
			.unwrap_err();
		assert!(err.to_string().contains("Unknown module type: bogus"));
		assert!(s.chains.iter().all(|c| c.sent().is_empty()));
	}

	#[test]
	fn test_predict_addresses() {
		let deployer = Address::repeat_byte(0x11);
		let predicted = predict_addresses(deployer, 5, 3);
		assert_eq!(predicted.len(), 3);
		assert_eq!(predicted[0], (5, deployer.create(5)));
		assert_eq!(predicted[2], (7, deployer.create(7)));
	}
}
