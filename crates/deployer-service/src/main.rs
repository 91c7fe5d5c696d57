use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use deployer_config::ConfigLoader;
use deployer_core::{predict_addresses, DeployerBuilder};
use deployer_types::DeploymentParams;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dle-deployer")]
#[command(about = "Same-address multichain contract deployer", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	#[arg(short, long, value_name = "FILE", default_value = "config/deployer.toml")]
	config: PathBuf,

	#[arg(long, env = "DEPLOYER_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Deploy the contract and its modules on every chain of a deployment
	Deploy {
		#[arg(long)]
		deployment_id: String,
		/// JSON parameters stored under the deployment id before running
		#[arg(long, value_name = "FILE")]
		params: Option<PathBuf>,
	},
	/// Deploy modules next to an already deployed contract
	DeployModules {
		#[arg(long)]
		deployment_id: String,
		/// Address of the deployed primary contract
		#[arg(long)]
		primary: Address,
		/// Module type to deploy; repeatable. Defaults to the stored list,
		/// then to treasury, timelock and reader
		#[arg(long = "module", value_name = "TYPE")]
		modules: Vec<String>,
	},
	/// Resubmit and poll source verification of a deployed contract
	VerifyRefresh {
		#[arg(long)]
		address: Address,
		#[arg(long)]
		deployment_id: String,
		/// Module type of the contract, primary contract when omitted
		#[arg(long)]
		module: Option<String>,
	},
	/// Print the addresses a deployer creates at consecutive nonces
	Predict {
		#[arg(long)]
		deployer: Address,
		#[arg(long)]
		nonce: u64,
		#[arg(long, default_value_t = 1)]
		count: u64,
	},
	/// Validate the configuration file
	Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level)?;

	match &cli.command {
		Commands::Deploy {
			deployment_id,
			params,
		} => deploy(&cli, deployment_id, params.as_ref()).await,
		Commands::DeployModules {
			deployment_id,
			primary,
			modules,
		} => deploy_modules(&cli, deployment_id, *primary, modules).await,
		Commands::VerifyRefresh {
			address,
			deployment_id,
			module,
		} => verify_refresh(&cli, *address, deployment_id, module.as_deref()).await,
		Commands::Predict {
			deployer,
			nonce,
			count,
		} => predict(*deployer, *nonce, *count),
		Commands::Validate => validate_config(&cli).await,
	}
}

async fn deploy(cli: &Cli, deployment_id: &str, params_file: Option<&PathBuf>) -> Result<()> {
	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	let deployer = DeployerBuilder::new(config)
		.build()
		.context("Failed to build deployer")?;

	if let Some(path) = params_file {
		let content = tokio::fs::read_to_string(path)
			.await
			.with_context(|| format!("Failed to read {:?}", path))?;
		let params: DeploymentParams =
			serde_json::from_str(&content).context("Failed to parse deployment parameters")?;
		deployer
			.store_params(deployment_id, &params)
			.await
			.context("Failed to store deployment parameters")?;
		info!("Stored parameters for {}", deployment_id);
	}

	let report = deployer
		.run(deployment_id)
		.await
		.context("Deployment could not start")?;
	println!("{}", serde_json::to_string_pretty(&report)?);

	if !report.is_success() {
		bail!(
			"Deployment {} failed: {}",
			deployment_id,
			report.error.as_deref().unwrap_or("unknown error")
		);
	}
	Ok(())
}

async fn deploy_modules(
	cli: &Cli,
	deployment_id: &str,
	primary: Address,
	modules: &[String],
) -> Result<()> {
	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	let deployer = DeployerBuilder::new(config)
		.build()
		.context("Failed to build deployer")?;
	let report = deployer
		.deploy_modules(deployment_id, primary, modules)
		.await
		.context("Module deployment could not start")?;
	println!("{}", serde_json::to_string_pretty(&report.modules)?);

	if !report.is_success() {
		bail!(
			"Module deployment for {} failed: {}",
			deployment_id,
			report.error.as_deref().unwrap_or("unknown error")
		);
	}
	Ok(())
}

async fn verify_refresh(
	cli: &Cli,
	address: Address,
	deployment_id: &str,
	module: Option<&str>,
) -> Result<()> {
	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	let deployer = DeployerBuilder::new(config)
		.build()
		.context("Failed to build deployer")?;
	let record = deployer
		.refresh_verification(deployment_id, address, module)
		.await
		.context("Verification refresh failed")?;

	println!("{}", serde_json::to_string_pretty(&record)?);
	Ok(())
}

fn predict(deployer: Address, nonce: u64, count: u64) -> Result<()> {
	let predicted: Vec<serde_json::Value> = predict_addresses(deployer, nonce, count)
		.into_iter()
		.map(|(nonce, address)| serde_json::json!({ "nonce": nonce, "address": address }))
		.collect();
	println!("{}", serde_json::to_string_pretty(&predicted)?);
	Ok(())
}

async fn validate_config(cli: &Cli) -> Result<()> {
	info!("Validating configuration file: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Configuration is valid");
	info!("Deployer name: {}", config.deployer.name);

	let mut chain_ids: Vec<_> = config.chains.keys().copied().collect();
	chain_ids.sort_unstable();
	for chain_id in chain_ids {
		let chain = &config.chains[&chain_id];
		info!(
			"  Chain {} ({}): {} fallback endpoint(s)",
			chain_id,
			chain.name.as_deref().unwrap_or("unnamed"),
			chain.fallback_rpc_urls.len()
		);
	}

	let catalogue = config.module_catalogue();
	info!(
		"Modules: {}",
		catalogue.module_types().collect::<Vec<_>>().join(", ")
	);
	info!(
		"Verification: {}",
		if config.verification.enabled {
			"enabled"
		} else {
			"disabled"
		}
	);

	Ok(())
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();

	Ok(())
}
