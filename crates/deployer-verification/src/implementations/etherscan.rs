//! Etherscan multichain (v2) verification client.
//!
//! One endpoint serves every supported chain; the chain is selected with the
//! `chainid` query parameter. Submissions are form-encoded POSTs carrying the
//! Solidity standard-JSON input, status checks are GETs by guid.

use crate::{VerificationError, VerificationInterface, VerificationRequest};
use async_trait::async_trait;
use deployer_types::ChainId;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

pub const ETHERSCAN_V2_ENDPOINT: &str = "https://api.etherscan.io/v2/api";

/// Envelope of every explorer response.
#[derive(Debug, Deserialize)]
struct ExplorerResponse {
	#[serde(default)]
	status: String,
	#[serde(default)]
	message: String,
	#[serde(default)]
	result: serde_json::Value,
}

impl ExplorerResponse {
	fn result_text(&self) -> String {
		match &self.result {
			serde_json::Value::String(s) => s.clone(),
			serde_json::Value::Null => String::new(),
			other => other.to_string(),
		}
	}
}

pub struct EtherscanV2Verifier {
	client: reqwest::Client,
	endpoint: String,
}

impl EtherscanV2Verifier {
	pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, VerificationError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| VerificationError::Http(e.to_string()))?;
		Ok(Self {
			client,
			endpoint: endpoint.into(),
		})
	}

	async fn decode(response: reqwest::Response) -> Result<ExplorerResponse, VerificationError> {
		let status = response.status();
		if !status.is_success() {
			return Err(VerificationError::Http(format!("Explorer returned {}", status)));
		}
		response
			.json::<ExplorerResponse>()
			.await
			.map_err(|e| VerificationError::InvalidResponse(e.to_string()))
	}
}

#[async_trait]
impl VerificationInterface for EtherscanV2Verifier {
	async fn submit(&self, request: &VerificationRequest) -> Result<String, VerificationError> {
		request.validate()?;

		let source_code = match &request.standard_json_input {
			serde_json::Value::String(s) => s.clone(),
			other => other.to_string(),
		};
		let contract_address = format!("{:#x}", request.address);
		let mut form = vec![
			("module", "contract".to_string()),
			("action", "verifysourcecode".to_string()),
			("apikey", request.api_key.clone()),
			("codeformat", "solidity-standard-json-input".to_string()),
			("sourceCode", source_code),
			("contractaddress", contract_address),
			("contractname", request.contract_name.clone()),
			("compilerversion", request.compiler_version.clone()),
		];
		if !request.constructor_args.is_empty() {
			form.push(("constructorArguments", request.constructor_args_hex()));
		}

		let response = self
			.client
			.post(&self.endpoint)
			.query(&[("chainid", request.chain_id.to_string())])
			.form(&form)
			.send()
			.await
			.map_err(|e| VerificationError::Http(e.to_string()))?;
		let body = Self::decode(response).await?;
		debug!(
			chain_id = request.chain_id,
			status = %body.status,
			message = %body.message,
			"verifysourcecode response"
		);

		let result = body.result_text();
		if body.status == "1" && !result.is_empty() {
			info!(chain_id = request.chain_id, guid = %result, "Verification accepted");
			return Ok(result);
		}

		let reason = if result.is_empty() { body.message } else { result };
		Err(VerificationError::Rejected(reason))
	}

	async fn check_status(
		&self,
		chain_id: ChainId,
		guid: &str,
		api_key: &str,
	) -> Result<String, VerificationError> {
		if api_key.trim().is_empty() {
			return Err(VerificationError::MissingField("api_key"));
		}

		let chain_id = chain_id.to_string();
		let response = self
			.client
			.get(&self.endpoint)
			.query(&[
				("chainid", chain_id.as_str()),
				("module", "contract"),
				("action", "checkverifystatus"),
				("guid", guid),
				("apikey", api_key),
			])
			.send()
			.await
			.map_err(|e| VerificationError::Http(e.to_string()))?;
		let body = Self::decode(response).await?;
		debug!(chain_id = %chain_id, status = %body.status, "checkverifystatus response");

		let result = body.result_text();
		Ok(if result.is_empty() { body.message } else { result })
	}
}
