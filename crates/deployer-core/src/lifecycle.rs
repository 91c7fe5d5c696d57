use crate::error::DeployError;
use deployer_types::{ChainDeployState, ChainId};
use tracing::debug;

/// Tracks one chain through one deployment, rejecting invalid transitions.
#[derive(Debug, Clone)]
pub struct ChainLifecycle {
	chain_id: ChainId,
	label: String,
	state: ChainDeployState,
}

impl ChainLifecycle {
	pub fn new(chain_id: ChainId, label: impl Into<String>) -> Self {
		Self {
			chain_id,
			label: label.into(),
			state: ChainDeployState::Init,
		}
	}

	pub fn state(&self) -> ChainDeployState {
		self.state
	}

	pub fn chain_id(&self) -> ChainId {
		self.chain_id
	}

	pub fn set_state(&mut self, new_state: ChainDeployState) -> Result<(), DeployError> {
		let old_state = self.state;

		if !old_state.can_transition_to(new_state) {
			return Err(DeployError::Lifecycle {
				chain_id: self.chain_id,
				from: old_state,
				to: new_state,
			});
		}

		self.state = new_state;
		debug!(
			chain_id = self.chain_id,
			contract = %self.label,
			"Chain state changed: {} -> {}",
			old_state,
			new_state
		);

		Ok(())
	}

	/// Moves to `Failed` unless already terminal.
	pub fn fail(&mut self) {
		if !self.state.is_terminal() {
			self.state = ChainDeployState::Failed;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_happy_path() {
		let mut lifecycle = ChainLifecycle::new(1, "DLE");
		lifecycle.set_state(ChainDeployState::NonceRead).unwrap();
		lifecycle.set_state(ChainDeployState::Aligning).unwrap();
		lifecycle.set_state(ChainDeployState::Aligned).unwrap();
		lifecycle
			.set_state(ChainDeployState::DeploySubmitted)
			.unwrap();
		lifecycle.set_state(ChainDeployState::Confirmed).unwrap();
		assert_eq!(lifecycle.state(), ChainDeployState::Confirmed);
	}

	#[test]
	fn test_rejects_skipping_alignment() {
		let mut lifecycle = ChainLifecycle::new(1, "DLE");
		lifecycle.set_state(ChainDeployState::NonceRead).unwrap();
		let err = lifecycle
			.set_state(ChainDeployState::DeploySubmitted)
			.unwrap_err();
		assert!(matches!(err, DeployError::Lifecycle { chain_id: 1, .. }));
		assert_eq!(lifecycle.state(), ChainDeployState::NonceRead);
	}

	#[test]
	fn test_fail_keeps_terminal_state() {
		let mut lifecycle = ChainLifecycle::new(1, "DLE");
		lifecycle.fail();
		assert_eq!(lifecycle.state(), ChainDeployState::Failed);

		let mut done = ChainLifecycle::new(2, "DLE");
		done.set_state(ChainDeployState::NonceRead).unwrap();
		done.set_state(ChainDeployState::Aligned).unwrap();
		done.set_state(ChainDeployState::Confirmed).unwrap();
		done.fail();
		assert_eq!(done.state(), ChainDeployState::Confirmed);
	}
}
