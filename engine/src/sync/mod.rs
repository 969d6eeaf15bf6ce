// Copyright 2025 Chainflip Labs GmbH
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! The sync pipeline: per-competition orchestrators, per-agent processors,
//! snapshotting, risk metrics and the scheduler.

pub mod perps;
pub mod risk;
pub mod scheduler;
pub mod snapshot;
pub mod spot;

use crate::{
	constants::AGENT_CHUNK_SIZE, providers::classify_upstream_error, types::Agent,
};
use futures::future::join_all;
use std::future::Future;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentSyncReport {
	pub agent_id: String,
	pub trades_recorded: usize,
	pub transfers_recorded: usize,
	pub balances_updated: usize,
	pub positions_synced: usize,
	pub self_funding_violations: usize,
}

impl AgentSyncReport {
	pub fn for_agent(agent_id: &str) -> Self {
		Self { agent_id: agent_id.to_owned(), ..Default::default() }
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFailure {
	pub agent_id: String,
	pub error: String,
}

/// Result of one competition tick. A tick with failures still succeeded;
/// the failures are enumerated for the operator and retried next tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
	pub successful: Vec<AgentSyncReport>,
	pub failed: Vec<AgentFailure>,
}

/// Run `task` over the agents in concurrent chunks of [`AGENT_CHUNK_SIZE`];
/// chunks execute sequentially to cap provider fan-out. A per-agent failure
/// lands in `failed` without cancelling its peers.
pub async fn run_agent_batches<'a, F, Fut>(agents: &'a [Agent], task: F) -> BatchOutcome
where
	F: Fn(&'a Agent) -> Fut,
	Fut: Future<Output = anyhow::Result<AgentSyncReport>>,
{
	let mut outcome = BatchOutcome::default();
	for chunk in agents.chunks(AGENT_CHUNK_SIZE) {
		let results = join_all(chunk.iter().map(&task)).await;
		for (agent, result) in chunk.iter().zip(results) {
			match result {
				Ok(report) => outcome.successful.push(report),
				Err(error) => {
					let classified = classify_upstream_error(error);
					tracing::warn!("Agent {} sync failed: {classified}", agent.id);
					outcome.failed.push(AgentFailure {
						agent_id: agent.id.clone(),
						error: classified.to_string(),
					});
				},
			}
		}
	}
	outcome
}

#[cfg(test)]
mod tests {
	use super::*;
	use anyhow::anyhow;

	fn agents(n: usize) -> Vec<Agent> {
		(0..n)
			.map(|i| Agent { id: format!("a{i}"), owner_user_id: None, wallet: None })
			.collect()
	}

	#[tokio::test]
	async fn failures_do_not_cancel_peers() {
		let agents = agents(25);
		let outcome = run_agent_batches(&agents, |agent| async move {
			if agent.id == "a7" || agent.id == "a19" {
				Err(anyhow!("provider exploded"))
			} else {
				Ok(AgentSyncReport::for_agent(&agent.id))
			}
		})
		.await;

		assert_eq!(outcome.successful.len(), 23);
		assert_eq!(outcome.failed.len(), 2);
		assert!(outcome.failed.iter().any(|failure| failure.agent_id == "a7"));
	}
}
