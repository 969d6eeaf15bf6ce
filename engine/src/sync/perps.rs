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

//! Perps sync: per-agent summary and position reconciliation, including
//! recovery of positions that opened and closed entirely between two sync
//! cycles via the provider's fill history.

use crate::{
	providers::{ClosedPositionFill, PerpsApi, PriceApi},
	sanctions::SanctionsGate,
	store::{perps as perps_store, registry, spot, Database},
	sync::{
		risk::RiskMetricsService, run_agent_batches, snapshot::PortfolioSnapshotter,
		AgentSyncReport, BatchOutcome,
	},
	types::{Agent, Competition, CompetitionKind, PerpsPosition, PositionStatus},
};
use anyhow::{anyhow, Result};
use arena_primitives::WalletAddress;
use chrono::Utc;
use std::sync::Arc;

/// Sync-state rows for perps use a fixed pseudo-chain key; there is no
/// per-chain cursor to track, only the last successful sync time.
const PERPS_CHAIN_KEY: &str = "perps";

/// A closed fill becomes a closed position: the fill id stands in for the
/// provider position id and the close price for the current price. The
/// entry price was never observed.
pub fn position_from_fill(fill: ClosedPositionFill) -> PerpsPosition {
	PerpsPosition {
		provider_position_id: fill.fill_id,
		asset: fill.asset,
		is_long: fill.side == "long",
		size: fill.size,
		entry_price: None,
		current_price: Some(fill.close_price),
		pnl: fill.closed_pnl,
		status: PositionStatus::Closed,
		created_at: fill.closed_at,
		last_updated_at: fill.closed_at,
	}
}

#[derive(Clone)]
pub struct PerpsSyncService {
	db: Database,
	client: Arc<dyn PerpsApi>,
	sanctions: SanctionsGate,
	snapshotter: PortfolioSnapshotter,
	risk: RiskMetricsService,
}

impl PerpsSyncService {
	pub fn new(db: Database, client: Arc<dyn PerpsApi>, price: Arc<dyn PriceApi>) -> Self {
		let sanctions = SanctionsGate::new(db.clone());
		let snapshotter = PortfolioSnapshotter::new(db.clone(), price);
		let risk = RiskMetricsService::new(db.clone());
		Self { db, client, sanctions, snapshotter, risk }
	}

	pub async fn process_perps_competition(&self, competition_id: &str) -> Result<BatchOutcome> {
		let now = Utc::now();
		let Some(competition) = self
			.db
			.with_conn::<_, rusqlite::Error, _>(|conn| {
				registry::get_competition(conn, competition_id)
			})
			.await?
		else {
			tracing::error!("Perps sync requested for unknown competition {competition_id}");
			return Ok(BatchOutcome::default());
		};
		if competition.kind != CompetitionKind::PerpetualFutures {
			tracing::error!(
				"Competition {competition_id} is {}, not perpetual_futures",
				competition.kind.as_str()
			);
			return Ok(BatchOutcome::default());
		}
		if !competition.has_started(now) {
			tracing::info!("Competition {competition_id} has not started; skipping sync");
			return Ok(BatchOutcome::default());
		}

		let agents = self
			.db
			.with_conn::<_, rusqlite::Error, _>(|conn| {
				registry::active_agents(conn, competition_id)
			})
			.await?;
		let mut eligible = Vec::with_capacity(agents.len());
		for agent in agents {
			let Some(wallet) = agent.wallet else {
				tracing::warn!("Agent {} has no wallet address; skipping", agent.id);
				continue
			};
			if self.sanctions.is_sanctioned(&wallet).await? {
				tracing::warn!(
					policy = "sanctioned_wallet",
					"Agent {} wallet {wallet} is sanctioned; rejected from sync",
					agent.id
				);
				continue
			}
			eligible.push(agent);
		}

		let outcome =
			run_agent_batches(&eligible, |agent| self.process_agent(&competition, agent)).await;

		for report in &outcome.successful {
			if let Err(error) = self.risk.update_all(&report.agent_id, competition_id).await {
				tracing::error!(
					"Risk metrics update failed for agent {} in {competition_id}: {error:#}",
					report.agent_id
				);
			}
		}

		Ok(outcome)
	}

	async fn process_agent(
		&self,
		competition: &Competition,
		agent: &Agent,
	) -> Result<AgentSyncReport> {
		let wallet = agent.wallet.ok_or_else(|| anyhow!("agent {} has no wallet", agent.id))?;
		let mut report = AgentSyncReport::for_agent(&agent.id);

		let summary = self.client.get_account_summary(&wallet).await?;
		let mut positions = self.client.get_positions(&wallet).await?;
		positions.extend(self.recover_closed_fills(competition, agent, &wallet).await?);

		let now = Utc::now();
		let competition_id = competition.id.clone();
		let agent_id = agent.id.clone();
		let position_count = positions.len();
		{
			let summary = summary.clone();
			self.db
				.with_write_tx::<_, rusqlite::Error, _>(move |tx| {
					perps_store::submit_agent_sync(
						tx,
						&competition_id,
						&agent_id,
						&positions,
						&summary,
					)?;
					spot::touch_last_sync(tx, &agent_id, &competition_id, PERPS_CHAIN_KEY, now)
				})
				.await?;
		}

		// Snapshot at reported equity; the adapter already collapsed
		// degenerate values to "0".
		let equity = summary.total_equity.parse::<f64>().unwrap_or(0.0);
		self.snapshotter.snapshot_perps_equity(&competition.id, &agent.id, equity).await?;

		report.positions_synced = position_count;
		Ok(report)
	}

	/// Positions that opened and closed since the last cycle never show up
	/// in the open-position listing; pull them out of fill history instead.
	async fn recover_closed_fills(
		&self,
		competition: &Competition,
		agent: &Agent,
		wallet: &WalletAddress,
	) -> Result<Vec<PerpsPosition>> {
		if !self.client.supports_closed_fills() {
			return Ok(Vec::new());
		}
		let Some(start) = competition.start_date else { return Ok(Vec::new()) };

		let agent_id = agent.id.clone();
		let competition_id = competition.id.clone();
		let state = self
			.db
			.with_conn::<_, rusqlite::Error, _>(move |conn| {
				spot::get_sync_state(conn, &agent_id, &competition_id, PERPS_CHAIN_KEY)
			})
			.await?;
		let since = state
			.and_then(|state| state.last_sync_at)
			.map_or(start, |last_sync| last_sync.max(start));

		let fills =
			self.client.get_closed_position_fills(wallet, since, Utc::now()).await?;
		Ok(fills.into_iter().map(position_from_fill).collect())
	}
}
