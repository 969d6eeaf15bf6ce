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

//! Portfolio snapshotting: one `(agent, competition, timestamp, totalValue)`
//! row per cycle. Spot portfolios are valued from the balance journal and
//! oracle prices; perps portfolios from reported account equity.

use crate::{
	providers::{price_key, PriceApi},
	store::{metrics, spot, Database},
	types::{Agent, PortfolioSnapshot},
};
use anyhow::Result;
use arena_primitives::{Chain, WalletAddress};
use chrono::Utc;
use std::{collections::BTreeSet, sync::Arc};

#[derive(Clone)]
pub struct PortfolioSnapshotter {
	db: Database,
	price: Arc<dyn PriceApi>,
}

impl PortfolioSnapshotter {
	pub fn new(db: Database, price: Arc<dyn PriceApi>) -> Self {
		Self { db, price }
	}

	/// Value one spot agent's balances and write a snapshot. Unpriceable
	/// tokens contribute nothing; negative journal balances subtract.
	pub async fn snapshot_spot_agent(
		&self,
		competition_id: &str,
		agent_id: &str,
	) -> Result<PortfolioSnapshot> {
		let balances = self
			.db
			.with_conn::<_, rusqlite::Error, _>(|conn| {
				spot::agent_balances(conn, agent_id, competition_id)
			})
			.await?;

		let tokens: BTreeSet<(WalletAddress, Chain)> =
			balances.iter().map(|(chain, balance)| (balance.address, *chain)).collect();
		let tokens: Vec<(WalletAddress, Chain)> = tokens.into_iter().collect();
		let prices = self.price.get_bulk_prices(&tokens).await?;

		let mut total_value = 0.0;
		for (chain, balance) in &balances {
			let Some(report) = prices.get(&price_key(&balance.address, *chain)) else {
				tracing::debug!(
					"No price for {} on {chain}; excluded from portfolio value",
					balance.address
				);
				continue
			};
			if let Ok(amount) = balance.balance.parse::<f64>() {
				total_value += amount * report.price;
			}
		}

		let snapshot = PortfolioSnapshot {
			agent_id: agent_id.to_owned(),
			competition_id: competition_id.to_owned(),
			timestamp: Utc::now(),
			total_value,
		};
		self.db
			.with_write_tx::<_, rusqlite::Error, _>(|tx| metrics::insert_snapshot(tx, &snapshot))
			.await?;
		Ok(snapshot)
	}

	/// Snapshot every agent; per-agent failures are logged and do not
	/// poison the competition tick.
	pub async fn snapshot_spot_competition(&self, competition_id: &str, agents: &[Agent]) {
		for agent in agents {
			if let Err(error) = self.snapshot_spot_agent(competition_id, &agent.id).await {
				tracing::error!(
					"Portfolio snapshot failed for agent {} in {competition_id}: {error:#}",
					agent.id
				);
			}
		}
	}

	/// Perps snapshots value the account at its reported equity.
	pub async fn snapshot_perps_equity(
		&self,
		competition_id: &str,
		agent_id: &str,
		total_equity: f64,
	) -> Result<PortfolioSnapshot> {
		let snapshot = PortfolioSnapshot {
			agent_id: agent_id.to_owned(),
			competition_id: competition_id.to_owned(),
			timestamp: Utc::now(),
			total_value: if total_equity.is_finite() { total_equity } else { 0.0 },
		};
		self.db
			.with_write_tx::<_, rusqlite::Error, _>(|tx| metrics::insert_snapshot(tx, &snapshot))
			.await?;
		Ok(snapshot)
	}
}
