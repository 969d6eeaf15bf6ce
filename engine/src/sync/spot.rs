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

//! Spot live-trading sync: the per-competition orchestrator and the
//! per-agent processor.
//!
//! Processing order per agent: balance bootstrap (first tick only), then per
//! chain trades, then transfers. Journal writes and the cursor that covers
//! them commit in one transaction per chain, so a persisted trade is always
//! behind an advanced cursor. A chain that fails leaves its cursors alone
//! and the next tick resumes from the retry overlap.

use crate::{
	constants::{BLOCK_CURSOR_RETRY_OVERLAP, TRANSFER_SYMBOL_MAX_LEN, UNKNOWN_TOKEN_SYMBOL},
	providers::{
		price_key, PriceApi, RpcDirectProvider, SpotProviderApi,
	},
	sanctions::SanctionsGate,
	store::{metrics, registry, spot, Database},
	sync::{
		risk::RiskMetricsService, run_agent_batches, snapshot::PortfolioSnapshotter,
		AgentFailure, AgentSyncReport, BatchOutcome,
	},
	types::{
		Agent, AgentCompetitionStatus, Competition, CompetitionConfig, CompetitionKind,
		DataSource, SpotTransfer, SyncAnchor, TokenBalance, TransferKind,
	},
};
use anyhow::{anyhow, bail, Context, Result};
use arena_primitives::{Chain, WalletAddress, NATIVE_TOKEN_ADDRESS};
use async_trait::async_trait;
use chrono::Utc;
use itertools::Itertools;
use std::{collections::HashMap, sync::Arc};

/// Strategy for building a spot provider from a competition's data-source
/// configuration.
#[async_trait]
pub trait SpotProviderFactory: Send + Sync + 'static {
	async fn build(&self, config: &CompetitionConfig) -> Result<Arc<dyn SpotProviderApi>>;
}

pub struct RpcProviderFactory {
	pub chain_endpoints: HashMap<Chain, String>,
	pub price: Arc<dyn PriceApi>,
}

#[async_trait]
impl SpotProviderFactory for RpcProviderFactory {
	async fn build(&self, config: &CompetitionConfig) -> Result<Arc<dyn SpotProviderApi>> {
		match config.data_source {
			DataSource::RpcDirect => Ok(Arc::new(
				RpcDirectProvider::connect(
					&self.chain_endpoints,
					&config.enabled_chains,
					config.allowed_protocols.clone(),
					self.price.clone(),
				)
				.await?,
			)),
			DataSource::ExternalApi =>
				Err(anyhow!("no spot adapter registered for the external_api data source")),
		}
	}
}

#[derive(Clone)]
pub struct SpotSyncService {
	db: Database,
	price: Arc<dyn PriceApi>,
	factory: Arc<dyn SpotProviderFactory>,
	sanctions: SanctionsGate,
	snapshotter: PortfolioSnapshotter,
	risk: RiskMetricsService,
}

impl SpotSyncService {
	pub fn new(
		db: Database,
		price: Arc<dyn PriceApi>,
		factory: Arc<dyn SpotProviderFactory>,
	) -> Self {
		let sanctions = SanctionsGate::new(db.clone());
		let snapshotter = PortfolioSnapshotter::new(db.clone(), price.clone());
		let risk = RiskMetricsService::new(db.clone());
		Self { db, price, factory, sanctions, snapshotter, risk }
	}

	/// One competition tick. Soft failures (unknown competition, wrong
	/// type, not started, missing config) log and return an empty outcome;
	/// per-agent failures are enumerated in the result.
	pub async fn process_spot_live_competition(
		&self,
		competition_id: &str,
		skip_monitoring: bool,
	) -> Result<BatchOutcome> {
		let run_started = Utc::now();

		let Some(competition) = self
			.db
			.with_conn::<_, rusqlite::Error, _>(|conn| {
				registry::get_competition(conn, competition_id)
			})
			.await?
		else {
			tracing::error!("Spot sync requested for unknown competition {competition_id}");
			return Ok(BatchOutcome::default());
		};
		if competition.kind != CompetitionKind::SpotLiveTrading {
			tracing::error!(
				"Competition {competition_id} is {} , not spot_live_trading",
				competition.kind.as_str()
			);
			return Ok(BatchOutcome::default());
		}
		if !competition.has_started(run_started) {
			tracing::info!("Competition {competition_id} has not started; skipping sync");
			return Ok(BatchOutcome::default());
		}
		let Some(config) = self
			.db
			.with_conn::<_, rusqlite::Error, _>(|conn| registry::get_config(conn, competition_id))
			.await?
		else {
			tracing::error!("Competition {competition_id} has no sync configuration");
			return Ok(BatchOutcome::default());
		};

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

		let provider = match self.factory.build(&config).await {
			Ok(provider) => provider,
			Err(error) => {
				tracing::error!(
					"Could not build spot provider for {competition_id}: {error:#}"
				);
				return Ok(BatchOutcome {
					successful: Vec::new(),
					failed: eligible
						.into_iter()
						.map(|agent| AgentFailure {
							agent_id: agent.id,
							error: format!("{error:#}"),
						})
						.collect(),
				});
			},
		};

		let outcome = run_agent_batches(&eligible, |agent| {
			process_agent_data(
				&self.db,
				provider.as_ref(),
				self.price.as_ref(),
				&competition,
				&config,
				agent,
			)
		})
		.await;

		self.snapshotter.snapshot_spot_competition(competition_id, &eligible).await;

		for report in &outcome.successful {
			if let Err(error) = self.risk.update_all(&report.agent_id, competition_id).await {
				tracing::error!(
					"Risk metrics update failed for agent {} in {competition_id}: {error:#}",
					report.agent_id
				);
			}
		}

		if let Some(threshold) = config.min_funding_threshold {
			if !skip_monitoring {
				self.enforce_late_threshold(competition_id, &eligible, threshold, run_started)
					.await;
			}
		}

		if !skip_monitoring && config.inactivity_hours > 0 {
			match self
				.inactive_agents(&competition, &eligible, config.inactivity_hours)
				.await
			{
				Ok(inactive) =>
					for agent_id in inactive {
						tracing::warn!(
							monitor = "inactivity",
							"Agent {agent_id} in {competition_id} has no trades within \
							 the last {} hours",
							config.inactivity_hours
						);
					},
				Err(error) => {
					tracing::error!(
						"Inactivity check failed for {competition_id}: {error:#}"
					);
				},
			}
		}

		Ok(outcome)
	}

	/// Agents with no recorded trade inside the inactivity window. Only
	/// meaningful once the competition has been running longer than the
	/// window itself; flagged agents are surfaced to monitoring, never
	/// disqualified here.
	pub async fn inactive_agents(
		&self,
		competition: &Competition,
		agents: &[Agent],
		inactivity_hours: u32,
	) -> Result<Vec<String>> {
		let cutoff = Utc::now() - chrono::Duration::hours(inactivity_hours as i64);
		if competition.start_date.is_none_or(|start| start > cutoff) {
			return Ok(Vec::new());
		}

		let mut inactive = Vec::new();
		for agent in agents {
			let agent_id = agent.id.clone();
			let competition_id = competition.id.clone();
			let latest = self
				.db
				.with_conn::<_, rusqlite::Error, _>(move |conn| {
					spot::latest_trade_activity(conn, &agent_id, &competition_id)
				})
				.await?;
			if latest.is_none_or(|latest| latest < cutoff) {
				inactive.push(agent.id.clone());
			}
		}
		Ok(inactive)
	}

	/// Disqualify agents whose very first portfolio snapshot came in below
	/// the funding threshold. Runs only after the initial sync
	/// (`skip_monitoring = false`); failures are isolated per agent.
	async fn enforce_late_threshold(
		&self,
		competition_id: &str,
		agents: &[Agent],
		threshold: f64,
		run_started: chrono::DateTime<Utc>,
	) {
		for agent in agents {
			let agent_id = agent.id.clone();
			let result: Result<()> = self
				.db
				.with_write_tx::<_, rusqlite::Error, _>(move |tx| {
					if metrics::snapshot_count_before(tx, &agent_id, competition_id, run_started)? >
						0
					{
						return Ok(());
					}
					let Some(snapshot) = metrics::latest_snapshot(tx, &agent_id, competition_id)?
					else {
						return Ok(())
					};
					if snapshot.total_value < threshold {
						registry::set_agent_status(
							tx,
							competition_id,
							&agent_id,
							AgentCompetitionStatus::Disqualified,
							Some(&format!(
								"initial portfolio value {:.2} below minimum funding threshold {threshold:.2}",
								snapshot.total_value
							)),
						)?;
						tracing::warn!(
							"Agent {agent_id} disqualified from {competition_id}: first snapshot {:.2} < {threshold:.2}",
							snapshot.total_value
						);
					}
					Ok(())
				})
				.await
				.map_err(Into::into);
			if let Err(error) = result {
				tracing::error!(
					"Late threshold enforcement failed for agent {} in {competition_id}: {error:#}",
					agent.id
				);
			}
		}
	}
}

/// Per-agent processing: balance bootstrap, then per-chain trades and
/// transfers. Partial progress on healthy chains commits even when another
/// chain fails.
pub async fn process_agent_data(
	db: &Database,
	provider: &dyn SpotProviderApi,
	price: &dyn PriceApi,
	competition: &Competition,
	config: &CompetitionConfig,
	agent: &Agent,
) -> Result<AgentSyncReport> {
	let wallet = agent.wallet.ok_or_else(|| anyhow!("agent {} has no wallet", agent.id))?;
	let mut report = AgentSyncReport::for_agent(&agent.id);

	let has_balances = db
		.with_conn::<_, rusqlite::Error, _>(|conn| {
			spot::has_any_balances(conn, &agent.id, &competition.id)
		})
		.await?;
	if !has_balances {
		return bootstrap_balances(db, provider, competition, config, agent, &wallet, report)
			.await;
	}

	let mut chain_errors: Vec<String> = Vec::new();
	for chain in &config.enabled_chains {
		if let Err(error) =
			sync_chain_trades(db, provider, price, competition, config, agent, &wallet, *chain, &mut report)
				.await
		{
			tracing::warn!(
				"Trade sync failed for agent {} on {chain}: {error:#}",
				agent.id
			);
			chain_errors.push(format!("{chain} trades: {error:#}"));
			// The transfer cursor is independent; keep going.
		}
		if let Err(error) = sync_chain_transfers(
			db, provider, price, competition, config, agent, &wallet, *chain, &mut report,
		)
		.await
		{
			tracing::warn!(
				"Transfer sync failed for agent {} on {chain}: {error:#}",
				agent.id
			);
			chain_errors.push(format!("{chain} transfers: {error:#}"));
		}
	}

	if !chain_errors.is_empty() {
		bail!("agent {} sync incomplete: {}", agent.id, chain_errors.join("; "));
	}
	Ok(report)
}

/// First tick for an agent: capture a balance baseline and skip the trade
/// phase. An RPC failure here returns cleanly without advancing any state,
/// so the next tick retries the bootstrap.
async fn bootstrap_balances(
	db: &Database,
	provider: &dyn SpotProviderApi,
	competition: &Competition,
	config: &CompetitionConfig,
	agent: &Agent,
	wallet: &WalletAddress,
	mut report: AgentSyncReport,
) -> Result<AgentSyncReport> {
	let mut per_chain: Vec<(Chain, Vec<TokenBalance>)> = Vec::new();
	for chain in &config.enabled_chains {
		let mut balances = match provider.get_token_balances(wallet, *chain).await {
			Ok(balances) => balances,
			Err(error) => {
				tracing::warn!(
					"Balance bootstrap failed for agent {} on {chain}: {error:#}; will retry next tick",
					agent.id
				);
				return Ok(report);
			},
		};
		match provider.get_native_balance(wallet, *chain).await {
			Ok(native) if native != "0" => {
				balances.push(TokenBalance { address: NATIVE_TOKEN_ADDRESS, balance: native });
			},
			Ok(_) => {},
			Err(error) => {
				tracing::warn!(
					"Native balance bootstrap failed for agent {} on {chain}: {error:#}; will retry next tick",
					agent.id
				);
				return Ok(report);
			},
		}
		per_chain.push((*chain, balances));
	}

	let competition_id = competition.id.clone();
	let agent_id = agent.id.clone();
	let count: usize = per_chain.iter().map(|(_, balances)| balances.len()).sum();
	db.with_write_tx::<_, rusqlite::Error, _>(move |tx| {
		for (chain, balances) in &per_chain {
			spot::replace_balances(tx, &agent_id, &competition_id, *chain, balances, Utc::now())?;
		}
		Ok(())
	})
	.await?;
	report.balances_updated = count;
	Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn sync_chain_trades(
	db: &Database,
	provider: &dyn SpotProviderApi,
	price: &dyn PriceApi,
	competition: &Competition,
	config: &CompetitionConfig,
	agent: &Agent,
	wallet: &WalletAddress,
	chain: Chain,
	report: &mut AgentSyncReport,
) -> Result<()> {
	let state = db
		.with_conn::<_, rusqlite::Error, _>(|conn| {
			spot::get_sync_state(conn, &agent.id, &competition.id, chain.as_str())
		})
		.await?;

	let anchor = match state.and_then(|state| state.last_trade_block) {
		Some(last_block) =>
			SyncAnchor::Block(last_block.saturating_sub(BLOCK_CURSOR_RETRY_OVERLAP)),
		None => SyncAnchor::Timestamp(
			competition
				.start_date
				.context("competition without start date cannot sync trades")?,
		),
	};
	let head = provider.get_current_block(chain).await?;
	let result = provider.get_trades_since(wallet, anchor, &[chain], Some(head)).await?;

	// Token whitelist. The native sentinel is always admissible.
	let allowlist = config.allowlist_for(chain);
	let (kept, dropped): (Vec<_>, Vec<_>) = result.trades.into_iter().partition(|trade| {
		allowlist.is_none_or(|set| {
			(trade.from_token.is_native_sentinel() || set.contains(&trade.from_token)) &&
				(trade.to_token.is_native_sentinel() || set.contains(&trade.to_token))
		})
	});
	for trade in &dropped {
		tracing::warn!(
			policy = "token_not_allowlisted",
			"Dropping trade {} on {chain}: token outside the allowlist",
			trade.tx_hash
		);
	}

	// Bulk-price every appearing token; a trade with an unpriceable leg is
	// dropped loudly. No trade persists without both legs valued.
	let tokens: Vec<(WalletAddress, Chain)> = kept
		.iter()
		.flat_map(|trade| [(trade.from_token, chain), (trade.to_token, chain)])
		.unique()
		.collect();
	let prices = price.get_bulk_prices(&tokens).await?;

	let mut priced = Vec::with_capacity(kept.len());
	for trade in kept {
		let from_report = prices.get(&price_key(&trade.from_token, chain));
		let to_report = prices.get(&price_key(&trade.to_token, chain));
		match (from_report, to_report) {
			(Some(from_report), Some(to_report)) => {
				let from_amount: f64 = trade.from_amount.parse().unwrap_or(0.0);
				let to_amount: f64 = trade.to_amount.parse().unwrap_or(0.0);
				priced.push(spot::PricedTrade {
					from_amount_usd: from_amount * from_report.price,
					to_amount_usd: to_amount * to_report.price,
					trade,
				});
			},
			_ => {
				tracing::error!(
					critical = true,
					"Trade {} on {chain} has an unpriceable leg ({} -> {}); dropped",
					trade.tx_hash,
					trade.from_token,
					trade.to_token
				);
			},
		}
	}

	let competition_id = competition.id.clone();
	let agent_id = agent.id.clone();
	let inserted = db
		.with_write_tx::<_, rusqlite::Error, _>(move |tx| {
			let inserted =
				spot::record_trades(tx, &competition_id, &agent_id, &priced, Utc::now())?;
			spot::advance_trade_cursor(tx, &agent_id, &competition_id, chain.as_str(), head)?;
			Ok(inserted)
		})
		.await?;
	report.trades_recorded += inserted;
	Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn sync_chain_transfers(
	db: &Database,
	provider: &dyn SpotProviderApi,
	price: &dyn PriceApi,
	competition: &Competition,
	config: &CompetitionConfig,
	agent: &Agent,
	wallet: &WalletAddress,
	chain: Chain,
	report: &mut AgentSyncReport,
) -> Result<()> {
	let state = db
		.with_conn::<_, rusqlite::Error, _>(|conn| {
			spot::get_sync_state(conn, &agent.id, &competition.id, chain.as_str())
		})
		.await?;

	let anchor = match state.and_then(|state| state.last_transfer_block) {
		Some(last_block) => SyncAnchor::Block(last_block + 1),
		None => SyncAnchor::Timestamp(
			competition
				.start_date
				.context("competition without start date cannot sync transfers")?,
		),
	};
	let head = provider.get_current_block(chain).await?;
	let events = provider.get_transfer_history(wallet, anchor, &[chain], Some(head)).await?;

	let allowlist = config.allowlist_for(chain);
	let events: Vec<_> = events
		.into_iter()
		.filter(|event| {
			allowlist.is_none_or(|set| {
				event.token.is_native_sentinel() || set.contains(&event.token)
			})
		})
		.collect();

	let tokens: Vec<(WalletAddress, Chain)> =
		events.iter().map(|event| (event.token, chain)).unique().collect();
	let prices = price.get_bulk_prices(&tokens).await.unwrap_or_else(|error| {
		tracing::warn!("Bulk pricing failed for transfers on {chain}: {error:#}");
		HashMap::new()
	});

	let mut enriched = Vec::with_capacity(events.len());
	let mut violations = 0usize;
	for event in events {
		let transfer = match prices.get(&price_key(&event.token, chain)) {
			Some(price_report) => {
				let mut symbol = price_report.symbol.clone();
				// Some oracles hand back the token address where a symbol
				// belongs; resolve the real symbol on chain.
				if WalletAddress::is_address_shaped(&symbol) {
					if let Ok(Some(real)) = provider.get_token_symbol(&event.token, chain).await
					{
						symbol = real;
					}
				}
				let symbol: String = symbol.chars().take(TRANSFER_SYMBOL_MAX_LEN).collect();
				let amount_usd =
					event.amount.parse::<f64>().ok().map(|amount| amount * price_report.price);
				SpotTransfer { event, symbol, amount_usd }
			},
			// Transfers are still recorded for audit when unpriceable.
			None => SpotTransfer {
				event,
				symbol: UNKNOWN_TOKEN_SYMBOL.to_owned(),
				amount_usd: None,
			},
		};
		if transfer.event.kind == TransferKind::Deposit &&
			config.self_funding_threshold_usd > 0.0 &&
			transfer
				.amount_usd
				.is_some_and(|amount_usd| amount_usd > config.self_funding_threshold_usd)
		{
			violations += 1;
		}
		enriched.push(transfer);
	}

	let competition_id = competition.id.clone();
	let agent_id = agent.id.clone();
	let inserted = db
		.with_write_tx::<_, rusqlite::Error, _>(move |tx| {
			let inserted = spot::record_transfers(tx, &competition_id, &agent_id, &enriched)?;
			spot::advance_transfer_cursor(tx, &agent_id, &competition_id, chain.as_str(), head)?;
			Ok(inserted)
		})
		.await?;
	report.transfers_recorded += inserted;
	report.self_funding_violations += violations;
	Ok(())
}
