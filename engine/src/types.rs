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

//! Domain entities shared between the store, the providers and the sync
//! processors. Monetary quantities are canonical decimal strings (scaled by
//! token decimals); USD valuations are `f64`.

use arena_primitives::{Chain, WalletAddress};
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionKind {
	SpotLiveTrading,
	PerpetualFutures,
}

impl CompetitionKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			CompetitionKind::SpotLiveTrading => "spot_live_trading",
			CompetitionKind::PerpetualFutures => "perpetual_futures",
		}
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionStatus {
	Pending,
	Active,
	Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Competition {
	pub id: String,
	pub name: String,
	pub kind: CompetitionKind,
	pub status: CompetitionStatus,
	pub start_date: Option<DateTime<Utc>>,
	pub end_date: Option<DateTime<Utc>>,
	/// Window during which stake-derived and no-stake boosts accrue.
	pub boost_start: Option<DateTime<Utc>>,
	pub boost_end: Option<DateTime<Utc>>,
}

impl Competition {
	pub fn has_started(&self, now: DateTime<Utc>) -> bool {
		self.start_date.is_some_and(|start| start <= now)
	}

	pub fn boost_window_open(&self, now: DateTime<Utc>) -> bool {
		match (self.boost_start, self.boost_end) {
			(Some(start), Some(end)) => start <= now && now < end,
			_ => false,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
	pub id: String,
	pub owner_user_id: Option<String>,
	pub wallet: Option<WalletAddress>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCompetitionStatus {
	Active,
	Disqualified,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
	RpcDirect,
	ExternalApi,
}

/// One accepted swap venue: a swap is attributed to `protocol` when its
/// receipt contains a log from `router_address` or a log whose topic0 equals
/// `swap_event_signature`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowedProtocol {
	pub protocol: String,
	pub chain: Chain,
	#[serde(default)]
	pub router_address: Option<WalletAddress>,
	#[serde(default)]
	pub swap_event_signature: Option<String>,
	#[serde(default)]
	pub factory_address: Option<WalletAddress>,
}

fn default_sync_interval_minutes() -> u64 {
	5
}

/// Per-competition sync configuration, persisted as a JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitionConfig {
	pub data_source: DataSource,
	pub enabled_chains: Vec<Chain>,
	#[serde(default)]
	pub allowed_protocols: Vec<AllowedProtocol>,
	#[serde(default)]
	pub allowed_token_addresses: HashMap<Chain, BTreeSet<WalletAddress>>,
	#[serde(default)]
	pub whitelist_enabled: bool,
	#[serde(default)]
	pub self_funding_threshold_usd: f64,
	#[serde(default)]
	pub min_funding_threshold: Option<f64>,
	#[serde(default)]
	pub inactivity_hours: u32,
	#[serde(default = "default_sync_interval_minutes")]
	pub sync_interval_minutes: u64,
	#[serde(default)]
	pub boost: BoostConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoostConfig {
	#[serde(default)]
	pub no_stake_boost_amount: u64,
}

impl CompetitionConfig {
	/// Tokens allowed on `chain`, or `None` when the whitelist is disabled
	/// or the chain has no configured set.
	pub fn allowlist_for(&self, chain: Chain) -> Option<&BTreeSet<WalletAddress>> {
		if !self.whitelist_enabled {
			return None;
		}
		self.allowed_token_addresses.get(&chain)
	}
}

/// A reconstructed DEX swap, as returned by the provider layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
	pub chain: Chain,
	pub tx_hash: String,
	pub log_index: u64,
	pub block_number: u64,
	pub timestamp: DateTime<Utc>,
	pub from_token: WalletAddress,
	pub to_token: WalletAddress,
	pub from_amount: String,
	pub to_amount: String,
	pub protocol: Option<String>,
	pub gas_used: Option<String>,
	pub gas_price: Option<String>,
	pub gas_cost_usd: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradesResult {
	pub trades: Vec<Trade>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
	Deposit,
	Withdraw,
	Transfer,
}

impl TransferKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			TransferKind::Deposit => "deposit",
			TransferKind::Withdraw => "withdraw",
			TransferKind::Transfer => "transfer",
		}
	}
}

/// A raw deposit/withdraw event from the provider, before enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
	pub chain: Chain,
	pub kind: TransferKind,
	pub tx_hash: String,
	pub log_index: u64,
	pub block_number: u64,
	pub timestamp: DateTime<Utc>,
	pub token: WalletAddress,
	pub amount: String,
}

/// A transfer as persisted: enriched with a symbol and, when priceable, a
/// USD valuation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpotTransfer {
	pub event: TransferEvent,
	pub symbol: String,
	pub amount_usd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
	pub address: WalletAddress,
	/// Decimal string in token units.
	pub balance: String,
}

/// Where a trade/transfer window starts: a chain cursor when one exists,
/// otherwise the competition start.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncAnchor {
	Block(u64),
	Timestamp(DateTime<Utc>),
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct AgentSyncState {
	pub last_trade_block: Option<u64>,
	pub last_transfer_block: Option<u64>,
	pub last_sync_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
	Open,
	Closed,
	Liquidated,
}

impl PositionStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			PositionStatus::Open => "open",
			PositionStatus::Closed => "closed",
			PositionStatus::Liquidated => "liquidated",
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerpsPosition {
	pub provider_position_id: String,
	pub asset: String,
	pub is_long: bool,
	pub size: String,
	pub entry_price: Option<String>,
	pub current_price: Option<String>,
	pub pnl: String,
	pub status: PositionStatus,
	pub created_at: DateTime<Utc>,
	pub last_updated_at: DateTime<Utc>,
}

/// A complete per-cycle snapshot of a perps account.
#[derive(Debug, Clone, PartialEq)]
pub struct PerpsAccountSummary {
	pub total_equity: String,
	pub available_balance: String,
	pub unrealized_pnl: String,
	pub realized_pnl: String,
	pub total_volume: String,
	pub open_position_count: u32,
	pub total_trade_count: u32,
	pub roi: String,
	pub account_status: String,
	pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSnapshot {
	pub agent_id: String,
	pub competition_id: String,
	pub timestamp: DateTime<Utc>,
	pub total_value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskMetrics {
	pub calmar_ratio: String,
	pub sortino_ratio: String,
	pub max_drawdown: String,
	pub annualized_return: String,
	pub simple_return: String,
	pub downside_deviation: String,
	pub snapshot_count: i64,
	pub calculation_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stake {
	pub id: String,
	pub user_id: String,
	pub wallet: WalletAddress,
	pub amount: BigUint,
	pub staked_at: DateTime<Utc>,
	pub unstaked_at: Option<DateTime<Utc>>,
}

impl Stake {
	pub fn is_active(&self) -> bool {
		self.unstaked_at.is_none()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn config_deserializes_with_defaults() {
		let config: CompetitionConfig = serde_json::from_str(
			r#"{"data_source": "rpc_direct", "enabled_chains": ["base"]}"#,
		)
		.unwrap();
		assert_eq!(config.data_source, DataSource::RpcDirect);
		assert_eq!(config.enabled_chains, vec![Chain::Base]);
		assert!(!config.whitelist_enabled);
		assert_eq!(config.sync_interval_minutes, 5);
		assert_eq!(config.boost.no_stake_boost_amount, 0);
	}

	#[test]
	fn allowlist_is_none_when_whitelist_disabled() {
		let mut config: CompetitionConfig = serde_json::from_str(
			r#"{
				"data_source": "rpc_direct",
				"enabled_chains": ["base"],
				"allowed_token_addresses": {
					"base": ["0x833589fcd6edb6e08f4c7c32d4f71b54bda02913"]
				}
			}"#,
		)
		.unwrap();
		assert!(config.allowlist_for(Chain::Base).is_none());
		config.whitelist_enabled = true;
		assert_eq!(config.allowlist_for(Chain::Base).unwrap().len(), 1);
		assert!(config.allowlist_for(Chain::Ethereum).is_none());
	}

	#[test]
	fn boost_window() {
		let competition = Competition {
			id: "c1".into(),
			name: "test".into(),
			kind: CompetitionKind::SpotLiveTrading,
			status: CompetitionStatus::Active,
			start_date: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
			end_date: None,
			boost_start: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
			boost_end: Some(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap()),
		};
		assert!(competition
			.boost_window_open(Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap()));
		assert!(!competition
			.boost_window_open(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap()));
	}
}
