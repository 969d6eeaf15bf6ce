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

//! Perpetual-futures provider over HTTP. All numeric fields are normalized
//! to canonical decimal strings at this edge; `null`/`"NaN"` equity and
//! friends become `"0"`.

use crate::{constants::HTTP_REQUEST_TIMEOUT, retrier::with_deadline, types::*};
use anyhow::{Context, Result};
use arena_primitives::WalletAddress;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde_json::Value;

/// A position that opened and closed between two sync cycles, recovered
/// from the provider's fill history.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPositionFill {
	pub fill_id: String,
	pub asset: String,
	pub side: String,
	pub size: String,
	pub close_price: String,
	pub closed_pnl: String,
	pub closed_at: DateTime<Utc>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PerpsApi: Send + Sync + 'static {
	async fn get_account_summary(&self, wallet: &WalletAddress)
		-> Result<PerpsAccountSummary>;

	async fn get_positions(&self, wallet: &WalletAddress) -> Result<Vec<PerpsPosition>>;

	/// Whether [`PerpsApi::get_closed_position_fills`] is available on this
	/// provider.
	fn supports_closed_fills(&self) -> bool;

	async fn get_closed_position_fills(
		&self,
		wallet: &WalletAddress,
		since: DateTime<Utc>,
		until: DateTime<Utc>,
	) -> Result<Vec<ClosedPositionFill>>;

	async fn is_healthy(&self) -> bool;
}

/// Normalize a provider numeric: number or numeric string passes through,
/// everything else (null, `"NaN"`, garbage) becomes `"0"`.
pub fn normalize_decimal(value: &Value) -> String {
	match value {
		Value::Number(number) => number.to_string(),
		Value::String(text) => match text.parse::<f64>() {
			Ok(parsed) if parsed.is_finite() => text.clone(),
			_ => "0".to_owned(),
		},
		_ => "0".to_owned(),
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSummary {
	#[serde(default)]
	total_equity: Value,
	#[serde(default)]
	available_balance: Value,
	#[serde(default)]
	unrealized_pnl: Value,
	#[serde(default)]
	realized_pnl: Value,
	#[serde(default)]
	total_volume: Value,
	#[serde(default)]
	open_position_count: Option<u32>,
	#[serde(default)]
	total_trade_count: Option<u32>,
	#[serde(default)]
	roi: Value,
	#[serde(default)]
	account_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
	position_id: String,
	asset: String,
	side: String,
	#[serde(default)]
	size: Value,
	#[serde(default)]
	entry_price: Option<Value>,
	#[serde(default)]
	mark_price: Option<Value>,
	#[serde(default)]
	unrealized_pnl: Value,
	#[serde(default)]
	status: Option<String>,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFill {
	fill_id: String,
	asset: String,
	side: String,
	#[serde(default)]
	size: Value,
	#[serde(default)]
	close_price: Value,
	#[serde(default)]
	closed_pnl: Value,
	closed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PerpsClient {
	http: reqwest::Client,
	base_url: String,
}

impl PerpsClient {
	pub fn new(base_url: &str) -> Result<Self> {
		Ok(Self {
			http: reqwest::Client::builder()
				.timeout(HTTP_REQUEST_TIMEOUT)
				.build()
				.context("could not build perps HTTP client")?,
			base_url: base_url.trim_end_matches('/').to_owned(),
		})
	}
}

fn position_from_raw(raw: RawPosition) -> PerpsPosition {
	PerpsPosition {
		provider_position_id: raw.position_id,
		asset: raw.asset,
		is_long: raw.side == "long",
		size: normalize_decimal(&raw.size),
		entry_price: raw.entry_price.as_ref().map(normalize_decimal),
		current_price: raw.mark_price.as_ref().map(normalize_decimal),
		pnl: normalize_decimal(&raw.unrealized_pnl),
		status: match raw.status.as_deref() {
			Some("closed") => PositionStatus::Closed,
			Some("liquidated") => PositionStatus::Liquidated,
			_ => PositionStatus::Open,
		},
		created_at: raw.created_at,
		last_updated_at: raw.updated_at,
	}
}

#[async_trait]
impl PerpsApi for PerpsClient {
	async fn get_account_summary(
		&self,
		wallet: &WalletAddress,
	) -> Result<PerpsAccountSummary> {
		let url = format!("{}/v1/account/{wallet}/summary", self.base_url);
		let raw: RawSummary = with_deadline("perps get_account_summary", HTTP_REQUEST_TIMEOUT, async {
			Ok(self.http.get(&url).send().await?.error_for_status()?.json().await?)
		})
		.await?;

		Ok(PerpsAccountSummary {
			total_equity: normalize_decimal(&raw.total_equity),
			available_balance: normalize_decimal(&raw.available_balance),
			unrealized_pnl: normalize_decimal(&raw.unrealized_pnl),
			realized_pnl: normalize_decimal(&raw.realized_pnl),
			total_volume: normalize_decimal(&raw.total_volume),
			open_position_count: raw.open_position_count.unwrap_or(0),
			total_trade_count: raw.total_trade_count.unwrap_or(0),
			roi: normalize_decimal(&raw.roi),
			account_status: raw.account_status.unwrap_or_else(|| "unknown".to_owned()),
			timestamp: Utc::now(),
		})
	}

	async fn get_positions(&self, wallet: &WalletAddress) -> Result<Vec<PerpsPosition>> {
		let url = format!("{}/v1/account/{wallet}/positions", self.base_url);
		let raw: Vec<RawPosition> =
			with_deadline("perps get_positions", HTTP_REQUEST_TIMEOUT, async {
				Ok(self.http.get(&url).send().await?.error_for_status()?.json().await?)
			})
			.await?;
		Ok(raw.into_iter().map(position_from_raw).collect())
	}

	fn supports_closed_fills(&self) -> bool {
		true
	}

	async fn get_closed_position_fills(
		&self,
		wallet: &WalletAddress,
		since: DateTime<Utc>,
		until: DateTime<Utc>,
	) -> Result<Vec<ClosedPositionFill>> {
		let url = format!(
			"{}/v1/account/{wallet}/fills?since_ms={}&until_ms={}",
			self.base_url,
			since.timestamp_millis(),
			until.timestamp_millis()
		);
		let raw: Vec<RawFill> =
			with_deadline("perps get_closed_position_fills", HTTP_REQUEST_TIMEOUT, async {
				Ok(self.http.get(&url).send().await?.error_for_status()?.json().await?)
			})
			.await?;
		Ok(raw
			.into_iter()
			.map(|fill| ClosedPositionFill {
				fill_id: fill.fill_id,
				asset: fill.asset,
				side: fill.side,
				size: normalize_decimal(&fill.size),
				close_price: normalize_decimal(&fill.close_price),
				closed_pnl: normalize_decimal(&fill.closed_pnl),
				closed_at: fill.closed_at,
			})
			.collect())
	}

	async fn is_healthy(&self) -> bool {
		let url = format!("{}/health", self.base_url);
		with_deadline("perps is_healthy", HTTP_REQUEST_TIMEOUT, async {
			Ok(self.http.get(&url).send().await?.error_for_status().map(|_| ())?)
		})
		.await
		.is_ok()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn normalizes_degenerate_numerics_to_zero() {
		assert_eq!(normalize_decimal(&Value::Null), "0");
		assert_eq!(normalize_decimal(&json!("NaN")), "0");
		assert_eq!(normalize_decimal(&json!("Infinity")), "0");
		assert_eq!(normalize_decimal(&json!("not a number")), "0");
		assert_eq!(normalize_decimal(&json!(12.5)), "12.5");
		assert_eq!(normalize_decimal(&json!("1043.2200")), "1043.2200");
	}

	#[test]
	fn positions_map_side_and_status() {
		let raw: RawPosition = serde_json::from_value(json!({
			"positionId": "p-1",
			"asset": "ETH",
			"side": "short",
			"size": "2.5",
			"entryPrice": "3000",
			"markPrice": 2900.0,
			"unrealizedPnl": "250",
			"status": "open",
			"createdAt": "2025-06-01T00:00:00Z",
			"updatedAt": "2025-06-02T00:00:00Z"
		}))
		.unwrap();
		let position = position_from_raw(raw);
		assert!(!position.is_long);
		assert_eq!(position.status, PositionStatus::Open);
		assert_eq!(position.current_price.as_deref(), Some("2900.0"));
		assert_eq!(position.pnl, "250");
	}
}
