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

//! Upstream provider adapters behind narrow capability traits: spot trading
//! data, perps accounts, and the price oracle.

pub mod perps;
pub mod price;
pub mod rpc_direct;

pub use perps::{ClosedPositionFill, PerpsApi, PerpsClient};
pub use price::{price_key, PriceApi, PriceClient, PriceReport};
pub use rpc_direct::RpcDirectProvider;

use crate::retrier::TIMED_OUT;
use crate::types::{SyncAnchor, TokenBalance, TradesResult, TransferEvent};
use anyhow::Result;
use arena_primitives::{Chain, WalletAddress};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

/// Failure classification for upstream calls. Transient failures leave sync
/// state untouched so the next tick retries; permanent ones need an
/// operator.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
	#[error("transient upstream failure: {0}")]
	Transient(#[source] anyhow::Error),
	#[error("permanent upstream failure: {0}")]
	Permanent(#[source] anyhow::Error),
}

/// Classify an adapter error. Timeouts, connection errors and 5xx are
/// transient; anything that looks like a rejected request (4xx, schema
/// mismatch) is permanent.
pub fn classify_upstream_error(error: anyhow::Error) -> UpstreamError {
	if let Some(reqwest_error) = error.downcast_ref::<reqwest::Error>() {
		if let Some(status) = reqwest_error.status() {
			return if status.is_server_error() || status.as_u16() == 429 {
				UpstreamError::Transient(error)
			} else {
				UpstreamError::Permanent(error)
			};
		}
		return UpstreamError::Transient(error);
	}
	if error.to_string().contains(TIMED_OUT) {
		return UpstreamError::Transient(error);
	}
	if error.downcast_ref::<serde_json::Error>().is_some() {
		return UpstreamError::Permanent(error);
	}
	UpstreamError::Transient(error)
}

/// The spot data capability set. One instance covers every chain a
/// competition has enabled; per-call `chains` narrow the scope.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpotProviderApi: Send + Sync + 'static {
	async fn get_trades_since(
		&self,
		wallet: &WalletAddress,
		since: SyncAnchor,
		chains: &[Chain],
		to_block: Option<u64>,
	) -> Result<TradesResult>;

	/// Deposit/withdraw history, excluding any transaction that matched the
	/// swap pattern in the same window.
	async fn get_transfer_history(
		&self,
		wallet: &WalletAddress,
		since: SyncAnchor,
		chains: &[Chain],
		to_block: Option<u64>,
	) -> Result<Vec<TransferEvent>>;

	async fn get_current_block(&self, chain: Chain) -> Result<u64>;

	async fn get_token_balances(
		&self,
		wallet: &WalletAddress,
		chain: Chain,
	) -> Result<Vec<TokenBalance>>;

	async fn get_native_balance(&self, wallet: &WalletAddress, chain: Chain) -> Result<String>;

	async fn get_token_decimals(&self, token: &WalletAddress, chain: Chain) -> Result<u8>;

	async fn get_token_symbol(
		&self,
		token: &WalletAddress,
		chain: Chain,
	) -> Result<Option<String>>;

	async fn is_healthy(&self) -> bool;
}
