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

//! JSON-RPC client for one EVM chain, covering the standard endpoints plus
//! the enhanced asset-transfer and token-balance extensions. Every numeric
//! result is normalized to a decimal string before it leaves this module.

use super::{format_units, h160_to_wallet, parse_hex_block_number, to_hex_block_number};
use crate::{
	constants::{
		ASSET_TRANSFERS_PAGE_SIZE, RPC_REQUEST_TIMEOUT, RPC_RETRY_CONNECTION_INTERVAL,
	},
	retrier::with_deadline,
	types::TokenBalance,
};
use anyhow::{anyhow, Context, Result};
use arena_primitives::Chain;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ethers::{
	abi::{decode, ParamType},
	providers::{Http, Middleware, Provider},
	types::{
		transaction::eip2718::TypedTransaction, Bytes, TransactionReceipt, TransactionRequest,
		H160, H256, U256,
	},
};
use futures::Future;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

// `decimals()` and `symbol()` selectors.
const SELECTOR_DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
const SELECTOR_SYMBOL: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];

const MAX_TRANSFER_PAGES: usize = 16;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetTransfersRequest {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub from_block: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub to_block: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub from_address: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub to_address: Option<String>,
	pub category: Vec<String>,
	pub with_metadata: bool,
	pub max_count: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub page_key: Option<String>,
}

impl AssetTransfersRequest {
	pub fn in_range(from_block: u64, to_block: u64) -> Self {
		Self {
			from_block: Some(to_hex_block_number(from_block)),
			to_block: Some(to_hex_block_number(to_block)),
			category: vec!["external".to_owned(), "erc20".to_owned()],
			with_metadata: true,
			max_count: format!("{ASSET_TRANSFERS_PAGE_SIZE:#x}"),
			..Default::default()
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetTransfersResponse {
	pub transfers: Vec<AssetTransfer>,
	pub page_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetTransfer {
	pub unique_id: String,
	pub category: String,
	pub block_num: String,
	pub hash: String,
	pub from: String,
	pub to: Option<String>,
	pub asset: Option<String>,
	#[serde(default)]
	pub raw_contract: RawContract,
	#[serde(default)]
	pub metadata: Option<TransferMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContract {
	/// Hex-encoded raw value.
	pub value: Option<String>,
	/// Token contract; absent for external (native) transfers.
	pub address: Option<String>,
	/// Hex-encoded token decimals.
	pub decimal: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
	pub block_timestamp: Option<DateTime<Utc>>,
}

impl AssetTransfer {
	pub fn block_number(&self) -> Result<u64> {
		parse_hex_block_number(&self.block_num)
	}

	pub fn is_erc20(&self) -> bool {
		self.category == "erc20"
	}

	/// Log index recovered from the `<hash>:log:<index>` unique id;
	/// external (native) entries carry none.
	pub fn log_index(&self) -> Option<u64> {
		let (_, index) = self.unique_id.rsplit_once(":log:")?;
		index.parse().ok()
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBalancesResponse {
	token_balances: Vec<TokenBalanceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBalanceEntry {
	contract_address: H160,
	token_balance: Option<String>,
}

/// Capability surface of one chain's RPC node, as the sync pipeline needs
/// it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EvmRpcApi: Send + Sync + 'static {
	/// All matching asset transfers in the request's range, depaginated.
	async fn get_asset_transfers(
		&self,
		request: AssetTransfersRequest,
	) -> Result<Vec<AssetTransfer>>;

	async fn transaction_receipt(&self, tx_hash: H256) -> Result<TransactionReceipt>;

	async fn block_number(&self) -> Result<u64>;

	async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>>;

	async fn token_decimals(&self, token: H160) -> Result<u8>;

	async fn token_symbol(&self, token: H160) -> Result<Option<String>>;

	/// ERC-20 balances of a wallet, scaled to decimal strings.
	async fn token_balances(&self, wallet: H160) -> Result<Vec<TokenBalance>>;

	/// Native balance of a wallet as a decimal string in whole-coin units.
	async fn native_balance(&self, wallet: H160) -> Result<String>;

	async fn chain_id(&self) -> Result<u64>;
}

#[derive(Clone)]
pub struct EvmRpcClient {
	provider: Arc<Provider<Http>>,
	chain: Chain,
	// Token decimals are immutable contract metadata, safe to memoize.
	decimals_cache: Arc<Mutex<HashMap<H160, u8>>>,
}

impl EvmRpcClient {
	/// Build a client and a future that resolves once the node answers with
	/// the expected chain id. Waiting here instead of failing keeps a
	/// misbehaving chain from taking the whole engine down.
	pub fn new(http_endpoint: &str, chain: Chain) -> Result<impl Future<Output = Self>> {
		let provider = Arc::new(
			Provider::<Http>::try_from(http_endpoint)
				.with_context(|| format!("invalid {chain} RPC endpoint"))?,
		);

		let client =
			EvmRpcClient { provider, chain, decimals_cache: Arc::new(Mutex::new(HashMap::new())) };
		let endpoint = http_endpoint.to_owned();

		Ok(async move {
			let mut poll_interval = tokio::time::interval(RPC_RETRY_CONNECTION_INTERVAL);
			loop {
				poll_interval.tick().await;
				match client.chain_id().await {
					Ok(chain_id) if chain_id == chain.chain_id() => break client,
					Ok(chain_id) => {
						tracing::error!(
							"Connected to {chain} node at {endpoint} but with incorrect \
							 chain_id {chain_id}, expected {}. Check the engine configuration.",
							chain.chain_id()
						);
					},
					Err(e) => tracing::error!(
						"Cannot connect to a {chain} node at {endpoint}: {e:#}. Retrying in {:?}...",
						RPC_RETRY_CONNECTION_INTERVAL
					),
				}
			}
		})
	}

	async fn eth_call(&self, to: H160, selector: [u8; 4]) -> Result<Bytes> {
		let tx: TypedTransaction =
			TransactionRequest::new().to(to).data(Bytes::from(selector.to_vec())).into();
		with_deadline("eth_call", RPC_REQUEST_TIMEOUT, async {
			Ok(self.provider.call(&tx, None).await?)
		})
		.await
	}
}

#[async_trait]
impl EvmRpcApi for EvmRpcClient {
	async fn get_asset_transfers(
		&self,
		request: AssetTransfersRequest,
	) -> Result<Vec<AssetTransfer>> {
		let mut transfers = Vec::new();
		let mut request = request;
		for _page in 0..MAX_TRANSFER_PAGES {
			let response: AssetTransfersResponse =
				with_deadline("alchemy_getAssetTransfers", RPC_REQUEST_TIMEOUT, async {
					Ok(self.provider.request("alchemy_getAssetTransfers", [&request]).await?)
				})
				.await?;
			transfers.extend(response.transfers);
			match response.page_key {
				Some(page_key) => request.page_key = Some(page_key),
				None => return Ok(transfers),
			}
		}
		Err(anyhow!(
			"asset transfer window on {} exceeded {MAX_TRANSFER_PAGES} pages; narrow the block range",
			self.chain
		))
	}

	async fn transaction_receipt(&self, tx_hash: H256) -> Result<TransactionReceipt> {
		with_deadline("eth_getTransactionReceipt", RPC_REQUEST_TIMEOUT, async {
			self.provider
				.get_transaction_receipt(tx_hash)
				.await?
				.ok_or_else(|| {
					anyhow!(
						"Getting {} transaction receipt for tx hash {tx_hash} returned None",
						self.chain
					)
				})
		})
		.await
	}

	async fn block_number(&self) -> Result<u64> {
		with_deadline("eth_blockNumber", RPC_REQUEST_TIMEOUT, async {
			Ok(self.provider.get_block_number().await?.as_u64())
		})
		.await
	}

	async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>> {
		let block = with_deadline("eth_getBlockByNumber", RPC_REQUEST_TIMEOUT, async {
			self.provider.get_block(block_number).await?.ok_or_else(|| {
				anyhow!("Getting {} block {block_number} returned None", self.chain)
			})
		})
		.await?;
		Utc.timestamp_opt(block.timestamp.as_u64() as i64, 0)
			.single()
			.ok_or_else(|| anyhow!("block {block_number} has unrepresentable timestamp"))
	}

	async fn token_decimals(&self, token: H160) -> Result<u8> {
		if let Some(decimals) = self.decimals_cache.lock().await.get(&token) {
			return Ok(*decimals);
		}
		let data = self.eth_call(token, SELECTOR_DECIMALS).await?;
		let quantity = U256::from_big_endian(&data);
		if quantity > U256::from(u8::MAX) {
			return Err(anyhow!("absurd decimals() for {token:?}: {quantity}"));
		}
		let decimals = quantity.as_u64() as u8;
		self.decimals_cache.lock().await.insert(token, decimals);
		Ok(decimals)
	}

	async fn token_symbol(&self, token: H160) -> Result<Option<String>> {
		let data = self.eth_call(token, SELECTOR_SYMBOL).await?;
		if data.is_empty() {
			return Ok(None);
		}
		// ABI string first; some old tokens return a raw bytes32.
		if let Ok(mut tokens) = decode(&[ParamType::String], &data) {
			if let Some(ethers::abi::Token::String(symbol)) = tokens.pop() {
				return Ok(Some(symbol));
			}
		}
		let trimmed: Vec<u8> =
			data.iter().copied().take_while(|byte| *byte != 0).collect();
		Ok(String::from_utf8(trimmed).ok().filter(|s| !s.is_empty()))
	}

	async fn token_balances(&self, wallet: H160) -> Result<Vec<TokenBalance>> {
		let response: TokenBalancesResponse =
			with_deadline("alchemy_getTokenBalances", RPC_REQUEST_TIMEOUT, async {
				Ok(self
					.provider
					.request("alchemy_getTokenBalances", (wallet, "erc20"))
					.await?)
			})
			.await?;

		let mut balances = Vec::with_capacity(response.token_balances.len());
		for entry in response.token_balances {
			let Some(raw) = entry.token_balance else { continue };
			let raw = super::parse_hex_quantity(&raw)?;
			if raw.is_zero() {
				continue
			}
			let decimals = self.token_decimals(entry.contract_address).await?;
			balances.push(TokenBalance {
				address: h160_to_wallet(entry.contract_address),
				balance: format_units(raw, decimals),
			});
		}
		Ok(balances)
	}

	async fn native_balance(&self, wallet: H160) -> Result<String> {
		let raw = with_deadline("eth_getBalance", RPC_REQUEST_TIMEOUT, async {
			Ok(self.provider.get_balance(wallet, None).await?)
		})
		.await?;
		Ok(format_units(raw, 18))
	}

	async fn chain_id(&self) -> Result<u64> {
		with_deadline("eth_chainId", RPC_REQUEST_TIMEOUT, async {
			Ok(self.provider.get_chainid().await?.as_u64())
		})
		.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn asset_transfer_log_index_parses_from_unique_id() {
		let transfer = AssetTransfer {
			unique_id: "0xabc:log:42".to_owned(),
			category: "erc20".to_owned(),
			block_num: "0x64".to_owned(),
			hash: "0xabc".to_owned(),
			from: "0x0".to_owned(),
			to: None,
			asset: None,
			raw_contract: RawContract::default(),
			metadata: None,
		};
		assert_eq!(transfer.log_index(), Some(42));
		assert_eq!(transfer.block_number().unwrap(), 100);

		let external =
			AssetTransfer { unique_id: "0xabc:external".to_owned(), ..transfer.clone() };
		assert_eq!(external.log_index(), None);
	}

	#[test]
	fn asset_transfers_request_serializes_in_wire_shape() {
		let request = AssetTransfersRequest {
			from_address: Some("0x70e7db0678460c5e53f1ffc9221d1c692111dcc5".to_owned()),
			..AssetTransfersRequest::in_range(100, 200)
		};
		let wire = serde_json::to_value(&request).unwrap();
		assert_eq!(wire["fromBlock"], "0x64");
		assert_eq!(wire["toBlock"], "0xc8");
		assert_eq!(wire["category"], serde_json::json!(["external", "erc20"]));
		assert_eq!(wire["withMetadata"], true);
		assert!(wire.get("pageKey").is_none());
		assert!(wire.get("toAddress").is_none());
	}

	#[test]
	fn token_balances_response_parses() {
		let response: TokenBalancesResponse = serde_json::from_str(
			r#"{
				"address": "0x70e7db0678460c5e53f1ffc9221d1c692111dcc5",
				"tokenBalances": [
					{"contractAddress": "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913",
					 "tokenBalance": "0x0000000000000000000000000000000000000000000000000000000004299ed0"}
				]
			}"#,
		)
		.unwrap();
		assert_eq!(response.token_balances.len(), 1);
		assert_eq!(
			response.token_balances[0].token_balance.as_deref(),
			Some("0x0000000000000000000000000000000000000000000000000000000004299ed0")
		);
	}
}
