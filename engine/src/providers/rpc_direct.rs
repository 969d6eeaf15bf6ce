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

//! Spot provider over direct RPC: reconstructs DEX swaps and transfer
//! history from raw asset-transfer records and receipts.
//!
//! Swap attribution is receipt-driven. Transfers within one transaction are
//! ordered by log index; without that ordering, a transaction carrying a
//! 0-value external call alongside a real ERC-20 swap would attribute the
//! 0-value call as the swap's source leg. The first outbound ERC-20 log is
//! the source, the last inbound the destination, and a non-zero native value
//! with no earlier ERC-20 outflow marks a native-input swap.

use crate::{
	constants::{ERC20_TRANSFER_TOPIC, MAX_CONCURRENT_RECEIPT_REQUESTS, RPC_REQUEST_TIMEOUT},
	evm::{
		format_units, h160_to_wallet, parse_hex_quantity,
		rpc::{AssetTransfer, AssetTransfersRequest, EvmRpcApi, EvmRpcClient},
		wallet_to_h160,
	},
	providers::{PriceApi, SpotProviderApi},
	retrier::with_deadline,
	types::{
		AllowedProtocol, SyncAnchor, TokenBalance, Trade, TradesResult, TransferEvent,
		TransferKind,
	},
};
use anyhow::{anyhow, Context, Result};
use arena_primitives::{Chain, WalletAddress, NATIVE_TOKEN_ADDRESS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{TransactionReceipt, H160, H256, U256};
use futures::{StreamExt, TryStreamExt};
use itertools::Itertools;
use std::{collections::HashMap, str::FromStr, sync::Arc};

pub struct RpcDirectProvider<Rpc: EvmRpcApi = EvmRpcClient> {
	clients: HashMap<Chain, Rpc>,
	protocols: Vec<AllowedProtocol>,
	price: Arc<dyn PriceApi>,
}

#[derive(Debug, Default)]
struct WindowScan {
	trades: Vec<Trade>,
	transfers: Vec<TransferEvent>,
}

#[derive(Debug, Clone, Copy)]
struct Erc20Transfer {
	token: H160,
	from: H160,
	to: H160,
	value: U256,
	log_index: u64,
}

impl RpcDirectProvider<EvmRpcClient> {
	/// Build clients for every enabled chain and wait (bounded) for each to
	/// answer with the right chain id.
	pub async fn connect(
		endpoints: &HashMap<Chain, String>,
		chains: &[Chain],
		protocols: Vec<AllowedProtocol>,
		price: Arc<dyn PriceApi>,
	) -> Result<Self> {
		let mut clients = HashMap::new();
		for chain in chains {
			let endpoint = endpoints
				.get(chain)
				.ok_or_else(|| anyhow!("no RPC endpoint configured for chain {chain}"))?;
			let client = with_deadline("evm connect", RPC_REQUEST_TIMEOUT, async {
				Ok(EvmRpcClient::new(endpoint, *chain)?.await)
			})
			.await?;
			clients.insert(*chain, client);
		}
		Ok(Self::new(clients, protocols, price))
	}
}

impl<Rpc: EvmRpcApi> RpcDirectProvider<Rpc> {
	pub fn new(
		clients: HashMap<Chain, Rpc>,
		protocols: Vec<AllowedProtocol>,
		price: Arc<dyn PriceApi>,
	) -> Self {
		Self { clients, protocols, price }
	}

	fn client(&self, chain: Chain) -> Result<&Rpc> {
		self.clients.get(&chain).ok_or_else(|| anyhow!("no RPC client for chain {chain}"))
	}

	async fn resolve_anchor(&self, rpc: &Rpc, since: SyncAnchor, head: u64) -> Result<u64> {
		match since {
			SyncAnchor::Block(block) => Ok(block.min(head)),
			SyncAnchor::Timestamp(timestamp) => {
				// Lowest block at or after the timestamp, by bisection.
				let (mut lo, mut hi) = (0u64, head);
				while lo < hi {
					let mid = lo + (hi - lo) / 2;
					if rpc.block_timestamp(mid).await? < timestamp {
						lo = mid + 1;
					} else {
						hi = mid;
					}
				}
				Ok(lo)
			},
		}
	}

	async fn scan_window(
		&self,
		rpc: &Rpc,
		chain: Chain,
		wallet: &WalletAddress,
		from_block: u64,
		to_block: u64,
	) -> Result<WindowScan> {
		if from_block > to_block {
			return Ok(WindowScan::default());
		}

		let outgoing = rpc
			.get_asset_transfers(AssetTransfersRequest {
				from_address: Some(wallet.to_string()),
				..AssetTransfersRequest::in_range(from_block, to_block)
			})
			.await?;
		let incoming = rpc
			.get_asset_transfers(AssetTransfersRequest {
				to_address: Some(wallet.to_string()),
				..AssetTransfersRequest::in_range(from_block, to_block)
			})
			.await?;

		let grouped: Vec<(String, Vec<AssetTransfer>)> = outgoing
			.into_iter()
			.chain(incoming)
			.unique_by(|transfer| transfer.unique_id.clone())
			.map(|transfer| (transfer.hash.clone(), transfer))
			.into_group_map()
			.into_iter()
			.sorted_by_key(|(hash, _)| hash.clone())
			.collect();
		if grouped.is_empty() {
			return Ok(WindowScan::default());
		}

		let native_usd = self
			.price
			.get_price(&NATIVE_TOKEN_ADDRESS, chain)
			.await
			.unwrap_or_else(|e| {
				tracing::warn!("No native token price for {chain}: {e:#}");
				None
			})
			.map(|report| report.price);

		let outcomes: Vec<WindowScan> = futures::stream::iter(grouped.into_iter().map(
			|(tx_hash, group)| self.classify_transaction(rpc, chain, wallet, tx_hash, group, native_usd),
		))
		.buffered(MAX_CONCURRENT_RECEIPT_REQUESTS)
		.try_collect()
		.await?;

		let mut scan = WindowScan::default();
		for outcome in outcomes {
			scan.trades.extend(outcome.trades);
			scan.transfers.extend(outcome.transfers);
		}
		scan.trades.sort_by_key(|trade| (trade.block_number, trade.log_index));
		scan.transfers.sort_by_key(|transfer| (transfer.block_number, transfer.log_index));
		Ok(scan)
	}

	/// Classify one transaction's transfer group as either a swap (one
	/// trade) or a set of plain transfers. Never both: a swap's transaction
	/// hash is excluded from transfer history entirely.
	async fn classify_transaction(
		&self,
		rpc: &Rpc,
		chain: Chain,
		wallet: &WalletAddress,
		tx_hash: String,
		group: Vec<AssetTransfer>,
		native_usd: Option<f64>,
	) -> Result<WindowScan> {
		let wallet_h160 = wallet_to_h160(wallet);
		let block_number = group
			.first()
			.ok_or_else(|| anyhow!("empty transfer group for {tx_hash}"))?
			.block_number()?;
		let timestamp = match group.iter().find_map(|transfer| {
			transfer.metadata.as_ref().and_then(|metadata| metadata.block_timestamp)
		}) {
			Some(timestamp) => timestamp,
			None => rpc.block_timestamp(block_number).await?,
		};

		let native_value = group
			.iter()
			.filter(|transfer| !transfer.is_erc20() && transfer.from == wallet.to_string())
			.map(|transfer| {
				transfer
					.raw_contract
					.value
					.as_deref()
					.map(parse_hex_quantity)
					.unwrap_or(Ok(U256::zero()))
			})
			.try_fold(U256::zero(), |acc, value| value.map(|value| acc + value))?;

		let receipt = rpc
			.transaction_receipt(
				H256::from_str(&tx_hash).with_context(|| format!("bad tx hash {tx_hash}"))?,
			)
			.await?;

		if let Some(protocol) = self.match_protocol(&receipt, chain)? {
			if let Some(trade) = self
				.swap_from_receipt(
					rpc,
					chain,
					wallet_h160,
					&tx_hash,
					&receipt,
					native_value,
					protocol,
					block_number,
					timestamp,
					native_usd,
				)
				.await?
			{
				return Ok(WindowScan { trades: vec![trade], transfers: Vec::new() });
			}
		}

		// Not a swap: surface the wallet-touching entries as transfers.
		let mut transfers = Vec::new();
		for entry in &group {
			let Some(transfer) =
				self.transfer_from_entry(rpc, chain, wallet, entry, timestamp).await?
			else {
				continue
			};
			transfers.push(transfer);
		}
		Ok(WindowScan { trades: Vec::new(), transfers })
	}

	/// Protocol filters: accepted if the receipt carries a log from a
	/// configured router or a log whose topic0 equals a configured swap
	/// event signature. Empty filter set accepts everything, unattributed.
	fn match_protocol(
		&self,
		receipt: &TransactionReceipt,
		chain: Chain,
	) -> Result<Option<Option<String>>> {
		let relevant: Vec<&AllowedProtocol> =
			self.protocols.iter().filter(|protocol| protocol.chain == chain).collect();
		if relevant.is_empty() {
			return Ok(Some(None));
		}
		for protocol in relevant {
			let router = protocol.router_address.as_ref().map(wallet_to_h160);
			let signature = protocol
				.swap_event_signature
				.as_deref()
				.map(H256::from_str)
				.transpose()
				.with_context(|| {
					format!("bad swap event signature for protocol {}", protocol.protocol)
				})?;
			let matched = receipt.logs.iter().any(|log| {
				router.is_some_and(|router| log.address == router) ||
					signature
						.is_some_and(|signature| log.topics.first() == Some(&signature))
			});
			if matched {
				return Ok(Some(Some(protocol.protocol.clone())));
			}
		}
		Ok(None)
	}

	#[allow(clippy::too_many_arguments)]
	async fn swap_from_receipt(
		&self,
		rpc: &Rpc,
		chain: Chain,
		wallet: H160,
		tx_hash: &str,
		receipt: &TransactionReceipt,
		native_value: U256,
		protocol: Option<String>,
		block_number: u64,
		timestamp: DateTime<Utc>,
		native_usd: Option<f64>,
	) -> Result<Option<Trade>> {
		let mut erc20: Vec<Erc20Transfer> =
			receipt.logs.iter().filter_map(parse_erc20_transfer).collect();
		erc20.sort_by_key(|transfer| transfer.log_index);

		let outbound: Vec<&Erc20Transfer> =
			erc20.iter().filter(|transfer| transfer.from == wallet).collect();
		let inbound: Vec<&Erc20Transfer> =
			erc20.iter().filter(|transfer| transfer.to == wallet).collect();

		let (Some(first_in), Some(last_in)) = (inbound.first(), inbound.last()) else {
			return Ok(None);
		};

		let (from_token, from_amount) = match outbound.first() {
			Some(first_out) if first_out.log_index < first_in.log_index ||
				native_value.is_zero() =>
			{
				let decimals = rpc.token_decimals(first_out.token).await?;
				(h160_to_wallet(first_out.token), format_units(first_out.value, decimals))
			},
			_ if !native_value.is_zero() =>
				(NATIVE_TOKEN_ADDRESS, format_units(native_value, 18)),
			_ => return Ok(None),
		};

		let to_decimals = rpc.token_decimals(last_in.token).await?;
		let to_amount = format_units(last_in.value, to_decimals);

		let gas_used = receipt.gas_used;
		let gas_price = receipt.effective_gas_price;
		let gas_cost_usd = match (gas_used, gas_price, native_usd) {
			(Some(gas_used), Some(gas_price), Some(native_usd)) => format_units(
				gas_used * gas_price,
				18,
			)
			.parse::<f64>()
			.ok()
			.map(|native| native * native_usd),
			_ => None,
		};

		Ok(Some(Trade {
			chain,
			tx_hash: tx_hash.to_owned(),
			log_index: last_in.log_index,
			block_number,
			timestamp,
			from_token,
			to_token: h160_to_wallet(last_in.token),
			from_amount,
			to_amount,
			protocol,
			gas_used: gas_used.map(|quantity| quantity.to_string()),
			gas_price: gas_price.map(|quantity| quantity.to_string()),
			gas_cost_usd,
		}))
	}

	async fn transfer_from_entry(
		&self,
		rpc: &Rpc,
		chain: Chain,
		wallet: &WalletAddress,
		entry: &AssetTransfer,
		timestamp: DateTime<Utc>,
	) -> Result<Option<TransferEvent>> {
		let wallet_text = wallet.to_string();
		let inbound = entry.to.as_deref() == Some(wallet_text.as_str());
		let outbound = entry.from == wallet_text;
		let kind = match (inbound, outbound) {
			(true, true) => TransferKind::Transfer,
			(true, false) => TransferKind::Deposit,
			(false, true) => TransferKind::Withdraw,
			(false, false) => return Ok(None),
		};

		let raw_value = entry
			.raw_contract
			.value
			.as_deref()
			.map(parse_hex_quantity)
			.transpose()?
			.unwrap_or_default();
		if raw_value.is_zero() {
			return Ok(None);
		}

		let (token, amount) = if entry.is_erc20() {
			let token: WalletAddress = entry
				.raw_contract
				.address
				.as_deref()
				.ok_or_else(|| anyhow!("erc20 transfer {} without contract", entry.unique_id))?
				.parse()
				.map_err(|e| anyhow!("bad token address in {}: {e}", entry.unique_id))?;
			let decimals = match entry.raw_contract.decimal.as_deref() {
				Some(decimal) => parse_hex_quantity(decimal)?.as_u64() as u8,
				None => rpc.token_decimals(wallet_to_h160(&token)).await?,
			};
			(token, format_units(raw_value, decimals))
		} else {
			(NATIVE_TOKEN_ADDRESS, format_units(raw_value, 18))
		};

		Ok(Some(TransferEvent {
			chain,
			kind,
			tx_hash: entry.hash.clone(),
			log_index: entry.log_index().unwrap_or(0),
			block_number: entry.block_number()?,
			timestamp,
			token,
			amount,
		}))
	}
}

fn parse_erc20_transfer(log: &ethers::types::Log) -> Option<Erc20Transfer> {
	let transfer_topic = H256::from_str(ERC20_TRANSFER_TOPIC).expect("static topic");
	if log.topics.first() != Some(&transfer_topic) ||
		log.topics.len() < 3 ||
		log.data.len() != 32
	{
		return None;
	}
	Some(Erc20Transfer {
		token: log.address,
		from: H160::from_slice(&log.topics[1].as_bytes()[12..]),
		to: H160::from_slice(&log.topics[2].as_bytes()[12..]),
		value: U256::from_big_endian(&log.data),
		log_index: log.log_index?.as_u64(),
	})
}

#[async_trait]
impl<Rpc: EvmRpcApi> SpotProviderApi for RpcDirectProvider<Rpc> {
	async fn get_trades_since(
		&self,
		wallet: &WalletAddress,
		since: SyncAnchor,
		chains: &[Chain],
		to_block: Option<u64>,
	) -> Result<TradesResult> {
		let mut trades = Vec::new();
		for chain in chains {
			let rpc = self.client(*chain)?;
			let head = match to_block {
				Some(head) => head,
				None => rpc.block_number().await?,
			};
			let from_block = self.resolve_anchor(rpc, since, head).await?;
			trades.extend(self.scan_window(rpc, *chain, wallet, from_block, head).await?.trades);
		}
		Ok(TradesResult { trades })
	}

	async fn get_transfer_history(
		&self,
		wallet: &WalletAddress,
		since: SyncAnchor,
		chains: &[Chain],
		to_block: Option<u64>,
	) -> Result<Vec<TransferEvent>> {
		let mut transfers = Vec::new();
		for chain in chains {
			let rpc = self.client(*chain)?;
			let head = match to_block {
				Some(head) => head,
				None => rpc.block_number().await?,
			};
			let from_block = self.resolve_anchor(rpc, since, head).await?;
			transfers
				.extend(self.scan_window(rpc, *chain, wallet, from_block, head).await?.transfers);
		}
		Ok(transfers)
	}

	async fn get_current_block(&self, chain: Chain) -> Result<u64> {
		self.client(chain)?.block_number().await
	}

	async fn get_token_balances(
		&self,
		wallet: &WalletAddress,
		chain: Chain,
	) -> Result<Vec<TokenBalance>> {
		self.client(chain)?.token_balances(wallet_to_h160(wallet)).await
	}

	async fn get_native_balance(&self, wallet: &WalletAddress, chain: Chain) -> Result<String> {
		self.client(chain)?.native_balance(wallet_to_h160(wallet)).await
	}

	async fn get_token_decimals(&self, token: &WalletAddress, chain: Chain) -> Result<u8> {
		self.client(chain)?.token_decimals(wallet_to_h160(token)).await
	}

	async fn get_token_symbol(
		&self,
		token: &WalletAddress,
		chain: Chain,
	) -> Result<Option<String>> {
		self.client(chain)?.token_symbol(wallet_to_h160(token)).await
	}

	async fn is_healthy(&self) -> bool {
		for client in self.clients.values() {
			if client.block_number().await.is_err() {
				return false;
			}
		}
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::evm::rpc::{MockEvmRpcApi, RawContract};
	use crate::providers::price::{MockPriceApi, PriceReport};
	use ethers::types::{Bytes, Log};
	use mockall::predicate::eq;

	const WALLET: &str = "0x70e7db0678460c5e53f1ffc9221d1c692111dcc5";
	const AERO: &str = "0x940181a94a35a4569e4529a3cdfb74e38fd98631";
	const USDC: &str = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913";
	const ROUTER: &str = "0xcf77a3ba9a5ca399b7c97c74d54e5b1beb874e43";
	const POOL: &str = "0xb2cc224c1c9fee385f8ad6a55b4d94e92359dc59";
	const TX: &str = "0x193e1f1f3f21d8fc1ff00d9b7cc42be53ef1aa2e1c3a013deed2b4a8977ce95b";

	fn wallet() -> WalletAddress {
		WALLET.parse().unwrap()
	}

	fn h160(address: &str) -> H160 {
		address.parse().unwrap()
	}

	fn h256_address(address: &str) -> H256 {
		let mut bytes = [0u8; 32];
		bytes[12..].copy_from_slice(h160(address).as_bytes());
		H256::from(bytes)
	}

	fn transfer_log(token: &str, from: &str, to: &str, value: U256, log_index: u64) -> Log {
		let mut data = [0u8; 32];
		value.to_big_endian(&mut data);
		Log {
			address: h160(token),
			topics: vec![
				H256::from_str(ERC20_TRANSFER_TOPIC).unwrap(),
				h256_address(from),
				h256_address(to),
			],
			data: Bytes::from(data.to_vec()),
			log_index: Some(log_index.into()),
			..Default::default()
		}
	}

	fn router_log(log_index: u64) -> Log {
		Log {
			address: h160(ROUTER),
			topics: vec![H256::from_low_u64_be(0xdead)],
			data: Bytes::default(),
			log_index: Some(log_index.into()),
			..Default::default()
		}
	}

	fn erc20_entry(token: &str, from: &str, to: &str, raw_value: U256, log_index: u64) -> AssetTransfer {
		AssetTransfer {
			unique_id: format!("{TX}:log:{log_index}"),
			category: "erc20".to_owned(),
			block_num: "0x64".to_owned(),
			hash: TX.to_owned(),
			from: from.to_owned(),
			to: Some(to.to_owned()),
			asset: None,
			raw_contract: RawContract {
				value: Some(format!("{raw_value:#x}")),
				address: Some(token.to_owned()),
				decimal: None,
			},
			metadata: Some(crate::evm::rpc::TransferMetadata {
				block_timestamp: Some("2025-06-01T00:00:00Z".parse().unwrap()),
			}),
		}
	}

	fn external_entry(from: &str, to: &str, raw_value: U256) -> AssetTransfer {
		AssetTransfer {
			unique_id: format!("{TX}:external"),
			category: "external".to_owned(),
			block_num: "0x64".to_owned(),
			hash: TX.to_owned(),
			from: from.to_owned(),
			to: Some(to.to_owned()),
			asset: Some("ETH".to_owned()),
			raw_contract: RawContract {
				value: Some(format!("{raw_value:#x}")),
				address: None,
				decimal: None,
			},
			metadata: Some(crate::evm::rpc::TransferMetadata {
				block_timestamp: Some("2025-06-01T00:00:00Z".parse().unwrap()),
			}),
		}
	}

	fn aerodrome_protocol() -> AllowedProtocol {
		AllowedProtocol {
			protocol: "aerodrome".to_owned(),
			chain: Chain::Base,
			router_address: Some(ROUTER.parse().unwrap()),
			swap_event_signature: None,
			factory_address: None,
		}
	}

	fn price_api_with_native_price() -> MockPriceApi {
		let mut price = MockPriceApi::new();
		price.expect_get_price().returning(|token, chain| {
			Ok(Some(PriceReport {
				token: *token,
				price: 3000.0,
				symbol: "ETH".to_owned(),
				timestamp: Utc::now(),
				chain,
			}))
		});
		price
	}

	fn provider_with(
		rpc: MockEvmRpcApi,
		protocols: Vec<AllowedProtocol>,
	) -> RpcDirectProvider<MockEvmRpcApi> {
		RpcDirectProvider::new(
			HashMap::from([(Chain::Base, rpc)]),
			protocols,
			Arc::new(price_api_with_native_price()),
		)
	}

	/// A transaction carrying a 0-value external contract call and an
	/// AERO→USDC swap must attribute AERO as the source leg, not the
	/// 0-value call.
	#[tokio::test]
	async fn swap_detection_orders_legs_by_log_index() {
		let mut rpc = MockEvmRpcApi::new();

		let aero_raw = U256::from_dec_str("106830000000000000000").unwrap();
		let usdc_raw = U256::from(69_820_000u64);

		rpc.expect_get_asset_transfers().returning(move |request| {
			if request.from_address.is_some() {
				Ok(vec![
					external_entry(WALLET, POOL, U256::zero()),
					erc20_entry(AERO, WALLET, POOL, aero_raw, 5),
				])
			} else {
				Ok(vec![erc20_entry(USDC, POOL, WALLET, usdc_raw, 9)])
			}
		});
		rpc.expect_transaction_receipt()
			.with(eq(H256::from_str(TX).unwrap()))
			.returning(move |_| {
				Ok(TransactionReceipt {
					logs: vec![
						router_log(3),
						transfer_log(AERO, WALLET, POOL, aero_raw, 5),
						transfer_log(USDC, POOL, WALLET, usdc_raw, 9),
					],
					gas_used: Some(U256::from(210_000u64)),
					effective_gas_price: Some(U256::from(1_000_000_000u64)),
					..Default::default()
				})
			});
		rpc.expect_token_decimals().with(eq(h160(AERO))).returning(|_| Ok(18));
		rpc.expect_token_decimals().with(eq(h160(USDC))).returning(|_| Ok(6));

		let provider = provider_with(rpc, vec![aerodrome_protocol()]);
		let result = provider
			.get_trades_since(&wallet(), SyncAnchor::Block(90), &[Chain::Base], Some(110))
			.await
			.unwrap();

		assert_eq!(result.trades.len(), 1);
		let trade = &result.trades[0];
		assert_eq!(trade.from_token.to_string(), AERO);
		assert_eq!(trade.to_token.to_string(), USDC);
		assert_eq!(trade.from_amount, "106.83");
		assert_eq!(trade.to_amount, "69.82");
		assert_eq!(trade.protocol.as_deref(), Some("aerodrome"));
		assert_eq!(trade.block_number, 100);
		assert_eq!(trade.log_index, 9);
		assert!(trade.gas_cost_usd.unwrap() > 0.0);
	}

	/// Native-input swap: `fromToken` is the native sentinel and
	/// `fromAmount` the transaction value.
	#[tokio::test]
	async fn native_input_swap_uses_sentinel() {
		let mut rpc = MockEvmRpcApi::new();
		let eth_in = U256::from_dec_str("1000000000000000000").unwrap();
		let usdc_raw = U256::from(3_000_000_000u64);

		rpc.expect_get_asset_transfers().returning(move |request| {
			if request.from_address.is_some() {
				Ok(vec![external_entry(WALLET, POOL, eth_in)])
			} else {
				Ok(vec![erc20_entry(USDC, POOL, WALLET, usdc_raw, 7)])
			}
		});
		rpc.expect_transaction_receipt().returning(move |_| {
			Ok(TransactionReceipt {
				logs: vec![router_log(2), transfer_log(USDC, POOL, WALLET, usdc_raw, 7)],
				..Default::default()
			})
		});
		rpc.expect_token_decimals().with(eq(h160(USDC))).returning(|_| Ok(6));

		let provider = provider_with(rpc, vec![aerodrome_protocol()]);
		let result = provider
			.get_trades_since(&wallet(), SyncAnchor::Block(90), &[Chain::Base], Some(110))
			.await
			.unwrap();

		assert_eq!(result.trades.len(), 1);
		let trade = &result.trades[0];
		assert_eq!(trade.from_token, NATIVE_TOKEN_ADDRESS);
		assert_eq!(trade.from_amount, "1");
		assert_eq!(trade.to_amount, "3000");
	}

	/// A transaction whose receipt matches no configured protocol is not a
	/// trade, and a swap's hash never shows up in transfer history.
	#[tokio::test]
	async fn transfer_history_excludes_swaps_and_unmatched_protocols_reject() {
		let usdc_raw = U256::from(50_000_000u64);

		let build_rpc = || {
			let mut rpc = MockEvmRpcApi::new();
			rpc.expect_get_asset_transfers().returning(move |request| {
				if request.from_address.is_some() {
					Ok(vec![])
				} else {
					Ok(vec![erc20_entry(USDC, POOL, WALLET, usdc_raw, 4)])
				}
			});
			rpc.expect_transaction_receipt().returning(move |_| {
				Ok(TransactionReceipt {
					logs: vec![transfer_log(USDC, POOL, WALLET, usdc_raw, 4)],
					..Default::default()
				})
			});
			rpc.expect_token_decimals().with(eq(h160(USDC))).returning(|_| Ok(6));
			rpc
		};

		// With a protocol filter that doesn't match, the deposit-like
		// pattern is not accepted as a trade...
		let provider = provider_with(build_rpc(), vec![aerodrome_protocol()]);
		let trades = provider
			.get_trades_since(&wallet(), SyncAnchor::Block(90), &[Chain::Base], Some(110))
			.await
			.unwrap();
		assert!(trades.trades.is_empty());

		// ...and surfaces as a transfer instead.
		let transfers = provider
			.get_transfer_history(&wallet(), SyncAnchor::Block(90), &[Chain::Base], Some(110))
			.await
			.unwrap();
		assert_eq!(transfers.len(), 1);
		assert_eq!(transfers[0].kind, TransferKind::Deposit);
		assert_eq!(transfers[0].amount, "50");
	}

	#[tokio::test]
	async fn timestamp_anchor_bisects_blocks() {
		let mut rpc = MockEvmRpcApi::new();
		// Block n has timestamp n * 10.
		rpc.expect_block_timestamp().returning(|block| {
			Ok(chrono::TimeZone::timestamp_opt(&Utc, block as i64 * 10, 0).unwrap())
		});
		rpc.expect_get_asset_transfers().returning(|_| Ok(vec![]));

		let provider = provider_with(rpc, vec![]);
		let anchor = chrono::TimeZone::timestamp_opt(&Utc, 500, 0).unwrap();
		let trades = provider
			.get_trades_since(&wallet(), SyncAnchor::Timestamp(anchor), &[Chain::Base], Some(100))
			.await
			.unwrap();
		assert!(trades.trades.is_empty());
	}
}
