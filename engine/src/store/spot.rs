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

//! Row accessors for the spot trade/transfer/balance journal and the
//! per-chain sync cursors.
//!
//! Trade and transfer inserts are keyed by `(tx_hash, log_index)` so the
//! cursor-overlap replay window re-inserts as a noop. Cursor advances are
//! monotonic in SQL, never in application code.

use crate::types::{AgentSyncState, SpotTransfer, TokenBalance, Trade};
use arena_primitives::{Chain, WalletAddress};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::str::FromStr;

/// A trade with both legs valued; nothing unpriced reaches this type.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedTrade {
	pub trade: Trade,
	pub from_amount_usd: f64,
	pub to_amount_usd: f64,
}

fn parse_decimal(text: &str) -> rusqlite::Result<Decimal> {
	Decimal::from_str(text).map_err(|e| {
		rusqlite::Error::FromSqlConversionFailure(
			0,
			rusqlite::types::Type::Text,
			Box::new(e),
		)
	})
}

fn blob_to_wallet(blob: Vec<u8>) -> rusqlite::Result<WalletAddress> {
	WalletAddress::try_from(blob.as_slice()).map_err(|e| {
		rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Blob, Box::new(e))
	})
}

/// Record trades and adjust the derived per-token balances, all against the
/// caller's transaction. Replayed trades (same uniqueness key) are skipped
/// without touching balances. Returns the number of newly inserted trades.
pub fn record_trades(
	conn: &Connection,
	competition_id: &str,
	agent_id: &str,
	trades: &[PricedTrade],
	now: DateTime<Utc>,
) -> rusqlite::Result<usize> {
	let mut inserted = 0usize;
	for priced in trades {
		let trade = &priced.trade;
		let changed = conn.execute(
			"INSERT INTO trades (competition_id, agent_id, chain, tx_hash, log_index,
				from_token, to_token, from_amount, to_amount, from_amount_usd, to_amount_usd,
				protocol, block_number, timestamp, gas_used, gas_price, gas_cost_usd)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
			 ON CONFLICT (agent_id, competition_id, tx_hash, log_index) DO NOTHING",
			params![
				competition_id,
				agent_id,
				trade.chain.as_str(),
				trade.tx_hash,
				trade.log_index as i64,
				trade.from_token.as_bytes().as_slice(),
				trade.to_token.as_bytes().as_slice(),
				trade.from_amount,
				trade.to_amount,
				priced.from_amount_usd,
				priced.to_amount_usd,
				trade.protocol,
				trade.block_number as i64,
				trade.timestamp,
				trade.gas_used,
				trade.gas_price,
				trade.gas_cost_usd
			],
		)?;
		if changed == 1 {
			inserted += 1;
			adjust_balance(
				conn,
				agent_id,
				competition_id,
				trade.chain,
				&trade.from_token,
				-parse_decimal(&trade.from_amount)?,
				now,
			)?;
			adjust_balance(
				conn,
				agent_id,
				competition_id,
				trade.chain,
				&trade.to_token,
				parse_decimal(&trade.to_amount)?,
				now,
			)?;
		}
	}
	Ok(inserted)
}

pub fn record_transfers(
	conn: &Connection,
	competition_id: &str,
	agent_id: &str,
	transfers: &[SpotTransfer],
) -> rusqlite::Result<usize> {
	let mut inserted = 0usize;
	for transfer in transfers {
		let event = &transfer.event;
		let changed = conn.execute(
			"INSERT INTO spot_live_transfers (competition_id, agent_id, chain, kind, tx_hash,
				log_index, token, symbol, amount, amount_usd, block_number, timestamp)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
			 ON CONFLICT (agent_id, tx_hash, log_index) DO NOTHING",
			params![
				competition_id,
				agent_id,
				event.chain.as_str(),
				event.kind.as_str(),
				event.tx_hash,
				event.log_index as i64,
				event.token.as_bytes().as_slice(),
				transfer.symbol,
				event.amount,
				transfer.amount_usd,
				event.block_number as i64,
				event.timestamp
			],
		)?;
		inserted += changed;
	}
	Ok(inserted)
}

fn adjust_balance(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
	chain: Chain,
	token: &WalletAddress,
	delta: Decimal,
	now: DateTime<Utc>,
) -> rusqlite::Result<()> {
	let existing: Option<String> = conn
		.query_row(
			"SELECT amount FROM spot_balances
			 WHERE agent_id = ?1 AND competition_id = ?2 AND chain = ?3 AND token = ?4",
			params![agent_id, competition_id, chain.as_str(), token.as_bytes().as_slice()],
			|row| row.get(0),
		)
		.optional()?;
	let amount = match existing {
		Some(text) => parse_decimal(&text)? + delta,
		None => delta,
	};
	conn.execute(
		"INSERT INTO spot_balances (agent_id, competition_id, chain, token, amount, updated_at)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
		 ON CONFLICT (agent_id, competition_id, chain, token) DO UPDATE
			 SET amount = excluded.amount, updated_at = excluded.updated_at",
		params![
			agent_id,
			competition_id,
			chain.as_str(),
			token.as_bytes().as_slice(),
			amount.to_string(),
			now
		],
	)?;
	Ok(())
}

pub fn has_any_balances(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
) -> rusqlite::Result<bool> {
	conn.query_row(
		"SELECT 1 FROM spot_balances WHERE agent_id = ?1 AND competition_id = ?2 LIMIT 1",
		params![agent_id, competition_id],
		|_| Ok(()),
	)
	.optional()
	.map(|row| row.is_some())
}

pub fn replace_balances(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
	chain: Chain,
	balances: &[TokenBalance],
	now: DateTime<Utc>,
) -> rusqlite::Result<()> {
	conn.execute(
		"DELETE FROM spot_balances
		 WHERE agent_id = ?1 AND competition_id = ?2 AND chain = ?3",
		params![agent_id, competition_id, chain.as_str()],
	)?;
	for balance in balances {
		conn.execute(
			"INSERT INTO spot_balances (agent_id, competition_id, chain, token, amount, updated_at)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
			params![
				agent_id,
				competition_id,
				chain.as_str(),
				balance.address.as_bytes().as_slice(),
				balance.balance,
				now
			],
		)?;
	}
	Ok(())
}

pub fn agent_balances(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
) -> rusqlite::Result<Vec<(Chain, TokenBalance)>> {
	let mut stmt = conn.prepare(
		"SELECT chain, token, amount FROM spot_balances
		 WHERE agent_id = ?1 AND competition_id = ?2 ORDER BY chain, token",
	)?;
	let rows = stmt.query_map(params![agent_id, competition_id], |row| {
		let chain: String = row.get(0)?;
		let token: Vec<u8> = row.get(1)?;
		Ok((chain, token, row.get::<_, String>(2)?))
	})?;
	rows.map(|row| {
		let (chain, token, amount) = row?;
		let chain = Chain::from_str(&chain).map_err(|e| {
			rusqlite::Error::FromSqlConversionFailure(
				0,
				rusqlite::types::Type::Text,
				Box::new(e),
			)
		})?;
		Ok((chain, TokenBalance { address: blob_to_wallet(token)?, balance: amount }))
	})
	.collect()
}

/// Timestamp of the agent's most recent recorded trade, if any.
pub fn latest_trade_activity(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
	conn.query_row(
		"SELECT MAX(timestamp) FROM trades WHERE agent_id = ?1 AND competition_id = ?2",
		params![agent_id, competition_id],
		|row| row.get(0),
	)
}

// ======= Sync cursors =======

pub fn get_sync_state(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
	chain: &str,
) -> rusqlite::Result<Option<AgentSyncState>> {
	conn.query_row(
		"SELECT last_trade_block, last_transfer_block, last_sync_at FROM agent_sync_state
		 WHERE agent_id = ?1 AND competition_id = ?2 AND chain = ?3",
		params![agent_id, competition_id, chain],
		|row| {
			Ok(AgentSyncState {
				last_trade_block: row.get::<_, Option<i64>>(0)?.map(|b| b as u64),
				last_transfer_block: row.get::<_, Option<i64>>(1)?.map(|b| b as u64),
				last_sync_at: row.get(2)?,
			})
		},
	)
	.optional()
}

/// Advance the trade cursor, monotonic non-decreasing.
pub fn advance_trade_cursor(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
	chain: &str,
	block: u64,
) -> rusqlite::Result<()> {
	conn.execute(
		"INSERT INTO agent_sync_state (agent_id, competition_id, chain, last_trade_block)
		 VALUES (?1, ?2, ?3, ?4)
		 ON CONFLICT (agent_id, competition_id, chain) DO UPDATE
			 SET last_trade_block = MAX(COALESCE(last_trade_block, 0), excluded.last_trade_block)",
		params![agent_id, competition_id, chain, block as i64],
	)?;
	Ok(())
}

/// Advance the transfer cursor, monotonic non-decreasing.
pub fn advance_transfer_cursor(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
	chain: &str,
	block: u64,
) -> rusqlite::Result<()> {
	conn.execute(
		"INSERT INTO agent_sync_state (agent_id, competition_id, chain, last_transfer_block)
		 VALUES (?1, ?2, ?3, ?4)
		 ON CONFLICT (agent_id, competition_id, chain) DO UPDATE
			 SET last_transfer_block =
				 MAX(COALESCE(last_transfer_block, 0), excluded.last_transfer_block)",
		params![agent_id, competition_id, chain, block as i64],
	)?;
	Ok(())
}

pub fn touch_last_sync(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
	chain: &str,
	now: DateTime<Utc>,
) -> rusqlite::Result<()> {
	conn.execute(
		"INSERT INTO agent_sync_state (agent_id, competition_id, chain, last_sync_at)
		 VALUES (?1, ?2, ?3, ?4)
		 ON CONFLICT (agent_id, competition_id, chain) DO UPDATE
			 SET last_sync_at = excluded.last_sync_at",
		params![agent_id, competition_id, chain, now],
	)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::Database;

	fn test_trade(tx_hash: &str, log_index: u64, block: u64) -> PricedTrade {
		PricedTrade {
			trade: Trade {
				chain: Chain::Base,
				tx_hash: tx_hash.to_owned(),
				log_index,
				block_number: block,
				timestamp: Utc::now(),
				from_token: "0x940181a94a35a4569e4529a3cdfb74e38fd98631"
					.parse()
					.unwrap(),
				to_token: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".parse().unwrap(),
				from_amount: "106.83".to_owned(),
				to_amount: "69.82".to_owned(),
				protocol: Some("aerodrome".to_owned()),
				gas_used: Some("210000".to_owned()),
				gas_price: Some("1000000".to_owned()),
				gas_cost_usd: Some(0.01),
			},
			from_amount_usd: 69.9,
			to_amount_usd: 69.82,
		}
	}

	#[tokio::test]
	async fn trade_replay_is_idempotent_and_balances_adjust_once() {
		let db = Database::open_in_memory().unwrap();
		let trades = vec![test_trade("0xabc", 3, 100)];

		for _ in 0..3 {
			let trades = trades.clone();
			db.with_write_tx::<_, rusqlite::Error, _>(move |tx| {
				record_trades(tx, "c1", "a1", &trades, Utc::now())
			})
			.await
			.unwrap();
		}

		let balances = db
			.with_conn::<_, rusqlite::Error, _>(|conn| agent_balances(conn, "a1", "c1"))
			.await
			.unwrap();
		// Two balance rows: the sold token went negative, the bought token
		// positive, each adjusted exactly once despite the replays.
		assert_eq!(balances.len(), 2);
		let sold = balances
			.iter()
			.find(|(_, b)| b.address.to_string().starts_with("0x9401"))
			.unwrap();
		assert_eq!(sold.1.balance, "-106.83");
		let bought = balances
			.iter()
			.find(|(_, b)| b.address.to_string().starts_with("0x8335"))
			.unwrap();
		assert_eq!(bought.1.balance, "69.82");
	}

	#[tokio::test]
	async fn cursors_are_monotonic() {
		let db = Database::open_in_memory().unwrap();
		db.with_write_tx::<_, rusqlite::Error, _>(|tx| {
			advance_trade_cursor(tx, "a1", "c1", "base", 100)?;
			advance_trade_cursor(tx, "a1", "c1", "base", 90)?;
			advance_transfer_cursor(tx, "a1", "c1", "base", 50)?;
			Ok(())
		})
		.await
		.unwrap();

		let state = db
			.with_conn::<_, rusqlite::Error, _>(|conn| {
				get_sync_state(conn, "a1", "c1", "base")
			})
			.await
			.unwrap()
			.unwrap();
		assert_eq!(state.last_trade_block, Some(100));
		assert_eq!(state.last_transfer_block, Some(50));
	}
}
