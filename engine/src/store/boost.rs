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

//! Row accessors for the boost ledger tables. These are deliberately dumb:
//! invariant enforcement and arithmetic live in the ledger, which calls
//! these inside one transaction per operation.

use arena_primitives::WalletAddress;
use chrono::{DateTime, Utc};
use num_bigint::{BigInt, BigUint};
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceRow {
	pub id: i64,
	pub user_id: String,
	pub competition_id: String,
	pub balance: BigUint,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentTotalRow {
	pub id: i64,
	pub total: BigUint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BonusRow {
	pub id: i64,
	pub user_id: String,
	pub amount: BigUint,
	pub expires_at: Option<DateTime<Utc>>,
	pub is_active: bool,
	pub revoked_at: Option<DateTime<Utc>>,
}

pub fn decimal_to_biguint(text: &str) -> rusqlite::Result<BigUint> {
	BigUint::parse_bytes(text.as_bytes(), 10).ok_or_else(|| {
		rusqlite::Error::FromSqlConversionFailure(
			0,
			rusqlite::types::Type::Text,
			Box::<dyn std::error::Error + Send + Sync>::from(format!(
				"non-decimal unsigned amount: {text}"
			)),
		)
	})
}

pub fn decimal_to_bigint(text: &str) -> rusqlite::Result<BigInt> {
	BigInt::parse_bytes(text.as_bytes(), 10).ok_or_else(|| {
		rusqlite::Error::FromSqlConversionFailure(
			0,
			rusqlite::types::Type::Text,
			Box::<dyn std::error::Error + Send + Sync>::from(format!(
				"non-decimal signed amount: {text}"
			)),
		)
	})
}

fn blob_to_wallet(blob: Vec<u8>) -> rusqlite::Result<WalletAddress> {
	WalletAddress::try_from(blob.as_slice()).map_err(|e| {
		rusqlite::Error::FromSqlConversionFailure(
			0,
			rusqlite::types::Type::Blob,
			Box::new(e),
		)
	})
}

fn balance_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BalanceRow> {
	let balance: String = row.get(3)?;
	Ok(BalanceRow {
		id: row.get(0)?,
		user_id: row.get(1)?,
		competition_id: row.get(2)?,
		balance: decimal_to_biguint(&balance)?,
		updated_at: row.get(4)?,
	})
}

/// Insert-or-lookup of the `(user, competition)` balance. The caller's
/// `IMMEDIATE` transaction is what serializes concurrent creators.
pub fn ensure_balance(
	conn: &Connection,
	user_id: &str,
	competition_id: &str,
	now: DateTime<Utc>,
) -> rusqlite::Result<BalanceRow> {
	conn.execute(
		"INSERT INTO boost_balances (user_id, competition_id, balance, updated_at)
		 VALUES (?1, ?2, '0', ?3)
		 ON CONFLICT (user_id, competition_id) DO NOTHING",
		params![user_id, competition_id, now],
	)?;
	conn.query_row(
		"SELECT id, user_id, competition_id, balance, updated_at FROM boost_balances
		 WHERE user_id = ?1 AND competition_id = ?2",
		params![user_id, competition_id],
		balance_from_row,
	)
}

pub fn get_balance(
	conn: &Connection,
	user_id: &str,
	competition_id: &str,
) -> rusqlite::Result<Option<BalanceRow>> {
	conn.query_row(
		"SELECT id, user_id, competition_id, balance, updated_at FROM boost_balances
		 WHERE user_id = ?1 AND competition_id = ?2",
		params![user_id, competition_id],
		balance_from_row,
	)
	.optional()
}

pub fn balances_of_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<BalanceRow>> {
	let mut stmt = conn.prepare(
		"SELECT id, user_id, competition_id, balance, updated_at FROM boost_balances
		 WHERE user_id = ?1 ORDER BY competition_id",
	)?;
	let rows = stmt.query_map(params![user_id], balance_from_row)?;
	rows.collect()
}

pub fn set_balance(
	conn: &Connection,
	balance_id: i64,
	balance: &BigUint,
	now: DateTime<Utc>,
) -> rusqlite::Result<()> {
	conn.execute(
		"UPDATE boost_balances SET balance = ?2, updated_at = ?3 WHERE id = ?1",
		params![balance_id, balance.to_str_radix(10), now],
	)?;
	Ok(())
}

/// Insert a journal row unless one with this `(balance_id, idem_key)`
/// already exists. Returns the new change id, or `None` on the duplicate.
pub fn insert_change_if_absent(
	conn: &Connection,
	balance_id: i64,
	wallet: &WalletAddress,
	delta: &BigInt,
	meta_json: &str,
	idem_key: &[u8],
	now: DateTime<Utc>,
) -> rusqlite::Result<Option<i64>> {
	let inserted = conn.execute(
		"INSERT INTO boost_changes (balance_id, wallet, delta_amount, meta, idem_key, created_at)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
		 ON CONFLICT (balance_id, idem_key) DO NOTHING",
		params![
			balance_id,
			wallet.as_bytes().as_slice(),
			delta.to_str_radix(10),
			meta_json,
			idem_key,
			now
		],
	)?;
	Ok((inserted == 1).then(|| conn.last_insert_rowid()))
}

pub fn find_change(
	conn: &Connection,
	balance_id: i64,
	idem_key: &[u8],
) -> rusqlite::Result<Option<i64>> {
	conn.query_row(
		"SELECT id FROM boost_changes WHERE balance_id = ?1 AND idem_key = ?2",
		params![balance_id, idem_key],
		|row| row.get(0),
	)
	.optional()
}

/// All journal deltas of one balance, for exact big-integer summation.
pub fn change_deltas(conn: &Connection, balance_id: i64) -> rusqlite::Result<Vec<BigInt>> {
	let mut stmt =
		conn.prepare("SELECT delta_amount FROM boost_changes WHERE balance_id = ?1")?;
	let rows = stmt.query_map(params![balance_id], |row| row.get::<_, String>(0))?;
	rows.map(|text| decimal_to_bigint(&text?)).collect()
}

/// Point every journal row of `from_balance` at `to_balance`. Journal rows
/// are never deleted; merges only move them.
pub fn reassign_changes(
	conn: &Connection,
	from_balance: i64,
	to_balance: i64,
) -> rusqlite::Result<usize> {
	conn.execute(
		"UPDATE boost_changes SET balance_id = ?2 WHERE balance_id = ?1",
		params![from_balance, to_balance],
	)
}

pub fn get_agent_total(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
) -> rusqlite::Result<Option<AgentTotalRow>> {
	conn.query_row(
		"SELECT id, total FROM agent_boost_totals WHERE agent_id = ?1 AND competition_id = ?2",
		params![agent_id, competition_id],
		|row| {
			let total: String = row.get(1)?;
			Ok(AgentTotalRow { id: row.get(0)?, total: decimal_to_biguint(&total)? })
		},
	)
	.optional()
}

/// Upsert the per-agent total: insert at `amount` or accumulate onto the
/// existing row. Returns the row id and the total after the write.
pub fn accumulate_agent_total(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
	amount: &BigUint,
	now: DateTime<Utc>,
) -> rusqlite::Result<AgentTotalRow> {
	match get_agent_total(conn, agent_id, competition_id)? {
		Some(existing) => {
			let total = existing.total + amount;
			conn.execute(
				"UPDATE agent_boost_totals SET total = ?2, updated_at = ?3 WHERE id = ?1",
				params![existing.id, total.to_str_radix(10), now],
			)?;
			Ok(AgentTotalRow { id: existing.id, total })
		},
		None => {
			conn.execute(
				"INSERT INTO agent_boost_totals (agent_id, competition_id, total, updated_at)
				 VALUES (?1, ?2, ?3, ?4)",
				params![agent_id, competition_id, amount.to_str_radix(10), now],
			)?;
			Ok(AgentTotalRow { id: conn.last_insert_rowid(), total: amount.clone() })
		},
	}
}

pub fn insert_agent_boost(
	conn: &Connection,
	agent_boost_total_id: i64,
	change_id: i64,
) -> rusqlite::Result<i64> {
	conn.execute(
		"INSERT INTO agent_boosts (agent_boost_total_id, change_id) VALUES (?1, ?2)",
		params![agent_boost_total_id, change_id],
	)?;
	Ok(conn.last_insert_rowid())
}

/// Per-competition debit deltas of one user's balances, for the positive
/// user-totals view.
pub fn debit_deltas_by_competition(
	conn: &Connection,
	user_id: &str,
) -> rusqlite::Result<Vec<(String, BigInt)>> {
	let mut stmt = conn.prepare(
		"SELECT b.competition_id, c.delta_amount
		 FROM boost_changes c JOIN boost_balances b ON c.balance_id = b.id
		 WHERE b.user_id = ?1 AND c.delta_amount LIKE '-%'",
	)?;
	let rows = stmt.query_map(params![user_id], |row| {
		Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
	})?;
	rows.map(|row| {
		let (competition_id, delta) = row?;
		Ok((competition_id, decimal_to_bigint(&delta)?))
	})
	.collect()
}

// ======= Boost bonuses =======

#[allow(clippy::too_many_arguments)]
pub fn insert_bonus(
	conn: &Connection,
	user_id: &str,
	amount: &BigUint,
	expires_at: Option<DateTime<Utc>>,
	meta_json: Option<&str>,
	created_by_admin_id: &str,
	now: DateTime<Utc>,
) -> rusqlite::Result<i64> {
	conn.execute(
		"INSERT INTO boost_bonus (user_id, amount, expires_at, is_active, meta, created_by_admin_id, created_at)
		 VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)",
		params![user_id, amount.to_str_radix(10), expires_at, meta_json, created_by_admin_id, now],
	)?;
	Ok(conn.last_insert_rowid())
}

pub fn get_bonus(conn: &Connection, bonus_id: i64) -> rusqlite::Result<Option<BonusRow>> {
	conn.query_row(
		"SELECT id, user_id, amount, expires_at, is_active, revoked_at FROM boost_bonus
		 WHERE id = ?1",
		params![bonus_id],
		|row| {
			let amount: String = row.get(2)?;
			Ok(BonusRow {
				id: row.get(0)?,
				user_id: row.get(1)?,
				amount: decimal_to_biguint(&amount)?,
				expires_at: row.get(3)?,
				is_active: row.get(4)?,
				revoked_at: row.get(5)?,
			})
		},
	)
	.optional()
}

/// Deactivate a bonus. Returns false when it was already revoked or absent.
pub fn revoke_bonus(
	conn: &Connection,
	bonus_id: i64,
	now: DateTime<Utc>,
) -> rusqlite::Result<bool> {
	let updated = conn.execute(
		"UPDATE boost_bonus SET is_active = 0, revoked_at = ?2 WHERE id = ?1 AND is_active = 1",
		params![bonus_id, now],
	)?;
	Ok(updated == 1)
}

// ======= Stake awards =======

pub fn award_exists(
	conn: &Connection,
	stake_id: &str,
	competition_id: &str,
) -> rusqlite::Result<bool> {
	conn.query_row(
		"SELECT 1 FROM stake_boost_awards WHERE stake_id = ?1 AND competition_id = ?2",
		params![stake_id, competition_id],
		|_| Ok(()),
	)
	.optional()
	.map(|row| row.is_some())
}

pub fn insert_award(
	conn: &Connection,
	stake_id: &str,
	competition_id: &str,
	change_id: Option<i64>,
	now: DateTime<Utc>,
) -> rusqlite::Result<()> {
	conn.execute(
		"INSERT INTO stake_boost_awards (stake_id, competition_id, change_id, created_at)
		 VALUES (?1, ?2, ?3, ?4)",
		params![stake_id, competition_id, change_id, now],
	)?;
	Ok(())
}

pub fn active_stakes_for_wallet(
	conn: &Connection,
	wallet: &WalletAddress,
) -> rusqlite::Result<Vec<crate::types::Stake>> {
	let mut stmt = conn.prepare(
		"SELECT id, user_id, wallet, amount, staked_at, unstaked_at FROM stakes
		 WHERE wallet = ?1 AND unstaked_at IS NULL ORDER BY id",
	)?;
	let rows = stmt.query_map(params![wallet.as_bytes().as_slice()], |row| {
		let wallet_blob: Vec<u8> = row.get(2)?;
		let amount: String = row.get(3)?;
		Ok(crate::types::Stake {
			id: row.get(0)?,
			user_id: row.get(1)?,
			wallet: blob_to_wallet(wallet_blob)?,
			amount: decimal_to_biguint(&amount)?,
			staked_at: row.get(4)?,
			unstaked_at: row.get(5)?,
		})
	})?;
	rows.collect()
}

pub fn insert_stake(conn: &Connection, stake: &crate::types::Stake) -> rusqlite::Result<()> {
	conn.execute(
		"INSERT INTO stakes (id, user_id, wallet, amount, staked_at, unstaked_at)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
		params![
			stake.id,
			stake.user_id,
			stake.wallet.as_bytes().as_slice(),
			stake.amount.to_str_radix(10),
			stake.staked_at,
			stake.unstaked_at
		],
	)?;
	Ok(())
}
