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

//! Schema creation, gated by `PRAGMA user_version`.
//!
//! Balance-like columns are decimal TEXT (arbitrary precision; arithmetic
//! happens in Rust over big integers). The `NOT LIKE '-%'` checks reject
//! negative writes at the storage layer. Wallet and token addresses are
//! 20-byte BLOBs in canonical lowercase form.

use rusqlite::Connection;

const V1: &str = "
CREATE TABLE boost_balances (
	id INTEGER PRIMARY KEY,
	user_id TEXT NOT NULL,
	competition_id TEXT NOT NULL,
	balance TEXT NOT NULL CHECK (balance NOT LIKE '-%'),
	updated_at TEXT NOT NULL,
	UNIQUE (user_id, competition_id)
);

CREATE TABLE boost_changes (
	id INTEGER PRIMARY KEY,
	balance_id INTEGER NOT NULL REFERENCES boost_balances (id),
	wallet BLOB NOT NULL CHECK (length(wallet) = 20),
	delta_amount TEXT NOT NULL,
	meta TEXT NOT NULL,
	idem_key BLOB NOT NULL CHECK (length(idem_key) BETWEEN 1 AND 256),
	created_at TEXT NOT NULL,
	UNIQUE (balance_id, idem_key)
);

CREATE TABLE agent_boost_totals (
	id INTEGER PRIMARY KEY,
	agent_id TEXT NOT NULL,
	competition_id TEXT NOT NULL,
	total TEXT NOT NULL CHECK (total NOT LIKE '-%'),
	updated_at TEXT NOT NULL,
	UNIQUE (agent_id, competition_id)
);

CREATE TABLE agent_boosts (
	id INTEGER PRIMARY KEY,
	agent_boost_total_id INTEGER NOT NULL REFERENCES agent_boost_totals (id),
	change_id INTEGER NOT NULL REFERENCES boost_changes (id),
	UNIQUE (change_id)
);

CREATE TABLE boost_bonus (
	id INTEGER PRIMARY KEY,
	user_id TEXT NOT NULL,
	amount TEXT NOT NULL CHECK (amount NOT LIKE '-%'),
	expires_at TEXT,
	is_active INTEGER NOT NULL DEFAULT 1,
	revoked_at TEXT,
	meta TEXT,
	created_by_admin_id TEXT NOT NULL,
	created_at TEXT NOT NULL
);

CREATE TABLE stake_boost_awards (
	stake_id TEXT NOT NULL,
	competition_id TEXT NOT NULL,
	change_id INTEGER REFERENCES boost_changes (id),
	created_at TEXT NOT NULL,
	UNIQUE (stake_id, competition_id)
);

CREATE TABLE stakes (
	id TEXT PRIMARY KEY,
	user_id TEXT NOT NULL,
	wallet BLOB NOT NULL CHECK (length(wallet) = 20),
	amount TEXT NOT NULL CHECK (amount NOT LIKE '-%'),
	staked_at TEXT NOT NULL,
	unstaked_at TEXT
);

CREATE TABLE competitions (
	id TEXT PRIMARY KEY,
	name TEXT NOT NULL,
	kind TEXT NOT NULL,
	status TEXT NOT NULL,
	start_date TEXT,
	end_date TEXT,
	boost_start TEXT,
	boost_end TEXT
);

CREATE TABLE competition_configs (
	competition_id TEXT PRIMARY KEY REFERENCES competitions (id),
	config TEXT NOT NULL
);

CREATE TABLE agents (
	id TEXT PRIMARY KEY,
	owner_user_id TEXT,
	wallet BLOB CHECK (wallet IS NULL OR length(wallet) = 20)
);

CREATE TABLE competition_agents (
	competition_id TEXT NOT NULL REFERENCES competitions (id),
	agent_id TEXT NOT NULL REFERENCES agents (id),
	status TEXT NOT NULL DEFAULT 'active',
	disqualification_reason TEXT,
	PRIMARY KEY (competition_id, agent_id)
);

CREATE TABLE trades (
	id INTEGER PRIMARY KEY,
	competition_id TEXT NOT NULL,
	agent_id TEXT NOT NULL,
	chain TEXT NOT NULL,
	tx_hash TEXT NOT NULL,
	log_index INTEGER NOT NULL,
	from_token BLOB NOT NULL,
	to_token BLOB NOT NULL,
	from_amount TEXT NOT NULL,
	to_amount TEXT NOT NULL,
	from_amount_usd REAL,
	to_amount_usd REAL,
	protocol TEXT,
	block_number INTEGER NOT NULL,
	timestamp TEXT NOT NULL,
	gas_used TEXT,
	gas_price TEXT,
	gas_cost_usd REAL,
	UNIQUE (agent_id, competition_id, tx_hash, log_index)
);

CREATE TABLE spot_live_transfers (
	id INTEGER PRIMARY KEY,
	competition_id TEXT NOT NULL,
	agent_id TEXT NOT NULL,
	chain TEXT NOT NULL,
	kind TEXT NOT NULL,
	tx_hash TEXT NOT NULL,
	log_index INTEGER NOT NULL,
	token BLOB NOT NULL,
	symbol TEXT NOT NULL,
	amount TEXT NOT NULL,
	amount_usd REAL,
	block_number INTEGER NOT NULL,
	timestamp TEXT NOT NULL,
	UNIQUE (agent_id, tx_hash, log_index)
);

CREATE TABLE spot_balances (
	agent_id TEXT NOT NULL,
	competition_id TEXT NOT NULL,
	chain TEXT NOT NULL,
	token BLOB NOT NULL,
	amount TEXT NOT NULL,
	updated_at TEXT NOT NULL,
	PRIMARY KEY (agent_id, competition_id, chain, token)
);

CREATE TABLE perps_positions (
	id INTEGER PRIMARY KEY,
	competition_id TEXT NOT NULL,
	agent_id TEXT NOT NULL,
	provider_position_id TEXT NOT NULL,
	asset TEXT NOT NULL,
	is_long INTEGER NOT NULL,
	size TEXT NOT NULL,
	entry_price TEXT,
	current_price TEXT,
	pnl TEXT NOT NULL,
	status TEXT NOT NULL,
	created_at TEXT NOT NULL,
	last_updated_at TEXT NOT NULL,
	UNIQUE (agent_id, competition_id, provider_position_id)
);

CREATE TABLE perps_account_summaries (
	id INTEGER PRIMARY KEY,
	competition_id TEXT NOT NULL,
	agent_id TEXT NOT NULL,
	timestamp TEXT NOT NULL,
	total_equity TEXT NOT NULL,
	available_balance TEXT NOT NULL,
	unrealized_pnl TEXT NOT NULL,
	realized_pnl TEXT NOT NULL,
	total_volume TEXT NOT NULL,
	open_position_count INTEGER NOT NULL,
	total_trade_count INTEGER NOT NULL,
	roi TEXT NOT NULL,
	account_status TEXT NOT NULL
);

CREATE TABLE agent_sync_state (
	agent_id TEXT NOT NULL,
	competition_id TEXT NOT NULL,
	chain TEXT NOT NULL,
	last_trade_block INTEGER,
	last_transfer_block INTEGER,
	last_sync_at TEXT,
	PRIMARY KEY (agent_id, competition_id, chain)
);

CREATE TABLE portfolio_snapshots (
	id INTEGER PRIMARY KEY,
	agent_id TEXT NOT NULL,
	competition_id TEXT NOT NULL,
	timestamp TEXT NOT NULL,
	total_value REAL NOT NULL
);

CREATE INDEX idx_portfolio_snapshots_agent
	ON portfolio_snapshots (agent_id, competition_id, timestamp);

CREATE TABLE perps_risk_metrics (
	agent_id TEXT NOT NULL,
	competition_id TEXT NOT NULL,
	calmar_ratio TEXT NOT NULL,
	sortino_ratio TEXT NOT NULL,
	max_drawdown TEXT NOT NULL,
	annualized_return TEXT NOT NULL,
	simple_return TEXT NOT NULL,
	downside_deviation TEXT NOT NULL,
	snapshot_count INTEGER NOT NULL,
	calculation_timestamp TEXT NOT NULL,
	PRIMARY KEY (agent_id, competition_id)
);

CREATE TABLE sanctioned_wallets (
	address BLOB PRIMARY KEY CHECK (length(address) = 20)
);
";

pub fn migrate(conn: &mut Connection) -> rusqlite::Result<()> {
	let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
	if version < 1 {
		let tx = conn.transaction()?;
		tx.execute_batch(V1)?;
		tx.pragma_update(None, "user_version", 1)?;
		tx.commit()?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn migrates_fresh_database() {
		let mut conn = Connection::open_in_memory().unwrap();
		migrate(&mut conn).unwrap();
		migrate(&mut conn).unwrap();

		let tables: i64 = conn
			.query_row(
				"SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
				[],
				|row| row.get(0),
			)
			.unwrap();
		assert!(tables >= 18);
	}

	#[test]
	fn negative_balance_writes_are_rejected() {
		let mut conn = Connection::open_in_memory().unwrap();
		migrate(&mut conn).unwrap();

		let result = conn.execute(
			"INSERT INTO boost_balances (user_id, competition_id, balance, updated_at)
			 VALUES ('u1', 'c1', '-5', '2025-01-01T00:00:00Z')",
			[],
		);
		assert!(result.is_err());
	}
}
