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

//! Row accessors for perps positions and account summaries.

use crate::types::{PerpsAccountSummary, PerpsPosition, PositionStatus};
use rusqlite::{params, Connection, OptionalExtension};

/// Persist one agent's sync cycle: upsert every position and append the
/// account summary, all against the caller's transaction.
pub fn submit_agent_sync(
	conn: &Connection,
	competition_id: &str,
	agent_id: &str,
	positions: &[PerpsPosition],
	summary: &PerpsAccountSummary,
) -> rusqlite::Result<()> {
	for position in positions {
		upsert_position(conn, competition_id, agent_id, position)?;
	}
	conn.execute(
		"INSERT INTO perps_account_summaries (competition_id, agent_id, timestamp,
			total_equity, available_balance, unrealized_pnl, realized_pnl, total_volume,
			open_position_count, total_trade_count, roi, account_status)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
		params![
			competition_id,
			agent_id,
			summary.timestamp,
			summary.total_equity,
			summary.available_balance,
			summary.unrealized_pnl,
			summary.realized_pnl,
			summary.total_volume,
			summary.open_position_count,
			summary.total_trade_count,
			summary.roi,
			summary.account_status
		],
	)?;
	Ok(())
}

fn upsert_position(
	conn: &Connection,
	competition_id: &str,
	agent_id: &str,
	position: &PerpsPosition,
) -> rusqlite::Result<()> {
	conn.execute(
		"INSERT INTO perps_positions (competition_id, agent_id, provider_position_id, asset,
			is_long, size, entry_price, current_price, pnl, status, created_at, last_updated_at)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
		 ON CONFLICT (agent_id, competition_id, provider_position_id) DO UPDATE SET
			size = excluded.size,
			entry_price = excluded.entry_price,
			current_price = excluded.current_price,
			pnl = excluded.pnl,
			status = excluded.status,
			last_updated_at = excluded.last_updated_at",
		params![
			competition_id,
			agent_id,
			position.provider_position_id,
			position.asset,
			position.is_long,
			position.size,
			position.entry_price,
			position.current_price,
			position.pnl,
			position.status.as_str(),
			position.created_at,
			position.last_updated_at
		],
	)?;
	Ok(())
}

pub fn get_position(
	conn: &Connection,
	competition_id: &str,
	agent_id: &str,
	provider_position_id: &str,
) -> rusqlite::Result<Option<PerpsPosition>> {
	conn.query_row(
		"SELECT provider_position_id, asset, is_long, size, entry_price, current_price, pnl,
			status, created_at, last_updated_at
		 FROM perps_positions
		 WHERE competition_id = ?1 AND agent_id = ?2 AND provider_position_id = ?3",
		params![competition_id, agent_id, provider_position_id],
		|row| {
			let status: String = row.get(7)?;
			Ok(PerpsPosition {
				provider_position_id: row.get(0)?,
				asset: row.get(1)?,
				is_long: row.get(2)?,
				size: row.get(3)?,
				entry_price: row.get(4)?,
				current_price: row.get(5)?,
				pnl: row.get(6)?,
				status: match status.as_str() {
					"closed" => PositionStatus::Closed,
					"liquidated" => PositionStatus::Liquidated,
					_ => PositionStatus::Open,
				},
				created_at: row.get(8)?,
				last_updated_at: row.get(9)?,
			})
		},
	)
	.optional()
}

pub fn summary_count(
	conn: &Connection,
	competition_id: &str,
	agent_id: &str,
) -> rusqlite::Result<i64> {
	conn.query_row(
		"SELECT COUNT(*) FROM perps_account_summaries
		 WHERE competition_id = ?1 AND agent_id = ?2",
		params![competition_id, agent_id],
		|row| row.get(0),
	)
}
