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

//! Portfolio snapshots and the SQL-side return aggregations feeding the
//! risk-metric computations.

use crate::types::{PortfolioSnapshot, RiskMetrics};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

pub fn insert_snapshot(conn: &Connection, snapshot: &PortfolioSnapshot) -> rusqlite::Result<()> {
	conn.execute(
		"INSERT INTO portfolio_snapshots (agent_id, competition_id, timestamp, total_value)
		 VALUES (?1, ?2, ?3, ?4)",
		params![
			snapshot.agent_id,
			snapshot.competition_id,
			snapshot.timestamp,
			snapshot.total_value
		],
	)?;
	Ok(())
}

pub fn snapshot_count(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
) -> rusqlite::Result<i64> {
	conn.query_row(
		"SELECT COUNT(*) FROM portfolio_snapshots
		 WHERE agent_id = ?1 AND competition_id = ?2",
		params![agent_id, competition_id],
		|row| row.get(0),
	)
}

pub fn snapshot_count_before(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
	cutoff: DateTime<Utc>,
) -> rusqlite::Result<i64> {
	conn.query_row(
		"SELECT COUNT(*) FROM portfolio_snapshots
		 WHERE agent_id = ?1 AND competition_id = ?2 AND timestamp < ?3",
		params![agent_id, competition_id, cutoff],
		|row| row.get(0),
	)
}

pub fn latest_snapshot(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
) -> rusqlite::Result<Option<PortfolioSnapshot>> {
	conn.query_row(
		"SELECT agent_id, competition_id, timestamp, total_value FROM portfolio_snapshots
		 WHERE agent_id = ?1 AND competition_id = ?2
		 ORDER BY timestamp DESC, id DESC LIMIT 1",
		params![agent_id, competition_id],
		|row| {
			Ok(PortfolioSnapshot {
				agent_id: row.get(0)?,
				competition_id: row.get(1)?,
				timestamp: row.get(2)?,
				total_value: row.get(3)?,
			})
		},
	)
	.optional()
}

/// Everything the risk-metric formulas need, produced by one aggregation
/// pass over the snapshot series. Returns are snapshot-over-snapshot;
/// drawdowns are measured against the running maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnAggregates {
	pub snapshot_count: i64,
	pub avg_return: f64,
	pub downside_deviation: f64,
	pub simple_return: f64,
	/// Most negative peak-to-trough return; zero or negative.
	pub max_drawdown: f64,
	pub first_timestamp: DateTime<Utc>,
	pub last_timestamp: DateTime<Utc>,
}

pub fn return_aggregates(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
) -> rusqlite::Result<Option<ReturnAggregates>> {
	conn.query_row(
		"WITH snaps AS (
			SELECT id, timestamp, total_value,
				LAG(total_value) OVER (ORDER BY timestamp, id) AS prev_value,
				MAX(total_value) OVER (
					ORDER BY timestamp, id
					ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW
				) AS running_max
			FROM portfolio_snapshots
			WHERE agent_id = ?1 AND competition_id = ?2
		),
		returns AS (
			SELECT
				CASE WHEN prev_value IS NULL OR prev_value = 0.0 THEN NULL
					ELSE total_value / prev_value - 1.0 END AS r,
				CASE WHEN running_max = 0.0 THEN NULL
					ELSE total_value / running_max - 1.0 END AS dd
			FROM snaps
		)
		SELECT
			(SELECT COUNT(*) FROM snaps) AS snapshot_count,
			COALESCE(AVG(r), 0.0) AS avg_return,
			COALESCE(sqrt(AVG(CASE WHEN r < 0.0 THEN r * r ELSE 0.0 END)), 0.0)
				AS downside_deviation,
			COALESCE(
				(SELECT s_last.total_value / NULLIF(s_first.total_value, 0.0) - 1.0
				 FROM
					(SELECT total_value FROM snaps ORDER BY timestamp, id LIMIT 1) s_first,
					(SELECT total_value FROM snaps ORDER BY timestamp DESC, id DESC LIMIT 1)
						s_last),
				0.0) AS simple_return,
			COALESCE((SELECT MIN(dd) FROM returns), 0.0) AS max_drawdown,
			(SELECT MIN(timestamp) FROM snaps) AS first_timestamp,
			(SELECT MAX(timestamp) FROM snaps) AS last_timestamp
		FROM returns
		WHERE r IS NOT NULL",
		params![agent_id, competition_id],
		|row| {
			let first_timestamp: Option<DateTime<Utc>> = row.get(5)?;
			let last_timestamp: Option<DateTime<Utc>> = row.get(6)?;
			Ok(match (first_timestamp, last_timestamp) {
				(Some(first_timestamp), Some(last_timestamp)) => Some(ReturnAggregates {
					snapshot_count: row.get(0)?,
					avg_return: row.get(1)?,
					downside_deviation: row.get(2)?,
					simple_return: row.get(3)?,
					max_drawdown: row.get(4)?,
					first_timestamp,
					last_timestamp,
				}),
				_ => None,
			})
		},
	)
}

pub fn get_risk_metrics(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
) -> rusqlite::Result<Option<RiskMetrics>> {
	conn.query_row(
		"SELECT calmar_ratio, sortino_ratio, max_drawdown, annualized_return, simple_return,
			downside_deviation, snapshot_count, calculation_timestamp
		 FROM perps_risk_metrics WHERE agent_id = ?1 AND competition_id = ?2",
		params![agent_id, competition_id],
		|row| {
			Ok(RiskMetrics {
				calmar_ratio: row.get(0)?,
				sortino_ratio: row.get(1)?,
				max_drawdown: row.get(2)?,
				annualized_return: row.get(3)?,
				simple_return: row.get(4)?,
				downside_deviation: row.get(5)?,
				snapshot_count: row.get(6)?,
				calculation_timestamp: row.get(7)?,
			})
		},
	)
	.optional()
}

pub fn upsert_risk_metrics(
	conn: &Connection,
	agent_id: &str,
	competition_id: &str,
	metrics: &RiskMetrics,
) -> rusqlite::Result<()> {
	conn.execute(
		"INSERT INTO perps_risk_metrics (agent_id, competition_id, calmar_ratio, sortino_ratio,
			max_drawdown, annualized_return, simple_return, downside_deviation, snapshot_count,
			calculation_timestamp)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
		 ON CONFLICT (agent_id, competition_id) DO UPDATE SET
			calmar_ratio = excluded.calmar_ratio,
			sortino_ratio = excluded.sortino_ratio,
			max_drawdown = excluded.max_drawdown,
			annualized_return = excluded.annualized_return,
			simple_return = excluded.simple_return,
			downside_deviation = excluded.downside_deviation,
			snapshot_count = excluded.snapshot_count,
			calculation_timestamp = excluded.calculation_timestamp",
		params![
			agent_id,
			competition_id,
			metrics.calmar_ratio,
			metrics.sortino_ratio,
			metrics.max_drawdown,
			metrics.annualized_return,
			metrics.simple_return,
			metrics.downside_deviation,
			metrics.snapshot_count,
			metrics.calculation_timestamp
		],
	)?;
	Ok(())
}
