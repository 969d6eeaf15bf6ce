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

//! Row accessors for the competition/agent registry.

use crate::types::{
	Agent, AgentCompetitionStatus, Competition, CompetitionConfig, CompetitionKind,
	CompetitionStatus,
};
use arena_primitives::WalletAddress;
use rusqlite::{params, Connection, OptionalExtension};

fn kind_from_str(s: &str) -> rusqlite::Result<CompetitionKind> {
	match s {
		"spot_live_trading" => Ok(CompetitionKind::SpotLiveTrading),
		"perpetual_futures" => Ok(CompetitionKind::PerpetualFutures),
		other => Err(rusqlite::Error::FromSqlConversionFailure(
			0,
			rusqlite::types::Type::Text,
			Box::<dyn std::error::Error + Send + Sync>::from(format!(
				"unknown competition kind: {other}"
			)),
		)),
	}
}

fn status_from_str(s: &str) -> rusqlite::Result<CompetitionStatus> {
	match s {
		"pending" => Ok(CompetitionStatus::Pending),
		"active" => Ok(CompetitionStatus::Active),
		"ended" => Ok(CompetitionStatus::Ended),
		other => Err(rusqlite::Error::FromSqlConversionFailure(
			0,
			rusqlite::types::Type::Text,
			Box::<dyn std::error::Error + Send + Sync>::from(format!(
				"unknown competition status: {other}"
			)),
		)),
	}
}

fn competition_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Competition> {
	let kind: String = row.get(2)?;
	let status: String = row.get(3)?;
	Ok(Competition {
		id: row.get(0)?,
		name: row.get(1)?,
		kind: kind_from_str(&kind)?,
		status: status_from_str(&status)?,
		start_date: row.get(4)?,
		end_date: row.get(5)?,
		boost_start: row.get(6)?,
		boost_end: row.get(7)?,
	})
}

const COMPETITION_COLUMNS: &str =
	"id, name, kind, status, start_date, end_date, boost_start, boost_end";

pub fn get_competition(
	conn: &Connection,
	competition_id: &str,
) -> rusqlite::Result<Option<Competition>> {
	conn.query_row(
		&format!("SELECT {COMPETITION_COLUMNS} FROM competitions WHERE id = ?1"),
		params![competition_id],
		competition_from_row,
	)
	.optional()
}

pub fn competitions_with_status(
	conn: &Connection,
	status: CompetitionStatus,
) -> rusqlite::Result<Vec<Competition>> {
	let status = match status {
		CompetitionStatus::Pending => "pending",
		CompetitionStatus::Active => "active",
		CompetitionStatus::Ended => "ended",
	};
	let mut stmt = conn.prepare(&format!(
		"SELECT {COMPETITION_COLUMNS} FROM competitions WHERE status = ?1 ORDER BY id"
	))?;
	let rows = stmt.query_map(params![status], competition_from_row)?;
	rows.collect()
}

pub fn insert_competition(conn: &Connection, competition: &Competition) -> rusqlite::Result<()> {
	conn.execute(
		"INSERT INTO competitions (id, name, kind, status, start_date, end_date, boost_start, boost_end)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
		params![
			competition.id,
			competition.name,
			competition.kind.as_str(),
			match competition.status {
				CompetitionStatus::Pending => "pending",
				CompetitionStatus::Active => "active",
				CompetitionStatus::Ended => "ended",
			},
			competition.start_date,
			competition.end_date,
			competition.boost_start,
			competition.boost_end
		],
	)?;
	Ok(())
}

pub fn get_config(
	conn: &Connection,
	competition_id: &str,
) -> rusqlite::Result<Option<CompetitionConfig>> {
	let document: Option<String> = conn
		.query_row(
			"SELECT config FROM competition_configs WHERE competition_id = ?1",
			params![competition_id],
			|row| row.get(0),
		)
		.optional()?;
	document
		.map(|document| {
			serde_json::from_str(&document).map_err(|e| {
				rusqlite::Error::FromSqlConversionFailure(
					0,
					rusqlite::types::Type::Text,
					Box::new(e),
				)
			})
		})
		.transpose()
}

pub fn put_config(
	conn: &Connection,
	competition_id: &str,
	config: &CompetitionConfig,
) -> rusqlite::Result<()> {
	let document = serde_json::to_string(config).expect("config serialization is infallible");
	conn.execute(
		"INSERT INTO competition_configs (competition_id, config) VALUES (?1, ?2)
		 ON CONFLICT (competition_id) DO UPDATE SET config = excluded.config",
		params![competition_id, document],
	)?;
	Ok(())
}

fn agent_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
	let wallet: Option<Vec<u8>> = row.get(2)?;
	Ok(Agent {
		id: row.get(0)?,
		owner_user_id: row.get(1)?,
		wallet: wallet
			.map(|blob| {
				WalletAddress::try_from(blob.as_slice()).map_err(|e| {
					rusqlite::Error::FromSqlConversionFailure(
						0,
						rusqlite::types::Type::Blob,
						Box::new(e),
					)
				})
			})
			.transpose()?,
	})
}

/// Agents participating in a competition that have not been disqualified.
pub fn active_agents(conn: &Connection, competition_id: &str) -> rusqlite::Result<Vec<Agent>> {
	let mut stmt = conn.prepare(
		"SELECT a.id, a.owner_user_id, a.wallet
		 FROM agents a JOIN competition_agents ca ON ca.agent_id = a.id
		 WHERE ca.competition_id = ?1 AND ca.status = 'active'
		 ORDER BY a.id",
	)?;
	let rows = stmt.query_map(params![competition_id], agent_from_row)?;
	rows.collect()
}

pub fn insert_agent(conn: &Connection, agent: &Agent) -> rusqlite::Result<()> {
	conn.execute(
		"INSERT INTO agents (id, owner_user_id, wallet) VALUES (?1, ?2, ?3)",
		params![
			agent.id,
			agent.owner_user_id,
			agent.wallet.as_ref().map(|w| w.as_bytes().to_vec())
		],
	)?;
	Ok(())
}

pub fn enroll_agent(
	conn: &Connection,
	competition_id: &str,
	agent_id: &str,
) -> rusqlite::Result<()> {
	conn.execute(
		"INSERT INTO competition_agents (competition_id, agent_id, status) VALUES (?1, ?2, 'active')
		 ON CONFLICT (competition_id, agent_id) DO NOTHING",
		params![competition_id, agent_id],
	)?;
	Ok(())
}

pub fn set_agent_status(
	conn: &Connection,
	competition_id: &str,
	agent_id: &str,
	status: AgentCompetitionStatus,
	reason: Option<&str>,
) -> rusqlite::Result<()> {
	conn.execute(
		"UPDATE competition_agents SET status = ?3, disqualification_reason = ?4
		 WHERE competition_id = ?1 AND agent_id = ?2",
		params![
			competition_id,
			agent_id,
			match status {
				AgentCompetitionStatus::Active => "active",
				AgentCompetitionStatus::Disqualified => "disqualified",
			},
			reason
		],
	)?;
	Ok(())
}

pub fn agent_status(
	conn: &Connection,
	competition_id: &str,
	agent_id: &str,
) -> rusqlite::Result<Option<(AgentCompetitionStatus, Option<String>)>> {
	conn.query_row(
		"SELECT status, disqualification_reason FROM competition_agents
		 WHERE competition_id = ?1 AND agent_id = ?2",
		params![competition_id, agent_id],
		|row| {
			let status: String = row.get(0)?;
			let status = match status.as_str() {
				"disqualified" => AgentCompetitionStatus::Disqualified,
				_ => AgentCompetitionStatus::Active,
			};
			Ok((status, row.get(1)?))
		},
	)
	.optional()
}
