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

//! Calmar and Sortino ratios over the snapshot series.
//!
//! The heavy lifting is one SQL aggregation pass
//! ([`crate::store::metrics::return_aggregates`]); this layer applies the
//! capping rules, preserves whichever companion family it is not updating,
//! and persists 8-decimal canonical strings.

use crate::store::{
	metrics::{self, ReturnAggregates},
	Database,
};
use crate::types::RiskMetrics;
use anyhow::Result;
use chrono::Utc;

/// Minimum acceptable return for Sortino; flat by policy.
const MAR: f64 = 0.0;

/// Cap applied when a ratio's denominator vanishes.
const RATIO_CAP: f64 = 100.0;

const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0;

#[derive(Clone)]
pub struct RiskMetricsService {
	db: Database,
}

fn format_ratio(value: f64) -> String {
	format!("{value:.8}")
}

fn capped_ratio(numerator: f64, denominator: f64) -> f64 {
	if denominator == 0.0 {
		if numerator > 0.0 {
			RATIO_CAP
		} else if numerator < 0.0 {
			-RATIO_CAP
		} else {
			0.0
		}
	} else {
		numerator / denominator
	}
}

pub fn sortino_from(aggregates: &ReturnAggregates) -> f64 {
	capped_ratio(aggregates.avg_return - MAR, aggregates.downside_deviation)
}

pub fn calmar_from(aggregates: &ReturnAggregates) -> f64 {
	capped_ratio(aggregates.simple_return, aggregates.max_drawdown.abs())
}

pub fn annualized_return(aggregates: &ReturnAggregates) -> f64 {
	let elapsed =
		(aggregates.last_timestamp - aggregates.first_timestamp).num_seconds() as f64;
	if elapsed <= 0.0 {
		return 0.0;
	}
	let growth = 1.0 + aggregates.simple_return;
	if growth <= 0.0 {
		return -1.0;
	}
	growth.powf(SECONDS_PER_YEAR / elapsed) - 1.0
}

impl RiskMetricsService {
	pub fn new(db: Database) -> Self {
		Self { db }
	}

	/// Recompute the Sortino family, preserving the stored Calmar family.
	/// Returns `None` when fewer than two snapshots exist.
	pub async fn update_sortino(
		&self,
		agent_id: &str,
		competition_id: &str,
	) -> Result<Option<RiskMetrics>> {
		self.update(agent_id, competition_id, true, false).await
	}

	/// Recompute the Calmar family, preserving the stored Sortino family.
	pub async fn update_calmar(
		&self,
		agent_id: &str,
		competition_id: &str,
	) -> Result<Option<RiskMetrics>> {
		self.update(agent_id, competition_id, false, true).await
	}

	pub async fn update_all(
		&self,
		agent_id: &str,
		competition_id: &str,
	) -> Result<Option<RiskMetrics>> {
		self.update(agent_id, competition_id, true, true).await
	}

	async fn update(
		&self,
		agent_id: &str,
		competition_id: &str,
		sortino: bool,
		calmar: bool,
	) -> Result<Option<RiskMetrics>> {
		let metrics = self
			.db
			.with_write_tx::<_, rusqlite::Error, _>(move |tx| {
				let Some(aggregates) = metrics::return_aggregates(tx, agent_id, competition_id)?
				else {
					return Ok(None)
				};
				if aggregates.snapshot_count < 2 {
					return Ok(None);
				}

				let existing = metrics::get_risk_metrics(tx, agent_id, competition_id)?;
				let companion = |field: fn(&RiskMetrics) -> String, default: f64| {
					existing
						.as_ref()
						.map(field)
						.unwrap_or_else(|| format_ratio(default))
				};

				let updated = RiskMetrics {
					sortino_ratio: if sortino {
						format_ratio(sortino_from(&aggregates))
					} else {
						companion(|m| m.sortino_ratio.clone(), 0.0)
					},
					downside_deviation: if sortino {
						format_ratio(aggregates.downside_deviation)
					} else {
						companion(|m| m.downside_deviation.clone(), 0.0)
					},
					calmar_ratio: if calmar {
						format_ratio(calmar_from(&aggregates))
					} else {
						companion(|m| m.calmar_ratio.clone(), 0.0)
					},
					max_drawdown: if calmar {
						format_ratio(aggregates.max_drawdown)
					} else {
						companion(|m| m.max_drawdown.clone(), 0.0)
					},
					simple_return: format_ratio(aggregates.simple_return),
					annualized_return: format_ratio(annualized_return(&aggregates)),
					snapshot_count: aggregates.snapshot_count,
					calculation_timestamp: Utc::now(),
				};
				metrics::upsert_risk_metrics(tx, agent_id, competition_id, &updated)?;
				Ok(Some(updated))
			})
			.await?;
		Ok(metrics)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::PortfolioSnapshot;
	use chrono::TimeZone;

	fn aggregates(
		avg_return: f64,
		downside_deviation: f64,
		simple_return: f64,
		max_drawdown: f64,
	) -> ReturnAggregates {
		ReturnAggregates {
			snapshot_count: 3,
			avg_return,
			downside_deviation,
			simple_return,
			max_drawdown,
			first_timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
			last_timestamp: Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap(),
		}
	}

	#[test]
	fn sortino_caps_on_zero_downside() {
		assert_eq!(format_ratio(sortino_from(&aggregates(0.05, 0.0, 0.1, 0.0))), "100.00000000");
		assert_eq!(
			format_ratio(sortino_from(&aggregates(-0.01, 0.0, -0.02, -0.02))),
			"-100.00000000"
		);
		assert_eq!(format_ratio(sortino_from(&aggregates(0.0, 0.0, 0.0, 0.0))), "0.00000000");
		assert!((sortino_from(&aggregates(0.05, 0.02, 0.1, 0.0)) - 2.5).abs() < 1e-9);
	}

	#[test]
	fn calmar_caps_on_zero_drawdown() {
		assert_eq!(format_ratio(calmar_from(&aggregates(0.0, 0.0, 0.21, 0.0))), "100.00000000");
		assert_eq!(
			format_ratio(calmar_from(&aggregates(0.0, 0.0, -0.1, 0.0))),
			"-100.00000000"
		);
		assert!((calmar_from(&aggregates(0.0, 0.0, 0.3, -0.2)) - 1.5).abs() < 1e-9);
	}

	#[test]
	fn annualized_return_handles_degenerate_windows() {
		let mut a = aggregates(0.0, 0.0, 0.1, 0.0);
		a.last_timestamp = a.first_timestamp;
		assert_eq!(annualized_return(&a), 0.0);
		let a = aggregates(0.0, 0.0, -1.5, -1.0);
		assert_eq!(annualized_return(&a), -1.0);
	}

	async fn seed_series(db: &Database, values: &[f64]) {
		for (i, value) in values.iter().enumerate() {
			let snapshot = PortfolioSnapshot {
				agent_id: "a1".into(),
				competition_id: "c1".into(),
				timestamp: Utc.with_ymd_and_hms(2025, 1, 1 + i as u32, 0, 0, 0).unwrap(),
				total_value: *value,
			};
			db.with_write_tx::<_, rusqlite::Error, _>(move |tx| {
				metrics::insert_snapshot(tx, &snapshot)
			})
			.await
			.unwrap();
		}
	}

	#[tokio::test]
	async fn persists_capped_sortino_for_monotonic_growth() {
		let db = Database::open_in_memory().unwrap();
		// Two +5% steps: zero downside deviation, positive average return.
		seed_series(&db, &[100.0, 105.0, 110.25]).await;

		let service = RiskMetricsService::new(db);
		let metrics = service.update_sortino("a1", "c1").await.unwrap().unwrap();

		assert_eq!(metrics.sortino_ratio, "100.00000000");
		assert_eq!(metrics.downside_deviation, "0.00000000");
		assert_eq!(metrics.snapshot_count, 3);
		// The Calmar family was not recomputed; it fell back to defaults.
		assert_eq!(metrics.calmar_ratio, "0.00000000");
	}

	#[tokio::test]
	async fn preserves_companion_family_on_partial_update() {
		let db = Database::open_in_memory().unwrap();
		seed_series(&db, &[100.0, 90.0, 120.0]).await;

		let service = RiskMetricsService::new(db);
		let after_calmar = service.update_calmar("a1", "c1").await.unwrap().unwrap();
		let after_sortino = service.update_sortino("a1", "c1").await.unwrap().unwrap();

		// The Sortino pass kept the Calmar family computed before it.
		assert_eq!(after_sortino.calmar_ratio, after_calmar.calmar_ratio);
		assert_eq!(after_sortino.max_drawdown, after_calmar.max_drawdown);
		assert_ne!(after_sortino.sortino_ratio, "0.00000000");
	}

	#[tokio::test]
	async fn single_snapshot_is_not_enough() {
		let db = Database::open_in_memory().unwrap();
		seed_series(&db, &[100.0]).await;
		let service = RiskMetricsService::new(db);
		assert!(service.update_all("a1", "c1").await.unwrap().is_none());
	}
}
