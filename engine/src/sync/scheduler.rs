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

//! Interval scheduler for per-competition sync ticks.
//!
//! One polling loop checks which active competitions are due and spawns a
//! tick per competition. A per-competition mutex prevents overlapping ticks;
//! a tick that overruns its deadline is cancelled between per-agent calls
//! (transactions in flight still commit or roll back whole).

use crate::{
	constants::COMPETITION_TICK_DEADLINE,
	store::{registry, Database},
	sync::{perps::PerpsSyncService, spot::SpotSyncService},
	types::{CompetitionKind, CompetitionStatus},
};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{watch, Mutex};

const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

fn is_due(
	last_run: Option<DateTime<Utc>>,
	interval_minutes: u64,
	now: DateTime<Utc>,
) -> bool {
	match last_run {
		None => true,
		Some(last_run) => now - last_run >= Duration::minutes(interval_minutes as i64),
	}
}

pub struct SyncScheduler {
	db: Database,
	spot: SpotSyncService,
	perps: PerpsSyncService,
	last_runs: Mutex<HashMap<String, DateTime<Utc>>>,
	in_flight: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SyncScheduler {
	pub fn new(db: Database, spot: SpotSyncService, perps: PerpsSyncService) -> Self {
		Self {
			db,
			spot,
			perps,
			last_runs: Mutex::new(HashMap::new()),
			in_flight: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// Initial sync when a competition opens: one tick with monitoring
	/// suppressed, so bootstrap snapshots cannot disqualify anyone.
	pub async fn run_initial_sync(&self, competition_id: &str) -> Result<()> {
		let Some(competition) = self
			.db
			.with_conn::<_, rusqlite::Error, _>(|conn| {
				registry::get_competition(conn, competition_id)
			})
			.await?
		else {
			tracing::error!("Initial sync requested for unknown competition {competition_id}");
			return Ok(());
		};
		match competition.kind {
			CompetitionKind::SpotLiveTrading => {
				let outcome =
					self.spot.process_spot_live_competition(competition_id, true).await?;
				tracing::info!(
					"Initial sync of {competition_id}: {} succeeded, {} failed",
					outcome.successful.len(),
					outcome.failed.len()
				);
			},
			CompetitionKind::PerpetualFutures => {
				let outcome = self.perps.process_perps_competition(competition_id).await?;
				tracing::info!(
					"Initial sync of {competition_id}: {} succeeded, {} failed",
					outcome.successful.len(),
					outcome.failed.len()
				);
			},
		}
		self.last_runs.lock().await.insert(competition_id.to_owned(), Utc::now());
		Ok(())
	}

	/// Main loop. Returns when `shutdown` flips to true; ticks already in
	/// flight run to completion.
	pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
		let mut poll = tokio::time::interval(POLL_INTERVAL);
		poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = poll.tick() => {
					if let Err(error) = self.clone().dispatch_due().await {
						tracing::error!("Scheduler dispatch failed: {error:#}");
					}
				},
				result = shutdown.changed() => {
					if result.is_err() || *shutdown.borrow() {
						tracing::info!("Scheduler shutting down");
						return Ok(());
					}
				},
			}
		}
	}

	async fn dispatch_due(self: Arc<Self>) -> Result<()> {
		let now = Utc::now();
		let competitions = self
			.db
			.with_conn::<_, rusqlite::Error, _>(|conn| {
				registry::competitions_with_status(conn, CompetitionStatus::Active)
			})
			.await?;

		for competition in competitions {
			let Some(config) = self
				.db
				.with_conn::<_, rusqlite::Error, _>(|conn| {
					registry::get_config(conn, &competition.id)
				})
				.await?
			else {
				continue
			};

			let due = {
				let last_runs = self.last_runs.lock().await;
				is_due(last_runs.get(&competition.id).copied(), config.sync_interval_minutes, now)
			};
			if !due {
				continue
			}
			self.last_runs.lock().await.insert(competition.id.clone(), now);

			let scheduler = self.clone();
			let competition_id = competition.id.clone();
			let kind = competition.kind;
			tokio::spawn(async move {
				scheduler.tick(competition_id, kind).await;
			});
		}
		Ok(())
	}

	async fn tick(self: Arc<Self>, competition_id: String, kind: CompetitionKind) {
		let lock = {
			let mut in_flight = self.in_flight.lock().await;
			in_flight.entry(competition_id.clone()).or_default().clone()
		};
		let Ok(_guard) = lock.try_lock() else {
			tracing::warn!("Tick for {competition_id} still running; skipping overlap");
			return;
		};

		let work = async {
			match kind {
				CompetitionKind::SpotLiveTrading =>
					self.spot.process_spot_live_competition(&competition_id, false).await,
				CompetitionKind::PerpetualFutures =>
					self.perps.process_perps_competition(&competition_id).await,
			}
		};

		match tokio::time::timeout(COMPETITION_TICK_DEADLINE, work).await {
			Err(_) => {
				tracing::error!(
					"Tick for {competition_id} exceeded {COMPETITION_TICK_DEADLINE:?}; cancelled"
				);
			},
			Ok(Err(error)) => {
				tracing::error!("Tick for {competition_id} failed: {error:#}");
			},
			Ok(Ok(outcome)) => {
				tracing::info!(
					"Tick for {competition_id}: {} agents succeeded, {} failed",
					outcome.successful.len(),
					outcome.failed.len()
				);
			},
		}
	}
}
