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

//! Stake-derived and no-stake boost issuance.
//!
//! Awards are exactly-once per `(stake, competition)`: the award row and the
//! derived-key credit commit in one transaction, so a crash replays cleanly
//! and a re-run finds either both or neither. Like the rest of the ledger
//! these operations are policy-free; sanctions screening belongs to the
//! issuance layer that calls them.

use super::{credit_in_tx, BoostLedger, ChangeMeta, CreditOutcome, LedgerError};
use crate::{store::boost, store::registry, types::CompetitionStatus};
use arena_primitives::{IdemKey, WalletAddress};
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Zero;

#[derive(Debug, Clone, PartialEq)]
pub struct StakeAward {
	pub stake_id: String,
	pub competition_id: String,
	pub amount: BigUint,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StakeAwardOutcome {
	pub awards: Vec<StakeAward>,
}

/// Credit earned by a stake: the full stake amount scaled by how much of the
/// competition's boost window remains. Before the window it is the full
/// amount; after it, nothing.
pub fn stake_award_amount(
	stake_amount: &BigUint,
	boost_start: DateTime<Utc>,
	boost_end: DateTime<Utc>,
	now: DateTime<Utc>,
) -> BigUint {
	let total_secs = (boost_end - boost_start).num_seconds();
	if total_secs <= 0 || now >= boost_end {
		return BigUint::zero();
	}
	if now <= boost_start {
		return stake_amount.clone();
	}
	let remaining_secs = (boost_end - now).num_seconds();
	stake_amount * BigUint::from(remaining_secs as u64) / BigUint::from(total_secs as u64)
}

impl BoostLedger {
	/// Award boosts for every active stake of `wallet` across the given
	/// boosting competitions, skipping `(stake, competition)` pairs that
	/// already produced one.
	pub async fn award_for_stake(
		&self,
		wallet: &WalletAddress,
		competition_ids: &[String],
	) -> Result<StakeAwardOutcome, LedgerError> {
		self.database()
			.with_write_tx(move |tx| {
				let now = Utc::now();
				let mut outcome = StakeAwardOutcome::default();

				for competition_id in competition_ids {
					let Some(competition) = registry::get_competition(tx, competition_id)?
					else {
						tracing::warn!(
							"Skipping stake award for unknown competition {competition_id}"
						);
						continue
					};
					let (Some(boost_start), Some(boost_end)) =
						(competition.boost_start, competition.boost_end)
					else {
						continue
					};

					for stake in boost::active_stakes_for_wallet(tx, wallet)? {
						if boost::award_exists(tx, &stake.id, competition_id)? {
							continue
						}
						let amount =
							stake_award_amount(&stake.amount, boost_start, boost_end, now);
						if amount.is_zero() {
							continue
						}

						let credited = credit_in_tx(
							tx,
							&stake.user_id,
							wallet,
							competition_id,
							&amount,
							&ChangeMeta::described(format!("stake award for {}", stake.id)),
							Some(IdemKey::derive(&format!(
								"competition={competition_id}|reason=stakeAward|stake={}",
								stake.id
							))),
						)?;
						let change_id = match credited {
							CreditOutcome::Applied { change_id, .. } => Some(change_id),
							CreditOutcome::Noop { .. } => None,
						};
						boost::insert_award(tx, &stake.id, competition_id, change_id, now)?;
						outcome.awards.push(StakeAward {
							stake_id: stake.id,
							competition_id: competition_id.clone(),
							amount,
						});
					}
				}
				Ok(outcome)
			})
			.await
	}

	/// Seed a stakeless user with the configured starter boost in every open
	/// boosting competition. Replays collapse via the derived key.
	pub async fn init_no_stake(
		&self,
		user_id: &str,
		wallet: &WalletAddress,
	) -> Result<Vec<(String, CreditOutcome)>, LedgerError> {
		self.database()
			.with_write_tx(move |tx| {
				let now = Utc::now();
				let mut outcomes = Vec::new();

				let mut competitions =
					registry::competitions_with_status(tx, CompetitionStatus::Active)?;
				competitions.extend(registry::competitions_with_status(
					tx,
					CompetitionStatus::Pending,
				)?);

				for competition in
					competitions.into_iter().filter(|c| c.boost_window_open(now))
				{
					let Some(config) = registry::get_config(tx, &competition.id)? else {
						continue
					};
					let amount = BigUint::from(config.boost.no_stake_boost_amount);
					if amount.is_zero() {
						continue
					}

					let outcome = credit_in_tx(
						tx,
						user_id,
						wallet,
						&competition.id,
						&amount,
						&ChangeMeta::described("no-stake starter boost"),
						Some(IdemKey::derive(&format!(
							"competition={}|reason=initNoStake|user={user_id}",
							competition.id
						))),
					)?;
					outcomes.push((competition.id, outcome));
				}
				Ok(outcomes)
			})
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{Duration, TimeZone};

	fn amount(n: u64) -> BigUint {
		BigUint::from(n)
	}

	#[test]
	fn full_amount_before_window() {
		let start = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
		let end = start + Duration::days(30);
		assert_eq!(
			stake_award_amount(&amount(1000), start, end, start - Duration::days(1)),
			amount(1000)
		);
	}

	#[test]
	fn nothing_after_window() {
		let start = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
		let end = start + Duration::days(30);
		assert_eq!(stake_award_amount(&amount(1000), start, end, end), amount(0));
		assert_eq!(
			stake_award_amount(&amount(1000), start, end, end + Duration::days(5)),
			amount(0)
		);
	}

	#[test]
	fn scales_linearly_inside_window() {
		let start = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
		let end = start + Duration::days(30);
		// Three quarters of the window remain.
		assert_eq!(
			stake_award_amount(&amount(1000), start, end, start + Duration::days(7) + Duration::hours(12)),
			amount(750)
		);
	}

	#[test]
	fn degenerate_window_awards_nothing() {
		let start = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
		assert_eq!(stake_award_amount(&amount(1000), start, start, start), amount(0));
	}
}
