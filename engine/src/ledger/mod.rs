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

//! The boost ledger: append-only double-entry accounting for per-user,
//! per-competition boost balances.
//!
//! Exactly-once semantics rest on the `(balance_id, idem_key)` uniqueness of
//! journal rows; balances are only ever mutated alongside a journal insert
//! in the same transaction. Every operation has a `*_in_tx` form that
//! participates in an ambient transaction, and an async wrapper that opens
//! its own. The ledger is policy-free: sanctions screening happens at the
//! call sites, never here.

mod stake;

pub use stake::{stake_award_amount, StakeAward, StakeAwardOutcome};

use crate::store::{boost, Database};
use arena_primitives::{IdemKey, WalletAddress};
use chrono::Utc;
use num_bigint::{BigInt, BigUint};
use num_traits::Zero;
use rusqlite::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("invalid amount: {0}")]
	InvalidAmount(String),
	#[error("no boost balance for user {user_id} in competition {competition_id}")]
	NoBalance { user_id: String, competition_id: String },
	#[error("insufficient funds: balance {balance}, requested {requested}")]
	InsufficientFunds { balance: BigUint, requested: BigUint },
	#[error("bonus {0} is not claimable")]
	BonusNotClaimable(i64),
	#[error("storage corruption: {0}")]
	StorageCorruption(String),
	#[error(transparent)]
	Storage(#[from] rusqlite::Error),
}

/// Open journal-row metadata. Unknown fields survive a round trip through
/// the flattened map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeMeta {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub boost_bonus_id: Option<String>,
	#[serde(flatten)]
	pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChangeMeta {
	pub fn described(description: impl Into<String>) -> Self {
		Self { description: Some(description.into()), ..Default::default() }
	}

	fn to_json(&self) -> Result<String, LedgerError> {
		serde_json::to_string(self)
			.map_err(|e| LedgerError::StorageCorruption(format!("meta serialization: {e}")))
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreditOutcome {
	Applied { change_id: i64, balance_after: BigUint, idem_key: IdemKey },
	Noop { balance: BigUint, idem_key: IdemKey },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DebitOutcome {
	Applied { change_id: i64, balance_after: BigUint, idem_key: IdemKey },
	Noop { balance: BigUint, idem_key: IdemKey },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoostAgentOutcome {
	Applied { agent_boost_id: i64, change_id: i64, total: BigUint },
	Noop { total: BigUint },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
	pub merged_balances: usize,
	pub moved_changes: usize,
}

/// Add `amount` to the `(user, competition)` balance, creating it lazily.
/// A repeated key is a [`CreditOutcome::Noop`] that leaves the balance
/// untouched. Zero-amount credits are allowed and journal once.
pub fn credit_in_tx(
	tx: &Transaction,
	user_id: &str,
	wallet: &WalletAddress,
	competition_id: &str,
	amount: &BigUint,
	meta: &ChangeMeta,
	idem_key: Option<IdemKey>,
) -> Result<CreditOutcome, LedgerError> {
	let idem_key = idem_key.unwrap_or_else(IdemKey::random);
	let now = Utc::now();

	let balance = boost::ensure_balance(tx, user_id, competition_id, now).map_err(|e| match e {
		rusqlite::Error::QueryReturnedNoRows =>
			LedgerError::StorageCorruption("balance row missing after upsert".to_owned()),
		e => e.into(),
	})?;

	match boost::insert_change_if_absent(
		tx,
		balance.id,
		wallet,
		&BigInt::from(amount.clone()),
		&meta.to_json()?,
		idem_key.as_slice(),
		now,
	)? {
		Some(change_id) => {
			let balance_after = &balance.balance + amount;
			boost::set_balance(tx, balance.id, &balance_after, now)?;
			Ok(CreditOutcome::Applied { change_id, balance_after, idem_key })
		},
		None => Ok(CreditOutcome::Noop { balance: balance.balance, idem_key }),
	}
}

/// Subtract `amount > 0` from an existing balance. The funds check runs
/// before the duplicate check, so a replay against a drained balance reports
/// [`LedgerError::InsufficientFunds`] rather than a misleading noop.
pub fn debit_in_tx(
	tx: &Transaction,
	user_id: &str,
	wallet: &WalletAddress,
	competition_id: &str,
	amount: &BigUint,
	meta: &ChangeMeta,
	idem_key: Option<IdemKey>,
) -> Result<DebitOutcome, LedgerError> {
	if amount.is_zero() {
		return Err(LedgerError::InvalidAmount("debit amount must be positive".to_owned()));
	}
	let idem_key = idem_key.unwrap_or_else(IdemKey::random);
	let now = Utc::now();

	let balance =
		boost::get_balance(tx, user_id, competition_id)?.ok_or_else(|| LedgerError::NoBalance {
			user_id: user_id.to_owned(),
			competition_id: competition_id.to_owned(),
		})?;

	if balance.balance < *amount {
		return Err(LedgerError::InsufficientFunds {
			balance: balance.balance,
			requested: amount.clone(),
		});
	}

	if boost::find_change(tx, balance.id, idem_key.as_slice())?.is_some() {
		return Ok(DebitOutcome::Noop { balance: balance.balance, idem_key });
	}

	let balance_after = &balance.balance - amount;
	boost::set_balance(tx, balance.id, &balance_after, now)?;
	let change_id = boost::insert_change_if_absent(
		tx,
		balance.id,
		wallet,
		&-BigInt::from(amount.clone()),
		&meta.to_json()?,
		idem_key.as_slice(),
		now,
	)?
	.ok_or_else(|| {
		LedgerError::StorageCorruption("journal row appeared mid-transaction".to_owned())
	})?;

	Ok(DebitOutcome::Applied { change_id, balance_after, idem_key })
}

/// Debit the user and route the amount onto an agent's accumulated total.
/// The debit's idempotency drives the whole composition: a replayed key
/// leaves balance, total and join rows untouched.
pub fn boost_agent_in_tx(
	tx: &Transaction,
	user_id: &str,
	wallet: &WalletAddress,
	agent_id: &str,
	competition_id: &str,
	amount: &BigUint,
	idem_key: Option<IdemKey>,
) -> Result<BoostAgentOutcome, LedgerError> {
	let idem_key = idem_key.unwrap_or_else(IdemKey::random);
	let now = Utc::now();
	let meta = ChangeMeta::described(format!("boost agent {agent_id}"));

	match debit_in_tx(
		tx,
		user_id,
		wallet,
		competition_id,
		amount,
		&meta,
		Some(idem_key.clone()),
	)? {
		DebitOutcome::Noop { .. } => {
			let total =
				boost::get_agent_total(tx, agent_id, competition_id)?.ok_or_else(|| {
					LedgerError::StorageCorruption(format!(
						"boost debit exists but no total for agent {agent_id} in {competition_id}"
					))
				})?;
			Ok(BoostAgentOutcome::Noop { total: total.total })
		},
		DebitOutcome::Applied { change_id, .. } => {
			let total =
				boost::accumulate_agent_total(tx, agent_id, competition_id, amount, now)?;
			let agent_boost_id = boost::insert_agent_boost(tx, total.id, change_id)?;
			Ok(BoostAgentOutcome::Applied { agent_boost_id, change_id, total: total.total })
		},
	}
}

/// Move every balance of `from_user` onto `to_user`, rewriting journal rows
/// in place. Journal rows keep their idempotency keys, so replays of old
/// operations against the merged user still collapse to noops.
pub fn merge_boost_in_tx(
	tx: &Transaction,
	from_user_id: &str,
	to_user_id: &str,
) -> Result<MergeSummary, LedgerError> {
	if from_user_id == to_user_id {
		return Err(LedgerError::InvalidAmount("cannot merge a user into itself".to_owned()));
	}
	let now = Utc::now();
	let mut summary = MergeSummary::default();

	for source in boost::balances_of_user(tx, from_user_id)? {
		// Defence in depth: a source whose journal has drifted from its
		// balance must not contaminate the target.
		let journal_sum: BigInt = boost::change_deltas(tx, source.id)?.iter().sum();
		if journal_sum != BigInt::from(source.balance.clone()) {
			return Err(LedgerError::StorageCorruption(format!(
				"journal sum {journal_sum} != balance {} for balance {}",
				source.balance, source.id
			)));
		}

		let target =
			boost::ensure_balance(tx, to_user_id, &source.competition_id, now).map_err(|e| {
				match e {
					rusqlite::Error::QueryReturnedNoRows => LedgerError::StorageCorruption(
						"target balance missing after upsert".to_owned(),
					),
					e => e.into(),
				}
			})?;

		let combined = &target.balance + &source.balance;
		boost::set_balance(tx, target.id, &combined, now)?;
		summary.moved_changes += boost::reassign_changes(tx, source.id, target.id)?;
		boost::set_balance(tx, source.id, &BigUint::zero(), now)?;
		summary.merged_balances += 1;
	}

	Ok(summary)
}

/// Per-competition totals a user has routed onto agents, exposed positive.
pub fn user_boosts_in_tx(
	tx: &Transaction,
	user_id: &str,
) -> Result<BTreeMap<String, BigUint>, LedgerError> {
	let mut totals: BTreeMap<String, BigInt> = BTreeMap::new();
	for (competition_id, delta) in boost::debit_deltas_by_competition(tx, user_id)? {
		*totals.entry(competition_id).or_default() += delta;
	}
	totals
		.into_iter()
		.map(|(competition_id, sum)| {
			let total = (-&sum).to_biguint().ok_or_else(|| {
				LedgerError::StorageCorruption(format!(
					"positive debit sum for user {user_id} in {competition_id}"
				))
			})?;
			Ok((competition_id, total))
		})
		.collect()
}

/// The ledger service: the async face of the `*_in_tx` operations, each
/// opening its own write transaction.
#[derive(Clone)]
pub struct BoostLedger {
	db: Database,
}

impl BoostLedger {
	pub fn new(db: Database) -> Self {
		Self { db }
	}

	pub fn database(&self) -> &Database {
		&self.db
	}

	pub async fn credit(
		&self,
		user_id: &str,
		wallet: &WalletAddress,
		competition_id: &str,
		amount: &BigUint,
		meta: &ChangeMeta,
		idem_key: Option<IdemKey>,
	) -> Result<CreditOutcome, LedgerError> {
		self.db
			.with_write_tx(move |tx| {
				credit_in_tx(tx, user_id, wallet, competition_id, amount, meta, idem_key)
			})
			.await
	}

	pub async fn debit(
		&self,
		user_id: &str,
		wallet: &WalletAddress,
		competition_id: &str,
		amount: &BigUint,
		meta: &ChangeMeta,
		idem_key: Option<IdemKey>,
	) -> Result<DebitOutcome, LedgerError> {
		self.db
			.with_write_tx(move |tx| {
				debit_in_tx(tx, user_id, wallet, competition_id, amount, meta, idem_key)
			})
			.await
	}

	pub async fn boost_agent(
		&self,
		user_id: &str,
		wallet: &WalletAddress,
		agent_id: &str,
		competition_id: &str,
		amount: &BigUint,
		idem_key: Option<IdemKey>,
	) -> Result<BoostAgentOutcome, LedgerError> {
		self.db
			.with_write_tx(move |tx| {
				boost_agent_in_tx(
					tx,
					user_id,
					wallet,
					agent_id,
					competition_id,
					amount,
					idem_key,
				)
			})
			.await
	}

	pub async fn merge_boost(
		&self,
		from_user_id: &str,
		to_user_id: &str,
	) -> Result<MergeSummary, LedgerError> {
		self.db
			.with_write_tx(move |tx| merge_boost_in_tx(tx, from_user_id, to_user_id))
			.await
	}

	pub async fn user_boosts(
		&self,
		user_id: &str,
	) -> Result<BTreeMap<String, BigUint>, LedgerError> {
		self.db.with_write_tx(move |tx| user_boosts_in_tx(tx, user_id)).await
	}

	// ======= Bonus administration =======

	pub async fn grant_bonus(
		&self,
		user_id: &str,
		amount: &BigUint,
		expires_at: Option<chrono::DateTime<Utc>>,
		created_by_admin_id: &str,
		meta: Option<&ChangeMeta>,
	) -> Result<i64, LedgerError> {
		if amount.is_zero() {
			return Err(LedgerError::InvalidAmount("bonus amount must be positive".to_owned()));
		}
		let meta_json = meta.map(|meta| meta.to_json()).transpose()?;
		self.db
			.with_write_tx(move |tx| {
				boost::insert_bonus(
					tx,
					user_id,
					amount,
					expires_at,
					meta_json.as_deref(),
					created_by_admin_id,
					Utc::now(),
				)
				.map_err(LedgerError::from)
			})
			.await
	}

	pub async fn revoke_bonus(&self, bonus_id: i64) -> Result<bool, LedgerError> {
		self.db
			.with_write_tx(move |tx| {
				boost::revoke_bonus(tx, bonus_id, Utc::now()).map_err(LedgerError::from)
			})
			.await
	}

	/// Credit an active, unexpired bonus into one competition's balance.
	/// The derived idempotency key makes the claim exactly-once per
	/// `(bonus, competition)`.
	pub async fn claim_bonus(
		&self,
		bonus_id: i64,
		wallet: &WalletAddress,
		competition_id: &str,
	) -> Result<CreditOutcome, LedgerError> {
		self.db
			.with_write_tx(move |tx| {
				let now = Utc::now();
				let bonus = boost::get_bonus(tx, bonus_id)?
					.ok_or(LedgerError::BonusNotClaimable(bonus_id))?;
				if !bonus.is_active ||
					bonus.revoked_at.is_some() ||
					bonus.expires_at.is_some_and(|expires| expires <= now)
				{
					return Err(LedgerError::BonusNotClaimable(bonus_id));
				}

				let meta = ChangeMeta {
					description: Some("boost bonus claim".to_owned()),
					boost_bonus_id: Some(bonus_id.to_string()),
					..Default::default()
				};
				credit_in_tx(
					tx,
					&bonus.user_id,
					wallet,
					competition_id,
					&bonus.amount,
					&meta,
					Some(IdemKey::derive(&format!(
						"competition={competition_id}|reason=bonusClaim|bonus={bonus_id}"
					))),
				)
			})
			.await
	}
}
