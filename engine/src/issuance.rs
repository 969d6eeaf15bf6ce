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

//! Boost issuance: the orchestrator boundary in front of the stake-derived
//! and no-stake credit flows. Policy lives here — sanctioned wallets are
//! rejected before the ledger is ever invoked, the same way the sync
//! orchestrators screen agents. The ledger itself stays policy-free.

use crate::{
	ledger::{BoostLedger, CreditOutcome, LedgerError, StakeAwardOutcome},
	sanctions::SanctionsGate,
	store::Database,
};
use arena_primitives::WalletAddress;

#[derive(Clone)]
pub struct BoostIssuanceService {
	ledger: BoostLedger,
	sanctions: SanctionsGate,
}

impl BoostIssuanceService {
	pub fn new(db: Database) -> Self {
		Self { ledger: BoostLedger::new(db.clone()), sanctions: SanctionsGate::new(db) }
	}

	pub fn ledger(&self) -> &BoostLedger {
		&self.ledger
	}

	/// Stake awards for `wallet`, screened against the sanctions list. A
	/// sanctioned wallet awards nothing and the rejection is logged.
	pub async fn award_for_stake(
		&self,
		wallet: &WalletAddress,
		competition_ids: &[String],
	) -> Result<StakeAwardOutcome, LedgerError> {
		if self.sanctions.is_sanctioned(wallet).await? {
			tracing::warn!(
				policy = "sanctioned_wallet",
				"Stake award rejected for sanctioned wallet {wallet}"
			);
			return Ok(StakeAwardOutcome::default());
		}
		self.ledger.award_for_stake(wallet, competition_ids).await
	}

	/// No-stake starter boosts for a new user, screened the same way.
	pub async fn init_no_stake(
		&self,
		user_id: &str,
		wallet: &WalletAddress,
	) -> Result<Vec<(String, CreditOutcome)>, LedgerError> {
		if self.sanctions.is_sanctioned(wallet).await? {
			tracing::warn!(
				policy = "sanctioned_wallet",
				"No-stake boost rejected for sanctioned wallet {wallet}"
			);
			return Ok(Vec::new());
		}
		self.ledger.init_no_stake(user_id, wallet).await
	}
}
