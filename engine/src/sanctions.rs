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

//! Sanctioned-wallet gate, consulted by orchestrators before any ledger
//! write or agent sync touches a wallet. The ledger itself stays
//! policy-free.
//!
//! Matching is effectively case-insensitive: both the stored rows and the
//! lookups are canonical 20-byte addresses, so any hex casing a caller saw
//! upstream has already been erased.

use crate::store::Database;
use arena_primitives::WalletAddress;
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Clone)]
pub struct SanctionsGate {
	db: Database,
}

impl SanctionsGate {
	pub fn new(db: Database) -> Self {
		Self { db }
	}

	pub async fn is_sanctioned(&self, wallet: &WalletAddress) -> rusqlite::Result<bool> {
		self.db.with_conn(move |conn| is_sanctioned(conn, wallet)).await
	}

	pub async fn add(&self, wallet: &WalletAddress) -> rusqlite::Result<()> {
		self.db
			.with_write_tx(move |tx| {
				tx.execute(
					"INSERT INTO sanctioned_wallets (address) VALUES (?1)
					 ON CONFLICT (address) DO NOTHING",
					params![wallet.as_bytes().as_slice()],
				)
				.map(|_| ())
			})
			.await
	}
}

pub fn is_sanctioned(conn: &Connection, wallet: &WalletAddress) -> rusqlite::Result<bool> {
	conn.query_row(
		"SELECT 1 FROM sanctioned_wallets WHERE address = ?1",
		params![wallet.as_bytes().as_slice()],
		|_| Ok(()),
	)
	.optional()
	.map(|row| row.is_some())
}
