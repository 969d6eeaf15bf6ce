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

//! The storage gateway: a rusqlite database behind an async lock, plus row
//! accessors for every table, grouped by concern.
//!
//! All authoritative state lives here; nothing is cached in memory. Write
//! transactions open with `IMMEDIATE` behavior, taking the database write
//! lock up front so concurrent mutators serialize before reading the rows
//! they are about to change.

pub mod boost;
pub mod metrics;
pub mod perps;
pub mod registry;
mod schema;
pub mod spot;

use anyhow::Context;
use rusqlite::{functions::FunctionFlags, Connection, Transaction, TransactionBehavior};
use std::{path::Path, sync::Arc};
use tokio::sync::Mutex;

/// Handle to the engine database. Cheap to clone; all clones share one
/// connection, so statements from concurrent tasks serialize.
#[derive(Clone)]
pub struct Database {
	conn: Arc<Mutex<Connection>>,
}

impl Database {
	pub fn open(file: &Path) -> anyhow::Result<Self> {
		let conn = Connection::open(file)
			.with_context(|| format!("Could not open database at {}", file.display()))?;
		Self::init(conn)
	}

	pub fn open_in_memory() -> anyhow::Result<Self> {
		Self::init(Connection::open_in_memory()?)
	}

	fn init(mut conn: Connection) -> anyhow::Result<Self> {
		conn.pragma_update(None, "journal_mode", "WAL")?;
		conn.pragma_update(None, "foreign_keys", "ON")?;
		conn.create_scalar_function(
			"sqrt",
			1,
			FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
			|ctx| match ctx.get::<Option<f64>>(0)? {
				Some(value) => Ok(Some(value.sqrt())),
				None => Ok(None),
			},
		)?;
		schema::migrate(&mut conn).context("Database migration failed")?;
		Ok(Self { conn: Arc::new(Mutex::new(conn)) })
	}

	/// Run `f` inside a fresh `IMMEDIATE` write transaction; commit on `Ok`,
	/// roll back on `Err`. This is the "no ambient transaction" entry point:
	/// operations that compose participate in the caller's transaction by
	/// taking the `&Transaction` their `*_in_tx` form receives here.
	pub async fn with_write_tx<T, E, F>(&self, f: F) -> Result<T, E>
	where
		F: FnOnce(&Transaction) -> Result<T, E> + Send,
		T: Send,
		E: From<rusqlite::Error> + Send,
	{
		let mut conn = self.conn.lock().await;
		let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
		let out = f(&tx)?;
		tx.commit()?;
		Ok(out)
	}

	/// Run a read-only closure against the connection.
	pub async fn with_conn<T, E, F>(&self, f: F) -> Result<T, E>
	where
		F: FnOnce(&Connection) -> Result<T, E> + Send,
		T: Send,
		E: From<rusqlite::Error> + Send,
	{
		let conn = self.conn.lock().await;
		f(&conn)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn migration_is_idempotent() {
		let db = Database::open_in_memory().unwrap();
		// Re-running against the already-migrated connection must be a noop.
		db.with_conn::<_, rusqlite::Error, _>(|conn| {
			let version: i64 =
				conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
			assert!(version >= 1);
			Ok(())
		})
		.await
		.unwrap();
	}

	#[tokio::test]
	async fn reopening_a_database_file_preserves_state() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("arena.db");

		{
			let db = Database::open(&path).unwrap();
			db.with_write_tx::<_, rusqlite::Error, _>(|tx| {
				tx.execute(
					"INSERT INTO sanctioned_wallets (address) VALUES (?1)",
					[vec![0xbu8; 20]],
				)
				.map(|_| ())
			})
			.await
			.unwrap();
		}

		let db = Database::open(&path).unwrap();
		let count: i64 = db
			.with_conn::<_, rusqlite::Error, _>(|conn| {
				conn.query_row("SELECT COUNT(*) FROM sanctioned_wallets", [], |row| row.get(0))
			})
			.await
			.unwrap();
		assert_eq!(count, 1);
	}

	#[tokio::test]
	async fn write_tx_rolls_back_on_error() {
		let db = Database::open_in_memory().unwrap();

		let result: Result<(), rusqlite::Error> = db
			.with_write_tx(|tx| {
				tx.execute(
					"INSERT INTO sanctioned_wallets (address) VALUES (?1)",
					[vec![0xau8; 20]],
				)?;
				Err(rusqlite::Error::QueryReturnedNoRows)
			})
			.await;
		assert!(result.is_err());

		let count: i64 = db
			.with_conn::<_, rusqlite::Error, _>(|conn| {
				conn.query_row("SELECT COUNT(*) FROM sanctioned_wallets", [], |row| row.get(0))
			})
			.await
			.unwrap();
		assert_eq!(count, 0);
	}
}
