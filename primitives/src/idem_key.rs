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

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

/// Longest accepted idempotency key, in bytes.
pub const IDEM_KEY_MAX_LEN: usize = 256;

/// An opaque idempotency key scoped to one boost balance.
///
/// The key is bytes, not text: callers may pass a hash, a UUID, or anything
/// else stable. Two ledger writes against the same balance with the same key
/// collapse to one; the same key against different balances is unrelated.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct IdemKey(Vec<u8>);

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum IdemKeyError {
	#[error("idempotency key of {0} bytes exceeds the {IDEM_KEY_MAX_LEN} byte limit")]
	TooLong(usize),
	#[error("idempotency key must not be empty")]
	Empty,
}

impl IdemKey {
	/// A fresh random 32-byte key, for operations with no natural external
	/// identifier.
	pub fn random() -> Self {
		let mut bytes = [0u8; 32];
		rand::thread_rng().fill_bytes(&mut bytes);
		Self(bytes.to_vec())
	}

	/// Deterministic key from a stable recipe string, e.g.
	/// `"competition=<id>|reason=initNoStake|user=<userId>"`. Recipes that
	/// vary by amount must include the amount, so a re-issue at a corrected
	/// amount is not swallowed as a duplicate.
	pub fn derive(recipe: &str) -> Self {
		Self(Sha256::digest(recipe.as_bytes()).to_vec())
	}

	pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, IdemKeyError> {
		if bytes.is_empty() {
			return Err(IdemKeyError::Empty);
		}
		if bytes.len() > IDEM_KEY_MAX_LEN {
			return Err(IdemKeyError::TooLong(bytes.len()));
		}
		Ok(Self(bytes))
	}

	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}
}

impl fmt::Debug for IdemKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "IdemKey({})", hex::encode(&self.0))
	}
}

impl fmt::Display for IdemKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&hex::encode(&self.0))
	}
}
