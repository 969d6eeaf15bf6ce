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

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// A 20-byte EVM wallet or token address in canonical form.
///
/// Parsing accepts any mix of hex case; the stored bytes are the canonical
/// representation and the display form is always `0x` plus lowercase hex.
/// Everything that persists an address persists these 20 bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WalletAddress(pub [u8; 20]);

/// Sentinel address standing in for a chain's native token in trade legs
/// and balance rows.
pub const NATIVE_TOKEN_ADDRESS: WalletAddress = WalletAddress([0xee; 20]);

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
	#[error("address must be 42 characters long, got {0}")]
	BadLength(usize),
	#[error("address is not valid hex")]
	BadHex,
	#[error("address must be 20 bytes, got {0}")]
	BadByteLength(usize),
}

impl WalletAddress {
	pub fn as_bytes(&self) -> &[u8; 20] {
		&self.0
	}

	pub fn is_native_sentinel(&self) -> bool {
		*self == NATIVE_TOKEN_ADDRESS
	}

	/// True iff the string has the shape of an EVM address. Used to detect
	/// oracles that return an address where a token symbol belongs.
	pub fn is_address_shaped(s: &str) -> bool {
		s.len() == 42 &&
			s.starts_with("0x") &&
			s[2..].bytes().all(|b| b.is_ascii_hexdigit())
	}
}

impl FromStr for WalletAddress {
	type Err = AddressError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.len() != 42 {
			return Err(AddressError::BadLength(s.len()));
		}
		let stripped = s.trim_start_matches("0x");
		let bytes = hex::decode(stripped).map_err(|_| AddressError::BadHex)?;
		let bytes: [u8; 20] =
			bytes.try_into().map_err(|v: Vec<u8>| AddressError::BadByteLength(v.len()))?;
		Ok(Self(bytes))
	}
}

impl TryFrom<&[u8]> for WalletAddress {
	type Error = AddressError;

	fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
		Ok(Self(
			<[u8; 20]>::try_from(bytes).map_err(|_| AddressError::BadByteLength(bytes.len()))?,
		))
	}
}

impl fmt::Display for WalletAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(self.0))
	}
}

impl Serialize for WalletAddress {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_string())
	}
}

impl<'de> Deserialize<'de> for WalletAddress {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(de::Error::custom)
	}
}
