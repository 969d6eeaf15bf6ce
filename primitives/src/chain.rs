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

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// An EVM chain the engine can sync trading activity from.
///
/// The lowercase string form is canonical: it is what appears in
/// configuration documents, database rows and price oracle keys.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
	Ethereum,
	Base,
	Arbitrum,
	Optimism,
	Polygon,
}

impl Chain {
	pub fn all() -> &'static [Chain] {
		&[Chain::Ethereum, Chain::Base, Chain::Arbitrum, Chain::Optimism, Chain::Polygon]
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Chain::Ethereum => "ethereum",
			Chain::Base => "base",
			Chain::Arbitrum => "arbitrum",
			Chain::Optimism => "optimism",
			Chain::Polygon => "polygon",
		}
	}

	/// Ticker of the chain's native token, used when pricing gas and
	/// native-input swaps.
	pub fn native_symbol(&self) -> &'static str {
		match self {
			Chain::Polygon => "POL",
			_ => "ETH",
		}
	}

	pub fn chain_id(&self) -> u64 {
		match self {
			Chain::Ethereum => 1,
			Chain::Base => 8453,
			Chain::Arbitrum => 42161,
			Chain::Optimism => 10,
			Chain::Polygon => 137,
		}
	}
}

impl fmt::Display for Chain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("unknown chain: {0}")]
pub struct ChainParseError(pub String);

impl FromStr for Chain {
	type Err = ChainParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Chain::all()
			.iter()
			.find(|chain| chain.as_str() == s)
			.copied()
			.ok_or_else(|| ChainParseError(s.to_owned()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn string_form_round_trips() {
		for chain in Chain::all() {
			assert_eq!(chain.as_str().parse::<Chain>().unwrap(), *chain);
		}
	}

	#[test]
	fn serde_uses_snake_case() {
		assert_eq!(serde_json::to_string(&Chain::Base).unwrap(), "\"base\"");
		assert_eq!(serde_json::from_str::<Chain>("\"arbitrum\"").unwrap(), Chain::Arbitrum);
	}

	#[test]
	fn rejects_unknown_chain() {
		assert!("solana".parse::<Chain>().is_err());
	}
}
