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

//! EVM plumbing: the enhanced JSON-RPC client and the hex/decimal
//! normalization applied at the adapter edge. Nothing outside this module
//! sees a hex quantity.

pub mod rpc;

use anyhow::{anyhow, Context, Result};
use arena_primitives::WalletAddress;
use ethers::types::{H160, U256};

pub fn wallet_to_h160(wallet: &WalletAddress) -> H160 {
	H160::from_slice(wallet.as_bytes())
}

pub fn h160_to_wallet(address: H160) -> WalletAddress {
	WalletAddress(address.0)
}

pub fn parse_hex_quantity(hex: &str) -> Result<U256> {
	U256::from_str_radix(hex.trim_start_matches("0x"), 16)
		.with_context(|| format!("invalid hex quantity: {hex}"))
}

pub fn parse_hex_block_number(hex: &str) -> Result<u64> {
	let quantity = parse_hex_quantity(hex)?;
	if quantity > U256::from(u64::MAX) {
		return Err(anyhow!("block number out of range: {hex}"));
	}
	Ok(quantity.as_u64())
}

pub fn to_hex_block_number(block: u64) -> String {
	format!("{block:#x}")
}

/// Scale a raw integer quantity by `decimals` into a canonical decimal
/// string: no exponent, no trailing fractional zeros, `0` for zero.
pub fn format_units(raw: U256, decimals: u8) -> String {
	if decimals == 0 {
		return raw.to_string();
	}
	let divisor = U256::exp10(decimals as usize);
	let (whole, remainder) = raw.div_mod(divisor);
	if remainder.is_zero() {
		return whole.to_string();
	}
	let fraction = format!("{remainder:0>width$}", width = decimals as usize);
	format!("{whole}.{}", fraction.trim_end_matches('0'))
}

/// Parse a canonical decimal string back into raw integer units.
pub fn parse_units(value: &str, decimals: u8) -> Result<U256> {
	let (whole, fraction) = match value.split_once('.') {
		Some((whole, fraction)) => (whole, fraction),
		None => (value, ""),
	};
	if fraction.len() > decimals as usize {
		return Err(anyhow!("{value} has more than {decimals} fractional digits"));
	}
	let whole: U256 =
		U256::from_dec_str(whole).with_context(|| format!("invalid decimal: {value}"))?;
	let padded = format!("{fraction:0<width$}", width = decimals as usize);
	let fraction = if padded.is_empty() {
		U256::zero()
	} else {
		U256::from_dec_str(&padded).with_context(|| format!("invalid decimal: {value}"))?
	};
	Ok(whole * U256::exp10(decimals as usize) + fraction)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn formats_scaled_units() {
		assert_eq!(format_units(U256::from_dec_str("106830000000000000000").unwrap(), 18), "106.83");
		assert_eq!(format_units(U256::from(69_820_000u64), 6), "69.82");
		assert_eq!(format_units(U256::zero(), 18), "0");
		assert_eq!(format_units(U256::from(5u64), 0), "5");
		assert_eq!(format_units(U256::from(1u64), 18), "0.000000000000000001");
	}

	#[test]
	fn parse_round_trips() {
		for (text, decimals) in [("106.83", 18u8), ("0.000001", 6), ("42", 0), ("7", 18)] {
			assert_eq!(format_units(parse_units(text, decimals).unwrap(), decimals), text);
		}
		assert!(parse_units("1.2345678", 6).is_err());
	}

	#[test]
	fn hex_quantities() {
		assert_eq!(parse_hex_block_number("0x1b4").unwrap(), 436);
		assert_eq!(to_hex_block_number(436), "0x1b4");
		assert!(parse_hex_block_number("0xzz").is_err());
	}

	#[test]
	fn address_conversions_round_trip() {
		let wallet: WalletAddress =
			"0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".parse().unwrap();
		assert_eq!(h160_to_wallet(wallet_to_h160(&wallet)), wallet);
	}
}
