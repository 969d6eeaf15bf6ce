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

//! Price oracle client. The oracle is opaque: we ask for USD prices keyed
//! by `"<address>:<chain>"` and take what it gives, including the odd
//! misbehavior of returning an address where a symbol belongs (handled by
//! the transfer enrichment, not here).

use crate::{constants::HTTP_REQUEST_TIMEOUT, retrier::with_deadline};
use anyhow::{Context, Result};
use arena_primitives::{Chain, WalletAddress};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use std::collections::HashMap;

pub fn price_key(token: &WalletAddress, chain: Chain) -> String {
	format!("{token}:{chain}")
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceReport {
	pub token: WalletAddress,
	pub price: f64,
	pub symbol: String,
	pub timestamp: DateTime<Utc>,
	pub chain: Chain,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PriceApi: Send + Sync + 'static {
	async fn get_price(
		&self,
		token: &WalletAddress,
		chain: Chain,
	) -> Result<Option<PriceReport>>;

	/// Prices for many tokens in one round trip; absent keys had no price.
	async fn get_bulk_prices(
		&self,
		tokens: &[(WalletAddress, Chain)],
	) -> Result<HashMap<String, PriceReport>>;
}

#[derive(Clone)]
pub struct PriceClient {
	http: reqwest::Client,
	base_url: String,
}

#[derive(Debug, Deserialize)]
struct BulkPricesResponse {
	prices: HashMap<String, PriceReport>,
}

impl PriceClient {
	pub fn new(base_url: &str) -> Result<Self> {
		Ok(Self {
			http: reqwest::Client::builder()
				.timeout(HTTP_REQUEST_TIMEOUT)
				.build()
				.context("could not build price oracle HTTP client")?,
			base_url: base_url.trim_end_matches('/').to_owned(),
		})
	}
}

#[async_trait]
impl PriceApi for PriceClient {
	async fn get_price(
		&self,
		token: &WalletAddress,
		chain: Chain,
	) -> Result<Option<PriceReport>> {
		let url = format!("{}/price?token={token}&chain={chain}", self.base_url);
		with_deadline("price_oracle get_price", HTTP_REQUEST_TIMEOUT, async {
			let response = self.http.get(&url).send().await?;
			if response.status() == reqwest::StatusCode::NOT_FOUND {
				return Ok(None);
			}
			Ok(Some(response.error_for_status()?.json().await?))
		})
		.await
	}

	async fn get_bulk_prices(
		&self,
		tokens: &[(WalletAddress, Chain)],
	) -> Result<HashMap<String, PriceReport>> {
		if tokens.is_empty() {
			return Ok(HashMap::new());
		}
		let keys: Vec<String> =
			tokens.iter().map(|(token, chain)| price_key(token, *chain)).collect();
		let url = format!("{}/prices", self.base_url);
		let response: BulkPricesResponse =
			with_deadline("price_oracle get_bulk_prices", HTTP_REQUEST_TIMEOUT, async {
				Ok(self
					.http
					.post(&url)
					.json(&serde_json::json!({ "keys": keys }))
					.send()
					.await?
					.error_for_status()?
					.json()
					.await?)
			})
			.await?;
		Ok(response.prices)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn price_key_shape() {
		let token: WalletAddress =
			"0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".parse().unwrap();
		assert_eq!(
			price_key(&token, Chain::Base),
			"0x833589fcd6edb6e08f4c7c32d4f71b54bda02913:base"
		);
	}

	#[test]
	fn report_deserializes() {
		let report: PriceReport = serde_json::from_str(
			r#"{
				"token": "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913",
				"price": 0.9998,
				"symbol": "USDC",
				"timestamp": "2025-06-01T12:00:00Z",
				"chain": "base"
			}"#,
		)
		.unwrap();
		assert_eq!(report.symbol, "USDC");
		assert_eq!(report.chain, Chain::Base);
	}
}
