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

use anyhow::{Context, Result};
use arena_engine::{
	health::HealthChecker,
	logging,
	providers::{PerpsClient, PriceClient},
	settings::{CommandLineOptions, Settings},
	store::Database,
	sync::{
		perps::PerpsSyncService,
		scheduler::SyncScheduler,
		spot::{RpcProviderFactory, SpotSyncService},
	},
};
use arena_primitives::Chain;
use clap::Parser;
use std::{collections::HashMap, path::Path, sync::Arc};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
	let settings = match Settings::new(CommandLineOptions::parse()) {
		Ok(settings) => settings,
		Err(error) => {
			eprintln!("Error reading settings: {error}");
			std::process::exit(1);
		},
	};

	logging::init(settings.logging.json);
	tracing::info!("Starting the arena engine");

	let db = Database::open(Path::new(&settings.database.path))?;

	let price: Arc<_> = Arc::new(
		PriceClient::new(&settings.price_oracle.base_url)
			.context("Failed to create price oracle client")?,
	);
	let perps_client =
		Arc::new(PerpsClient::new(&settings.perps.base_url).context("Failed to create perps client")?);

	let mut chain_endpoints = HashMap::new();
	for (chain_name, endpoint) in &settings.chains {
		let chain: Chain = chain_name
			.parse()
			.with_context(|| format!("unknown chain {chain_name} in settings"))?;
		chain_endpoints.insert(chain, endpoint.http_endpoint.clone());
	}

	let spot = SpotSyncService::new(
		db.clone(),
		price.clone(),
		Arc::new(RpcProviderFactory { chain_endpoints, price: price.clone() }),
	);
	let perps = PerpsSyncService::new(db.clone(), perps_client, price.clone());
	let scheduler = Arc::new(SyncScheduler::new(db.clone(), spot, perps));

	let (shutdown_sender, shutdown_receiver) = watch::channel(false);
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			tracing::info!("Received ctrl-c; shutting down");
			let _result = shutdown_sender.send(true);
		}
	});

	if let Some(health_check) = &settings.health_check {
		let health_checker = HealthChecker::new(health_check, db).await?;
		tokio::spawn(async move {
			if let Err(error) = health_checker.run().await {
				tracing::error!("Health checker stopped: {error:#}");
			}
		});
	}

	scheduler.run(shutdown_receiver).await
}
