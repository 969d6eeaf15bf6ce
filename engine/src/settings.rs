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

//! Engine settings, layered defaults → TOML file → environment → command
//! line. Environment variables use `__` as the section separator, e.g.
//! `DATABASE__PATH=/var/lib/arena/arena.db`.

use clap::Parser;
use config::{Config, ConfigError, Environment, File, Map, Source, Value};
use serde::Deserialize;
use std::{collections::HashMap, env};

/// Base path for the optional `Settings.toml`.
pub const CONFIG_ROOT: &str = "ARENA_CONFIG_ROOT";
pub const DEFAULT_CONFIG_ROOT: &str = "/etc/arena-engine";

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
	pub path: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ChainEndpoint {
	pub http_endpoint: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
	pub base_url: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct HealthCheck {
	pub hostname: String,
	pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Logging {
	#[serde(default)]
	pub json: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
	pub database: DatabaseSettings,
	/// RPC endpoint per chain, keyed by the chain's canonical lowercase
	/// name.
	#[serde(default)]
	pub chains: HashMap<String, ChainEndpoint>,
	pub perps: ServiceEndpoint,
	pub price_oracle: ServiceEndpoint,
	#[serde(default)]
	pub health_check: Option<HealthCheck>,
	#[serde(default)]
	pub logging: Logging,
}

#[derive(Parser, Debug, Clone, Default)]
#[clap(version)]
pub struct CommandLineOptions {
	#[clap(long = "config-root", env = CONFIG_ROOT)]
	pub config_root: Option<String>,
	#[clap(long = "database.path")]
	database_path: Option<String>,
	#[clap(long = "perps.base_url")]
	perps_base_url: Option<String>,
	#[clap(long = "price_oracle.base_url")]
	price_oracle_base_url: Option<String>,
	#[clap(long = "health_check.hostname")]
	health_check_hostname: Option<String>,
	#[clap(long = "health_check.port")]
	health_check_port: Option<u16>,
	#[clap(long = "logging.json")]
	logging_json: Option<bool>,
}

pub fn insert_command_line_option<T>(
	map: &mut HashMap<String, Value>,
	key: &str,
	option: &Option<T>,
) where
	T: Clone + Into<Value>,
{
	if let Some(value) = option {
		map.insert(key.to_owned(), value.clone().into());
	}
}

impl Source for CommandLineOptions {
	fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
		Box::new((*self).clone())
	}

	fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
		let mut map: HashMap<String, Value> = HashMap::new();

		insert_command_line_option(&mut map, "database.path", &self.database_path);
		insert_command_line_option(&mut map, "perps.base_url", &self.perps_base_url);
		insert_command_line_option(
			&mut map,
			"price_oracle.base_url",
			&self.price_oracle_base_url,
		);
		insert_command_line_option(
			&mut map,
			"health_check.hostname",
			&self.health_check_hostname,
		);
		insert_command_line_option(
			&mut map,
			"health_check.port",
			&self.health_check_port.map(i64::from),
		);
		insert_command_line_option(&mut map, "logging.json", &self.logging_json);

		Ok(map)
	}
}

impl Settings {
	pub fn new(opts: CommandLineOptions) -> Result<Self, ConfigError> {
		let config_root = opts
			.config_root
			.clone()
			.or_else(|| env::var(CONFIG_ROOT).ok())
			.unwrap_or_else(|| DEFAULT_CONFIG_ROOT.to_owned());

		Self::set_defaults(Config::builder())?
			.add_source(File::with_name(&format!("{config_root}/Settings")).required(false))
			.add_source(Environment::default().separator("__"))
			.add_source(opts)
			.build()?
			.try_deserialize()
	}

	fn set_defaults(
		config_builder: config::ConfigBuilder<config::builder::DefaultState>,
	) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
		// These defaults are for a localnet setup
		config_builder
			.set_default("database.path", "arena.db")?
			.set_default("perps.base_url", "http://localhost:8081")?
			.set_default("price_oracle.base_url", "http://localhost:8082")
	}

	#[cfg(test)]
	pub fn new_test() -> Result<Self, ConfigError> {
		Self::set_defaults(Config::builder())?.build()?.try_deserialize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_complete() {
		let settings = Settings::new_test().unwrap();
		assert_eq!(settings.database.path, "arena.db");
		assert!(settings.chains.is_empty());
		assert!(settings.health_check.is_none());
		assert!(!settings.logging.json);
	}

	#[test]
	fn command_line_options_override_defaults() {
		let opts = CommandLineOptions {
			database_path: Some("/tmp/test.db".to_owned()),
			health_check_hostname: Some("127.0.0.1".to_owned()),
			health_check_port: Some(5555),
			..Default::default()
		};

		let settings: Settings = Settings::set_defaults(Config::builder())
			.unwrap()
			.add_source(opts)
			.build()
			.unwrap()
			.try_deserialize()
			.unwrap();

		assert_eq!(settings.database.path, "/tmp/test.db");
		assert_eq!(
			settings.health_check,
			Some(HealthCheck { hostname: "127.0.0.1".to_owned(), port: 5555 })
		);
	}
}
