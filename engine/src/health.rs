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

//! Liveness endpoint for the engine.
//!
//! `GET /health` answers `200 {"status":"ok"}` only while the engine can
//! still reach its database — the one dependency every ledger write and
//! sync tick goes through. A process that is up but has lost its storage
//! reports `503`, so orchestration restarts it instead of routing to it.

use crate::{settings, store::Database};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::{TcpListener, TcpStream},
};

const REQUEST_BUFFER_SIZE: usize = 2048;

pub struct HealthChecker {
	listener: TcpListener,
	db: Database,
}

fn http_response(status_line: &str, body: &str) -> String {
	format!(
		"HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
		body.len()
	)
}

impl HealthChecker {
	pub async fn new(
		health_check_settings: &settings::HealthCheck,
		db: Database,
	) -> Result<Self> {
		let bind_address =
			format!("{}:{}", health_check_settings.hostname, health_check_settings.port);
		let listener = TcpListener::bind(&bind_address)
			.await
			.with_context(|| format!("Could not bind health endpoint to {bind_address}"))?;

		tracing::info!("Health endpoint listening on {bind_address}");
		Ok(Self { listener, db })
	}

	/// The address actually bound, for configurations that request an
	/// ephemeral port.
	pub fn local_addr(&self) -> Result<SocketAddr> {
		Ok(self.listener.local_addr()?)
	}

	pub async fn run(self) -> Result<()> {
		loop {
			let (stream, peer) = match self.listener.accept().await {
				Ok(accepted) => accepted,
				Err(error) => {
					tracing::error!("Health endpoint could not accept a connection: {error}");
					continue
				},
			};
			if let Err(error) = self.answer(stream).await {
				tracing::warn!("Health request from {peer} not answered: {error:#}");
			}
		}
	}

	async fn answer(&self, mut stream: TcpStream) -> Result<()> {
		let mut buffer = [0u8; REQUEST_BUFFER_SIZE];
		let read = stream.read(&mut buffer).await.context("could not read request")?;

		let mut headers = [httparse::EMPTY_HEADER; 16];
		let mut request = httparse::Request::new(&mut headers);
		let path = match request.parse(&buffer[..read]) {
			Ok(_) => request.path,
			Err(error) => {
				stream
					.write_all(http_response("400 Bad Request", "{\"error\":\"bad request\"}").as_bytes())
					.await?;
				return Err(anyhow::anyhow!("unparseable request: {error}"));
			},
		};

		let response = match path {
			Some("/health") =>
				if self.storage_alive().await {
					http_response("200 OK", "{\"status\":\"ok\"}")
				} else {
					http_response(
						"503 Service Unavailable",
						"{\"status\":\"storage unreachable\"}",
					)
				},
			other => {
				tracing::warn!("Health endpoint queried at unknown path {other:?}");
				http_response("404 Not Found", "{\"error\":\"not found\"}")
			},
		};
		stream.write_all(response.as_bytes()).await.context("could not write response")?;
		stream.flush().await.context("could not flush response")?;
		Ok(())
	}

	/// One trivial statement against the registry; any storage-level error
	/// marks the engine unhealthy.
	async fn storage_alive(&self) -> bool {
		self.db
			.with_conn::<_, rusqlite::Error, _>(|conn| {
				conn.query_row("SELECT COUNT(*) FROM competitions", [], |row| {
					row.get::<_, i64>(0)
				})
			})
			.await
			.is_ok()
	}
}
