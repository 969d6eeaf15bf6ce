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

//! Deadlines and backoff for calls that cross a process boundary.
//!
//! Every external request runs under [`with_deadline`]; a request that hangs
//! becomes a transient error and the scheduler's next tick is the retry.
//! [`retry_with_backoff`] is for connection establishment only, where waiting
//! with exponential backoff and jitter beats failing the whole process.

use anyhow::{anyhow, Result};
use rand::Rng;
use std::{cmp::min, future::Future, time::Duration};

const MAX_BACKOFF: Duration = Duration::from_secs(10 * 60);

fn backoff_duration(initial: Duration, attempt: u32) -> Duration {
	min(MAX_BACKOFF, initial.saturating_mul(2u32.saturating_pow(attempt)))
}

/// Sleep duration for a failed attempt: at least half the backoff ceiling,
/// with jitter over the other half.
fn sleep_duration(initial: Duration, attempt: u32) -> Duration {
	let half_max = backoff_duration(initial, attempt) / 2;
	half_max + rand::thread_rng().gen_range(Duration::default()..=half_max)
}

/// Marker wrapped around timeout failures so callers can classify them as
/// transient.
pub const TIMED_OUT: &str = "timed out";

/// Run `fut` under `deadline`. Elapsing the deadline is an error carrying
/// [`TIMED_OUT`] and the request name.
pub async fn with_deadline<T>(
	request_name: &'static str,
	deadline: Duration,
	fut: impl Future<Output = Result<T>>,
) -> Result<T> {
	match tokio::time::timeout(deadline, fut).await {
		Ok(result) => result,
		Err(_) => Err(anyhow!("Request {request_name} {TIMED_OUT} after {deadline:?}")),
	}
}

/// Retry `f` until it succeeds or `max_attempts` is exhausted, backing off
/// exponentially with jitter between attempts.
pub async fn retry_with_backoff<T, F, Fut>(
	name: &'static str,
	initial_backoff: Duration,
	max_attempts: u32,
	mut f: F,
) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let mut attempt = 0u32;
	loop {
		match f().await {
			Ok(t) => return Ok(t),
			Err(e) if attempt + 1 >= max_attempts => {
				return Err(e.context(format!("{name}: giving up after {max_attempts} attempts")))
			},
			Err(e) => {
				let delay = sleep_duration(initial_backoff, attempt);
				tracing::warn!(
					"{name}: attempt {attempt} failed: {e:#}. Retrying in {}ms",
					delay.as_millis()
				);
				tokio::time::sleep(delay).await;
				attempt += 1;
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	#[tokio::test]
	async fn deadline_applies() {
		let result = with_deadline("slow request", Duration::from_millis(10), async {
			tokio::time::sleep(Duration::from_secs(5)).await;
			Ok(())
		})
		.await;
		assert!(result.unwrap_err().to_string().contains(TIMED_OUT));
	}

	#[tokio::test]
	async fn deadline_passes_through_success() {
		let value =
			with_deadline("fast request", Duration::from_secs(1), async { Ok(42u32) }).await;
		assert_eq!(value.unwrap(), 42);
	}

	#[tokio::test(start_paused = true)]
	async fn retries_until_success() {
		let calls = AtomicU32::new(0);
		let value = retry_with_backoff("flaky", Duration::from_millis(1), 5, || async {
			if calls.fetch_add(1, Ordering::SeqCst) < 2 {
				Err(anyhow!("nope"))
			} else {
				Ok(7u32)
			}
		})
		.await
		.unwrap();
		assert_eq!(value, 7);
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn gives_up_after_max_attempts() {
		let calls = AtomicU32::new(0);
		let result: Result<()> =
			retry_with_backoff("hopeless", Duration::from_millis(1), 3, || async {
				calls.fetch_add(1, Ordering::SeqCst);
				Err(anyhow!("still no"))
			})
			.await;
		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[test]
	fn backoff_is_capped() {
		assert_eq!(backoff_duration(Duration::from_secs(30), 20), MAX_BACKOFF);
		assert_eq!(backoff_duration(Duration::from_secs(1), 2), Duration::from_secs(4));
	}
}
