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

use std::time::Duration;

// ======= Agent fan-out =======

/// Agents are processed in concurrent chunks of this size within one
/// competition tick; chunks run sequentially.
pub const AGENT_CHUNK_SIZE: usize = 10;

/// Cap on concurrent receipt lookups while classifying one window of
/// transactions.
pub const MAX_CONCURRENT_RECEIPT_REQUESTS: usize = 10;

// ======= Sync cursors =======

/// How many blocks behind the stored trade cursor a resync starts, covering
/// transient RPC gaps. Re-observed swaps are deduplicated by the trade
/// journal's uniqueness key.
pub const BLOCK_CURSOR_RETRY_OVERLAP: u64 = 9;

// ======= External call deadlines =======

pub const RPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Duration between connection attempts while waiting for an RPC node to
/// answer with the expected chain id.
pub const RPC_RETRY_CONNECTION_INTERVAL: Duration = Duration::from_secs(10);

/// Upper bound on a whole per-competition sync tick. A tick that overruns is
/// cancelled between per-agent calls; started transactions always run to
/// commit or rollback.
pub const COMPETITION_TICK_DEADLINE: Duration = Duration::from_secs(10 * 60);

// ======= Transfer enrichment =======

pub const TRANSFER_SYMBOL_MAX_LEN: usize = 20;

pub const UNKNOWN_TOKEN_SYMBOL: &str = "UNKNOWN";

// ======= Enhanced RPC =======

/// Page size requested from the asset-transfer endpoint.
pub const ASSET_TRANSFERS_PAGE_SIZE: u64 = 1000;

/// `keccak256("Transfer(address,address,uint256)")`, topic0 of an ERC-20
/// transfer log.
pub const ERC20_TRANSFER_TOPIC: &str =
	"0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
