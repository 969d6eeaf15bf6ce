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

//! Shared primitives for the arena accounting and sync engine: chain
//! identifiers, canonical wallet addresses and idempotency keys.

mod address;
mod chain;
mod idem_key;

pub use address::{AddressError, WalletAddress, NATIVE_TOKEN_ADDRESS};
pub use chain::{Chain, ChainParseError};
pub use idem_key::{IdemKey, IdemKeyError, IDEM_KEY_MAX_LEN};
