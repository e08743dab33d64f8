// Copyright 2023 TikBridge
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Default values for the optional configuration knobs.

/// Default redis server address.
pub fn redis() -> String {
    "redis://@127.0.0.1:6379/0".into()
}

/// Default lease TTL in seconds (runner and sender).
pub fn lock_ttl() -> u64 {
    30
}

/// Default source fetch interval in seconds.
pub fn interval() -> u64 {
    10
}

/// Default receipt retry interval in seconds.
pub fn retry_interval() -> u64 {
    5
}

/// Default number of blocks per epoch.
pub fn blocks_in_epoch() -> u64 {
    tkm_relayer_types::DEFAULT_BLOCKS_IN_EPOCH
}

/// Default gas price cache TTL in seconds.
pub fn gas_price_ttl() -> u64 {
    60 * 10
}

/// Balance checking is on unless disabled.
pub fn check_balance() -> bool {
    true
}

/// Default provable-height cache TTL in seconds.
pub fn max_height_ttl() -> u64 {
    60
}

/// Default update-mode push interval in seconds.
pub fn update_interval() -> u64 {
    60 * 60 * 6
}
