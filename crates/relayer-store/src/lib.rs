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

//! # Relayer Store Module
//!
//! Typed access to the external key/value store that coordinates relay
//! replicas: cursor keys, last-update timestamps and the two TTL-bearing
//! leases (runner and sender).

use std::time::Duration;

use tkm_relayer_utils::{Error, Result};

/// Runtime key derivation.
pub mod keys;
/// Distributed leases over a [`LockStore`].
pub mod lease;
/// In-memory store backend for tests.
pub mod mem;
/// Redis store backend.
pub mod redis;

pub use self::redis::RedisStore;
pub use keys::RuntimeKeys;
pub use lease::{CompoundLease, Lease};
pub use mem::InMemoryStore;
pub use tkm_relayer_utils::Keepalive;

/// Per-call budget for every store operation.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(1);

/// The store operations the relayer needs: plain keys for cursors and
/// timestamps, and atomic TTL leases for mutual exclusion.
///
/// Implementations must honor lease TTLs and only refresh/release a lease
/// when the caller still owns its token.
#[async_trait::async_trait]
pub trait LockStore: Send + Sync {
    /// Reads a key; `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a key.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Atomically takes the lease unless another token holds it. Returns
    /// `false` when busy.
    async fn obtain_lease(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool>;

    /// Extends the lease TTL when `token` still owns it. Returns `false`
    /// when the lease is gone or owned by someone else.
    async fn refresh_lease(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool>;

    /// Drops the lease when `token` owns it; no-op otherwise.
    async fn release_lease(&self, key: &str, token: &str) -> Result<()>;

    /// Connectivity check; returns a short server description for the log.
    async fn ping(&self) -> Result<String>;

    /// Reads a key as a decimal u64.
    async fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.get(key).await? {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|e| Error::Store(format!("key {key}: {e}"))),
        }
    }

    /// Writes a key as a decimal u64.
    async fn set_u64(&self, key: &str, value: u64) -> Result<()> {
        self.set(key, &value.to_string()).await
    }

    /// Reads a key as a decimal i64.
    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key).await? {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|e| Error::Store(format!("key {key}: {e}"))),
        }
    }

    /// Writes a key as a decimal i64.
    async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.set(key, &value.to_string()).await
    }
}
