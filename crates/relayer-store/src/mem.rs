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

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tkm_relayer_utils::Result;

use crate::LockStore;

#[derive(Clone)]
struct LeaseEntry {
    token: String,
    expires_at: Instant,
}

/// In-memory [`LockStore`] with TTL-honoring leases, used by tests and by
/// multi-replica simulations inside one process.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    values: Arc<Mutex<HashMap<String, String>>>,
    leases: Arc<Mutex<HashMap<String, LeaseEntry>>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl InMemoryStore {
    /// The current holder token of a lease key, if the lease is live.
    pub fn lease_holder(&self, key: &str) -> Option<String> {
        let mut leases = self.leases.lock();
        match leases.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                Some(entry.token.clone())
            }
            Some(_) => {
                leases.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait::async_trait]
impl LockStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(holder) = self.lease_holder(key) {
            return Ok(Some(holder));
        }
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.into(), value.into());
        Ok(())
    }

    async fn obtain_lease(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool> {
        if self.lease_holder(key).is_some() {
            return Ok(false);
        }
        self.leases.lock().insert(
            key.into(),
            LeaseEntry {
                token: token.into(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn refresh_lease(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool> {
        match self.lease_holder(key) {
            Some(holder) if holder == token => {
                self.leases.lock().insert(
                    key.into(),
                    LeaseEntry {
                        token: token.into(),
                        expires_at: Instant::now() + ttl,
                    },
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, key: &str, token: &str) -> Result<()> {
        let mut leases = self.leases.lock();
        if let Some(entry) = leases.get(key) {
            if entry.token == token {
                leases.remove(key);
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<String> {
        Ok("mem".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_keys_roundtrip() {
        let store = InMemoryStore::default();
        assert_eq!(store.get_u64("cursor").await.unwrap(), None);
        store.set_u64("cursor", 42).await.unwrap();
        assert_eq!(store.get_u64("cursor").await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_released() {
        let store = InMemoryStore::default();
        let ttl = Duration::from_secs(30);
        assert!(store.obtain_lease("lock", "a@1", ttl).await.unwrap());
        assert!(!store.obtain_lease("lock", "b@2", ttl).await.unwrap());
        assert_eq!(store.lease_holder("lock"), Some("a@1".into()));

        // a stranger's release is a no-op
        store.release_lease("lock", "b@2").await.unwrap();
        assert!(!store.obtain_lease("lock", "b@2", ttl).await.unwrap());

        store.release_lease("lock", "a@1").await.unwrap();
        assert!(store.obtain_lease("lock", "b@2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn lease_expires_by_ttl() {
        let store = InMemoryStore::default();
        let ttl = Duration::from_millis(40);
        assert!(store.obtain_lease("lock", "a@1", ttl).await.unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.obtain_lease("lock", "b@2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn refresh_requires_ownership() {
        let store = InMemoryStore::default();
        let ttl = Duration::from_millis(60);
        assert!(store.obtain_lease("lock", "a@1", ttl).await.unwrap());
        assert!(store.refresh_lease("lock", "a@1", ttl).await.unwrap());
        assert!(!store.refresh_lease("lock", "b@2", ttl).await.unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!store.refresh_lease("lock", "a@1", ttl).await.unwrap());
    }
}
