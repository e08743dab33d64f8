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

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tkm_relayer_utils::{Error, Keepalive, Result};
use tokio::sync::Mutex;

use crate::LockStore;

/// A distributed lease over one store key.
///
/// Holding the lease grants the exclusive right to one named action: the
/// runner lease guards cursor advancement of one stream, the sender lease
/// serializes tx submission of one signer across processes. Calls are
/// serialized by an internal mutex so the receipt poller can refresh while
/// the relay loop owns the lease object.
pub struct Lease {
    store: Arc<dyn LockStore>,
    key: String,
    token: String,
    ttl: Duration,
    held: Mutex<bool>,
}

impl Lease {
    /// Creates the lease handle; nothing is acquired yet.
    pub fn new(
        store: Arc<dyn LockStore>,
        key: impl Into<String>,
        token: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            token: token.into(),
            ttl,
            held: Mutex::new(false),
        }
    }

    /// The store key of this lease.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The holder token this process writes (`ip@pid`).
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether this process currently believes it holds the lease.
    pub async fn is_held(&self) -> bool {
        *self.held.lock().await
    }

    async fn fetch_locked(&self, held: &mut bool) -> Result<()> {
        if self.store.obtain_lease(&self.key, &self.token, self.ttl).await? {
            *held = true;
            tracing::debug!(key = %self.key, "{self} lock success");
            Ok(())
        } else {
            let holder = self
                .store
                .get(&self.key)
                .await
                .ok()
                .flatten()
                .unwrap_or_default();
            Err(Error::LeaseBusy {
                key: self.key.clone(),
                holder,
            })
        }
    }

    async fn refresh_locked(&self, held: &mut bool) -> Result<()> {
        if !*held {
            return Err(Error::LeaseNotHeld);
        }
        if self.store.refresh_lease(&self.key, &self.token, self.ttl).await? {
            tracing::debug!(key = %self.key, "{self} refreshed");
            Ok(())
        } else {
            // the TTL ran out under us; the next fetch starts from scratch
            *held = false;
            Err(Error::LeaseNotHeld)
        }
    }

    /// Attempts to obtain the lease. Fails with [`Error::LeaseAlreadyHeld`]
    /// when already held locally and with [`Error::LeaseBusy`] (carrying the
    /// holder token) when another process owns it.
    pub async fn fetch(&self) -> Result<()> {
        let mut held = self.held.lock().await;
        if *held {
            return Err(Error::LeaseAlreadyHeld);
        }
        self.fetch_locked(&mut held).await
    }

    /// Releases the lease. A lease that is not held locally is a no-op;
    /// store errors are logged and swallowed, release must never fail the
    /// caller.
    pub async fn release(&self) {
        let mut held = self.held.lock().await;
        if !*held {
            return;
        }
        *held = false;
        match self.store.release_lease(&self.key, &self.token).await {
            Ok(()) => tracing::debug!(key = %self.key, "{self} released"),
            Err(e) => {
                tracing::warn!(key = %self.key, "{self} release failed: {e}")
            }
        }
    }

    /// Extends the TTL. Fails with [`Error::LeaseNotHeld`] when this process
    /// does not hold the lease (any more).
    pub async fn refresh(&self) -> Result<()> {
        let mut held = self.held.lock().await;
        self.refresh_locked(&mut held).await
    }

    /// Refreshes when held, fetches otherwise.
    pub async fn fetch_or_refresh(&self) -> Result<()> {
        let mut held = self.held.lock().await;
        if *held {
            self.refresh_locked(&mut held).await
        } else {
            self.fetch_locked(&mut held).await
        }
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lease{{{}}}", self.key)
    }
}

#[async_trait::async_trait]
impl Keepalive for Lease {
    async fn keep_alive(&self) {
        if let Err(e) = self.refresh().await {
            tracing::warn!("refresh {self} failed: {e}");
        }
    }
}

/// An ordered set of leases refreshed together. Refresh tries every member,
/// aggregates failures and keeps going.
pub struct CompoundLease {
    leases: Vec<Arc<Lease>>,
}

impl CompoundLease {
    /// Bundles the given leases.
    pub fn new(leases: Vec<Arc<Lease>>) -> Self {
        Self { leases }
    }

    /// Refreshes every lease; returns the aggregated error when any failed.
    pub async fn refresh(&self) -> Result<()> {
        let mut failures = Vec::new();
        for lease in &self.leases {
            if let Err(e) = lease.refresh().await {
                failures.push(format!("{lease}: {e}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Store(format!("errors: {}", failures.join("; "))))
        }
    }
}

#[async_trait::async_trait]
impl Keepalive for CompoundLease {
    async fn keep_alive(&self) {
        if let Err(e) = self.refresh().await {
            tracing::warn!("compound lease refresh failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;

    fn lease_pair(key: &str) -> (Arc<InMemoryStore>, Lease, Lease) {
        let store = Arc::new(InMemoryStore::default());
        let a = Lease::new(
            store.clone(),
            key,
            "10.0.0.1@100",
            Duration::from_secs(30),
        );
        let b = Lease::new(
            store.clone(),
            key,
            "10.0.0.2@200",
            Duration::from_secs(30),
        );
        (store, a, b)
    }

    #[tokio::test]
    async fn second_fetch_reports_holder() {
        let (_store, a, b) = lease_pair("maintain_bsc_lock_0");
        a.fetch().await.unwrap();
        match b.fetch().await {
            Err(Error::LeaseBusy { holder, .. }) => {
                assert_eq!(holder, "10.0.0.1@100")
            }
            other => panic!("expected busy, got {other:?}"),
        }
        // local double fetch is its own error class
        assert!(matches!(a.fetch().await, Err(Error::LeaseAlreadyHeld)));
    }

    #[tokio::test]
    async fn handover_after_release() {
        let (_store, a, b) = lease_pair("sync_bsc_lock_3");
        a.fetch().await.unwrap();
        a.release().await;
        b.fetch().await.unwrap();
        assert!(b.is_held().await);
        assert!(!a.is_held().await);
    }

    #[tokio::test]
    async fn handover_after_ttl_expiry() {
        let store = Arc::new(InMemoryStore::default());
        let a = Lease::new(store.clone(), "k", "a@1", Duration::from_millis(40));
        let b = Lease::new(store.clone(), "k", "b@2", Duration::from_secs(30));
        a.fetch().await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        b.fetch().await.unwrap();
        // the stale holder notices on its next refresh
        assert!(matches!(a.refresh().await, Err(Error::LeaseNotHeld)));
    }

    #[tokio::test]
    async fn fetch_or_refresh_covers_both_states() {
        let (_store, a, _b) = lease_pair("update_bsc_lock_0");
        a.fetch_or_refresh().await.unwrap();
        a.fetch_or_refresh().await.unwrap();
        assert!(a.is_held().await);
    }

    #[tokio::test]
    async fn release_without_hold_is_noop() {
        let (_store, a, _b) = lease_pair("x");
        a.release().await;
        assert!(!a.is_held().await);
    }

    #[tokio::test]
    async fn compound_refresh_reports_missing_member() {
        let store = Arc::new(InMemoryStore::default());
        let held = Arc::new(Lease::new(
            store.clone(),
            "held",
            "a@1",
            Duration::from_secs(30),
        ));
        let idle = Arc::new(Lease::new(
            store.clone(),
            "idle",
            "a@1",
            Duration::from_secs(30),
        ));
        held.fetch().await.unwrap();
        let compound = CompoundLease::new(vec![held.clone(), idle]);
        assert!(compound.refresh().await.is_err());
        // the held member must still have been refreshed
        assert!(held.is_held().await);
    }
}
