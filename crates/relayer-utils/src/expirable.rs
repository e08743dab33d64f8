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

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

/// Milliseconds since the unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// A single cached value with a TTL.
///
/// `get` is the read fast-path and reports whether the value is still fresh;
/// `update` replaces the value and pushes the expiry `ttl_ms` into the
/// future. Used for the gas-price cache and the provable-height caches.
#[derive(Debug)]
pub struct Expirable<T> {
    ttl_ms: i64,
    inner: RwLock<(T, i64)>,
}

impl<T: Clone> Expirable<T> {
    /// Creates the cache with an initial value and an explicit expiry
    /// timestamp (unix millis). Pass `0` to start expired.
    pub fn new(value: T, ttl_ms: i64, expires_at: i64) -> Self {
        Self {
            ttl_ms,
            inner: RwLock::new((value, expires_at)),
        }
    }

    /// Returns the value and whether it is still fresh.
    pub fn get(&self) -> (T, bool) {
        let guard = self.inner.read();
        (guard.0.clone(), now_millis() < guard.1)
    }

    /// Replaces the value and resets the expiry to `now + ttl`.
    pub fn update(&self, value: T) {
        let mut guard = self.inner.write();
        *guard = (value, now_millis() + self.ttl_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_expired_with_zero_expiry() {
        let e = Expirable::<Option<u64>>::new(None, 1000, 0);
        let (v, fresh) = e.get();
        assert_eq!(v, None);
        assert!(!fresh);
    }

    #[test]
    fn update_refreshes_then_ttl_elapses() {
        let e = Expirable::new(0u64, 300, 0);
        e.update(42);
        let (v, fresh) = e.get();
        assert_eq!(v, 42);
        assert!(fresh);

        std::thread::sleep(Duration::from_millis(150));
        let (_, fresh) = e.get();
        assert!(fresh, "value must stay fresh inside the ttl window");

        std::thread::sleep(Duration::from_millis(250));
        let (v, fresh) = e.get();
        assert_eq!(v, 42, "stale reads still return the last value");
        assert!(!fresh);
    }

    #[test]
    fn update_extends_an_expired_value() {
        let e = Expirable::new(1u64, 200, 0);
        assert!(!e.get().1);
        e.update(2);
        assert_eq!(e.get(), (2, true));
    }
}
