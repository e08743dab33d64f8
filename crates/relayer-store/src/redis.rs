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

use std::future::Future;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::Script;
use tkm_relayer_utils::Result;

use crate::{LockStore, STORE_TIMEOUT};

// Token-checked lease scripts, so only the holder can release or extend.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
  return redis.call("del", KEYS[1])
else
  return 0
end"#;

const REFRESH_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
  return redis.call("pexpire", KEYS[1], ARGV[2])
else
  return 0
end"#;

/// Store backend over a redis server.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish()
    }
}

impl RedisStore {
    /// Connects to the server at `url` (`redis://[:pass@]host:port/db`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(
            STORE_TIMEOUT * 2,
            ConnectionManager::new(client),
        )
        .await??;
        Ok(Self { conn })
    }

    async fn bounded<T, F>(fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, redis::RedisError>>,
    {
        Ok(tokio::time::timeout(STORE_TIMEOUT, fut).await??)
    }
}

#[async_trait::async_trait]
impl LockStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Self::bounded(
            redis::cmd("GET")
                .arg(key)
                .query_async::<_, Option<String>>(&mut conn),
        )
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        Self::bounded(
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query_async::<_, ()>(&mut conn),
        )
        .await
    }

    async fn obtain_lease(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply = Self::bounded(
            redis::cmd("SET")
                .arg(key)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .query_async::<_, Option<String>>(&mut conn),
        )
        .await?;
        Ok(reply.is_some())
    }

    async fn refresh_lease(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let script = Script::new(REFRESH_SCRIPT);
        let extended: i64 = Self::bounded(
            script
                .key(key)
                .arg(token)
                .arg(ttl.as_millis() as u64)
                .invoke_async(&mut conn),
        )
        .await?;
        Ok(extended == 1)
    }

    async fn release_lease(&self, key: &str, token: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let script = Script::new(RELEASE_SCRIPT);
        let _released: i64 = Self::bounded(
            script.key(key).arg(token).invoke_async(&mut conn),
        )
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<String> {
        let mut conn = self.conn.clone();
        let pong: String =
            Self::bounded(redis::cmd("PING").query_async(&mut conn)).await?;
        if pong != "PONG" {
            return Err(tkm_relayer_utils::Error::Store(format!(
                "unexpected ping reply: {pong}"
            )));
        }
        let info: String = Self::bounded(
            redis::cmd("INFO").arg("server").query_async(&mut conn),
        )
        .await?;
        let version = info
            .lines()
            .find_map(|line| line.strip_prefix("redis_version:"))
            .unwrap_or("unknown")
            .trim()
            .to_string();
        Ok(format!("redis {version}"))
    }
}
