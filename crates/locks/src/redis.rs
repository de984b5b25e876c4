// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexSpaces.
//
// PlexSpaces is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexSpaces is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexSpaces. If not, see <https://www.gnu.org/licenses/>.

//! Redis-based lock store implementation.
//!
//! ## Purpose
//! Executes the acquire, release and extend primitives as server-side Lua
//! scripts (see [`crate::scripts`]), so each one is a single atomic step on
//! the Redis server. Record expiry is native Redis `PX`/`PEXPIRE`.
//!
//! ## Usage
//! ```rust,no_run
//! use plexspaces_locks::{LockStore, redis::RedisLockStore};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisLockStore::new("redis://localhost:6379", "myapp").await?;
//! let acquired = store.try_acquire("job-42", "tokA", Duration::from_secs(10)).await?;
//! assert!(acquired);
//! store.release("job-42", "tokA").await?;
//! # Ok(())
//! # }
//! ```

use crate::{scripts, LockError, LockResult, LockStore, StoreError, StoreResult};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use std::time::Duration;
use tracing::{debug, instrument};

/// Redis-based lock store.
///
/// ## Architecture
/// - `ConnectionManager` for a multiplexed connection with automatic reconnect
/// - Scripts are invoked by SHA (`EVALSHA`); the `redis` crate falls back to
///   `EVAL` and caches the script when the server reports `NOSCRIPT`
/// - Namespace prefix so several apps can share one Redis instance
#[derive(Clone)]
pub struct RedisLockStore {
    manager: ConnectionManager,
    namespace: String,
    acquire: Script,
    release: Script,
    extend: Script,
}

impl RedisLockStore {
    /// Create a new Redis lock store.
    ///
    /// Example URLs:
    /// - `redis://127.0.0.1/`
    /// - `rediss://host:6379/`
    ///
    /// ## Errors
    /// - [`LockError::ConfigError`]: invalid URL or connection failed
    #[instrument(skip(url))]
    pub async fn new(url: &str, namespace: &str) -> LockResult<Self> {
        let client = Client::open(url)
            .map_err(|e| LockError::ConfigError(format!("failed to create redis client: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| connect_error(namespace, e))?;

        debug!("Connected Redis lock store");
        Ok(Self::with_connection(manager, namespace))
    }

    /// Build a store around an existing connection manager.
    pub fn with_connection(manager: ConnectionManager, namespace: &str) -> Self {
        Self {
            manager,
            namespace: namespace.trim_end_matches(':').to_string(),
            acquire: Script::new(scripts::ACQUIRE),
            release: Script::new(scripts::RELEASE),
            extend: Script::new(scripts::EXTEND),
        }
    }

    /// Key as stored in Redis.
    pub fn prefixed_key(&self, key: &str) -> String {
        prefixed(&self.namespace, key)
    }
}

fn prefixed(namespace: &str, key: &str) -> String {
    if namespace.is_empty() {
        key.to_string()
    } else {
        format!("{}:{}", namespace, key)
    }
}

fn changed(reply: i64) -> StoreResult<bool> {
    match reply {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::Backend(format!("unexpected script reply: {other}"))),
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    #[instrument(skip(self, token), fields(backend = "redis"))]
    async fn try_acquire(&self, key: &str, token: &str, lease: Duration) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let mut invocation = self.acquire.prepare_invoke();
        invocation
            .key(self.prefixed_key(key))
            .arg(token)
            .arg(scripts::lease_millis(lease));

        let reply: i64 = invocation.invoke_async(&mut conn).await?;
        changed(reply)
    }

    #[instrument(skip(self, token), fields(backend = "redis"))]
    async fn release(&self, key: &str, token: &str) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let mut invocation = self.release.prepare_invoke();
        invocation.key(self.prefixed_key(key)).arg(token);

        let reply: i64 = invocation.invoke_async(&mut conn).await?;
        changed(reply)
    }

    #[instrument(skip(self, token), fields(backend = "redis"))]
    async fn extend(&self, key: &str, token: &str, lease: Duration) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let mut invocation = self.extend.prepare_invoke();
        invocation
            .key(self.prefixed_key(key))
            .arg(token)
            .arg(scripts::lease_millis(lease));

        let reply: i64 = invocation.invoke_async(&mut conn).await?;
        changed(reply)
    }

    async fn owner(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(self.prefixed_key(key)).await?;
        Ok(value)
    }

    async fn remaining_lease(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.manager.clone();
        let pttl: i64 = conn.pttl(self.prefixed_key(key)).await?;

        // -2: no key, -1: key without expiry (never written by these scripts)
        match pttl {
            ms if ms >= 0 => Ok(Some(Duration::from_millis(ms as u64))),
            -1 => Ok(Some(Duration::MAX)),
            _ => Ok(None),
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// No lock key is involved yet, so this is not a `StoreUnavailable`.
fn connect_error(namespace: &str, err: redis::RedisError) -> LockError {
    LockError::ConfigError(format!(
        "failed to connect redis lock store (namespace {namespace}): {err}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_names_namespace() {
        let err = connect_error(
            "myapp",
            redis::RedisError::from((redis::ErrorKind::IoError, "connection refused")),
        );
        match err {
            LockError::ConfigError(msg) => {
                assert!(msg.contains("namespace myapp"));
                assert!(msg.contains("connection refused"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!connect_error("myapp", redis::RedisError::from((redis::ErrorKind::IoError, "x"))).is_ambiguous());
    }

    #[test]
    fn test_prefixed_key() {
        assert_eq!(prefixed("myapp", "job-42"), "myapp:job-42");
        assert_eq!(prefixed("", "job-42"), "job-42");
    }

    #[test]
    fn test_changed_reply() {
        assert!(changed(1).unwrap());
        assert!(!changed(0).unwrap());
        assert!(matches!(changed(7), Err(StoreError::Backend(_))));
    }

    async fn create_test_store() -> RedisLockStore {
        RedisLockStore::new("redis://localhost:6379", "plexspaces-locks-test")
            .await
            .expect("Failed to connect to Redis (ensure Redis is running)")
    }

    #[tokio::test]
    #[ignore] // Requires running Redis instance
    async fn test_acquire_release() {
        let store = create_test_store().await;
        let lease = Duration::from_secs(10);

        assert!(store.try_acquire("unit-acquire", "tokA", lease).await.unwrap());
        assert!(!store.try_acquire("unit-acquire", "tokB", lease).await.unwrap());
        assert!(!store.release("unit-acquire", "tokB").await.unwrap());
        assert!(store.release("unit-acquire", "tokA").await.unwrap());
        assert!(store.owner("unit-acquire").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_extend_sets_pttl() {
        let store = create_test_store().await;

        store.try_acquire("unit-extend", "tokA", Duration::from_secs(2)).await.unwrap();
        assert!(store.extend("unit-extend", "tokA", Duration::from_secs(60)).await.unwrap());

        let remaining = store.remaining_lease("unit-extend").await.unwrap().unwrap();
        assert!(remaining > Duration::from_secs(50));

        store.release("unit-extend", "tokA").await.unwrap();
    }
}
