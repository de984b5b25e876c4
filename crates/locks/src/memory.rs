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

//! In-memory lock store implementation (for testing).

use crate::{LockStore, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Clone, Debug)]
struct Record {
    token: String,
    expires_at: Instant,
}

impl Record {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-memory lock store (for testing).
///
/// ## Purpose
/// Provides a simple in-process implementation of `LockStore` for tests and
/// single-process scenarios.
///
/// ## Design
/// Every primitive runs under one mutex, which gives it the same
/// indivisibility a Lua script has on Redis. Expiry uses
/// `tokio::time::Instant`, so tests can pause and advance time.
///
/// ## Limitations
/// - Not persistent (records lost on restart)
/// - Not distributed (single process only)
/// - Expired records are purged lazily: when the key is next touched, and in
///   a full sweep whenever a new record is inserted or `len()` is called
#[derive(Clone, Default)]
pub struct MemoryLockStore {
    records: Arc<Mutex<HashMap<String, Record>>>,
}

impl MemoryLockStore {
    /// Create a new in-memory lock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the record at `key` regardless of ownership.
    ///
    /// Test hook for simulating another process or a lost write.
    pub async fn force_set(&self, key: &str, token: &str, lease: Duration) {
        let mut records = self.records.lock().await;
        records.insert(
            key.to_string(),
            Record {
                token: token.to_string(),
                expires_at: Instant::now() + lease,
            },
        );
    }

    /// Delete the record at `key` regardless of ownership.
    pub async fn force_delete(&self, key: &str) {
        self.records.lock().await.remove(key);
    }

    /// Number of live records.
    pub async fn len(&self) -> usize {
        let mut records = self.records.lock().await;
        Self::purge_expired(&mut records, Instant::now());
        records.len()
    }

    /// Number of records held in the map, expired ones included.
    #[cfg(test)]
    async fn stored(&self) -> usize {
        self.records.lock().await.len()
    }

    /// True when no live record exists.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn live<'a>(records: &'a mut HashMap<String, Record>, key: &str, now: Instant) -> Option<&'a mut Record> {
        if records.get(key).is_some_and(|r| !r.is_live(now)) {
            records.remove(key);
        }
        records.get_mut(key)
    }

    fn purge_expired(records: &mut HashMap<String, Record>, now: Instant) {
        records.retain(|_, r| r.is_live(now));
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_acquire(&self, key: &str, token: &str, lease: Duration) -> StoreResult<bool> {
        let mut records = self.records.lock().await;
        let now = Instant::now();

        match Self::live(&mut records, key, now) {
            Some(existing) if existing.token == token => {
                existing.expires_at = now + lease;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                Self::purge_expired(&mut records, now);
                records.insert(
                    key.to_string(),
                    Record {
                        token: token.to_string(),
                        expires_at: now + lease,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, token: &str) -> StoreResult<bool> {
        let mut records = self.records.lock().await;
        let now = Instant::now();

        let owned = Self::live(&mut records, key, now).is_some_and(|r| r.token == token);
        if owned {
            records.remove(key);
        }
        Ok(owned)
    }

    async fn extend(&self, key: &str, token: &str, lease: Duration) -> StoreResult<bool> {
        let mut records = self.records.lock().await;
        let now = Instant::now();

        match Self::live(&mut records, key, now) {
            Some(existing) if existing.token == token => {
                existing.expires_at = now + lease;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn owner(&self, key: &str) -> StoreResult<Option<String>> {
        let mut records = self.records.lock().await;
        Ok(Self::live(&mut records, key, Instant::now()).map(|r| r.token.clone()))
    }

    async fn remaining_lease(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut records = self.records.lock().await;
        let now = Instant::now();
        Ok(Self::live(&mut records, key, now).map(|r| r.expires_at - now))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_acquire_lock() {
        let store = MemoryLockStore::new();
        assert!(store.try_acquire("test-lock", "node-1", LEASE).await.unwrap());
        assert_eq!(store.owner("test-lock").await.unwrap().as_deref(), Some("node-1"));
    }

    #[tokio::test]
    async fn test_acquire_lock_already_held() {
        let store = MemoryLockStore::new();
        assert!(store.try_acquire("test-lock", "node-1", LEASE).await.unwrap());
        assert!(!store.try_acquire("test-lock", "node-2", LEASE).await.unwrap());
        assert_eq!(store.owner("test-lock").await.unwrap().as_deref(), Some("node-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_same_token_refreshes_expiry() {
        let store = MemoryLockStore::new();
        store.try_acquire("test-lock", "node-1", Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;

        assert!(store.try_acquire("test-lock", "node-1", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.remaining_lease("test-lock").await.unwrap(), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_release_lock() {
        let store = MemoryLockStore::new();
        store.try_acquire("test-lock", "node-1", LEASE).await.unwrap();

        assert!(store.release("test-lock", "node-1").await.unwrap());
        assert!(store.owner("test-lock").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_release_lock_wrong_token() {
        let store = MemoryLockStore::new();
        store.try_acquire("test-lock", "node-1", LEASE).await.unwrap();

        assert!(!store.release("test-lock", "node-2").await.unwrap());
        assert_eq!(store.owner("test-lock").await.unwrap().as_deref(), Some("node-1"));
    }

    #[tokio::test]
    async fn test_release_lock_not_found() {
        let store = MemoryLockStore::new();
        assert!(!store.release("non-existent", "node-1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_expired_lock() {
        let store = MemoryLockStore::new();
        store.try_acquire("test-lock", "node-1", Duration::from_secs(1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(store.try_acquire("test-lock", "node-2", LEASE).await.unwrap());
        assert_eq!(store.owner("test-lock").await.unwrap().as_deref(), Some("node-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_after_expiry_keeps_new_holder() {
        let store = MemoryLockStore::new();
        store.try_acquire("test-lock", "node-1", Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        store.try_acquire("test-lock", "node-2", LEASE).await.unwrap();

        // Delayed release from the expired holder must not touch node-2's record
        assert!(!store.release("test-lock", "node-1").await.unwrap());
        assert_eq!(store.owner("test-lock").await.unwrap().as_deref(), Some("node-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_lock() {
        let store = MemoryLockStore::new();
        store.try_acquire("test-lock", "node-1", Duration::from_secs(2)).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(store.extend("test-lock", "node-1", Duration::from_secs(10)).await.unwrap());
        assert_eq!(store.remaining_lease("test-lock").await.unwrap(), Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_expired_lock() {
        let store = MemoryLockStore::new();
        store.try_acquire("test-lock", "node-1", Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(!store.extend("test-lock", "node-1", LEASE).await.unwrap());
        assert!(store.owner("test-lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extend_wrong_token() {
        let store = MemoryLockStore::new();
        store.try_acquire("test-lock", "node-1", LEASE).await.unwrap();
        assert!(!store.extend("test-lock", "node-2", LEASE).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_lock_acquisition() {
        let store = Arc::new(MemoryLockStore::new());
        let mut handles = vec![];

        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .try_acquire("concurrent-lock", &format!("node-{}", i), LEASE)
                    .await
                    .unwrap()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_force_delete_frees_key() {
        let store = MemoryLockStore::new();
        store.try_acquire("test-lock", "node-1", LEASE).await.unwrap();
        store.force_delete("test-lock").await;

        assert!(!store.extend("test-lock", "node-1", LEASE).await.unwrap());
        assert!(store.try_acquire("test-lock", "node-2", LEASE).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_records_are_swept() {
        let store = MemoryLockStore::new();
        for i in 0..5 {
            store
                .try_acquire(&format!("abandoned-{}", i), "node-1", Duration::from_secs(1))
                .await
                .unwrap();
        }
        assert_eq!(store.stored().await, 5);

        tokio::time::advance(Duration::from_secs(2)).await;

        // Inserting an unrelated key drops every expired record
        store.try_acquire("fresh", "node-2", LEASE).await.unwrap();
        assert_eq!(store.stored().await, 1);

        store.try_acquire("short", "node-2", Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.len().await, 1);
        assert_eq!(store.stored().await, 1);
    }

    #[tokio::test]
    async fn test_multiple_locks() {
        let store = MemoryLockStore::new();
        assert!(store.try_acquire("lock-1", "node-1", LEASE).await.unwrap());
        assert!(store.try_acquire("lock-2", "node-1", LEASE).await.unwrap());
        assert_eq!(store.len().await, 2);
    }
}
