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

//! Backing-store trait for atomic lock primitives.

use crate::StoreResult;
use async_trait::async_trait;
use std::time::Duration;

/// Atomic lock primitives against a shared key-value store.
///
/// ## Purpose
/// Every method is a single indivisible operation from the perspective of
/// every other contender. Backends must never split a primitive into a read
/// followed by a write issued from the client: that reopens the window in
/// which an expired holder deletes the record of the next holder.
///
/// ## Design
/// - **Acquire**: set `key = token` with expiry, only if absent
/// - **Release**: delete `key` only if it still holds `token`
/// - **Extend**: reset the expiry only if `key` still holds `token`
///
/// Key, token and lease are always parameters, so one script serves every
/// key and every caller.
///
/// ## Example
/// ```rust,ignore
/// use plexspaces_locks::{LockStore, memory::MemoryLockStore};
///
/// let store = MemoryLockStore::new();
/// assert!(store.try_acquire("job-42", "tokA", lease).await?);
/// assert!(!store.try_acquire("job-42", "tokB", lease).await?);
/// assert!(store.release("job-42", "tokA").await?);
/// ```
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Acquire primitive.
    ///
    /// ## Behavior
    /// - Key absent: store `token` with expiry `lease`, return `true`
    /// - Key holds `token`: reset expiry to `lease`, return `true`
    /// - Key holds another token: no change, return `false`
    ///
    /// The second case lets a caller retry after an ambiguous failure without
    /// locking itself out; it never affects a record owned by another token.
    async fn try_acquire(&self, key: &str, token: &str, lease: Duration) -> StoreResult<bool>;

    /// Release primitive (compare-and-delete).
    ///
    /// ## Returns
    /// - `Ok(true)`: record existed, held `token`, and was deleted
    /// - `Ok(false)`: record absent or held by another token; nothing changed
    async fn release(&self, key: &str, token: &str) -> StoreResult<bool>;

    /// Extend primitive (compare-and-expire).
    ///
    /// ## Returns
    /// - `Ok(true)`: expiry reset to `lease`
    /// - `Ok(false)`: record absent or held by another token; nothing changed
    async fn extend(&self, key: &str, token: &str, lease: Duration) -> StoreResult<bool>;

    /// Current token stored at `key`, if any.
    async fn owner(&self, key: &str) -> StoreResult<Option<String>>;

    /// Remaining lease of the record at `key`, if any.
    async fn remaining_lease(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Backend label used in logs and metrics.
    fn backend_name(&self) -> &'static str;
}
