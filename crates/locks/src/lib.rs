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

//! # PlexSpaces Distributed Locks
//!
//! ## Purpose
//! Lease-based mutual exclusion for processes that share a key-value store.
//! There is no lock manager process: the store's atomic primitives are the
//! only synchronisation point.
//!
//! ## Architecture Context
//! - **Lock Handle** ([`DistributedLock`]): key, ownership token, lease,
//!   cancellation context and store; drives one acquire/release cycle
//! - **Atomic Script Executor** ([`LockStore`]): acquire, release and extend
//!   primitives, each one indivisible operation in the store
//!
//! ## Design Decisions
//! - **Token-checked release**: release deletes the record only if it still
//!   holds the caller's token, in one server-side script. A delayed release
//!   from an expired holder cannot delete the next holder's record.
//! - **Lease expiry**: a crashed holder blocks others for at most one lease
//! - **No internal retry**: contention and store failures are returned as
//!   distinct errors; retry policy belongs to the caller
//! - **Opt-in renewal**: [`DistributedLock::start_renewal`] keeps long work
//!   covered and reports lease loss through a [`LeaseMonitor`]
//!
//! This is a best-effort lock, not consensus: acknowledged writes lost in a
//! store failover can let two holders overlap.
//!
//! ## Backend Support
//!
//! - **InMemory**: single process, for tests (feature: `memory-backend`)
//! - **Redis**: Lua scripts with native `PX` expiry (feature: `redis-backend`)
//!
//! ## Examples
//!
//! ```rust,no_run
//! use plexspaces_locks::{redis::RedisLockStore, DistributedLock, LockError, LockOptions};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RedisLockStore::new("redis://localhost:6379", "myapp").await?);
//! let mut lock = DistributedLock::new(
//!     CancellationToken::new(),
//!     store,
//!     "job-42",
//!     LockOptions::new().with_lease_duration(Duration::from_secs(10)),
//! )?;
//!
//! match lock.lock().await {
//!     Ok(()) => {
//!         // ... protected work ...
//!         lock.unlock().await?;
//!     }
//!     Err(LockError::LockHeld(_)) => { /* back off and retry later */ }
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod handle;
pub mod renewal;
pub mod scripts;
pub mod store;

#[cfg(feature = "memory-backend")]
pub mod memory;

#[cfg(feature = "redis-backend")]
pub mod redis;

pub use config::{create_lock_store_from_config, create_lock_store_from_env, BackendType, LockConfig};
pub use error::{LockError, LockResult, StoreError, StoreResult};
pub use handle::{generate_token, DistributedLock, LockOptions, LockState, DEFAULT_LEASE_DURATION};
pub use renewal::LeaseMonitor;
pub use store::LockStore;
