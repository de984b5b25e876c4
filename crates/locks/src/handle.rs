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

//! Lock handle: one acquire/release cycle against a [`LockStore`].
//!
//! ## Design
//! - The handle is a plain value. There is no registry of locks and no
//!   process-wide state; construct a fresh handle (and store) per test.
//! - `lock()` and `unlock()` take `&mut self`, so one handle has one owner.
//!   Share it across tasks only behind the caller's own mutex.
//! - Each call is exactly one store round trip. No retry, no polling: retry
//!   and backoff belong to the caller.
//! - Every store call races the handle's [`CancellationToken`] and the
//!   optional operation timeout, and fails fast with
//!   [`LockError::StoreUnavailable`] when either fires.

use crate::renewal::{LeaseMonitor, RenewalExit, RenewalTask};
use crate::{LockError, LockResult, LockStore, StoreError, StoreResult};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

/// Lease applied when no explicit duration is configured.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(10);

/// Shortest lease the store can express.
pub const MIN_LEASE_DURATION: Duration = Duration::from_millis(1);

/// Generate an unguessable ownership token (128 bits from the OS CSPRNG, hex).
pub fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Options recognized by [`DistributedLock::new`].
///
/// ## Example
/// ```rust
/// use plexspaces_locks::LockOptions;
/// use std::time::Duration;
///
/// let options = LockOptions::new()
///     .with_token("tokA")
///     .with_lease_duration(Duration::from_secs(10));
/// ```
#[derive(Clone, Debug, Default)]
pub struct LockOptions {
    token: Option<String>,
    lease_duration: Option<Duration>,
    operation_timeout: Option<Duration>,
}

impl LockOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a caller-supplied token instead of generating one.
    ///
    /// The token must be unique among concurrent holders of the key.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Override [`DEFAULT_LEASE_DURATION`].
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = Some(lease);
        self
    }

    /// Bound every store round trip issued by the handle.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }
}

/// Lifecycle of one handle.
///
/// `Unacquired → Held → Released`, or `Held → Expired` once the handle learns
/// its record is gone (lease lapsed or taken over).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockState {
    Unacquired,
    Held,
    Released,
    Expired,
}

/// Run `op` unless `ctx` is cancelled, bounded by `timeout`.
pub(crate) async fn guarded<T, F>(ctx: &CancellationToken, timeout: Option<Duration>, op: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    if ctx.is_cancelled() {
        return Err(StoreError::Cancelled);
    }

    let bounded = async move {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, op).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(limit)),
            },
            None => op.await,
        }
    };

    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(StoreError::Cancelled),
        result = bounded => result,
    }
}

/// Distributed mutex handle bound to one key.
///
/// ## Example
/// ```rust
/// use plexspaces_locks::{DistributedLock, LockError, LockOptions, memory::MemoryLockStore};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), LockError> {
/// let store = Arc::new(MemoryLockStore::new());
/// let mut lock = DistributedLock::new(
///     CancellationToken::new(),
///     store,
///     "job-42",
///     LockOptions::new(),
/// )?;
///
/// lock.lock().await?;
/// // ... protected work ...
/// lock.unlock().await?;
/// # Ok(())
/// # }
/// ```
///
/// Dropping a handle does not release its record. Any running renewal is
/// cancelled, so the record lapses at most one lease later.
pub struct DistributedLock {
    ctx: CancellationToken,
    store: Arc<dyn LockStore>,
    key: String,
    token: String,
    token_supplied: bool,
    lease_duration: Duration,
    operation_timeout: Option<Duration>,
    state: LockState,
    renewal: Option<RenewalTask>,
}

impl DistributedLock {
    /// Create a handle. Performs no I/O.
    ///
    /// ## Errors
    /// - [`LockError::InvalidKey`]: empty key
    /// - [`LockError::InvalidToken`]: empty supplied token
    /// - [`LockError::InvalidLeaseDuration`]: lease shorter than 1 ms
    pub fn new(
        ctx: CancellationToken,
        store: Arc<dyn LockStore>,
        key: impl Into<String>,
        options: LockOptions,
    ) -> LockResult<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(LockError::InvalidKey("lock key must not be empty".to_string()));
        }

        let lease_duration = options.lease_duration.unwrap_or(DEFAULT_LEASE_DURATION);
        if lease_duration < MIN_LEASE_DURATION {
            return Err(LockError::InvalidLeaseDuration(lease_duration));
        }

        if let Some(timeout) = options.operation_timeout {
            if timeout.is_zero() {
                return Err(LockError::ConfigError("operation timeout must be positive".to_string()));
            }
        }

        let (token, token_supplied) = match options.token {
            Some(token) if token.is_empty() => {
                return Err(LockError::InvalidToken("lock token must not be empty".to_string()));
            }
            Some(token) => (token, true),
            None => (generate_token(), false),
        };

        Ok(Self {
            ctx,
            store,
            key,
            token,
            token_supplied,
            lease_duration,
            operation_timeout: options.operation_timeout,
            state: LockState::Unacquired,
            renewal: None,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    /// True while the handle believes it owns the record.
    ///
    /// This is local knowledge only; the lease may have lapsed in the store.
    pub fn is_held(&self) -> bool {
        self.state == LockState::Held
    }

    /// Context governing this handle's store calls.
    pub fn context(&self) -> &CancellationToken {
        &self.ctx
    }

    /// Acquire the lock (one atomic store call).
    ///
    /// ## Returns
    /// - `Ok(())`: the store now holds `key → token` with the lease applied
    /// - `Err(LockError::LockHeld)`: another token owns the key
    /// - `Err(LockError::StoreUnavailable)`: outcome unknown; do not assume
    ///   the lock is held. Retrying `lock()` on the same handle is safe.
    /// - `Err(LockError::AlreadyAcquired)`: this handle already holds the lock
    #[instrument(skip(self), fields(key = %self.key, backend = self.store.backend_name()))]
    pub async fn lock(&mut self) -> LockResult<()> {
        match self.state {
            LockState::Held => return Err(LockError::AlreadyAcquired(self.key.clone())),
            // A record written by the previous cycle's token must never be
            // mistaken for ours again.
            LockState::Released | LockState::Expired if !self.token_supplied => {
                self.token = generate_token();
            }
            _ => {}
        }

        let backend = self.store.backend_name();
        let start = Instant::now();
        let result = guarded(
            &self.ctx,
            self.operation_timeout,
            self.store.try_acquire(&self.key, &self.token, self.lease_duration),
        )
        .await;
        metrics::histogram!("plexspaces_locks_acquire_duration_seconds", "backend" => backend)
            .record(start.elapsed().as_secs_f64());

        match result {
            Ok(true) => {
                self.state = LockState::Held;
                metrics::counter!("plexspaces_locks_acquire_total", "backend" => backend, "result" => "success")
                    .increment(1);
                debug!(lease_ms = self.lease_duration.as_millis() as u64, "Lock acquired");
                Ok(())
            }
            Ok(false) => {
                metrics::counter!("plexspaces_locks_acquire_total", "backend" => backend, "result" => "held")
                    .increment(1);
                debug!("Lock already held by another token");
                Err(LockError::LockHeld(self.key.clone()))
            }
            Err(e) => {
                metrics::counter!("plexspaces_locks_acquire_total", "backend" => backend, "result" => "error")
                    .increment(1);
                error!(error = %e, "Lock acquisition failed, state unknown");
                Err(LockError::unavailable(self.key.clone(), e))
            }
        }
    }

    /// Release the lock (one atomic compare-and-delete).
    ///
    /// Stops renewal first, awaiting its termination, so no extend can race
    /// the release.
    ///
    /// ## Returns
    /// - `Ok(())`: our record existed and was deleted
    /// - `Err(LockError::LockNotHeld)`: the handle never acquired, already
    ///   released, or the record expired / belongs to another token. The
    ///   store is left untouched.
    /// - `Err(LockError::StoreUnavailable)`: the record may still exist;
    ///   the handle stays `Held` so `unlock()` can be retried
    #[instrument(skip(self), fields(key = %self.key, backend = self.store.backend_name()))]
    pub async fn unlock(&mut self) -> LockResult<()> {
        self.stop_renewal().await;

        if self.state != LockState::Held {
            return Err(LockError::LockNotHeld(self.key.clone()));
        }

        let backend = self.store.backend_name();
        let result = guarded(
            &self.ctx,
            self.operation_timeout,
            self.store.release(&self.key, &self.token),
        )
        .await;

        match result {
            Ok(true) => {
                self.state = LockState::Released;
                metrics::counter!("plexspaces_locks_release_total", "backend" => backend, "result" => "success")
                    .increment(1);
                debug!("Lock released");
                Ok(())
            }
            Ok(false) => {
                self.state = LockState::Expired;
                metrics::counter!("plexspaces_locks_release_total", "backend" => backend, "result" => "not_held")
                    .increment(1);
                warn!("Lock record expired or taken over before release");
                Err(LockError::LockNotHeld(self.key.clone()))
            }
            Err(e) => {
                metrics::counter!("plexspaces_locks_release_total", "backend" => backend, "result" => "error")
                    .increment(1);
                error!(error = %e, "Lock release failed, lock may still be held");
                Err(LockError::unavailable(self.key.clone(), e))
            }
        }
    }

    /// Start background lease renewal.
    ///
    /// The task wakes every `interval` and extends the lease only while the
    /// record still holds this handle's token. It stops on [`stop_renewal`],
    /// on [`unlock`], or when the handle's context is cancelled.
    ///
    /// Watch the returned [`LeaseMonitor`] and abort protected work once it
    /// reports the lease lost.
    ///
    /// [`stop_renewal`]: DistributedLock::stop_renewal
    /// [`unlock`]: DistributedLock::unlock
    pub fn start_renewal(&mut self, interval: Duration) -> LockResult<LeaseMonitor> {
        if self.state != LockState::Held {
            return Err(LockError::LockNotHeld(self.key.clone()));
        }
        if interval.is_zero() || interval >= self.lease_duration {
            return Err(LockError::InvalidRenewalInterval {
                interval,
                lease: self.lease_duration,
            });
        }
        if self.renewal.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(LockError::RenewalAlreadyRunning(self.key.clone()));
        }

        let (task, monitor) = RenewalTask::spawn(
            self.store.clone(),
            self.key.clone(),
            self.token.clone(),
            self.lease_duration,
            interval,
            self.operation_timeout,
            self.ctx.child_token(),
        );
        self.renewal = Some(task);
        Ok(monitor)
    }

    /// Stop renewal (if running) and wait for the task to exit.
    pub async fn stop_renewal(&mut self) {
        let Some(task) = self.renewal.take() else {
            return;
        };

        if task.stop().await == RenewalExit::LeaseLost && self.state == LockState::Held {
            self.state = LockState::Expired;
        }
    }

    /// Acquire, run `work`, then release.
    ///
    /// The lock is released whether or not `work` succeeded on its own terms;
    /// its output is returned only when both lock and unlock succeed.
    pub async fn run_exclusive<F, Fut, T>(&mut self, work: F) -> LockResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.lock().await?;
        let output = work().await;
        self.unlock().await?;
        Ok(output)
    }
}

impl fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("lease_duration", &self.lease_duration)
            .field("backend", &self.store.backend_name())
            .field("renewing", &self.renewal.is_some())
            .finish_non_exhaustive()
    }
}
