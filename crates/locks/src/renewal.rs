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

//! Background lease renewal (heartbeat).
//!
//! ## Design
//! - One tokio task per handle, ticking at a fixed interval shorter than the
//!   lease, extending the record only while it still holds our token
//! - Stops on cancellation of its token (a child of the handle's context),
//!   and never issues an extend once cancellation has been observed
//! - The first failure ends the task: the error goes to the
//!   [`LeaseMonitor`] channel and its `lost` token is cancelled, so
//!   protected work can abort (fail-safe)
//! - Dropping the owning handle cancels the task without awaiting it, so an
//!   abandoned handle stops extending and its record lapses one lease later

use crate::handle::guarded;
use crate::{LockError, LockStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, warn};

/// Why the renewal task exited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RenewalExit {
    /// Stopped by the owner or by context cancellation
    Cancelled,
    /// Record absent or owned by another token
    LeaseLost,
    /// Store failure; the record may or may not still be ours
    StoreFailed,
}

/// Observer for a running renewal.
///
/// ## Example
/// ```rust,ignore
/// let monitor = lock.start_renewal(Duration::from_secs(3))?;
/// tokio::select! {
///     _ = monitor.lost() => { /* abort protected work */ }
///     result = do_work() => { /* ... */ }
/// }
/// lock.unlock().await?;
/// ```
#[derive(Debug)]
pub struct LeaseMonitor {
    lost: CancellationToken,
    failures: mpsc::Receiver<LockError>,
}

impl LeaseMonitor {
    /// Token cancelled once the lease is considered lost.
    pub fn lost_token(&self) -> CancellationToken {
        self.lost.clone()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// Resolves when the lease is considered lost.
    pub async fn lost(&self) {
        self.lost.cancelled().await
    }

    /// Next renewal failure. `None` once the renewal task has exited.
    pub async fn next_failure(&mut self) -> Option<LockError> {
        self.failures.recv().await
    }
}

/// Handle to the spawned renewal task, owned by `DistributedLock`.
///
/// Dropping it cancels the task.
pub(crate) struct RenewalTask {
    cancel: DropGuard,
    join: JoinHandle<RenewalExit>,
}

impl RenewalTask {
    pub(crate) fn spawn(
        store: Arc<dyn LockStore>,
        key: String,
        token: String,
        lease: Duration,
        interval: Duration,
        operation_timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> (Self, LeaseMonitor) {
        let lost = CancellationToken::new();
        let (failures_tx, failures_rx) = mpsc::channel(1);

        let worker = Renewer {
            store,
            key,
            token,
            lease,
            interval,
            operation_timeout,
            cancel: cancel.clone(),
            lost: lost.clone(),
            failures: failures_tx,
        };
        let join = tokio::spawn(worker.run());

        (
            Self {
                cancel: cancel.drop_guard(),
                join,
            },
            LeaseMonitor {
                lost,
                failures: failures_rx,
            },
        )
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel and wait for the task to exit.
    pub(crate) async fn stop(self) -> RenewalExit {
        self.cancel.disarm().cancel();
        match self.join.await {
            Ok(exit) => exit,
            Err(e) => {
                error!(error = %e, "Lease renewal task panicked");
                RenewalExit::StoreFailed
            }
        }
    }
}

struct Renewer {
    store: Arc<dyn LockStore>,
    key: String,
    token: String,
    lease: Duration,
    interval: Duration,
    operation_timeout: Option<Duration>,
    cancel: CancellationToken,
    lost: CancellationToken,
    failures: mpsc::Sender<LockError>,
}

impl Renewer {
    async fn run(self) -> RenewalExit {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return RenewalExit::Cancelled,
                _ = ticker.tick() => {}
            }

            let result = guarded(
                &self.cancel,
                self.operation_timeout,
                self.store.extend(&self.key, &self.token, self.lease),
            )
            .await;

            match result {
                Ok(true) => {
                    metrics::counter!("plexspaces_locks_renew_total", "result" => "success").increment(1);
                    debug!(key = %self.key, "Lease renewed");
                }
                Ok(false) => {
                    metrics::counter!("plexspaces_locks_renew_total", "result" => "lost").increment(1);
                    warn!(key = %self.key, "Lease lost: record expired or taken over");
                    self.fail(LockError::LockNotHeld(self.key.clone()));
                    return RenewalExit::LeaseLost;
                }
                Err(StoreError::Cancelled) => return RenewalExit::Cancelled,
                Err(e) => {
                    metrics::counter!("plexspaces_locks_renew_total", "result" => "error").increment(1);
                    error!(key = %self.key, error = %e, "Lease renewal failed, treating lease as lost");
                    self.fail(LockError::unavailable(self.key.clone(), e));
                    return RenewalExit::StoreFailed;
                }
            }
        }
    }

    fn fail(&self, err: LockError) {
        // Capacity 1 and a single failure per task: never full
        let _ = self.failures.try_send(err);
        self.lost.cancel();
    }
}
