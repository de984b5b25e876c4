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

//! Error types for distributed lock operations.

use std::time::Duration;
use thiserror::Error;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Result type for raw backing-store primitives.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during lock operations.
///
/// Only three variants describe the outcome of a store round trip:
/// [`LockError::LockHeld`], [`LockError::LockNotHeld`] and
/// [`LockError::StoreUnavailable`]. The rest are raised locally before any
/// network I/O happens.
#[derive(Error, Debug)]
pub enum LockError {
    /// Acquisition contended: the key holds a different token
    #[error("Lock already held: {0}")]
    LockHeld(String),

    /// Release or renewal attempted on a key this handle does not own
    #[error("Lock not held: {0}")]
    LockNotHeld(String),

    /// Transport, timeout, cancellation or store-side failure.
    ///
    /// The requested operation may or may not have taken effect.
    #[error("Store unavailable for lock {key}: {source}")]
    StoreUnavailable {
        key: String,
        #[source]
        source: StoreError,
    },

    /// `lock()` called on a handle that already holds its lock
    #[error("Lock already acquired by this handle: {0}")]
    AlreadyAcquired(String),

    /// Invalid lock key
    #[error("Invalid lock key: {0}")]
    InvalidKey(String),

    /// Invalid ownership token
    #[error("Invalid lock token: {0}")]
    InvalidToken(String),

    /// Lease duration must be at least one millisecond
    #[error("Invalid lease duration: {0:?}")]
    InvalidLeaseDuration(Duration),

    /// Renewal interval must be non-zero and shorter than the lease
    #[error("Invalid renewal interval {interval:?} for lease {lease:?}")]
    InvalidRenewalInterval { interval: Duration, lease: Duration },

    /// Renewal already running for this handle
    #[error("Lease renewal already running: {0}")]
    RenewalAlreadyRunning(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LockError {
    /// Wrap a store failure for `key`.
    pub fn unavailable(key: impl Into<String>, source: StoreError) -> Self {
        LockError::StoreUnavailable {
            key: key.into(),
            source,
        }
    }

    /// True when another holder owns the key. Safe to retry with backoff.
    pub fn is_contended(&self) -> bool {
        matches!(self, LockError::LockHeld(_))
    }

    /// True when the store outcome is unknown.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, LockError::StoreUnavailable { .. })
    }
}

/// Failures of the backing store itself.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Transport, protocol or script failure reported by the store client
    #[error("Store transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Operation exceeded the configured timeout
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The governing context was cancelled while the call was in flight
    #[error("operation cancelled")]
    Cancelled,

    /// Unexpected reply or backend-specific failure
    #[error("Backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Transport(Box::new(err))
    }
}
