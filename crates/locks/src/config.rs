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

//! Configuration support for lock store backends.
//!
//! ## Environment Variables
//!
//! ### Backend Selection
//! - `PLEXSPACES_LOCKS_BACKEND`: Backend type (default: "in-memory")
//!   - "in-memory" | "memory" → MemoryLockStore
//!   - "redis" → RedisLockStore
//!
//! ### Redis Configuration
//! - `PLEXSPACES_LOCKS_REDIS_URL`: Redis server URL (default: "redis://localhost:6379")
//! - `PLEXSPACES_LOCKS_REDIS_NAMESPACE`: Key prefix (default: "plexspaces:locks")
//!
//! ### Lock Defaults
//! - `PLEXSPACES_LOCKS_LEASE_MS`: Lease duration in milliseconds (default: 10000)
//! - `PLEXSPACES_LOCKS_OPERATION_TIMEOUT_MS`: Per-call timeout in milliseconds (default: none)
//!
//! ## Examples
//!
//! ```bash
//! export PLEXSPACES_LOCKS_BACKEND=redis
//! export PLEXSPACES_LOCKS_REDIS_URL=redis://localhost:6379
//! export PLEXSPACES_LOCKS_LEASE_MS=30000
//! cargo run
//! ```

use crate::handle::{DEFAULT_LEASE_DURATION, MIN_LEASE_DURATION};
use crate::{LockError, LockOptions, LockResult, LockStore};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_REDIS_NAMESPACE: &str = "plexspaces:locks";

/// Backend type configuration.
#[derive(Clone, Debug)]
pub enum BackendType {
    /// In-process backend (default)
    InMemory,
    /// Redis backend (requires redis-backend feature)
    Redis {
        /// Redis server URL
        url: String,
        /// Key namespace prefix
        namespace: String,
    },
}

#[allow(clippy::derivable_impls)]
impl Default for BackendType {
    fn default() -> Self {
        Self::InMemory
    }
}

/// Lock configuration.
#[derive(Clone, Debug)]
pub struct LockConfig {
    /// Backend type
    pub backend: BackendType,
    /// Lease applied by handles built from [`LockConfig::lock_options`]
    pub lease_duration: Duration,
    /// Optional bound on each store round trip
    pub operation_timeout: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::InMemory,
            lease_duration: DEFAULT_LEASE_DURATION,
            operation_timeout: None,
        }
    }
}

impl LockConfig {
    /// Create configuration from environment variables.
    ///
    /// See module documentation for the complete list.
    pub fn from_env() -> LockResult<Self> {
        let backend_str = std::env::var("PLEXSPACES_LOCKS_BACKEND")
            .unwrap_or_else(|_| "in-memory".to_string())
            .to_lowercase();

        let backend = match backend_str.as_str() {
            "in-memory" | "memory" => BackendType::InMemory,

            "redis" => {
                let url = std::env::var("PLEXSPACES_LOCKS_REDIS_URL")
                    .unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());
                let namespace = std::env::var("PLEXSPACES_LOCKS_REDIS_NAMESPACE")
                    .unwrap_or_else(|_| DEFAULT_REDIS_NAMESPACE.to_string());
                BackendType::Redis { url, namespace }
            }

            other => {
                return Err(LockError::ConfigError(format!(
                    "Unknown backend type: {}. Valid options: in-memory, redis",
                    other
                )));
            }
        };

        let lease_duration = env_millis("PLEXSPACES_LOCKS_LEASE_MS")?.unwrap_or(DEFAULT_LEASE_DURATION);
        if lease_duration < MIN_LEASE_DURATION {
            return Err(LockError::ConfigError(
                "PLEXSPACES_LOCKS_LEASE_MS must be positive".to_string(),
            ));
        }

        let operation_timeout = env_millis("PLEXSPACES_LOCKS_OPERATION_TIMEOUT_MS")?;
        if operation_timeout.is_some_and(|t| t.is_zero()) {
            return Err(LockError::ConfigError(
                "PLEXSPACES_LOCKS_OPERATION_TIMEOUT_MS must be positive".to_string(),
            ));
        }

        Ok(Self {
            backend,
            lease_duration,
            operation_timeout,
        })
    }

    /// Create configuration with explicit backend and default lease.
    pub fn new(backend: BackendType) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    /// Handle options carrying this configuration's lease and timeout.
    pub fn lock_options(&self) -> LockOptions {
        let options = LockOptions::new().with_lease_duration(self.lease_duration);
        match self.operation_timeout {
            Some(timeout) => options.with_operation_timeout(timeout),
            None => options,
        }
    }
}

fn env_millis(name: &str) -> LockResult<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| LockError::ConfigError(format!("{} is not a millisecond count: {}", name, e))),
        Err(_) => Ok(None),
    }
}

/// Create a lock store from environment configuration.
pub async fn create_lock_store_from_env() -> LockResult<Arc<dyn LockStore>> {
    let config = LockConfig::from_env()?;
    create_lock_store_from_config(&config).await
}

/// Create a lock store from explicit configuration.
///
/// ## Examples
/// ```rust
/// use plexspaces_locks::{create_lock_store_from_config, BackendType, LockConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = LockConfig::new(BackendType::InMemory);
/// let store = create_lock_store_from_config(&config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn create_lock_store_from_config(config: &LockConfig) -> LockResult<Arc<dyn LockStore>> {
    match &config.backend {
        #[cfg(feature = "memory-backend")]
        BackendType::InMemory => Ok(Arc::new(crate::memory::MemoryLockStore::new())),

        #[cfg(not(feature = "memory-backend"))]
        BackendType::InMemory => Err(LockError::ConfigError(
            "In-memory backend requires 'memory-backend' feature".to_string(),
        )),

        #[cfg(feature = "redis-backend")]
        BackendType::Redis { url, namespace } => {
            let store = crate::redis::RedisLockStore::new(url, namespace).await?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "redis-backend"))]
        BackendType::Redis { .. } => Err(LockError::ConfigError(
            "Redis backend requires 'redis-backend' feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 5] = [
        "PLEXSPACES_LOCKS_BACKEND",
        "PLEXSPACES_LOCKS_REDIS_URL",
        "PLEXSPACES_LOCKS_REDIS_NAMESPACE",
        "PLEXSPACES_LOCKS_LEASE_MS",
        "PLEXSPACES_LOCKS_OPERATION_TIMEOUT_MS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_from_env_default() {
        clear_env();

        let config = LockConfig::from_env().unwrap();
        assert!(matches!(config.backend, BackendType::InMemory));
        assert_eq!(config.lease_duration, DEFAULT_LEASE_DURATION);
        assert!(config.operation_timeout.is_none());
    }

    #[test]
    #[serial]
    fn test_config_from_env_redis() {
        clear_env();
        std::env::set_var("PLEXSPACES_LOCKS_BACKEND", "Redis");
        std::env::set_var("PLEXSPACES_LOCKS_REDIS_URL", "redis://cache:6380");
        std::env::set_var("PLEXSPACES_LOCKS_REDIS_NAMESPACE", "jobs");
        std::env::set_var("PLEXSPACES_LOCKS_LEASE_MS", "2500");
        std::env::set_var("PLEXSPACES_LOCKS_OPERATION_TIMEOUT_MS", "300");

        let config = LockConfig::from_env().unwrap();
        match &config.backend {
            BackendType::Redis { url, namespace } => {
                assert_eq!(url, "redis://cache:6380");
                assert_eq!(namespace, "jobs");
            }
            _ => panic!("Expected Redis backend"),
        }
        assert_eq!(config.lease_duration, Duration::from_millis(2500));
        assert_eq!(config.operation_timeout, Some(Duration::from_millis(300)));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_from_env_invalid_backend() {
        clear_env();
        std::env::set_var("PLEXSPACES_LOCKS_BACKEND", "zookeeper");

        let err = LockConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("Unknown backend type"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_from_env_rejects_bad_lease() {
        clear_env();

        std::env::set_var("PLEXSPACES_LOCKS_LEASE_MS", "ten");
        assert!(matches!(LockConfig::from_env(), Err(LockError::ConfigError(_))));

        std::env::set_var("PLEXSPACES_LOCKS_LEASE_MS", "0");
        assert!(matches!(LockConfig::from_env(), Err(LockError::ConfigError(_))));

        clear_env();
    }

    #[cfg(feature = "memory-backend")]
    #[tokio::test]
    async fn test_create_lock_store_in_memory() {
        let config = LockConfig::new(BackendType::InMemory);
        let store = create_lock_store_from_config(&config).await.unwrap();

        assert_eq!(store.backend_name(), "memory");
        assert!(store.try_acquire("k", "tokA", config.lease_duration).await.unwrap());
    }

    #[cfg(feature = "memory-backend")]
    #[tokio::test]
    #[serial]
    async fn test_create_lock_store_from_env_default() {
        clear_env();
        let store = create_lock_store_from_env().await.unwrap();
        assert_eq!(store.backend_name(), "memory");
    }
}
