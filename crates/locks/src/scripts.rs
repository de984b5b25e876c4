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

//! Lua sources for the Redis lock primitives.
//!
//! Each script runs atomically on the Redis server. All take the lock key as
//! `KEYS[1]` and the ownership token as `ARGV[1]`; lease durations are passed
//! in milliseconds as `ARGV[2]`. Every script returns `1` when it changed the
//! record and `0` otherwise.

/// Set `KEYS[1]` to `ARGV[1]` with a `ARGV[2]` ms expiry if absent.
/// Refreshes the expiry when the key already holds the same token.
pub const ACQUIRE: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == false then
    redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
    return 1
end
if current == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// Delete `KEYS[1]` only if it holds `ARGV[1]`.
pub const RELEASE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Reset the expiry of `KEYS[1]` to `ARGV[2]` ms only if it holds `ARGV[1]`.
pub const EXTEND: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// Lease in whole milliseconds as sent to the scripts. Never zero.
pub fn lease_millis(lease: std::time::Duration) -> u64 {
    u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_scripts_compare_before_mutating() {
        for script in [RELEASE, EXTEND] {
            let compare = script.find("== ARGV[1]").unwrap();
            let mutate = script.find("DEL").or_else(|| script.find("PEXPIRE")).unwrap();
            assert!(compare < mutate);
        }
        assert!(ACQUIRE.contains("'PX'"));
    }

    #[test]
    fn test_lease_millis() {
        assert_eq!(lease_millis(Duration::from_secs(10)), 10_000);
        assert_eq!(lease_millis(Duration::from_micros(10)), 1);
    }
}
