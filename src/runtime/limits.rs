// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Query limits handed to sources, and the rows-before-limit counter.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::exec::error::{ExecError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowMode {
    /// Fail the query.
    #[default]
    Throw,
    /// Stop reading and return what was read so far.
    Break,
}

/// Row/byte ceilings. Zero means unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SizeLimits {
    pub max_rows: u64,
    pub max_bytes: u64,
    pub overflow_mode: OverflowMode,
}

impl SizeLimits {
    pub fn new(max_rows: u64, max_bytes: u64, overflow_mode: OverflowMode) -> Self {
        Self {
            max_rows,
            max_bytes,
            overflow_mode,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_rows == 0 && self.max_bytes == 0
    }

    /// `Ok(true)` while within limits, `Ok(false)` when crossed in `Break` mode.
    pub fn check(&self, rows: u64, bytes: u64, what: &str) -> Result<bool> {
        let rows_exceeded = self.max_rows > 0 && rows > self.max_rows;
        let bytes_exceeded = self.max_bytes > 0 && bytes > self.max_bytes;
        if !rows_exceeded && !bytes_exceeded {
            return Ok(true);
        }
        match self.overflow_mode {
            OverflowMode::Break => Ok(false),
            OverflowMode::Throw if rows_exceeded => Err(ExecError::LimitExceeded(format!(
                "{what}: rows {rows} > max_rows {}",
                self.max_rows
            ))),
            OverflowMode::Throw => Err(ExecError::LimitExceeded(format!(
                "{what}: bytes {bytes} > max_bytes {}",
                self.max_bytes
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LimitsMode {
    /// Limits apply to the whole query.
    #[default]
    Total,
    /// Limits apply to each stream separately.
    Current,
}

/// Limits enforced locally by the stream that reads the data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamLocalLimits {
    pub mode: LimitsMode,
    pub size_limits: SizeLimits,
    pub max_execution_time: Option<Duration>,
}

/// Per-storage limits: `local_limits` for this node, `leaf_limits` for leaf readers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageLimits {
    pub local_limits: StreamLocalLimits,
    pub leaf_limits: SizeLimits,
}

pub type StorageLimitsList = Vec<StorageLimits>;

/// Copy of `limits` with every leaf limit reset to unlimited.
///
/// Leaf limits were already enforced by the remote node that read the data.
pub fn without_leaf_limits(limits: &[StorageLimits]) -> StorageLimitsList {
    limits
        .iter()
        .map(|l| StorageLimits {
            local_limits: l.local_limits,
            leaf_limits: SizeLimits::default(),
        })
        .collect()
}

/// Rows a query would have returned without its LIMIT, as reported by the source of truth.
#[derive(Debug, Default)]
pub struct RowsBeforeLimitCounter {
    rows: AtomicU64,
    has_value: AtomicBool,
}

pub type RowsBeforeLimitCounterRef = Arc<RowsBeforeLimitCounter>;

impl RowsBeforeLimitCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, rows: u64) {
        self.rows.store(rows, Ordering::Release);
        self.has_value.store(true, Ordering::Release);
    }

    pub fn get(&self) -> u64 {
        self.rows.load(Ordering::Acquire)
    }

    pub fn has_value(&self) -> bool {
        self.has_value.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(local_rows: u64, leaf_rows: u64) -> StorageLimits {
        StorageLimits {
            local_limits: StreamLocalLimits {
                mode: LimitsMode::Current,
                size_limits: SizeLimits::new(local_rows, 0, OverflowMode::Break),
                max_execution_time: Some(Duration::from_secs(local_rows)),
            },
            leaf_limits: SizeLimits::new(leaf_rows, leaf_rows * 8, OverflowMode::Throw),
        }
    }

    #[test]
    fn leaf_limits_are_dropped_and_local_limits_kept() {
        let input = vec![limits(10, 100), limits(20, 200), limits(30, 300)];
        let rewritten = without_leaf_limits(&input);
        assert_eq!(rewritten.len(), input.len());
        for (before, after) in input.iter().zip(rewritten.iter()) {
            assert_eq!(after.local_limits, before.local_limits);
            assert!(after.leaf_limits.is_unlimited());
        }
    }

    #[test]
    fn empty_list_stays_empty() {
        assert!(without_leaf_limits(&[]).is_empty());
    }

    #[test]
    fn check_honors_overflow_mode() {
        let brk = SizeLimits::new(10, 0, OverflowMode::Break);
        assert!(brk.check(10, 1 << 30, "read").unwrap());
        assert!(!brk.check(11, 0, "read").unwrap());

        let throw = SizeLimits::new(0, 100, OverflowMode::Throw);
        let err = throw.check(1, 101, "read").expect_err("bytes exceeded");
        assert!(err.to_string().contains("max_bytes 100"), "err={err}");
        assert!(SizeLimits::default().check(u64::MAX, u64::MAX, "read").unwrap());
    }

    #[test]
    fn rows_before_limit_counter_tracks_presence() {
        let counter = RowsBeforeLimitCounter::new();
        assert!(!counter.has_value());
        counter.set(5);
        counter.set(7);
        assert!(counter.has_value());
        assert_eq!(counter.get(), 7);
    }
}
