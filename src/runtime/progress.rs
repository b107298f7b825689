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
//! Read-progress accounting for remote sources.
//!
//! Responsibilities:
//! - Accumulates rows/bytes read and the total-rows estimate reported by remote nodes.
//! - Bridges channel progress/profile packets into the tracker, the rows-before-limit
//!   counter and operator profile counters.
//!
//! Key exported interfaces:
//! - Types: `ProgressTracker`, `ProgressTrackerRef`, `RemoteProgressReporter`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::runtime::limits::RowsBeforeLimitCounterRef;
use crate::runtime::profile::{CounterRef, CounterUnit, RuntimeProfile, clamp_u64_to_i64};
use crate::runtime::remote_query::{ProfileInfo, ProfileInfoSink, Progress, ProgressSink};

/// Query-wide progress shared by every source of a query.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    read_rows: AtomicU64,
    read_bytes: AtomicU64,
    total_rows_approx: AtomicU64,
}

pub type ProgressTrackerRef = Arc<ProgressTracker>;

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read(&self, rows: u64, bytes: u64) {
        self.read_rows.fetch_add(rows, Ordering::Relaxed);
        self.read_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_total_rows_approx(&self, rows: u64) {
        self.total_rows_approx.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn read_rows(&self) -> u64 {
        self.read_rows.load(Ordering::Relaxed)
    }

    pub fn read_bytes(&self) -> u64 {
        self.read_bytes.load(Ordering::Relaxed)
    }

    pub fn total_rows_approx(&self) -> u64 {
        self.total_rows_approx.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug)]
struct ReporterCounters {
    rows_read: CounterRef,
    bytes_read: CounterRef,
    total_rows_approx: CounterRef,
    rows_before_limit: CounterRef,
}

/// Sink installed on a remote channel by its source.
///
/// Profile counters and the rows-before-limit counter may be attached after the sink was
/// handed to the channel, so both live behind a lock.
#[derive(Debug)]
pub struct RemoteProgressReporter {
    tracker: ProgressTrackerRef,
    rows_before_limit: Mutex<Option<RowsBeforeLimitCounterRef>>,
    counters: Mutex<Option<ReporterCounters>>,
}

impl RemoteProgressReporter {
    pub fn new(tracker: ProgressTrackerRef) -> Self {
        Self {
            tracker,
            rows_before_limit: Mutex::new(None),
            counters: Mutex::new(None),
        }
    }

    pub fn set_rows_before_limit_counter(&self, counter: RowsBeforeLimitCounterRef) {
        *self
            .rows_before_limit
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(counter);
    }

    pub fn rows_before_limit_counter(&self) -> Option<RowsBeforeLimitCounterRef> {
        self.rows_before_limit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Register `RemoteRowsRead`, `RemoteBytesRead`, `TotalRowsApprox` and `RowsBeforeLimit`.
    pub fn register_counters(&self, unique: &RuntimeProfile) {
        let counters = ReporterCounters {
            rows_read: unique.add_counter("RemoteRowsRead", CounterUnit::Unit),
            bytes_read: unique.add_counter("RemoteBytesRead", CounterUnit::Bytes),
            total_rows_approx: unique.add_counter("TotalRowsApprox", CounterUnit::Unit),
            rows_before_limit: unique.add_counter("RowsBeforeLimit", CounterUnit::Unit),
        };
        *self.counters.lock().unwrap_or_else(|e| e.into_inner()) = Some(counters);
    }

    fn counters(&self) -> Option<ReporterCounters> {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ProgressSink for RemoteProgressReporter {
    fn on_progress(&self, progress: &Progress) {
        if progress.total_rows_to_read > 0 {
            self.tracker.add_total_rows_approx(progress.total_rows_to_read);
        }
        self.tracker
            .add_read(progress.read_rows, progress.read_bytes);

        if let Some(counters) = self.counters() {
            counters.rows_read.add(clamp_u64_to_i64(progress.read_rows));
            counters.bytes_read.add(clamp_u64_to_i64(progress.read_bytes));
            if progress.total_rows_to_read > 0 {
                counters
                    .total_rows_approx
                    .add(clamp_u64_to_i64(progress.total_rows_to_read));
            }
        }
    }
}

impl ProfileInfoSink for RemoteProgressReporter {
    fn on_profile_info(&self, info: &ProfileInfo) {
        if !info.has_applied_limit() {
            return;
        }
        let Some(counter) = self.rows_before_limit_counter() else {
            return;
        };
        counter.set(info.rows_before_limit());
        if let Some(counters) = self.counters() {
            counters
                .rows_before_limit
                .set(clamp_u64_to_i64(info.rows_before_limit()));
        }
    }
}
