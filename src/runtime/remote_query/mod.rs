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
//! Remote query channel contract.
//!
//! Responsibilities:
//! - Describes what a source needs from the network layer that talks to one remote
//!   shard/replica: dispatch, blocking and non-blocking reads, totals/extremes, lifecycle.
//! - Defines the progress and profile-info sinks the channel reports into.
//!
//! Key exported interfaces:
//! - Traits: `RemoteQueryExecutor`, `ProgressSink`, `ProfileInfoSink`.
//! - Types: `RemoteBlock`, `BlockInfo`, `ReadResult`, `ReadContext`, `Progress`, `ProfileInfo`.
//!
//! Current limitations:
//! - Connection handling, retries and the wire protocol belong to implementations of the trait.

pub mod in_memory;

use std::any::Any;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;

use crate::exec::chunk::record_batch_bytes;
use crate::exec::error::Result;
use crate::exec::pipeline::processor::Fd;

/// Per-block metadata sent along with remote data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Two-level aggregation bucket, `-1` when the block is not bucketed.
    pub bucket_num: i32,
    pub is_overflows: bool,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self {
            bucket_num: -1,
            is_overflows: false,
        }
    }
}

/// One block of rows received from a remote node.
#[derive(Clone, Debug)]
pub struct RemoteBlock {
    pub batch: RecordBatch,
    pub info: BlockInfo,
}

impl RemoteBlock {
    pub fn new(batch: RecordBatch) -> Self {
        Self {
            batch,
            info: BlockInfo::default(),
        }
    }

    pub fn with_info(batch: RecordBatch, info: BlockInfo) -> Self {
        Self { batch, info }
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn bytes(&self) -> usize {
        record_batch_bytes(&self.batch)
    }
}

/// Outcome of one non-blocking read.
#[derive(Debug)]
pub enum ReadResult {
    /// No result at all. Never legal; callers treat it as a broken channel.
    Nothing,
    /// A data block, or `None` once the stream is exhausted.
    Block(Option<RemoteBlock>),
    /// The read would block; resume after the descriptor becomes readable.
    FileDescriptor(Fd),
    /// A parallel-replicas coordination reply without row data.
    ParallelReplicasToken,
}

/// Resumable state of an in-flight non-blocking read.
///
/// Owned by the reading source and lent to the channel on every call; the channel
/// decides what it stores here.
#[derive(Default)]
pub struct ReadContext {
    state: Option<Box<dyn Any + Send>>,
}

impl std::fmt::Debug for ReadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadContext")
            .field("in_progress", &self.is_in_progress())
            .finish()
    }
}

impl ReadContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_progress(&self) -> bool {
        self.state.is_some()
    }

    pub fn get_or_insert_with<T: Any + Send>(&mut self, init: impl FnOnce() -> T) -> &mut T {
        if !self.state.as_ref().is_some_and(|s| s.is::<T>()) {
            self.state = Some(Box::new(init()));
        }
        self.state
            .as_mut()
            .and_then(|s| s.downcast_mut::<T>())
            .expect("read context state type checked above")
    }

    pub fn get_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.state.as_mut().and_then(|s| s.downcast_mut::<T>())
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

/// Incremental read progress reported by the remote side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub read_rows: u64,
    pub read_bytes: u64,
    /// Estimate of the total rows the remote side will read, `0` when unknown.
    pub total_rows_to_read: u64,
}

/// Execution summary sent by the remote side once its stream completes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProfileInfo {
    pub rows: u64,
    pub blocks: u64,
    pub bytes: u64,
    pub applied_limit: bool,
    pub rows_before_limit: u64,
}

impl ProfileInfo {
    pub fn has_applied_limit(&self) -> bool {
        self.applied_limit
    }

    pub fn rows_before_limit(&self) -> u64 {
        self.rows_before_limit
    }
}

pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: &Progress);
}

pub trait ProfileInfoSink: Send + Sync {
    fn on_profile_info(&self, info: &ProfileInfo);
}

/// Channel to one remote node executing a sub-query.
///
/// Shared by the main, totals and extremes sources of one pipe. `cancel` and `finish`
/// must be idempotent so any holder may call them.
pub trait RemoteQueryExecutor: Send + Sync {
    /// Schema of the blocks the remote query returns.
    fn header(&self) -> SchemaRef;

    fn send_query(&self) -> Result<()>;

    /// Blocking read. `None` marks the end of the stream.
    fn read_block(&self) -> Result<Option<RemoteBlock>>;

    /// Non-blocking read that may suspend on a descriptor.
    fn read(&self, ctx: &mut ReadContext) -> Result<ReadResult>;

    fn get_totals(&self) -> Option<RemoteBlock>;

    fn get_extremes(&self) -> Option<RemoteBlock>;

    fn cancel(&self, ctx: &mut ReadContext);

    /// Drain and release the connection after the stream is no longer needed.
    fn finish(&self, ctx: &mut ReadContext) -> Result<()>;

    /// Progress packets are forwarded to `sink` before the block they precede is returned.
    fn set_progress_sink(&self, sink: Arc<dyn ProgressSink>);

    fn set_profile_info_sink(&self, sink: Arc<dyn ProfileInfoSink>);
}

pub type RemoteQueryExecutorRef = Arc<dyn RemoteQueryExecutor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct PendingPacket(u32);

    #[test]
    fn read_context_keeps_typed_state_until_reset() {
        let mut ctx = ReadContext::new();
        assert!(!ctx.is_in_progress());
        ctx.get_or_insert_with(|| PendingPacket(1)).0 += 1;
        assert_eq!(ctx.get_mut::<PendingPacket>(), Some(&mut PendingPacket(2)));
        assert!(ctx.get_mut::<u64>().is_none());
        ctx.reset();
        assert!(!ctx.is_in_progress());
    }

    #[test]
    fn read_context_replaces_state_of_other_type() {
        let mut ctx = ReadContext::new();
        ctx.get_or_insert_with(|| 7u64);
        let packet = ctx.get_or_insert_with(|| PendingPacket(9));
        assert_eq!(packet.0, 9);
        assert!(ctx.get_mut::<u64>().is_none());
    }
}
