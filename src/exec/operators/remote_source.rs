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
//! Primary source reading the main result stream of a remote sub-query.
//!
//! Responsibilities:
//! - Dispatches the remote query once and turns remote blocks into output chunks.
//! - Suspends on the channel descriptor in async mode and surfaces it to the scheduler.
//! - Emits liveness pulses on an optional parallel-replicas auxiliary port.
//! - Releases the channel exactly once on exhaustion, cancellation or early termination.
//!
//! Key exported interfaces:
//! - Types: `RemoteSource`.
//!
//! Current limitations:
//! - Storage limits are stored for the pipeline; this source does not enforce them itself.

use std::sync::Arc;

use crate::common::types::UniqueId;
use crate::exec::chunk::{AggregatedChunkInfo, Chunk, ChunkInfo, schema_has_agg_state};
use crate::exec::error::{ExecError, Result};
use crate::exec::pipeline::parallel_replicas::ParallelReplicasParticipant;
use crate::exec::pipeline::port::{InputPort, OutputPort, connect};
use crate::exec::pipeline::processor::{Fd, Processor, ProcessorStatus};
use crate::exec::pipeline::source::{SourceBase, SourceOutput};
use crate::novarocks_logging::debug;
use crate::runtime::limits::{
    RowsBeforeLimitCounterRef, StorageLimits, StorageLimitsList, without_leaf_limits,
};
use crate::runtime::profile::{CounterRef, CounterUnit, OperatorProfiles, ScopedTimer};
use crate::runtime::progress::{ProgressTracker, ProgressTrackerRef, RemoteProgressReporter};
use crate::runtime::remote_query::{ReadContext, ReadResult, RemoteBlock, RemoteQueryExecutorRef};

const ASYNC_SUSPEND_COUNT: &str = "AsyncSuspendCount";
const PARALLEL_REPLICAS_TOKEN_COUNT: &str = "ParallelReplicasTokenCount";
const REMOTE_READ_TIME: &str = "RemoteReadTime";
const REMOTE_SEND_QUERY_TIME: &str = "RemoteSendQueryTime";

pub struct RemoteSource {
    name: String,
    base: SourceBase,
    executor: RemoteQueryExecutorRef,
    add_aggregation_info: bool,
    async_read: bool,
    group_id: UniqueId,
    read_context: ReadContext,
    was_query_sent: bool,
    was_query_canceled: bool,
    is_async_state: bool,
    fd: Option<Fd>,
    channel_released: bool,
    dependency_port: Option<OutputPort>,
    storage_limits: StorageLimitsList,
    progress: ProgressTrackerRef,
    rows_before_limit: Option<RowsBeforeLimitCounterRef>,
    profiles: Option<OperatorProfiles>,
    async_suspend_counter: Option<CounterRef>,
    token_counter: Option<CounterRef>,
    read_timer: Option<CounterRef>,
    send_query_timer: Option<CounterRef>,
}

impl std::fmt::Debug for RemoteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSource")
            .field("group_id", &self.group_id)
            .field("async_read", &self.async_read)
            .field("add_aggregation_info", &self.add_aggregation_info)
            .field("was_query_sent", &self.was_query_sent)
            .field("was_query_canceled", &self.was_query_canceled)
            .field("is_async_state", &self.is_async_state)
            .field("fd", &self.fd)
            .finish()
    }
}

impl RemoteSource {
    /// `add_aggregation_info` is forced on when the header carries aggregate-state columns.
    pub fn new(
        executor: RemoteQueryExecutorRef,
        add_aggregation_info: bool,
        async_read: bool,
        group_id: UniqueId,
    ) -> Self {
        let header = executor.header();
        let add_aggregation_info = add_aggregation_info || schema_has_agg_state(&header);
        Self {
            name: "REMOTE_SOURCE".to_string(),
            base: SourceBase::new(header),
            executor,
            add_aggregation_info,
            async_read,
            group_id,
            read_context: ReadContext::new(),
            was_query_sent: false,
            was_query_canceled: false,
            is_async_state: false,
            fd: None,
            channel_released: false,
            dependency_port: None,
            storage_limits: Vec::new(),
            progress: Arc::new(ProgressTracker::new()),
            rows_before_limit: None,
            profiles: None,
            async_suspend_counter: None,
            token_counter: None,
            read_timer: None,
            send_query_timer: None,
        }
    }

    pub fn add_aggregation_info(&self) -> bool {
        self.add_aggregation_info
    }

    pub fn is_async_read(&self) -> bool {
        self.async_read
    }

    pub fn was_query_sent(&self) -> bool {
        self.was_query_sent
    }

    pub fn is_cancelled(&self) -> bool {
        self.was_query_canceled
    }

    /// Descriptor the source is parked on, if any.
    pub fn pending_fd(&self) -> Option<Fd> {
        if self.is_async_state { self.fd } else { None }
    }

    pub fn output_port(&self) -> &OutputPort {
        self.base.port()
    }

    pub fn output_port_mut(&mut self) -> &mut OutputPort {
        self.base.port_mut()
    }

    pub fn has_dependency_port(&self) -> bool {
        self.dependency_port.is_some()
    }

    /// Store `limits` with every leaf limit removed.
    pub fn set_storage_limits(&mut self, limits: &[StorageLimits]) {
        self.storage_limits = without_leaf_limits(limits);
    }

    pub fn storage_limits(&self) -> &[StorageLimits] {
        &self.storage_limits
    }

    /// Must be called before the first `work`; progress sinks are installed on dispatch.
    pub fn set_progress_tracker(&mut self, tracker: ProgressTrackerRef) {
        self.progress = tracker;
    }

    pub fn progress_tracker(&self) -> &ProgressTrackerRef {
        &self.progress
    }

    /// Must be called before the first `work`; progress sinks are installed on dispatch.
    pub fn set_rows_before_limit_counter(&mut self, counter: RowsBeforeLimitCounterRef) {
        self.rows_before_limit = Some(counter);
    }

    fn install_sinks(&self) {
        let reporter = Arc::new(RemoteProgressReporter::new(Arc::clone(&self.progress)));
        if let Some(counter) = self.rows_before_limit.as_ref() {
            reporter.set_rows_before_limit_counter(Arc::clone(counter));
        }
        if let Some(profiles) = self.profiles.as_ref() {
            reporter.register_counters(&profiles.unique);
        }
        self.executor.set_progress_sink(reporter.clone());
        self.executor.set_profile_info_sink(reporter);
    }

    /// Call `finish` on the channel unless this source already did.
    fn release_channel(&mut self) -> Result<()> {
        if self.channel_released {
            return Ok(());
        }
        self.channel_released = true;
        debug!(
            "RemoteSource release channel: group={} sent={} cancelled={}",
            self.group_id, self.was_query_sent, self.was_query_canceled
        );
        self.executor.finish(&mut self.read_context)
    }

    fn finish_dependency_port(&mut self) {
        if let Some(port) = self.dependency_port.as_mut() {
            port.finish();
        }
    }

    fn push_dependency_pulse(&mut self) -> Result<()> {
        let Some(port) = self.dependency_port.as_mut() else {
            return Ok(());
        };
        if !port.is_finished() && port.can_push() {
            port.push(Chunk::default())?;
        }
        Ok(())
    }

    fn to_chunk(&self, block: RemoteBlock) -> Result<Chunk> {
        let RemoteBlock { batch, info } = block;
        let chunk =
            Chunk::try_from_columns(batch.schema(), batch.columns().to_vec(), batch.num_rows())?;
        if !self.add_aggregation_info {
            return Ok(chunk);
        }
        Ok(chunk.with_info(ChunkInfo::Aggregated(AggregatedChunkInfo {
            bucket_num: info.bucket_num,
            is_overflows: info.is_overflows,
        })))
    }

    fn generate(&mut self) -> Result<SourceOutput> {
        if self.was_query_canceled {
            return Ok(SourceOutput::EndOfStream);
        }

        if !self.was_query_sent {
            self.install_sinks();
            {
                let _timer = self.send_query_timer.clone().map(ScopedTimer::new);
                self.executor.send_query()?;
            }
            self.was_query_sent = true;
            debug!(
                "RemoteSource query sent: group={} async_read={} add_aggregation_info={}",
                self.group_id, self.async_read, self.add_aggregation_info
            );
        }

        let read_timer = self.read_timer.clone().map(ScopedTimer::new);
        let block = if self.async_read {
            match self.executor.read(&mut self.read_context)? {
                ReadResult::Nothing => {
                    return Err(ExecError::Logical(
                        "got an empty result from the remote query channel".to_string(),
                    ));
                }
                ReadResult::FileDescriptor(fd) => {
                    self.fd = Some(fd);
                    self.is_async_state = true;
                    if let Some(counter) = self.async_suspend_counter.as_ref() {
                        counter.add(1);
                    }
                    debug!("RemoteSource suspended: group={} fd={}", self.group_id, fd);
                    return Ok(SourceOutput::Suspended(fd));
                }
                ReadResult::ParallelReplicasToken => {
                    self.is_async_state = false;
                    if let Some(counter) = self.token_counter.as_ref() {
                        counter.add(1);
                    }
                    debug!("RemoteSource parallel replicas token: group={}", self.group_id);
                    return Ok(SourceOutput::Idle);
                }
                ReadResult::Block(block) => {
                    self.is_async_state = false;
                    block
                }
            }
        } else {
            self.executor.read_block()?
        };
        drop(read_timer);

        let Some(block) = block else {
            debug!(
                "RemoteSource end of stream: group={} chunks={} rows={}",
                self.group_id,
                self.base.produced_chunks(),
                self.base.produced_rows()
            );
            self.release_channel()?;
            return Ok(SourceOutput::EndOfStream);
        };

        Ok(SourceOutput::Chunk(self.to_chunk(block)?))
    }
}

impl Processor for RemoteSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self) -> Result<ProcessorStatus> {
        // Checked before the async state so a cancelled suspension does not spin.
        if self.was_query_canceled {
            self.base.port_mut().finish();
            self.finish_dependency_port();
            self.is_async_state = false;
            self.release_channel()?;
            return Ok(ProcessorStatus::Finished);
        }

        if self.is_async_state {
            return Ok(ProcessorStatus::Async);
        }

        let status = self.base.prepare()?;
        match status {
            ProcessorStatus::Finished => {
                self.release_channel()?;
                self.finish_dependency_port();
                self.is_async_state = false;
            }
            ProcessorStatus::PortFull => self.push_dependency_pulse()?,
            ProcessorStatus::Ready | ProcessorStatus::Async => {}
        }
        Ok(status)
    }

    fn work(&mut self) -> Result<()> {
        let generated = self.generate();
        self.base.accept(generated)
    }

    fn schedule(&self) -> Option<Fd> {
        self.pending_fd()
    }

    fn cancel(&mut self) {
        if !self.base.cancel() {
            return;
        }
        self.was_query_canceled = true;
        if self.channel_released {
            // Stream already exhausted or abandoned, nothing left to cancel remotely.
            return;
        }
        debug!(
            "RemoteSource cancel: group={} sent={} suspended={}",
            self.group_id, self.was_query_sent, self.is_async_state
        );
        self.executor.cancel(&mut self.read_context);
    }

    fn on_update_ports(&mut self) -> Result<()> {
        // A finished port is ambiguous: only a consumer close before our own end counts.
        if self.was_query_canceled || self.channel_released || self.base.is_finished() {
            return Ok(());
        }
        if !self.base.port().is_finished() {
            return Ok(());
        }
        self.was_query_canceled = true;
        debug!(
            "RemoteSource output closed by consumer: group={} chunks={}",
            self.group_id,
            self.base.produced_chunks()
        );
        self.release_channel()
    }

    fn set_profiles(&mut self, profiles: OperatorProfiles) {
        profiles
            .operator
            .add_info_string("GroupId", self.group_id.to_string());
        profiles.operator.add_info_string(
            "AsyncRead",
            if self.async_read { "true" } else { "false" },
        );
        self.async_suspend_counter = Some(
            profiles
                .unique
                .add_counter(ASYNC_SUSPEND_COUNT, CounterUnit::Unit),
        );
        self.token_counter = Some(
            profiles
                .unique
                .add_counter(PARALLEL_REPLICAS_TOKEN_COUNT, CounterUnit::Unit),
        );
        self.read_timer = Some(profiles.unique.add_timer(REMOTE_READ_TIME));
        self.send_query_timer = Some(profiles.common.add_timer(REMOTE_SEND_QUERY_TIME));
        self.profiles = Some(profiles);
    }

    fn num_outputs(&self) -> usize {
        1 + usize::from(self.dependency_port.is_some())
    }

    fn output_mut(&mut self, idx: usize) -> Option<&mut OutputPort> {
        match idx {
            0 => Some(self.base.port_mut()),
            1 => self.dependency_port.as_mut(),
            _ => None,
        }
    }

    fn as_parallel_replicas_mut(&mut self) -> Option<&mut dyn ParallelReplicasParticipant> {
        Some(self)
    }
}

impl ParallelReplicasParticipant for RemoteSource {
    fn group_id(&self) -> UniqueId {
        self.group_id
    }

    fn connect_to_scheduler(&mut self, input: &mut InputPort) -> Result<()> {
        if self.dependency_port.is_some() {
            return Err(ExecError::Port(
                "remote source already connected to a scheduler".to_string(),
            ));
        }
        let mut port = OutputPort::signal();
        connect(&mut port, input)?;
        self.dependency_port = Some(port);
        debug!("RemoteSource dependency port connected: group={}", self.group_id);
        Ok(())
    }
}
