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
//! Scripted in-process remote query channel.
//!
//! Responsibilities:
//! - Replays a queue of remote events (blocks, descriptor waits, coordination tokens,
//!   failures) through the `RemoteQueryExecutor` contract.
//! - Records how often the lifecycle entry points were invoked.
//!
//! Key exported interfaces:
//! - Types: `InMemoryRemoteQueryExecutor`, `ScriptedRead`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;

use super::{
    ProfileInfo, ProfileInfoSink, Progress, ProgressSink, ReadContext, ReadResult, RemoteBlock,
    RemoteQueryExecutor,
};
use crate::exec::error::{ExecError, Result};
use crate::exec::pipeline::processor::Fd;
use crate::novarocks_logging::debug;

/// One step of a scripted remote stream.
#[derive(Clone, Debug)]
pub enum ScriptedRead {
    Block(RemoteBlock),
    /// Non-blocking reads suspend on this descriptor once; blocking reads skip it.
    Wait(Fd),
    /// Parallel-replicas coordination reply; blocking reads skip it.
    Token,
    /// A read that produces no result at all.
    Nothing,
    Fail(String),
}

/// Marker stored in the read context while a read is parked on a descriptor.
#[derive(Debug)]
struct ParkedRead {
    fd: Fd,
}

#[derive(Default)]
struct ChannelState {
    script: VecDeque<ScriptedRead>,
    totals: Option<RemoteBlock>,
    extremes: Option<RemoteBlock>,
    profile_info: Option<ProfileInfo>,
    total_rows_hint: u64,
    progress_sink: Option<Arc<dyn ProgressSink>>,
    profile_info_sink: Option<Arc<dyn ProfileInfoSink>>,
    sent: bool,
    cancelled: bool,
    finished: bool,
    reported_total: bool,
    send_query_calls: u32,
    cancel_calls: u32,
    finish_calls: u32,
    blocking_reads: u32,
    non_blocking_reads: u32,
}

/// Reports collected while the state lock is held, delivered after it is released.
enum Report {
    Progress(Arc<dyn ProgressSink>, Progress),
    Profile(Arc<dyn ProfileInfoSink>, ProfileInfo),
}

impl Report {
    fn deliver(self) {
        match self {
            Report::Progress(sink, progress) => sink.on_progress(&progress),
            Report::Profile(sink, info) => sink.on_profile_info(&info),
        }
    }
}

pub struct InMemoryRemoteQueryExecutor {
    header: SchemaRef,
    state: Mutex<ChannelState>,
}

impl std::fmt::Debug for InMemoryRemoteQueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("InMemoryRemoteQueryExecutor")
            .field("pending", &state.script.len())
            .field("sent", &state.sent)
            .field("cancelled", &state.cancelled)
            .field("finished", &state.finished)
            .finish()
    }
}

impl InMemoryRemoteQueryExecutor {
    pub fn new(header: SchemaRef) -> Self {
        Self {
            header,
            state: Mutex::new(ChannelState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, step: ScriptedRead) -> &Self {
        self.lock().script.push_back(step);
        self
    }

    pub fn push_batch(&self, batch: RecordBatch) -> &Self {
        self.push(ScriptedRead::Block(RemoteBlock::new(batch)))
    }

    pub fn push_block(&self, block: RemoteBlock) -> &Self {
        self.push(ScriptedRead::Block(block))
    }

    pub fn push_wait(&self, fd: Fd) -> &Self {
        self.push(ScriptedRead::Wait(fd))
    }

    pub fn push_token(&self) -> &Self {
        self.push(ScriptedRead::Token)
    }

    pub fn push_failure(&self, message: impl Into<String>) -> &Self {
        self.push(ScriptedRead::Fail(message.into()))
    }

    pub fn set_totals(&self, batch: RecordBatch) {
        self.lock().totals = Some(RemoteBlock::new(batch));
    }

    pub fn set_extremes(&self, batch: RecordBatch) {
        self.lock().extremes = Some(RemoteBlock::new(batch));
    }

    /// Profile summary delivered once the scripted stream is exhausted.
    pub fn set_profile_info(&self, info: ProfileInfo) {
        self.lock().profile_info = Some(info);
    }

    /// Total-rows estimate attached to the first progress report.
    pub fn set_total_rows_hint(&self, rows: u64) {
        self.lock().total_rows_hint = rows;
    }

    pub fn send_query_calls(&self) -> u32 {
        self.lock().send_query_calls
    }

    pub fn cancel_calls(&self) -> u32 {
        self.lock().cancel_calls
    }

    pub fn finish_calls(&self) -> u32 {
        self.lock().finish_calls
    }

    pub fn blocking_reads(&self) -> u32 {
        self.lock().blocking_reads
    }

    pub fn non_blocking_reads(&self) -> u32 {
        self.lock().non_blocking_reads
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    pub fn remaining(&self) -> usize {
        self.lock().script.len()
    }

    fn block_reports(state: &mut ChannelState, block: &RemoteBlock) -> Option<Report> {
        let sink = state.progress_sink.clone()?;
        let total_rows_to_read = if state.reported_total {
            0
        } else {
            state.reported_total = true;
            state.total_rows_hint
        };
        Some(Report::Progress(
            sink,
            Progress {
                read_rows: block.num_rows() as u64,
                read_bytes: block.bytes() as u64,
                total_rows_to_read,
            },
        ))
    }

    fn end_of_stream_report(state: &mut ChannelState) -> Option<Report> {
        let info = state.profile_info.take()?;
        let sink = state.profile_info_sink.clone()?;
        Some(Report::Profile(sink, info))
    }

    fn ensure_sent(state: &ChannelState) -> Result<()> {
        if !state.sent {
            return Err(ExecError::Logical(
                "remote read before the query was sent".to_string(),
            ));
        }
        Ok(())
    }
}

impl RemoteQueryExecutor for InMemoryRemoteQueryExecutor {
    fn header(&self) -> SchemaRef {
        Arc::clone(&self.header)
    }

    fn send_query(&self) -> Result<()> {
        let mut state = self.lock();
        state.send_query_calls += 1;
        if state.sent {
            return Err(ExecError::Logical("remote query sent twice".to_string()));
        }
        state.sent = true;
        debug!("in-memory remote query sent, {} scripted steps", state.script.len());
        Ok(())
    }

    fn read_block(&self) -> Result<Option<RemoteBlock>> {
        let mut reports = Vec::new();
        let result = {
            let mut state = self.lock();
            state.blocking_reads += 1;
            Self::ensure_sent(&state)?;
            loop {
                if state.cancelled || state.finished {
                    break Ok(None);
                }
                match state.script.pop_front() {
                    Some(ScriptedRead::Block(block)) => {
                        reports.extend(Self::block_reports(&mut state, &block));
                        break Ok(Some(block));
                    }
                    Some(ScriptedRead::Wait(_))
                    | Some(ScriptedRead::Token)
                    | Some(ScriptedRead::Nothing) => continue,
                    Some(ScriptedRead::Fail(message)) => break Err(ExecError::Remote(message)),
                    None => {
                        reports.extend(Self::end_of_stream_report(&mut state));
                        break Ok(None);
                    }
                }
            }
        };
        reports.into_iter().for_each(Report::deliver);
        result
    }

    fn read(&self, ctx: &mut ReadContext) -> Result<ReadResult> {
        let mut reports = Vec::new();
        let result = {
            let mut state = self.lock();
            state.non_blocking_reads += 1;
            Self::ensure_sent(&state)?;
            if state.cancelled || state.finished {
                ctx.reset();
                return Ok(ReadResult::Block(None));
            }
            if let Some(parked) = ctx.get_mut::<ParkedRead>() {
                debug!("resuming read parked on fd {}", parked.fd);
                ctx.reset();
            }
            match state.script.pop_front() {
                Some(ScriptedRead::Block(block)) => {
                    reports.extend(Self::block_reports(&mut state, &block));
                    Ok(ReadResult::Block(Some(block)))
                }
                Some(ScriptedRead::Wait(fd)) => {
                    ctx.get_or_insert_with(|| ParkedRead { fd });
                    Ok(ReadResult::FileDescriptor(fd))
                }
                Some(ScriptedRead::Token) => Ok(ReadResult::ParallelReplicasToken),
                Some(ScriptedRead::Nothing) => Ok(ReadResult::Nothing),
                Some(ScriptedRead::Fail(message)) => Err(ExecError::Remote(message)),
                None => {
                    reports.extend(Self::end_of_stream_report(&mut state));
                    Ok(ReadResult::Block(None))
                }
            }
        };
        reports.into_iter().for_each(Report::deliver);
        result
    }

    fn get_totals(&self) -> Option<RemoteBlock> {
        self.lock().totals.take()
    }

    fn get_extremes(&self) -> Option<RemoteBlock> {
        self.lock().extremes.take()
    }

    fn cancel(&self, ctx: &mut ReadContext) {
        let mut state = self.lock();
        state.cancel_calls += 1;
        ctx.reset();
        if state.cancelled || state.finished {
            return;
        }
        state.cancelled = true;
        let dropped = state.script.len();
        state.script.clear();
        debug!("in-memory remote query cancelled, dropped {} pending steps", dropped);
    }

    fn finish(&self, ctx: &mut ReadContext) -> Result<()> {
        let mut state = self.lock();
        state.finish_calls += 1;
        ctx.reset();
        if state.finished {
            return Ok(());
        }
        state.finished = true;
        state.script.clear();
        Ok(())
    }

    fn set_progress_sink(&self, sink: Arc<dyn ProgressSink>) {
        self.lock().progress_sink = Some(sink);
    }

    fn set_profile_info_sink(&self, sink: Arc<dyn ProfileInfoSink>) {
        self.lock().profile_info_sink = Some(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]))
    }

    fn batch(rows: i64) -> RecordBatch {
        let values: ArrayRef = Arc::new(Int64Array::from_iter_values(0..rows));
        RecordBatch::try_new(schema(), vec![values]).expect("batch")
    }

    #[derive(Default)]
    struct Collected {
        progress: Mutex<Vec<Progress>>,
        profile: Mutex<Vec<ProfileInfo>>,
    }

    impl ProgressSink for Collected {
        fn on_progress(&self, progress: &Progress) {
            self.progress.lock().unwrap().push(*progress);
        }
    }

    impl ProfileInfoSink for Collected {
        fn on_profile_info(&self, info: &ProfileInfo) {
            self.profile.lock().unwrap().push(*info);
        }
    }

    #[test]
    fn read_before_send_is_logical_error() {
        let channel = InMemoryRemoteQueryExecutor::new(schema());
        let err = channel.read_block().expect_err("must fail");
        assert!(err.is_logical());
    }

    #[test]
    fn blocking_reads_skip_waits_and_tokens() {
        let channel = InMemoryRemoteQueryExecutor::new(schema());
        channel.push_wait(5).push_batch(batch(2)).push_token().push_batch(batch(3));
        channel.send_query().unwrap();
        assert_eq!(channel.read_block().unwrap().unwrap().num_rows(), 2);
        assert_eq!(channel.read_block().unwrap().unwrap().num_rows(), 3);
        assert!(channel.read_block().unwrap().is_none());
    }

    #[test]
    fn non_blocking_read_parks_on_descriptor() {
        let channel = InMemoryRemoteQueryExecutor::new(schema());
        channel.push_wait(7).push_batch(batch(3));
        channel.send_query().unwrap();
        let mut ctx = ReadContext::new();
        assert!(matches!(
            channel.read(&mut ctx).unwrap(),
            ReadResult::FileDescriptor(7)
        ));
        assert!(ctx.is_in_progress());
        match channel.read(&mut ctx).unwrap() {
            ReadResult::Block(Some(block)) => assert_eq!(block.num_rows(), 3),
            other => panic!("unexpected read result {other:?}"),
        }
        assert!(!ctx.is_in_progress());
        assert!(matches!(
            channel.read(&mut ctx).unwrap(),
            ReadResult::Block(None)
        ));
    }

    #[test]
    fn sinks_see_progress_before_block_and_profile_at_end() {
        let channel = InMemoryRemoteQueryExecutor::new(schema());
        let collected = Arc::new(Collected::default());
        channel.set_progress_sink(collected.clone());
        channel.set_profile_info_sink(collected.clone());
        channel.set_total_rows_hint(100);
        channel.set_profile_info(ProfileInfo {
            applied_limit: true,
            rows_before_limit: 42,
            ..ProfileInfo::default()
        });
        channel.push_batch(batch(4)).push_batch(batch(6));
        channel.send_query().unwrap();

        channel.read_block().unwrap();
        {
            let progress = collected.progress.lock().unwrap();
            assert_eq!(progress.len(), 1);
            assert_eq!(progress[0].read_rows, 4);
            assert_eq!(progress[0].total_rows_to_read, 100);
        }
        channel.read_block().unwrap();
        assert!(channel.read_block().unwrap().is_none());

        let progress = collected.progress.lock().unwrap();
        assert_eq!(progress[1].total_rows_to_read, 0);
        let profile = collected.profile.lock().unwrap();
        assert_eq!(profile.len(), 1);
        assert_eq!(profile[0].rows_before_limit, 42);
    }

    #[test]
    fn cancel_and_finish_are_idempotent() {
        let channel = InMemoryRemoteQueryExecutor::new(schema());
        channel.push_batch(batch(1)).push_batch(batch(1));
        channel.send_query().unwrap();
        let mut ctx = ReadContext::new();
        channel.cancel(&mut ctx);
        channel.cancel(&mut ctx);
        assert!(channel.is_cancelled());
        assert_eq!(channel.cancel_calls(), 2);
        assert_eq!(channel.remaining(), 0);
        assert!(channel.read_block().unwrap().is_none());

        channel.finish(&mut ctx).unwrap();
        channel.finish(&mut ctx).unwrap();
        assert!(channel.is_finished());
        assert_eq!(channel.finish_calls(), 2);
    }

    #[test]
    fn totals_and_extremes_are_taken_once() {
        let channel = InMemoryRemoteQueryExecutor::new(schema());
        channel.set_totals(batch(1));
        assert_eq!(channel.get_totals().unwrap().num_rows(), 1);
        assert!(channel.get_totals().is_none());
        assert!(channel.get_extremes().is_none());
    }

    #[test]
    fn scripted_failure_surfaces_as_remote_error() {
        let channel = InMemoryRemoteQueryExecutor::new(schema());
        channel.push_failure("replica went away");
        channel.send_query().unwrap();
        let err = channel.read(&mut ReadContext::new()).expect_err("fails");
        assert!(matches!(err, ExecError::Remote(msg) if msg == "replica went away"));
    }
}
