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
//! Single-shot sources for the totals and extremes of a remote sub-query.
//!
//! Both share the channel of the primary `RemoteSource` and are pulled only after the
//! main stream has been consumed.

use crate::exec::chunk::Chunk;
use crate::exec::error::Result;
use crate::exec::pipeline::port::OutputPort;
use crate::exec::pipeline::processor::{Processor, ProcessorStatus};
use crate::exec::pipeline::source::{SourceBase, SourceOutput};
use crate::novarocks_logging::debug;
use crate::runtime::remote_query::{RemoteBlock, RemoteQueryExecutorRef};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SideStream {
    Totals,
    Extremes,
}

impl SideStream {
    fn name(self) -> &'static str {
        match self {
            SideStream::Totals => "REMOTE_TOTALS_SOURCE",
            SideStream::Extremes => "REMOTE_EXTREMES_SOURCE",
        }
    }

    fn fetch(self, executor: &RemoteQueryExecutorRef) -> Option<RemoteBlock> {
        match self {
            SideStream::Totals => executor.get_totals(),
            SideStream::Extremes => executor.get_extremes(),
        }
    }
}

struct SideSource {
    kind: SideStream,
    base: SourceBase,
    executor: RemoteQueryExecutorRef,
    emitted: bool,
}

impl SideSource {
    fn new(kind: SideStream, executor: RemoteQueryExecutorRef) -> Self {
        Self {
            kind,
            base: SourceBase::new(executor.header()),
            executor,
            emitted: false,
        }
    }

    fn generate(&mut self) -> SourceOutput {
        if self.emitted {
            return SourceOutput::EndOfStream;
        }
        self.emitted = true;
        match self.kind.fetch(&self.executor) {
            Some(block) if block.num_rows() > 0 => {
                debug!("{} produced {} rows", self.kind.name(), block.num_rows());
                SourceOutput::Chunk(Chunk::new(block.batch))
            }
            _ => SourceOutput::EndOfStream,
        }
    }

    fn work(&mut self) -> Result<()> {
        let generated = self.generate();
        self.base.accept(Ok(generated))
    }

    fn output_mut(&mut self, idx: usize) -> Option<&mut OutputPort> {
        if idx == 0 {
            Some(self.base.port_mut())
        } else {
            None
        }
    }
}

macro_rules! side_source {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        pub struct $name {
            inner: SideSource,
        }

        impl $name {
            pub fn new(executor: RemoteQueryExecutorRef) -> Self {
                Self {
                    inner: SideSource::new($kind, executor),
                }
            }

            pub fn output_port_mut(&mut self) -> &mut OutputPort {
                self.inner.base.port_mut()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("emitted", &self.inner.emitted)
                    .finish()
            }
        }

        impl Processor for $name {
            fn name(&self) -> &str {
                self.inner.kind.name()
            }

            fn prepare(&mut self) -> Result<ProcessorStatus> {
                self.inner.base.prepare()
            }

            fn work(&mut self) -> Result<()> {
                self.inner.work()
            }

            fn cancel(&mut self) {
                self.inner.base.cancel();
            }

            fn num_outputs(&self) -> usize {
                1
            }

            fn output_mut(&mut self, idx: usize) -> Option<&mut OutputPort> {
                self.inner.output_mut(idx)
            }
        }
    };
}

side_source!(
    /// Emits the remote totals row block at most once.
    RemoteTotalsSource,
    SideStream::Totals
);

side_source!(
    /// Emits the remote extremes (min/max rows) block at most once.
    RemoteExtremesSource,
    SideStream::Extremes
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::pipeline::port::{InputPort, connect};
    use crate::runtime::remote_query::in_memory::InMemoryRemoteQueryExecutor;
    use arrow::array::{ArrayRef, Int64Array, RecordBatch};
    use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
    use std::sync::Arc;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]))
    }

    fn one_row() -> RecordBatch {
        let values: ArrayRef = Arc::new(Int64Array::from(vec![42]));
        RecordBatch::try_new(schema(), vec![values]).unwrap()
    }

    fn drive(source: &mut dyn Processor, input: &mut InputPort) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for _ in 0..16 {
            match source.prepare().unwrap() {
                ProcessorStatus::Finished => break,
                ProcessorStatus::Ready => source.work().unwrap(),
                ProcessorStatus::PortFull => chunks.push(input.pull().unwrap()),
                ProcessorStatus::Async => unreachable!("side sources never suspend"),
            }
        }
        if input.has_data() {
            chunks.push(input.pull().unwrap());
        }
        chunks
    }

    #[test]
    fn totals_emitted_once_then_finished() {
        let channel = Arc::new(InMemoryRemoteQueryExecutor::new(schema()));
        channel.set_totals(one_row());
        let mut source = RemoteTotalsSource::new(channel.clone());
        let mut input = InputPort::new(schema());
        connect(source.output_port_mut(), &mut input).unwrap();

        let chunks = drive(&mut source, &mut input);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 1);
        assert!(input.is_finished());
    }

    #[test]
    fn totals_stays_single_shot_even_if_channel_repeats() {
        let channel = Arc::new(InMemoryRemoteQueryExecutor::new(schema()));
        channel.set_totals(one_row());
        let mut source = RemoteTotalsSource::new(channel.clone());
        let mut input = InputPort::new(schema());
        connect(source.output_port_mut(), &mut input).unwrap();

        source.work().unwrap();
        channel.set_totals(one_row());
        source.prepare().unwrap();
        input.pull().unwrap();
        source.work().unwrap();
        assert_eq!(source.prepare().unwrap(), ProcessorStatus::Finished);
        assert!(!input.has_data());
    }

    #[test]
    fn absent_extremes_finish_immediately() {
        let channel = Arc::new(InMemoryRemoteQueryExecutor::new(schema()));
        let mut source = RemoteExtremesSource::new(channel);
        let mut input = InputPort::new(schema());
        connect(source.output_port_mut(), &mut input).unwrap();

        assert!(drive(&mut source, &mut input).is_empty());
        assert!(input.is_finished());
        assert_eq!(source.name(), "REMOTE_EXTREMES_SOURCE");
    }
}
