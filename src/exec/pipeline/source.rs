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
//! Shared state machine for source processors.
//!
//! Responsibilities:
//! - Moves generated chunks into the single main output port.
//! - Turns generator results into ready/port-full/finished transitions.
//!
//! Key exported interfaces:
//! - Types: `SourceOutput`, `SourceBase`.

use arrow::datatypes::SchemaRef;

use crate::exec::chunk::Chunk;
use crate::exec::error::Result;
use crate::exec::pipeline::port::OutputPort;
use crate::exec::pipeline::processor::{Fd, ProcessorStatus};

/// What one generator call yielded.
#[derive(Debug)]
pub enum SourceOutput {
    /// A chunk to push downstream.
    Chunk(Chunk),
    /// Nothing to push this round, poll again promptly.
    Idle,
    /// Nothing to push until the descriptor becomes readable.
    Suspended(Fd),
    /// The stream is exhausted.
    EndOfStream,
}

/// Output-side bookkeeping embedded in every source processor.
#[derive(Debug)]
pub struct SourceBase {
    output: OutputPort,
    current_chunk: Option<Chunk>,
    finished: bool,
    cancelled: bool,
    produced_chunks: u64,
    produced_rows: u64,
}

impl SourceBase {
    pub fn new(header: SchemaRef) -> Self {
        Self {
            output: OutputPort::new(header),
            current_chunk: None,
            finished: false,
            cancelled: false,
            produced_chunks: 0,
            produced_rows: 0,
        }
    }

    pub fn port(&self) -> &OutputPort {
        &self.output
    }

    pub fn port_mut(&mut self) -> &mut OutputPort {
        &mut self.output
    }

    pub fn header(&self) -> &SchemaRef {
        self.output.header()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Mark cancelled. Returns `true` only for the first call.
    pub fn cancel(&mut self) -> bool {
        if self.cancelled {
            return false;
        }
        self.cancelled = true;
        true
    }

    pub fn produced_chunks(&self) -> u64 {
        self.produced_chunks
    }

    pub fn produced_rows(&self) -> u64 {
        self.produced_rows
    }

    pub fn prepare(&mut self) -> Result<ProcessorStatus> {
        if self.finished {
            self.output.finish();
            return Ok(ProcessorStatus::Finished);
        }

        if self.output.is_finished() {
            return Ok(ProcessorStatus::Finished);
        }

        if !self.output.can_push() {
            return Ok(ProcessorStatus::PortFull);
        }

        let Some(chunk) = self.current_chunk.take() else {
            return Ok(ProcessorStatus::Ready);
        };
        self.produced_chunks += 1;
        self.produced_rows += chunk.len() as u64;
        self.output.push(chunk)?;

        if self.cancelled {
            self.output.finish();
            return Ok(ProcessorStatus::Finished);
        }

        // The single slot was just filled.
        Ok(ProcessorStatus::PortFull)
    }

    /// Record the result of one generator call.
    ///
    /// A failed generator finishes the source before the error is returned.
    pub fn accept(&mut self, generated: Result<SourceOutput>) -> Result<()> {
        match generated {
            Ok(SourceOutput::Chunk(chunk)) => self.current_chunk = Some(chunk),
            Ok(SourceOutput::Idle) | Ok(SourceOutput::Suspended(_)) => {}
            Ok(SourceOutput::EndOfStream) => self.finished = true,
            Err(err) => {
                self.finished = true;
                return Err(err);
            }
        }
        if self.cancelled {
            self.finished = true;
        }
        Ok(())
    }
}
