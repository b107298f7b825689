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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use tempfile::TempDir;

use novarocks_remote::common::types::UniqueId;
use novarocks_remote::exec::chunk::Chunk;
use novarocks_remote::exec::pipeline::pipe::Pipe;
use novarocks_remote::exec::pipeline::port::InputPort;
use novarocks_remote::exec::pipeline::processor::{Fd, Processor, ProcessorStatus};
use novarocks_remote::novarocks_config;
use novarocks_remote::novarocks_logging;
use novarocks_remote::{ExecError, Result};

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a test configuration that enables every optional remote output.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_content(
            r#"
log_level = "debug"

[remote]
async_read = false
add_aggregation_info = true
add_totals = true
add_extremes = true
"#,
        )
    }

    pub fn with_content(content: &str) -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_novarocks.toml");
        std::fs::write(&config_path, content)?;
        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Initialize logging for tests.
    pub fn init_logging(&self) {
        novarocks_logging::init_with_level("debug");
    }

    /// Load the test configuration.
    pub fn load_config(&self) -> anyhow::Result<&'static novarocks_config::NovaRocksConfig> {
        novarocks_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// Generate a test group ID.
pub fn test_group_id() -> UniqueId {
    UniqueId {
        hi: 1234567890,
        lo: 9876543210,
    }
}

pub fn int64_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]))
}

/// Batch of `rows` consecutive values starting at `start`.
pub fn int64_batch(start: i64, rows: i64) -> RecordBatch {
    let values: ArrayRef = Arc::new(Int64Array::from_iter_values(start..start + rows));
    RecordBatch::try_new(int64_schema(), vec![values]).expect("build int64 batch")
}

/// Consumer end of one pipe output.
pub struct Consumer {
    pub input: InputPort,
    pub chunks: Vec<Chunk>,
}

impl Consumer {
    fn new(header: SchemaRef) -> Self {
        Self {
            input: InputPort::new(header),
            chunks: Vec::new(),
        }
    }

    fn drain(&mut self) -> Result<()> {
        if self.input.has_data() {
            self.chunks.push(self.input.pull()?);
        }
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    pub fn is_finished(&self) -> bool {
        self.input.is_finished()
    }
}

/// Single-threaded scheduler stand-in.
///
/// Processor 0 is the main source; side sources are polled only after it finished.
/// Descriptor waits resume only after `mark_ready` or when `auto_ready` is set.
pub struct PipeRunner {
    processors: Vec<Box<dyn Processor>>,
    statuses: Vec<Option<ProcessorStatus>>,
    ready_fds: HashSet<Fd>,
    pub auto_ready: bool,
    pub main: Consumer,
    pub totals: Option<Consumer>,
    pub extremes: Option<Consumer>,
    pub work_calls: usize,
}

impl PipeRunner {
    pub fn new(mut pipe: Pipe) -> Result<Self> {
        let header = pipe.header().clone();
        let mut main = Consumer::new(header.clone());
        pipe.connect_output(&mut main.input)?;

        let mut totals = Consumer::new(header.clone());
        let totals = pipe.connect_totals(&mut totals.input)?.then_some(totals);
        let mut extremes = Consumer::new(header);
        let extremes = pipe.connect_extremes(&mut extremes.input)?.then_some(extremes);

        let processors = pipe.into_processors();
        let statuses = vec![None; processors.len()];
        Ok(Self {
            processors,
            statuses,
            ready_fds: HashSet::new(),
            auto_ready: true,
            main,
            totals,
            extremes,
            work_calls: 0,
        })
    }

    pub fn processor_mut(&mut self, idx: usize) -> &mut dyn Processor {
        self.processors[idx].as_mut()
    }

    pub fn status(&self, idx: usize) -> Option<ProcessorStatus> {
        self.statuses[idx]
    }

    pub fn mark_ready(&mut self, fd: Fd) {
        self.ready_fds.insert(fd);
    }

    pub fn is_done(&self) -> bool {
        self.statuses
            .iter()
            .all(|s| *s == Some(ProcessorStatus::Finished))
    }

    fn poll(&mut self, idx: usize) -> Result<()> {
        if self.statuses[idx] == Some(ProcessorStatus::Finished) {
            return Ok(());
        }
        let processor = self.processors[idx].as_mut();
        let status = processor.prepare()?;
        self.statuses[idx] = Some(status);
        match status {
            ProcessorStatus::Ready => {
                self.work_calls += 1;
                processor.work()?;
            }
            ProcessorStatus::Async => {
                let fd = processor
                    .schedule()
                    .ok_or_else(|| ExecError::Logical("async without descriptor".to_string()))?;
                if self.auto_ready || self.ready_fds.remove(&fd) {
                    self.work_calls += 1;
                    processor.work()?;
                }
            }
            ProcessorStatus::PortFull | ProcessorStatus::Finished => {}
        }
        Ok(())
    }

    /// One scheduling round followed by draining every consumer.
    pub fn step(&mut self) -> Result<()> {
        self.poll(0)?;
        if self.statuses[0] == Some(ProcessorStatus::Finished) {
            for idx in 1..self.processors.len() {
                self.poll(idx)?;
            }
        }
        self.main.drain()?;
        if let Some(totals) = self.totals.as_mut() {
            totals.drain()?;
        }
        if let Some(extremes) = self.extremes.as_mut() {
            extremes.drain()?;
        }
        Ok(())
    }

    pub fn run(&mut self, max_steps: usize) -> Result<()> {
        for _ in 0..max_steps {
            if self.is_done() {
                return Ok(());
            }
            self.step()?;
        }
        if self.is_done() {
            Ok(())
        } else {
            Err(ExecError::Logical(format!(
                "pipe did not finish within {max_steps} steps: {:?}",
                self.statuses
            )))
        }
    }

    /// Close the main consumer and notify the main source, as a satisfied LIMIT would.
    pub fn close_main(&mut self) -> Result<()> {
        self.main.input.close();
        self.processors[0].on_update_ports()
    }

    pub fn cancel(&mut self) {
        for processor in self.processors.iter_mut() {
            processor.cancel();
        }
    }
}

/// Assert that a result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is Err.
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => e,
        }
    };
}
