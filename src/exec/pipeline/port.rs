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
//! Single-slot ports connecting pipeline processors.
//!
//! Responsibilities:
//! - Carries at most one chunk at a time from one producer to one consumer.
//! - Propagates closure in both directions: the producer finishes when it runs dry,
//!   the consumer closes when it no longer needs data.
//!
//! Key exported interfaces:
//! - Types: `OutputPort`, `InputPort`.
//! - Functions: `connect`.

use std::sync::{Arc, Mutex};

use arrow::datatypes::{Schema, SchemaRef};

use crate::exec::chunk::Chunk;
use crate::exec::error::{ExecError, Result};

#[derive(Debug, Default)]
struct PortState {
    data: Option<Chunk>,
    finished: bool,
    pushed: u64,
}

type SharedPortState = Arc<Mutex<PortState>>;

fn lock(state: &SharedPortState) -> std::sync::MutexGuard<'_, PortState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Producer side of a port.
#[derive(Debug)]
pub struct OutputPort {
    header: SchemaRef,
    state: Option<SharedPortState>,
}

/// Consumer side of a port.
#[derive(Debug)]
pub struct InputPort {
    header: SchemaRef,
    state: Option<SharedPortState>,
}

/// Wire `output` to `input`. Each side may be connected only once.
pub fn connect(output: &mut OutputPort, input: &mut InputPort) -> Result<()> {
    if output.state.is_some() {
        return Err(ExecError::Port("output port is already connected".to_string()));
    }
    if input.state.is_some() {
        return Err(ExecError::Port("input port is already connected".to_string()));
    }
    let state: SharedPortState = Arc::new(Mutex::new(PortState::default()));
    output.state = Some(Arc::clone(&state));
    input.state = Some(state);
    Ok(())
}

impl OutputPort {
    pub fn new(header: SchemaRef) -> Self {
        Self {
            header,
            state: None,
        }
    }

    /// Port without a schema, used for pure signaling.
    pub fn signal() -> Self {
        Self::new(Arc::new(Schema::empty()))
    }

    pub fn header(&self) -> &SchemaRef {
        &self.header
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_some()
    }

    pub fn can_push(&self) -> bool {
        match self.state.as_ref() {
            Some(state) => {
                let guard = lock(state);
                !guard.finished && guard.data.is_none()
            }
            None => false,
        }
    }

    pub fn push(&mut self, chunk: Chunk) -> Result<()> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| ExecError::Port("push to unconnected output port".to_string()))?;
        let mut guard = lock(state);
        if guard.finished {
            return Err(ExecError::Port("push to finished output port".to_string()));
        }
        if guard.data.is_some() {
            return Err(ExecError::Port("push to full output port".to_string()));
        }
        guard.data = Some(chunk);
        guard.pushed += 1;
        Ok(())
    }

    /// Either side closed the port. An unconnected port counts as finished.
    pub fn is_finished(&self) -> bool {
        match self.state.as_ref() {
            Some(state) => lock(state).finished,
            None => true,
        }
    }

    /// Close from the producer side. Data already pushed stays readable.
    pub fn finish(&mut self) {
        if let Some(state) = self.state.as_ref() {
            lock(state).finished = true;
        }
    }

    /// Number of chunks pushed through this port so far.
    pub fn pushed_count(&self) -> u64 {
        self.state.as_ref().map(|s| lock(s).pushed).unwrap_or(0)
    }
}

impl InputPort {
    pub fn new(header: SchemaRef) -> Self {
        Self {
            header,
            state: None,
        }
    }

    pub fn header(&self) -> &SchemaRef {
        &self.header
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_some()
    }

    pub fn has_data(&self) -> bool {
        self.state
            .as_ref()
            .map(|s| lock(s).data.is_some())
            .unwrap_or(false)
    }

    pub fn pull(&mut self) -> Result<Chunk> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| ExecError::Port("pull from unconnected input port".to_string()))?;
        lock(state)
            .data
            .take()
            .ok_or_else(|| ExecError::Port("pull from empty input port".to_string()))
    }

    /// Drained and closed by the producer (or closed by us).
    pub fn is_finished(&self) -> bool {
        match self.state.as_ref() {
            Some(state) => {
                let guard = lock(state);
                guard.finished && guard.data.is_none()
            }
            None => true,
        }
    }

    /// Close from the consumer side; any pending chunk is dropped.
    pub fn close(&mut self) {
        if let Some(state) = self.state.as_ref() {
            let mut guard = lock(state);
            guard.finished = true;
            guard.data = None;
        }
    }
}
