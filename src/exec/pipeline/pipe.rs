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
//! Pipe: a sub-graph of processors with one main output and optional side outputs.
//!
//! Responsibilities:
//! - Owns the processors of the sub-graph until they are handed to the scheduler.
//! - Tracks which processor output is the main stream, the totals stream and the extremes stream.
//!
//! Key exported interfaces:
//! - Types: `Pipe`.

use arrow::datatypes::SchemaRef;

use crate::exec::error::{ExecError, Result};
use crate::exec::pipeline::parallel_replicas::ParallelReplicasParticipant;
use crate::exec::pipeline::port::{InputPort, OutputPort, connect};
use crate::exec::pipeline::processor::Processor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PortRef {
    processor: usize,
    output: usize,
}

/// Composed sub-graph exposed to the rest of the pipeline.
pub struct Pipe {
    processors: Vec<Box<dyn Processor>>,
    header: SchemaRef,
    output: PortRef,
    totals: Option<PortRef>,
    extremes: Option<PortRef>,
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field(
                "processors",
                &self.processors.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("output", &self.output)
            .field("totals", &self.totals)
            .field("extremes", &self.extremes)
            .finish()
    }
}

impl Pipe {
    /// Pipe whose main output is output 0 of `source`.
    pub fn new(mut source: Box<dyn Processor>) -> Result<Self> {
        let header = source
            .output_mut(0)
            .map(|port| port.header().clone())
            .ok_or_else(|| {
                ExecError::Logical(format!("pipe source {} has no output port", source.name()))
            })?;
        Ok(Self {
            processors: vec![source],
            header,
            output: PortRef {
                processor: 0,
                output: 0,
            },
            totals: None,
            extremes: None,
        })
    }

    pub fn header(&self) -> &SchemaRef {
        &self.header
    }

    pub fn add_totals_source(&mut self, source: Box<dyn Processor>) -> Result<()> {
        if self.totals.is_some() {
            return Err(ExecError::Logical("pipe already has totals source".to_string()));
        }
        self.totals = Some(self.add_side_source(source)?);
        Ok(())
    }

    pub fn add_extremes_source(&mut self, source: Box<dyn Processor>) -> Result<()> {
        if self.extremes.is_some() {
            return Err(ExecError::Logical(
                "pipe already has extremes source".to_string(),
            ));
        }
        self.extremes = Some(self.add_side_source(source)?);
        Ok(())
    }

    fn add_side_source(&mut self, mut source: Box<dyn Processor>) -> Result<PortRef> {
        if source.num_outputs() != 1 || source.output_mut(0).is_none() {
            return Err(ExecError::Logical(format!(
                "side source {} must have exactly one output",
                source.name()
            )));
        }
        self.processors.push(source);
        Ok(PortRef {
            processor: self.processors.len() - 1,
            output: 0,
        })
    }

    pub fn has_totals(&self) -> bool {
        self.totals.is_some()
    }

    pub fn has_extremes(&self) -> bool {
        self.extremes.is_some()
    }

    pub fn num_processors(&self) -> usize {
        self.processors.len()
    }

    pub fn processors(&self) -> &[Box<dyn Processor>] {
        &self.processors
    }

    pub fn processors_mut(&mut self) -> &mut [Box<dyn Processor>] {
        &mut self.processors
    }

    pub fn into_processors(self) -> Vec<Box<dyn Processor>> {
        self.processors
    }

    fn port_mut(&mut self, port: PortRef) -> Result<&mut OutputPort> {
        self.processors
            .get_mut(port.processor)
            .and_then(|p| p.output_mut(port.output))
            .ok_or_else(|| ExecError::Logical(format!("pipe port {:?} out of bounds", port)))
    }

    pub fn output_port_mut(&mut self) -> Result<&mut OutputPort> {
        self.port_mut(self.output)
    }

    pub fn totals_port_mut(&mut self) -> Result<Option<&mut OutputPort>> {
        match self.totals {
            Some(port) => self.port_mut(port).map(Some),
            None => Ok(None),
        }
    }

    pub fn extremes_port_mut(&mut self) -> Result<Option<&mut OutputPort>> {
        match self.extremes {
            Some(port) => self.port_mut(port).map(Some),
            None => Ok(None),
        }
    }

    pub fn connect_output(&mut self, input: &mut InputPort) -> Result<()> {
        connect(self.output_port_mut()?, input)
    }

    /// Connect the totals stream. Returns `false` when the pipe has none.
    pub fn connect_totals(&mut self, input: &mut InputPort) -> Result<bool> {
        match self.totals_port_mut()? {
            Some(port) => connect(port, input).map(|_| true),
            None => Ok(false),
        }
    }

    /// Connect the extremes stream. Returns `false` when the pipe has none.
    pub fn connect_extremes(&mut self, input: &mut InputPort) -> Result<bool> {
        match self.extremes_port_mut()? {
            Some(port) => connect(port, input).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn parallel_replicas_participants_mut(
        &mut self,
    ) -> impl Iterator<Item = &mut dyn ParallelReplicasParticipant> + '_ {
        self.processors
            .iter_mut()
            .filter_map(|p| p.as_parallel_replicas_mut())
    }
}
