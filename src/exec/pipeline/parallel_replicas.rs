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
//! Parallel-replicas coordination hooks.
//!
//! Responsibilities:
//! - Lets a coordinator discover which sources belong to one replica group.
//! - Wires a schema-less auxiliary output of each participant to the coordinator.
//!
//! The auxiliary port carries empty chunks only. A pulse means "this source finished a
//! read/response cycle or yielded its slot"; it is an opaque liveness signal.
//!
//! Key exported interfaces:
//! - Traits: `ParallelReplicasParticipant`.
//! - Types: `ParallelReplicasSync`.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::datatypes::Schema;

use crate::common::types::UniqueId;
use crate::exec::error::Result;
use crate::exec::pipeline::pipe::Pipe;
use crate::exec::pipeline::port::InputPort;
use crate::novarocks_logging::debug;

/// A source reading one replica of a distributed query.
pub trait ParallelReplicasParticipant {
    /// Identity shared by all sources of the same replica set. Constant for the object's life.
    fn group_id(&self) -> UniqueId;

    /// Allocate the auxiliary output port and connect it to `input`.
    fn connect_to_scheduler(&mut self, input: &mut InputPort) -> Result<()>;
}

/// Coordinator-side end of the auxiliary ports, grouped by replica set.
#[derive(Debug, Default)]
pub struct ParallelReplicasSync {
    groups: BTreeMap<UniqueId, Vec<InputPort>>,
}

impl ParallelReplicasSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect every participant of `pipe`. Returns how many were connected.
    pub fn attach(&mut self, pipe: &mut Pipe) -> Result<usize> {
        let mut attached = 0;
        for participant in pipe.parallel_replicas_participants_mut() {
            let mut input = InputPort::new(Arc::new(Schema::empty()));
            participant.connect_to_scheduler(&mut input)?;
            let group_id = participant.group_id();
            debug!("parallel replicas participant attached: group={}", group_id);
            self.groups.entry(group_id).or_default().push(input);
            attached += 1;
        }
        Ok(attached)
    }

    pub fn group_ids(&self) -> Vec<UniqueId> {
        self.groups.keys().copied().collect()
    }

    pub fn num_participants(&self, group_id: UniqueId) -> usize {
        self.groups.get(&group_id).map(Vec::len).unwrap_or(0)
    }

    /// Pull all pending pulses of one group, freeing the participants' auxiliary slots.
    pub fn drain_pulses(&mut self, group_id: UniqueId) -> Result<usize> {
        let Some(inputs) = self.groups.get_mut(&group_id) else {
            return Ok(0);
        };
        let mut pulses = 0;
        for input in inputs.iter_mut() {
            if input.has_data() {
                input.pull()?;
                pulses += 1;
            }
        }
        Ok(pulses)
    }

    /// All participants of the group closed their auxiliary ports.
    pub fn is_group_finished(&self, group_id: UniqueId) -> bool {
        self.groups
            .get(&group_id)
            .map(|inputs| inputs.iter().all(InputPort::is_finished))
            .unwrap_or(true)
    }
}
