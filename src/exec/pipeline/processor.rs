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
//! Processor scheduling contract.
//!
//! Responsibilities:
//! - Defines the readiness/work split the external scheduler drives.
//! - Exposes optional hooks (cancellation, port updates, descriptor waits) with no-op defaults.
//!
//! Key exported interfaces:
//! - Types: `ProcessorStatus`, `Processor`, `Fd`.

use crate::exec::error::Result;
use crate::exec::pipeline::parallel_replicas::ParallelReplicasParticipant;
use crate::exec::pipeline::port::OutputPort;
use crate::runtime::profile::OperatorProfiles;

/// OS descriptor a suspended processor waits on.
pub type Fd = std::os::raw::c_int;

/// Result of one readiness check.
///
/// The scheduler calls [`Processor::prepare`] repeatedly and acts on the status:
/// ```text
///   Ready    ──► call work()
///   PortFull ──► wait for downstream to drain an output
///   Async    ──► wait on Processor::schedule() descriptor, then call work()
///   Finished ──► stop polling this processor
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessorStatus {
    Ready,
    PortFull,
    Async,
    Finished,
}

/// Node of a pull-based pipeline. Never re-entered concurrently.
pub trait Processor: Send {
    fn name(&self) -> &str;

    fn prepare(&mut self) -> Result<ProcessorStatus>;

    fn work(&mut self) -> Result<()>;

    /// Descriptor to wait on after `prepare` returned [`ProcessorStatus::Async`].
    fn schedule(&self) -> Option<Fd> {
        None
    }

    fn cancel(&mut self) {
        // Default: nothing to cancel.
    }

    /// Called by the scheduler after a consumer closed one of our outputs.
    fn on_update_ports(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_profiles(&mut self, profiles: OperatorProfiles) {
        let _ = profiles;
    }

    fn num_outputs(&self) -> usize;

    fn output_mut(&mut self, idx: usize) -> Option<&mut OutputPort>;

    fn as_parallel_replicas_mut(&mut self) -> Option<&mut dyn ParallelReplicasParticipant> {
        None
    }
}
