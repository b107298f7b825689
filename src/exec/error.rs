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
//! Error taxonomy for the execution layer.

use thiserror::Error;

/// Errors raised while driving pipeline processors.
///
/// - [`ExecError::Logical`]: an internal contract was broken (a bug, never retried).
/// - [`ExecError::Remote`]: the remote channel failed a dispatch or read; surfaced unchanged.
/// - [`ExecError::LimitExceeded`]: a size limit in `Throw` mode was crossed.
/// - [`ExecError::Port`]: the port framework was misused by a processor or scheduler.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("logical error: {0}")]
    Logical(String),

    #[error("remote query failed: {0}")]
    Remote(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("port error: {0}")]
    Port(String),
}

impl ExecError {
    pub fn is_logical(&self) -> bool {
        matches!(self, ExecError::Logical(_))
    }
}

pub type Result<T> = std::result::Result<T, ExecError>;
