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
//! Assembly of the remote read sub-graph.
//!
//! Responsibilities:
//! - Builds one `RemoteSource` as the main output and, on request, totals/extremes side
//!   sources sharing the same channel.
//!
//! Key exported interfaces:
//! - Types: `RemotePipeOptions`.
//! - Functions: `create_remote_source_pipe`.

use std::sync::Arc;

use crate::common::config::{
    remote_add_aggregation_info, remote_add_extremes, remote_add_totals, remote_async_read,
};
use crate::common::types::UniqueId;
use crate::exec::error::Result;
use crate::exec::operators::remote_side_source::{RemoteExtremesSource, RemoteTotalsSource};
use crate::exec::operators::remote_source::RemoteSource;
use crate::exec::pipeline::pipe::Pipe;
use crate::novarocks_logging::debug;
use crate::runtime::remote_query::RemoteQueryExecutorRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemotePipeOptions {
    pub add_aggregation_info: bool,
    pub add_totals: bool,
    pub add_extremes: bool,
    pub async_read: bool,
    pub group_id: UniqueId,
}

impl Default for RemotePipeOptions {
    fn default() -> Self {
        Self {
            add_aggregation_info: false,
            add_totals: false,
            add_extremes: false,
            async_read: true,
            group_id: UniqueId::NIL,
        }
    }
}

impl RemotePipeOptions {
    /// Flags from the `[remote]` config section, defaults when no config is loaded.
    pub fn from_config(group_id: UniqueId) -> Self {
        Self {
            add_aggregation_info: remote_add_aggregation_info(),
            add_totals: remote_add_totals(),
            add_extremes: remote_add_extremes(),
            async_read: remote_async_read(),
            group_id,
        }
    }
}

pub fn create_remote_source_pipe(
    executor: RemoteQueryExecutorRef,
    options: RemotePipeOptions,
) -> Result<Pipe> {
    let source = RemoteSource::new(
        Arc::clone(&executor),
        options.add_aggregation_info,
        options.async_read,
        options.group_id,
    );
    let mut pipe = Pipe::new(Box::new(source))?;

    if options.add_totals {
        pipe.add_totals_source(Box::new(RemoteTotalsSource::new(Arc::clone(&executor))))?;
    }
    if options.add_extremes {
        pipe.add_extremes_source(Box::new(RemoteExtremesSource::new(executor)))?;
    }

    debug!(
        "remote source pipe created: group={} async_read={} totals={} extremes={}",
        options.group_id, options.async_read, options.add_totals, options.add_extremes
    );
    Ok(pipe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::remote_query::in_memory::InMemoryRemoteQueryExecutor;
    use arrow::datatypes::{DataType, Field, Schema};

    fn executor() -> RemoteQueryExecutorRef {
        Arc::new(InMemoryRemoteQueryExecutor::new(Arc::new(Schema::new(vec![
            Field::new("k", DataType::Utf8, true),
        ]))))
    }

    #[test]
    fn main_source_only_by_default() {
        let mut pipe = create_remote_source_pipe(executor(), RemotePipeOptions::default()).unwrap();
        assert_eq!(pipe.num_processors(), 1);
        assert!(!pipe.has_totals());
        assert!(!pipe.has_extremes());
        assert_eq!(pipe.processors()[0].name(), "REMOTE_SOURCE");
        assert_eq!(pipe.header().fields().len(), 1);
        assert_eq!(pipe.parallel_replicas_participants_mut().count(), 1);
    }

    #[test]
    fn side_sources_share_the_channel() {
        let executor = executor();
        let options = RemotePipeOptions {
            add_totals: true,
            add_extremes: true,
            group_id: UniqueId::new(3, 4),
            ..RemotePipeOptions::default()
        };
        let mut pipe = create_remote_source_pipe(Arc::clone(&executor), options).unwrap();
        assert_eq!(pipe.num_processors(), 3);
        assert!(pipe.has_totals());
        assert!(pipe.has_extremes());
        assert_eq!(Arc::strong_count(&executor), 4);

        let groups: Vec<UniqueId> = pipe
            .parallel_replicas_participants_mut()
            .map(|p| p.group_id())
            .collect();
        assert_eq!(groups, vec![UniqueId::new(3, 4)]);
    }

    #[test]
    fn second_totals_source_is_rejected() {
        let executor = executor();
        let options = RemotePipeOptions {
            add_totals: true,
            ..RemotePipeOptions::default()
        };
        let mut pipe = create_remote_source_pipe(Arc::clone(&executor), options).unwrap();
        let err = pipe
            .add_totals_source(Box::new(RemoteTotalsSource::new(executor)))
            .expect_err("one totals source per pipe");
        assert!(err.is_logical());
        assert_eq!(pipe.num_processors(), 2);
    }

    #[test]
    fn options_fall_back_to_defaults_without_config() {
        let options = RemotePipeOptions::from_config(UniqueId::new(0, 9));
        assert_eq!(options.group_id, UniqueId::new(0, 9));
        // The process-wide config is not initialized in unit tests.
        assert!(options.async_read);
        assert!(!options.add_totals);
    }
}
