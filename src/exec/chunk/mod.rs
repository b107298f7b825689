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
use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch, RecordBatchOptions};
use arrow::buffer::Buffer;
use arrow::datatypes::{Field, Schema, SchemaRef};

use crate::exec::error::{ExecError, Result};

/// Field metadata key marking a column that carries partial aggregate states.
///
/// The value is the aggregate function name. Such columns can only be merged by a
/// downstream aggregation that knows which bucket each chunk belongs to.
pub const FIELD_META_AGG_STATE: &str = "novarocks.agg_state";

pub fn field_with_agg_state(field: Field, function_name: &str) -> Field {
    let mut meta = field.metadata().clone();
    meta.insert(FIELD_META_AGG_STATE.to_string(), function_name.to_string());
    field.with_metadata(meta)
}

pub fn is_agg_state_field(field: &Field) -> bool {
    field.metadata().contains_key(FIELD_META_AGG_STATE)
}

pub fn schema_has_agg_state(schema: &Schema) -> bool {
    schema.fields().iter().any(|f| is_agg_state_field(f.as_ref()))
}

/// Bucket identity of a chunk produced by two-level aggregation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AggregatedChunkInfo {
    pub bucket_num: i32,
    pub is_overflows: bool,
}

impl Default for AggregatedChunkInfo {
    fn default() -> Self {
        Self {
            bucket_num: -1,
            is_overflows: false,
        }
    }
}

/// Row-to-partition assignment computed by a shuffling stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkSelectorInfo {
    pub selector: Arc<Vec<u32>>,
}

/// Side metadata a pipeline stage may attach to a chunk.
///
/// Consumers match on the variant they understand and ignore the rest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkInfo {
    Aggregated(AggregatedChunkInfo),
    Selector(ChunkSelectorInfo),
}

impl ChunkInfo {
    pub fn as_aggregated(&self) -> Option<&AggregatedChunkInfo> {
        match self {
            ChunkInfo::Aggregated(info) => Some(info),
            _ => None,
        }
    }
}

/// A chunk of data, consisting of multiple rows, plus optional side metadata.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub batch: RecordBatch,
    info: Option<ChunkInfo>,
}

impl Chunk {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch, info: None }
    }

    /// Build a chunk from raw columns and an explicit row count.
    ///
    /// The row count is carried even when there are no columns (e.g. `count()` over a
    /// remote table).
    pub fn try_from_columns(
        schema: SchemaRef,
        columns: Vec<ArrayRef>,
        num_rows: usize,
    ) -> Result<Self> {
        let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
        let batch = RecordBatch::try_new_with_options(schema, columns, &options)
            .map_err(|e| ExecError::Logical(format!("build chunk failed: {e}")))?;
        Ok(Self::new(batch))
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn info(&self) -> Option<&ChunkInfo> {
        self.info.as_ref()
    }

    pub fn set_info(&mut self, info: ChunkInfo) {
        self.info = Some(info);
    }

    pub fn with_info(mut self, info: ChunkInfo) -> Self {
        self.set_info(info);
        self
    }

    pub fn aggregated_info(&self) -> Option<&AggregatedChunkInfo> {
        self.info.as_ref().and_then(ChunkInfo::as_aggregated)
    }

    pub fn logical_bytes(&self) -> usize {
        record_batch_bytes(&self.batch)
    }
}

impl Default for Chunk {
    /// Zero-column, zero-row chunk. Used as a payload-less signal.
    fn default() -> Self {
        Self {
            batch: RecordBatch::new_empty(Arc::new(Schema::empty())),
            info: None,
        }
    }
}

/// Estimate RecordBatch size by summing unique buffers inside the batch.
///
/// Buffers are de-duplicated only within a single RecordBatch.
pub fn record_batch_bytes(batch: &RecordBatch) -> usize {
    let mut seen = HashSet::new();
    let mut total = 0usize;
    for column in batch.columns() {
        total = total.saturating_add(array_data_bytes(&column.to_data(), &mut seen));
    }
    total
}

fn array_data_bytes(data: &arrow::array::ArrayData, seen: &mut HashSet<usize>) -> usize {
    let mut total = 0usize;
    for buffer in data.buffers() {
        total = total.saturating_add(buffer_bytes(buffer, seen));
    }
    if let Some(nulls) = data.nulls() {
        total = total.saturating_add(buffer_bytes(nulls.buffer(), seen));
    }
    for child in data.child_data() {
        total = total.saturating_add(array_data_bytes(child, seen));
    }
    total
}

fn buffer_bytes(buffer: &Buffer, seen: &mut HashSet<usize>) -> usize {
    let ptr = buffer.data_ptr().as_ptr() as usize;
    if !seen.insert(ptr) {
        return 0;
    }
    buffer.capacity().max(buffer.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{BinaryArray, Int32Array};
    use arrow::datatypes::DataType;

    #[test]
    fn agg_state_metadata_is_detected_per_field() {
        let schema = Schema::new(vec![
            Field::new("k", DataType::Int32, false),
            field_with_agg_state(Field::new("s", DataType::Binary, true), "sum"),
        ]);
        assert!(!is_agg_state_field(schema.field(0)));
        assert!(is_agg_state_field(schema.field(1)));
        assert!(schema_has_agg_state(&schema));
        assert!(!schema_has_agg_state(&Schema::new(vec![Field::new(
            "k",
            DataType::Int32,
            false
        )])));
    }

    #[test]
    fn column_less_chunk_keeps_row_count() {
        let chunk = Chunk::try_from_columns(Arc::new(Schema::empty()), vec![], 42)
            .expect("column-less chunk");
        assert_eq!(chunk.len(), 42);
        assert_eq!(chunk.num_columns(), 0);
    }

    #[test]
    fn consumers_match_on_info_variant() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int32, false),
            Field::new("v", DataType::Binary, true),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int32Array::from(vec![1, 2])),
            Arc::new(BinaryArray::from(vec![Some(b"a".as_ref()), None])),
        ];
        let chunk = Chunk::try_from_columns(schema, columns, 2)
            .expect("chunk")
            .with_info(ChunkInfo::Aggregated(AggregatedChunkInfo {
                bucket_num: 7,
                is_overflows: true,
            }));
        match chunk.info() {
            Some(ChunkInfo::Aggregated(info)) => {
                assert_eq!(info.bucket_num, 7);
                assert!(info.is_overflows);
            }
            other => panic!("unexpected chunk info: {other:?}"),
        }

        let selected = Chunk::default().with_info(ChunkInfo::Selector(ChunkSelectorInfo {
            selector: Arc::new(vec![0, 1, 0]),
        }));
        assert!(selected.aggregated_info().is_none());
    }

    #[test]
    fn default_chunk_is_an_empty_signal() {
        let chunk = Chunk::default();
        assert!(chunk.is_empty());
        assert_eq!(chunk.num_columns(), 0);
        assert!(chunk.info().is_none());
        assert_eq!(chunk.logical_bytes(), 0);
    }
}
