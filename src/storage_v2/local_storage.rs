use std::sync::Arc;

use arrow::compute;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parking_lot::RwLock;

use crate::execution::{ExecutorError, VECTOR_SIZE};

/// An in-memory table, the data source of table scans.
#[derive(Debug)]
pub struct DataTable {
    pub(crate) name: String,
    pub(crate) schema: SchemaRef,
    storage: RwLock<LocalTableStorage>,
}

impl DataTable {
    pub fn new(name: impl Into<String>, schema: SchemaRef) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            schema: schema.clone(),
            storage: RwLock::new(LocalTableStorage::new(schema)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn append(&self, batch: RecordBatch) -> Result<(), ExecutorError> {
        self.storage.write().append(batch)
    }

    pub fn row_count(&self) -> usize {
        self.storage.read().row_count
    }

    /// Read at most `max_rows` rows starting at `start_row`. The returned chunk never crosses a
    /// storage block, so it may be shorter than requested.
    pub fn fetch_chunk(&self, start_row: usize, max_rows: usize) -> Option<RecordBatch> {
        self.storage.read().fetch_chunk(start_row, max_rows)
    }
}

/// Appended rows are compacted into blocks of `VECTOR_SIZE` rows, only the last block may be
/// partially filled. This keeps row lookups a simple division.
#[derive(Debug)]
pub struct LocalTableStorage {
    schema: SchemaRef,
    data: Vec<RecordBatch>,
    row_count: usize,
}

impl LocalTableStorage {
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            data: vec![],
            row_count: 0,
        }
    }

    fn append(&mut self, batch: RecordBatch) -> Result<(), ExecutorError> {
        let batch = RecordBatch::try_new(self.schema.clone(), batch.columns().to_vec())?;
        let num_rows = batch.num_rows();
        let mut offset = 0;

        if let Some(last_batch) = self.data.last_mut() {
            let remaining_count = VECTOR_SIZE - last_batch.num_rows();
            if remaining_count > 0 && num_rows > 0 {
                // need to merge current batch into last unfull batch
                let appended_len = remaining_count.min(num_rows);
                let appended_batch = batch.slice(0, appended_len);
                *last_batch =
                    compute::concat_batches(&self.schema, &[last_batch.clone(), appended_batch])?;
                offset = appended_len;
            }
        }

        while offset < num_rows {
            let len = VECTOR_SIZE.min(num_rows - offset);
            self.data.push(batch.slice(offset, len));
            offset += len;
        }
        self.row_count += num_rows;
        Ok(())
    }

    fn fetch_chunk(&self, start_row: usize, max_rows: usize) -> Option<RecordBatch> {
        if start_row >= self.row_count || max_rows == 0 {
            return None;
        }
        let batch = &self.data[start_row / VECTOR_SIZE];
        let offset = start_row % VECTOR_SIZE;
        let len = (batch.num_rows() - offset).min(max_rows);
        Some(batch.slice(offset, len))
    }
}
