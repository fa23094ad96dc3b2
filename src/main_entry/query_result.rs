use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use derive_new::new;

#[derive(new, Debug)]
pub struct MaterializedQueryResult {
    /// The schema of the result
    pub(crate) schema: SchemaRef,
    pub(crate) collection: Vec<RecordBatch>,
}

impl MaterializedQueryResult {
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn collection(&self) -> &[RecordBatch] {
        &self.collection
    }

    pub fn into_collection(self) -> Vec<RecordBatch> {
        self.collection
    }

    pub fn num_rows(&self) -> usize {
        self.collection.iter().map(|batch| batch.num_rows()).sum()
    }
}
