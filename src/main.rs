use std::sync::Arc;

use anyhow::Result;
use arrow::array::{BooleanArray, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use sqlrs_pipeline::common::as_int64_array;
use sqlrs_pipeline::execution::{
    AggregateExpression, ExecutorError, PhysicalFilter, PhysicalHashAggregate, PhysicalTableScan,
};
use sqlrs_pipeline::main_entry::{ClientContext, DatabaseConfig, DatabaseInstance};
use sqlrs_pipeline::storage_v2::DataTable;
use sqlrs_pipeline::util::pretty_batches;

const ROWS: i64 = 100_000;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let db = DatabaseInstance::new(DatabaseConfig::default())?;
    let client_context = ClientContext::new(db.clone());

    // orders(id, customer) with 10 customers
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("customer", DataType::Int64, false),
    ]));
    let table = DataTable::new("orders", schema.clone());
    let ids = (0..ROWS).collect::<Vec<_>>();
    let customers = ids.iter().map(|id| id % 10).collect::<Vec<_>>();
    table.append(RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(Int64Array::from(customers)),
        ],
    )?)?;

    // select customer, count(*), sum(id) from orders where id % 3 = 0 group by customer
    let scan = PhysicalTableScan::new(table);
    let filter = PhysicalFilter::new(
        scan,
        Arc::new(|batch: &RecordBatch| -> Result<BooleanArray, ExecutorError> {
            let ids = as_int64_array(batch.column(0).as_ref())?;
            Ok(ids.iter().map(|id| id.map(|id| id % 3 == 0)).collect())
        }),
    );
    let plan = PhysicalHashAggregate::try_new(
        filter,
        1,
        vec![
            AggregateExpression::count_star("count"),
            AggregateExpression::sum(0, "sum_id"),
        ],
    )?;

    let result = client_context.query(plan).await?;
    println!("{}", pretty_batches(result.collection())?);

    db.shutdown();
    Ok(())
}
