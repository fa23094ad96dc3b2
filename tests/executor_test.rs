use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use pretty_assertions::assert_eq;
use sqlrs_pipeline::common::as_int64_array;
use sqlrs_pipeline::execution::{
    AggregateExpression, ExecutorError, PhysicalFilter, PhysicalHashAggregate, PhysicalHashJoin,
    PhysicalOperatorRef, PhysicalSimpleAggregate, PhysicalTableScan, SchedulerError,
};
use sqlrs_pipeline::main_entry::{
    ClientContext, DatabaseConfigBuilder, DatabaseError, DatabaseInstance,
};
use sqlrs_pipeline::storage_v2::DataTable;
use test_case::test_case;

fn client(worker_threads: usize, max_partitions: Option<usize>) -> Arc<ClientContext> {
    let config = DatabaseConfigBuilder::default()
        .worker_threads(worker_threads)
        .max_partitions(max_partitions)
        .build()
        .unwrap();
    ClientContext::new(DatabaseInstance::new(config).unwrap())
}

/// A table of Int64 columns, each column computed from the row number.
fn table(name: &str, rows: i64, columns: &[(&str, fn(i64) -> i64)]) -> Arc<DataTable> {
    let schema = Arc::new(Schema::new(
        columns
            .iter()
            .map(|(name, _)| Field::new(name, DataType::Int64, false))
            .collect::<Vec<_>>(),
    ));
    let table = DataTable::new(name, schema.clone());
    let arrays = columns
        .iter()
        .map(|(_, f)| {
            let values = (0..rows).map(f).collect::<Vec<_>>();
            Arc::new(Int64Array::from(values)) as ArrayRef
        })
        .collect::<Vec<_>>();
    table
        .append(RecordBatch::try_new(schema, arrays).unwrap())
        .unwrap();
    table
}

fn int64_column(batches: &[RecordBatch], column: usize) -> Vec<i64> {
    batches
        .iter()
        .flat_map(|batch| {
            as_int64_array(batch.column(column).as_ref())
                .unwrap()
                .values()
                .to_vec()
        })
        .collect()
}

fn count_star(child: PhysicalOperatorRef) -> PhysicalOperatorRef {
    PhysicalSimpleAggregate::try_new(child, vec![AggregateExpression::count_star("count")])
        .unwrap()
}

#[test_case(1, Some(1))]
#[test_case(4, Some(8))]
#[test_case(8, None)]
#[tokio::test]
async fn test_count_large_table(worker_threads: usize, max_partitions: Option<usize>) {
    let client = client(worker_threads, max_partitions);
    let orders = table("orders", 1_000_000, &[("id", |i| i)]);
    let result = client
        .query(count_star(PhysicalTableScan::new(orders)))
        .await
        .unwrap();
    assert_eq!(1, result.num_rows());
    assert_eq!(vec![1_000_000], int64_column(result.collection(), 0));
}

#[tokio::test]
async fn test_join_then_aggregate() {
    let client = client(4, Some(4));
    // 10_000 orders over 100 customers, only even customers exist
    let orders = table(
        "orders",
        10_000,
        &[("id", |i| i), ("customer", |i| i % 100)],
    );
    let customers = table(
        "customers",
        50,
        &[("customer_id", |i| i * 2), ("region", |i| i % 5)],
    );
    let join = PhysicalHashJoin::try_new(
        PhysicalTableScan::new(orders),
        PhysicalTableScan::new(customers),
        1,
        0,
    )
    .unwrap();
    // orders per region: columns are id, customer, customer_id, region
    let plan = PhysicalHashAggregate::try_new(
        join,
        3,
        vec![AggregateExpression::count_star("orders")],
    )
    .unwrap();

    let result = client.query(plan).await.unwrap();
    assert_eq!(vec![0, 1, 2, 3, 4], int64_column(result.collection(), 0));
    assert_eq!(vec![1000; 5], int64_column(result.collection(), 1));
}

#[tokio::test]
async fn test_empty_join_still_counts() {
    let client = client(2, None);
    let probe = table("probe", 5000, &[("k", |i| i)]);
    let build = table("build", 0, &[("k", |i| i)]);
    let join = PhysicalHashJoin::try_new(
        PhysicalTableScan::new(probe),
        PhysicalTableScan::new(build),
        0,
        0,
    )
    .unwrap();
    let result = client.query(count_star(join)).await.unwrap();
    assert_eq!(vec![0], int64_column(result.collection(), 0));
}

#[tokio::test]
async fn test_interrupt_then_query_again() {
    let client = client(4, Some(4));
    let orders = table("orders", 100_000, &[("id", |i| i)]);

    let interrupting = client.clone();
    let filter = PhysicalFilter::new(
        PhysicalTableScan::new(orders.clone()),
        Arc::new(move |batch: &RecordBatch| -> Result<BooleanArray, ExecutorError> {
            interrupting.interrupt();
            Ok(BooleanArray::from(vec![true; batch.num_rows()]))
        }),
    );
    let err = client.query(count_star(filter)).await.unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::ExecutorError(ExecutorError::Interrupted)
    ));
    assert!(client.is_interrupted());

    // a new query starts uninterrupted
    let result = client
        .query(count_star(PhysicalTableScan::new(orders)))
        .await
        .unwrap();
    assert_eq!(vec![100_000], int64_column(result.collection(), 0));
}

#[tokio::test]
async fn test_operator_error_fails_query() {
    let client = client(4, Some(4));
    let orders = table("orders", 10_000, &[("id", |i| i)]);
    let filter = PhysicalFilter::new(
        PhysicalTableScan::new(orders),
        Arc::new(|_: &RecordBatch| -> Result<BooleanArray, ExecutorError> {
            Err(ExecutorError::OperatorError("bad predicate".to_string()))
        }),
    );
    let err = client.query(count_star(filter)).await.unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::ExecutorError(ExecutorError::OperatorError(ref msg)) if msg == "bad predicate"
    ));
}

#[tokio::test]
async fn test_query_after_shutdown_is_rejected() {
    let config = DatabaseConfigBuilder::default()
        .worker_threads(2)
        .build()
        .unwrap();
    let db = DatabaseInstance::new(config).unwrap();
    let client = ClientContext::new(db.clone());
    db.shutdown();

    let orders = table("orders", 10, &[("id", |i| i)]);
    let err = client
        .query(count_star(PhysicalTableScan::new(orders)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::ExecutorError(ExecutorError::SchedulerError(SchedulerError::Rejected(_)))
    ));
}
