use object_store::memory::InMemory;
use stockstream::pipeline::{load, loader};
use stockstream_warehouse::{stock_table_schema, LoadOutcome, Warehouse, WarehouseError};

use crate::{put_batch_object, put_quote_batch, quotes, shared, test_config};

#[tokio::test]
async fn it_creates_the_table_and_loads_every_object() -> anyhow::Result<()> {
    let config = test_config();
    let bucket = shared(InMemory::new());
    let all = quotes(12);
    put_quote_batch(bucket.as_ref(), 1, &all[..3]).await?;
    put_quote_batch(bucket.as_ref(), 2, &all[3..7]).await?;
    put_quote_batch(bucket.as_ref(), 3, &all[7..]).await?;

    let report = load(&config, bucket.clone()).await?;

    assert!(report.dataset_created);
    assert!(report.table_created);
    assert_eq!(3, report.loaded());
    assert_eq!(12, report.rows_loaded());
    assert!(report.is_success());

    let loader = loader(&config, bucket.clone());
    let table_ref = config.warehouse.loader.table_ref();
    let table = loader
        .warehouse()
        .get_table(&table_ref)
        .await?
        .ok_or_else(|| anyhow::anyhow!("table was not created"))?;
    assert_eq!(stock_table_schema(), table.schema);
    assert_eq!(12, loader.warehouse().row_count(&table_ref).await?);
    Ok(())
}

#[tokio::test]
async fn it_reports_a_bad_object_and_loads_the_rest() -> anyhow::Result<()> {
    let config = test_config();
    let bucket = shared(InMemory::new());
    let all = quotes(6);
    put_quote_batch(bucket.as_ref(), 1, &all[..2]).await?;
    let bad = put_batch_object(bucket.as_ref(), 2, "{\"Index\": \"HSI\"\nnot json at all").await?;
    put_quote_batch(bucket.as_ref(), 3, &all[2..4]).await?;
    put_quote_batch(bucket.as_ref(), 4, &all[4..]).await?;

    let report = load(&config, bucket.clone()).await?;

    assert_eq!(3, report.loaded());
    assert_eq!(6, report.rows_loaded());
    let failed: Vec<_> = report.failed().collect();
    assert_eq!(1, failed.len());
    assert_eq!(&bad, failed[0].0);
    assert!(matches!(failed[0].1, WarehouseError::MalformedData { .. }));
    assert!(!report.is_success());

    // a second run only retries the object that failed
    let again = load(&config, bucket.clone()).await?;
    assert!(!again.dataset_created);
    assert!(!again.table_created);
    assert_eq!(3, again.already_loaded());
    assert_eq!(1, again.failed().count());
    assert_eq!(3, again.ledger_entries);
    let table_ref = config.warehouse.loader.table_ref();
    assert_eq!(6, loader(&config, bucket).warehouse().row_count(&table_ref).await?);
    Ok(())
}

#[tokio::test]
async fn it_rejects_rows_that_do_not_fit_the_table() -> anyhow::Result<()> {
    let config = test_config();
    let bucket = shared(InMemory::new());
    let odd = put_batch_object(bucket.as_ref(), 1, r#"{"Index":"HSI","Ticker":"^HSI"}"#).await?;

    let report = load(&config, bucket).await?;

    assert_eq!(1, report.loads.len());
    assert_eq!(odd, report.loads[0].object);
    assert!(matches!(
        report.loads[0].outcome,
        LoadOutcome::Failed(WarehouseError::SchemaMismatch { .. })
    ));
    Ok(())
}
