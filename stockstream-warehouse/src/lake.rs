use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::ArrowError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use object_store::{path::Path, ObjectStore, PutMode};
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    file::properties::WriterProperties,
};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{Result, WarehouseError},
    ndjson,
    store::{create_json, get_json},
    warehouse::{
        DatasetInfo, LoadJob, LoadJobResult, TableInfo, TableRef, Warehouse, WriteDisposition,
    },
};

const DATASET_META: &str = "_dataset.json";
const TABLE_META: &str = "_table.json";
const DATA_DIR: &str = "data";
const JOBS_DIR: &str = "_jobs";

#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    job_id: String,
    source: String,
    rows_loaded: usize,
    finished_at: chrono::DateTime<Utc>,
}

/// Tables kept as Parquet parts in an object store.
///
/// ```text
/// <root>/<dataset>/_dataset.json
/// <root>/<dataset>/<table>/_table.json
/// <root>/<dataset>/<table>/data/part-<job_id>.parquet
/// <root>/<dataset>/<table>/_jobs/<job_id>.json
/// ```
///
/// Every load job writes exactly one part, named after the job id and
/// written create-only, so a job id can never add rows twice.
#[derive(Clone)]
pub struct LakeWarehouse {
    store: Arc<dyn ObjectStore>,
    root: Path,
    sources: Arc<dyn ObjectStore>,
}

impl LakeWarehouse {
    /// Load job sources are read from the same store unless `with_sources` says otherwise
    pub fn new(store: Arc<dyn ObjectStore>, root: Path) -> Self {
        Self {
            sources: store.clone(),
            store,
            root,
        }
    }

    pub fn with_sources(mut self, sources: Arc<dyn ObjectStore>) -> Self {
        self.sources = sources;
        self
    }

    fn dataset_dir(&self, dataset: &str) -> Path {
        self.root.child(dataset)
    }

    fn table_dir(&self, table: &TableRef) -> Path {
        self.dataset_dir(&table.dataset).child(table.table.as_str())
    }

    fn part_path(&self, table: &TableRef, job_id: &str) -> Path {
        self.table_dir(table)
            .child(DATA_DIR)
            .child(format!("part-{job_id}.parquet"))
    }

    fn job_path(&self, table: &TableRef, job_id: &str) -> Path {
        self.table_dir(table)
            .child(JOBS_DIR)
            .child(format!("{job_id}.json"))
    }

    async fn parts(&self, table: &TableRef) -> Result<Vec<Path>> {
        let prefix = self.table_dir(table).child(DATA_DIR);
        let mut parts: Vec<_> = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await?;
        parts.sort();
        Ok(parts)
    }

    async fn read_part(&self, part: &Path) -> Result<ParquetRecordBatchReaderBuilder<Bytes>> {
        let body = self.store.get(part).await?.bytes().await?;
        Ok(ParquetRecordBatchReaderBuilder::try_new(body)?)
    }

    async fn job_ran(&self, table: &TableRef, job_id: &str) -> Result<bool> {
        match self.store.head(&self.job_path(table, job_id)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

fn encode_part(batch: &RecordBatch) -> Result<Bytes> {
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(Vec::new(), batch.schema(), Some(props))?;
    writer.write(batch)?;
    Ok(writer.into_inner()?.into())
}

#[async_trait]
impl Warehouse for LakeWarehouse {
    async fn get_dataset(&self, dataset: &str) -> Result<Option<DatasetInfo>> {
        let meta = self.dataset_dir(dataset).child(DATASET_META);
        Ok(get_json(self.store.as_ref(), &meta).await?.map(|(info, _)| info))
    }

    async fn create_dataset(&self, dataset: &DatasetInfo) -> Result<()> {
        let meta = self.dataset_dir(&dataset.name).child(DATASET_META);
        create_json(self.store.as_ref(), &meta, dataset).await?;
        tracing::info!("created dataset {} in {}", dataset.name, dataset.location);
        Ok(())
    }

    async fn get_table(&self, table: &TableRef) -> Result<Option<TableInfo>> {
        let meta = self.table_dir(table).child(TABLE_META);
        Ok(get_json(self.store.as_ref(), &meta).await?.map(|(info, _)| info))
    }

    async fn create_table(&self, table: &TableInfo) -> Result<()> {
        if self.get_dataset(&table.table.dataset).await?.is_none() {
            return Err(WarehouseError::SchemaEnsure {
                kind: "table",
                name: table.table.to_string(),
                reason: format!("dataset {} does not exist", table.table.dataset),
            });
        }

        let meta = self.table_dir(&table.table).child(TABLE_META);
        create_json(self.store.as_ref(), &meta, table).await?;
        tracing::info!("created table {}", table.table);
        Ok(())
    }

    async fn load_ndjson(&self, job: &LoadJob) -> Result<LoadJobResult> {
        let Some(info) = self.get_table(&job.table).await? else {
            return Err(WarehouseError::WarehouseJob {
                job_id: job.job_id.clone(),
                reason: format!("table {} does not exist", job.table),
            });
        };
        if self.job_ran(&job.table, &job.job_id).await? {
            return Err(WarehouseError::DuplicateJob(job.job_id.clone()));
        }

        let body = self.sources.get(&job.source).await?.bytes().await?;
        let batch = ndjson::decode(job.source.as_ref(), &body, &info.schema)?;

        let existing = self.parts(&job.table).await?;
        if job.config.write_disposition == WriteDisposition::Empty
            && self.row_count(&job.table).await? > 0
        {
            return Err(WarehouseError::WarehouseJob {
                job_id: job.job_id.clone(),
                reason: format!("table {} is not empty", job.table),
            });
        }

        let part = self.part_path(&job.table, &job.job_id);
        let written = self
            .store
            .put_opts(&part, encode_part(&batch)?.into(), PutMode::Create.into())
            .await;
        match written {
            Err(object_store::Error::AlreadyExists { .. }) => {
                return Err(WarehouseError::DuplicateJob(job.job_id.clone()));
            }
            written => {
                written?;
            }
        }

        let record = JobRecord {
            job_id: job.job_id.clone(),
            source: job.source.to_string(),
            rows_loaded: batch.num_rows(),
            finished_at: Utc::now(),
        };
        match create_json(self.store.as_ref(), &self.job_path(&job.table, &job.job_id), &record)
            .await
        {
            Ok(_) | Err(WarehouseError::AlreadyExists(_)) => {}
            Err(err) => return Err(err),
        }

        if job.config.write_disposition == WriteDisposition::Truncate {
            for old in existing.iter().filter(|old| **old != part) {
                self.store.delete(old).await?;
            }
        }

        tracing::info!(
            "job {} loaded {} rows from {} into {}",
            job.job_id,
            batch.num_rows(),
            job.source,
            job.table
        );
        Ok(LoadJobResult {
            job_id: job.job_id.clone(),
            rows_loaded: batch.num_rows(),
        })
    }

    async fn row_count(&self, table: &TableRef) -> Result<usize> {
        let mut rows = 0;
        for part in self.parts(table).await? {
            let reader = self.read_part(&part).await?;
            rows += reader.metadata().file_metadata().num_rows() as usize;
        }
        Ok(rows)
    }

    async fn read_table(&self, table: &TableRef) -> Result<Vec<RecordBatch>> {
        let mut batches = vec![];
        for part in self.parts(table).await? {
            let reader = self.read_part(&part).await?.build()?;
            batches.extend(reader.collect::<core::result::Result<Vec<_>, ArrowError>>()?);
        }
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use object_store::{local::LocalFileSystem, memory::InMemory, PutPayload};
    use tempfile::tempdir;

    use super::*;
    use crate::{schema::stock_table_schema, warehouse::LoadJobConfig};

    const ROWS: &str = concat!(
        r#"{"Index":"HSI","Date":"1986-12-31","Close":2568.3}"#,
        "\n",
        r#"{"Index":"HSI","Date":"1987-01-02","Close":2540.1}"#,
    );

    fn table() -> TableRef {
        TableRef::new("stock_data_analytics", "stock_stream_table")
    }

    async fn warehouse_with_table(store: Arc<dyn ObjectStore>) -> anyhow::Result<LakeWarehouse> {
        let warehouse = LakeWarehouse::new(store, Path::from("warehouse"));
        warehouse
            .create_dataset(&DatasetInfo {
                name: "stock_data_analytics".into(),
                location: "US".into(),
                created_at: Utc::now(),
            })
            .await?;
        warehouse
            .create_table(&TableInfo {
                table: table(),
                schema: stock_table_schema(),
                created_at: Utc::now(),
            })
            .await?;
        Ok(warehouse)
    }

    fn job(job_id: &str, source: &str, write_disposition: WriteDisposition) -> LoadJob {
        LoadJob {
            job_id: job_id.into(),
            source: Path::from(source),
            table: table(),
            config: LoadJobConfig { write_disposition },
        }
    }

    #[tokio::test]
    async fn it_refuses_to_create_twice() -> anyhow::Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let warehouse = warehouse_with_table(store).await?;

        let again = warehouse
            .create_dataset(&DatasetInfo {
                name: "stock_data_analytics".into(),
                location: "EU".into(),
                created_at: Utc::now(),
            })
            .await;
        assert!(matches!(again, Err(WarehouseError::AlreadyExists(_))));
        assert_eq!(
            "US",
            warehouse
                .get_dataset("stock_data_analytics")
                .await?
                .unwrap()
                .location
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_needs_a_dataset_before_a_table() -> anyhow::Result<()> {
        let warehouse = LakeWarehouse::new(Arc::new(InMemory::new()), Path::default());
        let created = warehouse
            .create_table(&TableInfo {
                table: table(),
                schema: stock_table_schema(),
                created_at: Utc::now(),
            })
            .await;
        assert!(matches!(created, Err(WarehouseError::SchemaEnsure { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn it_appends_one_part_per_job() -> anyhow::Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        store.put(&Path::from("a.ndjson"), PutPayload::from_static(ROWS.as_bytes())).await?;
        store.put(&Path::from("b.ndjson"), PutPayload::from_static(ROWS.as_bytes())).await?;
        let warehouse = warehouse_with_table(store).await?;

        let loaded = warehouse.load_ndjson(&job("load_a", "a.ndjson", WriteDisposition::Append)).await?;
        assert_eq!(2, loaded.rows_loaded);
        warehouse.load_ndjson(&job("load_b", "b.ndjson", WriteDisposition::Append)).await?;

        assert_eq!(4, warehouse.row_count(&table()).await?);
        let batches = warehouse.read_table(&table()).await?;
        assert_eq!(4, batches.iter().map(RecordBatch::num_rows).sum::<usize>());
        let names: Vec<_> = batches[0].schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(stock_table_schema().columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>(), names);
        Ok(())
    }

    #[tokio::test]
    async fn it_rejects_a_job_id_it_already_ran() -> anyhow::Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        store.put(&Path::from("a.ndjson"), PutPayload::from_static(ROWS.as_bytes())).await?;
        let warehouse = warehouse_with_table(store).await?;

        warehouse.load_ndjson(&job("load_a", "a.ndjson", WriteDisposition::Append)).await?;
        let again = warehouse.load_ndjson(&job("load_a", "a.ndjson", WriteDisposition::Append)).await;

        assert!(matches!(again, Err(WarehouseError::DuplicateJob(_))));
        assert_eq!(2, warehouse.row_count(&table()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn it_honors_write_dispositions() -> anyhow::Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        store.put(&Path::from("a.ndjson"), PutPayload::from_static(ROWS.as_bytes())).await?;
        store.put(&Path::from("b.ndjson"), PutPayload::from_static(b"{\"Index\":\"NYA\"}")).await?;
        let warehouse = warehouse_with_table(store).await?;

        warehouse.load_ndjson(&job("load_a", "a.ndjson", WriteDisposition::Empty)).await?;
        let refused = warehouse.load_ndjson(&job("load_b", "b.ndjson", WriteDisposition::Empty)).await;
        assert!(matches!(refused, Err(WarehouseError::WarehouseJob { .. })));

        warehouse.load_ndjson(&job("load_b", "b.ndjson", WriteDisposition::Truncate)).await?;
        assert_eq!(1, warehouse.row_count(&table()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn it_loads_nothing_from_a_bad_object() -> anyhow::Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        store.put(&Path::from("bad.ndjson"), PutPayload::from_static(b"{\"Index\":\"HSI\"}\n{oops")).await?;
        let warehouse = warehouse_with_table(store).await?;

        let failed = warehouse.load_ndjson(&job("load_bad", "bad.ndjson", WriteDisposition::Append)).await;
        assert!(matches!(failed, Err(WarehouseError::MalformedData { line: 2, .. })));
        assert_eq!(0, warehouse.row_count(&table()).await?);

        // a failed job does not use up its id
        let store = warehouse.sources.clone();
        store.put(&Path::from("bad.ndjson"), PutPayload::from_static(b"{\"Index\":\"HSI\"}")).await?;
        warehouse.load_ndjson(&job("load_bad", "bad.ndjson", WriteDisposition::Append)).await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn it_keeps_tables_on_disk() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let store: Arc<dyn ObjectStore> = Arc::new(LocalFileSystem::new_with_prefix(temp_dir.path())?);
        store.put(&Path::from("a.ndjson"), PutPayload::from_static(ROWS.as_bytes())).await?;
        let warehouse = warehouse_with_table(store).await?;

        warehouse.load_ndjson(&job("load_a", "a.ndjson", WriteDisposition::Append)).await?;

        let part = temp_dir
            .path()
            .join("warehouse/stock_data_analytics/stock_stream_table/data/part-load_a.parquet");
        assert!(part.exists());
        assert!(temp_dir
            .path()
            .join("warehouse/stock_data_analytics/_dataset.json")
            .exists());
        Ok(())
    }
}
