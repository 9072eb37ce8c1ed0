use std::fmt;

use arrow_array::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use object_store::path::Path;
use serde::{Deserialize, Serialize};

use crate::{errors::Result, schema::TableSchema};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub table: TableRef,
    pub schema: TableSchema,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteDisposition {
    #[default]
    Append,
    /// Replace every row in the table
    Truncate,
    /// Only load into a table that has no rows yet
    Empty,
}

/// Value types are always detected from the data and checked against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadJobConfig {
    pub write_disposition: WriteDisposition,
}

/// Copy one newline-delimited JSON object into a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJob {
    /// Running a job id a second time fails with `DuplicateJob`
    pub job_id: String,
    pub source: Path,
    pub table: TableRef,
    pub config: LoadJobConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadJobResult {
    pub job_id: String,
    pub rows_loaded: usize,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn get_dataset(&self, dataset: &str) -> Result<Option<DatasetInfo>>;

    /// Fails with `AlreadyExists` when the dataset is already there
    async fn create_dataset(&self, dataset: &DatasetInfo) -> Result<()>;

    async fn get_table(&self, table: &TableRef) -> Result<Option<TableInfo>>;

    /// Fails with `AlreadyExists` when the table is already there
    async fn create_table(&self, table: &TableInfo) -> Result<()>;

    /// Run a load job to completion
    async fn load_ndjson(&self, job: &LoadJob) -> Result<LoadJobResult>;

    async fn row_count(&self, table: &TableRef) -> Result<usize>;

    async fn read_table(&self, table: &TableRef) -> Result<Vec<RecordBatch>>;
}
