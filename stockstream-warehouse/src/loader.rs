use std::{sync::Arc, time::Duration};

use chrono::Utc;
use object_store::ObjectStore;
use serde::Deserialize;
use stockstream_ingestor::{pipeline::DEFAULT_BATCH_PREFIX, ObjectName, RetryPolicy};

use crate::{
    errors::{Result, WarehouseError},
    lease::{Lease, DEFAULT_LEASE_TTL},
    ledger::{Ledger, LedgerEntry},
    schema::stock_table_schema,
    warehouse::{
        DatasetInfo, LoadJob, LoadJobConfig, TableInfo, TableRef, Warehouse, WriteDisposition,
    },
};

pub const DEFAULT_DATASET: &str = "stock_data_analytics";
pub const DEFAULT_TABLE: &str = "stock_stream_table";
pub const DEFAULT_LOCATION: &str = "US";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderProps {
    pub dataset: String,
    pub table: String,
    pub location: String,
    /// Batch object name prefix to pick up
    pub prefix: String,
    pub write_disposition: WriteDisposition,
    #[serde(rename = "lease_ttl_secs", with = "secs")]
    pub lease_ttl: Duration,
}

impl Default for LoaderProps {
    fn default() -> Self {
        Self {
            dataset: DEFAULT_DATASET.into(),
            table: DEFAULT_TABLE.into(),
            location: DEFAULT_LOCATION.into(),
            prefix: DEFAULT_BATCH_PREFIX.into(),
            write_disposition: WriteDisposition::Append,
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }
}

impl LoaderProps {
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.dataset, &self.table)
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug)]
pub enum LoadOutcome {
    Loaded { rows: usize },
    AlreadyLoaded,
    Failed(WarehouseError),
}

#[derive(Debug)]
pub struct ObjectLoad {
    pub object: ObjectName,
    pub outcome: LoadOutcome,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub dataset_created: bool,
    pub table_created: bool,
    /// One entry per discovered object, in name order
    pub loads: Vec<ObjectLoad>,
    /// Objects the ledger holds once the run is over
    pub ledger_entries: usize,
}

impl LoadReport {
    pub fn loaded(&self) -> usize {
        self.count(|outcome| matches!(outcome, LoadOutcome::Loaded { .. }))
    }

    pub fn already_loaded(&self) -> usize {
        self.count(|outcome| matches!(outcome, LoadOutcome::AlreadyLoaded))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&ObjectName, &WarehouseError)> {
        self.loads.iter().filter_map(|load| match &load.outcome {
            LoadOutcome::Failed(err) => Some((&load.object, err)),
            _ => None,
        })
    }

    pub fn rows_loaded(&self) -> usize {
        self.loads
            .iter()
            .map(|load| match load.outcome {
                LoadOutcome::Loaded { rows } => rows,
                _ => 0,
            })
            .sum()
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    fn count(&self, pred: impl Fn(&LoadOutcome) -> bool) -> usize {
        self.loads.iter().filter(|load| pred(&load.outcome)).count()
    }
}

/// Job ids allow letters, digits, dashes and underscores
pub fn job_id(table: &TableRef, object: &ObjectName) -> String {
    format!("load_{}_{}_{}", table.dataset, table.table, object.stem())
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Loads every batch object in a bucket into one warehouse table, once.
pub struct WarehouseLoader<W> {
    warehouse: W,
    bucket: Arc<dyn ObjectStore>,
    props: LoaderProps,
    retry: RetryPolicy,
}

impl<W: Warehouse> WarehouseLoader<W> {
    pub fn new(warehouse: W, bucket: Arc<dyn ObjectStore>, props: LoaderProps) -> Self {
        Self {
            warehouse,
            bucket,
            props,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    pub fn ledger(&self) -> Ledger {
        Ledger::new(self.bucket.clone(), &self.props.table_ref())
    }

    /// `true` when the dataset had to be created
    pub async fn ensure_dataset(&self) -> Result<bool> {
        let name = &self.props.dataset;
        self.retry
            .retry(&format!("ensure dataset {name}"), WarehouseError::is_transient, || {
                self.try_ensure_dataset()
            })
            .await
            .map_err(|err| ensure_error("dataset", name, err))
    }

    async fn try_ensure_dataset(&self) -> Result<bool> {
        let name = &self.props.dataset;
        if let Some(existing) = self.warehouse.get_dataset(name).await? {
            if existing.location != self.props.location {
                tracing::warn!(
                    "dataset {name} lives in {}, not {}",
                    existing.location,
                    self.props.location
                );
            }
            return Ok(false);
        }

        let dataset = DatasetInfo {
            name: name.clone(),
            location: self.props.location.clone(),
            created_at: Utc::now(),
        };
        match self.warehouse.create_dataset(&dataset).await {
            Ok(()) => Ok(true),
            // lost a race with another loader
            Err(WarehouseError::AlreadyExists(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// `true` when the table had to be created. An existing table is never altered.
    pub async fn ensure_table(&self) -> Result<bool> {
        let table = self.props.table_ref();
        self.retry
            .retry(&format!("ensure table {table}"), WarehouseError::is_transient, || {
                self.try_ensure_table(&table)
            })
            .await
            .map_err(|err| ensure_error("table", &table.to_string(), err))
    }

    async fn try_ensure_table(&self, table: &TableRef) -> Result<bool> {
        let schema = stock_table_schema();
        if let Some(existing) = self.warehouse.get_table(table).await? {
            if existing.schema != schema {
                tracing::warn!(
                    "table {table} has a different schema, leaving it as is: {:?}",
                    existing.schema
                );
            }
            return Ok(false);
        }

        let info = TableInfo {
            table: table.clone(),
            schema,
            created_at: Utc::now(),
        };
        match self.warehouse.create_table(&info).await {
            Ok(()) => Ok(true),
            Err(WarehouseError::AlreadyExists(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Batch objects at the top of the bucket, ordered by (timestamp, counter)
    pub async fn discover_objects(&self) -> Result<Vec<ObjectName>> {
        let listing = self
            .retry
            .retry("list batch objects", WarehouseError::is_transient, || async {
                self.bucket
                    .list_with_delimiter(None)
                    .await
                    .map_err(WarehouseError::from)
            })
            .await?;

        let mut objects: Vec<_> = listing
            .objects
            .iter()
            .filter_map(|meta| {
                let name = ObjectName::parse(&self.props.prefix, meta.location.as_ref());
                if name.is_none() {
                    tracing::debug!("skipping {}", meta.location);
                }
                name
            })
            .collect();
        objects.sort();
        Ok(objects)
    }

    /// Never fails: the error of a failed load is its outcome
    pub async fn load_object(&self, object: &ObjectName, ledger: &Ledger) -> LoadOutcome {
        match self.try_load_object(object, ledger).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!("loading {object} failed: {err}");
                LoadOutcome::Failed(err)
            }
        }
    }

    async fn try_load_object(&self, object: &ObjectName, ledger: &Ledger) -> Result<LoadOutcome> {
        if ledger.get(object).await?.is_some() {
            tracing::info!("{object} already loaded, skipping");
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        let job = LoadJob {
            job_id: job_id(&self.props.table_ref(), object),
            source: object.path(),
            table: self.props.table_ref(),
            config: LoadJobConfig {
                write_disposition: self.props.write_disposition,
            },
        };
        let loaded = self
            .retry
            .retry(&format!("load job {}", job.job_id), WarehouseError::is_transient, || {
                self.warehouse.load_ndjson(&job)
            })
            .await;

        let (outcome, rows) = match loaded {
            Ok(result) => {
                tracing::info!("loaded {} rows from {object} into {}", result.rows_loaded, job.table);
                let rows = result.rows_loaded;
                (LoadOutcome::Loaded { rows }, Some(rows))
            }
            // an earlier run loaded it but never got to write the ledger
            Err(WarehouseError::DuplicateJob(_)) => {
                tracing::warn!("{object} was loaded by job {} before, recording it", job.job_id);
                (LoadOutcome::AlreadyLoaded, None)
            }
            Err(err) => return Err(err),
        };

        let entry = LedgerEntry {
            object: object.to_string(),
            job_id: job.job_id,
            rows,
            loaded_at: Utc::now(),
        };
        self.retry
            .retry(&format!("ledger entry for {object}"), WarehouseError::is_transient, || {
                ledger.record(object, &entry)
            })
            .await?;
        Ok(outcome)
    }

    /// Ensure dataset and table, then load every object not yet in the ledger
    /// while holding the ledger lease.
    pub async fn run(&self) -> Result<LoadReport> {
        let mut report = LoadReport {
            dataset_created: self.ensure_dataset().await?,
            table_created: self.ensure_table().await?,
            ..Default::default()
        };

        let ledger = self.ledger();
        let mut lease = Lease::acquire(self.bucket.clone(), ledger.lease_path(), self.props.lease_ttl).await?;

        let loaded = self.load_all(&ledger, &mut lease, &mut report).await;
        match ledger.entries().await {
            Ok(entries) => report.ledger_entries = entries.len(),
            Err(err) => tracing::warn!("could not read ledger {}: {err}", ledger.dir()),
        }
        if let Err(err) = lease.release().await {
            tracing::warn!("could not release lease: {err}");
        }
        loaded?;

        tracing::info!(
            "{} objects loaded ({} rows), {} already loaded, {} failed, {} in the ledger",
            report.loaded(),
            report.rows_loaded(),
            report.already_loaded(),
            report.failed().count(),
            report.ledger_entries
        );
        Ok(report)
    }

    async fn load_all(&self, ledger: &Ledger, lease: &mut Lease, report: &mut LoadReport) -> Result<()> {
        for object in self.discover_objects().await? {
            lease.keep_alive().await?;
            let outcome = self.load_object(&object, ledger).await;
            report.loads.push(ObjectLoad { object, outcome });
        }
        Ok(())
    }
}

fn ensure_error(kind: &'static str, name: &str, err: WarehouseError) -> WarehouseError {
    match err {
        err @ WarehouseError::SchemaEnsure { .. } => err,
        err => WarehouseError::SchemaEnsure {
            kind,
            name: name.to_owned(),
            reason: err.to_string(),
        },
    }
}
