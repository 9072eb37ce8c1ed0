use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::{path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use stockstream_ingestor::ObjectName;

use crate::{
    errors::{Result, WarehouseError},
    store::{create_json, get_json},
    warehouse::TableRef,
};

pub const LEDGER_DIR: &str = "_ledger";
pub const LEASE_NAME: &str = "_lease";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub object: String,
    pub job_id: String,
    /// `None` when the load was only discovered after the fact
    pub rows: Option<usize>,
    pub loaded_at: DateTime<Utc>,
}

/// One marker object per batch object already loaded into a table.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn ObjectStore>,
    dir: Path,
}

impl Ledger {
    pub fn new(store: Arc<dyn ObjectStore>, table: &TableRef) -> Self {
        Self {
            store,
            dir: Path::from(LEDGER_DIR).child(table.to_string()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lease_path(&self) -> Path {
        self.dir.child(LEASE_NAME)
    }

    fn marker(&self, object: &ObjectName) -> Path {
        self.dir.child(format!("{object}.json"))
    }

    pub async fn get(&self, object: &ObjectName) -> Result<Option<LedgerEntry>> {
        Ok(get_json(self.store.as_ref(), &self.marker(object))
            .await?
            .map(|(entry, _)| entry))
    }

    /// Markers are write-once, recording an object again keeps the first entry
    pub async fn record(&self, object: &ObjectName, entry: &LedgerEntry) -> Result<()> {
        match create_json(self.store.as_ref(), &self.marker(object), entry).await {
            Ok(_) => Ok(()),
            Err(WarehouseError::AlreadyExists(marker)) => {
                tracing::debug!("ledger already has {marker}");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let markers: Vec<_> = self
            .store
            .list(Some(&self.dir))
            .try_filter(|meta| futures::future::ready(meta.location.filename() != Some(LEASE_NAME)))
            .try_collect()
            .await?;

        let mut entries = Vec::with_capacity(markers.len());
        for meta in markers {
            if let Some((entry, _)) = get_json(self.store.as_ref(), &meta.location).await? {
                entries.push(entry);
            }
        }
        entries.sort_by(|a: &LedgerEntry, b| a.loaded_at.cmp(&b.loaded_at));
        Ok(entries)
    }
}
