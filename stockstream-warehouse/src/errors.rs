use arrow_schema::ArrowError;
use chrono::{DateTime, Utc};
use parquet::errors::ParquetError;
use stockstream_ingestor::errors::{is_transient_store_error, IngestorError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("Could not ensure {kind} {name}: {reason}")]
    SchemaEnsure {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("Load job {job_id} failed: {reason}")]
    WarehouseJob { job_id: String, reason: String },

    #[error("Schema mismatch loading {object}: {reason}")]
    SchemaMismatch { object: String, reason: String },

    #[error("Malformed data in {object} at line {line}: {reason}")]
    MalformedData {
        object: String,
        line: usize,
        reason: String,
    },

    #[error("Load job {0} already ran")]
    DuplicateJob(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("Lease on {ledger} held by {holder} until {expires_at}")]
    LeaseHeld {
        ledger: String,
        holder: String,
        expires_at: DateTime<Utc>,
    },

    #[error("Object Store Error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Arrow Error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet Error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Ingestor(#[from] IngestorError),
}

impl WarehouseError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ObjectStore(err) => is_transient_store_error(err),
            Self::Ingestor(err) => err.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = core::result::Result<T, WarehouseError>;
