use std::fmt::Debug;

use thiserror::Error;
use tokio::task::JoinError;

#[derive(Error, Debug)]
pub enum IngestorError {
    #[error("Data Access Error reading {location}: {reason}")]
    DataAccess { location: String, reason: String },

    #[error("Csv Error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Broker Connection Error: {0}")]
    BrokerConnection(String),

    #[error("Broker Publish Error on topic {topic}: {reason}")]
    BrokerPublish { topic: String, reason: String },

    #[error("Broker Ack Error: {0}")]
    BrokerAck(String),

    #[error("Object Store Error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid Config: {0}")]
    InvalidConfig(String),

    #[error("No free batch object name after {attempts} attempts, last tried {last}")]
    NameCollision { attempts: usize, last: String },

    #[error("Pipeline Closed")]
    PipelineClosed,

    #[error("Flush Task Died: {0}")]
    TaskJoin(#[from] JoinError),
}

impl IngestorError {
    /// Network hiccups and throttling, worth another attempt with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ObjectStore(err) => is_transient_store_error(err),
            Self::BrokerConnection(_) | Self::BrokerAck(_) => true,
            _ => false,
        }
    }
}

pub fn is_transient_store_error(err: &object_store::Error) -> bool {
    matches!(err, object_store::Error::Generic { .. })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_treats_generic_store_errors_as_transient() {
        let err = IngestorError::from(object_store::Error::Generic {
            store: "GCS",
            source: "connection reset".into(),
        });
        assert!(err.is_transient());

        let err = IngestorError::from(object_store::Error::NotFound {
            path: "stock-data-20250601-120000-1.ndjson".into(),
            source: "gone".into(),
        });
        assert!(!err.is_transient());

        let err = IngestorError::BrokerPublish {
            topic: "stock-data".into(),
            reason: "message too large".into(),
        };
        assert!(!err.is_transient());
    }
}
