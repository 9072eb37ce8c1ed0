use stockstream_ingestor::errors::IngestorError;
use stockstream_warehouse::WarehouseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StockstreamError {
    #[error("Invalid Config: {0}")]
    InvalidConfig(String),

    #[error("Config Parse Error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object Store Error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error(transparent)]
    Ingestor(#[from] IngestorError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("Pipeline Task Died: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

pub type Result<T> = core::result::Result<T, StockstreamError>;
