//! Sample daily index quotes onto a topic, batch them into newline-delimited
//! JSON objects and load those objects into a warehouse table exactly once.

pub mod config;
pub mod errors;
pub mod pipeline;

pub use config::{Config, Overrides, StorageConfig};
pub use errors::{Result, StockstreamError};
pub use pipeline::RunReport;

// re-exports
pub use arrow_array;
pub use object_store;
pub use stockstream_ingestor as ingestor;
pub use stockstream_warehouse as warehouse;
