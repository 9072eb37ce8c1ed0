pub mod batcher;
pub mod broker;
pub mod consumer;
pub mod errors;
pub mod pipeline;
pub mod publisher;
pub mod record;
pub mod retry;
pub mod sampler;
pub mod source;
#[cfg(test)]
pub(crate) mod test_util;

pub use batcher::Batcher;
pub use consumer::{AckMode, BatchingConsumer, ConsumerProps, ConsumerReport, ConsumerState};
pub use pipeline::{Batch, BatchObject, ObjectName, ObjectNamer, StoreSink};
pub use publisher::{PublishReport, Publisher};
pub use record::StockRecord;
pub use retry::RetryPolicy;
pub use sampler::Sampler;

pub type Result<T> = core::result::Result<T, errors::IngestorError>;
