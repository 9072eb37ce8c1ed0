mod buffers;
mod naming;
mod store_sink;

pub use buffers::{Batch, BatchObject};
pub use naming::{ObjectName, ObjectNamer, BATCH_CONTENT_TYPE, BATCH_SUFFIX, DEFAULT_BATCH_PREFIX};
pub use store_sink::{StoreSink, WriteOutcome};
