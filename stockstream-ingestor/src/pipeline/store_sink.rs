use std::sync::Arc;

use object_store::{
    path::Path, Attribute, Attributes, ObjectStore, PutMode, PutOptions, PutPayload,
};

use super::{BatchObject, BATCH_CONTENT_TYPE};
use crate::{errors::IngestorError, retry::RetryPolicy, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(Path),
    /// Something else already lives under this name; pick another one
    NameTaken(Path),
}

/// Writes batch objects create-only, so an existing object is never replaced.
#[derive(Clone)]
pub struct StoreSink {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

impl StoreSink {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    pub async fn write(&self, object: &BatchObject) -> Result<WriteOutcome> {
        let path = object.name.path();
        let mut attempts = 0usize;
        let written = self
            .retry
            .retry(&format!("upload of {path}"), IngestorError::is_transient, || {
                attempts += 1;
                self.put_create(&path, PutPayload::from_bytes(object.body.clone()))
            })
            .await;

        match written {
            Ok(()) => Ok(WriteOutcome::Written(path)),
            Err(IngestorError::ObjectStore(object_store::Error::AlreadyExists { .. }))
                if attempts == 1 =>
            {
                Ok(WriteOutcome::NameTaken(path))
            }
            Err(IngestorError::ObjectStore(object_store::Error::AlreadyExists { .. })) => {
                // one of our earlier attempts may have landed before its response got lost
                let existing = self.store.get(&path).await?.bytes().await?;
                if existing == object.body {
                    Ok(WriteOutcome::Written(path))
                } else {
                    Ok(WriteOutcome::NameTaken(path))
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn put_create(&self, path: &Path, payload: PutPayload) -> Result<()> {
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, BATCH_CONTENT_TYPE.into());
        let opts = PutOptions {
            mode: PutMode::Create,
            attributes,
            ..Default::default()
        };

        match self.store.put_opts(path, payload.clone(), opts).await {
            // the local filesystem backend can't carry a content type
            Err(object_store::Error::NotImplemented) => {
                self.store
                    .put_opts(path, payload, PutMode::Create.into())
                    .await?;
            }
            result => {
                result?;
            }
        }
        Ok(())
    }
}
