//! JSON documents kept in an object store next to the data they describe.

use object_store::{path::Path, ObjectMeta, ObjectStore, PutMode, PutResult};
use serde::{de::DeserializeOwned, Serialize};

use crate::errors::{Result, WarehouseError};

/// Write `value` only if nothing lives at `path` yet
pub(crate) async fn create_json<T: Serialize>(
    store: &dyn ObjectStore,
    path: &Path,
    value: &T,
) -> Result<PutResult> {
    let body = serde_json::to_vec_pretty(value)?;
    match store.put_opts(path, body.into(), PutMode::Create.into()).await {
        Err(object_store::Error::AlreadyExists { .. }) => {
            Err(WarehouseError::AlreadyExists(path.to_string()))
        }
        result => Ok(result?),
    }
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    path: &Path,
) -> Result<Option<(T, ObjectMeta)>> {
    let found = match store.get(path).await {
        Ok(found) => found,
        Err(object_store::Error::NotFound { .. }) => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let meta = found.meta.clone();
    let body = found.bytes().await?;
    Ok(Some((serde_json::from_slice(&body)?, meta)))
}
