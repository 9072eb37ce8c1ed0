use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use object_store::{path::Path, ObjectStore, PutMode, PutOptions, PutResult, UpdateVersion};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    errors::{Result, WarehouseError},
    store::{create_json, get_json},
};

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseRecord {
    holder: Uuid,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    fn fresh(holder: Uuid, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            holder,
            acquired_at: now,
            expires_at: now + to_chrono(ttl),
        }
    }
}

/// Exclusive claim on a ledger for a bounded time.
///
/// Taken with a create-only put. A lease whose holder let it expire is taken
/// over with a put conditioned on the version that was read.
#[derive(Debug)]
pub struct Lease {
    store: Arc<dyn ObjectStore>,
    path: Path,
    ttl: Duration,
    record: LeaseRecord,
    version: UpdateVersion,
}

impl Lease {
    pub async fn acquire(store: Arc<dyn ObjectStore>, path: Path, ttl: Duration) -> Result<Self> {
        let holder = Uuid::new_v4();

        // the lease can vanish between a failed create and the read that follows
        for _ in 0..3 {
            let record = LeaseRecord::fresh(holder, ttl);
            match create_json(store.as_ref(), &path, &record).await {
                Ok(put) => {
                    tracing::info!("acquired lease {path} as {holder}");
                    return Ok(Self::held(store, path, ttl, record, put));
                }
                Err(WarehouseError::AlreadyExists(_)) => {}
                Err(err) => return Err(err),
            }

            let Some((current, meta)) = get_json::<LeaseRecord>(store.as_ref(), &path).await? else {
                continue;
            };
            if current.expires_at > Utc::now() {
                return Err(WarehouseError::LeaseHeld {
                    ledger: path.to_string(),
                    holder: current.holder.to_string(),
                    expires_at: current.expires_at,
                });
            }

            tracing::warn!(
                "taking over lease {path} from {} which expired at {}",
                current.holder,
                current.expires_at
            );
            let expected = UpdateVersion {
                e_tag: meta.e_tag,
                version: meta.version,
            };
            match replace(store.as_ref(), &path, &record, expected).await {
                Ok(put) => return Ok(Self::held(store, path, ttl, record, put)),
                Err(WarehouseError::ObjectStore(object_store::Error::Precondition { .. })) => {
                    // somebody else took it over first
                    continue;
                }
                Err(err) => return Err(err),
            }
        }

        match get_json::<LeaseRecord>(store.as_ref(), &path).await? {
            Some((current, _)) => Err(WarehouseError::LeaseHeld {
                ledger: path.to_string(),
                holder: current.holder.to_string(),
                expires_at: current.expires_at,
            }),
            None => Err(WarehouseError::LeaseHeld {
                ledger: path.to_string(),
                holder: "unknown".into(),
                expires_at: Utc::now(),
            }),
        }
    }

    fn held(
        store: Arc<dyn ObjectStore>,
        path: Path,
        ttl: Duration,
        record: LeaseRecord,
        put: PutResult,
    ) -> Self {
        Self {
            store,
            path,
            ttl,
            record,
            version: put.into(),
        }
    }

    pub fn holder(&self) -> Uuid {
        self.record.holder
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.record.expires_at
    }

    /// Extend the lease once less than half of its time is left
    pub async fn keep_alive(&mut self) -> Result<()> {
        if self.record.expires_at - Utc::now() > to_chrono(self.ttl / 2) {
            return Ok(());
        }

        let record = LeaseRecord::fresh(self.record.holder, self.ttl);
        let put = replace(self.store.as_ref(), &self.path, &record, self.version.clone())
            .await
            .map_err(|err| match err {
                WarehouseError::ObjectStore(object_store::Error::Precondition { .. }) => {
                    WarehouseError::LeaseHeld {
                        ledger: self.path.to_string(),
                        holder: "another loader".into(),
                        expires_at: self.record.expires_at,
                    }
                }
                err => err,
            })?;

        tracing::debug!("renewed lease {} until {}", self.path, record.expires_at);
        self.record = record;
        self.version = put.into();
        Ok(())
    }

    /// Delete the lease if we still hold it
    pub async fn release(self) -> Result<()> {
        match get_json::<LeaseRecord>(self.store.as_ref(), &self.path).await? {
            Some((current, _)) if current.holder == self.record.holder => {
                self.store.delete(&self.path).await?;
                tracing::info!("released lease {}", self.path);
            }
            Some((current, _)) => {
                tracing::warn!("lease {} was taken over by {}", self.path, current.holder)
            }
            None => tracing::warn!("lease {} vanished before release", self.path),
        }
        Ok(())
    }
}

fn to_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365))
}

async fn replace(
    store: &dyn ObjectStore,
    path: &Path,
    record: &LeaseRecord,
    expected: UpdateVersion,
) -> Result<PutResult> {
    let body = serde_json::to_vec_pretty(record)?;
    let opts = PutOptions {
        mode: PutMode::Update(expected),
        ..Default::default()
    };

    match store.put_opts(path, body.clone().into(), opts).await {
        // the local filesystem has no conditional updates
        Err(object_store::Error::NotImplemented) => {
            tracing::warn!("{path}: store cannot update conditionally, overwriting");
            Ok(store.put(path, body.into()).await?)
        }
        result => Ok(result?),
    }
}
