use std::{
    path::{Path as FsPath, PathBuf},
    sync::Arc,
    time::Duration,
};

use object_store::{
    gcp::GoogleCloudStorageBuilder, local::LocalFileSystem, memory::InMemory, ObjectStore,
};
use serde::Deserialize;
use stockstream_ingestor::{
    pipeline::DEFAULT_BATCH_PREFIX,
    publisher::DEFAULT_PUBLISH_DELAY,
    sampler::{DEFAULT_SAMPLE_SIZE, DEFAULT_SEED},
    AckMode, ConsumerProps, RetryPolicy, Sampler,
};
use stockstream_warehouse::LoaderProps;

use crate::errors::{Result, StockstreamError};

pub const DEFAULT_CONFIG_FILE: &str = "stockstream.toml";

/// Everything a run needs, resolved once from `stockstream.toml` plus overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub broker: BrokerConfig,
    pub storage: StorageConfig,
    pub sampler: SamplerConfig,
    pub publisher: PublisherConfig,
    pub consumer: ConsumerConfig,
    pub warehouse: WarehouseConfig,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub bootstrap_servers: String,
    pub topic: String,
    pub group_id: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".into(),
            topic: "stock-data".into(),
            group_id: "stock-data-batchers".into(),
        }
    }
}

/// The bucket holding the source CSV, the batch objects and the ledger
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    Gcs {
        bucket: String,
        service_account_path: Option<PathBuf>,
    },
    Local {
        root: PathBuf,
    },
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local {
            root: PathBuf::from("data"),
        }
    }
}

impl StorageConfig {
    pub fn build(&self) -> Result<Arc<dyn ObjectStore>> {
        match self {
            Self::Gcs {
                bucket,
                service_account_path,
            } => {
                let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
                if let Some(path) = service_account_path {
                    builder = builder.with_service_account_path(path.to_string_lossy());
                }
                Ok(Arc::new(builder.build()?))
            }
            Self::Local { root } => {
                std::fs::create_dir_all(root)?;
                Ok(Arc::new(LocalFileSystem::new_with_prefix(root)?))
            }
            Self::Memory => Ok(Arc::new(InMemory::new())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// CSV object in the bucket
    pub source: String,
    pub target: usize,
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            source: "Stock_data.csv".into(),
            target: DEFAULT_SAMPLE_SIZE,
            seed: DEFAULT_SEED,
        }
    }
}

impl SamplerConfig {
    pub fn sampler(&self) -> Sampler {
        Sampler::new(self.target, self.seed)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_PUBLISH_DELAY.as_millis() as u64,
        }
    }
}

impl PublisherConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub threshold: usize,
    pub ack_mode: AckMode,
    pub max_in_flight: usize,
    pub prefix: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            ack_mode: AckMode::AfterPersist,
            max_in_flight: 1,
            prefix: DEFAULT_BATCH_PREFIX.into(),
        }
    }
}

impl ConsumerConfig {
    pub fn props(&self) -> ConsumerProps {
        ConsumerProps {
            threshold: self.threshold,
            ack_mode: self.ack_mode,
            max_in_flight: self.max_in_flight,
            prefix: self.prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Where the lake warehouse keeps its tables inside the bucket
    pub root: String,
    #[serde(flatten)]
    pub loader: LoaderProps,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            root: "warehouse".into(),
            loader: LoaderProps::default(),
        }
    }
}

/// Values given on the command line or in the environment win over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bootstrap_servers: Option<String>,
    pub topic: Option<String>,
    pub group_id: Option<String>,
    pub bucket: Option<String>,
    pub credentials: Option<PathBuf>,
}

impl Config {
    /// Defaults when `path` does not exist
    pub fn load(path: &FsPath) -> Result<Self> {
        if !path.exists() {
            tracing::info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply(mut self, overrides: Overrides) -> Result<Self> {
        if let Some(servers) = overrides.bootstrap_servers {
            self.broker.bootstrap_servers = servers;
        }
        if let Some(topic) = overrides.topic {
            self.broker.topic = topic;
        }
        if let Some(group_id) = overrides.group_id {
            self.broker.group_id = group_id;
        }

        if let Some(bucket) = overrides.bucket {
            let service_account_path = match &self.storage {
                StorageConfig::Gcs {
                    service_account_path,
                    ..
                } => service_account_path.clone(),
                _ => None,
            };
            self.storage = StorageConfig::Gcs {
                bucket,
                service_account_path,
            };
        }
        if let Some(credentials) = overrides.credentials {
            match &mut self.storage {
                StorageConfig::Gcs {
                    service_account_path,
                    ..
                } => *service_account_path = Some(credentials),
                _ => tracing::warn!("ignoring credentials, storage is not a GCS bucket"),
            }
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.consumer.threshold == 0 {
            return Err(StockstreamError::InvalidConfig(
                "consumer.threshold must be at least 1".into(),
            ));
        }
        if self.consumer.max_in_flight == 0 {
            return Err(StockstreamError::InvalidConfig(
                "consumer.max_in_flight must be at least 1".into(),
            ));
        }
        if self.broker.topic.is_empty() {
            return Err(StockstreamError::InvalidConfig("broker.topic is empty".into()));
        }
        if self.consumer.prefix != self.warehouse.loader.prefix {
            tracing::warn!(
                "consumer writes {}-* but the loader picks up {}-*",
                self.consumer.prefix,
                self.warehouse.loader.prefix
            );
        }
        Ok(())
    }
}
