use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use object_store::ObjectStore;
use stockstream::{
    config::DEFAULT_CONFIG_FILE,
    pipeline,
    warehouse::LoadReport,
    Config, Overrides,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .and_then(|config| config.apply(cli.overrides()))
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let bucket = config.storage.build().context("opening the bucket")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, shutting down");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Publish => {
            let report = publish(&config, bucket, &cancel).await?;
            tracing::info!("sent {} records", report.sent);
        }
        Command::Consume => {
            let report = consume(&config, bucket, cancel).await?;
            tracing::info!(
                "wrote {} messages in {} batch objects, rejected {}",
                report.messages_written,
                report.batches_written(),
                report.messages_rejected
            );
        }
        Command::Load => {
            let report = pipeline::load(&config, bucket).await?;
            exit_on_failed_loads(&report)?;
        }
        Command::Run { in_process: true } => {
            let report = pipeline::run_in_process(&config, bucket, cancel).await?;
            tracing::info!(
                "published {}, persisted {} in {} objects",
                report.published.sent,
                report.consumed.messages_written,
                report.consumed.batches_written()
            );
            exit_on_failed_loads(&report.loaded)?;
        }
        Command::Run { in_process: false } => {
            let report = run_with_kafka(&config, bucket, cancel).await?;
            exit_on_failed_loads(&report.loaded)?;
        }
    }

    Ok(())
}

#[cfg(feature = "kafka")]
async fn publish(
    config: &Config,
    bucket: Arc<dyn ObjectStore>,
    cancel: &CancellationToken,
) -> anyhow::Result<stockstream::ingestor::PublishReport> {
    let sink = stockstream::ingestor::broker::kafka::KafkaPublisher::connect(
        &config.broker.bootstrap_servers,
        &config.broker.topic,
    )?;
    Ok(pipeline::publish(config, bucket.as_ref(), sink, cancel).await?)
}

#[cfg(feature = "kafka")]
async fn consume(
    config: &Config,
    bucket: Arc<dyn ObjectStore>,
    cancel: CancellationToken,
) -> anyhow::Result<stockstream::ingestor::ConsumerReport> {
    let source = stockstream::ingestor::broker::kafka::KafkaSubscriber::connect(
        &config.broker.bootstrap_servers,
        &config.broker.topic,
        &config.broker.group_id,
    )?;
    Ok(pipeline::consume(config, bucket, source, cancel).await?)
}

#[cfg(feature = "kafka")]
async fn run_with_kafka(
    config: &Config,
    bucket: Arc<dyn ObjectStore>,
    cancel: CancellationToken,
) -> anyhow::Result<stockstream::RunReport> {
    use stockstream::ingestor::broker::kafka::{KafkaPublisher, KafkaSubscriber};

    let broker = &config.broker;
    let sink = KafkaPublisher::connect(&broker.bootstrap_servers, &broker.topic)?;
    let source =
        KafkaSubscriber::connect(&broker.bootstrap_servers, &broker.topic, &broker.group_id)?;
    let report = pipeline::run_stages(config, bucket, sink, source, cancel, || {
        tracing::info!("publishing done, consuming until interrupted");
        Ok(())
    })
    .await?;
    Ok(report)
}

#[cfg(not(feature = "kafka"))]
async fn run_with_kafka(
    _config: &Config,
    _bucket: Arc<dyn ObjectStore>,
    _cancel: CancellationToken,
) -> anyhow::Result<stockstream::RunReport> {
    anyhow::bail!("built without the kafka feature, try `run --in-process`")
}

#[cfg(not(feature = "kafka"))]
async fn publish(
    _config: &Config,
    _bucket: Arc<dyn ObjectStore>,
    _cancel: &CancellationToken,
) -> anyhow::Result<stockstream::ingestor::PublishReport> {
    anyhow::bail!("built without the kafka feature, try `run --in-process`")
}

#[cfg(not(feature = "kafka"))]
async fn consume(
    _config: &Config,
    _bucket: Arc<dyn ObjectStore>,
    _cancel: CancellationToken,
) -> anyhow::Result<stockstream::ingestor::ConsumerReport> {
    anyhow::bail!("built without the kafka feature, try `run --in-process`")
}

fn exit_on_failed_loads(report: &LoadReport) -> anyhow::Result<()> {
    tracing::info!(
        "loaded {} objects ({} rows), {} already loaded",
        report.loaded(),
        report.rows_loaded(),
        report.already_loaded()
    );
    let failed: Vec<_> = report.failed().collect();
    for (object, err) in &failed {
        tracing::error!("{object}: {err}");
    }
    if !failed.is_empty() {
        anyhow::bail!("{} of {} objects failed to load", failed.len(), report.loads.len());
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(about = "Stream sampled stock quotes through a topic into a warehouse")]
struct Cli {
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long, env = "KAFKA_BOOTSTRAP_SERVERS")]
    bootstrap_servers: Option<String>,
    #[arg(long, env = "KAFKA_TOPIC")]
    topic: Option<String>,
    #[arg(long, env = "KAFKA_GROUP_ID")]
    group_id: Option<String>,
    #[arg(long, env = "BUCKET_NAME")]
    bucket: Option<String>,
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    credentials: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sample the source CSV and publish it record by record
    Publish,
    /// Batch the topic into objects until interrupted
    Consume,
    /// Load every batch object not loaded yet
    Load,
    /// Publish and consume side by side, then load
    Run {
        /// Use an in-process broker instead of Kafka
        #[arg(long)]
        in_process: bool,
    },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            bootstrap_servers: self.bootstrap_servers.clone(),
            topic: self.topic.clone(),
            group_id: self.group_id.clone(),
            bucket: self.bucket.clone(),
            credentials: self.credentials.clone(),
        }
    }
}
