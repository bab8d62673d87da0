//! kafka-lag-monitor
//!
//! Tracks consumer group progress by tailing `__consumer_offsets` and publishes
//! committed offsets, end offsets and lag to Graphite.
//!
//! # CLI Usage
//!
//! ```bash
//! # Partition and topic lag for every group, every 30 seconds
//! kafka-lag-monitor --brokers kafka-1:9092,kafka-2:9092 --graphite graphite:2003
//!
//! # Everything, printed instead of sent
//! kafka-lag-monitor --brokers localhost:9092 --dry-run \
//!   --report-end-offsets --report-consumer-offsets --report-internal-metrics
//! ```

use std::future::Future;

use anyhow::Context;
use lag_core::{
    IngestOptions, LagReporter, MetadataClient, MetricSink, MetricsRegistry, OffsetIngestor,
    RecordStream, ReportOptions,
};
use lag_monitor_graphite::{GraphiteAddress, GraphiteSender, StdoutSink};
use lag_monitor_kafka_source::{EndOffsetsClient, OffsetsLogStream};
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tracing::{error, info, warn};

pub mod config;

pub use config::Config;

/// Run ingestion and reporting until `shutdown` resolves.
///
/// The reporter is stopped first, then the ingestion loop closes its stream.
/// If either task exits on its own, the other is stopped and an error is
/// returned.
pub async fn monitor<S, C, K>(
    stream: S,
    client: C,
    sink: K,
    ingest: IngestOptions,
    report: ReportOptions,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()>
where
    S: RecordStream + 'static,
    C: MetadataClient + 'static,
    K: MetricSink + 'static,
{
    let metrics = MetricsRegistry::new();
    let mut ingestion = OffsetIngestor::new(stream, metrics.clone(), ingest).spawn();

    let reporter = LagReporter::new(client, sink, ingestion.offsets(), metrics, report);
    let (stop_reporter, rx) = broadcast::channel(1);
    let mut reporting = tokio::spawn(reporter.run(rx));

    let exit = tokio::select! {
        _ = shutdown => Exit::Shutdown,
        joined = &mut reporting => Exit::Reporter(joined),
        finished = ingestion.finished() => Exit::Ingestion(finished),
    };

    match exit {
        Exit::Shutdown => {
            info!("Shutting down");
            // Fails only if the reporter already exited.
            let _ = stop_reporter.send(());
            reporting.await.context("Lag reporter task failed")?;
            ingestion.shutdown().await?;
            info!("Shutdown complete");
            Ok(())
        }
        Exit::Reporter(joined) => {
            error!("Lag reporter stopped unexpectedly, stopping ingestion");
            if let Err(e) = ingestion.shutdown().await {
                warn!("Failed to stop ingestion: {e:#}");
            }
            joined.context("Lag reporter task failed")?;
            anyhow::bail!("Lag reporter stopped unexpectedly")
        }
        Exit::Ingestion(finished) => {
            error!("Consumer offset ingestion stopped unexpectedly, stopping reporter");
            let _ = stop_reporter.send(());
            if let Err(e) = reporting.await {
                warn!("Lag reporter task failed: {e}");
            }
            finished?;
            anyhow::bail!("Consumer offset ingestion stopped unexpectedly")
        }
    }
}

enum Exit {
    Shutdown,
    Reporter(Result<(), JoinError>),
    Ingestion(anyhow::Result<()>),
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C, running until killed: {e}");
        std::future::pending::<()>().await;
    }
}

/// Connect to the brokers and run until Ctrl-C.
pub async fn run_monitor(config: Config) -> anyhow::Result<()> {
    if !config.reports_anything() {
        warn!("No metrics enabled, nothing will be reported");
    }

    let kafka = config.kafka_config();
    let stream = OffsetsLogStream::new(kafka.clone())
        .context("Failed to create consumer offsets stream")?;
    let client = EndOffsetsClient::new(kafka).context("Failed to create metadata client")?;

    info!(
        "Monitoring consumer groups on {}, reporting every {:?}",
        config.brokers.join(","),
        config.interval
    );

    let ingest = config.ingest_options();
    let report = config.report_options();
    if config.dry_run {
        let sink = StdoutSink::new(config.metric_prefix.clone());
        return monitor(stream, client, sink, ingest, report, ctrl_c()).await;
    }

    let destination = config
        .graphite
        .as_deref()
        .context("--graphite is required unless --dry-run is set")?;
    let address = GraphiteAddress::parse(destination)
        .with_context(|| format!("Invalid Graphite server '{destination}'"))?;
    info!("Sending metrics to Graphite at {address}");
    let sink = GraphiteSender::new(address, config.metric_prefix.clone());
    monitor(stream, client, sink, ingest, report, ctrl_c()).await
}
