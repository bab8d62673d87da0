//! Ingestion and reporting running side by side over in-memory doubles.

use std::time::Duration;

use lag_core::testing::{channel_stream, RecordingSink, StaticMetadataClient};
use lag_core::{
    IngestOptions, LagReport, LagReporter, MetricsRegistry, OffsetIngestor, ReportOptions,
    TopicEndOffsets,
};
use tokio::sync::broadcast;

fn end_offsets(entries: &[(&str, i32, i64)]) -> TopicEndOffsets {
    let mut map = TopicEndOffsets::new();
    for (topic, partition, offset) in entries {
        map.entry(topic.to_string())
            .or_default()
            .insert(*partition, *offset);
    }
    map
}

#[tokio::test(start_paused = true)]
async fn commits_flow_into_lag_samples() {
    let metrics = MetricsRegistry::new();
    let (stream, injector) = channel_stream();
    let ingestion =
        OffsetIngestor::new(stream, metrics.clone(), IngestOptions::default()).spawn();

    let client = StaticMetadataClient::new(end_offsets(&[("ABC", 0, 100), ("ABC", 1, 100)]));
    let sink = RecordingSink::new();
    let reporter = LagReporter::new(
        client.clone(),
        sink.clone(),
        ingestion.offsets(),
        metrics.clone(),
        ReportOptions {
            end_offsets: true,
            consumer_offsets: true,
            consumer_lag: LagReport::Both,
            internal_metrics: true,
            interval: Duration::from_secs(10),
            warmup: Duration::from_secs(5),
        },
    );
    let (shutdown, rx) = broadcast::channel(1);
    let reporting = tokio::spawn(reporter.run(rx));

    injector.wait_until_subscribed().await;
    injector.inject_commit("grp", "ABC", 0, 90);
    injector.inject_commit("grp", "ABC", 1, 99);
    injector.wait_until_processed().await;

    tokio::time::sleep(Duration::from_secs(6)).await;
    let results = sink.results();
    assert_eq!(results["group.grp.topic.ABC.partition.0.lag"], 10);
    assert_eq!(results["group.grp.topic.ABC.partition.1.lag"], 1);
    assert_eq!(results["group.grp.topic.ABC.total.lag"], 11);
    assert_eq!(results["monitor.ingest.messages"], 2);
    assert_eq!(results["monitor.ingest.commits"], 2);

    // The consumer catches up and the topic grows.
    injector.inject_commit("grp", "ABC", 0, 100);
    injector.wait_until_processed().await;
    client.set_end_offsets(end_offsets(&[("ABC", 0, 120), ("ABC", 1, 100)]));
    sink.clear();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let results = sink.results();
    assert_eq!(results["group.grp.topic.ABC.partition.0.lag"], 20);
    assert_eq!(results["group.grp.topic.ABC.total.lag"], 21);
    assert_eq!(results["topic.ABC.partition.0.end_offset"], 120);

    // Deleting the topic drops the group and its samples.
    injector.inject_tombstone("grp", "ABC", 1);
    injector.wait_until_processed().await;
    sink.clear();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let results = sink.results();
    assert!(results.keys().all(|name| !name.starts_with("group.")));
    assert_eq!(results["topic.ABC.partition.0.end_offset"], 120);

    shutdown.send(()).unwrap();
    reporting.await.unwrap();
    ingestion.shutdown().await.unwrap();
    assert!(injector.is_closed());
}
