//! `GraphiteSender` against a local carbon stand-in.

use chrono::{DateTime, Utc};
use lag_core::{MetricSample, MetricSink};
use lag_monitor_graphite::{GraphiteAddress, GraphiteSender};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;

fn timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

async fn listener() -> (TcpListener, GraphiteAddress) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let address = GraphiteAddress::parse(&format!("127.0.0.1:{port}")).unwrap();
    (listener, address)
}

#[tokio::test]
async fn sends_one_line_per_sample() {
    let (listener, address) = listener().await;
    let mut sender = GraphiteSender::new(address, Some("kafka".into()));

    let samples = [
        MetricSample::new(timestamp(), ["topic", "ABC", "partition", "0", "end_offset"], 100),
        MetricSample::new(timestamp(), ["group", "grp", "topic", "ABC", "total", "lag"], 11),
    ];
    for sample in &samples {
        sender.publish(sample).await.unwrap();
    }
    sender.flush().await.unwrap();

    let (socket, _) = listener.accept().await.unwrap();
    let mut lines = BufReader::new(socket).lines();
    assert_eq!(
        lines.next_line().await.unwrap().unwrap(),
        "kafka.topic.ABC.partition.0.end_offset 100 1700000000"
    );
    assert_eq!(
        lines.next_line().await.unwrap().unwrap(),
        "kafka.group.grp.topic.ABC.total.lag 11 1700000000"
    );
}

#[tokio::test]
async fn flush_without_connection_is_a_no_op() {
    let (_listener, address) = listener().await;
    let mut sender = GraphiteSender::new(address, None);
    sender.flush().await.unwrap();
}

#[tokio::test]
async fn unreachable_receiver_fails_publish() {
    let (listener, address) = listener().await;
    drop(listener);

    let mut sender = GraphiteSender::new(address, None);
    let sample = MetricSample::new(timestamp(), ["a"], 1);
    assert!(sender.publish(&sample).await.is_err());
}
