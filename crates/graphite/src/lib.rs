//! Graphite plaintext protocol transport.
//!
//! Every sample becomes one line:
//!
//! ```text
//! [<prefix>.]<segment>.<segment>... <value> <epoch seconds>\n
//! ```
//!
//! Segments arrive with their own dots already substituted, so the dots in a
//! line are exactly the path boundaries.

use std::fmt;

use lag_core::{MetricSample, MetricSink, SinkError};
use tokio::io::{AsyncWriteExt, BufWriter, Stdout};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Plaintext listener port of carbon.
pub const DEFAULT_PORT: u16 = 2003;

/// Format one sample as a plaintext protocol line.
pub fn format_line(prefix: Option<&str>, sample: &MetricSample) -> String {
    let name = sample.name();
    let value = sample.value;
    let time = sample.epoch_seconds();
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}.{name} {value} {time}\n"),
        _ => format!("{name} {value} {time}\n"),
    }
}

/// `host[:port]` of a carbon receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphiteAddress {
    pub host: String,
    pub port: u16,
}

impl GraphiteAddress {
    pub fn parse(destination: &str) -> Result<Self, SinkError> {
        let destination = destination.trim();
        let invalid = |what: &str| {
            SinkError::InvalidDestination(format!(
                "{what} in '{destination}', expected host[:port] or [ipv6]:port"
            ))
        };
        let (host, port) = if let Some(bracketed) = destination.strip_prefix('[') {
            let (host, rest) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unclosed '['"))?;
            let port = match rest.strip_prefix(':') {
                Some(port) => port.parse::<u16>().map_err(|_| invalid("invalid port"))?,
                None if rest.is_empty() => DEFAULT_PORT,
                None => return Err(invalid("unexpected text after ']'")),
            };
            (host, port)
        } else {
            match destination.rsplit_once(':') {
                // Bare IPv6 literal without brackets, no port.
                Some((host, _)) if host.contains(':') => (destination, DEFAULT_PORT),
                Some((host, port)) => {
                    (host, port.parse::<u16>().map_err(|_| invalid("invalid port"))?)
                }
                None => (destination, DEFAULT_PORT),
            }
        };
        if host.is_empty() {
            return Err(SinkError::InvalidDestination(format!(
                "missing host in '{destination}', expected host[:port]"
            )));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for GraphiteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Sends samples to carbon over TCP.
///
/// The connection is opened on the first publish and dropped after any write
/// failure, so the next publish reconnects.
pub struct GraphiteSender {
    address: GraphiteAddress,
    prefix: Option<String>,
    connection: Option<BufWriter<TcpStream>>,
}

impl GraphiteSender {
    pub fn new(address: GraphiteAddress, prefix: Option<String>) -> Self {
        Self {
            address,
            prefix,
            connection: None,
        }
    }

    async fn connection(&mut self) -> Result<&mut BufWriter<TcpStream>, SinkError> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                let stream = TcpStream::connect((self.address.host.as_str(), self.address.port))
                    .await?;
                info!("Connected to Graphite at {}", self.address);
                BufWriter::new(stream)
            }
        };
        Ok(self.connection.insert(connection))
    }

    fn disconnect(&mut self, err: &std::io::Error) {
        warn!("Error writing to Graphite at {}: {err}", self.address);
        self.connection = None;
    }
}

#[async_trait::async_trait]
impl MetricSink for GraphiteSender {
    async fn publish(&mut self, sample: &MetricSample) -> Result<(), SinkError> {
        let line = format_line(self.prefix.as_deref(), sample);
        let connection = self.connection().await?;
        if let Err(e) = connection.write_all(line.as_bytes()).await {
            self.disconnect(&e);
            return Err(e.into());
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        let Some(connection) = self.connection.as_mut() else {
            return Ok(());
        };
        if let Err(e) = connection.flush().await {
            self.disconnect(&e);
            return Err(e.into());
        }
        debug!("Flushed samples to {}", self.address);
        Ok(())
    }
}

/// Writes the same lines to stdout, for dry runs.
pub struct StdoutSink {
    prefix: Option<String>,
    out: BufWriter<Stdout>,
}

impl StdoutSink {
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix,
            out: BufWriter::new(tokio::io::stdout()),
        }
    }
}

#[async_trait::async_trait]
impl MetricSink for StdoutSink {
    async fn publish(&mut self, sample: &MetricSample) -> Result<(), SinkError> {
        let line = format_line(self.prefix.as_deref(), sample);
        self.out.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(path: &[&str], value: i64) -> MetricSample {
        let timestamp = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        MetricSample::new(timestamp, path.iter().copied(), value)
    }

    #[test]
    fn formats_line_with_and_without_prefix() {
        let sample = sample(&["group", "g", "topic", "orders.v2", "total", "lag"], 11);
        assert_eq!(
            format_line(None, &sample),
            "group.g.topic.orders_v2.total.lag 11 1700000000\n"
        );
        assert_eq!(
            format_line(Some("kafka.prod"), &sample),
            "kafka.prod.group.g.topic.orders_v2.total.lag 11 1700000000\n"
        );
        assert_eq!(
            format_line(Some(""), &sample),
            "group.g.topic.orders_v2.total.lag 11 1700000000\n"
        );
    }

    #[test]
    fn parses_destination() {
        assert_eq!(
            GraphiteAddress::parse("graphite.local").unwrap(),
            GraphiteAddress {
                host: "graphite.local".into(),
                port: DEFAULT_PORT
            }
        );
        assert_eq!(
            GraphiteAddress::parse("10.0.0.5:2013").unwrap().to_string(),
            "10.0.0.5:2013"
        );
        assert!(GraphiteAddress::parse("host:carbon").is_err());
        assert!(GraphiteAddress::parse(":2003").is_err());
    }

    #[test]
    fn parses_ipv6_destination() {
        let address = GraphiteAddress::parse("[::1]:2013").unwrap();
        assert_eq!(address.host, "::1");
        assert_eq!(address.port, 2013);
        assert_eq!(address.to_string(), "[::1]:2013");

        assert_eq!(GraphiteAddress::parse("[fd00::5]").unwrap().port, DEFAULT_PORT);
        assert_eq!(GraphiteAddress::parse("fd00::5").unwrap().host, "fd00::5");
        assert!(GraphiteAddress::parse("[::1").is_err());
        assert!(GraphiteAddress::parse("[::1]:carbon").is_err());
        assert!(GraphiteAddress::parse("[]:2003").is_err());
    }
}
