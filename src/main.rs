//! Command-line interface for kafka-lag-monitor
//!
//! ```bash
//! kafka-lag-monitor --brokers localhost:9092 --graphite localhost:2003 \
//!   --report-consumer-lag both --interval 30s
//! ```
//!
//! Logging follows `RUST_LOG` and defaults to `info`.

use clap::Parser;
use kafka_lag_monitor::{run_monitor, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    run_monitor(config).await
}
