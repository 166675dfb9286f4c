//! traffic-shadow
//!
//! Replicates a sampled share of live HTTP/1.x requests, observed on a
//! mirrored capture interface, to a shadow destination.
//!
//! # Architecture Overview
//!
//! ```text
//!   mirror feed (vxlan0)
//!         │
//!         ▼
//!   ┌───────────┐   TcpSegment   ┌────────────┐  ordered bytes  ┌───────────┐
//!   │  capture  │───────────────▶│ reassembly │────────────────▶│   http    │
//!   │  thread   │  bounded mpsc  │ (ingestion │  per-flow sink  │ extractor │
//!   └───────────┘                │   task)    │                 │ (per flow)│
//!                                └─────┬──────┘                 └─────┬─────┘
//!                                      │ idle eviction ticker         │ CapturedRequest
//!                                      ▼                              ▼
//!                                 flows closed                ┌──────────────┐
//!                                                             │   sampling   │
//!                                                             │ + filters +  │
//!                                                             │   routing    │
//!                                                             └──────┬───────┘
//!                                                                    │ Forward { url }
//!                                                                    ▼
//!                                                             ┌──────────────┐
//!                                                             │  forwarder   │──▶ shadow
//!                                                             └──────────────┘
//!
//!   health listener (accept + close)        metrics endpoint (optional)
//! ```

use clap::Parser;

use traffic_shadow::cli::Cli;
use traffic_shadow::lifecycle;
use traffic_shadow::observability::{logging, metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match cli.load() {
        Ok(config) => config,
        Err(e) => {
            logging::init(cli.log_level.as_deref().unwrap_or(""));
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    logging::init(&config.observability.log_level);

    tracing::info!("traffic-shadow v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        interface = %config.capture.interface,
        pcap_file = ?config.capture.pcap_file,
        filter_port = config.capture.filter_port,
        percentage = config.sampling.percentage,
        routes = config.routes.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => {
                tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    "Failed to parse metrics address"
                );
            }
        }
    }

    if let Err(e) = lifecycle::run(config).await {
        tracing::error!(error = %e, "Fatal error");
        return Err(e.into());
    }
    Ok(())
}
