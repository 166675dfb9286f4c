//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the shared, immutable parts (route table, filter engine, forwarder)
//! - Bind the health listener and open the packet source
//! - Start the capture thread and the ingestion task
//! - Stop on end of capture or a signal, then drain extractors and forwards
//!
//! # Design Decisions
//! - Fail fast: every setup error is returned before any packet is read
//! - The health listener binds before capture opens, so probes pass only
//!   once the process is otherwise able to start

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::capture::{spawn_capture, CaptureError, PacketSource, PcapSource};
use crate::config::{ShadowConfig, ValidationError};
use crate::forward::Forwarder;
use crate::health::{HealthError, HealthListener};
use crate::lifecycle::{signals, Shutdown};
use crate::pipeline::{run_ingest, EvictionClock, HttpStreamFactory, IngestConfig, ShadowHandler};
use crate::reassembly::{Assembler, AssemblerConfig};
use crate::routing::RouteTable;
use crate::sampling::FilterEngine;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ValidationError),

    #[error(transparent)]
    Health(#[from] HealthError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("failed to start capture thread: {0}")]
    Thread(#[from] std::io::Error),

    #[error("ingestion task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Run the shadowing pipeline until capture ends or a signal arrives.
pub async fn run(config: ShadowConfig) -> Result<(), StartupError> {
    let routes = Arc::new(RouteTable::new(config.routes.clone()));
    let engine = Arc::new(FilterEngine::from_config(&config.sampling, Arc::clone(&routes))?);
    tracing::info!(
        routes = routes.len(),
        percentage = engine.percentage(),
        percentage_by = engine.key_kind().as_str(),
        "Filter engine ready"
    );

    let handler = Arc::new(ShadowHandler::new(engine, Forwarder::new(&config.forward)));
    let shutdown = Shutdown::new();

    let health = if config.health.enabled {
        let listener = HealthListener::bind(&config.health.bind_address).await?;
        Some(tokio::spawn(listener.run(shutdown.subscribe())))
    } else {
        None
    };

    // Range checked by validation.
    let port = u16::try_from(config.capture.filter_port).unwrap_or(80);
    let (source, clock) = match &config.capture.pcap_file {
        Some(path) => {
            tracing::info!(file = %path, "Replaying capture file");
            let source = PcapSource::open_file(Path::new(path), port)?;
            (Box::new(source) as Box<dyn PacketSource>, EvictionClock::Capture)
        }
        None => {
            tracing::info!(interface = %config.capture.interface, "Starting live capture");
            let source = PcapSource::open_live(&config.capture, port)?;
            (Box::new(source) as Box<dyn PacketSource>, EvictionClock::Wall)
        }
    };

    let (tx, rx) = mpsc::channel(config.capture.channel_capacity);
    let capture = spawn_capture(source, config.capture.decap_vxlan, tx)?;

    let reassembly = &config.reassembly;
    let factory = HttpStreamFactory::new(
        handler.clone(),
        handler.tasks(),
        reassembly.max_stream_backlog_bytes,
    );
    let assembler = Assembler::new(
        factory,
        AssemblerConfig {
            server_port: Some(port),
            max_buffered_bytes_per_flow: reassembly.max_buffered_bytes_per_flow,
        },
    );
    let ingest_config = IngestConfig {
        idle_timeout: Duration::from_secs(reassembly.idle_timeout_secs),
        flush_interval: Duration::from_secs(reassembly.flush_interval_secs),
        clock,
    };
    let mut ingest = tokio::spawn(run_ingest(assembler, rx, ingest_config, shutdown.subscribe()));

    let stats = tokio::select! {
        signal = signals::wait_for_signal() => {
            shutdown.trigger(signal);
            (&mut ingest).await?
        }
        stats = &mut ingest => {
            shutdown.trigger("capture ended");
            stats?
        }
    };

    // The capture thread exits once it sees the channel closed.
    if let Err(e) = tokio::task::spawn_blocking(move || capture.join()).await {
        tracing::warn!(error = %e, "Capture thread did not stop cleanly");
    }

    let drain = Duration::from_secs(config.shutdown.drain_secs);
    if !handler.drain(drain).await {
        tracing::warn!(in_flight = handler.in_flight(), "Pipeline tasks still running at exit");
    }
    if let Some(health) = health {
        let _ = health.await;
    }

    tracing::info!(
        flows = stats.flows_opened,
        duplicate_bytes = stats.duplicate_bytes,
        "Shutdown complete"
    );
    Ok(())
}
