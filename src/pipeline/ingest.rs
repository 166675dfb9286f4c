//! Ingestion loop.
//!
//! # Responsibilities
//! - Own the [`Assembler`] and feed it segments from the capture channel
//! - Run idle eviction on a fixed interval, even while no packets arrive
//! - Close every flow when capture ends or shutdown is triggered
//!
//! # Design Decisions
//! - A single task owns all flow state, so reassembly needs no locks
//! - Live capture ages flows against the wall clock; file replay ages them
//!   against the newest capture timestamp seen, so old recordings are not
//!   evicted wholesale on the first sweep

use std::time::{Duration, SystemTime};

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

use crate::capture::TcpSegment;
use crate::reassembly::{Assembler, AssemblerStats, StreamFactory};

/// Time base for idle eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionClock {
    Wall,
    Capture,
}

#[derive(Debug, Clone, Copy)]
pub struct IngestConfig {
    pub idle_timeout: Duration,
    pub flush_interval: Duration,
    pub clock: EvictionClock,
}

/// Run until the segment channel closes or shutdown fires.
pub async fn run_ingest<F: StreamFactory>(
    mut assembler: Assembler<F>,
    mut segments: mpsc::Receiver<TcpSegment>,
    config: IngestConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> AssemblerStats {
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut newest = SystemTime::UNIX_EPOCH;
    loop {
        tokio::select! {
            segment = segments.recv() => match segment {
                Some(segment) => {
                    newest = newest.max(segment.timestamp);
                    assembler.assemble(segment);
                }
                None => {
                    tracing::info!("Capture ended");
                    break;
                }
            },
            _ = ticker.tick() => {
                let now = match config.clock {
                    EvictionClock::Wall => SystemTime::now(),
                    EvictionClock::Capture => newest,
                };
                let cutoff = now.checked_sub(config.idle_timeout).unwrap_or(SystemTime::UNIX_EPOCH);
                let evicted = assembler.flush_older_than(cutoff);
                tracing::debug!(
                    evicted,
                    active = assembler.active_flows(),
                    "Idle flow sweep"
                );
            },
            _ = shutdown.recv() => {
                tracing::debug!("Ingestion stopping");
                break;
            }
        }
    }

    let closed = assembler.close_all();
    let stats = assembler.stats();
    tracing::info!(
        closed,
        flows_opened = stats.flows_opened,
        flows_evicted = stats.flows_evicted,
        flows_dropped = stats.flows_dropped,
        duplicate_bytes = stats.duplicate_bytes,
        "Ingestion finished"
    );
    stats
}
