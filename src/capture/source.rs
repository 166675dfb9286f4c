//! Packet sources backed by libpcap.
//!
//! # Responsibilities
//! - Open a live device or a capture file
//! - Install the `tcp and dst port N` BPF filter
//! - Hand out frames with their capture timestamps
//! - Run the blocking read loop on its own thread, feeding the ingestion channel

use std::path::Path;
use std::thread;
use std::time::{Duration, UNIX_EPOCH};

use pcap::{Activated, Active, Capture, Offline};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::capture::decode::{Decoder, LinkKind};
use crate::capture::packet::{Frame, TcpSegment};
use crate::config::CaptureConfig;
use crate::observability::metrics;

/// Read timeout for live captures, so the reader thread notices shutdown.
const LIVE_READ_TIMEOUT_MS: i32 = 1000;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open capture on {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: pcap::Error,
    },

    #[error("failed to install filter {filter:?}: {source}")]
    Filter {
        filter: String,
        #[source]
        source: pcap::Error,
    },

    #[error("unsupported datalink type {0}")]
    UnsupportedLink(i32),

    #[error("capture read failed: {0}")]
    Read(#[from] pcap::Error),
}

/// Outcome of one read from a packet source.
#[derive(Debug)]
pub enum NextFrame {
    Frame(Frame),
    /// Nothing arrived within the read timeout.
    Idle,
    /// The source is exhausted (end of a capture file).
    End,
}

/// Anything that can yield raw frames.
pub trait PacketSource: Send {
    fn next_frame(&mut self) -> Result<NextFrame, CaptureError>;

    fn link_kind(&self) -> LinkKind;
}

/// A libpcap handle, live or offline.
pub struct PcapSource<T: Activated + ?Sized> {
    capture: Capture<T>,
    link: LinkKind,
}

/// BPF expression restricting capture to requests towards `port`.
pub fn filter_expression(port: u16) -> String {
    format!("tcp and dst port {}", port)
}

impl PcapSource<Active> {
    /// Open a live device.
    pub fn open_live(config: &CaptureConfig, port: u16) -> Result<Self, CaptureError> {
        let open_err = |source| CaptureError::Open {
            target: config.interface.clone(),
            source,
        };
        let capture = Capture::from_device(config.interface.as_str())
            .map_err(open_err)?
            .promisc(config.promiscuous)
            .snaplen(config.snaplen)
            .immediate_mode(true)
            .timeout(LIVE_READ_TIMEOUT_MS)
            .open()
            .map_err(open_err)?;

        Self::with_filter(capture, port)
    }
}

impl PcapSource<Offline> {
    /// Open a capture file for replay.
    pub fn open_file(path: &Path, port: u16) -> Result<Self, CaptureError> {
        let capture = Capture::from_file(path).map_err(|source| CaptureError::Open {
            target: path.display().to_string(),
            source,
        })?;

        Self::with_filter(capture, port)
    }
}

impl<T: Activated + ?Sized> PcapSource<T> {
    fn with_filter(mut capture: Capture<T>, port: u16) -> Result<Self, CaptureError> {
        let filter = filter_expression(port);
        capture
            .filter(&filter, true)
            .map_err(|source| CaptureError::Filter {
                filter: filter.clone(),
                source,
            })?;

        let linktype = capture.get_datalink().0;
        let link = LinkKind::from_linktype(linktype).ok_or(CaptureError::UnsupportedLink(linktype))?;

        tracing::info!(filter = %filter, link = ?link, "Capture filter installed");
        Ok(Self { capture, link })
    }
}

impl<T: Activated + ?Sized> PacketSource for PcapSource<T> {
    fn next_frame(&mut self) -> Result<NextFrame, CaptureError> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = &packet.header.ts;
                let timestamp = UNIX_EPOCH
                    + Duration::from_secs(ts.tv_sec as u64)
                    + Duration::from_micros(ts.tv_usec as u64);
                Ok(NextFrame::Frame(Frame::new(packet.data.to_vec(), timestamp)))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(NextFrame::Idle),
            Err(pcap::Error::NoMorePackets) => Ok(NextFrame::End),
            Err(e) => Err(CaptureError::Read(e)),
        }
    }

    fn link_kind(&self) -> LinkKind {
        self.link
    }
}

/// Run `source` on a dedicated thread, sending decoded segments to `tx`.
///
/// The channel closes (and the ingestion loop sees end of input) when the source
/// is exhausted, fails, or every receiver is gone.
pub fn spawn_capture(
    mut source: Box<dyn PacketSource>,
    decap_vxlan: bool,
    tx: mpsc::Sender<TcpSegment>,
) -> std::io::Result<thread::JoinHandle<()>> {
    let decoder = Decoder::new(source.link_kind(), decap_vxlan);

    thread::Builder::new()
        .name("capture".into())
        .spawn(move || {
            tracing::info!("reading in packets");
            loop {
                match source.next_frame() {
                    Ok(NextFrame::Frame(frame)) => match decoder.decode(&frame) {
                        Some(segment) => {
                            metrics::record_frame("tcp");
                            if tx.blocking_send(segment).is_err() {
                                break;
                            }
                        }
                        None => {
                            metrics::record_frame("unusable");
                            tracing::trace!(len = frame.data.len(), "Unusable packet");
                        }
                    },
                    Ok(NextFrame::Idle) => {
                        if tx.is_closed() {
                            break;
                        }
                    }
                    Ok(NextFrame::End) => {
                        tracing::info!("Packet source exhausted");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Capture stopped");
                        break;
                    }
                }
            }
        })
}
