//! Packet capture subsystem.
//!
//! # Data Flow
//! ```text
//! libpcap (live device or file, BPF "tcp and dst port N")
//!     → source.rs (blocking reads on a dedicated thread)
//!     → decode.rs (link → IP → TCP, optional VXLAN unwrap)
//!     → TcpSegment over a bounded channel
//!     → ingestion loop (pipeline)
//! ```
//!
//! # Design Decisions
//! - libpcap is blocking; it never runs on the async runtime
//! - A full channel blocks the capture thread, never the flow consumers
//! - End of a capture file closes the channel, which ends ingestion

pub mod decode;
pub mod packet;
pub mod source;

pub use decode::{Decoder, LinkKind};
pub use packet::{Frame, TcpFlags, TcpSegment};
pub use source::{spawn_capture, CaptureError, NextFrame, PacketSource, PcapSource};
