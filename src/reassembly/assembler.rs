//! Flow table and segment dispatch.
//!
//! # Responsibilities
//! - Map segments to flows by endpoint pair, creating flows on first sight
//! - Decide which side of a new flow is the client
//! - Feed the client half through its [`HalfStream`] into the flow's sink
//! - Terminate flows on FIN, RST, overflow, consumer loss and idle eviction
//! - Remember finished flows for one idle period, so late retransmissions
//!   are discarded instead of opening a flow that replays old requests
//!
//! # Design Decisions
//! - Owned by the single ingestion task; no locking
//! - Every termination path goes through `terminate`, which removes the flow
//!   before finishing its sink, so end-of-data is signalled exactly once
//! - Only the client → server direction is reassembled; the reverse half only
//!   refreshes activity (the capture filter normally hides it anyway)

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::SystemTime;

use crate::capture::TcpSegment;
use crate::observability::metrics;
use crate::reassembly::flow::{FlowKey, FlowMeta};
use crate::reassembly::half::{HalfError, HalfStream, Progress};
use crate::reassembly::stream::{StreamFactory, StreamSink};

/// Assembler limits.
#[derive(Debug, Clone, Copy)]
pub struct AssemblerConfig {
    /// Port of the captured service; segments sent to it come from the client.
    pub server_port: Option<u16>,
    /// Out-of-order bytes one flow may buffer.
    pub max_buffered_bytes_per_flow: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            server_port: None,
            max_buffered_bytes_per_flow: 4 * 1024 * 1024,
        }
    }
}

/// Why a flow was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Fin,
    Reset,
    Evicted,
    Overflow,
    ConsumerGone,
    EndOfInput,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Fin => "fin",
            CloseReason::Reset => "reset",
            CloseReason::Evicted => "evicted",
            CloseReason::Overflow => "overflow",
            CloseReason::ConsumerGone => "consumer_gone",
            CloseReason::EndOfInput => "end_of_input",
        }
    }
}

/// Running totals, mainly for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    pub flows_opened: u64,
    pub flows_closed: u64,
    pub flows_evicted: u64,
    pub flows_dropped: u64,
    pub duplicate_bytes: u64,
}

struct Flow {
    meta: FlowMeta,
    client: HalfStream,
    sink: Box<dyn StreamSink>,
    last_seen: SystemTime,
}

/// Sequence range a finished flow delivered.
struct Closed {
    client: SocketAddr,
    origin: u32,
    next_seq: u32,
    last_seen: SystemTime,
}

impl Closed {
    /// Whether `segment` only repeats what the flow already delivered, or
    /// belongs to its unconsumed server side.
    fn covers(&self, segment: &TcpSegment) -> bool {
        if segment.src != self.client {
            return true;
        }
        let start = segment.seq.wrapping_add(u32::from(segment.flags.syn));
        let end = start.wrapping_add(segment.payload.len() as u32);
        let span = self.next_seq.wrapping_sub(self.origin);
        start.wrapping_sub(self.origin) <= span && end.wrapping_sub(self.origin) <= span
    }
}

/// TCP stream reassembler.
pub struct Assembler<F: StreamFactory> {
    factory: F,
    config: AssemblerConfig,
    flows: HashMap<FlowKey, Flow>,
    closed: HashMap<FlowKey, Closed>,
    stats: AssemblerStats,
}

impl<F: StreamFactory> Assembler<F> {
    pub fn new(factory: F, config: AssemblerConfig) -> Self {
        Self {
            factory,
            config,
            flows: HashMap::new(),
            closed: HashMap::new(),
            stats: AssemblerStats::default(),
        }
    }

    /// Number of live flows.
    pub fn active_flows(&self) -> usize {
        self.flows.len()
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// Feed one captured segment.
    pub fn assemble(&mut self, segment: TcpSegment) {
        let key = FlowKey::new(segment.src, segment.dst);

        if !self.flows.contains_key(&key) {
            // Stray ACK/FIN/RST for a flow we are not tracking.
            if segment.flags.rst || (segment.payload.is_empty() && !segment.flags.syn) {
                return;
            }
            if let Some(closed) = self.closed.get(&key) {
                if closed.covers(&segment) {
                    tracing::trace!(flow = %key, "Late segment for a finished flow");
                    if segment.src == closed.client {
                        self.stats.duplicate_bytes += segment.payload.len() as u64;
                    }
                    return;
                }
                self.closed.remove(&key);
            }
            self.open(key, &segment);
        }

        let max_buffered = self.config.max_buffered_bytes_per_flow;
        let Some(flow) = self.flows.get_mut(&key) else {
            return;
        };
        if segment.timestamp > flow.last_seen {
            flow.last_seen = segment.timestamp;
        }

        if segment.flags.rst {
            self.terminate(&key, CloseReason::Reset);
            return;
        }
        if segment.src != flow.meta.client {
            return;
        }

        let Flow { client, sink, .. } = flow;
        let before = client.duplicate_bytes();
        let result = client.accept(&segment, max_buffered, |chunk| sink.deliver(chunk));
        self.stats.duplicate_bytes += client.duplicate_bytes() - before;

        match result {
            Ok(Progress::Open) => {}
            Ok(Progress::Finished) => self.terminate(&key, CloseReason::Fin),
            Err(HalfError::Overflow { buffered }) => {
                tracing::warn!(flow = %key, buffered, "Out-of-order buffer limit reached, dropping flow");
                self.terminate(&key, CloseReason::Overflow);
            }
            Err(HalfError::Sink(e)) => {
                tracing::debug!(flow = %key, error = %e, "Stream consumer stopped, dropping flow");
                self.terminate(&key, CloseReason::ConsumerGone);
            }
        }
    }

    /// Terminate every flow idle since before `cutoff`. Returns how many were evicted.
    ///
    /// Finished flows remembered from before `cutoff` are forgotten too.
    pub fn flush_older_than(&mut self, cutoff: SystemTime) -> usize {
        self.closed.retain(|_, closed| closed.last_seen >= cutoff);

        let stale: Vec<FlowKey> = self
            .flows
            .iter()
            .filter(|(_, flow)| flow.last_seen < cutoff)
            .map(|(key, _)| *key)
            .collect();

        for key in &stale {
            self.terminate(key, CloseReason::Evicted);
        }
        stale.len()
    }

    /// Terminate every flow, e.g. at end of input.
    pub fn close_all(&mut self) -> usize {
        let keys: Vec<FlowKey> = self.flows.keys().copied().collect();
        for key in &keys {
            self.terminate(key, CloseReason::EndOfInput);
        }
        keys.len()
    }

    fn open(&mut self, key: FlowKey, segment: &TcpSegment) {
        let (client, server) = self.orient(segment);
        let meta = FlowMeta { client, server };
        let sink = self.factory.new_stream(&meta);

        tracing::debug!(flow = %meta, "Flow opened");
        metrics::record_flow("opened");
        self.stats.flows_opened += 1;

        self.flows.insert(
            key,
            Flow {
                meta,
                client: HalfStream::new(),
                sink,
                last_seen: segment.timestamp,
            },
        );
    }

    fn orient(&self, segment: &TcpSegment) -> (SocketAddr, SocketAddr) {
        let forward = (segment.src, segment.dst);
        let reverse = (segment.dst, segment.src);

        if let Some(port) = self.config.server_port {
            if segment.dst.port() == port {
                return forward;
            }
            if segment.src.port() == port {
                return reverse;
            }
        }
        if segment.flags.syn && segment.flags.ack {
            reverse
        } else {
            forward
        }
    }

    fn terminate(&mut self, key: &FlowKey, reason: CloseReason) {
        let Some(mut flow) = self.flows.remove(key) else {
            return;
        };

        if matches!(reason, CloseReason::Evicted | CloseReason::EndOfInput) {
            // A flow that never saw its SYN still holds everything it got.
            let Flow { client, sink, .. } = &mut flow;
            if let Err(e) = client.settle(|chunk| sink.deliver(chunk)) {
                tracing::debug!(flow = %key, error = %e, "Held bytes not delivered");
            }
        }
        if matches!(reason, CloseReason::Fin | CloseReason::Evicted) {
            if let (Some(origin), Some(next_seq)) = (flow.client.origin(), flow.client.next_seq()) {
                self.closed.insert(
                    *key,
                    Closed {
                        client: flow.meta.client,
                        origin,
                        next_seq,
                        last_seen: flow.last_seen,
                    },
                );
            }
        }

        match reason {
            CloseReason::Evicted => self.stats.flows_evicted += 1,
            CloseReason::Overflow | CloseReason::ConsumerGone => self.stats.flows_dropped += 1,
            _ => self.stats.flows_closed += 1,
        }
        metrics::record_flow(reason.as_str());
        tracing::debug!(
            flow = %flow.meta,
            reason = reason.as_str(),
            delivered = flow.client.delivered(),
            discarded = flow.client.buffered(),
            "Flow closed"
        );

        flow.sink.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::TcpFlags;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Recorded {
        meta: Option<FlowMeta>,
        data: Vec<u8>,
        finished: u32,
    }

    type Log = Arc<Mutex<Vec<Arc<Mutex<Recorded>>>>>;

    struct RecordingSink(Arc<Mutex<Recorded>>);

    impl StreamSink for RecordingSink {
        fn deliver(&mut self, data: Bytes) -> Result<(), crate::reassembly::SinkError> {
            self.0.lock().unwrap().data.extend_from_slice(&data);
            Ok(())
        }

        fn finish(self: Box<Self>) {
            self.0.lock().unwrap().finished += 1;
        }
    }

    #[derive(Default, Clone)]
    struct RecordingFactory(Log);

    impl StreamFactory for RecordingFactory {
        fn new_stream(&mut self, meta: &FlowMeta) -> Box<dyn StreamSink> {
            let rec = Arc::new(Mutex::new(Recorded {
                meta: Some(*meta),
                ..Recorded::default()
            }));
            self.0.lock().unwrap().push(Arc::clone(&rec));
            Box::new(RecordingSink(rec))
        }
    }

    const CLIENT: &str = "10.0.0.1:40000";
    const SERVER: &str = "10.0.0.2:80";

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn seg(src: &str, dst: &str, seq: u32, flags: TcpFlags, data: &'static [u8], ts: u64) -> TcpSegment {
        TcpSegment {
            src: src.parse().unwrap(),
            dst: dst.parse().unwrap(),
            seq,
            flags,
            payload: Bytes::from_static(data),
            timestamp: at(ts),
        }
    }

    fn ack() -> TcpFlags {
        TcpFlags { ack: true, ..TcpFlags::default() }
    }

    fn assembler(port: Option<u16>) -> (Assembler<RecordingFactory>, Log) {
        let factory = RecordingFactory::default();
        let log = factory.0.clone();
        let config = AssemblerConfig {
            server_port: port,
            ..AssemblerConfig::default()
        };
        (Assembler::new(factory, config), log)
    }

    fn syn() -> TcpFlags {
        TcpFlags { syn: true, ..TcpFlags::default() }
    }

    fn fin() -> TcpFlags {
        TcpFlags { fin: true, ack: true, ..TcpFlags::default() }
    }

    fn data_of(log: &Log, index: usize) -> Vec<u8> {
        log.lock().unwrap()[index].lock().unwrap().data.clone()
    }

    #[test]
    fn test_reorders_and_finishes_on_fin() {
        let (mut asm, log) = assembler(Some(80));
        asm.assemble(seg(CLIENT, SERVER, 3, syn(), b"", 1));
        asm.assemble(seg(CLIENT, SERVER, 10, ack(), b"world", 1));
        asm.assemble(seg(CLIENT, SERVER, 4, ack(), b"hello ", 1));
        assert_eq!(data_of(&log, 0), b"hello world");

        asm.assemble(seg(CLIENT, SERVER, 15, fin(), b"", 2));
        assert_eq!(asm.active_flows(), 0);
        assert_eq!(log.lock().unwrap()[0].lock().unwrap().finished, 1);
        assert_eq!(asm.stats().flows_closed, 1);
    }

    #[test]
    fn test_data_overtaking_syn_is_not_lost() {
        let (mut asm, log) = assembler(Some(80));
        asm.assemble(seg(CLIENT, SERVER, 11, ack(), b"/x HTTP/1.1\r\n", 1));
        asm.assemble(seg(CLIENT, SERVER, 6, syn(), b"", 1));
        asm.assemble(seg(CLIENT, SERVER, 7, ack(), b"GET ", 1));
        asm.assemble(seg(CLIENT, SERVER, 24, ack(), b"\r\n", 1));
        asm.assemble(seg(CLIENT, SERVER, 26, fin(), b"", 1));

        assert_eq!(data_of(&log, 0), b"GET /x HTTP/1.1\r\n\r\n");
        assert_eq!(log.lock().unwrap()[0].lock().unwrap().finished, 1);
        assert_eq!(asm.active_flows(), 0);
    }

    #[test]
    fn test_mid_connection_flow_is_delivered_on_close() {
        let (mut asm, log) = assembler(Some(80));
        asm.assemble(seg(CLIENT, SERVER, 1004, ack(), b"/x HTTP/1.1\r\n", 1));
        asm.assemble(seg(CLIENT, SERVER, 1000, ack(), b"GET ", 1));
        asm.assemble(seg(CLIENT, SERVER, 1017, ack(), b"\r\n", 1));
        asm.assemble(seg(CLIENT, SERVER, 1019, fin(), b"", 1));
        // No SYN: the start of the stream is only known once the flow closes.
        assert!(data_of(&log, 0).is_empty());
        assert_eq!(asm.active_flows(), 1);

        assert_eq!(asm.close_all(), 1);
        assert_eq!(data_of(&log, 0), b"GET /x HTTP/1.1\r\n\r\n");
        assert_eq!(log.lock().unwrap()[0].lock().unwrap().finished, 1);
    }

    #[test]
    fn test_late_retransmission_after_fin_is_dropped() {
        let (mut asm, log) = assembler(Some(80));
        asm.assemble(seg(CLIENT, SERVER, 99, syn(), b"", 1));
        asm.assemble(seg(CLIENT, SERVER, 100, ack(), b"GET / HTTP/1.1\r\n\r\n", 1));
        asm.assemble(seg(CLIENT, SERVER, 118, fin(), b"", 1));
        assert_eq!(asm.active_flows(), 0);

        asm.assemble(seg(CLIENT, SERVER, 100, ack(), b"GET / HTTP/1.1\r\n\r\n", 2));
        asm.assemble(seg(CLIENT, SERVER, 99, syn(), b"", 2));
        asm.assemble(seg(SERVER, CLIENT, 5000, ack(), b"HTTP/1.1 200 OK\r\n", 2));
        assert_eq!(asm.active_flows(), 0);
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(asm.stats().duplicate_bytes, 18);

        // A new connection on the same endpoints still opens a flow.
        asm.assemble(seg(CLIENT, SERVER, 70_000, syn(), b"", 3));
        assert_eq!(asm.active_flows(), 1);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_finished_flows_are_forgotten_after_idle_period() {
        let (mut asm, log) = assembler(Some(80));
        asm.assemble(seg(CLIENT, SERVER, 99, syn(), b"", 1));
        asm.assemble(seg(CLIENT, SERVER, 100, ack(), b"a", 1));
        asm.assemble(seg(CLIENT, SERVER, 101, fin(), b"", 1));

        asm.flush_older_than(at(50));
        asm.assemble(seg(CLIENT, SERVER, 100, ack(), b"a", 60));
        assert_eq!(asm.active_flows(), 1);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_handshake_orients_flow() {
        let (mut asm, log) = assembler(None);
        let syn_ack = TcpFlags { syn: true, ack: true, ..TcpFlags::default() };
        asm.assemble(seg(SERVER, CLIENT, 900, syn_ack, b"", 1));
        asm.assemble(seg(CLIENT, SERVER, 101, ack(), b"GET", 1));
        asm.assemble(seg(SERVER, CLIENT, 901, ack(), b"HTTP/1.1 200", 1));
        asm.close_all();

        let rec = log.lock().unwrap()[0].clone();
        let rec = rec.lock().unwrap();
        assert_eq!(rec.meta.unwrap().client, CLIENT.parse().unwrap());
        assert_eq!(rec.data, b"GET");
    }

    #[test]
    fn test_server_port_orients_flow() {
        let (mut asm, log) = assembler(Some(80));
        asm.assemble(seg(SERVER, CLIENT, 1, ack(), b"response", 1));
        asm.assemble(seg(CLIENT, SERVER, 1, ack(), b"request", 1));
        asm.close_all();

        let rec = log.lock().unwrap()[0].clone();
        let rec = rec.lock().unwrap();
        assert_eq!(rec.meta.unwrap().server, SERVER.parse().unwrap());
        assert_eq!(rec.data, b"request");
    }

    #[test]
    fn test_reset_terminates_once() {
        let (mut asm, log) = assembler(Some(80));
        asm.assemble(seg(CLIENT, SERVER, 1, ack(), b"abc", 1));
        let rst = TcpFlags { rst: true, ..TcpFlags::default() };
        asm.assemble(seg(SERVER, CLIENT, 1, rst, b"", 2));
        asm.assemble(seg(SERVER, CLIENT, 1, rst, b"", 2));

        assert_eq!(asm.active_flows(), 0);
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(log.lock().unwrap()[0].lock().unwrap().finished, 1);
    }

    #[test]
    fn test_stray_segments_do_not_open_flows() {
        let (mut asm, log) = assembler(Some(80));
        asm.assemble(seg(CLIENT, SERVER, 1, ack(), b"", 1));
        let fin = TcpFlags { fin: true, ack: true, ..TcpFlags::default() };
        asm.assemble(seg(CLIENT, SERVER, 1, fin, b"", 1));
        assert_eq!(asm.active_flows(), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_idle_eviction_is_idempotent() {
        let (mut asm, log) = assembler(Some(80));
        asm.assemble(seg(CLIENT, SERVER, 1, ack(), b"old", 10));
        asm.assemble(seg("10.0.0.3:5000", SERVER, 1, ack(), b"new", 100));

        assert_eq!(asm.flush_older_than(at(50)), 1);
        assert_eq!(asm.flush_older_than(at(50)), 0);
        assert_eq!(asm.active_flows(), 1);

        let logs = log.lock().unwrap();
        let old = logs[0].lock().unwrap();
        assert_eq!(old.data, b"old");
        assert_eq!(old.finished, 1);
        assert_eq!(logs[1].lock().unwrap().finished, 0);
        assert_eq!(asm.stats().flows_evicted, 1);
    }

    #[test]
    fn test_close_all() {
        let (mut asm, log) = assembler(Some(80));
        asm.assemble(seg(CLIENT, SERVER, 1, ack(), b"a", 1));
        asm.assemble(seg("10.0.0.3:5000", SERVER, 1, ack(), b"b", 1));
        assert_eq!(asm.close_all(), 2);
        assert_eq!(asm.close_all(), 0);
        assert!(log
            .lock()
            .unwrap()
            .iter()
            .all(|r| r.lock().unwrap().finished == 1));
    }

    #[test]
    fn test_overflow_drops_flow() {
        let factory = RecordingFactory::default();
        let log = factory.0.clone();
        let mut asm = Assembler::new(
            factory,
            AssemblerConfig {
                server_port: Some(80),
                max_buffered_bytes_per_flow: 4,
            },
        );
        asm.assemble(seg(CLIENT, SERVER, 1, ack(), b"a", 1));
        asm.assemble(seg(CLIENT, SERVER, 10, ack(), b"12345", 1));

        assert_eq!(asm.active_flows(), 0);
        assert_eq!(asm.stats().flows_dropped, 1);
        assert_eq!(log.lock().unwrap()[0].lock().unwrap().finished, 1);
    }
}
