//! One direction of a flow: sequence tracking and out-of-order buffering.
//!
//! The stream origin is the byte after the SYN. Until a SYN is seen, segments
//! are held by raw sequence number, so data that overtook the handshake (or a
//! capture joined mid-connection) is still delivered in order. Without a SYN
//! the origin becomes the lowest held sequence once holding more would pass
//! the buffer limit, or when the flow is closed ([`HalfStream::settle`]).

use std::collections::BTreeMap;

use bytes::Bytes;
use thiserror::Error;

use crate::capture::TcpSegment;
use crate::reassembly::stream::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HalfError {
    #[error("{buffered} out-of-order bytes buffered, limit exceeded")]
    Overflow { buffered: usize },

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Whether a half-stream is still open after a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Open,
    /// FIN reached and every byte before it delivered.
    Finished,
}

/// Reassembly state of one direction.
///
/// Offsets are absolute positions in the byte stream (0 = first payload byte),
/// so wrap-around of the 32-bit sequence space never reorders the buffer.
#[derive(Debug, Default)]
pub struct HalfStream {
    /// Sequence number of stream offset 0, once known.
    origin: Option<u32>,
    /// Sequence number of the next byte to deliver.
    next_seq: Option<u32>,
    /// Offset of the next byte to deliver.
    delivered: u64,
    pending: BTreeMap<u64, Bytes>,
    /// Segments seen before the origin, keyed by signed distance from `anchor`.
    early: BTreeMap<i64, Bytes>,
    anchor: Option<u32>,
    /// Sequence number right after an early FIN.
    early_fin: Option<u32>,
    buffered: usize,
    fin_at: Option<u64>,
    duplicate_bytes: u64,
}

impl HalfStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes delivered so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Out-of-order bytes currently held.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Retransmitted bytes that were already delivered or already buffered.
    pub fn duplicate_bytes(&self) -> u64 {
        self.duplicate_bytes
    }

    pub fn origin(&self) -> Option<u32> {
        self.origin
    }

    pub fn next_seq(&self) -> Option<u32> {
        self.next_seq
    }

    /// Feed one segment, passing every newly contiguous chunk to `emit` in order.
    pub fn accept<E>(
        &mut self,
        segment: &TcpSegment,
        max_buffered: usize,
        mut emit: E,
    ) -> Result<Progress, HalfError>
    where
        E: FnMut(Bytes) -> Result<(), SinkError>,
    {
        let data_seq = segment.seq.wrapping_add(u32::from(segment.flags.syn));

        if self.next_seq.is_none() {
            if segment.flags.syn {
                self.start(data_seq, max_buffered, &mut emit)?;
            } else if self.hold(data_seq, segment, max_buffered) {
                return Ok(Progress::Open);
            } else {
                let anchor = self.anchor.unwrap_or(data_seq);
                let current = distance(anchor, data_seq);
                let lowest = self.early.keys().next().map_or(current, |&k| k.min(current));
                self.start(anchor.wrapping_add(lowest as u32), max_buffered, &mut emit)?;
            }
        }

        self.place(data_seq, &segment.payload, segment.flags.fin, max_buffered, &mut emit)?;
        Ok(self.progress())
    }

    /// Without a SYN, take the lowest held sequence as the origin and
    /// deliver what is held. No-op once the origin is known.
    pub fn settle<E>(&mut self, mut emit: E) -> Result<Progress, HalfError>
    where
        E: FnMut(Bytes) -> Result<(), SinkError>,
    {
        if self.next_seq.is_none() {
            if let (Some(anchor), Some(&lowest)) = (self.anchor, self.early.keys().next()) {
                self.start(anchor.wrapping_add(lowest as u32), usize::MAX, &mut emit)?;
            }
        }
        Ok(self.progress())
    }

    fn progress(&self) -> Progress {
        if self.fin_at == Some(self.delivered) {
            Progress::Finished
        } else {
            Progress::Open
        }
    }

    /// Keep a segment that arrived before the origin. False if the limit
    /// would be passed; nothing is held then.
    fn hold(&mut self, data_seq: u32, segment: &TcpSegment, max_buffered: usize) -> bool {
        let anchor = *self.anchor.get_or_insert(data_seq);
        let payload = &segment.payload;
        if segment.flags.fin && self.early_fin.is_none() {
            self.early_fin = Some(data_seq.wrapping_add(payload.len() as u32));
        }
        if payload.is_empty() {
            return true;
        }

        let key = distance(anchor, data_seq);
        let replaced = self.early.get(&key).map_or(0, Bytes::len);
        if replaced >= payload.len() {
            self.duplicate_bytes += payload.len() as u64;
            return true;
        }
        let buffered = self.buffered - replaced + payload.len();
        if buffered > max_buffered {
            return false;
        }

        self.buffered = buffered;
        self.duplicate_bytes += replaced as u64;
        self.early.insert(key, payload.clone());
        true
    }

    /// Fix the origin and replay everything held before it.
    fn start<E>(&mut self, origin: u32, max_buffered: usize, emit: &mut E) -> Result<(), HalfError>
    where
        E: FnMut(Bytes) -> Result<(), SinkError>,
    {
        self.origin = Some(origin);
        self.next_seq = Some(origin);

        let anchor = self.anchor.unwrap_or(origin);
        let early = std::mem::take(&mut self.early);
        self.buffered -= early.values().map(Bytes::len).sum::<usize>();
        for (key, chunk) in early {
            self.place(anchor.wrapping_add(key as u32), &chunk, false, max_buffered, emit)?;
        }
        if let Some(fin_seq) = self.early_fin.take() {
            self.place(fin_seq, &Bytes::new(), true, max_buffered, emit)?;
        }
        Ok(())
    }

    /// Deliver or buffer one segment's payload relative to the known origin.
    fn place<E>(
        &mut self,
        data_seq: u32,
        payload: &Bytes,
        fin: bool,
        max_buffered: usize,
        emit: &mut E,
    ) -> Result<(), HalfError>
    where
        E: FnMut(Bytes) -> Result<(), SinkError>,
    {
        let Some(next_seq) = self.next_seq else {
            return Ok(());
        };

        // Signed distance handles sequence wrap-around.
        let offset = self.delivered as i64 + distance(next_seq, data_seq);
        let end = offset + payload.len() as i64;

        if fin && self.fin_at.is_none() && end >= self.delivered as i64 {
            self.fin_at = Some(end as u64);
        }

        if payload.is_empty() {
            return Ok(());
        }
        if end <= self.delivered as i64 {
            self.duplicate_bytes += payload.len() as u64;
        } else if offset <= self.delivered as i64 {
            let skip = (self.delivered as i64 - offset) as usize;
            self.duplicate_bytes += skip as u64;
            self.push(payload.slice(skip..), emit)?;
            self.drain(emit)?;
        } else {
            self.buffer(offset as u64, payload.clone(), max_buffered)?;
        }
        Ok(())
    }

    fn push<E>(&mut self, chunk: Bytes, emit: &mut E) -> Result<(), HalfError>
    where
        E: FnMut(Bytes) -> Result<(), SinkError>,
    {
        let len = chunk.len();
        emit(chunk)?;
        self.delivered += len as u64;
        self.next_seq = self.next_seq.map(|seq| seq.wrapping_add(len as u32));
        Ok(())
    }

    fn drain<E>(&mut self, emit: &mut E) -> Result<(), HalfError>
    where
        E: FnMut(Bytes) -> Result<(), SinkError>,
    {
        while let Some((&offset, _)) = self.pending.first_key_value() {
            if offset > self.delivered {
                break;
            }
            let Some((_, chunk)) = self.pending.pop_first() else {
                break;
            };
            self.buffered -= chunk.len();

            let end = offset + chunk.len() as u64;
            if end <= self.delivered {
                self.duplicate_bytes += chunk.len() as u64;
                continue;
            }
            let skip = (self.delivered - offset) as usize;
            self.duplicate_bytes += skip as u64;
            self.push(chunk.slice(skip..), emit)?;
        }
        Ok(())
    }

    fn buffer(&mut self, offset: u64, chunk: Bytes, max_buffered: usize) -> Result<(), HalfError> {
        if let Some(existing) = self.pending.get(&offset) {
            if existing.len() >= chunk.len() {
                self.duplicate_bytes += chunk.len() as u64;
                return Ok(());
            }
        }
        let replaced = self.pending.get(&offset).map_or(0, Bytes::len);
        let buffered = self.buffered - replaced + chunk.len();
        if buffered > max_buffered {
            return Err(HalfError::Overflow { buffered });
        }

        self.buffered = buffered;
        self.duplicate_bytes += replaced as u64;
        self.pending.insert(offset, chunk);
        Ok(())
    }
}

/// Signed sequence distance from `from` to `to`.
fn distance(from: u32, to: u32) -> i64 {
    i64::from(to.wrapping_sub(from) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::TcpFlags;
    use std::time::SystemTime;

    fn seg(seq: u32, data: &'static [u8]) -> TcpSegment {
        TcpSegment {
            src: "10.0.0.1:1000".parse().unwrap(),
            dst: "10.0.0.2:80".parse().unwrap(),
            seq,
            flags: TcpFlags { ack: true, ..TcpFlags::default() },
            payload: Bytes::from_static(data),
            timestamp: SystemTime::UNIX_EPOCH,
        }
    }

    fn syn(isn: u32) -> TcpSegment {
        let mut s = seg(isn, b"");
        s.flags = TcpFlags { syn: true, ..TcpFlags::default() };
        s
    }

    fn fin(seq: u32, data: &'static [u8]) -> TcpSegment {
        let mut s = seg(seq, data);
        s.flags.fin = true;
        s
    }

    fn run(half: &mut HalfStream, segments: &[TcpSegment]) -> Vec<u8> {
        let mut out = Vec::new();
        for s in segments {
            half.accept(s, 1 << 20, |b| {
                out.extend_from_slice(&b);
                Ok(())
            })
            .unwrap();
        }
        out
    }

    fn settle(half: &mut HalfStream) -> (Vec<u8>, Progress) {
        let mut out = Vec::new();
        let progress = half
            .settle(|b| {
                out.extend_from_slice(&b);
                Ok(())
            })
            .unwrap();
        (out, progress)
    }

    #[test]
    fn test_in_order() {
        let mut half = HalfStream::new();
        let out = run(&mut half, &[syn(99), seg(100, b"hello "), seg(106, b"world")]);
        assert_eq!(out, b"hello world");
        assert_eq!(half.delivered(), 11);
        assert_eq!(half.origin(), Some(100));
        assert_eq!(half.next_seq(), Some(111));
    }

    #[test]
    fn test_out_of_order_waits_for_gap() {
        let mut half = HalfStream::new();
        let out = run(&mut half, &[syn(99), seg(100, b"ab"), seg(104, b"ef"), seg(106, b"gh")]);
        assert_eq!(out, b"ab");
        assert_eq!(half.buffered(), 4);

        let out = run(&mut half, &[seg(102, b"cd")]);
        assert_eq!(out, b"cdefgh");
        assert_eq!(half.buffered(), 0);
    }

    #[test]
    fn test_retransmissions_are_not_redelivered() {
        let mut half = HalfStream::new();
        let out = run(
            &mut half,
            &[syn(0), seg(1, b"abcd"), seg(1, b"abcd"), seg(3, b"cdef"), seg(7, b"g"), seg(5, b"ef")],
        );
        assert_eq!(out, b"abcdefg");
        assert_eq!(half.duplicate_bytes(), 4 + 2 + 2);
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut half = HalfStream::new();
        let isn = u32::MAX - 3;
        let out = run(
            &mut half,
            &[syn(isn), seg(isn.wrapping_add(4), b"def"), seg(isn.wrapping_add(1), b"abc")],
        );
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn test_data_before_syn_is_kept() {
        let mut half = HalfStream::new();
        let isn = u32::MAX - 2;
        let out = run(&mut half, &[seg(isn.wrapping_add(4), b"def"), syn(isn)]);
        assert!(out.is_empty());
        assert_eq!(half.buffered(), 3);

        let out = run(&mut half, &[seg(isn.wrapping_add(1), b"abc")]);
        assert_eq!(out, b"abcdef");
        assert_eq!(half.buffered(), 0);
    }

    #[test]
    fn test_without_syn_waits_for_settle() {
        let mut half = HalfStream::new();
        let out = run(&mut half, &[seg(106, b"world"), seg(100, b"hello "), seg(106, b"world")]);
        assert!(out.is_empty());
        assert_eq!(half.origin(), None);

        let (out, progress) = settle(&mut half);
        assert_eq!(out, b"hello world");
        assert_eq!(progress, Progress::Open);
        assert_eq!(half.origin(), Some(100));
        assert_eq!(half.duplicate_bytes(), 5);
    }

    #[test]
    fn test_settle_with_early_fin() {
        let mut half = HalfStream::new();
        run(&mut half, &[fin(103, b"d"), seg(100, b"abc")]);
        let (out, progress) = settle(&mut half);
        assert_eq!(out, b"abcd");
        assert_eq!(progress, Progress::Finished);
    }

    #[test]
    fn test_early_fin_completes_once_syn_arrives() {
        let mut half = HalfStream::new();
        let mut finished = None;
        for s in [fin(104, b""), seg(102, b"cd"), syn(99), seg(100, b"ab")] {
            finished = Some(half.accept(&s, 1024, |_| Ok(())).unwrap());
        }
        assert_eq!(finished, Some(Progress::Finished));
        assert_eq!(half.delivered(), 4);
    }

    #[test]
    fn test_hold_limit_starts_from_lowest() {
        let mut half = HalfStream::new();
        let mut out = Vec::new();
        for s in [seg(102, b"cd"), seg(100, b"ab"), seg(104, b"ef")] {
            half.accept(&s, 4, |b| {
                out.extend_from_slice(&b);
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(out, b"abcdef");
        assert_eq!(half.buffered(), 0);
    }

    #[test]
    fn test_syn_starts_after_isn() {
        let mut half = HalfStream::new();
        let out = run(&mut half, &[syn(500), seg(502, b"b"), seg(501, b"a")]);
        assert_eq!(out, b"ab");
    }

    #[test]
    fn test_fin_after_all_bytes() {
        let mut half = HalfStream::new();
        half.accept(&syn(99), 1024, |_| Ok(())).unwrap();

        let progress = half.accept(&seg(100, b"a"), 1024, |_| Ok(())).unwrap();
        assert_eq!(progress, Progress::Open);
        let progress = half.accept(&fin(103, b"d"), 1024, |_| Ok(())).unwrap();
        assert_eq!(progress, Progress::Open);
        let progress = half.accept(&seg(101, b"bc"), 1024, |_| Ok(())).unwrap();
        assert_eq!(progress, Progress::Finished);
    }

    #[test]
    fn test_overflow() {
        let mut half = HalfStream::new();
        half.accept(&syn(99), 4, |_| Ok(())).unwrap();
        half.accept(&seg(100, b"a"), 4, |_| Ok(())).unwrap();
        half.accept(&seg(110, b"bbb"), 4, |_| Ok(())).unwrap();
        let err = half.accept(&seg(120, b"cc"), 4, |_| Ok(())).unwrap_err();
        assert_eq!(err, HalfError::Overflow { buffered: 5 });
    }

    #[test]
    fn test_sink_error_propagates() {
        let mut half = HalfStream::new();
        half.accept(&syn(0), 4, |_| Ok(())).unwrap();
        let err = half
            .accept(&seg(1, b"a"), 4, |_| Err(SinkError::Closed))
            .unwrap_err();
        assert_eq!(err, HalfError::Sink(SinkError::Closed));
    }
}
