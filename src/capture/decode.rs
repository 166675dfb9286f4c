//! Frame decoding: link layer → IP → TCP.
//!
//! # Responsibilities
//! - Strip the link-layer header for the capture's datalink type
//! - Optionally unwrap one level of VXLAN (UDP/4789) encapsulation
//! - Produce a [`TcpSegment`] or reject the frame as unusable

use std::net::{IpAddr, SocketAddr};

use etherparse::{NetSlice, SlicedPacket, TransportSlice};

use crate::capture::packet::{Frame, TcpFlags, TcpSegment};

/// UDP port VXLAN is carried on.
pub const VXLAN_PORT: u16 = 4789;
const VXLAN_HEADER_LEN: usize = 8;
const VXLAN_FLAG_VNI: u8 = 0x08;

/// Datalink types the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Ethernet,
    RawIp,
    /// BSD loopback: 4-byte address family header.
    Null,
    /// Linux cooked capture v1: 16-byte header.
    LinuxSll,
    /// Linux cooked capture v2: 20-byte header.
    LinuxSll2,
}

impl LinkKind {
    /// Map a libpcap `LINKTYPE_*` value.
    pub fn from_linktype(linktype: i32) -> Option<Self> {
        match linktype {
            1 => Some(LinkKind::Ethernet),
            0 => Some(LinkKind::Null),
            12 | 14 | 101 => Some(LinkKind::RawIp),
            113 => Some(LinkKind::LinuxSll),
            276 => Some(LinkKind::LinuxSll2),
            _ => None,
        }
    }
}

/// Turns captured frames into TCP segments.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    link: LinkKind,
    decap_vxlan: bool,
}

impl Decoder {
    pub fn new(link: LinkKind, decap_vxlan: bool) -> Self {
        Self { link, decap_vxlan }
    }

    /// Decode one frame. `None` means the frame is not a usable TCP segment.
    pub fn decode(&self, frame: &Frame) -> Option<TcpSegment> {
        let sliced = slice(&frame.data, self.link)?;
        self.segment_from(sliced, frame, self.decap_vxlan)
    }

    fn segment_from(
        &self,
        sliced: SlicedPacket<'_>,
        frame: &Frame,
        decap: bool,
    ) -> Option<TcpSegment> {
        let (src_ip, dst_ip) = match &sliced.net {
            Some(NetSlice::Ipv4(ipv4)) => (
                IpAddr::V4(ipv4.header().source_addr()),
                IpAddr::V4(ipv4.header().destination_addr()),
            ),
            Some(NetSlice::Ipv6(ipv6)) => (
                IpAddr::V6(ipv6.header().source_addr()),
                IpAddr::V6(ipv6.header().destination_addr()),
            ),
            _ => return None,
        };

        match &sliced.transport {
            Some(TransportSlice::Tcp(tcp)) => {
                let payload = frame.data.slice_ref(tcp.payload());
                Some(TcpSegment {
                    src: SocketAddr::new(src_ip, tcp.source_port()),
                    dst: SocketAddr::new(dst_ip, tcp.destination_port()),
                    seq: tcp.sequence_number(),
                    flags: TcpFlags {
                        syn: tcp.syn(),
                        ack: tcp.ack(),
                        fin: tcp.fin(),
                        rst: tcp.rst(),
                    },
                    payload,
                    timestamp: frame.timestamp,
                })
            }
            Some(TransportSlice::Udp(udp)) if decap && udp.destination_port() == VXLAN_PORT => {
                let inner = vxlan_inner(udp.payload())?;
                let inner = SlicedPacket::from_ethernet(inner).ok()?;
                self.segment_from(inner, frame, false)
            }
            _ => None,
        }
    }
}

fn slice(data: &[u8], link: LinkKind) -> Option<SlicedPacket<'_>> {
    match link {
        LinkKind::Ethernet => SlicedPacket::from_ethernet(data).ok(),
        LinkKind::RawIp => SlicedPacket::from_ip(data).ok(),
        LinkKind::Null => SlicedPacket::from_ip(data.get(4..)?).ok(),
        LinkKind::LinuxSll => {
            let proto = u16::from_be_bytes([*data.get(14)?, *data.get(15)?]);
            ip_after(data, proto, 16)
        }
        LinkKind::LinuxSll2 => {
            let proto = u16::from_be_bytes([*data.first()?, *data.get(1)?]);
            ip_after(data, proto, 20)
        }
    }
}

fn ip_after(data: &[u8], proto: u16, offset: usize) -> Option<SlicedPacket<'_>> {
    match proto {
        0x0800 | 0x86DD => SlicedPacket::from_ip(data.get(offset..)?).ok(),
        _ => None,
    }
}

fn vxlan_inner(payload: &[u8]) -> Option<&[u8]> {
    if payload.len() <= VXLAN_HEADER_LEN || payload[0] & VXLAN_FLAG_VNI == 0 {
        return None;
    }
    Some(&payload[VXLAN_HEADER_LEN..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;
    use std::time::SystemTime;

    fn tcp_frame(payload: &[u8], dst_port: u16) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(40000, dst_port, 1000, 4096)
            .ack(1)
            .psh();
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).unwrap();
        out
    }

    #[test]
    fn test_decodes_ethernet_tcp() {
        let frame = Frame::new(tcp_frame(b"GET / HTTP/1.1\r\n", 80), SystemTime::UNIX_EPOCH);
        let segment = Decoder::new(LinkKind::Ethernet, true).decode(&frame).unwrap();

        assert_eq!(segment.src, "10.0.0.1:40000".parse().unwrap());
        assert_eq!(segment.dst, "10.0.0.2:80".parse().unwrap());
        assert_eq!(segment.seq, 1000);
        assert!(segment.flags.ack);
        assert!(!segment.flags.syn);
        assert_eq!(&segment.payload[..], b"GET / HTTP/1.1\r\n");
    }

    #[test]
    fn test_unwraps_vxlan() {
        let inner = tcp_frame(b"hello", 8080);
        let mut vxlan = vec![VXLAN_FLAG_VNI, 0, 0, 0, 0, 0, 42, 0];
        vxlan.extend_from_slice(&inner);

        let builder = PacketBuilder::ethernet2([9; 6], [8; 6])
            .ipv4([192, 168, 0, 1], [192, 168, 0, 2], 64)
            .udp(50000, VXLAN_PORT);
        let mut outer = Vec::new();
        builder.write(&mut outer, &vxlan).unwrap();

        let frame = Frame::new(outer, SystemTime::UNIX_EPOCH);
        let segment = Decoder::new(LinkKind::Ethernet, true).decode(&frame).unwrap();
        assert_eq!(segment.dst.port(), 8080);
        assert_eq!(&segment.payload[..], b"hello");

        assert!(Decoder::new(LinkKind::Ethernet, false).decode(&frame).is_none());
    }

    #[test]
    fn test_rejects_non_tcp() {
        let builder = PacketBuilder::ethernet2([9; 6], [8; 6])
            .ipv4([192, 168, 0, 1], [192, 168, 0, 2], 64)
            .udp(53, 53);
        let mut out = Vec::new();
        builder.write(&mut out, b"dns").unwrap();

        let frame = Frame::new(out, SystemTime::UNIX_EPOCH);
        assert!(Decoder::new(LinkKind::Ethernet, true).decode(&frame).is_none());
        assert!(Decoder::new(LinkKind::Ethernet, true)
            .decode(&Frame::new(vec![0u8; 6], SystemTime::UNIX_EPOCH))
            .is_none());
    }

    #[test]
    fn test_raw_ip_link() {
        let builder = PacketBuilder::ipv6([1; 16], [2; 16], 64).tcp(1234, 80, 7, 1024).syn();
        let mut out = Vec::new();
        builder.write(&mut out, &[]).unwrap();

        let frame = Frame::new(out, SystemTime::UNIX_EPOCH);
        let segment = Decoder::new(LinkKind::RawIp, true).decode(&frame).unwrap();
        assert!(segment.flags.syn);
        assert_eq!(segment.seq_len(), 1);
        assert!(segment.src.is_ipv6());
    }
}
