//! The raw-capture/injection seam (§6.2) and the frame parser CaptureLoop
//! runs over every captured frame (§4.3).
//!
//! `CaptureChannel` is this crate's half of the contract; `PcapChannel`
//! (production, `src/pcap_channel.rs`) and the in-memory test double
//! (`tests/support/mock_channel.rs`) are the two implementations.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::{TcpFlags, TcpPacket};
use pnet::packet::Packet as _;

use crate::error::Result;
use crate::headers::{LinkTemplate, NetworkTemplate};

/// Link type of a captured frame, analogous to a pcap `DLT_*` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    /// BSD-style loopback framing (4-byte address-family prefix, no
    /// Ethernet header).
    Loopback,
}

/// One frame handed back by a `CaptureChannel`.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub link_type: LinkType,
    pub data: Vec<u8>,
}

/// The raw-capture + injection facility this crate consumes (§6.2). Shared
/// as `Arc<dyn CaptureChannel>` between the one CaptureLoop task that polls
/// `recv_frame` and the potentially many concurrent `WriteTo` callers that
/// call `inject` — both methods take `&self`, so implementations own their
/// interior synchronization (the production implementation wraps a live
/// `pcap::Capture<Active>` handle behind a mutex; tests wrap an in-process
/// queue pair).
pub trait CaptureChannel: Send + Sync {
    /// Returns the next captured frame, or `None` on a read-timeout (not an
    /// error — the caller re-checks its shutdown signal and retries).
    fn recv_frame(&self, timeout: Duration) -> Result<Option<RawFrame>>;

    /// Injects a fully-serialized link-layer frame onto the wire.
    fn inject(&self, frame: &[u8]) -> Result<()>;
}

/// Everything CaptureLoop needs out of one parsed, data-bearing-or-not TCP
/// segment.
#[derive(Debug, Clone)]
pub struct ParsedSegment {
    pub peer: SocketAddr,
    pub flags: u8,
    pub seq: u32,
    pub ack: u32,
    pub payload: Vec<u8>,
    pub link_template: LinkTemplate,
    pub network_template: NetworkTemplate,
}

impl ParsedSegment {
    pub fn is_syn(&self) -> bool {
        self.flags & TcpFlags::SYN != 0
    }
    pub fn is_psh(&self) -> bool {
        self.flags & TcpFlags::PSH != 0
    }
    pub fn is_fin(&self) -> bool {
        self.flags & TcpFlags::FIN != 0
    }
}

/// Parses link, network, and transport layers out of a captured frame.
/// Returns `None` on any parse failure, including a frame whose link or
/// network layer cannot be identified at all — the redesign adopted for
/// open question 2 in §9: such frames never reach the TCP parser rather
/// than risking a dereference of a missing layer.
pub fn parse(frame: &RawFrame) -> Option<ParsedSegment> {
    let (link_template, ip_payload) = match frame.link_type {
        LinkType::Ethernet => {
            let eth = EthernetPacket::new(&frame.data)?;
            if !matches!(eth.get_ethertype(), EtherTypes::Ipv4 | EtherTypes::Ipv6) {
                return None;
            }
            let template = LinkTemplate::from_observed_ethernet(&eth);
            (template, eth.payload().to_vec())
        }
        LinkType::Loopback => {
            if frame.data.len() < 4 {
                return None;
            }
            let family = u32::from_ne_bytes(frame.data[0..4].try_into().ok()?);
            let template = LinkTemplate::from_observed_loopback(family);
            (template, frame.data[4..].to_vec())
        }
    };

    let version_nibble = ip_payload.first()? >> 4;
    let (network_template, src_ip, tcp_bytes) = match version_nibble {
        4 => {
            let ip = Ipv4Packet::new(&ip_payload)?;
            if ip.get_next_level_protocol() != pnet::packet::ip::IpNextHeaderProtocols::Tcp {
                return None;
            }
            let template = NetworkTemplate::from_observed_v4(&ip);
            (template, IpAddr::V4(ip.get_source()), ip.payload().to_vec())
        }
        6 => {
            let ip = Ipv6Packet::new(&ip_payload)?;
            if ip.get_next_header() != pnet::packet::ip::IpNextHeaderProtocols::Tcp {
                return None;
            }
            let template = NetworkTemplate::from_observed_v6(&ip);
            (template, IpAddr::V6(ip.get_source()), ip.payload().to_vec())
        }
        _ => return None,
    };

    let tcp = TcpPacket::new(&tcp_bytes)?;
    let peer = SocketAddr::new(src_ip, tcp.get_source());

    Some(ParsedSegment {
        peer,
        flags: tcp.get_flags(),
        seq: tcp.get_sequence(),
        ack: tcp.get_acknowledgement(),
        payload: tcp.payload().to_vec(),
        link_template,
        network_template,
    })
}
