//! Outbound frame serialization (§4.4 Injector).
//!
//! Builds link || network || TCP || payload with auto-filled length fields
//! and checksums computed through `pnet`'s packet builders — the same crate
//! the rest of the example corpus reaches for when it needs to hand-craft a
//! wire-format frame, rather than a bespoke one's-complement routine.

use std::net::SocketAddr;

use pnet::packet::ethernet::MutableEthernetPacket;
use pnet::packet::ipv4::{self, MutableIpv4Packet};
use pnet::packet::ipv6::MutableIpv6Packet;
use pnet::packet::tcp::{self, MutableTcpPacket, TcpFlags};
use pnet::packet::Packet as _;

use crate::headers::{HeaderTemplates, LinkTemplate, NetworkTemplate};

const ETHERNET_HEADER_LEN: usize = 14;
const LOOPBACK_HEADER_LEN: usize = 4;
const IPV4_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const TCP_HEADER_LEN: usize = 20;

/// The window value every crafted segment carries (§4.1: the remote ignores
/// it, since it too bypasses its kernel TCP stack for transmission).
pub const ARBITRARY_WINDOW: u16 = 0xFFFF;

/// Always PSH|ACK (§6.4): PSH marks "data-bearing" to the peer's
/// CaptureLoop, ACK is required for a segment past the handshake to be
/// accepted by any observer validating the conversation.
pub const SEGMENT_FLAGS: u8 = TcpFlags::PSH | TcpFlags::ACK;

/// Builds one outbound frame for `payload` addressed to `peer`, using the
/// endpoint's frozen header templates and the flow's current `(seq, ack)`
/// snapshot (§4.1 `WriteTo`).
pub fn build_frame(
    templates: &HeaderTemplates,
    local_port: u16,
    peer: SocketAddr,
    seq: u32,
    ack: u32,
    payload: &[u8],
) -> Vec<u8> {
    let tcp_segment = build_tcp_segment(&templates.network, local_port, peer.port(), seq, ack, payload);

    let (network_bytes, protocol_len) = match &templates.network {
        NetworkTemplate::V4 { src_ip, dst_ip, protocol, id } => {
            let total_len = IPV4_HEADER_LEN + tcp_segment.len();
            let mut buf = vec![0u8; total_len];
            {
                let mut ip = MutableIpv4Packet::new(&mut buf).expect("buffer sized for ipv4 header");
                ip.set_version(4);
                ip.set_header_length((IPV4_HEADER_LEN / 4) as u8);
                ip.set_total_length(total_len as u16);
                ip.set_identification(*id);
                ip.set_flags(ipv4::Ipv4Flags::DontFragment);
                ip.set_ttl(64);
                ip.set_next_level_protocol(*protocol);
                ip.set_source(*src_ip);
                ip.set_destination(*dst_ip);
                ip.set_payload(&tcp_segment);
                let checksum = ipv4::checksum(&ip.to_immutable());
                ip.set_checksum(checksum);
            }
            (buf, total_len)
        }
        NetworkTemplate::V6 { src_ip, dst_ip, next_header } => {
            let total_len = IPV6_HEADER_LEN + tcp_segment.len();
            let mut buf = vec![0u8; total_len];
            {
                let mut ip = MutableIpv6Packet::new(&mut buf).expect("buffer sized for ipv6 header");
                ip.set_version(6);
                ip.set_payload_length(tcp_segment.len() as u16);
                ip.set_next_header(*next_header);
                ip.set_hop_limit(64);
                ip.set_source(*src_ip);
                ip.set_destination(*dst_ip);
                ip.set_payload(&tcp_segment);
            }
            (buf, total_len)
        }
    };

    match &templates.link {
        LinkTemplate::Ethernet { ethertype, src_mac, dst_mac } => {
            let total_len = ETHERNET_HEADER_LEN + protocol_len;
            let mut buf = vec![0u8; total_len];
            {
                let mut eth = MutableEthernetPacket::new(&mut buf).expect("buffer sized for ethernet header");
                eth.set_ethertype(*ethertype);
                eth.set_source(*src_mac);
                eth.set_destination(*dst_mac);
                eth.set_payload(&network_bytes);
            }
            buf
        }
        LinkTemplate::Loopback { address_family } => {
            let mut buf = Vec::with_capacity(LOOPBACK_HEADER_LEN + protocol_len);
            buf.extend_from_slice(&address_family.to_ne_bytes());
            buf.extend_from_slice(&network_bytes);
            buf
        }
    }
}

fn build_tcp_segment(
    network: &NetworkTemplate,
    local_port: u16,
    peer_port: u16,
    seq: u32,
    ack: u32,
    payload: &[u8],
) -> Vec<u8> {
    let total_len = TCP_HEADER_LEN + payload.len();
    let mut buf = vec![0u8; total_len];
    {
        let mut tcp = MutableTcpPacket::new(&mut buf).expect("buffer sized for tcp header + payload");
        tcp.set_source(local_port);
        tcp.set_destination(peer_port);
        tcp.set_sequence(seq);
        tcp.set_acknowledgement(ack);
        tcp.set_data_offset((TCP_HEADER_LEN / 4) as u8);
        tcp.set_flags(SEGMENT_FLAGS);
        tcp.set_window(ARBITRARY_WINDOW);
        tcp.set_payload(payload);

        let checksum = match network {
            NetworkTemplate::V4 { src_ip, dst_ip, .. } => {
                tcp::ipv4_checksum(&tcp.to_immutable(), src_ip, dst_ip)
            }
            NetworkTemplate::V6 { src_ip, dst_ip, .. } => {
                tcp::ipv6_checksum(&tcp.to_immutable(), src_ip, dst_ip)
            }
        };
        tcp.set_checksum(checksum);
    }
    buf
}
