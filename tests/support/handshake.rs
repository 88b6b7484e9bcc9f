//! Builds raw IPv4-over-loopback TCP segments, standing in for the frames a
//! real kernel TCP handshake would have produced — used to seed a
//! `MockChannel`'s capture queue before any `HeaderTemplates` exist to
//! build through the production `Injector`.

use std::net::{Ipv4Addr, SocketAddr};

use nyx_pktconn::capture::{LinkType, RawFrame};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, MutableIpv4Packet};
use pnet::packet::tcp::{self, MutableTcpPacket};
use pnet::packet::Packet as _;

const LOOPBACK_ADDRESS_FAMILY: u32 = 2; // AF_INET, matching Linux's loopback DLT framing

pub fn ipv4_of(addr: SocketAddr) -> Ipv4Addr {
    match addr.ip() {
        std::net::IpAddr::V4(v4) => v4,
        std::net::IpAddr::V6(_) => panic!("handshake helper only builds IPv4 segments"),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_segment(
    src_ip: Ipv4Addr,
    src_port: u16,
    dst_ip: Ipv4Addr,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    payload: &[u8],
) -> RawFrame {
    let tcp_len = 20 + payload.len();
    let mut tcp_buf = vec![0u8; tcp_len];
    {
        let mut tcp = MutableTcpPacket::new(&mut tcp_buf).expect("buffer sized for tcp header + payload");
        tcp.set_source(src_port);
        tcp.set_destination(dst_port);
        tcp.set_sequence(seq);
        tcp.set_acknowledgement(ack);
        tcp.set_data_offset(5);
        tcp.set_flags(flags);
        tcp.set_window(0xffff);
        tcp.set_payload(payload);
        let checksum = tcp::ipv4_checksum(&tcp.to_immutable(), &src_ip, &dst_ip);
        tcp.set_checksum(checksum);
    }

    let total_len = 20 + tcp_len;
    let mut ip_buf = vec![0u8; total_len];
    {
        let mut ip = MutableIpv4Packet::new(&mut ip_buf).expect("buffer sized for ipv4 header");
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length(total_len as u16);
        ip.set_ttl(64);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
        ip.set_source(src_ip);
        ip.set_destination(dst_ip);
        ip.set_payload(&tcp_buf);
        let checksum = ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(checksum);
    }

    let mut frame = Vec::with_capacity(4 + total_len);
    frame.extend_from_slice(&LOOPBACK_ADDRESS_FAMILY.to_ne_bytes());
    frame.extend_from_slice(&ip_buf);

    RawFrame { link_type: LinkType::Loopback, data: frame }
}
