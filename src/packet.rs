//! The unit delivered across the endpoint boundary.

use std::net::SocketAddr;

/// An inbound datagram queued for a caller's `read_from`, or the payload
/// handed to `write_to`.
#[derive(Debug, Clone)]
pub struct Packet {
    pub payload: Vec<u8>,
    pub peer: SocketAddr,
}

impl Packet {
    pub fn new(payload: Vec<u8>, peer: SocketAddr) -> Self {
        Self { payload, peer }
    }

    /// Copies up to `buf.len()` bytes into `buf`, truncating silently if the
    /// payload is larger. Mirrors `std::net::UdpSocket::recv_from`.
    pub fn copy_into(&self, buf: &mut [u8]) -> usize {
        let n = self.payload.len().min(buf.len());
        buf[..n].copy_from_slice(&self.payload[..n]);
        n
    }
}
