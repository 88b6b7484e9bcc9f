#![forbid(unsafe_code)]

//! Pseudo-datagram transport that rides the kernel's real TCP handshake.
//!
//! Two top-level entities expose the same [`PacketConn`] contract:
//! [`ActiveEndpoint`] dials one remote peer and tracks a single SEQ/ACK
//! pair; [`PassiveEndpoint`] listens for many and tracks one pair per peer.
//! Both let the kernel perform the genuine handshake (so NAT/firewall state
//! is established the ordinary way), then neutralize the kernel socket's
//! own transmissions and instead sniff and craft TCP segments at link
//! layer, so the wire traffic stays indistinguishable from an ordinary TCP
//! conversation while the two endpoints exchange discrete, message-boundary
//! preserving datagrams.
//!
//! * [`dial`] / [`listen`] are the entry points, mirroring `nyx-transport`'s
//!   `Transport::start`.
//! * [`capture::CaptureChannel`] is the seam over the raw capture/injection
//!   facility (§6.2 of the design): `pcap_channel::PcapChannel` in
//!   production, an in-memory test double in the integration suite.
//! * Construction and runtime failures are reported through [`Error`].

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::lookup_host;
use tracing::debug;

pub mod active;
pub mod capture;
pub mod capture_loop;
pub mod error;
pub mod flow;
pub mod headers;
pub mod iface;
pub mod inject;
pub mod neutralize;
pub mod packet;
pub mod passive;
pub mod pcap_channel;
pub mod shutdown;

pub use active::ActiveEndpoint;
pub use error::{Error, Result};
pub use packet::Packet;
pub use passive::PassiveEndpoint;

/// The packet-conn contract shared by [`ActiveEndpoint`] and
/// [`PassiveEndpoint`] (§6.1), so generic callers can hold a
/// `Box<dyn PacketConn>` without caring which side established the
/// conversation.
#[async_trait]
pub trait PacketConn: Send + Sync {
    /// Blocks until a datagram is available, copies up to `buf.len()`
    /// bytes into it (truncating silently if the payload is larger), and
    /// returns the byte count and the sender's address. Fails with
    /// [`Error::Closed`] once the endpoint has been closed.
    async fn read_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// Blocks until the endpoint's header templates are ready (first call
    /// only), then emits `payload` to `peer` as a single PSH|ACK segment.
    /// Returns `payload.len()` on success. Fails with [`Error::Closed`]
    /// once the endpoint has been closed.
    async fn write_to(&self, payload: &[u8], peer: SocketAddr) -> Result<usize>;

    /// Idempotent: releases all resources exactly once regardless of how
    /// many times it is called.
    async fn close(&self) -> Result<()>;

    /// The kernel-side local TCP address this endpoint is bound to.
    fn local_addr(&self) -> SocketAddr;

    /// Always returns [`Error::NotImplemented`] (§9 open question 5:
    /// deadlines are unimplemented by design).
    fn set_deadline(&self, deadline: Option<Duration>) -> Result<()>;

    /// Always returns [`Error::NotImplemented`].
    fn set_read_deadline(&self, deadline: Option<Duration>) -> Result<()>;

    /// Always returns [`Error::NotImplemented`].
    fn set_write_deadline(&self, deadline: Option<Duration>) -> Result<()>;
}

/// Dials one remote peer (§4.1). `network` must be `"tcp"`, `"tcp4"`, or
/// `"tcp6"`; `address` is a `"host:port"` pair resolved via the system
/// resolver before the real kernel connection is opened.
pub async fn dial(network: &str, address: &str) -> Result<ActiveEndpoint> {
    let remote = resolve(network, address).await?;
    ActiveEndpoint::dial(remote).await
}

/// Listens for inbound conversations on `address` (§4.2). Same `network`
/// contract as [`dial`].
pub async fn listen(network: &str, address: &str) -> Result<PassiveEndpoint> {
    let local = resolve(network, address).await?;
    PassiveEndpoint::listen(local).await
}

/// Validates `network` and resolves `address` to a single [`SocketAddr`],
/// preferring an address family match when `network` names one.
async fn resolve(network: &str, address: &str) -> Result<SocketAddr> {
    let want_v4 = match network {
        "tcp" => None,
        "tcp4" => Some(true),
        "tcp6" => Some(false),
        other => return Err(Error::resolve_failed(format!("unsupported network {other:?}"))),
    };

    let mut candidates = lookup_host(address)
        .await
        .map_err(|e| Error::resolve_failed(e.to_string()))?;

    let resolved = match want_v4 {
        None => candidates.next(),
        Some(want_v4) => candidates.find(|addr| addr.is_ipv4() == want_v4),
    }
    .ok_or_else(|| Error::resolve_failed(format!("no {network} address for {address:?}")))?;

    debug!(%network, %address, %resolved, "resolved peer address");
    Ok(resolved)
}
