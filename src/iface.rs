//! Egress-interface discovery (§4.1 steps 2–3).
//!
//! Lets the OS routing table pick the path a real TCP connection would take
//! by "connecting" a throwaway UDP socket, then matches that local address
//! against `pnet_datalink`'s interface list.

use std::net::{IpAddr, SocketAddr, UdpSocket};

use pnet_datalink::NetworkInterface;
use tracing::debug;

use crate::error::{Error, Result};

/// Opens and immediately drops a UDP socket connected to `remote`, purely
/// to learn which local address the kernel would use for that destination.
pub fn route_probe_local_addr(remote: SocketAddr) -> Result<SocketAddr> {
    let bind_addr: SocketAddr = if remote.is_ipv4() {
        "0.0.0.0:0".parse().expect("valid wildcard v4 addr")
    } else {
        "[::]:0".parse().expect("valid wildcard v6 addr")
    };
    let socket = UdpSocket::bind(bind_addr)?;
    socket.connect(remote)?;
    let local = socket.local_addr()?;
    debug!(%remote, %local, "route probe resolved egress address");
    Ok(local)
}

/// Finds the `pnet_datalink` interface carrying `ip` as one of its assigned
/// addresses (§4.1 step 3: fails with *no-suitable-interface* if none
/// matches).
pub fn find_interface_for_ip(ip: IpAddr) -> Result<NetworkInterface> {
    pnet_datalink::interfaces()
        .into_iter()
        .find(|iface| iface.ips.iter().any(|net| net.ip() == ip))
        .ok_or(Error::NoSuitableInterface(ip))
}
