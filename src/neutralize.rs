//! Kernel-socket neutralization (§4.1 step 7, §6.3).
//!
//! The kernel TCP connection is only kept alive to perform the real
//! handshake and sustain NAT/conntrack state; its own transmissions must
//! never reach the remote, or the remote's kernel would see two
//! conflicting senders. Setting outbound TTL/hop-limit to zero makes every
//! kernel-originated segment die at the first hop. The receive path is left
//! alone and drained continuously so the kernel's receive buffer never
//! fills and stalls the connection.

use socket2::Socket;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::{trace, warn};

use crate::error::{Error, Result};

/// Sets the per-socket outbound TTL (IPv4) or hop-limit (IPv6) to zero and
/// hands the stream back. Round-trips through `std::net::TcpStream` so the
/// option is set via `socket2`'s safe `From` conversion rather than raw fd
/// manipulation.
pub fn neutralize_outbound(stream: TcpStream, is_ipv6: bool) -> Result<TcpStream> {
    let std_stream = stream
        .into_std()
        .map_err(|e| Error::ttl_neutralization_failed(e.to_string()))?;
    let socket = Socket::from(std_stream);
    if is_ipv6 {
        socket
            .set_unicast_hops_v6(0)
            .map_err(|e| Error::ttl_neutralization_failed(e.to_string()))?;
    } else {
        socket
            .set_ttl(0)
            .map_err(|e| Error::ttl_neutralization_failed(e.to_string()))?;
    }
    let std_stream: std::net::TcpStream = socket.into();
    std_stream
        .set_nonblocking(true)
        .map_err(|e| Error::ttl_neutralization_failed(e.to_string()))?;
    TcpStream::from_std(std_stream).map_err(|e| Error::ttl_neutralization_failed(e.to_string()))
}

/// Spawns the background task that reads and discards everything the
/// kernel delivers on `stream` (§4.1 step 8), so its receive buffer never
/// backs up. Exits when the socket is closed or errors.
///
/// Takes the read half only: the write half stays with the endpoint purely
/// so the kernel socket stays open (and therefore NAT/conntrack state
/// stays live) until `Close`, even though the endpoint never writes
/// through it directly.
pub fn spawn_drain_task(mut stream: OwnedReadHalf) {
    tokio::spawn(async move {
        let mut sink = [0u8; 4096];
        loop {
            match stream.read(&mut sink).await {
                Ok(0) => {
                    trace!("kernel drain task observed EOF");
                    break;
                }
                Ok(n) => trace!(bytes = n, "drained kernel-delivered bytes"),
                Err(e) => {
                    warn!(error = %e, "kernel drain task exiting on read error");
                    break;
                }
            }
        }
    });
}
