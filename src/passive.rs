//! Server side of the pseudo-datagram conversation (§4.2).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{info, warn};

use crate::capture::CaptureChannel;
use crate::capture_loop;
use crate::error::{Error, Result};
use crate::flow::FlowTable;
use crate::headers::ReadyTemplates;
use crate::iface;
use crate::inject::build_frame;
use crate::neutralize;
use crate::packet::Packet;
use crate::pcap_channel;
use crate::shutdown::Shutdown;
use crate::PacketConn;

const RECV_QUEUE_CAPACITY: usize = 256;

/// One listening conversation serving many remote peers (§4.2).
///
/// The header templates are captured from the *first* frame observed
/// globally on this endpoint, so they reflect whichever peer's
/// conversation reaches the capture handle first (§9 open question 4).
/// This is fine only when every peer's path shares this endpoint's single
/// interface — true for single-NIC deployments, the only topology this
/// crate targets; a multi-homed redesign is out of scope.
pub struct PassiveEndpoint {
    local_addr: SocketAddr,
    flows: Arc<FlowTable>,
    templates: Arc<ReadyTemplates>,
    channel: Arc<dyn CaptureChannel>,
    rx: AsyncMutex<mpsc::Receiver<Packet>>,
    shutdown: Arc<Shutdown>,
}

impl PassiveEndpoint {
    /// Establishes the listener described in §4.2: link/capture setup as in
    /// `ActiveEndpoint::dial` steps 3-5, a kernel listener in place of a
    /// kernel dial, and a background accept loop instead of a single drain
    /// task.
    pub async fn listen(local_address: SocketAddr) -> Result<Self> {
        let iface = iface::find_interface_for_ip(local_address.ip())?;

        let bpf_filter = format!(
            "tcp and dst host {} and dst port {}",
            local_address.ip(),
            local_address.port(),
        );
        let channel: Arc<dyn CaptureChannel> = Arc::new(pcap_channel::open(&iface, &bpf_filter)?);

        let listener = TcpListener::bind(local_address)
            .await
            .map_err(|e| Error::kernel_socket_failed(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::kernel_socket_failed(e.to_string()))?;

        let shutdown = Arc::new(Shutdown::new());
        tokio::spawn(run_accept_loop(listener, shutdown.clone()));

        let endpoint = Self::from_parts(local_addr, channel, shutdown);
        info!(%local_addr, "listening for pseudo-datagram conversations");
        Ok(endpoint)
    }

    /// Shared constructor behind `listen` and the test-only seam: wires the
    /// flow table, ready-templates latch, receive queue, and CaptureLoop
    /// task, but does not itself touch the kernel listener or accept loop.
    fn from_parts(local_addr: SocketAddr, channel: Arc<dyn CaptureChannel>, shutdown: Arc<Shutdown>) -> Self {
        let (tx, rx) = mpsc::channel(RECV_QUEUE_CAPACITY);
        let flows = Arc::new(FlowTable::new());
        let templates = Arc::new(ReadyTemplates::new());

        tokio::spawn(capture_loop::run_passive(
            channel.clone(),
            flows.clone(),
            templates.clone(),
            tx,
            shutdown.clone(),
        ));

        Self {
            local_addr,
            flows,
            templates,
            channel,
            rx: AsyncMutex::new(rx),
            shutdown,
        }
    }

    /// Test-only seam (§8): wires the real CaptureLoop/state-machine code
    /// over a caller-supplied `CaptureChannel`, bypassing the real kernel
    /// listener and link-interface discovery so integration tests can drive
    /// this endpoint without root or a live NIC.
    #[cfg(feature = "test-util")]
    pub fn for_testing(local_addr: SocketAddr, channel: Arc<dyn CaptureChannel>) -> Self {
        Self::from_parts(local_addr, channel, Arc::new(Shutdown::new()))
    }
}

/// Accepts kernel-side connections indefinitely, neutralizing each one's
/// outbound TTL/hop-limit and draining its receive side (§4.2). Exits on
/// shutdown or a terminal accept error.
async fn run_accept_loop(listener: TcpListener, shutdown: Arc<Shutdown>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let is_ipv6 = peer.is_ipv6();
                        match neutralize::neutralize_outbound(stream, is_ipv6) {
                            Ok(stream) => {
                                let (read_half, write_half) = stream.into_split();
                                neutralize::spawn_drain_task(read_half);
                                tokio::spawn(hold_write_half(write_half, shutdown.clone()));
                            }
                            Err(e) => warn!(error = %e, %peer, "failed to neutralize accepted connection"),
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed, accept loop exiting");
                        break;
                    }
                }
            }
            _ = shutdown.wait() => break,
        }
    }
}

/// Keeps an accepted connection's write half open only so the kernel socket
/// (and its NAT/conntrack state) stays alive; the endpoint never writes
/// through it. Dropped on shutdown.
async fn hold_write_half(_write_half: OwnedWriteHalf, shutdown: Arc<Shutdown>) {
    shutdown.wait().await;
}

#[async_trait::async_trait]
impl PacketConn for PassiveEndpoint {
    async fn read_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            maybe_packet = rx.recv() => {
                match maybe_packet {
                    Some(packet) => Ok((packet.copy_into(buf), packet.peer)),
                    None => Err(Error::Closed),
                }
            }
            _ = self.shutdown.wait() => Err(Error::Closed),
        }
    }

    async fn write_to(&self, payload: &[u8], peer: SocketAddr) -> Result<usize> {
        if self.shutdown.is_closed() {
            return Err(Error::Closed);
        }
        // Races the ready-templates wait against shutdown, same as `read_from`,
        // so a write blocked in INITIALIZING fails fast instead of hanging
        // once `close` is called (§4.5 DEAD, §5 Cancellation).
        let templates = tokio::select! {
            templates = self.templates.wait() => templates,
            _ = self.shutdown.wait() => return Err(Error::Closed),
        };
        // §4.2: an unknown peer gets a zero-initialized flow rather than an
        // error — the write will almost certainly be rejected by the
        // remote, which is a caller error this contract does not signal.
        let (seq, ack) = self.flows.with_entry_or_default(peer, |e| (e.seq, e.ack));
        let frame = build_frame(templates, self.local_addr.port(), peer, seq, ack, payload);

        let channel = self.channel.clone();
        tokio::task::spawn_blocking(move || channel.inject(&frame))
            .await
            .map_err(|e| Error::inject_failed(e.to_string()))??;

        let written = payload.len() as u32;
        self.flows
            .with_entry_or_default(peer, |e| e.seq = e.seq.wrapping_add(written));
        Ok(payload.len())
    }

    async fn close(&self) -> Result<()> {
        if self.shutdown.begin_close() {
            self.shutdown.broadcast();
        }
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn set_deadline(&self, _deadline: Option<std::time::Duration>) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn set_read_deadline(&self, _deadline: Option<std::time::Duration>) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn set_write_deadline(&self, _deadline: Option<std::time::Duration>) -> Result<()> {
        Err(Error::NotImplemented)
    }
}

impl Drop for PassiveEndpoint {
    fn drop(&mut self) {
        if self.shutdown.begin_close() {
            self.shutdown.broadcast();
        }
    }
}
