//! Client side of the pseudo-datagram conversation (§4.1).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::info;

use crate::capture::CaptureChannel;
use crate::capture_loop;
use crate::error::{Error, Result};
use crate::flow::FlowState;
use crate::headers::ReadyTemplates;
use crate::iface;
use crate::inject::build_frame;
use crate::neutralize;
use crate::packet::Packet;
use crate::pcap_channel;
use crate::shutdown::Shutdown;
use crate::PacketConn;

const RECV_QUEUE_CAPACITY: usize = 256;

/// One outbound kernel-backed conversation with a single remote peer.
///
/// Concurrent `write_to` callers race on the shared `seq` counter: each
/// advance is atomic, but two simultaneous writes may reach the wire in
/// the opposite order from their sequence assignment. Callers needing
/// ordered delivery must serialize their own writes (§9 open question 3).
pub struct ActiveEndpoint {
    local_addr: SocketAddr,
    flow: Arc<FlowState>,
    templates: Arc<ReadyTemplates>,
    channel: Arc<dyn CaptureChannel>,
    rx: AsyncMutex<mpsc::Receiver<Packet>>,
    shutdown: Arc<Shutdown>,
    /// Kept only so the kernel socket stays open (NAT/conntrack liveness)
    /// until `close`; the endpoint never writes through it.
    _kernel_write_half: OwnedWriteHalf,
}

impl ActiveEndpoint {
    /// Establishes the conversation described in §4.1 steps 1–9.
    pub async fn dial(remote_address: SocketAddr) -> Result<Self> {
        let local_addr = iface::route_probe_local_addr(remote_address)?;
        let iface = iface::find_interface_for_ip(local_addr.ip())?;

        let bpf_filter = format!(
            "tcp and src host {} and src port {} and dst host {} and dst port {}",
            remote_address.ip(),
            remote_address.port(),
            local_addr.ip(),
            local_addr.port(),
        );
        let channel: Arc<dyn CaptureChannel> = Arc::new(pcap_channel::open(&iface, &bpf_filter)?);

        let kernel_conn = TcpStream::connect(remote_address)
            .await
            .map_err(|e| Error::kernel_socket_failed(e.to_string()))?;
        let kernel_conn = neutralize::neutralize_outbound(kernel_conn, remote_address.is_ipv6())?;
        let (read_half, write_half) = kernel_conn.into_split();
        neutralize::spawn_drain_task(read_half);

        let endpoint = Self::from_parts(local_addr, channel, write_half);
        info!(%local_addr, %remote_address, "dialed pseudo-datagram conversation");
        Ok(endpoint)
    }

    /// Shared constructor behind `dial` and the test-only seam: wires the
    /// flow state, ready-templates latch, receive queue, and CaptureLoop
    /// task over a caller-supplied channel and kernel write half.
    fn from_parts(local_addr: SocketAddr, channel: Arc<dyn CaptureChannel>, kernel_write_half: OwnedWriteHalf) -> Self {
        let (tx, rx) = mpsc::channel(RECV_QUEUE_CAPACITY);
        let flow = Arc::new(FlowState::zeroed());
        let templates = Arc::new(ReadyTemplates::new());
        let shutdown = Arc::new(Shutdown::new());

        tokio::spawn(capture_loop::run_active(
            channel.clone(),
            flow.clone(),
            templates.clone(),
            tx,
            shutdown.clone(),
        ));

        Self {
            local_addr,
            flow,
            templates,
            channel,
            rx: AsyncMutex::new(rx),
            shutdown,
            _kernel_write_half: kernel_write_half,
        }
    }

    /// Test-only seam (§8): wires the real CaptureLoop/state-machine code
    /// over a caller-supplied `CaptureChannel`, bypassing real interface
    /// discovery and BPF install so integration tests can drive this
    /// endpoint without root or a live NIC. `kernel_write_half` still comes
    /// from a real (if throwaway) kernel TCP connection, since this crate
    /// does not model the kernel socket itself behind a trait.
    #[cfg(feature = "test-util")]
    pub fn for_testing(local_addr: SocketAddr, channel: Arc<dyn CaptureChannel>, kernel_write_half: OwnedWriteHalf) -> Self {
        Self::from_parts(local_addr, channel, kernel_write_half)
    }

    fn local_port(&self) -> u16 {
        self.local_addr.port()
    }
}

#[async_trait::async_trait]
impl PacketConn for ActiveEndpoint {
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
        let seq = self.flow.seq();
        let ack = self.flow.ack();
        let frame = build_frame(templates, self.local_port(), peer, seq, ack, payload);

        let channel = self.channel.clone();
        tokio::task::spawn_blocking(move || channel.inject(&frame))
            .await
            .map_err(|e| Error::inject_failed(e.to_string()))??;

        self.flow.advance_seq(payload.len() as u32);
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

impl Drop for ActiveEndpoint {
    fn drop(&mut self) {
        if self.shutdown.begin_close() {
            self.shutdown.broadcast();
        }
    }
}
