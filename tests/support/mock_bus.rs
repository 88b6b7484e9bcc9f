//! A shared in-process "wire" for one `PassiveEndpoint` talking to several
//! `ActiveEndpoint`s (§8 scenario S4): a single ingress queue the passive
//! side captures from, and a registry routing the passive side's outbound
//! frames back to whichever active registered that destination port.

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nyx_pktconn::capture::{CaptureChannel, LinkType, RawFrame};
use nyx_pktconn::error::Result;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::Packet as _;

const LOOPBACK_HEADER_LEN: usize = 4;

fn dst_port(frame: &[u8]) -> Option<u16> {
    let ip = Ipv4Packet::new(frame.get(LOOPBACK_HEADER_LEN..)?)?;
    let tcp = TcpPacket::new(ip.payload())?;
    Some(tcp.get_destination())
}

#[derive(Default)]
pub struct MockBus {
    routes: Arc<Mutex<HashMap<u16, SyncSender<RawFrame>>>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the passive side's channel plus the sender its active peers
    /// must seed/deliver frames into for the passive CaptureLoop to see them.
    pub fn passive_channel(&self) -> (MockPassiveChannel, SyncSender<RawFrame>) {
        let (tx, rx) = sync_channel(256);
        (
            MockPassiveChannel { inbound: Mutex::new(rx), routes: self.routes.clone() },
            tx,
        )
    }

    /// Registers an active peer under `local_port` and returns its channel
    /// plus the sender for seeding its own capture queue directly.
    pub fn active_channel(&self, local_port: u16, ingress: SyncSender<RawFrame>) -> (MockActiveChannel, SyncSender<RawFrame>) {
        let (tx, rx) = sync_channel(256);
        self.routes.lock().unwrap_or_else(|e| e.into_inner()).insert(local_port, tx.clone());
        (MockActiveChannel { outbound_to_passive: ingress, inbound: Mutex::new(rx) }, tx)
    }
}

pub struct MockPassiveChannel {
    inbound: Mutex<Receiver<RawFrame>>,
    routes: Arc<Mutex<HashMap<u16, SyncSender<RawFrame>>>>,
}

impl CaptureChannel for MockPassiveChannel {
    fn recv_frame(&self, timeout: Duration) -> Result<Option<RawFrame>> {
        let guard = self.inbound.lock().unwrap_or_else(|e| e.into_inner());
        match guard.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn inject(&self, frame: &[u8]) -> Result<()> {
        if let Some(port) = dst_port(frame) {
            if let Some(tx) = self.routes.lock().unwrap_or_else(|e| e.into_inner()).get(&port) {
                let _ = tx.send(RawFrame { link_type: LinkType::Loopback, data: frame.to_vec() });
            }
        }
        Ok(())
    }
}

pub struct MockActiveChannel {
    outbound_to_passive: SyncSender<RawFrame>,
    inbound: Mutex<Receiver<RawFrame>>,
}

impl CaptureChannel for MockActiveChannel {
    fn recv_frame(&self, timeout: Duration) -> Result<Option<RawFrame>> {
        let guard = self.inbound.lock().unwrap_or_else(|e| e.into_inner());
        match guard.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn inject(&self, frame: &[u8]) -> Result<()> {
        let _ = self.outbound_to_passive.send(RawFrame { link_type: LinkType::Loopback, data: frame.to_vec() });
        Ok(())
    }
}
