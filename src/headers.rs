//! Frozen link/network header templates (§3 `HeaderTemplates`) and the
//! one-shot latch that gates emission until they exist (§4.5 `READY`).

use std::net::{Ipv4Addr, Ipv6Addr};

use once_cell::sync::OnceCell;
use pnet::packet::ethernet::{EtherType, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::Packet as _;
use pnet::util::MacAddr;
use tokio::sync::Notify;

/// Reversed link-layer header used for every outbound emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTemplate {
    Ethernet {
        ethertype: EtherType,
        src_mac: MacAddr,
        dst_mac: MacAddr,
    },
    /// BSD-style loopback framing: a 4-byte address-family tag ahead of the
    /// IP packet instead of an Ethernet header.
    Loopback { address_family: u32 },
}

impl LinkTemplate {
    /// Builds the reversed template from an observed Ethernet frame: our
    /// destination becomes our future source, and vice versa.
    pub fn from_observed_ethernet(observed: &EthernetPacket<'_>) -> Self {
        Self::Ethernet {
            ethertype: observed.get_ethertype(),
            src_mac: observed.get_destination(),
            dst_mac: observed.get_source(),
        }
    }

    pub fn from_observed_loopback(address_family: u32) -> Self {
        Self::Loopback { address_family }
    }
}

/// Reversed network-layer header used for every outbound emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkTemplate {
    V4 {
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        protocol: IpNextHeaderProtocol,
        id: u16,
    },
    V6 {
        src_ip: Ipv6Addr,
        dst_ip: Ipv6Addr,
        next_header: IpNextHeaderProtocol,
    },
}

impl NetworkTemplate {
    pub fn from_observed_v4(observed: &Ipv4Packet<'_>) -> Self {
        Self::V4 {
            src_ip: observed.get_destination(),
            dst_ip: observed.get_source(),
            protocol: observed.get_next_level_protocol(),
            id: observed.get_identification(),
        }
    }

    pub fn from_observed_v6(observed: &Ipv6Packet<'_>) -> Self {
        Self::V6 {
            src_ip: observed.get_destination(),
            dst_ip: observed.get_source(),
            next_header: observed.get_next_header(),
        }
    }
}

/// The frozen pair captured once from the first observed frame (§3).
#[derive(Debug, Clone)]
pub struct HeaderTemplates {
    pub link: LinkTemplate,
    pub network: NetworkTemplate,
}

/// Write-once, read-many cell for `HeaderTemplates` plus the notification
/// that wakes `WriteTo` callers blocked in `INITIALIZING` (§4.5).
///
/// Mirrors the `once_cell::sync::OnceCell` + wake pattern `nyx-transport`
/// already uses for its lazily-discovered Teredo address.
#[derive(Debug, Default)]
pub struct ReadyTemplates {
    cell: OnceCell<HeaderTemplates>,
    notify: Notify,
}

impl ReadyTemplates {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    /// Non-blocking peek, used by `WriteTo` once ready.
    pub fn get(&self) -> Option<&HeaderTemplates> {
        self.cell.get()
    }

    pub fn is_ready(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Fires the one-shot latch. Returns `true` exactly once, for the
    /// CaptureLoop invocation that won the race (§4.3 step 4).
    pub fn set(&self, templates: HeaderTemplates) -> bool {
        let won = self.cell.set(templates).is_ok();
        if won {
            self.notify.notify_waiters();
        }
        won
    }

    /// Blocks until the templates exist, then returns them. Also wakes up on
    /// every `notify_waiters()` call so a waiter that subscribed just before
    /// `set()` fired never misses the wakeup (classic check-then-wait loop).
    pub async fn wait(&self) -> &HeaderTemplates {
        loop {
            if let Some(t) = self.cell.get() {
                return t;
            }
            let notified = self.notify.notified();
            if let Some(t) = self.cell.get() {
                return t;
            }
            notified.await;
        }
    }
}
