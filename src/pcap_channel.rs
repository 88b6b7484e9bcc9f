//! `CaptureChannel` over a live `pcap::Capture<Active>` handle (§6.2).
//!
//! `Capture::sendpacket` takes `&mut self`, but `CaptureChannel::inject`
//! takes `&self` so concurrent `WriteTo` callers can all reach it. The
//! handle is therefore kept behind a `std::sync::Mutex`: libpcap's C handle
//! isn't documented as safe for concurrent `pcap_sendpacket`, and the mutex
//! also covers the occasional `recv_frame` call from the CaptureLoop task
//! that owns this channel.

use std::sync::Mutex;
use std::time::Duration;

use pcap::{Active, Capture, Device};
use pnet_datalink::NetworkInterface;
use tracing::trace;

use crate::capture::{CaptureChannel, LinkType, RawFrame};
use crate::error::{Error, Result};

/// Opens a live capture on `iface` with the snapshot length, promiscuous
/// mode, and read timeout fixed by §4.1 step 4, installs `bpf_filter`, and
/// wraps it for use as a `CaptureChannel`.
pub fn open(iface: &NetworkInterface, bpf_filter: &str) -> Result<PcapChannel> {
    let device = Device::list()
        .map_err(|e| Error::capture_open_failed(e.to_string()))?
        .into_iter()
        .find(|d| d.name == iface.name)
        .ok_or_else(|| Error::capture_open_failed(format!("no pcap device named {}", iface.name)))?;

    let mut capture = Capture::from_device(device)
        .map_err(|e| Error::capture_open_failed(e.to_string()))?
        .snaplen(65536)
        .promisc(true)
        .timeout(1000)
        .open()
        .map_err(|e| Error::capture_open_failed(e.to_string()))?;

    capture
        .filter(bpf_filter, true)
        .map_err(|e| Error::filter_install_failed(e.to_string()))?;

    let link_type = match capture.get_datalink() {
        pcap::Linktype(0) => LinkType::Loopback,
        _ => LinkType::Ethernet,
    };

    Ok(PcapChannel {
        capture: Mutex::new(capture),
        link_type,
    })
}

pub struct PcapChannel {
    capture: Mutex<Capture<Active>>,
    link_type: LinkType,
}

impl CaptureChannel for PcapChannel {
    fn recv_frame(&self, timeout: Duration) -> Result<Option<RawFrame>> {
        // The handle's own read timeout is fixed at open time (~1s, §4.1
        // step 4); CaptureLoop re-checks shutdown between calls rather than
        // retuning the handle per call.
        let _ = timeout;
        let mut guard = self.capture.lock().unwrap_or_else(|e| e.into_inner());
        match guard.next_packet() {
            Ok(packet) => Ok(Some(RawFrame {
                link_type: self.link_type,
                data: packet.data.to_vec(),
            })),
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => {
                trace!(error = %e, "pcap read failed");
                Err(Error::capture_open_failed(e.to_string()))
            }
        }
    }

    fn inject(&self, frame: &[u8]) -> Result<()> {
        let mut guard = self.capture.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .sendpacket(frame)
            .map_err(|e| Error::inject_failed(e.to_string()))
    }
}
