//! An in-process `CaptureChannel` double for a single active/passive pair
//! (§8): whatever one side of a `pair()` injects becomes the next frame the
//! other side captures, so the real CaptureLoop/Injector/endpoint code runs
//! unmodified in tests, with only the raw capture facility swapped out.

use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Mutex;
use std::time::Duration;

use nyx_pktconn::capture::{CaptureChannel, LinkType, RawFrame};
use nyx_pktconn::error::Result;

pub struct MockChannel {
    outbound: SyncSender<RawFrame>,
    inbound: Mutex<Receiver<RawFrame>>,
    /// Feeds this channel's own `inbound` queue directly, bypassing the
    /// peer's `inject` — used to seed handshake frames a real kernel TCP
    /// connection would have produced before any traffic is exchanged.
    seed: SyncSender<RawFrame>,
}

impl MockChannel {
    pub fn pair() -> (MockChannel, MockChannel) {
        let (tx_ab, rx_ab) = sync_channel(64);
        let (tx_ba, rx_ba) = sync_channel(64);
        let a = MockChannel {
            outbound: tx_ab.clone(),
            inbound: Mutex::new(rx_ba),
            seed: tx_ba.clone(),
        };
        let b = MockChannel {
            outbound: tx_ba,
            inbound: Mutex::new(rx_ab),
            seed: tx_ab,
        };
        (a, b)
    }

    pub fn deliver(&self, frame: RawFrame) {
        self.seed.send(frame).expect("seed channel outlives the test");
    }
}

impl CaptureChannel for MockChannel {
    fn recv_frame(&self, timeout: Duration) -> Result<Option<RawFrame>> {
        let guard = self.inbound.lock().unwrap_or_else(|e| e.into_inner());
        match guard.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn inject(&self, frame: &[u8]) -> Result<()> {
        let _ = self.outbound.send(RawFrame { link_type: LinkType::Loopback, data: frame.to_vec() });
        Ok(())
    }
}
