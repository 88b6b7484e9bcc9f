//! The background task described in §4.3: consumes frames from a
//! `CaptureChannel` until shutdown, parses them, and updates flow state.
//!
//! `run_active` and `run_passive` share the same per-segment rules but
//! differ in where flow state lives (one inline `FlowState` vs. a
//! `FlowTable` keyed by peer) and in whether FIN removes anything, so they
//! are kept as two small functions rather than forced through one
//! over-parameterized abstraction.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::capture::{parse, CaptureChannel};
use crate::flow::{FlowState, FlowTable};
use crate::headers::{HeaderTemplates, ReadyTemplates};
use crate::packet::Packet;
use crate::shutdown::Shutdown;

/// How long `recv_frame` may block before we re-check the shutdown signal.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs one blocking `recv_frame` call on the blocking thread pool so a
/// libpcap read never stalls the Tokio runtime (§5 "Suspension points").
async fn recv_next(channel: &Arc<dyn CaptureChannel>) -> Result<Option<crate::capture::RawFrame>, crate::error::Error> {
    let channel = channel.clone();
    tokio::task::spawn_blocking(move || channel.recv_frame(POLL_TIMEOUT))
        .await
        .unwrap_or_else(|e| Err(crate::error::Error::CaptureOpenFailed(e.to_string())))
}

/// CaptureLoop for `ActiveEndpoint`: exactly one peer, tracked inline.
pub async fn run_active(
    channel: Arc<dyn CaptureChannel>,
    flow: Arc<FlowState>,
    templates: Arc<ReadyTemplates>,
    tx: mpsc::Sender<Packet>,
    shutdown: Arc<Shutdown>,
) {
    loop {
        if shutdown.is_closed() {
            break;
        }
        let frame = match recv_next(&channel).await {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "capture source failed, ending capture loop");
                break;
            }
        };
        let Some(seg) = parse(&frame) else {
            trace!("dropped unparsable frame");
            continue;
        };

        flow.set_seq(seg.ack);

        if !templates.is_ready() {
            let won = templates.set(HeaderTemplates {
                link: seg.link_template.clone(),
                network: seg.network_template.clone(),
            });
            if won {
                flow.set_ack(seg.seq);
                debug!("header templates captured, endpoint is ready");
            }
        }

        if seg.is_syn() {
            flow.advance_ack(1);
        } else if seg.is_psh() {
            flow.advance_ack(seg.payload.len() as u32);
            let packet = Packet::new(seg.payload, seg.peer);
            tokio::select! {
                res = tx.send(packet) => {
                    if res.is_err() {
                        break;
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
        // FIN has no flow to remove on the single-peer active side.
    }
}

/// CaptureLoop for `PassiveEndpoint`: many peers, tracked in a `FlowTable`.
pub async fn run_passive(
    channel: Arc<dyn CaptureChannel>,
    flows: Arc<FlowTable>,
    templates: Arc<ReadyTemplates>,
    tx: mpsc::Sender<Packet>,
    shutdown: Arc<Shutdown>,
) {
    loop {
        if shutdown.is_closed() {
            break;
        }
        let frame = match recv_next(&channel).await {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "capture source failed, ending capture loop");
                break;
            }
        };
        let Some(seg) = parse(&frame) else {
            trace!("dropped unparsable frame");
            continue;
        };
        let peer = seg.peer;

        let is_new_flow = !flows.contains(&peer);
        flows.with_entry_or_default(peer, |e| e.seq = seg.ack);
        if is_new_flow {
            // Per-peer ISN bootstrap (§4.5: UNKNOWN -> ACTIVE on first segment).
            flows.with_entry_or_default(peer, |e| e.ack = seg.seq);
        }

        if !templates.is_ready() {
            let won = templates.set(HeaderTemplates {
                link: seg.link_template.clone(),
                network: seg.network_template.clone(),
            });
            if won {
                debug!("header templates captured from first peer, endpoint is ready");
            }
        }

        if seg.is_syn() {
            flows.with_entry_or_default(peer, |e| e.ack = e.ack.wrapping_add(1));
        } else if seg.is_psh() {
            let len = seg.payload.len() as u32;
            flows.with_entry_or_default(peer, |e| e.ack = e.ack.wrapping_add(len));
            let packet = Packet::new(seg.payload, peer);
            tokio::select! {
                res = tx.send(packet) => {
                    if res.is_err() {
                        break;
                    }
                }
                _ = shutdown.wait() => break,
            }
        } else if seg.is_fin() {
            flows.remove(&peer);
        }
    }
}
