//! Per-peer TCP counters (§3 `FlowState`).
//!
//! `ActiveEndpoint` holds exactly one peer and tracks it with lock-free
//! atomics. `PassiveEndpoint` tracks many peers behind a single mutex, per
//! §4.2's "a single mutex guards the map; every read-modify-write of a
//! FlowState executes under this mutex" — so the passive side intentionally
//! uses plain (non-atomic) counters instead of duplicating `FlowState`'s
//! atomics under a lock that already serializes access.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Lock-free `(seq, ack)` pair for the single peer an `ActiveEndpoint` talks
/// to.
#[derive(Debug, Default)]
pub struct FlowState {
    seq: AtomicU32,
    ack: AtomicU32,
}

impl FlowState {
    pub fn zeroed() -> Self {
        Self {
            seq: AtomicU32::new(0),
            ack: AtomicU32::new(0),
        }
    }

    pub fn seq(&self) -> u32 {
        self.seq.load(Ordering::SeqCst)
    }

    pub fn ack(&self) -> u32 {
        self.ack.load(Ordering::SeqCst)
    }

    pub fn set_seq(&self, value: u32) {
        self.seq.store(value, Ordering::SeqCst);
    }

    pub fn set_ack(&self, value: u32) {
        self.ack.store(value, Ordering::SeqCst);
    }

    /// Advances `ack` by `by` and returns the new value. Used for SYN (`by =
    /// 1`) and PSH (`by = payload.len()`) accounting.
    pub fn advance_ack(&self, by: u32) -> u32 {
        self.ack.fetch_add(by, Ordering::SeqCst) + by
    }

    /// Advances `seq` by `by` after a successful write.
    pub fn advance_seq(&self, by: u32) -> u32 {
        self.seq.fetch_add(by, Ordering::SeqCst) + by
    }
}

/// One peer's counters in a `PassiveEndpoint`'s flow table. Plain integers —
/// every access happens while the owning `FlowTable`'s mutex is held.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowEntry {
    pub seq: u32,
    pub ack: u32,
}

/// The peer → `FlowEntry` map described in §4.2, guarded by exactly one
/// mutex.
#[derive(Debug, Default)]
pub struct FlowTable {
    inner: Mutex<HashMap<SocketAddr, FlowEntry>>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `f` against the entry for `peer`, creating a zero-initialized
    /// one first if none exists (§4.2: "If no FlowState exists for the
    /// peer, a zero-initialized one is used").
    pub fn with_entry_or_default<R>(&self, peer: SocketAddr, f: impl FnOnce(&mut FlowEntry) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let entry = guard.entry(peer).or_default();
        f(entry)
    }

    /// Snapshot of a peer's current counters, if a flow has been observed.
    pub fn get(&self, peer: &SocketAddr) -> Option<FlowEntry> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(peer).copied()
    }

    /// Removes the peer's flow entirely (§4.3 step 5, FIN observed).
    pub fn remove(&self, peer: &SocketAddr) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(peer);
    }

    pub fn len(&self) -> usize {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, peer: &SocketAddr) -> bool {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.contains_key(peer)
    }
}
