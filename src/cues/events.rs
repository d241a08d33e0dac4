//! Cue change fan-out to WebSocket subscribers
//!
//! Wraps a broadcast channel with a small client registry so the control
//! loop can run periodic housekeeping over connections that went away
//! without deregistering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::registry::CueState;

/// Buffered events per subscriber before a slow client starts lagging.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
struct ClientSlot {
    connected_at_ms: u64,
    closed: Arc<AtomicBool>,
}

/// Subscription guard handed to a WebSocket task. Dropping it marks the slot
/// closed; the next housekeeping pass prunes it from the registry.
pub struct BroadcastClient {
    id: u64,
    closed: Arc<AtomicBool>,
}

impl BroadcastClient {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for BroadcastClient {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Cloneable fan-out handle shared by the controller and the WebSocket layer.
#[derive(Clone)]
pub struct CueBroadcaster {
    tx: broadcast::Sender<CueState>,
    clients: Arc<Mutex<HashMap<u64, ClientSlot>>>,
    next_id: Arc<AtomicU64>,
}

impl CueBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            clients: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publish a cue state change. Best-effort: with no subscribers the
    /// event is simply dropped.
    pub fn publish(&self, state: CueState) {
        let _ = self.tx.send(state);
    }

    /// Register a client and return its guard plus the event stream.
    pub fn subscribe(&self, now_ms: u64) -> (BroadcastClient, broadcast::Receiver<CueState>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let closed = Arc::new(AtomicBool::new(false));
        self.clients.lock().insert(
            id,
            ClientSlot {
                connected_at_ms: now_ms,
                closed: closed.clone(),
            },
        );
        debug!(client = id, "broadcast subscriber registered");
        (BroadcastClient { id, closed }, self.tx.subscribe())
    }

    /// Registered clients, including ones not yet pruned.
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Drop registry slots whose tasks have finished. Returns how many were
    /// pruned.
    pub fn cleanup(&self, now_ms: u64) -> usize {
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|id, slot| {
            let alive = !slot.closed.load(Ordering::Acquire);
            if !alive {
                info!(
                    "🧹 WS client #{} cleaned up ({} ms connected)",
                    id,
                    now_ms.saturating_sub(slot.connected_at_ms)
                );
            }
            alive
        });
        before - clients.len()
    }
}

impl Default for CueBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
