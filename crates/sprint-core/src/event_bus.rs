use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value;
use sprint_types::EngineEvent;
use tokio::sync::mpsc;

/// Fixed required-payload-key table for the documented event catalogue.
///
/// Per the design note on event taxonomy drift: this is an allow-list hint,
/// not an exhaustive catalogue. Event types with no entry here pass through
/// unchecked; missing required keys log a warning but never drop the event.
fn required_fields(event_type: &str) -> Option<&'static [&'static str]> {
    match event_type {
        "batch:start" => Some(&["batch_id", "max_cycles"]),
        "batch:end" => Some(&["batch_id", "cycles_completed", "status"]),
        "batch:warning" => Some(&["batch_id", "message", "warning_type"]),
        "cycle:start" => Some(&["cycle_number", "story_keys"]),
        "cycle:end" => Some(&["cycle_number", "completed_stories"]),
        "command:start" => Some(&["story_key", "command", "task_id"]),
        "command:progress" => Some(&["story_key", "command", "task_id", "message"]),
        "command:end" => Some(&["story_key", "command", "task_id", "status"]),
        "story:status" => Some(&["story_key", "old_status", "new_status"]),
        "context:create" | "context:refresh" => Some(&["story_key", "context_type"]),
        "context:complete" => Some(&["story_key", "context_type", "status"]),
        "error" => Some(&["type", "message"]),
        "pong" => Some(&[]),
        _ => None,
    }
}

fn validate_payload(event_type: &str, payload: &Value) {
    let Some(required) = required_fields(event_type) else {
        return;
    };
    let object = payload.as_object();
    for key in required {
        let present = object.map(|o| o.contains_key(*key)).unwrap_or(false);
        if !present {
            tracing::warn!(event_type, missing_key = key, "event payload missing required key");
        }
    }
}

type PeerId = u64;

/// In-process broadcaster. Tracks connected peers explicitly (rather than
/// relying on a single shared broadcast channel) so a send failure to one
/// peer can be pruned without affecting delivery to the others.
pub struct EventBus {
    peers: Mutex<HashMap<PeerId, mpsc::UnboundedSender<EngineEvent>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new subscriber. Returns its id (for explicit `remove`) and
    /// the receiving half it should poll.
    pub fn add(&self) -> (PeerId, mpsc::UnboundedReceiver<EngineEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    pub fn remove(&self, id: PeerId) {
        self.peers.lock().unwrap().remove(&id);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    /// Send `event` to every connected peer. Any peer whose channel is
    /// closed is pruned once the fan-out completes.
    pub fn broadcast(&self, event: EngineEvent) {
        let mut dead = Vec::new();
        {
            let peers = self.peers.lock().unwrap();
            for (id, tx) in peers.iter() {
                if tx.send(event.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            let mut peers = self.peers.lock().unwrap();
            for id in dead {
                peers.remove(&id);
            }
        }
    }

    /// Build an event (stamping the current timestamp), validate its payload
    /// against the required-fields table, broadcast it, and return it so the
    /// caller can also append it to the durable event log.
    pub fn emit(&self, event_type: impl Into<String>, payload: Value) -> EngineEvent {
        let event_type = event_type.into();
        validate_payload(&event_type, &payload);
        let event = EngineEvent::new(event_type, payload);
        self.broadcast(event.clone());
        event
    }

    /// Drop peers whose receiver has already been dropped. Run periodically
    /// from a background heartbeat loop at `websocket_heartbeat_seconds`.
    pub fn sweep(&self) -> usize {
        let mut peers = self.peers.lock().unwrap();
        let before = peers.len();
        peers.retain(|_, tx| !tx.is_closed());
        before - peers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn broadcast_delivers_to_connected_peer() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.add();
        bus.emit("pong", json!({}));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.event_type, "pong");
    }

    #[test]
    fn broadcast_prunes_peer_whose_receiver_dropped() {
        let bus = EventBus::new();
        let (_id, rx) = bus.add();
        drop(rx);
        bus.emit("pong", json!({}));
        assert_eq!(bus.peer_count(), 0);
    }

    #[test]
    fn explicit_remove_drops_peer() {
        let bus = EventBus::new();
        let (id, _rx) = bus.add();
        bus.remove(id);
        assert_eq!(bus.peer_count(), 0);
    }

    #[test]
    fn sweep_removes_closed_peers_without_a_broadcast() {
        let bus = EventBus::new();
        let (_id, rx) = bus.add();
        drop(rx);
        assert_eq!(bus.sweep(), 1);
        assert_eq!(bus.peer_count(), 0);
    }

    #[test]
    fn emit_sets_monotonic_timestamp() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.add();
        bus.emit("pong", json!({}));
        bus.emit("pong", json!({}));
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(second.timestamp >= first.timestamp);
    }

    #[test]
    fn unknown_event_type_accepts_any_payload() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.add();
        bus.emit("something:custom", json!({"anything": true}));
        assert!(rx.try_recv().is_ok());
    }
}
