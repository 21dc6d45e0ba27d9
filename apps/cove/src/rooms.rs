use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Opaque update payload. The relay never inspects the bytes.
pub type Payload = Vec<u8>;

/// Outbound channel to one connected peer, drained by its forwarding task.
pub type PeerSender = mpsc::Sender<Payload>;

/// Snapshot of one live room for the listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub id: String,
    pub connections: usize,
    pub last_updated: DateTime<Utc>,
}

struct RoomInner {
    /// peer_id -> outbound sender. Membership only; no ordering semantics.
    members: HashMap<String, PeerSender>,
    /// Every update this room has accepted, in acceptance order. Replayed
    /// (concatenated) to each newly joining connection. Never reordered or
    /// truncated while the room is alive.
    state_log: Vec<Payload>,
    last_updated: DateTime<Utc>,
}

/// One broadcast domain: a set of connected peers plus the accumulated
/// update log for the document they are editing.
///
/// All state sits behind a single mutex and no operation awaits while
/// holding it, so join, publish, and leave serialize cleanly: a snapshot
/// handed to a joining peer and that peer's eligibility for subsequent
/// broadcasts are decided atomically.
pub struct Room {
    id: String,
    inner: Mutex<RoomInner>,
}

impl Room {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            inner: Mutex::new(RoomInner {
                members: HashMap::new(),
                state_log: Vec::new(),
                last_updated: Utc::now(),
            }),
        }
    }

    /// Add a peer to the room. If the room has accumulated state, the
    /// concatenated snapshot is queued as the first message on the peer's
    /// channel before the peer becomes visible to `publish`, so replay
    /// always precedes any broadcast and nothing is delivered twice.
    fn join(&self, peer_id: &str, tx: PeerSender) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.state_log.is_empty() {
            let snapshot: Payload = inner.state_log.concat();
            if tx.try_send(snapshot).is_err() {
                warn!(
                    "Failed to queue state snapshot for peer {} in room {}",
                    peer_id, self.id
                );
            }
        }
        inner.members.insert(peer_id.to_string(), tx);
        debug!(
            "Peer {} joined room {} ({} connected)",
            peer_id,
            self.id,
            inner.members.len()
        );
    }

    /// Accept one update: append it to the state log and deliver it to
    /// every member except `excluding`. A member whose channel is closed or
    /// full cannot be delivered to promptly and is removed from the room;
    /// that failure never aborts delivery to the remaining members and
    /// never surfaces to the sender.
    ///
    /// Because the append and the fan-out happen under one lock and each
    /// peer channel is FIFO, two updates are observed by every recipient in
    /// their acceptance order.
    pub fn publish(&self, payload: Payload, excluding: &str) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.state_log.push(payload.clone());
        inner.last_updated = Utc::now();

        let mut dead = Vec::new();
        let mut delivered = 0;
        for (peer_id, tx) in inner.members.iter() {
            if peer_id == excluding {
                continue;
            }
            match tx.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        "Dropping peer {} from room {}: {}",
                        peer_id, self.id, e
                    );
                    dead.push(peer_id.clone());
                }
            }
        }
        for peer_id in dead {
            inner.members.remove(&peer_id);
        }
        delivered
    }

    /// Remove a peer. Removing a peer that already left is a no-op.
    pub fn leave(&self, peer_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.members.remove(peer_id).is_some() {
            debug!(
                "Peer {} left room {} ({} remaining)",
                peer_id,
                self.id,
                inner.members.len()
            );
        }
    }

    pub fn member_count(&self) -> usize {
        self.inner.lock().unwrap().members.len()
    }

    /// Concatenated state log, or None when the room has accepted nothing.
    pub fn snapshot(&self) -> Option<Payload> {
        let inner = self.inner.lock().unwrap();
        if inner.state_log.is_empty() {
            None
        } else {
            Some(inner.state_log.concat())
        }
    }

    fn summary(&self) -> RoomSummary {
        let inner = self.inner.lock().unwrap();
        RoomSummary {
            id: self.id.clone(),
            connections: inner.members.len(),
            last_updated: inner.last_updated,
        }
    }
}

/// Owns the id -> Room map; the single source of truth for which rooms
/// exist. `join` and `delete_if_empty` both run their check-and-act under
/// the registry lock, so a join and a delete racing on the same id can
/// never both succeed: a room is never deleted while a join is in flight
/// and never created twice.
///
/// Lock order is registry then room, everywhere.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the room for `room_id` and add the peer to it, as one
    /// atomic step. Two concurrent calls with the same unknown id observe
    /// the same room instance.
    pub fn join(&self, room_id: &str, peer_id: &str, tx: PeerSender) -> Arc<Room> {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!("Created room {}", room_id);
            Arc::new(Room::new(room_id))
        });
        room.join(peer_id, tx);
        room.clone()
    }

    /// Remove the room only if its membership is empty. A no-op when the
    /// room is absent or still has members.
    pub fn delete_if_empty(&self, room_id: &str) {
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(room) = rooms.get(room_id) {
            if room.member_count() == 0 {
                rooms.remove(room_id);
                info!("Room {} is empty, cleaning up", room_id);
            }
        }
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.lock().unwrap().get(room_id).cloned()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap().len()
    }

    /// Summaries of all live rooms, for the listing endpoint.
    pub fn list(&self) -> Vec<RoomSummary> {
        let rooms = self.rooms.lock().unwrap();
        rooms.values().map(|room| room.summary()).collect()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::Receiver;

    fn peer(capacity: usize) -> (PeerSender, Receiver<Payload>) {
        mpsc::channel(capacity)
    }

    #[tokio::test]
    async fn join_empty_room_queues_no_snapshot() {
        let registry = RoomRegistry::new();
        let (tx, mut rx) = peer(8);

        let room = registry.join("doc1", "x", tx);
        assert_eq!(room.member_count(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_excludes_sender() {
        let registry = RoomRegistry::new();
        let (tx_x, mut rx_x) = peer(8);
        let (tx_y, mut rx_y) = peer(8);
        registry.join("doc1", "x", tx_x);
        let room = registry.join("doc1", "y", tx_y);

        let delivered = room.publish(vec![0xAA], "x");
        assert_eq!(delivered, 1);
        assert_eq!(rx_y.recv().await.unwrap(), vec![0xAA]);
        assert!(rx_x.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_joiner_receives_concatenated_snapshot_first() {
        let registry = RoomRegistry::new();
        let (tx_x, _rx_x) = peer(8);
        let (tx_y, mut rx_y) = peer(8);
        registry.join("doc1", "x", tx_x);
        let room = registry.join("doc1", "y", tx_y);

        room.publish(vec![0xAA], "x");
        room.publish(vec![0xBB], "y");

        let (tx_z, mut rx_z) = peer(8);
        registry.join("doc1", "z", tx_z);

        // Snapshot lands before anything broadcast after the join.
        room.publish(vec![0xCC], "x");
        assert_eq!(rx_z.recv().await.unwrap(), vec![0xAA, 0xBB]);
        assert_eq!(rx_z.recv().await.unwrap(), vec![0xCC]);

        // Existing members got the updates live, never the snapshot.
        assert_eq!(rx_y.recv().await.unwrap(), vec![0xAA]);
        assert_eq!(rx_y.recv().await.unwrap(), vec![0xCC]);
    }

    #[tokio::test]
    async fn updates_arrive_in_acceptance_order() {
        let registry = RoomRegistry::new();
        let (tx_x, _rx_x) = peer(32);
        let (tx_y, mut rx_y) = peer(32);
        registry.join("doc1", "x", tx_x);
        let room = registry.join("doc1", "y", tx_y);

        for i in 0..16u8 {
            room.publish(vec![i], "x");
        }
        for i in 0..16u8 {
            assert_eq!(rx_y.recv().await.unwrap(), vec![i]);
        }
    }

    #[tokio::test]
    async fn send_failure_is_isolated_and_drops_the_member() {
        let registry = RoomRegistry::new();
        let (tx_x, _rx_x) = peer(8);
        let (tx_y, mut rx_y) = peer(8);
        let (tx_dead, rx_dead) = peer(8);
        registry.join("doc1", "x", tx_x);
        registry.join("doc1", "y", tx_y);
        let room = registry.join("doc1", "dead", tx_dead);
        drop(rx_dead);

        assert_eq!(room.member_count(), 3);
        let delivered = room.publish(vec![0x01], "x");

        // The healthy member still got the payload; the dead one is gone.
        assert_eq!(delivered, 1);
        assert_eq!(rx_y.recv().await.unwrap(), vec![0x01]);
        assert_eq!(room.member_count(), 2);
    }

    #[tokio::test]
    async fn slow_member_with_full_buffer_is_dropped() {
        let registry = RoomRegistry::new();
        let (tx_x, _rx_x) = peer(8);
        let (tx_slow, _rx_slow) = peer(1);
        registry.join("doc1", "x", tx_x);
        let room = registry.join("doc1", "slow", tx_slow);

        // First publish fills the slow member's buffer; the second cannot
        // complete promptly and removes it instead of stalling the room.
        room.publish(vec![0x01], "x");
        assert_eq!(room.member_count(), 2);
        room.publish(vec![0x02], "x");
        assert_eq!(room.member_count(), 1);
    }

    #[tokio::test]
    async fn room_lifecycle_is_bound_to_membership() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = peer(8);
        let room = registry.join("doc2", "x", tx);
        room.publish(vec![0xEE], "someone-else");
        assert_eq!(registry.room_count(), 1);

        // Not empty yet: delete is a no-op.
        registry.delete_if_empty("doc2");
        assert_eq!(registry.room_count(), 1);

        room.leave("x");
        registry.delete_if_empty("doc2");
        assert_eq!(registry.room_count(), 0);

        // Re-joining the same id yields a fresh room with an empty log.
        let (tx2, mut rx2) = peer(8);
        let fresh = registry.join("doc2", "y", tx2);
        assert!(rx2.try_recv().is_err());
        assert!(fresh.snapshot().is_none());
    }

    #[tokio::test]
    async fn delete_if_empty_is_a_noop_for_unknown_rooms() {
        let registry = RoomRegistry::new();
        registry.delete_if_empty("never-existed");
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = peer(8);
        let room = registry.join("doc1", "x", tx);
        room.leave("x");
        room.leave("x");
        assert_eq!(room.member_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_joins_observe_the_same_room() {
        let registry = Arc::new(RoomRegistry::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let (tx, _rx) = mpsc::channel(8);
                let room = registry.join("contended", &format!("peer-{i}"), tx);
                // Keep the receiver alive long enough for the assertion.
                std::mem::forget(_rx);
                room
            }));
        }
        let mut rooms = Vec::new();
        for handle in handles {
            rooms.push(handle.await.unwrap());
        }
        assert_eq!(registry.room_count(), 1);
        for pair in rooms.windows(2) {
            assert!(Arc::ptr_eq(&pair[0], &pair[1]));
        }
        assert_eq!(rooms[0].member_count(), 8);
    }

    #[tokio::test]
    async fn listing_reports_membership_and_activity() {
        let registry = RoomRegistry::new();
        let (tx_a, _rx_a) = peer(8);
        let (tx_b, _rx_b) = peer(8);
        let (tx_c, _rx_c) = peer(8);
        registry.join("alpha", "a", tx_a);
        registry.join("alpha", "b", tx_b);
        let beta = registry.join("beta", "c", tx_c);

        let before = Utc::now();
        beta.publish(vec![0x01], "c");

        let mut summaries = registry.list();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, "alpha");
        assert_eq!(summaries[0].connections, 2);
        assert_eq!(summaries[1].id, "beta");
        assert_eq!(summaries[1].connections, 1);
        assert!(summaries[1].last_updated >= before);
    }
}
