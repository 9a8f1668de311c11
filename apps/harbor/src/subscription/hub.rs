//! Fan-out of pane output to streaming consumers.
//!
//! Every connection owns a bounded queue. `publish` never waits: a full
//! queue drops the frame for that consumer and bumps its drop counter, so a
//! slow consumer cannot stall the pane output path.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use harbor_proto::{ControlAction, ControlMessage, encode_frame};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

pub type ConnectionId = u64;

struct Connection {
    panes: HashSet<String>,
    queue: mpsc::Sender<Bytes>,
    dropped: AtomicU64,
}

pub struct StreamHub {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
    queue_depth: usize,
    // Union of every connection's subscriptions.
    subscribed: watch::Sender<HashSet<String>>,
}

impl StreamHub {
    pub fn new(queue_depth: usize) -> Self {
        let (subscribed, _) = watch::channel(HashSet::new());
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
            subscribed,
        }
    }

    /// Adds a connection with no subscriptions; frames arrive on the receiver.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<Bytes>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, frames) = mpsc::channel(self.queue_depth);
        self.connections.write().insert(
            id,
            Connection {
                panes: HashSet::new(),
                queue,
                dropped: AtomicU64::new(0),
            },
        );
        debug!(target = "subscription::hub", connection = id, "consumer registered");
        (id, frames)
    }

    pub fn unregister(&self, id: ConnectionId) {
        let removed = self.connections.write().remove(&id);
        if let Some(connection) = removed {
            debug!(
                target = "subscription::hub",
                connection = id,
                dropped = connection.dropped.load(Ordering::Relaxed),
                "consumer unregistered"
            );
            self.refresh_subscribed();
        }
    }

    pub fn apply(&self, id: ConnectionId, message: &ControlMessage) {
        {
            let mut connections = self.connections.write();
            let Some(connection) = connections.get_mut(&id) else {
                return;
            };
            match message.action {
                ControlAction::Subscribe => connection.panes.extend(message.pane_ids.iter().cloned()),
                ControlAction::Unsubscribe => {
                    for pane_id in &message.pane_ids {
                        connection.panes.remove(pane_id);
                    }
                }
            }
        }
        trace!(
            target = "subscription::hub",
            connection = id,
            action = ?message.action,
            panes = message.pane_ids.len(),
            "subscriptions updated"
        );
        self.refresh_subscribed();
    }

    /// Queues `bytes` for every consumer subscribed to `pane_id`. Returns how
    /// many consumers accepted the frame.
    pub fn publish(&self, pane_id: &str, bytes: &[u8]) -> usize {
        let frame = match encode_frame(pane_id, bytes) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(target = "subscription::hub", pane_id, error = %err, "cannot frame pane output");
                return 0;
            }
        };
        let connections = self.connections.read();
        let mut delivered = 0;
        for (id, connection) in connections.iter() {
            if !connection.panes.contains(pane_id) {
                continue;
            }
            match connection.queue.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let dropped = connection.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(target = "subscription::hub", connection = *id, pane_id, dropped, "consumer queue full; frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    pub fn subscribed_panes(&self) -> HashSet<String> {
        self.subscribed.borrow().clone()
    }

    /// Watches the union of all subscriptions.
    pub fn watch_subscriptions(&self) -> watch::Receiver<HashSet<String>> {
        self.subscribed.subscribe()
    }

    pub fn dropped_frames(&self, id: ConnectionId) -> Option<u64> {
        self.connections
            .read()
            .get(&id)
            .map(|connection| connection.dropped.load(Ordering::Relaxed))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Disconnects every consumer by closing their queues.
    pub fn kick_all(&self) {
        let drained: Vec<ConnectionId> = self.connections.write().drain().map(|(id, _)| id).collect();
        if !drained.is_empty() {
            debug!(target = "subscription::hub", count = drained.len(), "disconnecting consumers");
            self.refresh_subscribed();
        }
    }

    fn refresh_subscribed(&self) {
        let union: HashSet<String> = self
            .connections
            .read()
            .values()
            .flat_map(|connection| connection.panes.iter().cloned())
            .collect();
        self.subscribed.send_if_modified(|current| {
            if *current == union {
                return false;
            }
            *current = union;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use harbor_proto::decode_frame;

    use super::*;

    #[test]
    fn frames_reach_only_subscribers() {
        let hub = StreamHub::new(8);
        let (a, mut frames_a) = hub.register();
        let (_b, mut frames_b) = hub.register();
        hub.apply(a, &ControlMessage::subscribe(["%1"]));

        assert_eq!(hub.publish("%1", b"hi"), 1);
        assert_eq!(hub.publish("%2", b"nope"), 0);

        let frame = frames_a.try_recv().unwrap();
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!((decoded.pane_id, decoded.payload), ("%1", &b"hi"[..]));
        assert!(frames_a.try_recv().is_err());
        assert!(frames_b.try_recv().is_err());
    }

    #[test]
    fn slow_consumer_drops_instead_of_blocking() {
        let hub = StreamHub::new(2);
        let (id, mut frames) = hub.register();
        hub.apply(id, &ControlMessage::subscribe(["%1"]));
        for _ in 0..5 {
            hub.publish("%1", b"x");
        }
        assert_eq!(hub.dropped_frames(id), Some(3));
        assert!(frames.try_recv().is_ok());
        assert!(frames.try_recv().is_ok());
        assert!(frames.try_recv().is_err());
    }

    #[test]
    fn subscription_union_tracks_connections() {
        let hub = StreamHub::new(4);
        let watcher = hub.watch_subscriptions();
        let (a, _fa) = hub.register();
        let (b, _fb) = hub.register();
        hub.apply(a, &ControlMessage::subscribe(["%1", "%2"]));
        hub.apply(b, &ControlMessage::subscribe(["%2", "%3"]));
        hub.apply(a, &ControlMessage::unsubscribe(["%1"]));
        let expected: HashSet<String> = ["%2", "%3"].into_iter().map(String::from).collect();
        assert_eq!(*watcher.borrow(), expected);

        hub.unregister(b);
        assert_eq!(hub.subscribed_panes(), HashSet::from(["%2".to_string()]));
        hub.kick_all();
        assert!(hub.subscribed_panes().is_empty());
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn unframeable_ids_are_ignored() {
        let hub = StreamHub::new(4);
        let (id, _frames) = hub.register();
        let long = "p".repeat(300);
        hub.apply(id, &ControlMessage::subscribe([long.clone(), String::new()]));
        assert_eq!(hub.publish(&long, b"x"), 0);
        assert_eq!(hub.publish("", b"x"), 0);
    }
}
