//! Message Director: the star-topology bus every other component talks
//! through (§4.1).
//!
//! [`MessageDirector`] owns two independent subscription tables: one for
//! TCP peers (external processes, routed by re-encoding and writing to a
//! per-peer `mpsc` sender) and one for in-process components (the State
//! Server and Database Server, routed by a direct async call so a
//! same-process hop never pays for a socket round trip). Every inbound
//! data message goes through both, mirroring the routing contract's
//! "forwards to every other subscriber... and additionally invokes the
//! in-process dispatcher".

mod listener;

pub use listener::run_md_listener;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use otp_proto::bus::{BusFrame, ControlMessage, DataMessage};
use otp_proto::Channel;
use tokio::sync::mpsc;
use tracing::trace;

use crate::client::dashmap_ext::DashMapExt;
use crate::metrics;

/// Locally assigned id for a connected bus peer.
pub type PeerId = u64;

/// An in-process component that wants to observe data messages on one or
/// more channels without a TCP hop (the State Server, the Database
/// Server).
#[async_trait]
pub trait LocalSubscriber: Send + Sync {
    fn channels(&self) -> Vec<Channel>;
    async fn handle(&self, msg: &DataMessage);
}

struct PeerHandle {
    outbox: mpsc::Sender<BusFrame>,
}

/// The bus's routing state: per-peer subscriptions, post-remove queues,
/// and registered local subscribers.
pub struct MessageDirector {
    peers: DashMap<PeerId, PeerHandle>,
    subscriptions: DashMap<Channel, Vec<PeerId>>,
    post_remove: DashMap<PeerId, Vec<DataMessage>>,
    locals: DashMap<Channel, Vec<Arc<dyn LocalSubscriber>>>,
    next_peer_id: AtomicU64,
}

impl Default for MessageDirector {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageDirector {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
            subscriptions: DashMap::new(),
            post_remove: DashMap::new(),
            locals: DashMap::new(),
            next_peer_id: AtomicU64::new(1),
        }
    }

    /// Register an in-process component on every channel it names.
    pub fn register_local(&self, subscriber: Arc<dyn LocalSubscriber>) {
        for channel in subscriber.channels() {
            self.locals.entry(channel).or_default().push(subscriber.clone());
        }
    }

    /// Admit a new TCP peer, returning its id and the receiving half of
    /// its outbound queue (the connection task drains this and writes
    /// frames to the socket).
    pub fn add_peer(&self) -> (PeerId, mpsc::Receiver<BusFrame>) {
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(256);
        self.peers.insert(id, PeerHandle { outbox: tx });
        (id, rx)
    }

    /// Flush `peer`'s post-remove queue (as if each queued message had
    /// just been sent by it), then drop its subscriptions and outbox.
    pub async fn remove_peer(&self, peer: PeerId) {
        self.peers.remove(&peer);
        self.subscriptions.retain(|_, subs| {
            subs.retain(|p| *p != peer);
            !subs.is_empty()
        });
        if let Some((_, queued)) = self.post_remove.remove(&peer) {
            for msg in queued {
                self.route(msg, None).await;
            }
        }
    }

    /// Apply a control message received from `peer`.
    pub fn handle_control(&self, peer: PeerId, control: ControlMessage) {
        match control {
            ControlMessage::SetChannel(channel) => {
                let mut subs = self.subscriptions.entry(channel).or_default();
                if !subs.contains(&peer) {
                    subs.push(peer);
                }
            }
            ControlMessage::RemoveChannel(channel) => {
                if let Some(mut subs) = self.subscriptions.get_mut(&channel) {
                    subs.retain(|p| *p != peer);
                }
            }
            ControlMessage::AddPostRemove(msg) => {
                self.post_remove.entry(peer).or_default().push(msg);
            }
            ControlMessage::ClearPostRemove => {
                self.post_remove.remove(&peer);
            }
        }
    }

    /// Route a data message: fan it out to every other TCP subscriber of
    /// each addressed channel, then invoke every matching in-process
    /// subscriber. `sender` is `None` for messages the MD itself injects
    /// (post-remove flush, a colocated component originating a message).
    pub async fn route(&self, msg: DataMessage, sender: Option<PeerId>) {
        metrics::MESSAGES_ROUTED.inc();
        let mut notified = std::collections::HashSet::new();
        for &channel in &msg.channels {
            if let Some(subs) = self.subscriptions.get_cloned(&channel) {
                for peer in subs {
                    if Some(peer) == sender || !notified.insert(peer) {
                        continue;
                    }
                    if let Some(handle) = self.peers.get(&peer) {
                        let frame = BusFrame::Data(msg.clone());
                        if handle.outbox.send(frame).await.is_err() {
                            trace!(peer, "peer outbox closed, dropping frame");
                        }
                    }
                }
            }
        }
        self.dispatch_local(&msg).await;
    }

    async fn dispatch_local(&self, msg: &DataMessage) {
        let mut notified = std::collections::HashSet::new();
        for &channel in &msg.channels {
            if let Some(subscribers) = self.locals.get(&channel) {
                for subscriber in subscribers.value() {
                    let ptr = Arc::as_ptr(subscriber) as *const () as usize;
                    if !notified.insert(ptr) {
                        continue;
                    }
                    subscriber.handle(msg).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Mutex as StdMutex;

    struct RecordingSubscriber {
        channel: Channel,
        seen: StdMutex<Vec<DataMessage>>,
    }

    #[async_trait]
    impl LocalSubscriber for RecordingSubscriber {
        fn channels(&self) -> Vec<Channel> {
            vec![self.channel]
        }
        async fn handle(&self, msg: &DataMessage) {
            self.seen.lock().unwrap().push(msg.clone());
        }
    }

    fn data(channels: Vec<Channel>, sender: Channel) -> DataMessage {
        DataMessage {
            channels,
            sender,
            code: 1,
            payload: Bytes::from_static(b"x"),
        }
    }

    #[tokio::test]
    async fn routes_to_every_other_subscriber_never_the_sender() {
        let md = MessageDirector::new();
        let (peer_a, mut rx_a) = md.add_peer();
        let (peer_b, mut rx_b) = md.add_peer();
        md.handle_control(peer_a, ControlMessage::SetChannel(4003));
        md.handle_control(peer_b, ControlMessage::SetChannel(4003));

        md.route(data(vec![4003], 0), Some(peer_a)).await;

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn local_subscribers_always_observe_the_message() {
        let md = MessageDirector::new();
        let subscriber = Arc::new(RecordingSubscriber {
            channel: 20_100_000,
            seen: StdMutex::new(Vec::new()),
        });
        md.register_local(subscriber.clone());

        md.route(data(vec![20_100_000], 0), None).await;

        assert_eq!(subscriber.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn post_remove_queue_flushes_on_disconnect() {
        let md = MessageDirector::new();
        let (peer_a, _rx_a) = md.add_peer();
        let (peer_b, mut rx_b) = md.add_peer();
        md.handle_control(peer_b, ControlMessage::SetChannel(99));
        md.handle_control(peer_a, ControlMessage::AddPostRemove(data(vec![99], peer_a)));

        md.remove_peer(peer_a).await;

        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn clear_post_remove_drops_the_queue() {
        let md = MessageDirector::new();
        let (peer_a, _rx_a) = md.add_peer();
        let (peer_b, mut rx_b) = md.add_peer();
        md.handle_control(peer_b, ControlMessage::SetChannel(99));
        md.handle_control(peer_a, ControlMessage::AddPostRemove(data(vec![99], peer_a)));
        md.handle_control(peer_a, ControlMessage::ClearPostRemove);

        md.remove_peer(peer_a).await;

        assert!(rx_b.try_recv().is_err());
    }
}
