//! Client Agent: terminates game-client TCP connections, authenticates
//! them, and is the sole [`ss::CaNotify`] consumer deciding who hears about
//! a State Server change (§4.3).

pub mod dashmap_ext;
mod dispatch;
mod interest;
mod listener;
mod login;
mod session;

pub use listener::run_ca_listener;
pub use session::{ClientSession, ConnId, ConnState};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use otp_proto::client_wire::ClientMessage;
use otp_proto::dclass::DcLoader;
use otp_proto::dna::DnaLoader;
use otp_proto::ids::puppet_channel;
use otp_proto::token::TokenParser;
use otp_proto::{Channel, DoId, Value, ZoneId};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::db::Database;
use crate::dbss::DatabaseServer;
use crate::eventlog::UdpEventLogger;
use crate::metrics;
use crate::ss::{CaNotify, DistributedObject, StateServer};

use dashmap_ext::DashMapExt;

/// What a dispatched message should do to the connection it arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Close,
}

/// The live game-client-facing half of the cluster. Holds every connected
/// session and the reverse `doId -> connection` index broadcast delivery
/// needs to always reach an object's owner regardless of interest-cache
/// coverage (§4.3).
pub struct ClientAgent {
    dc_loader: Arc<dyn DcLoader>,
    dna_loader: Arc<dyn DnaLoader>,
    token_parser: Arc<dyn TokenParser>,
    db: Arc<Database>,
    ss: Arc<StateServer>,
    dbss: Arc<DatabaseServer>,
    eventlog: Option<Arc<UdpEventLogger>>,
    sessions: DashMap<ConnId, Arc<Mutex<ClientSession>>>,
    avatar_owners: DashMap<DoId, ConnId>,
    next_conn_id: AtomicU64,
}

impl ClientAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dc_loader: Arc<dyn DcLoader>,
        dna_loader: Arc<dyn DnaLoader>,
        token_parser: Arc<dyn TokenParser>,
        db: Arc<Database>,
        ss: Arc<StateServer>,
        dbss: Arc<DatabaseServer>,
        eventlog: Option<Arc<UdpEventLogger>>,
    ) -> Self {
        Self {
            dc_loader,
            dna_loader,
            token_parser,
            db,
            ss,
            dbss,
            eventlog,
            sessions: DashMap::new(),
            avatar_owners: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Admit a freshly accepted TCP connection.
    pub fn register(&self, outbox: mpsc::Sender<Bytes>) -> (ConnId, Arc<Mutex<ClientSession>>) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Mutex::new(ClientSession::new(conn_id, outbox)));
        self.sessions.insert(conn_id, session.clone());
        metrics::CONNECTED_CLIENTS.inc();
        (conn_id, session)
    }

    /// Tear down a closed connection: release its avatar, tell its
    /// friends, and drop it from the live session table.
    pub async fn deregister(&self, conn_id: ConnId) {
        let Some((_, session_arc)) = self.sessions.remove(&conn_id) else {
            return;
        };
        metrics::CONNECTED_CLIENTS.dec();
        let avatar_id = session_arc.lock().await.avatar_id;
        if let Some(avatar_id) = avatar_id {
            self.avatar_owners.remove(&avatar_id);
            self.notify_friends_offline(avatar_id).await;
            self.ss.delete_ram(avatar_id, puppet_channel(avatar_id)).await;
        }
    }

    async fn send(&self, conn_id: ConnId, msg: ClientMessage) {
        let Some(session_arc) = self.sessions.get_cloned(&conn_id) else {
            return;
        };
        let outbox = session_arc.lock().await.outbox.clone();
        if outbox.send(msg.encode()).await.is_err() {
            debug!(conn_id, "client outbox closed, dropping frame");
        }
    }

    async fn friend_ids(&self, avatar_id: DoId) -> Vec<DoId> {
        let Ok(Some(stored)) = self.db.load(avatar_id).await else {
            return Vec::new();
        };
        let Some(Value::List(items)) = stored.field("setFriendsList").cloned() else {
            return Vec::new();
        };
        items
            .into_iter()
            .filter_map(|entry| match entry {
                Value::Tuple(parts) => match parts.into_iter().next() {
                    Some(Value::U64(id)) => Some(id as DoId),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    /// Tell `avatar_id` and each already-online friend about each other.
    pub(crate) async fn notify_friends_online(&self, avatar_id: DoId, conn_id: ConnId) {
        for friend_id in self.friend_ids(avatar_id).await {
            if let Some(friend_conn) = self.avatar_owners.get_cloned(&friend_id) {
                self.send(friend_conn, ClientMessage::FriendOnline { avatar_id }).await;
                self.send(conn_id, ClientMessage::FriendOnline { avatar_id: friend_id }).await;
            }
        }
    }

    async fn notify_friends_offline(&self, avatar_id: DoId) {
        for friend_id in self.friend_ids(avatar_id).await {
            if let Some(friend_conn) = self.avatar_owners.get_cloned(&friend_id) {
                self.send(friend_conn, ClientMessage::FriendOffline { avatar_id }).await;
            }
        }
    }
}

fn field_args(value: &Value) -> Vec<Value> {
    match value {
        Value::Tuple(parts) => parts.clone(),
        other => vec![other.clone()],
    }
}

fn generate_message(dc_loader: &dyn DcLoader, obj: &DistributedObject) -> ClientMessage {
    let fields = match dc_loader.class_by_number(obj.dclass_id) {
        Some(class) => class
            .fields
            .iter()
            .filter_map(|f| obj.fields.get(&f.name).map(|v| (f.number, v.clone())))
            .collect(),
        None => Vec::new(),
    };
    ClientMessage::ObjectGenerate {
        do_id: obj.do_id,
        parent_id: obj.parent_id,
        zone_id: obj.zone_id,
        class_id: obj.dclass_id,
        fields,
    }
}

#[async_trait]
impl CaNotify for ClientAgent {
    async fn on_generate(&self, obj: DistributedObject, sender: Channel) {
        let msg = generate_message(&self.dc_loader, &obj);
        for (conn_id, session_arc) in self.sessions.iter_cloned() {
            let mut session = session_arc.lock().await;
            if session.visible.contains(&obj.do_id) || session.puppet_channel() == Some(sender) {
                continue;
            }
            let owner = session.owns_avatar(obj.do_id);
            let covered = session.interests.is_visible(obj.parent_id, obj.zone_id);
            if !owner && !covered {
                continue;
            }
            session.visible.insert(obj.do_id);
            drop(session);
            self.send(conn_id, msg.clone()).await;
        }
    }

    async fn on_delete_ram(&self, do_id: DoId, _parent_id: DoId, _zone_id: ZoneId, sender: Channel) {
        for (conn_id, session_arc) in self.sessions.iter_cloned() {
            let mut session = session_arc.lock().await;
            if !session.visible.remove(&do_id) {
                continue;
            }
            let suppress = session.puppet_channel() == Some(sender);
            drop(session);
            if !suppress {
                self.send(conn_id, ClientMessage::ObjectDisable { do_id }).await;
            }
        }
    }

    async fn on_set_zone(&self, do_id: DoId, prev: (DoId, ZoneId), new: (DoId, ZoneId), sender: Channel) {
        let obj = self.ss.get(do_id);
        for (conn_id, session_arc) in self.sessions.iter_cloned() {
            let mut session = session_arc.lock().await;
            if session.puppet_channel() == Some(sender) {
                continue;
            }
            let was_visible = session.visible.contains(&do_id);
            let now_covered =
                session.owns_avatar(do_id) || session.interests.is_visible(new.0, new.1);
            let was_covered = session.interests.is_visible(prev.0, prev.1);

            if was_visible && !now_covered {
                session.visible.remove(&do_id);
                drop(session);
                self.send(conn_id, ClientMessage::ObjectDisable { do_id }).await;
            } else if !was_visible && now_covered {
                if let Some(obj) = &obj {
                    session.visible.insert(do_id);
                    let msg = generate_message(&self.dc_loader, obj);
                    drop(session);
                    self.send(conn_id, msg).await;
                }
            } else if was_visible && now_covered && was_covered {
                drop(session);
                self.send(
                    conn_id,
                    ClientMessage::ObjectLocation {
                        do_id,
                        parent_id: new.0,
                        zone_id: new.1,
                    },
                )
                .await;
            }
        }
    }

    async fn on_update_field(&self, do_id: DoId, field_name: &str, value: Value, sender: Channel) {
        let Some(obj) = self.ss.get(do_id) else {
            return;
        };
        let Some(class) = self.dc_loader.class_by_number(obj.dclass_id) else {
            return;
        };
        let Some(field) = class.field_by_name(field_name) else {
            return;
        };
        if !field.flags.broadcast && !field.flags.ownrecv {
            return;
        }
        let args = field_args(&value);
        for (conn_id, session_arc) in self.sessions.iter_cloned() {
            let session = session_arc.lock().await;
            if session.puppet_channel() == Some(sender) {
                continue;
            }
            let wants_it = (field.flags.broadcast && session.visible.contains(&do_id))
                || (field.flags.ownrecv && session.owns_avatar(do_id));
            drop(session);
            if wants_it {
                self.send(
                    conn_id,
                    ClientMessage::ObjectUpdateField {
                        do_id,
                        field_id: field.number,
                        args: args.clone(),
                    },
                )
                .await;
            }
        }
    }
}
