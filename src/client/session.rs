//! Per-connection session state the Client Agent tracks for one game
//! client: login/avatar progress, interest sets, and what that client has
//! already been told exists.

use std::collections::HashSet;

use bytes::Bytes;
use otp_proto::ids::puppet_channel;
use otp_proto::{Channel, DoId};
use tokio::sync::mpsc;

use super::interest::InterestTable;

pub type ConnId = u64;

/// A session's progress through login, mirroring spec.md's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Unauthenticated,
    Authenticated,
    Disconnecting,
}

pub struct ClientSession {
    pub conn_id: ConnId,
    pub state: ConnState,
    pub account_id: Option<DoId>,
    pub avatar_id: Option<DoId>,
    pub interests: InterestTable,
    /// `(doId, fieldId)` pairs this session has been granted a one-off
    /// send permission for beyond the schema's static `clsend` flag
    /// (spec.md's `clsendOverrides`).
    pub clsend_overrides: HashSet<(DoId, u16)>,
    /// `doId`s this session has already been sent a generate for, so a
    /// zone that's covered by two overlapping interest handles doesn't
    /// double-generate and so `set_zone`/`remove` know what to disable.
    pub visible: HashSet<DoId>,
    pub outbox: mpsc::Sender<Bytes>,
}

impl ClientSession {
    pub fn new(conn_id: ConnId, outbox: mpsc::Sender<Bytes>) -> Self {
        Self {
            conn_id,
            state: ConnState::Unauthenticated,
            account_id: None,
            avatar_id: None,
            interests: InterestTable::new(),
            clsend_overrides: HashSet::new(),
            visible: HashSet::new(),
            outbox,
        }
    }

    /// The channel this session's selected avatar sends field updates as,
    /// used both to address the session and to self-suppress broadcast
    /// echo (spec.md §4.3).
    pub fn puppet_channel(&self) -> Option<Channel> {
        self.avatar_id.map(puppet_channel)
    }

    pub fn owns_avatar(&self, do_id: DoId) -> bool {
        self.avatar_id == Some(do_id)
    }
}
