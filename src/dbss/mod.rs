//! Database Server: constructs database objects, assigns UUIDs at birth,
//! and serves the seven RPCs of §4.4 on channel 4003.
//!
//! Exposed two ways, mirroring the State Server's split: typed async
//! methods for in-process callers (the Client Agent calls these directly,
//! same precedent as `ss::CaNotify`), and a [`LocalSubscriber`] impl that
//! decodes the wire shapes in [`wire`] and replies over the bus for
//! out-of-process callers such as an AI server.

mod secret;
mod wire;

pub use secret::{RequestSecretResult, SecretTable};
pub use wire::DatabaseServerMessage;

use std::sync::Arc;

use async_trait::async_trait;
use otp_proto::dclass::DcLoader;
use otp_proto::ids::DBSERVER_CHANNEL;
use otp_proto::{Channel, DoId, UuId, Value};
use parking_lot::Mutex as PlMutex;
use tokio::sync::OnceCell;
use tracing::warn;

use otp_proto::bus::DataMessage;

use crate::db::{CURRENT_VERSION, Database, StoredObject};
use crate::error::{RpcError, RpcResult};
use crate::md::{LocalSubscriber, MessageDirector};
use crate::metrics;
use crate::ss::StateServer;

/// The Database Server's typed RPC surface (§4.4).
pub struct DatabaseServer {
    dc_loader: Arc<dyn DcLoader>,
    db: Arc<Database>,
    ss: Arc<StateServer>,
    secrets: PlMutex<SecretTable>,
    bus: OnceCell<Arc<MessageDirector>>,
}

impl DatabaseServer {
    pub fn new(dc_loader: Arc<dyn DcLoader>, db: Arc<Database>, ss: Arc<StateServer>) -> Self {
        Self {
            dc_loader,
            db,
            ss,
            secrets: PlMutex::new(SecretTable::new()),
            bus: OnceCell::new(),
        }
    }

    /// Wire up the Message Director so bus-originated RPCs can reply.
    /// Panics if called twice, mirroring `StateServer::set_ca_notify`.
    pub fn set_bus(&self, bus: Arc<MessageDirector>) {
        self.bus
            .set(bus)
            .unwrap_or_else(|_| panic!("DatabaseServer::set_bus called twice"));
    }

    fn bus(&self) -> Arc<MessageDirector> {
        self.bus
            .get()
            .cloned()
            .expect("DatabaseServer used before set_bus")
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// `GET_STORED_VALUES(context, doId, [fieldId])` (§4.4).
    ///
    /// Side effect: hydrates a zero-location placeholder in the State
    /// Server so a subsequent `SET_ZONE` has somewhere to apply.
    pub async fn get_stored_values(
        &self,
        do_id: DoId,
        field_ids: &[u16],
    ) -> RpcResult<(bool, Vec<(u16, Option<Value>)>)> {
        let Some(stored) = self.db.load(do_id).await? else {
            return Ok((
                false,
                field_ids.iter().map(|id| (*id, None)).collect(),
            ));
        };
        let class = self
            .dc_loader
            .class_by_name(&stored.class_name)
            .ok_or_else(|| RpcError::UnknownClass(stored.class_name.clone()))?;
        self.ss.ensure_hydrated(do_id, class.number);

        let mut fields = Vec::with_capacity(field_ids.len());
        for &field_id in field_ids {
            let value = class
                .field_by_number(field_id)
                .and_then(|f| stored.field(&f.name))
                .cloned();
            fields.push((field_id, value));
        }
        Ok((true, fields))
    }

    /// `SET_STORED_VALUES(doId, [fieldId, value])` (§4.4). Unknown field
    /// ids are logged and skipped rather than failing the whole call.
    pub async fn set_stored_values(&self, do_id: DoId, fields: Vec<(u16, Value)>) -> RpcResult<()> {
        let Some(mut stored) = self.db.load(do_id).await? else {
            warn!(do_id, "SET_STORED_VALUES for an object with no database record");
            return Ok(());
        };
        let Some(class) = self.dc_loader.class_by_name(&stored.class_name) else {
            return Err(RpcError::UnknownClass(stored.class_name.clone()));
        };
        for (field_id, value) in fields {
            match class.field_by_number(field_id) {
                Some(field) => stored.set_field(&field.name, value),
                None => warn!(do_id, field_id, "SET_STORED_VALUES for an unknown field id"),
            }
        }
        self.db.save(&stored).await?;
        Ok(())
    }

    /// `CREATE_STORED_OBJECT(context, dclassId, [fieldId, value])` (§4.4).
    /// Defaults every `db` field from the schema, then overrides with the
    /// supplied fields, mints a UUID, and persists.
    pub async fn create_stored_object(
        &self,
        dclass_id: u16,
        fields: Vec<(u16, Value)>,
    ) -> RpcResult<DoId> {
        let class = self
            .dc_loader
            .class_by_number(dclass_id)
            .ok_or_else(|| RpcError::UnknownClass(dclass_id.to_string()))?;
        let do_id = self.db.next_do_id().await?;

        let mut named: Vec<(String, Value)> = class
            .db_fields()
            .map(|f| (f.name.clone(), f.default.clone()))
            .collect();
        for (field_id, value) in fields {
            if let Some(field) = class.field_by_number(field_id) {
                if let Some(entry) = named.iter_mut().find(|(n, _)| *n == field.name) {
                    entry.1 = value;
                } else {
                    named.push((field.name.clone(), value));
                }
            }
        }

        let stored = StoredObject {
            do_id,
            uu_id: UuId::mint(&class.name, do_id, Self::now()),
            class_name: class.name.clone(),
            version: CURRENT_VERSION,
            fields: named,
        };
        self.db.save(&stored).await?;
        Ok(do_id)
    }

    /// `GET_ESTATE(context, avatarDoId)` (§4.4). Lazily creates the
    /// estate and its six house slots so every slot holds a real `doId`,
    /// then syncs each occupied house's name/owner/colour from the
    /// avatar sitting in that slot.
    pub async fn get_estate(
        &self,
        avatar_id: DoId,
    ) -> RpcResult<(DoId, [DoId; 6], [DoId; 6], [DoId; 6])> {
        let avatar = self
            .db
            .load(avatar_id)
            .await?
            .ok_or(RpcError::NotFound(avatar_id))?;
        let account_id = as_u64(avatar.field("OwningAccount")) as DoId;
        let mut account = self
            .db
            .load(account_id)
            .await?
            .ok_or(RpcError::NotFound(account_id))?;

        let avatar_ids = as_slot6(account.field("ACCOUNT_AV_SET"));

        let mut estate_do_id = as_u64(account.field("ESTATE_ID")) as DoId;
        if estate_do_id == 0 {
            estate_do_id = self.create_stored_object(ESTATE_DCLASS_NUMBER, vec![]).await?;
            account.set_field("ESTATE_ID", Value::U64(estate_do_id as u64));
        }
        self.ss.ensure_hydrated(estate_do_id, ESTATE_DCLASS_NUMBER);

        let mut house_ids = as_slot6(account.field("HOUSE_ID_SET"));
        for slot in &mut house_ids {
            if *slot == 0 {
                *slot = self.create_stored_object(HOUSE_DCLASS_NUMBER, vec![]).await?;
            }
        }
        account.set_field(
            "HOUSE_ID_SET",
            Value::List(house_ids.iter().map(|id| Value::U64(*id as u64)).collect()),
        );
        self.db.save(&account).await?;

        let mut pet_ids = [0u32; 6];
        for (slot, &avatar_slot_id) in avatar_ids.iter().enumerate() {
            let house_id = house_ids[slot];
            self.ss.ensure_hydrated(house_id, HOUSE_DCLASS_NUMBER);

            let mut house = self
                .db
                .load(house_id)
                .await?
                .ok_or(RpcError::NotFound(house_id))?;
            if avatar_slot_id == 0 {
                house.set_field("setName", Value::Str(String::new()));
                house.set_field("setAvatarId", Value::U64(0));
                house.set_field("setColor", Value::U64(0));
            } else {
                let occupant = self
                    .db
                    .load(avatar_slot_id)
                    .await?
                    .ok_or(RpcError::NotFound(avatar_slot_id))?;
                let name = occupant
                    .field("setName")
                    .cloned()
                    .unwrap_or(Value::Str(String::new()));
                house.set_field("setName", name);
                house.set_field("setAvatarId", Value::U64(avatar_slot_id as u64));
                // DistributedToon carries no colour field upstream; slot
                // index stands in until a dedicated field exists.
                house.set_field("setColor", Value::U64(slot as u64));

                let pet_id = as_u64(occupant.field("setPetId")) as DoId;
                if pet_id != 0 {
                    self.ss.ensure_hydrated(pet_id, PET_DCLASS_NUMBER);
                    pet_ids[slot] = pet_id;
                }
            }
            self.db.save(&house).await?;
        }

        Ok((estate_do_id, house_ids, avatar_ids, pet_ids))
    }

    /// `MAKE_FRIENDS(a, b, flags, context)` (§4.4). Idempotent: a
    /// duplicate pair updates the stored flags in place.
    pub async fn make_friends(&self, avatar_a: DoId, avatar_b: DoId, flags: u32) -> RpcResult<bool> {
        let Some(mut a) = self.db.load(avatar_a).await? else {
            return Ok(false);
        };
        let Some(mut b) = self.db.load(avatar_b).await? else {
            return Ok(false);
        };
        upsert_friend(&mut a, avatar_b, flags);
        upsert_friend(&mut b, avatar_a, flags);
        self.db.save(&a).await?;
        self.db.save(&b).await?;
        Ok(true)
    }

    /// Remove a mutual friendship (supplement: spec.md's
    /// `CLIENT_REMOVE_FRIEND` needs a DBSS-side counterpart to
    /// `make_friends`). Idempotent: removing an absent entry is a no-op.
    pub async fn remove_friend(&self, avatar_a: DoId, avatar_b: DoId) -> RpcResult<bool> {
        let Some(mut a) = self.db.load(avatar_a).await? else {
            return Ok(false);
        };
        let Some(mut b) = self.db.load(avatar_b).await? else {
            return Ok(false);
        };
        remove_friend_entry(&mut a, avatar_b);
        remove_friend_entry(&mut b, avatar_a);
        self.db.save(&a).await?;
        self.db.save(&b).await?;
        Ok(true)
    }

    /// `REQUEST_SECRET(avId)` (§4.4).
    pub fn request_secret(&self, avatar_id: DoId) -> RequestSecretResult {
        self.secrets.lock().request_secret(avatar_id, Self::now())
    }

    /// `SUBMIT_SECRET(requesterId, code)` (§4.4).
    pub fn submit_secret(&self, requester_id: DoId, code: &str) -> u8 {
        self.secrets.lock().submit_secret(requester_id, code, Self::now())
    }
}

const ESTATE_DCLASS_NUMBER: u16 = 3;
const HOUSE_DCLASS_NUMBER: u16 = 4;
const PET_DCLASS_NUMBER: u16 = 5;

fn as_u64(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::U64(n)) => *n,
        _ => 0,
    }
}

fn as_slot6(value: Option<&Value>) -> [DoId; 6] {
    let mut slots = [0u32; 6];
    if let Some(Value::List(items)) = value {
        for (slot, item) in slots.iter_mut().zip(items.iter()) {
            if let Value::U64(id) = item {
                *slot = *id as DoId;
            }
        }
    }
    slots
}

fn remove_friend_entry(owner: &mut StoredObject, friend_id: DoId) {
    let Some(Value::List(items)) = owner.field("setFriendsList") else {
        return;
    };
    let remaining: Vec<Value> = items
        .iter()
        .filter(|e| {
            !matches!(
                e,
                Value::Tuple(parts) if matches!(parts.first(), Some(Value::U64(id)) if *id == friend_id as u64)
            )
        })
        .cloned()
        .collect();
    owner.set_field("setFriendsList", Value::List(remaining));
}

fn upsert_friend(owner: &mut StoredObject, friend_id: DoId, flags: u32) {
    let mut entries = match owner.field("setFriendsList") {
        Some(Value::List(items)) => items.clone(),
        _ => Vec::new(),
    };
    let entry = Value::Tuple(vec![Value::U64(friend_id as u64), Value::U64(flags as u64)]);
    if let Some(existing) = entries.iter_mut().find(|e| matches!(
        e,
        Value::Tuple(parts) if matches!(parts.first(), Some(Value::U64(id)) if *id == friend_id as u64)
    )) {
        *existing = entry;
    } else {
        entries.push(entry);
    }
    owner.set_field("setFriendsList", Value::List(entries));
}

#[async_trait]
impl LocalSubscriber for DatabaseServer {
    fn channels(&self) -> Vec<Channel> {
        vec![DBSERVER_CHANNEL]
    }

    async fn handle(&self, msg: &DataMessage) {
        let decoded = DatabaseServerMessage::decode(msg.code, msg.payload.clone());
        let request = match decoded {
            Ok(request) => request,
            Err(err) => {
                warn!(code = msg.code, error = %err, "unreadable Database Server message");
                return;
            }
        };
        metrics::DB_RPCS_SERVED.inc();

        let response = match request {
            DatabaseServerMessage::GetStoredValues {
                context,
                do_id,
                field_ids,
            } => match self.get_stored_values(do_id, &field_ids).await {
                Ok((success, fields)) => Some(DatabaseServerMessage::GetStoredValuesResp {
                    context,
                    do_id,
                    success,
                    fields,
                }),
                Err(err) => {
                    warn!(do_id, error = %err, "GET_STORED_VALUES failed");
                    Some(DatabaseServerMessage::GetStoredValuesResp {
                        context,
                        do_id,
                        success: false,
                        fields: Vec::new(),
                    })
                }
            },
            DatabaseServerMessage::SetStoredValues { do_id, fields } => {
                if let Err(err) = self.set_stored_values(do_id, fields).await {
                    warn!(do_id, error = %err, "SET_STORED_VALUES failed");
                }
                None
            }
            DatabaseServerMessage::CreateStoredObject {
                context,
                dclass_id,
                fields,
            } => match self.create_stored_object(dclass_id, fields).await {
                Ok(do_id) => Some(DatabaseServerMessage::CreateStoredObjectResp { context, do_id }),
                Err(err) => {
                    warn!(dclass_id, error = %err, "CREATE_STORED_OBJECT failed");
                    Some(DatabaseServerMessage::CreateStoredObjectResp { context, do_id: 0 })
                }
            },
            DatabaseServerMessage::GetEstate { context, avatar_id } => {
                match self.get_estate(avatar_id).await {
                    Ok((estate_do_id, house_ids, avatar_ids, pet_ids)) => {
                        Some(DatabaseServerMessage::GetEstateResp {
                            context,
                            estate_do_id,
                            house_ids,
                            avatar_ids,
                            pet_ids,
                        })
                    }
                    Err(err) => {
                        warn!(avatar_id, error = %err, "GET_ESTATE failed");
                        Some(DatabaseServerMessage::GetEstateResp {
                            context,
                            estate_do_id: 0,
                            house_ids: [0; 6],
                            avatar_ids: [0; 6],
                            pet_ids: [0; 6],
                        })
                    }
                }
            }
            DatabaseServerMessage::MakeFriends {
                context,
                avatar_a,
                avatar_b,
                flags,
            } => {
                let success = self.make_friends(avatar_a, avatar_b, flags).await.unwrap_or(false);
                Some(DatabaseServerMessage::MakeFriendsResp { context, success })
            }
            DatabaseServerMessage::RequestSecret { context, avatar_id } => {
                let result = self.request_secret(avatar_id);
                Some(DatabaseServerMessage::RequestSecretResp {
                    context,
                    response_code: result.response_code,
                    code: result.code,
                })
            }
            DatabaseServerMessage::SubmitSecret {
                context,
                requester_id,
                code,
            } => {
                let response_code = self.submit_secret(requester_id, &code);
                Some(DatabaseServerMessage::SubmitSecretResp { context, response_code })
            }
            // Reply variants only ever arrive from a peer acting as a
            // second Database Server, which this deployment never runs.
            DatabaseServerMessage::GetStoredValuesResp { .. }
            | DatabaseServerMessage::CreateStoredObjectResp { .. }
            | DatabaseServerMessage::GetEstateResp { .. }
            | DatabaseServerMessage::MakeFriendsResp { .. }
            | DatabaseServerMessage::RequestSecretResp { .. }
            | DatabaseServerMessage::SubmitSecretResp { .. } => None,
        };

        if let Some(response) = response {
            let reply = DataMessage {
                channels: vec![msg.sender],
                sender: DBSERVER_CHANNEL,
                code: response.code(),
                payload: response.encode(),
            };
            self.bus().route(reply, None).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::open_backend;
    use otp_proto::dclass::StaticDcLoader;

    async fn test_server() -> (tempfile::TempDir, DatabaseServer) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DatabaseConfig {
            backend: "raw".to_string(),
            dir: dir.path().to_string_lossy().to_string(),
            extension: "db".to_string(),
            storage_path: dir.path().join("game-accounts.db").to_string_lossy().to_string(),
            mysql_host: None,
            mysql_port: None,
            mysql_user: None,
            mysql_passwd: None,
        };
        let backend = open_backend(&cfg).await.unwrap();
        let db = Arc::new(Database::new(backend));
        let dc_loader: Arc<dyn DcLoader> = Arc::new(StaticDcLoader::new());
        let ss = Arc::new(StateServer::new(dc_loader.clone(), db.clone()));
        struct NoopCa;
        #[async_trait]
        impl crate::ss::CaNotify for NoopCa {
            async fn on_generate(&self, _obj: crate::ss::DistributedObject, _sender: Channel) {}
            async fn on_delete_ram(&self, _do_id: DoId, _p: DoId, _z: otp_proto::ZoneId, _sender: Channel) {}
            async fn on_set_zone(
                &self,
                _do_id: DoId,
                _prev: (DoId, otp_proto::ZoneId),
                _new: (DoId, otp_proto::ZoneId),
                _sender: Channel,
            ) {
            }
            async fn on_update_field(&self, _do_id: DoId, _field_name: &str, _value: Value, _sender: Channel) {}
        }
        ss.set_ca_notify(Arc::new(NoopCa));
        (dir, DatabaseServer::new(dc_loader, db, ss))
    }

    #[tokio::test]
    async fn create_stored_object_defaults_then_overrides_fields() {
        let (_dir, dbss) = test_server().await;
        let do_id = dbss
            .create_stored_object(2, vec![(1, Value::Str("Mickey".into()))])
            .await
            .unwrap();
        let (success, fields) = dbss.get_stored_values(do_id, &[1, 2]).await.unwrap();
        assert!(success);
        assert_eq!(fields[0], (1, Some(Value::Str("Mickey".into()))));
        assert_eq!(fields[1].1, Some(Value::Str(String::new())));
    }

    #[tokio::test]
    async fn make_friends_is_mutual_and_idempotent() {
        let (_dir, dbss) = test_server().await;
        let a = dbss.create_stored_object(2, vec![]).await.unwrap();
        let b = dbss.create_stored_object(2, vec![]).await.unwrap();

        assert!(dbss.make_friends(a, b, 1).await.unwrap());
        assert!(dbss.make_friends(a, b, 2).await.unwrap());

        let stored_a = dbss.db.load(a).await.unwrap().unwrap();
        let Some(Value::List(friends)) = stored_a.field("setFriendsList").cloned() else {
            panic!("expected a friends list");
        };
        assert_eq!(friends.len(), 1);
    }

    #[tokio::test]
    async fn remove_friend_undoes_make_friends_both_ways() {
        let (_dir, dbss) = test_server().await;
        let a = dbss.create_stored_object(2, vec![]).await.unwrap();
        let b = dbss.create_stored_object(2, vec![]).await.unwrap();
        dbss.make_friends(a, b, 1).await.unwrap();

        assert!(dbss.remove_friend(a, b).await.unwrap());

        let stored_a = dbss.db.load(a).await.unwrap().unwrap();
        let Some(Value::List(friends)) = stored_a.field("setFriendsList").cloned() else {
            panic!("expected a friends list");
        };
        assert!(friends.is_empty());
        let stored_b = dbss.db.load(b).await.unwrap().unwrap();
        let Some(Value::List(friends_b)) = stored_b.field("setFriendsList").cloned() else {
            panic!("expected a friends list");
        };
        assert!(friends_b.is_empty());
    }

    #[tokio::test]
    async fn get_estate_lazily_creates_estate_and_houses() {
        let (_dir, dbss) = test_server().await;
        let avatar = dbss.create_stored_object(2, vec![]).await.unwrap();
        let account = dbss.create_stored_object(1, vec![]).await.unwrap();
        let mut stored_avatar = dbss.db.load(avatar).await.unwrap().unwrap();
        stored_avatar.set_field("OwningAccount", Value::U64(account as u64));
        dbss.db.save(&stored_avatar).await.unwrap();
        let mut stored_account = dbss.db.load(account).await.unwrap().unwrap();
        stored_account.set_field(
            "ACCOUNT_AV_SET",
            Value::List(vec![
                Value::U64(avatar as u64),
                Value::U64(0),
                Value::U64(0),
                Value::U64(0),
                Value::U64(0),
                Value::U64(0),
            ]),
        );
        dbss.db.save(&stored_account).await.unwrap();

        let (estate_do_id, house_ids, avatar_ids, _pet_ids) = dbss.get_estate(avatar).await.unwrap();
        assert_ne!(estate_do_id, 0);
        assert!(house_ids.iter().all(|id| *id != 0));
        assert_eq!(avatar_ids[0], avatar);

        let house0 = dbss.db.load(house_ids[0]).await.unwrap().unwrap();
        assert_eq!(house0.field("setAvatarId"), Some(&Value::U64(avatar as u64)));
    }
}
