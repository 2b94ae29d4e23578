//! State Server: authoritative in-memory registry of live distributed
//! objects (§3 "Distributed object", §4.2).
//!
//! Two `DashMap`s stand in for the spec's `objects`/`dbObjects` registries.
//! Field updates and location changes are applied here and then handed off
//! to a [`CaNotify`] so the Client Agent can work out who should hear about
//! it; the State Server itself has no notion of interest sets or client
//! sessions, mirroring the teacher's layering where a state manager mutates
//! shared state and a separate actor decides delivery (see
//! `state/actor/handlers/broadcast.rs`).

mod wire;

pub use wire::StateServerMessage;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use otp_proto::dclass::DcLoader;
use otp_proto::ids::STATESERVER_CHANNEL;
use otp_proto::{Channel, DoId, Value, ZoneId};
use tokio::sync::OnceCell;
use tracing::warn;

use otp_proto::bus::DataMessage;

use crate::client::dashmap_ext::DashMapExt;
use crate::db::{Database, StoredObject};
use crate::md::LocalSubscriber;
use crate::metrics;

/// A live distributed object. Fields are keyed by name rather than numeric
/// id: the numeric id only matters at the wire boundary, where it is
/// resolved against the owning dclass.
#[derive(Debug, Clone)]
pub struct DistributedObject {
    pub do_id: DoId,
    pub dclass_id: u16,
    pub parent_id: DoId,
    pub zone_id: ZoneId,
    pub fields: HashMap<String, Value>,
}

impl DistributedObject {
    pub fn location(&self) -> (DoId, ZoneId) {
        (self.parent_id, self.zone_id)
    }
}

/// Notifies the Client Agent that the State Server changed something it
/// needs to announce to interested sessions. A direct trait call rather
/// than another bus hop: the spec only requires the SS/DBSS pair to be
/// externally addressable over the bus (§4.2, §4.4), and the SS→CA
/// notification path never crosses a process boundary in this deployment.
#[async_trait]
pub trait CaNotify: Send + Sync {
    async fn on_generate(&self, obj: DistributedObject, sender: Channel);
    async fn on_delete_ram(&self, do_id: DoId, parent_id: DoId, zone_id: ZoneId, sender: Channel);
    async fn on_set_zone(
        &self,
        do_id: DoId,
        prev: (DoId, ZoneId),
        new: (DoId, ZoneId),
        sender: Channel,
    );
    async fn on_update_field(&self, do_id: DoId, field_name: &str, value: Value, sender: Channel);
}

pub struct StateServer {
    objects: DashMap<DoId, DistributedObject>,
    db_objects: DashMap<DoId, DistributedObject>,
    dc_loader: Arc<dyn DcLoader>,
    db: Arc<Database>,
    ca: OnceCell<Arc<dyn CaNotify>>,
}

impl StateServer {
    pub fn new(dc_loader: Arc<dyn DcLoader>, db: Arc<Database>) -> Self {
        Self {
            objects: DashMap::new(),
            db_objects: DashMap::new(),
            dc_loader,
            db,
            ca: OnceCell::new(),
        }
    }

    /// Wire up the Client Agent once both halves of the cluster exist.
    /// Panics if called twice: exactly one Client Agent owns a cluster's
    /// State Server for its whole lifetime.
    pub fn set_ca_notify(&self, ca: Arc<dyn CaNotify>) {
        self.ca
            .set(ca)
            .unwrap_or_else(|_| panic!("StateServer::set_ca_notify called twice"));
    }

    fn ca(&self) -> Arc<dyn CaNotify> {
        self.ca
            .get()
            .cloned()
            .expect("StateServer used before set_ca_notify")
    }

    /// Look up a live object, checking `dbObjects` first. Both registries
    /// should never hold the same `doId` at once; checking `dbObjects`
    /// first is the documented tie-break if that invariant is ever violated
    /// (§4.2 "Tie-break when both registries could hold a doId").
    pub fn get(&self, do_id: DoId) -> Option<DistributedObject> {
        self.db_objects
            .get_cloned(&do_id)
            .or_else(|| self.objects.get_cloned(&do_id))
    }

    /// Insert a zero-location placeholder into `dbObjects` so a freshly
    /// loaded stored object has somewhere to live before the first
    /// `SET_ZONE` locates it (SPEC_FULL.md §3, lazy hydration).
    pub fn ensure_hydrated(&self, do_id: DoId, dclass_id: u16) -> DistributedObject {
        if let Some(existing) = self.db_objects.get_cloned(&do_id) {
            return existing;
        }
        let obj = DistributedObject {
            do_id,
            dclass_id,
            parent_id: 0,
            zone_id: 0,
            fields: HashMap::new(),
        };
        self.db_objects.insert(do_id, obj.clone());
        obj
    }

    /// Every live object currently located at `(parent_id, zone_id)`, across
    /// both registries. Used by interest-zone expansion to find what a
    /// newly covered zone should generate for a client (§4.3).
    pub fn objects_in(&self, parent_id: DoId, zone_id: ZoneId) -> Vec<DistributedObject> {
        let at_location = |obj: &DistributedObject| obj.parent_id == parent_id && obj.zone_id == zone_id;
        let mut found: Vec<DistributedObject> = self
            .objects
            .iter()
            .filter(|e| at_location(e.value()))
            .map(|e| e.value().clone())
            .chain(
                self.db_objects
                    .iter()
                    .filter(|e| at_location(e.value()))
                    .map(|e| e.value().clone()),
            )
            .collect();
        // §4.3: interest-driven generate order must be dclass.number
        // ascending so dependent classes arrive after their prerequisites;
        // `sort_by` is stable so equal keys keep their discovery order.
        found.sort_by_key(|obj| obj.dclass_id);
        found
    }

    pub async fn generate_with_required_other(
        &self,
        parent_id: DoId,
        zone_id: ZoneId,
        dclass_id: u16,
        do_id: DoId,
        fields: Vec<(u16, Value)>,
        sender: Channel,
    ) {
        let named_fields = self.resolve_field_names(dclass_id, fields);
        let obj = DistributedObject {
            do_id,
            dclass_id,
            parent_id,
            zone_id,
            fields: named_fields,
        };
        if self.db_objects.contains_key(&do_id) {
            self.db_objects.insert(do_id, obj.clone());
        } else {
            self.objects.insert(do_id, obj.clone());
        }
        metrics::OBJECTS_GENERATED.inc();
        metrics::LIVE_OBJECTS.inc();
        self.ca().on_generate(obj, sender).await;
    }

    pub async fn delete_ram(&self, do_id: DoId, sender: Channel) {
        let removed = self
            .objects
            .remove(&do_id)
            .or_else(|| self.db_objects.remove(&do_id));
        if let Some((_, obj)) = removed {
            metrics::OBJECTS_DELETED.inc();
            metrics::LIVE_OBJECTS.dec();
            self.ca()
                .on_delete_ram(do_id, obj.parent_id, obj.zone_id, sender)
                .await;
        } else {
            warn!(do_id, "DELETE_RAM for an object the State Server does not have");
        }
    }

    pub async fn set_zone(&self, do_id: DoId, parent_id: DoId, zone_id: ZoneId, sender: Channel) {
        let prev = if let Some(mut entry) = self.db_objects.get_mut(&do_id) {
            let prev = entry.location();
            entry.parent_id = parent_id;
            entry.zone_id = zone_id;
            prev
        } else if let Some(mut entry) = self.objects.get_mut(&do_id) {
            let prev = entry.location();
            entry.parent_id = parent_id;
            entry.zone_id = zone_id;
            prev
        } else {
            warn!(do_id, "SET_ZONE for an object the State Server does not have");
            return;
        };
        self.ca()
            .on_set_zone(do_id, prev, (parent_id, zone_id), sender)
            .await;
    }

    pub async fn update_field(&self, do_id: DoId, field_id: u16, args: Vec<Value>, sender: Channel) {
        let Some(mut obj) = self.get(do_id) else {
            warn!(do_id, "UPDATE_FIELD for an object the State Server does not have");
            return;
        };
        let Some(class) = self.dc_loader.class_by_number(obj.dclass_id) else {
            warn!(dclass_id = obj.dclass_id, "UPDATE_FIELD for an unknown dclass");
            return;
        };
        let Some(field) = class.field_by_number(field_id).cloned() else {
            warn!(field_id, class = %class.name, "UPDATE_FIELD for an unknown field");
            return;
        };
        let value = match field.kind {
            otp_proto::dclass::FieldKind::Atomic | otp_proto::dclass::FieldKind::Molecular => {
                Value::Tuple(args)
            }
            otp_proto::dclass::FieldKind::Parameter => args.into_iter().next().unwrap_or(Value::None),
        };
        obj.fields.insert(field.name.clone(), value.clone());

        let is_db_object = self.db_objects.contains_key(&do_id);
        if is_db_object {
            self.db_objects.insert(do_id, obj.clone());
        } else {
            self.objects.insert(do_id, obj.clone());
        }

        if is_db_object && field.flags.db {
            if let Err(err) = self.persist_field(do_id, &class.name, &field.name, &value).await {
                warn!(do_id, field = %field.name, error = %err, "failed to persist db field update");
            }
        }

        self.ca()
            .on_update_field(do_id, &field.name, value, sender)
            .await;
    }

    async fn persist_field(
        &self,
        do_id: DoId,
        class_name: &str,
        field_name: &str,
        value: &Value,
    ) -> Result<(), crate::db::DbError> {
        let mut stored = match self.db.load(do_id).await? {
            Some(existing) => existing,
            None => StoredObject {
                do_id,
                uu_id: otp_proto::UuId::mint(class_name, do_id, 0),
                class_name: class_name.to_string(),
                version: crate::db::CURRENT_VERSION,
                fields: vec![],
            },
        };
        stored.set_field(field_name, value.clone());
        self.db.save(&stored).await
    }

    fn resolve_field_names(&self, dclass_id: u16, fields: Vec<(u16, Value)>) -> HashMap<String, Value> {
        let class = self.dc_loader.class_by_number(dclass_id);
        let mut named = HashMap::with_capacity(fields.len());
        for (field_id, value) in fields {
            let name = class
                .and_then(|c| c.field_by_number(field_id))
                .map(|f| f.name.clone())
                .unwrap_or_else(|| {
                    warn!(dclass_id, field_id, "generate with an unknown field id");
                    field_id.to_string()
                });
            named.insert(name, value);
        }
        named
    }
}

#[async_trait]
impl LocalSubscriber for StateServer {
    fn channels(&self) -> Vec<Channel> {
        vec![STATESERVER_CHANNEL]
    }

    async fn handle(&self, msg: &DataMessage) {
        let decoded = StateServerMessage::decode(msg.code, msg.payload.clone());
        match decoded {
            Ok(StateServerMessage::GenerateWithRequiredOther {
                parent_id,
                zone_id,
                class_id,
                do_id,
                fields,
            }) => {
                self.generate_with_required_other(parent_id, zone_id, class_id, do_id, fields, msg.sender)
                    .await;
            }
            Ok(StateServerMessage::DeleteRam { do_id }) => {
                self.delete_ram(do_id, msg.sender).await;
            }
            Ok(StateServerMessage::SetZone {
                do_id,
                parent_id,
                zone_id,
            }) => {
                self.set_zone(do_id, parent_id, zone_id, msg.sender).await;
            }
            Ok(StateServerMessage::UpdateField {
                do_id,
                field_id,
                args,
            }) => {
                self.update_field(do_id, field_id, args, msg.sender).await;
            }
            Err(err) => warn!(code = msg.code, error = %err, "unreadable State Server message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::open_backend;
    use otp_proto::dclass::StaticDcLoader;

    async fn test_server() -> (tempfile::TempDir, StateServer) {
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
        (dir, StateServer::new(Arc::new(StaticDcLoader::new()), db))
    }

    struct RecordingCa {
        events: tokio::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CaNotify for RecordingCa {
        async fn on_generate(&self, obj: DistributedObject, _sender: Channel) {
            self.events.lock().await.push(format!("generate:{}", obj.do_id));
        }
        async fn on_delete_ram(&self, do_id: DoId, _p: DoId, _z: ZoneId, _sender: Channel) {
            self.events.lock().await.push(format!("delete:{do_id}"));
        }
        async fn on_set_zone(
            &self,
            do_id: DoId,
            _prev: (DoId, ZoneId),
            _new: (DoId, ZoneId),
            _sender: Channel,
        ) {
            self.events.lock().await.push(format!("move:{do_id}"));
        }
        async fn on_update_field(&self, do_id: DoId, field_name: &str, _value: Value, _sender: Channel) {
            self.events.lock().await.push(format!("field:{do_id}:{field_name}"));
        }
    }

    #[tokio::test]
    async fn generate_then_delete_round_trips_through_the_registry() {
        let (_dir, ss) = test_server().await;
        let ca = Arc::new(RecordingCa {
            events: tokio::sync::Mutex::new(Vec::new()),
        });
        ss.set_ca_notify(ca.clone());

        ss.generate_with_required_other(2000, 2100, 2, 10_000_001, vec![(1, Value::Str("Mickey".into()))], 0)
            .await;
        assert!(ss.get(10_000_001).is_some());
        assert_eq!(
            ss.get(10_000_001).unwrap().fields.get("setName"),
            Some(&Value::Str("Mickey".into()))
        );

        ss.delete_ram(10_000_001, 0).await;
        assert!(ss.get(10_000_001).is_none());

        let events = ca.events.lock().await;
        assert_eq!(events.as_slice(), ["generate:10000001", "delete:10000001"]);
    }

    #[tokio::test]
    async fn update_field_on_an_ephemeral_object_never_persists_even_for_a_db_field() {
        let (_dir, ss) = test_server().await;
        let ca = Arc::new(RecordingCa {
            events: tokio::sync::Mutex::new(Vec::new()),
        });
        ss.set_ca_notify(ca);
        // doId below the persistent floor, created via GENERATE_WITH_REQUIRED,
        // so it lives only in `objects`, never `dbObjects`.
        ss.generate_with_required_other(2000, 2100, 2, 42, vec![], 0).await;

        // field 1 on dclass 2 is "setName", which is db-flagged.
        ss.update_field(42, 1, vec![Value::Str("Mickey".into())], 0).await;

        assert!(!ss.db.exists(42).await.unwrap());
    }

    #[tokio::test]
    async fn set_zone_reports_the_previous_location() {
        let (_dir, ss) = test_server().await;
        let ca = Arc::new(RecordingCa {
            events: tokio::sync::Mutex::new(Vec::new()),
        });
        ss.set_ca_notify(ca);
        ss.generate_with_required_other(2000, 2100, 2, 10_000_002, vec![], 0).await;

        ss.set_zone(10_000_002, 2000, 2200, 0).await;

        assert_eq!(ss.get(10_000_002).unwrap().location(), (2000, 2200));
    }

    #[tokio::test]
    async fn objects_in_finds_everything_at_a_location() {
        let (_dir, ss) = test_server().await;
        let ca = Arc::new(RecordingCa {
            events: tokio::sync::Mutex::new(Vec::new()),
        });
        ss.set_ca_notify(ca);
        ss.generate_with_required_other(2000, 2100, 2, 10_000_004, vec![], 0).await;
        ss.generate_with_required_other(2000, 2100, 2, 10_000_005, vec![], 0).await;
        ss.generate_with_required_other(2000, 2200, 2, 10_000_006, vec![], 0).await;

        let mut found: Vec<_> = ss.objects_in(2000, 2100).iter().map(|o| o.do_id).collect();
        found.sort();
        assert_eq!(found, vec![10_000_004, 10_000_005]);
    }

    #[tokio::test]
    async fn objects_in_orders_by_dclass_number_ascending() {
        let (_dir, ss) = test_server().await;
        let ca = Arc::new(RecordingCa {
            events: tokio::sync::Mutex::new(Vec::new()),
        });
        ss.set_ca_notify(ca);
        // Insert the higher dclass number first so a naive discovery-order
        // listing would get this backwards.
        ss.generate_with_required_other(2000, 2100, 9, 10_000_010, vec![], 0).await;
        ss.generate_with_required_other(2000, 2100, 3, 10_000_011, vec![], 0).await;
        ss.generate_with_required_other(2000, 2100, 5, 10_000_012, vec![], 0).await;

        let ordered: Vec<_> = ss.objects_in(2000, 2100).iter().map(|o| o.dclass_id).collect();
        assert_eq!(ordered, vec![3, 5, 9]);
    }

    #[tokio::test]
    async fn ensure_hydrated_is_idempotent() {
        let (_dir, ss) = test_server().await;
        let first = ss.ensure_hydrated(10_000_003, 1);
        let second = ss.ensure_hydrated(10_000_003, 1);
        assert_eq!(first.location(), (0, 0));
        assert_eq!(second.location(), first.location());
        assert_eq!(ss.objects.len(), 0);
        assert_eq!(ss.db_objects.len(), 1);
    }
}
