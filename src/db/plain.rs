//! Plain-text persistence backend (§4.4 "Plain-text").
//!
//! One file per object under `dir/<doId>.<extension>`: a `# DatabaseObject`
//! header line followed by a single JSON line carrying
//! `(className, version, doId, uuId, fields)`. JSON stands in for the
//! source's bespoke textual grammar — it's still a human-readable,
//! line-oriented format, and it spares this backend a hand-rolled parser
//! for a tagged-union value type that already has a byte encoding
//! elsewhere (`otp_proto::Value`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use otp_proto::{DoId, UuId, Value};
use parking_lot::Mutex;
use serde_json::{json, Value as Json};

use super::{Backend, DbError, StoredObject};

const HEADER: &str = "# DatabaseObject";

pub struct PlainTextBackend {
    dir: PathBuf,
    extension: String,
    /// Guards the account-directory file; object files are keyed by doId so
    /// concurrent writes to distinct objects don't collide, but the shared
    /// account index does (§5 "Account directory").
    accounts: Mutex<PathBuf>,
}

impl PlainTextBackend {
    pub fn new(dir: &str, extension: &str, storage_path: &str) -> Result<Self, DbError> {
        std::fs::create_dir_all(dir)?;
        if let Some(parent) = Path::new(storage_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            dir: PathBuf::from(dir),
            extension: extension.to_string(),
            accounts: Mutex::new(PathBuf::from(storage_path)),
        })
    }

    fn object_path(&self, do_id: DoId) -> PathBuf {
        self.dir.join(format!("{do_id}.{}", self.extension))
    }

    fn read_accounts(&self) -> Result<HashMap<String, DoId>, DbError> {
        let path = self.accounts.lock().clone();
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let mut map = HashMap::new();
                for line in content.lines() {
                    let Some((name, id)) = line.split_once(' ') else {
                        continue;
                    };
                    if let Ok(id) = id.trim().parse::<DoId>() {
                        map.insert(name.to_string(), id);
                    }
                }
                Ok(map)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

fn value_to_json(v: &Value) -> Json {
    match v {
        Value::None => Json::Null,
        Value::Bool(b) => json!(b),
        Value::U64(n) => json!({"u": n}),
        Value::I64(n) => json!({"i": n}),
        Value::F64(n) => json!({"f": n}),
        Value::Str(s) => json!(s),
        Value::Blob(b) => json!({"blob": hex_encode(b)}),
        Value::Tuple(items) => json!({"tuple": items.iter().map(value_to_json).collect::<Vec<_>>()}),
        Value::List(items) => json!({"list": items.iter().map(value_to_json).collect::<Vec<_>>()}),
        Value::Dict(pairs) => json!({
            "dict": pairs
                .iter()
                .map(|(k, v)| vec![value_to_json(k), value_to_json(v)])
                .collect::<Vec<_>>()
        }),
    }
}

fn value_from_json(v: &Json) -> Result<Value, DbError> {
    let malformed = |reason: &str| DbError::Malformed {
        path: "<value>".to_string(),
        reason: reason.to_string(),
    };
    Ok(match v {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::String(s) => Value::Str(s.clone()),
        Json::Object(map) => {
            if let Some(n) = map.get("u") {
                Value::U64(n.as_u64().ok_or_else(|| malformed("u field not u64"))?)
            } else if let Some(n) = map.get("i") {
                Value::I64(n.as_i64().ok_or_else(|| malformed("i field not i64"))?)
            } else if let Some(n) = map.get("f") {
                Value::F64(n.as_f64().ok_or_else(|| malformed("f field not f64"))?)
            } else if let Some(b) = map.get("blob") {
                let s = b.as_str().ok_or_else(|| malformed("blob field not string"))?;
                Value::Blob(bytes::Bytes::from(hex_decode(s)?))
            } else if let Some(Json::Array(items)) = map.get("tuple") {
                Value::Tuple(
                    items
                        .iter()
                        .map(value_from_json)
                        .collect::<Result<Vec<_>, _>>()?,
                )
            } else if let Some(Json::Array(items)) = map.get("list") {
                Value::List(
                    items
                        .iter()
                        .map(value_from_json)
                        .collect::<Result<Vec<_>, _>>()?,
                )
            } else if let Some(Json::Array(pairs)) = map.get("dict") {
                let mut decoded = Vec::with_capacity(pairs.len());
                for pair in pairs {
                    let Json::Array(kv) = pair else {
                        return Err(malformed("dict entry not a pair"));
                    };
                    let [k, v] = kv.as_slice() else {
                        return Err(malformed("dict entry not a 2-tuple"));
                    };
                    decoded.push((value_from_json(k)?, value_from_json(v)?));
                }
                Value::Dict(decoded)
            } else {
                return Err(malformed("unrecognised value object"));
            }
        }
        other => return Err(malformed(&format!("unsupported JSON node {other:?}"))),
    })
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, DbError> {
    if s.len() % 2 != 0 {
        return Err(DbError::Malformed {
            path: "<value>".to_string(),
            reason: "odd-length hex blob".to_string(),
        });
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| DbError::Malformed {
                path: "<value>".to_string(),
                reason: "invalid hex digit".to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl Backend for PlainTextBackend {
    async fn load(&self, do_id: DoId) -> Result<Option<StoredObject>, DbError> {
        let path = self.object_path(do_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let body = content
            .lines()
            .find(|line| !line.trim().is_empty() && *line != HEADER)
            .ok_or_else(|| DbError::Malformed {
                path: path.display().to_string(),
                reason: "missing record line".to_string(),
            })?;
        let record: Json = serde_json::from_str(body).map_err(|e| DbError::Malformed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let malformed = || DbError::Malformed {
            path: path.display().to_string(),
            reason: "unexpected record shape".to_string(),
        };
        let class_name = record["className"].as_str().ok_or_else(malformed)?.to_string();
        let version = record["version"].as_array().ok_or_else(malformed)?;
        let [maj, min, sub] = version.as_slice() else {
            return Err(malformed());
        };
        let version = (
            maj.as_u64().ok_or_else(malformed)? as u16,
            min.as_u64().ok_or_else(malformed)? as u16,
            sub.as_u64().ok_or_else(malformed)? as u16,
        );
        let uu_id: UuId = record["uuId"]
            .as_str()
            .ok_or_else(malformed)?
            .parse()
            .map_err(|_| malformed())?;
        let mut fields = Vec::new();
        if let Json::Object(map) = &record["fields"] {
            for (name, v) in map {
                fields.push((name.clone(), value_from_json(v)?));
            }
        }
        Ok(Some(StoredObject {
            do_id,
            uu_id,
            class_name,
            version,
            fields,
        }))
    }

    async fn save(&self, obj: &StoredObject) -> Result<(), DbError> {
        let mut fields = serde_json::Map::new();
        for (name, value) in &obj.fields {
            fields.insert(name.clone(), value_to_json(value));
        }
        let record = json!({
            "className": obj.class_name,
            "version": [obj.version.0, obj.version.1, obj.version.2],
            "doId": obj.do_id,
            "uuId": obj.uu_id.as_uuid().to_string(),
            "fields": fields,
        });
        let content = format!("{HEADER}\n{}\n", serde_json::to_string(&record).unwrap());
        std::fs::write(self.object_path(obj.do_id), content)?;
        Ok(())
    }

    async fn exists(&self, do_id: DoId) -> Result<bool, DbError> {
        Ok(self.object_path(do_id).exists())
    }

    async fn next_do_id(&self) -> Result<DoId, DbError> {
        let mut max = None;
        for entry in std::fs::read_dir(&self.dir)?.flatten() {
            let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str().map(str::to_string)) else {
                continue;
            };
            if let Ok(id) = stem.parse::<DoId>() {
                max = Some(max.map_or(id, |m: DoId| m.max(id)));
            }
        }
        Ok(max.map_or(otp_proto::ids::FIRST_PERSISTENT_DOID, |m| m + 1))
    }

    async fn account_lookup(&self, account_name: &str) -> Result<Option<DoId>, DbError> {
        Ok(self.read_accounts()?.get(account_name).copied())
    }

    async fn account_insert(&self, account_name: &str, do_id: DoId) -> Result<(), DbError> {
        let mut accounts = self.read_accounts()?;
        accounts.insert(account_name.to_string(), do_id);
        let path = self.accounts.lock().clone();
        let content: String = accounts
            .iter()
            .map(|(name, id)| format!("{name} {id}\n"))
            .collect();
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, PlainTextBackend) {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("game-accounts.db");
        let backend = PlainTextBackend::new(
            dir.path().to_str().unwrap(),
            "db",
            storage.to_str().unwrap(),
        )
        .unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn round_trips_an_object_with_composite_fields() {
        let (_dir, backend) = backend();
        let obj = StoredObject {
            do_id: 10_000_001,
            uu_id: UuId::mint("DistributedToon", 10_000_001, 0),
            class_name: "DistributedToon".to_string(),
            version: (1, 0, 0),
            fields: vec![
                ("setName".to_string(), Value::Str("Flippy".to_string())),
                (
                    "setFriendsList".to_string(),
                    Value::List(vec![Value::U64(1), Value::U64(2)]),
                ),
            ],
        };
        backend.save(&obj).await.unwrap();
        assert!(backend.exists(obj.do_id).await.unwrap());
        let loaded = backend.load(obj.do_id).await.unwrap().unwrap();
        assert_eq!(loaded, obj);
    }

    #[tokio::test]
    async fn next_do_id_starts_at_the_persistent_floor_and_increments() {
        let (_dir, backend) = backend();
        assert_eq!(
            backend.next_do_id().await.unwrap(),
            otp_proto::ids::FIRST_PERSISTENT_DOID
        );
        let obj = StoredObject {
            do_id: otp_proto::ids::FIRST_PERSISTENT_DOID,
            uu_id: UuId::mint("Account", otp_proto::ids::FIRST_PERSISTENT_DOID, 0),
            class_name: "Account".to_string(),
            version: (1, 0, 0),
            fields: vec![],
        };
        backend.save(&obj).await.unwrap();
        assert_eq!(
            backend.next_do_id().await.unwrap(),
            otp_proto::ids::FIRST_PERSISTENT_DOID + 1
        );
    }

    #[tokio::test]
    async fn account_directory_round_trips() {
        let (_dir, backend) = backend();
        assert_eq!(backend.account_lookup("flippy").await.unwrap(), None);
        backend.account_insert("flippy", 10_000_005).await.unwrap();
        assert_eq!(
            backend.account_lookup("flippy").await.unwrap(),
            Some(10_000_005)
        );
    }
}
