//! Packed-binary persistence backend (§4.4 "Packed-binary").
//!
//! Same one-file-per-object layout as [`super::plain`], but the body is a
//! byte stream instead of text: version triple, className, doId, uuId,
//! then `(fieldName, packedValue)` records until EOF. Field values reuse
//! `otp_proto::Value`'s tagged-union encoding rather than a second packer,
//! since every value this backend ever stores already round-trips through
//! that encoding for the SQL backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use otp_proto::{DoId, UuId, Value};

use super::plain::PlainTextBackend;
use super::{Backend, DbError, StoredObject};

pub struct PackedBackend {
    dir: PathBuf,
    extension: String,
    /// The account directory has no binary-format requirement in the
    /// source beyond "key -> doId"; share the plain-text backend's
    /// implementation rather than duplicating it.
    accounts: PlainTextBackend,
}

impl PackedBackend {
    pub fn new(dir: &str, extension: &str, storage_path: &str) -> Result<Self, DbError> {
        std::fs::create_dir_all(dir)?;
        let accounts = PlainTextBackend::new(dir, extension, storage_path)?;
        Ok(Self {
            dir: PathBuf::from(dir),
            extension: extension.to_string(),
            accounts,
        })
    }

    fn object_path(&self, do_id: DoId) -> PathBuf {
        self.dir.join(format!("{do_id}.{}", self.extension))
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn take_string(buf: &mut Bytes, path: &Path) -> Result<String, DbError> {
    if buf.len() < 4 {
        return Err(truncated(path));
    }
    let len = buf.get_u32_le() as usize;
    if buf.len() < len {
        return Err(truncated(path));
    }
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| malformed(path, "invalid utf8 string"))
}

fn truncated(path: &Path) -> DbError {
    malformed(path, "truncated record")
}

fn malformed(path: &Path, reason: &str) -> DbError {
    DbError::Malformed {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl Backend for PackedBackend {
    async fn load(&self, do_id: DoId) -> Result<Option<StoredObject>, DbError> {
        let path = self.object_path(do_id);
        let raw = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut buf = Bytes::from(raw);
        if buf.len() < 6 {
            return Err(truncated(&path));
        }
        let version = (buf.get_u16_le(), buf.get_u16_le(), buf.get_u16_le());
        let class_name = take_string(&mut buf, &path)?;
        if buf.len() < 4 {
            return Err(truncated(&path));
        }
        let file_do_id = buf.get_u32_le();
        if buf.len() < 16 {
            return Err(truncated(&path));
        }
        let uuid_bytes: [u8; 16] = buf.split_to(16).as_ref().try_into().unwrap();
        let uu_id = UuId(uuid::Uuid::from_bytes(uuid_bytes));

        let mut fields = Vec::new();
        while !buf.is_empty() {
            let name = take_string(&mut buf, &path)?;
            if buf.len() < 4 {
                return Err(truncated(&path));
            }
            let len = buf.get_u32_le() as usize;
            if buf.len() < len {
                return Err(truncated(&path));
            }
            let mut value_bytes = buf.split_to(len);
            let value = Value::decode(&mut value_bytes)
                .map_err(|e| malformed(&path, &format!("field {name}: {e}")))?;
            fields.push((name, value));
        }

        Ok(Some(StoredObject {
            do_id: file_do_id,
            uu_id,
            class_name,
            version,
            fields,
        }))
    }

    async fn save(&self, obj: &StoredObject) -> Result<(), DbError> {
        let mut buf = BytesMut::new();
        buf.put_u16_le(obj.version.0);
        buf.put_u16_le(obj.version.1);
        buf.put_u16_le(obj.version.2);
        put_string(&mut buf, &obj.class_name);
        buf.put_u32_le(obj.do_id);
        buf.put_slice(obj.uu_id.as_uuid().as_bytes());
        for (name, value) in &obj.fields {
            put_string(&mut buf, name);
            let encoded = value.to_bytes();
            buf.put_u32_le(encoded.len() as u32);
            buf.put_slice(&encoded);
        }
        std::fs::write(self.object_path(obj.do_id), buf)?;
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
        self.accounts.account_lookup(account_name).await
    }

    async fn account_insert(&self, account_name: &str, do_id: DoId) -> Result<(), DbError> {
        self.accounts.account_insert(account_name, do_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, PackedBackend) {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("game-accounts.db");
        let backend = PackedBackend::new(
            dir.path().to_str().unwrap(),
            "pdb",
            storage.to_str().unwrap(),
        )
        .unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn round_trips_an_object_with_blob_and_list_fields() {
        let (_dir, backend) = backend();
        let obj = StoredObject {
            do_id: 10_000_002,
            uu_id: UuId::mint("DistributedToon", 10_000_002, 0),
            class_name: "DistributedToon".to_string(),
            version: (1, 0, 0),
            fields: vec![
                (
                    "setDNAString".to_string(),
                    Value::Blob(Bytes::from_static(b"\x01\x02\x03")),
                ),
                (
                    "setFriendsList".to_string(),
                    Value::List(vec![Value::U64(10_000_003)]),
                ),
            ],
        };
        backend.save(&obj).await.unwrap();
        let loaded = backend.load(obj.do_id).await.unwrap().unwrap();
        assert_eq!(loaded, obj);
    }

    #[tokio::test]
    async fn missing_object_loads_as_none() {
        let (_dir, backend) = backend();
        assert_eq!(backend.load(9_999_999).await.unwrap(), None);
    }
}
