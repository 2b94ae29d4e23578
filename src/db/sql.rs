//! Relational persistence backend (§4.4 "Relational").
//!
//! A fixed `objects`/`accounts` pair plus one `<className>_fields` table
//! per distributed class, columns added on demand as new `db` fields are
//! saved. Field values round-trip through `otp_proto::Value`'s tagged-union
//! byte encoding into a BLOB column, so the backend never needs to know a
//! field's DC type — only its name.
//!
//! §9 flags the source's per-class table name and column interpolation as
//! a SQL-injection pitfall ("save uses string interpolation for SQL
//! identifiers"); [`validate_identifier`] is the fix, run before any class
//! or field name is spliced into DDL.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use otp_proto::{DoId, UuId, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Column, Row, SqlitePool};
use tracing::info;

use super::{Backend, DbError, StoredObject};

pub struct SqlBackend {
    pool: SqlitePool,
}

/// SQLite identifiers can't be bound as query parameters; only names
/// matching this shape are ever interpolated into DDL/DML strings.
fn validate_identifier(name: &str) -> Result<(), DbError> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(DbError::UnsafeIdentifier(name.to_string()))
    }
}

fn fields_table(class_name: &str) -> String {
    format!("{class_name}_fields")
}

impl SqlBackend {
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    pub async fn new(path: &str) -> Result<Self, DbError> {
        let pool = if path == ":memory:" {
            let options = SqliteConnectOptions::new()
                .filename("file::memory:")
                .shared_cache(true)
                .create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        Self::run_migrations(&pool).await?;
        info!(path = %path, "SQL database backend connected");
        Ok(Self { pool })
    }

    /// Checks for `objects`/`accounts` before applying the embedded
    /// migration, the same existence-gated pattern the teacher uses so a
    /// restart never re-runs a migration against a populated database.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        async fn table_exists(pool: &SqlitePool, table: &str) -> bool {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
            )
            .bind(table)
            .fetch_one(pool)
            .await
            .unwrap_or(false)
        }

        if !table_exists(pool, "objects").await || !table_exists(pool, "accounts").await {
            for statement in include_str!("../../migrations/001_init.sql").split(';') {
                let sql = statement.trim();
                if sql.is_empty() || sql.starts_with("--") {
                    continue;
                }
                sqlx::query(sql).execute(pool).await?;
            }
            info!("SQL database migrations applied (001_init)");
        }
        Ok(())
    }

    async fn ensure_class_table(&self, class_name: &str, field_names: &[&str]) -> Result<(), DbError> {
        validate_identifier(class_name)?;
        let table = fields_table(class_name);
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (do_id INTEGER PRIMARY KEY)"
        ))
        .execute(&self.pool)
        .await?;

        let existing: Vec<String> = sqlx::query(&format!("PRAGMA table_info(\"{table}\")"))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

        for field in field_names {
            validate_identifier(field)?;
            if existing.iter().any(|c| c == field) {
                continue;
            }
            sqlx::query(&format!("ALTER TABLE \"{table}\" ADD COLUMN \"{field}\" BLOB"))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for SqlBackend {
    async fn load(&self, do_id: DoId) -> Result<Option<StoredObject>, DbError> {
        let Some(header) = sqlx::query(
            "SELECT class_name, uu_id, version_maj, version_min, version_sub FROM objects WHERE do_id = ?",
        )
        .bind(do_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let class_name: String = header.get("class_name");
        let uu_id_str: String = header.get("uu_id");
        let uu_id: UuId = uu_id_str
            .parse()
            .map_err(|_| DbError::Malformed {
                path: "objects".to_string(),
                reason: format!("invalid uuId {uu_id_str:?}"),
            })?;
        let version = (
            header.get::<i64, _>("version_maj") as u16,
            header.get::<i64, _>("version_min") as u16,
            header.get::<i64, _>("version_sub") as u16,
        );

        validate_identifier(&class_name)?;
        let table = fields_table(&class_name);
        let mut fields = Vec::new();
        if let Some(row) = sqlx::query(&format!("SELECT * FROM \"{table}\" WHERE do_id = ?"))
            .bind(do_id)
            .fetch_optional(&self.pool)
            .await?
        {
            for column in row.columns() {
                if column.name() == "do_id" {
                    continue;
                }
                let raw: Option<Vec<u8>> = row.try_get(column.ordinal())?;
                if let Some(bytes) = raw {
                    let mut buf = Bytes::from(bytes);
                    let value = Value::decode(&mut buf).map_err(|e| DbError::Malformed {
                        path: table.clone(),
                        reason: format!("field {}: {e}", column.name()),
                    })?;
                    fields.push((column.name().to_string(), value));
                }
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
        validate_identifier(&obj.class_name)?;
        let field_names: Vec<&str> = obj.fields.iter().map(|(n, _)| n.as_str()).collect();
        self.ensure_class_table(&obj.class_name, &field_names).await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO objects (do_id, class_name, uu_id, version_maj, version_min, version_sub)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(do_id) DO UPDATE SET
                class_name = excluded.class_name,
                uu_id = excluded.uu_id,
                version_maj = excluded.version_maj,
                version_min = excluded.version_min,
                version_sub = excluded.version_sub",
        )
        .bind(obj.do_id)
        .bind(&obj.class_name)
        .bind(obj.uu_id.as_uuid().to_string())
        .bind(obj.version.0 as i64)
        .bind(obj.version.1 as i64)
        .bind(obj.version.2 as i64)
        .execute(&mut *tx)
        .await?;

        let table = fields_table(&obj.class_name);
        let columns: Vec<String> = std::iter::once("do_id".to_string())
            .chain(field_names.iter().map(|n| format!("\"{n}\"")))
            .collect();
        let placeholders: Vec<&str> = std::iter::once("?").chain(field_names.iter().map(|_| "?")).collect();
        let sql = format!(
            "INSERT OR REPLACE INTO \"{table}\" ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        let mut query = sqlx::query(&sql).bind(obj.do_id);
        for (_, value) in &obj.fields {
            query = query.bind(value.to_bytes().to_vec());
        }
        query.execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn exists(&self, do_id: DoId) -> Result<bool, DbError> {
        let found: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM objects WHERE do_id = ?)")
                .bind(do_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(found)
    }

    async fn next_do_id(&self) -> Result<DoId, DbError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(do_id) FROM objects")
            .fetch_one(&self.pool)
            .await?;
        Ok(match max {
            Some(m) => (m as DoId) + 1,
            None => otp_proto::ids::FIRST_PERSISTENT_DOID,
        })
    }

    async fn account_lookup(&self, account_name: &str) -> Result<Option<DoId>, DbError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT do_id FROM accounts WHERE account_name = ?")
                .bind(account_name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id,)| id as DoId))
    }

    async fn account_insert(&self, account_name: &str, do_id: DoId) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO accounts (account_name, do_id) VALUES (?, ?)
             ON CONFLICT(account_name) DO UPDATE SET do_id = excluded.do_id",
        )
        .bind(account_name)
        .bind(do_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_an_object_through_a_dynamic_class_table() {
        let backend = SqlBackend::new(":memory:").await.unwrap();
        let obj = StoredObject {
            do_id: 10_000_010,
            uu_id: UuId::mint("DistributedToon", 10_000_010, 0),
            class_name: "DistributedToon".to_string(),
            version: (1, 0, 0),
            fields: vec![
                ("setName".to_string(), Value::Str("Minnie".to_string())),
                ("setPetId".to_string(), Value::U64(0)),
            ],
        };
        backend.save(&obj).await.unwrap();
        assert!(backend.exists(obj.do_id).await.unwrap());
        let loaded = backend.load(obj.do_id).await.unwrap().unwrap();
        assert_eq!(loaded.class_name, obj.class_name);
        assert_eq!(loaded.field("setName"), obj.field("setName"));
    }

    #[tokio::test]
    async fn rejects_unsafe_class_names() {
        let backend = SqlBackend::new(":memory:").await.unwrap();
        let obj = StoredObject {
            do_id: 10_000_011,
            uu_id: UuId::mint("Evil", 10_000_011, 0),
            class_name: "Evil\"; DROP TABLE objects; --".to_string(),
            version: (1, 0, 0),
            fields: vec![],
        };
        assert!(matches!(
            backend.save(&obj).await,
            Err(DbError::UnsafeIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn next_do_id_starts_at_the_persistent_floor() {
        let backend = SqlBackend::new(":memory:").await.unwrap();
        assert_eq!(
            backend.next_do_id().await.unwrap(),
            otp_proto::ids::FIRST_PERSISTENT_DOID
        );
    }

    #[tokio::test]
    async fn account_directory_round_trips() {
        let backend = SqlBackend::new(":memory:").await.unwrap();
        backend.account_insert("minnie", 10_000_020).await.unwrap();
        assert_eq!(
            backend.account_lookup("minnie").await.unwrap(),
            Some(10_000_020)
        );
    }
}
