//! A SQLite-backed [`Responder`]/[`Writer`], pooled with `r2d2` rather than
//! a single `Mutex<Connection>`: there's no correctness reason to serialize
//! every connection through one mutex, and pooling lets concurrent queries
//! actually run concurrently against SQLite's own locking.
//!
//! Every row lives in one `points` table keyed by `(point_uuid, stamp)`,
//! where `point_uuid` already carries the deleted bit -- a tombstone and its
//! live row are different keys, exactly as the in-memory backend models it.
//!
//! Pooled connections are recycled after [`IDLE_CONNECTION_TIMEOUT`] idle
//! and each carries its own bounded prepared-statement cache
//! ([`PREPARED_STATEMENT_CACHE_CAPACITY`]).

mod codec;

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use async_trait::async_trait;
use pvs_common::Interval;
use pvs_store::{Backend, Order, ResetSpec, Responder, WriteOutcome, Writer};
use pvs_value::{PointUuid, PointValue, PointValueKind, StateValue, VersionedValue};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};

/// How long an idle pooled connection is kept before `r2d2` recycles it.
const IDLE_CONNECTION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// Per-connection cap on rusqlite's own prepared-statement LRU, mirroring
/// the default used for the responder pool's prepared-statement cache.
const PREPARED_STATEMENT_CACHE_CAPACITY: usize = 10;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS points (
    point_uuid BLOB NOT NULL,
    stamp INTEGER NOT NULL,
    version INTEGER NOT NULL,
    kind INTEGER NOT NULL,
    type_code INTEGER,
    value_blob BLOB,
    state_code INTEGER,
    state_name TEXT,
    PRIMARY KEY (point_uuid, stamp)
);
"#;

/// A pooled SQLite table implementing both halves of the backend interface.
/// Cloning shares the pool; [`SqliteBackend::responder`] hands out a fresh
/// [`SqliteResponder`] per query, one per concurrent query.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
    next_version: Arc<AtomicI64>,
}

/// Caps each pooled connection's own prepared-statement LRU on acquire,
/// since `r2d2_sqlite` hands back a fresh connection with rusqlite's
/// default (unbounded) cache.
#[derive(Debug)]
struct StatementCacheCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for StatementCacheCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.set_prepared_statement_cache_capacity(PREPARED_STATEMENT_CACHE_CAPACITY);
        Ok(())
    }
}

impl SqliteBackend {
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .idle_timeout(Some(IDLE_CONNECTION_TIMEOUT))
            .connection_customizer(Box::new(StatementCacheCustomizer))
            .build(manager)?;
        let conn = pool.get()?;
        conn.execute_batch(SCHEMA)?;
        let max_version: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM points", [], |row| row.get(0))
            .optional()?
            .flatten();
        drop(conn);
        Ok(Self {
            pool,
            next_version: Arc::new(AtomicI64::new(max_version.unwrap_or(0))),
        })
    }

    pub fn responder(&self) -> SqliteResponder {
        SqliteResponder {
            pool: self.pool.clone(),
            rows: Vec::new(),
            cursor: 0,
        }
    }
}

#[async_trait]
impl Writer for SqliteBackend {
    async fn upsert(&self, value: &VersionedValue) -> anyhow::Result<WriteOutcome> {
        let conn = self.pool.get()?;
        let uuid = value.point_value.point_uuid.as_bytes().to_vec();
        let stamp = value.stamp();

        let existed = conn
            .query_row(
                "SELECT 1 FROM points WHERE point_uuid = ?1 AND stamp = ?2",
                params![uuid, stamp],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        let (type_code, blob) = match &value.point_value.value {
            Some(v) => (Some(v.type_code() as i64), Some(codec::encode_value(v)?)),
            None => (None, None),
        };
        let (state_code, state_name) = match &value.point_value.state {
            Some(s) => (s.code, s.name.clone()),
            None => (None, None),
        };

        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;

        conn.execute(
            "INSERT INTO points (point_uuid, stamp, version, kind, type_code, value_blob, state_code, state_name)
             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, ?7)
             ON CONFLICT(point_uuid, stamp) DO UPDATE SET
                version = excluded.version,
                kind = excluded.kind,
                type_code = excluded.type_code,
                value_blob = excluded.value_blob,
                state_code = excluded.state_code,
                state_name = excluded.state_name",
            params![uuid, stamp, version, type_code, blob, state_code, state_name],
        )?;

        Ok(if existed { WriteOutcome::Replaced } else { WriteOutcome::Inserted })
    }

    async fn delete(&self, point_uuid: PointUuid, stamp: i64, drop_deleted: bool) -> anyhow::Result<u64> {
        let conn = self.pool.get()?;
        let plain = point_uuid.undeleted().as_bytes().to_vec();
        let removed = conn.execute(
            "DELETE FROM points WHERE point_uuid = ?1 AND stamp = ?2",
            params![plain, stamp],
        )? as u64;

        if removed > 0 && !drop_deleted {
            let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
            let shadow = point_uuid.deleted().as_bytes().to_vec();
            conn.execute(
                "INSERT INTO points (point_uuid, stamp, version, kind, type_code, value_blob, state_code, state_name)
                 VALUES (?1, ?2, ?3, 1, NULL, NULL, NULL, NULL)
                 ON CONFLICT(point_uuid, stamp) DO UPDATE SET
                    version = excluded.version, kind = 1, type_code = NULL, value_blob = NULL,
                    state_code = NULL, state_name = NULL",
                params![shadow, stamp, version],
            )?;
        }
        Ok(removed)
    }

    async fn purge(&self, point_uuid: PointUuid, interval: Interval) -> anyhow::Result<u64> {
        let conn = self.pool.get()?;
        let plain = point_uuid.undeleted().as_bytes().to_vec();
        let shadow = point_uuid.deleted().as_bytes().to_vec();
        let after = interval.after.unwrap_or(i64::MIN);
        let before = interval.before.unwrap_or(i64::MAX);
        let removed = conn.execute(
            "DELETE FROM points WHERE point_uuid IN (?1, ?2) AND stamp >= ?3 AND stamp < ?4",
            params![plain, shadow, after, before],
        )? as u64;
        Ok(removed)
    }

    async fn commit(&self) -> anyhow::Result<()> {
        // Every statement above runs in SQLite's default autocommit mode, so
        // there's nothing left to flush here; kept as a no-op hook so a
        // future batching change has somewhere to put a transaction.
        Ok(())
    }
}

impl Backend for SqliteBackend {
    fn new_responder(&self) -> Box<dyn Responder> {
        Box::new(self.responder())
    }

    fn writer(&self) -> &dyn Writer {
        self
    }
}

/// A prepared iteration against a [`SqliteBackend`]'s table. Materializes
/// the full matching row set on `reset` rather than streaming row-by-row --
/// simpler than a cursor-held `rusqlite::Statement`, at the cost of holding
/// a query's whole result set in memory (acceptable here since the core
/// cursor already re-windows in batches bounded by `backend.limit` --
/// this backend just reports `limit() == 0`, i.e. unbounded, so no
/// re-window ever triggers in practice).
pub struct SqliteResponder {
    pool: Pool<SqliteConnectionManager>,
    rows: Vec<VersionedValue>,
    cursor: usize,
}

#[async_trait]
impl Responder for SqliteResponder {
    async fn reset(&mut self, spec: Option<ResetSpec>) -> anyhow::Result<()> {
        self.cursor = 0;
        self.rows.clear();
        let Some = spec else {
            return Ok(());
        };

        let conn = self.pool.get()?;
        let include_deleted = spec.query.is_deleted();
        let after = spec.query.interval.after.unwrap_or(i64::MIN);
        let before = spec.query.interval.before.unwrap_or(i64::MAX);
        let order_col = if spec.query.is_pull() { "version" } else { "stamp, version" };
        let direction = if matches! { "DESC" } else { "ASC" };

        const COLUMNS: &str =
            "point_uuid, stamp, version, kind, type_code, value_blob, state_code, state_name";

        self.rows = match spec.point_uuid {
            Some(p) if include_deleted => {
                let plain = p.undeleted().as_bytes().to_vec();
                let shadow = p.deleted().as_bytes().to_vec();
                let sql = format!(
                    "SELECT {COLUMNS} FROM points WHERE point_uuid IN (?1, ?2) AND stamp >= ?3 AND stamp < ?4 ORDER BY {order_col} {direction}"
                );
                query_rows(&conn, &sql, params![plain, shadow, after, before])?
            },
            Some(p) => {
                let plain = p.undeleted().as_bytes().to_vec();
                let sql = format!(
                    "SELECT {COLUMNS} FROM points WHERE point_uuid = ?1 AND stamp >= ?2 AND stamp < ?3 ORDER BY {order_col} {direction}"
                );
                query_rows(&conn, &sql, params![plain, after, before])?
            },
            None => {
                let kind_clause = if include_deleted { "" } else { " AND kind = 0" };
                let sql = format!(
                    "SELECT {COLUMNS} FROM points WHERE stamp >= ?1 AND stamp < ?2{kind_clause} ORDER BY {order_col} {direction}"
                );
                query_rows(&conn, &sql, params![after, before])?
            },
        };
        Ok(())
    }

    async fn next(&mut self) -> anyhow::Result<Option<VersionedValue>> {
        let next = self.rows.get(self.cursor).cloned();
        if next.is_some() {
            self.cursor += 1;
        }
        Ok(next)
    }

    async fn count(&mut self) -> anyhow::Result<u64> {
        Ok(self.rows.len() as u64)
    }

    fn limit(&self) -> u32 {
        0
    }
}

fn query_rows(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> anyhow::Result<Vec<VersionedValue>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, row_to_value)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(anyhow::Error::from)
}

fn row_to_value(row: &rusqlite::Row) -> rusqlite::Result<VersionedValue> {
    let uuid_bytes: Vec<u8> = row.get(0)?;
    let uuid_array: [u8; 16] = uuid_bytes.try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Blob,
            "point_uuid column is not 16 bytes".into(),
        )
    })?;
    let uuid = PointUuid::from_bytes(uuid_array);
    let stamp: i64 = row.get(1)?;
    let version: i64 = row.get(2)?;
    let kind: i64 = row.get(3)?;
    let type_code: Option<i64> = row.get(4)?;
    let value_blob: Option<Vec<u8>> = row.get(5)?;
    let state_code: Option<i64> = row.get(6)?;
    let state_name: Option<String> = row.get(7)?;

    let value = match (type_code, value_blob) {
        (Some(code), Some(blob)) => Some(codec::decode_value(code as u8, &blob).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Blob, e.into())
        })?),
        _ => None,
    };
    let state = if state_code.is_some() || state_name.is_some() {
        Some(StateValue {
            code: state_code,
            name: state_name,
        })
    } else {
        None
    };

    Ok(VersionedValue {
        point_value: PointValue {
            point_uuid: uuid,
            stamp,
            state,
            value,
        },
        version,
        kind: match kind {
            0 => PointValueKind::Value,
            1 => PointValueKind::Deleted,
            _ => PointValueKind::Purged,
        },
    })
}

#[cfg(test)]
mod tests {
    use pvs_value::Value;
    use tempfile::TempDir;

    use super::*;

    fn backend() -> (TempDir, SqliteBackend) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.sqlite3");
        let backend = SqliteBackend::new(path.to_str().unwrap()).unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn upsert_then_select_round_trips_the_value() {
        let (_dir, backend) = backend();
        let uuid = PointUuid::new_v4();
        backend
            .upsert(&VersionedValue::value(uuid, 10, 1, Value::String("hi".into())))
            .await
            .unwrap();

        let mut responder = backend.responder();
        responder
            .reset(Some(ResetSpec {
                point_uuid: Some(uuid),
                query: pvs_store::StoreValuesQueryBuilder::new()
                    .point(pvs_store::query::QueryPoint::Uuid(uuid), false)
                    .flag(pvs_store::query::QueryFlags::MULTIPLE)
                    .flag(pvs_store::query::QueryFlags::FORWARD)
                    .build()
                    .unwrap(),
                order: Order::Forward,
            }))
            .await
            .unwrap();

        let fetched = responder.next().await.unwrap().unwrap();
        assert_eq!(fetched.point_value.value, Some(Value::String("hi".into())));
    }

    #[tokio::test]
    async fn delete_then_purge_removes_the_tombstone() {
        let (_dir, backend) = backend();
        let uuid = PointUuid::new_v4();
        backend
            .upsert(&VersionedValue::value(uuid, 10, 1, Value::Signed64(5)))
            .await
            .unwrap();
        backend.delete(uuid, 10, false).await.unwrap();

        let removed = backend
            .purge(uuid, Interval::new(Some(0), Some(20)))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }
}
