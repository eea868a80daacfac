//! libSQL session store: embedded file (offline) or remote server (sqld / Turso).
//!
//! Both modes share the same schema and queries; only the connection differs.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use tracing::{debug, info};

use threatintel_shared::{Report, SessionId, SessionTurn, StorageError};

use crate::migrations;
use crate::{
    AppendCheck, AppendOutcome, SessionLocks, SessionStore, StoreResult, check_append, encode,
    parse_run_id,
};

/// Session store backed by a libSQL database.
pub struct LibsqlSessionStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    table: String,
    locks: SessionLocks,
}

fn backend(e: libsql::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

impl LibsqlSessionStore {
    /// Open or create an embedded database file at `path` (or `:memory:`).
    pub async fn open_local(path: &Path, table: &str) -> StoreResult<Self> {
        if path.as_os_str() != ":memory:" {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Connection(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!(path = %path.display(), table, "opened embedded session store");
        Self::from_database(db, table).await
    }

    /// Connect to a remote libSQL server.
    pub async fn open_remote(url: &str, auth_token: String, table: &str) -> StoreResult<Self> {
        let db = libsql::Builder::new_remote(url.to_string(), auth_token)
            .build()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!(url, table, "opened remote session store");
        Self::from_database(db, table).await
    }

    async fn from_database(db: Database, table: &str) -> StoreResult<Self> {
        threatintel_shared::validate_table_name(table)
            .map_err(|_| StorageError::InvalidNamespace(table.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self {
            db,
            conn,
            table: table.to_string(),
            locks: SessionLocks::default(),
        };
        store.init().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> StoreResult<()> {
        self.conn
            .execute_batch(&migrations::tracking_table_sql(&self.table))
            .await
            .map_err(backend)?;

        let current_version = self.get_schema_version().await?;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    table = %self.table,
                    "applying migration"
                );
                self.conn
                    .execute_batch(&migration.sql_for(&self.table))
                    .await
                    .map_err(|e| {
                        StorageError::Backend(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> StoreResult<u32> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT COALESCE(MAX(version), 0) FROM {}_migrations", self.table),
                params![],
            )
            .await
            .map_err(backend)?;

        match rows.next().await.map_err(backend)? {
            Some(row) => Ok(row.get::<u32>(0).unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Hash stored under `(session_id, run_id)`, if any.
    async fn existing_hash(&self, session_id: &str, run_id: &str) -> StoreResult<Option<String>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT report_hash FROM {} WHERE session_id = ?1 AND run_id = ?2",
                    self.table
                ),
                params![session_id, run_id],
            )
            .await
            .map_err(backend)?;

        match rows.next().await.map_err(backend)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(backend)?)),
            None => Ok(None),
        }
    }

    /// Timestamp of the newest turn of a session.
    async fn latest_timestamp(&self, session_id: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT created_at FROM {} WHERE session_id = ?1
                     ORDER BY created_at_us DESC, seq DESC LIMIT 1",
                    self.table
                ),
                params![session_id],
            )
            .await
            .map_err(backend)?;

        match rows.next().await.map_err(backend)? {
            Some(row) => Ok(Some(parse_timestamp(&row.get::<String>(0).map_err(backend)?)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SessionStore for LibsqlSessionStore {
    async fn init(&self) -> StoreResult<()> {
        self.run_migrations().await
    }

    async fn append(
        &self,
        session_id: &SessionId,
        turn: &SessionTurn,
    ) -> StoreResult<AppendOutcome> {
        let _guard = self.locks.lock(session_id).await;

        let payload = encode(turn)?;
        let run_id = turn.run_id.to_string();

        let write = check_append(AppendCheck {
            session_id,
            turn,
            payload_hash: &payload.hash,
            existing_hash: self.existing_hash(session_id.as_str(), &run_id).await?,
            latest: self.latest_timestamp(session_id.as_str()).await?,
        })?;
        if !write {
            debug!(session = %session_id, run = %run_id, "turn already stored");
            return Ok(AppendOutcome::Duplicate);
        }

        // Single statement: the sequence number is assigned atomically with the insert.
        let mut rows = self
            .conn
            .query(
                &format!(
                    "INSERT INTO {t} (session_id, seq, run_id, created_at, created_at_us, report_json, report_hash)
                     SELECT ?1, COALESCE(MAX(seq), 0) + 1, ?2, ?3, ?4, ?5, ?6 FROM {t} WHERE session_id = ?1
                     RETURNING seq",
                    t = self.table
                ),
                params![
                    session_id.as_str(),
                    run_id.as_str(),
                    turn.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                    turn.timestamp.timestamp_micros(),
                    payload.json,
                    payload.hash,
                ],
            )
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("UNIQUE constraint failed") {
                    StorageError::conflict(session_id.as_str(), message)
                } else {
                    StorageError::Backend(message)
                }
            })?;

        let seq = match rows.next().await.map_err(backend)? {
            Some(row) => row.get::<i64>(0).map_err(backend)?,
            None => return Err(StorageError::Backend("insert returned no sequence".into())),
        };

        debug!(session = %session_id, run = %run_id, seq, "appended session turn");
        Ok(AppendOutcome::Appended {
            seq: u64::try_from(seq).unwrap_or_default(),
        })
    }

    async fn read_history(&self, session_id: &SessionId) -> StoreResult<Vec<SessionTurn>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT run_id, created_at, report_json FROM {}
                     WHERE session_id = ?1 ORDER BY created_at_us, seq",
                    self.table
                ),
                params![session_id.as_str()],
            )
            .await
            .map_err(backend)?;

        let mut turns = Vec::new();
        while let Some(row) = rows.next().await.map_err(backend)? {
            let run_id = parse_run_id(&row.get::<String>(0).map_err(backend)?)?;
            let timestamp = parse_timestamp(&row.get::<String>(1).map_err(backend)?)?;
            let report = decode_report(&row.get::<String>(2).map_err(backend)?)?;
            turns.push(SessionTurn {
                session_id: session_id.clone(),
                run_id,
                timestamp,
                report,
            });
        }
        Ok(turns)
    }

    async fn list_sessions(&self) -> StoreResult<Vec<SessionId>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT DISTINCT session_id FROM {} ORDER BY session_id",
                    self.table
                ),
                params![],
            )
            .await
            .map_err(backend)?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await.map_err(backend)? {
            let raw = row.get::<String>(0).map_err(backend)?;
            let id = SessionId::new(raw).map_err(|e| StorageError::Backend(e.to_string()))?;
            sessions.push(id);
        }
        Ok(sessions)
    }
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::Backend(format!("invalid timestamp {raw:?}: {e}")))
}

fn decode_report(json: &str) -> StoreResult<Report> {
    let report: Report = serde_json::from_str(json)
        .map_err(|e| StorageError::Backend(format!("corrupt report payload: {e}")))?;
    report
        .validate()
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, report, turn};
    use std::sync::Arc;
    use threatintel_shared::RunId;
    use uuid::Uuid;

    async fn test_store() -> LibsqlSessionStore {
        let tmp = std::env::temp_dir().join(format!("ti_test_{}.db", Uuid::now_v7()));
        LibsqlSessionStore::open_local(&tmp, "threat_intel_sessions")
            .await
            .expect("open test store")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.get_schema_version().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("ti_test_{}.db", Uuid::now_v7()));
        let s1 = LibsqlSessionStore::open_local(&tmp, "turns").await.expect("first open");
        drop(s1);
        let s2 = LibsqlSessionStore::open_local(&tmp, "turns").await.expect("second open");
        assert_eq!(s2.get_schema_version().await.unwrap(), 2);
        s2.init().await.expect("init again");
    }

    #[tokio::test]
    async fn append_and_read_in_order() {
        let store = test_store().await;
        let session = SessionId::new("abc").unwrap();

        let first = turn("abc", 0, "LockBit");
        let second = turn("abc", 60, "Clop");
        assert_eq!(
            store.append(&session, &first).await.unwrap(),
            AppendOutcome::Appended { seq: 1 }
        );
        assert_eq!(
            store.append(&session, &second).await.unwrap(),
            AppendOutcome::Appended { seq: 2 }
        );

        let history = store.read_history(&session).await.unwrap();
        assert_eq!(history, vec![first, second.clone()]);
        assert!(history[0].timestamp < history[1].timestamp);
        assert_eq!(store.latest(&session).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn reappending_same_run_is_noop() {
        let store = test_store().await;
        let session = SessionId::new("abc").unwrap();
        let t = turn("abc", 0, "LockBit");

        store.append(&session, &t).await.unwrap();
        assert_eq!(store.append(&session, &t).await.unwrap(), AppendOutcome::Duplicate);
        assert_eq!(store.read_history(&session).await.unwrap().len(), 1);

        let mut changed = t.clone();
        changed.report = report(at(0), "Clop");
        let err = store.append(&session, &changed).await.unwrap_err();
        assert!(matches!(err, StorageError::WriteConflict { .. }));
    }

    #[tokio::test]
    async fn older_turn_is_rejected() {
        let store = test_store().await;
        let session = SessionId::new("abc").unwrap();
        store.append(&session, &turn("abc", 60, "LockBit")).await.unwrap();

        let err = store
            .append(&session, &turn("abc", 0, "Clop"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("older than latest"));
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let store = test_store().await;
        let a = SessionId::new("a").unwrap();
        let b = SessionId::new("b").unwrap();
        store.append(&b, &turn("b", 60, "Clop")).await.unwrap();
        // An older timestamp is fine in a different session.
        store.append(&a, &turn("a", 0, "LockBit")).await.unwrap();

        assert_eq!(store.read_history(&a).await.unwrap().len(), 1);
        assert_eq!(store.list_sessions().await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn concurrent_appends_get_distinct_sequence_numbers() {
        let store = Arc::new(test_store().await);
        let session = SessionId::new("busy").unwrap();
        let ts = at(0);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                let t = SessionTurn {
                    session_id: session.clone(),
                    run_id: RunId::new(),
                    timestamp: ts,
                    report: report(ts, &format!("actor-{i}")),
                };
                store.append(&session, &t).await
            }));
        }

        let mut seqs = Vec::new();
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                AppendOutcome::Appended { seq } => seqs.push(seq),
                AppendOutcome::Duplicate => panic!("unexpected duplicate"),
            }
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=8).collect::<Vec<u64>>());
        assert_eq!(store.read_history(&session).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn mismatched_session_is_conflict() {
        let store = test_store().await;
        let err = store
            .append(&SessionId::new("other").unwrap(), &turn("abc", 0, "LockBit"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::WriteConflict { .. }));
    }
}
