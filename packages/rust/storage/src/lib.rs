//! Session history storage.
//!
//! The [`SessionStore`] trait is the only storage surface the core depends on.
//! Backends:
//! - [`LibsqlSessionStore`]: libSQL, either an embedded file or a remote server
//! - [`MemorySessionStore`]: in-process, for tests and ephemeral runs
//!
//! **Write rules (all backends):**
//! - appends to one session are serialized by a per-session lock
//! - a turn is never older than the session's latest turn
//! - re-appending a run with an identical payload is a no-op

mod libsql_store;
mod memory;
mod migrations;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::OwnedMutexGuard;

use threatintel_shared::{
    RunId, SessionId, SessionTurn, StorageBackend, StorageConfig, StorageError, expand_home,
};

pub use libsql_store::LibsqlSessionStore;
pub use memory::MemorySessionStore;

/// Result alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StorageError>;

/// What an append did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The turn was written with this per-session sequence number.
    Appended { seq: u64 },
    /// The same run was already stored with an identical payload.
    Duplicate,
}

/// Append-only, per-session history of report runs.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create the backing table/schema if needed. Idempotent.
    async fn init(&self) -> StoreResult<()>;

    /// Append a turn to `session_id`'s history.
    async fn append(&self, session_id: &SessionId, turn: &SessionTurn)
    -> StoreResult<AppendOutcome>;

    /// All turns of a session, oldest first.
    async fn read_history(&self, session_id: &SessionId) -> StoreResult<Vec<SessionTurn>>;

    /// The most recent turn of a session, if any.
    async fn latest(&self, session_id: &SessionId) -> StoreResult<Option<SessionTurn>> {
        Ok(self.read_history(session_id).await?.pop())
    }

    /// Known session ids, sorted.
    async fn list_sessions(&self) -> StoreResult<Vec<SessionId>>;
}

/// Open the backend selected by config.
pub async fn open_store(config: &StorageConfig) -> StoreResult<Arc<dyn SessionStore>> {
    threatintel_shared::validate_table_name(&config.table)
        .map_err(|_| StorageError::InvalidNamespace(config.table.clone()))?;

    let store = match config.backend {
        StorageBackend::Embedded => {
            let path = expand_home(&config.location);
            LibsqlSessionStore::open_local(&path, &config.table).await?
        }
        StorageBackend::Remote => {
            let token = std::env::var(&config.auth_token_env).unwrap_or_default();
            LibsqlSessionStore::open_remote(&config.location, token, &config.table).await?
        }
    };
    Ok(Arc::new(store))
}

// ---------------------------------------------------------------------------
// Shared write discipline
// ---------------------------------------------------------------------------

/// One async mutex per session id. Entries live only while a writer holds or
/// waits on them.
#[derive(Default)]
pub(crate) struct SessionLocks {
    inner: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    /// Wait for exclusive write access to `session_id`.
    pub(crate) async fn lock(&self, session_id: &SessionId) -> SessionGuard<'_> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(session_id.clone()).or_default().clone()
        };
        SessionGuard {
            locks: self,
            session_id: session_id.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Write access to one session. Dropping the last guard for a session
/// removes its map entry.
pub(crate) struct SessionGuard<'a> {
    locks: &'a SessionLocks,
    session_id: SessionId,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let mut map = self.locks.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one in this guard; any more are waiters.
        if map
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            map.remove(&self.session_id);
        }
    }
}

/// Serialized report payload and its SHA-256.
pub(crate) struct Payload {
    pub json: String,
    pub hash: String,
}

pub(crate) fn encode(turn: &SessionTurn) -> StoreResult<Payload> {
    let json = serde_json::to_string(&turn.report)
        .map_err(|e| StorageError::Backend(format!("failed to serialize report: {e}")))?;
    let hash = compute_hash(&json);
    Ok(Payload { json, hash })
}

fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Existing state of a session relevant to an append.
pub(crate) struct AppendCheck<'a> {
    pub session_id: &'a SessionId,
    pub turn: &'a SessionTurn,
    pub payload_hash: &'a str,
    /// Hash already stored under the same run id, if any.
    pub existing_hash: Option<String>,
    /// Timestamp of the latest stored turn, if any.
    pub latest: Option<chrono::DateTime<chrono::Utc>>,
}

/// Decide whether an append is new, a duplicate, or a conflict.
/// `Ok(true)` means write it, `Ok(false)` means it is already stored.
pub(crate) fn check_append(check: AppendCheck<'_>) -> StoreResult<bool> {
    let AppendCheck {
        session_id,
        turn,
        payload_hash,
        existing_hash,
        latest,
    } = check;

    if &turn.session_id != session_id {
        return Err(StorageError::conflict(
            session_id.as_str(),
            format!("turn belongs to session {}", turn.session_id),
        ));
    }

    if let Some(existing) = existing_hash {
        return if existing == payload_hash {
            Ok(false)
        } else {
            Err(StorageError::conflict(
                session_id.as_str(),
                format!("run {} already stored with a different report", turn.run_id),
            ))
        };
    }

    if let Some(latest) = latest {
        if turn.timestamp < latest {
            return Err(StorageError::conflict(
                session_id.as_str(),
                format!(
                    "turn timestamp {} is older than latest {}",
                    turn.timestamp.to_rfc3339(),
                    latest.to_rfc3339()
                ),
            ));
        }
    }

    Ok(true)
}

pub(crate) fn parse_run_id(raw: &str) -> StoreResult<RunId> {
    raw.parse()
        .map_err(|e| StorageError::Backend(format!("invalid run id {raw:?}: {e}")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use threatintel_shared::{
        DEFAULT_HEADER, Report, ReportEntry, RunId, Section, SectionName, SectionStatus,
        SessionId, SessionTurn,
    };

    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    pub fn report(generated_at: DateTime<Utc>, actor: &str) -> Report {
        let sections = SectionName::ALL.map(|name| {
            if name == SectionName::ThreatActors {
                Section {
                    name,
                    text: format!("- **{actor}**: active"),
                    entries: vec![ReportEntry {
                        label: actor.into(),
                        text: "active".into(),
                        sources: vec!["WebSearchAgent".into()],
                        urls: vec![],
                        is_new: true,
                    }],
                    notes: vec![],
                    status: SectionStatus::Populated,
                }
            } else {
                Section::unavailable(name, vec![])
            }
        });
        Report::new(DEFAULT_HEADER, generated_at, sections).unwrap()
    }

    pub fn turn(session: &str, secs: i64, actor: &str) -> SessionTurn {
        SessionTurn {
            session_id: SessionId::new(session).unwrap(),
            run_id: RunId::new(),
            timestamp: at(secs),
            report: report(at(secs), actor),
        }
    }
}
