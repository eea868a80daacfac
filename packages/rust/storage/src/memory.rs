//! In-process session store. Same contract as the libSQL backend, nothing persisted.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use threatintel_shared::{SessionId, SessionTurn};

use crate::{
    AppendCheck, AppendOutcome, SessionLocks, SessionStore, StoreResult, check_append, encode,
};

struct StoredTurn {
    turn: SessionTurn,
    hash: String,
}

/// Session store kept in memory. Used by tests and `--ephemeral` runs.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<BTreeMap<SessionId, Vec<StoredTurn>>>,
    locks: SessionLocks,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn init(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn append(
        &self,
        session_id: &SessionId,
        turn: &SessionTurn,
    ) -> StoreResult<AppendOutcome> {
        let _guard = self.locks.lock(session_id).await;
        let payload = encode(turn)?;

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let history = sessions.entry(session_id.clone()).or_default();

        let write = check_append(AppendCheck {
            session_id,
            turn,
            payload_hash: &payload.hash,
            existing_hash: history
                .iter()
                .find(|s| s.turn.run_id == turn.run_id)
                .map(|s| s.hash.clone()),
            latest: history.last().map(|s| s.turn.timestamp),
        })?;
        if !write {
            return Ok(AppendOutcome::Duplicate);
        }

        history.push(StoredTurn {
            turn: turn.clone(),
            hash: payload.hash,
        });
        Ok(AppendOutcome::Appended {
            seq: history.len() as u64,
        })
    }

    async fn read_history(&self, session_id: &SessionId) -> StoreResult<Vec<SessionTurn>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions
            .get(session_id)
            .map(|h| h.iter().map(|s| s.turn.clone()).collect())
            .unwrap_or_default())
    }

    async fn list_sessions(&self) -> StoreResult<Vec<SessionId>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions
            .iter()
            .filter(|(_, h)| !h.is_empty())
            .map(|(id, _)| id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::turn;
    use threatintel_shared::StorageError;

    #[tokio::test]
    async fn append_read_and_dedupe() {
        let store = MemorySessionStore::new();
        let session = SessionId::new("abc").unwrap();
        let first = turn("abc", 0, "LockBit");
        let second = turn("abc", 30, "Clop");

        store.append(&session, &first).await.unwrap();
        store.append(&session, &second).await.unwrap();
        assert_eq!(store.append(&session, &first).await.unwrap(), AppendOutcome::Duplicate);

        let history = store.read_history(&session).await.unwrap();
        assert_eq!(history, vec![first, second]);
        assert_eq!(store.list_sessions().await.unwrap(), vec![session]);
    }

    #[tokio::test]
    async fn rejects_out_of_order_turns() {
        let store = MemorySessionStore::new();
        let session = SessionId::new("abc").unwrap();
        store.append(&session, &turn("abc", 30, "Clop")).await.unwrap();
        let err = store
            .append(&session, &turn("abc", 10, "LockBit"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::WriteConflict { .. }));
        // History is unchanged.
        assert_eq!(store.read_history(&session).await.unwrap().len(), 1);
    }
}
