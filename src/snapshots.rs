// Periodic persistence of full world snapshots to the relational store.
//
// Persistence is best-effort: a failed write or prune logs and moves on,
// and nothing here ever runs under the world lock (the engine hands over
// an already-serialized JSON string).

use std::sync::Arc;

use crate::db::{Database, SnapshotRow};

pub struct SnapshotStore {
    db: Arc<Database>,
    retention_hours: i64,
}

impl SnapshotStore {
    pub fn new(db: Arc<Database>, retention_hours: i64) -> Self {
        SnapshotStore { db, retention_hours }
    }

    /// Save one serialized snapshot and prune anything past retention.
    pub async fn persist(&self, round: u64, timestamp: i64, game_state: &str) {
        let now = chrono::Utc::now().timestamp_millis();
        if let Err(e) = self
            .db
            .save_snapshot(round as i64, game_state, timestamp, now)
            .await
        {
            tracing::error!(round, "failed to persist snapshot: {e}");
            return;
        }
        tracing::debug!(round, bytes = game_state.len(), "snapshot persisted");

        let cutoff = now - self.retention_hours.max(0) * 3_600_000;
        match self.db.prune_snapshots_before(cutoff).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(pruned = n, "expired snapshots removed"),
            Err(e) => tracing::warn!("snapshot prune failed: {e}"),
        }
    }

    pub async fn load(&self, round: u64) -> Option<String> {
        match self.db.load_snapshot_json(round as i64).await {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(round, "snapshot load failed: {e}");
                None
            }
        }
    }

    pub async fn recent(&self, limit: i64) -> Vec<SnapshotRow> {
        match self.db.recent_snapshots(limit).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("snapshot listing failed: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SnapshotStore {
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        SnapshotStore::new(db, 24)
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let store = store().await;
        store.persist(10, 10_000, "{\"round\":10}").await;
        assert_eq!(store.load(10).await.as_deref(), Some("{\"round\":10}"));
        assert!(store.load(11).await.is_none());
    }

    #[tokio::test]
    async fn test_recent_lists_latest_first() {
        let store = store().await;
        store.persist(1, 1_000, "{}").await;
        store.persist(2, 2_000, "{}").await;
        let rows = store.recent(10).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].round, 2);
    }

    #[tokio::test]
    async fn test_persist_prunes_expired_snapshots() {
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        // A snapshot written two days ago, with one hour of retention.
        let two_days_ago = chrono::Utc::now().timestamp_millis() - 2 * 24 * 3_600_000;
        db.save_snapshot(1, "{}", 1_000, two_days_ago).await.unwrap();

        let store = SnapshotStore::new(db, 1);
        store.persist(2, 2_000, "{}").await;
        assert!(store.load(1).await.is_none());
        assert!(store.load(2).await.is_some());
    }
}
