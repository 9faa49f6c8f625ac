// Database access layer using sqlx's Any driver (supports SQLite and PostgreSQL).

use serde::{Deserialize, Serialize};
use sqlx::any::{AnyPoolOptions, AnyQueryResult};
use sqlx::AnyPool;

/// Account row: one per external identity. `key` is the durable per-account
/// credential; it rotates when the identity proof changes.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccountRow {
    pub uid: String,
    pub paste: String,
    pub key: String,
    pub created_at: i64,
    pub last_login: i64,
}

/// Aggregated per-account game statistics for the leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LeaderboardRow {
    pub uid: String,
    pub player_name: String,
    pub max_length: i64,
    pub kills: i64,
    pub deaths: i64,
    pub games_played: i64,
    pub total_food: i64,
    pub last_round: i64,
    pub timestamp: i64,
}

/// Metadata about one persisted world snapshot (the JSON body is loaded
/// separately).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SnapshotRow {
    pub id: i64,
    pub round: i64,
    pub timestamp: i64,
    pub created_at: i64,
}

pub struct Database {
    pool: AnyPool,
    is_postgres: bool,
}

impl Database {
    /// Execute a raw SQL statement, returning the query result.
    /// This helper exists to provide type information for the Any driver.
    async fn exec(&self, sql: &str) -> Result<AnyQueryResult, sqlx::Error> {
        sqlx::query(sql).execute(&self.pool).await
    }

    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        static INSTALL_DRIVERS: std::sync::Once = std::sync::Once::new();
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
        let is_postgres = database_url.starts_with("postgres://")
            || database_url.starts_with("postgresql://");
        // For SQLite in-memory databases, limit to 1 connection so all
        // queries share the same in-memory database.
        let is_memory = database_url.contains(":memory:");
        let max_conn = if is_memory { 1 } else { 5 };
        let pool = AnyPoolOptions::new()
            .max_connections(max_conn)
            .connect(database_url)
            .await?;
        let db = Self { pool, is_postgres };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        let id_column = if self.is_postgres {
            "BIGSERIAL PRIMARY KEY"
        } else {
            "INTEGER PRIMARY KEY AUTOINCREMENT"
        };

        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS players (
                uid TEXT PRIMARY KEY,
                paste TEXT NOT NULL,
                key TEXT UNIQUE NOT NULL,
                created_at BIGINT NOT NULL,
                last_login BIGINT NOT NULL
            )
        "#,
        )
        .await?;

        self.exec(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS leaderboard (
                id {id_column},
                uid TEXT NOT NULL,
                player_name TEXT NOT NULL,
                max_length BIGINT NOT NULL DEFAULT 0,
                kills BIGINT NOT NULL DEFAULT 0,
                deaths BIGINT NOT NULL DEFAULT 0,
                games_played BIGINT NOT NULL DEFAULT 0,
                total_food BIGINT NOT NULL DEFAULT 0,
                last_round BIGINT NOT NULL DEFAULT 0,
                timestamp BIGINT NOT NULL,
                UNIQUE(uid)
            )
        "#,
        ))
        .await?;

        self.exec(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS game_snapshots (
                id {id_column},
                round BIGINT NOT NULL,
                game_state TEXT NOT NULL,
                timestamp BIGINT NOT NULL,
                created_at BIGINT NOT NULL
            )
        "#,
        ))
        .await?;

        self.exec("CREATE INDEX IF NOT EXISTS idx_players_key ON players(key)")
            .await?;
        self.exec("CREATE INDEX IF NOT EXISTS idx_snapshots_round ON game_snapshots(round)")
            .await?;

        Ok(())
    }

    // ── Accounts ─────────────────────────────────────────────────────

    pub async fn get_account_by_uid(&self, uid: &str) -> Result<Option<AccountRow>, sqlx::Error> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT uid, paste, key, created_at, last_login FROM players WHERE uid = $1",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_account_by_key(&self, key: &str) -> Result<Option<AccountRow>, sqlx::Error> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT uid, paste, key, created_at, last_login FROM players WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn insert_account(
        &self,
        uid: &str,
        paste: &str,
        key: &str,
        now: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO players (uid, paste, key, created_at, last_login) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(uid)
        .bind(paste)
        .bind(key)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn touch_account_login(&self, uid: &str, now: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE players SET last_login = $1 WHERE uid = $2")
            .bind(now)
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replace the stored proof and key in one statement; the old key stops
    /// resolving as soon as this commits.
    pub async fn rotate_account_key(
        &self,
        uid: &str,
        paste: &str,
        new_key: &str,
        now: i64,
    ) -> Result<bool, sqlx::Error> {
        let result: AnyQueryResult =
            sqlx::query("UPDATE players SET paste = $1, key = $2, last_login = $3 WHERE uid = $4")
                .bind(paste)
                .bind(new_key)
                .bind(now)
                .bind(uid)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Leaderboard ──────────────────────────────────────────────────

    /// Fold the result of one finished game session into the account's
    /// aggregate row.
    pub async fn record_game_result(
        &self,
        uid: &str,
        player_name: &str,
        final_length: i64,
        kills: i64,
        food_eaten: i64,
        round: i64,
        now: i64,
    ) -> Result<(), sqlx::Error> {
        let existing = sqlx::query_as::<_, LeaderboardRow>(
            "SELECT uid, player_name, max_length, kills, deaths, games_played, total_food, last_round, timestamp FROM leaderboard WHERE uid = $1",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some(row) => {
                sqlx::query(
                    "UPDATE leaderboard SET player_name = $1, max_length = $2, kills = $3, deaths = $4, games_played = $5, total_food = $6, last_round = $7, timestamp = $8 WHERE uid = $9",
                )
                .bind(player_name)
                .bind(row.max_length.max(final_length))
                .bind(row.kills + kills)
                .bind(row.deaths + 1)
                .bind(row.games_played + 1)
                .bind(row.total_food + food_eaten)
                .bind(round)
                .bind(now)
                .bind(uid)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO leaderboard (uid, player_name, max_length, kills, deaths, games_played, total_food, last_round, timestamp) VALUES ($1, $2, $3, $4, 1, 1, $5, $6, $7)",
                )
                .bind(uid)
                .bind(player_name)
                .bind(final_length)
                .bind(kills)
                .bind(food_eaten)
                .bind(round)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn top_players(&self, limit: i64) -> Result<Vec<LeaderboardRow>, sqlx::Error> {
        let rows = sqlx::query_as::<_, LeaderboardRow>(
            "SELECT uid, player_name, max_length, kills, deaths, games_played, total_food, last_round, timestamp FROM leaderboard ORDER BY max_length DESC, kills DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ── Snapshots ────────────────────────────────────────────────────

    pub async fn save_snapshot(
        &self,
        round: i64,
        game_state: &str,
        timestamp: i64,
        now: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO game_snapshots (round, game_state, timestamp, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(round)
        .bind(game_state)
        .bind(timestamp)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_snapshot_json(&self, round: i64) -> Result<Option<String>, sqlx::Error> {
        let json: Option<String> = sqlx::query_scalar(
            "SELECT game_state FROM game_snapshots WHERE round = $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(round)
        .fetch_optional(&self.pool)
        .await?;
        Ok(json)
    }

    pub async fn recent_snapshots(&self, limit: i64) -> Result<Vec<SnapshotRow>, sqlx::Error> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            "SELECT id, round, timestamp, created_at FROM game_snapshots ORDER BY round DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn prune_snapshots_before(&self, created_at: i64) -> Result<u64, sqlx::Error> {
        let result: AnyQueryResult =
            sqlx::query("DELETE FROM game_snapshots WHERE created_at < $1")
                .bind(created_at)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_account_roundtrip() {
        let db = test_db().await;
        db.insert_account("12345", "abc123", "key-one", 1_000).await.unwrap();

        let row = db.get_account_by_uid("12345").await.unwrap().unwrap();
        assert_eq!(row.key, "key-one");
        assert_eq!(row.paste, "abc123");

        let by_key = db.get_account_by_key("key-one").await.unwrap().unwrap();
        assert_eq!(by_key.uid, "12345");

        assert!(db.get_account_by_uid("99999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotate_key_invalidates_old_key() {
        let db = test_db().await;
        db.insert_account("12345", "abc123", "key-one", 1_000).await.unwrap();
        assert!(db
            .rotate_account_key("12345", "def456", "key-two", 2_000)
            .await
            .unwrap());

        assert!(db.get_account_by_key("key-one").await.unwrap().is_none());
        let row = db.get_account_by_key("key-two").await.unwrap().unwrap();
        assert_eq!(row.paste, "def456");
        assert_eq!(row.last_login, 2_000);
    }

    #[tokio::test]
    async fn test_leaderboard_aggregates_across_games() {
        let db = test_db().await;
        db.record_game_result("12345", "alice", 8, 1, 5, 100, 1_000)
            .await
            .unwrap();
        db.record_game_result("12345", "alice", 5, 0, 2, 200, 2_000)
            .await
            .unwrap();

        let top = db.top_players(10).await.unwrap();
        assert_eq!(top.len(), 1);
        let row = &top[0];
        assert_eq!(row.max_length, 8);
        assert_eq!(row.kills, 1);
        assert_eq!(row.deaths, 2);
        assert_eq!(row.games_played, 2);
        assert_eq!(row.total_food, 7);
        assert_eq!(row.last_round, 200);
    }

    #[tokio::test]
    async fn test_top_players_orders_by_max_length() {
        let db = test_db().await;
        db.record_game_result("1", "short", 3, 0, 0, 10, 1_000).await.unwrap();
        db.record_game_result("2", "long", 12, 0, 0, 10, 1_000).await.unwrap();

        let top = db.top_players(10).await.unwrap();
        assert_eq!(top[0].player_name, "long");
        assert_eq!(top[1].player_name, "short");
    }

    #[tokio::test]
    async fn test_snapshot_save_load_prune() {
        let db = test_db().await;
        db.save_snapshot(5, "{\"round\":5}", 5_000, 100).await.unwrap();
        db.save_snapshot(6, "{\"round\":6}", 6_000, 200).await.unwrap();

        assert_eq!(
            db.load_snapshot_json(5).await.unwrap().as_deref(),
            Some("{\"round\":5}")
        );
        assert!(db.load_snapshot_json(7).await.unwrap().is_none());

        let recent = db.recent_snapshots(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].round, 6);

        let pruned = db.prune_snapshots_before(150).await.unwrap();
        assert_eq!(pruned, 1);
        assert!(db.load_snapshot_json(5).await.unwrap().is_none());
    }
}
