// Player manager: accounts, sessions and admission.
//
// Accounts (uid -> durable key) live in the relational store with a small
// in-memory cache in front. Sessions (token -> live player) are purely
// in-memory; tokens die with the process.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::db::Database;
use crate::paste::{PasteVerifier, VerifyError};

const COLOR_PRESETS: &[&str] = &[
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
    "#bcf60c", "#fabebe", "#008080", "#e6beff",
];

/// One game session. Created by `join`, flipped to `in_game = false` on
/// death so the move endpoint can tell "dead" (404) from "unknown token"
/// (401).
#[derive(Clone, Debug)]
pub struct Session {
    pub uid: String,
    pub player_id: String,
    pub token: String,
    pub key: String,
    pub name: String,
    pub color: String,
    pub in_game: bool,
}

#[derive(Debug)]
pub enum LoginError {
    /// The identity proof did not check out.
    ProofRejected(String),
    /// The proof service could not be reached.
    ServiceUnavailable(String),
    Db(sqlx::Error),
}

#[derive(Debug)]
pub enum JoinError {
    InvalidKey,
    InvalidName,
    InvalidColor,
    AlreadyInGame,
    Db(sqlx::Error),
}

#[derive(Default)]
struct Inner {
    uid_to_key: HashMap<String, String>,
    key_to_uid: HashMap<String, String>,
    token_to_player: HashMap<String, String>,
    sessions: HashMap<String, Session>,
}

pub struct PlayerManager {
    db: Arc<Database>,
    verifier: PasteVerifier,
    inner: RwLock<Inner>,
}

impl PlayerManager {
    pub fn new(db: Arc<Database>, verifier: PasteVerifier) -> Self {
        PlayerManager {
            db,
            verifier,
            inner: RwLock::new(Inner::default()),
        }
    }

    // ── Login ────────────────────────────────────────────────────────

    /// Verify the identity proof and return the account key. A matching
    /// stored proof returns the existing key; a changed proof rotates the
    /// key and invalidates the old one.
    pub async fn login(&self, uid: &str, paste: &str) -> Result<String, LoginError> {
        self.verifier.verify(uid, paste).await.map_err(|e| match e {
            VerifyError::Invalid(msg) => LoginError::ProofRejected(msg),
            VerifyError::Unavailable(msg) => LoginError::ServiceUnavailable(msg),
        })?;

        let now = chrono::Utc::now().timestamp_millis();
        let existing = self
            .db
            .get_account_by_uid(uid)
            .await
            .map_err(LoginError::Db)?;

        match existing {
            Some(account) if account.paste == paste => {
                self.db
                    .touch_account_login(uid, now)
                    .await
                    .map_err(LoginError::Db)?;
                let mut inner = self.inner.write().unwrap();
                inner.uid_to_key.insert(uid.to_string(), account.key.clone());
                inner.key_to_uid.insert(account.key.clone(), uid.to_string());
                tracing::info!(uid, "login with matching proof");
                Ok(account.key)
            }
            Some(account) => {
                let new_key = generate_key(uid);
                self.db
                    .rotate_account_key(uid, paste, &new_key, now)
                    .await
                    .map_err(LoginError::Db)?;
                let mut inner = self.inner.write().unwrap();
                inner.key_to_uid.remove(&account.key);
                inner.uid_to_key.insert(uid.to_string(), new_key.clone());
                inner.key_to_uid.insert(new_key.clone(), uid.to_string());
                tracing::info!(uid, "proof changed, account key rotated");
                Ok(new_key)
            }
            None => {
                let key = generate_key(uid);
                self.db
                    .insert_account(uid, paste, &key, now)
                    .await
                    .map_err(LoginError::Db)?;
                let mut inner = self.inner.write().unwrap();
                inner.uid_to_key.insert(uid.to_string(), key.clone());
                inner.key_to_uid.insert(key.clone(), uid.to_string());
                tracing::info!(uid, "new account registered");
                Ok(key)
            }
        }
    }

    // ── Join ─────────────────────────────────────────────────────────

    /// Create a game session: validates the inputs, enforces one in-game
    /// session per uid, and issues a fresh player id and token. The caller
    /// is responsible for actually spawning the snake into the world.
    pub async fn join(
        &self,
        key: &str,
        name: &str,
        color: &str,
    ) -> Result<Session, JoinError> {
        if !is_valid_player_name(name) {
            return Err(JoinError::InvalidName);
        }
        let color = if color.is_empty() {
            random_preset_color()
        } else if is_valid_color(color) {
            color.to_string()
        } else {
            return Err(JoinError::InvalidColor);
        };

        let uid = self
            .validate_key(key)
            .await
            .map_err(JoinError::Db)?
            .ok_or(JoinError::InvalidKey)?;

        let mut inner = self.inner.write().unwrap();
        if inner
            .sessions
            .values()
            .any(|s| s.uid == uid && s.in_game)
        {
            return Err(JoinError::AlreadyInGame);
        }

        // Drop leftover dead sessions for this uid; their tokens are spent.
        let stale: Vec<String> = inner
            .sessions
            .values()
            .filter(|s| s.uid == uid)
            .map(|s| s.player_id.clone())
            .collect();
        for id in stale {
            if let Some(old) = inner.sessions.remove(&id) {
                inner.token_to_player.remove(&old.token);
            }
        }

        let mut player_id = generate_player_id(&uid);
        while inner.sessions.contains_key(&player_id) {
            player_id = generate_player_id(&uid);
        }
        let token = generate_token(&player_id);

        let session = Session {
            uid: uid.clone(),
            player_id: player_id.clone(),
            token: token.clone(),
            key: key.to_string(),
            name: name.to_string(),
            color,
            in_game: true,
        };
        inner.token_to_player.insert(token, player_id.clone());
        inner.sessions.insert(player_id.clone(), session.clone());

        tracing::info!(%uid, %player_id, name, "player joined");
        Ok(session)
    }

    // ── Validation ───────────────────────────────────────────────────

    /// Resolve a session token to a player id. O(1), memory only: tokens
    /// are ephemeral and never touch the database.
    pub fn validate_token(&self, token: &str) -> Option<String> {
        let inner = self.inner.read().unwrap();
        inner.token_to_player.get(token).cloned()
    }

    /// Resolve an account key to a uid: memory first, then a read-only
    /// database lookup.
    pub async fn validate_key(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        {
            let inner = self.inner.read().unwrap();
            if let Some(uid) = inner.key_to_uid.get(key) {
                return Ok(Some(uid.clone()));
            }
        }
        let Some(account) = self.db.get_account_by_key(key).await? else {
            return Ok(None);
        };
        let mut inner = self.inner.write().unwrap();
        inner.uid_to_key.insert(account.uid.clone(), key.to_string());
        inner.key_to_uid.insert(key.to_string(), account.uid.clone());
        Ok(Some(account.uid))
    }

    // ── Session queries & lifecycle ──────────────────────────────────

    pub fn get_session(&self, player_id: &str) -> Option<Session> {
        let inner = self.inner.read().unwrap();
        inner.sessions.get(player_id).cloned()
    }

    pub fn is_in_game(&self, player_id: &str) -> bool {
        let inner = self.inner.read().unwrap();
        inner
            .sessions
            .get(player_id)
            .map(|s| s.in_game)
            .unwrap_or(false)
    }

    /// Mark a session as no longer in the arena (death). The token keeps
    /// resolving so the client learns it is dead rather than unauthorized.
    pub fn retire(&self, player_id: &str) {
        let mut inner = self.inner.write().unwrap();
        if let Some(session) = inner.sessions.get_mut(player_id) {
            session.in_game = false;
            tracing::info!(player_id, "session retired");
        }
    }

    /// Remove a session and its token entirely. Used when a join is rolled
    /// back because no snake could be spawned.
    pub fn remove_session(&self, player_id: &str) {
        let mut inner = self.inner.write().unwrap();
        if let Some(session) = inner.sessions.remove(player_id) {
            inner.token_to_player.remove(&session.token);
        }
    }

    /// Drop every session and token (server reset). Account caches survive
    /// so players can rejoin without logging in again.
    pub fn remove_all_sessions(&self) {
        let mut inner = self.inner.write().unwrap();
        let count = inner.sessions.len();
        inner.sessions.clear();
        inner.token_to_player.clear();
        tracing::info!(count, "removed all sessions");
    }

}

// ── Generation & validation helpers ──────────────────────────────────

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Account key: SHA-256 of (uid, nanosecond clock, random salt).
fn generate_key(uid: &str) -> String {
    let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let salt: u32 = rand::thread_rng().gen_range(0..1_000_000);
    sha256_hex(&format!("{uid}{now}{salt}"))
}

/// Session token: SHA-256 of (player id, nanosecond clock, random salt).
fn generate_token(player_id: &str) -> String {
    let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let salt: u32 = rand::thread_rng().gen_range(0..1_000_000);
    sha256_hex(&format!("{player_id}{now}{salt}"))
}

/// Per-session player id of the form `p_{uid}_{6-digit-rand}`.
fn generate_player_id(uid: &str) -> String {
    let n: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
    format!("p_{uid}_{n}")
}

fn random_preset_color() -> String {
    let i = rand::thread_rng().gen_range(0..COLOR_PRESETS.len());
    COLOR_PRESETS[i].to_string()
}

/// Names are 1-20 characters with no control characters.
pub fn is_valid_player_name(name: &str) -> bool {
    let len = name.chars().count();
    len >= 1 && len <= 20 && !name.chars().any(|c| c.is_control())
}

/// Colors are `#RRGGBB` or `#RGB`.
pub fn is_valid_color(color: &str) -> bool {
    let Some(hex) = color.strip_prefix('#') else {
        return false;
    };
    (hex.len() == 6 || hex.len() == 3) && hex.bytes().all(|b| b.is_ascii_hexdigit())
}
