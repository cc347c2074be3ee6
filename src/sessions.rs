//! In-memory bearer sessions and one-shot login challenges.
//!
//! Both stores are process memory only: a restart logs everyone out and
//! voids outstanding challenges, which is the intended failure mode.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub session_id: String,
    pub user_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionRegistry {
    ttl: Duration,
    max_per_user: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    by_token: HashMap<String, Session>,
    /// Tokens per user, oldest issued first. Rotation replaces a token in
    /// place so the eviction order is preserved.
    by_user: HashMap<String, Vec<String>>,
}

fn random_b64(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// 256-bit bearer token.
fn new_token() -> String {
    random_b64(32)
}

/// 144-bit session identifier.
fn new_session_id() -> String {
    random_b64(18)
}

impl SessionRegistry {
    pub fn new(ttl_secs: u64, max_per_user: usize) -> Self {
        SessionRegistry {
            ttl: Duration::seconds(ttl_secs as i64),
            max_per_user: max_per_user.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Issue a fresh session. Returns the session plus any sessions evicted
    /// to stay under the per-user cap (oldest first), so the caller can fan
    /// out force-logouts.
    pub fn issue(&self, user_id: &str) -> (Session, Vec<Session>) {
        let now = Utc::now();
        let session = Session {
            token: new_token(),
            session_id: new_session_id(),
            user_id: user_id.to_string(),
            issued_at: now,
            expires_at: now + self.ttl,
        };

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let tokens = inner.by_user.entry(user_id.to_string()).or_default();
        tokens.push(session.token.clone());
        let excess: Vec<String> = if tokens.len() > self.max_per_user {
            let overflow = tokens.len() - self.max_per_user;
            tokens.drain(..overflow).collect()
        } else {
            Vec::new()
        };
        let evicted: Vec<Session> = excess
            .iter()
            .filter_map(|t| inner.by_token.remove(t))
            .collect();
        inner
            .by_token
            .insert(session.token.clone(), session.clone());
        (session, evicted)
    }

    /// Resolve a bearer token. Expired sessions are dropped on sight.
    pub fn lookup(&self, token: &str) -> Option<Session> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let session = inner.by_token.get(token)?.clone();
        if session.expires_at <= Utc::now() {
            remove_token(&mut inner, token);
            return None;
        }
        Some(session)
    }

    /// Swap the token of a live session: same session id, same issued_at,
    /// fresh expiry.
    pub fn rotate(&self, token: &str) -> Option<Session> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let old = inner.by_token.remove(token)?;
        if old.expires_at <= Utc::now() {
            remove_token_from_user(&mut inner, &old.user_id, token);
            return None;
        }
        let rotated = Session {
            token: new_token(),
            expires_at: Utc::now() + self.ttl,
            ..old.clone()
        };
        if let Some(tokens) = inner.by_user.get_mut(&old.user_id)
            && let Some(slot) = tokens.iter_mut().find(|t| *t == token)
        {
            *slot = rotated.token.clone();
        }
        inner
            .by_token
            .insert(rotated.token.clone(), rotated.clone());
        Some(rotated)
    }

    /// Drop every session of the user except the named one. Returns the
    /// revoked sessions for force-logout fan-out.
    pub fn revoke_all_except(&self, user_id: &str, keep_session_id: &str) -> Vec<Session> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tokens) = inner.by_user.get(user_id).cloned() else {
            return Vec::new();
        };
        let mut revoked = Vec::new();
        for token in tokens {
            let matches = inner
                .by_token
                .get(&token)
                .map(|s| s.session_id != keep_session_id)
                .unwrap_or(false);
            if matches
                && let Some(s) = remove_token(&mut inner, &token)
            {
                revoked.push(s);
            }
        }
        revoked
    }

    /// Drop every session of the user. Returns the revoked sessions.
    pub fn revoke_user(&self, user_id: &str) -> Vec<Session> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tokens) = inner.by_user.remove(user_id) else {
            return Vec::new();
        };
        tokens
            .into_iter()
            .filter_map(|t| inner.by_token.remove(&t))
            .collect()
    }

    /// True while the session id is backed by a non-expired token.
    pub fn session_alive(&self, user_id: &str, session_id: &str) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tokens) = inner.by_user.get(user_id) else {
            return false;
        };
        let now = Utc::now();
        tokens.iter().any(|t| {
            inner
                .by_token
                .get(t)
                .map(|s| s.session_id == session_id && s.expires_at > now)
                .unwrap_or(false)
        })
    }
}

fn remove_token(inner: &mut Inner, token: &str) -> Option<Session> {
    let session = inner.by_token.remove(token)?;
    remove_token_from_user(inner, &session.user_id, token);
    Some(session)
}

fn remove_token_from_user(inner: &mut Inner, user_id: &str, token: &str) {
    if let Some(tokens) = inner.by_user.get_mut(user_id) {
        tokens.retain(|t| t != token);
        if tokens.is_empty() {
            inner.by_user.remove(user_id);
        }
    }
}

// --- Login challenges ---

pub struct Challenge {
    pub user_id: String,
    pub nonce: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

/// One-shot challenge store; entries live 60 seconds and are consumed on
/// finalize.
pub struct ChallengeStore {
    ttl: Duration,
    inner: Mutex<HashMap<String, Challenge>>,
}

impl Default for ChallengeStore {
    fn default() -> Self {
        Self::new(60)
    }
}

impl ChallengeStore {
    pub fn new(ttl_secs: u64) -> Self {
        ChallengeStore {
            ttl: Duration::seconds(ttl_secs as i64),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Store a fresh challenge and return its id. Sweeps expired entries so
    /// abandoned logins cannot grow the map.
    pub fn insert(&self, user_id: &str, nonce: Vec<u8>) -> String {
        let id = random_b64(18);
        let now = Utc::now();
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|_, c| c.expires_at > now);
        map.insert(
            id.clone(),
            Challenge {
                user_id: user_id.to_string(),
                nonce,
                expires_at: now + self.ttl,
            },
        );
        id
    }

    /// Fetch-and-delete. Returns None for unknown or expired ids.
    pub fn take(&self, id: &str) -> Option<Challenge> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let challenge = map.remove(id)?;
        if challenge.expires_at <= Utc::now() {
            return None;
        }
        Some(challenge)
    }
}

/// 256-bit login nonce.
pub fn new_nonce() -> Vec<u8> {
    let mut buf = vec![0u8; 32];
    OsRng.fill_bytes(&mut buf);
    buf
}
