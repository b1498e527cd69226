//! Concurrent login-token store with background expiry sweeping.
//!
//! One active token per user: a new login silently invalidates any previous
//! session. Expiry is a fixed TTL from issuance, not a sliding window -
//! validating a session does not refresh it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use subtle::ConstantTimeEq;

const TOKEN_LEN: usize = 64;

#[derive(Debug, Clone)]
struct Session {
    token: String,
    issued_at: DateTime<Utc>,
}

/// Read-heavy store: validation takes the read lock, login/logout/sweep the
/// write lock.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<i64, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for the user, overwriting any existing session.
    pub fn login(&self, user_id: i64) -> String {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        let mut sessions = self.sessions.write().expect("session lock poisoned");
        sessions.insert(
            user_id,
            Session {
                token: token.clone(),
                issued_at: Utc::now(),
            },
        );
        token
    }

    /// Exact match against the currently stored token.
    pub fn validate(&self, user_id: i64, token: &str) -> bool {
        let sessions = self.sessions.read().expect("session lock poisoned");
        match sessions.get(&user_id) {
            Some(session) if session.token.len() == token.len() => session
                .token
                .as_bytes()
                .ct_eq(token.as_bytes())
                .into(),
            _ => false,
        }
    }

    pub fn logout(&self, user_id: i64) {
        let mut sessions = self.sessions.write().expect("session lock poisoned");
        sessions.remove(&user_id);
    }

    /// Remove every session older than `ttl`, regardless of recent activity.
    /// Returns the number removed.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(7));
        let mut sessions = self.sessions.write().expect("session lock poisoned");
        let before = sessions.len();
        sessions.retain(|_, session| session.issued_at > cutoff);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().expect("session lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn backdate(&self, user_id: i64, age: Duration) {
        let mut sessions = self.sessions.write().expect("session lock poisoned");
        if let Some(session) = sessions.get_mut(&user_id) {
            session.issued_at = Utc::now()
                - chrono::Duration::from_std(age).expect("age out of range");
        }
    }
}

/// Long-lived background task: sweep expired sessions on a fixed interval.
pub fn spawn_sweeper(store: Arc<SessionStore>, interval: Duration, ttl: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick would sweep an empty store.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = store.sweep(ttl);
            if removed > 0 {
                tracing::debug!("Swept {} expired sessions", removed);
            }
        }
    });
    tracing::info!("Session sweeper started (interval {:?}, ttl {:?})", interval, ttl);
}
