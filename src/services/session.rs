use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use secrecy::SecretString;
use time::{Duration, OffsetDateTime};

use crate::models::Session;
use crate::services::token_store::{generate_token, hash_token};

/// ログインセッションのプロセス内ストア
///
/// キーはセッショントークンの SHA256 ハッシュ。
pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 新しいセッションを発行し、平文トークンを返す
    pub fn create(&self, email: &str, now: OffsetDateTime) -> SecretString {
        let token = generate_token();
        let session = Session {
            email: email.to_string(),
            expires_at: now + self.ttl,
        };
        self.lock().insert(hash_token(&token), session);
        SecretString::from(token)
    }

    /// 有効なセッションのメールアドレスを返す
    pub fn resolve(&self, raw_token: &str, now: OffsetDateTime) -> Option<String> {
        let token_hash = hash_token(raw_token);
        let mut sessions = self.lock();

        let session = sessions.get(&token_hash).cloned()?;
        if now < session.expires_at {
            Some(session.email)
        } else {
            sessions.remove(&token_hash);
            None
        }
    }

    pub fn revoke(&self, raw_token: &str) {
        self.lock().remove(&hash_token(raw_token));
    }

    pub fn sweep(&self, now: OffsetDateTime) {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at >= now);
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!(removed, "期限切れセッションを削除");
        }
    }
}
