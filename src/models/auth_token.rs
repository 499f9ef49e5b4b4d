use time::OffsetDateTime;

/// マジックリンク認証トークン
///
/// 平文トークンは保持しない。ストアのキーは SHA256 ハッシュ。
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub token_hash: String,
    pub email: String,
    pub expires_at: OffsetDateTime,
    pub consumed: bool,
    pub created_at: OffsetDateTime,
}

impl AuthToken {
    pub fn new(token_hash: String, email: String, now: OffsetDateTime, expires_at: OffsetDateTime) -> Self {
        Self {
            token_hash,
            email,
            expires_at,
            consumed: false,
            created_at: now,
        }
    }

    /// `now >= expires_at` で期限切れ
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

/// ログインセッション（マジックリンク検証成功後に発行）
#[derive(Debug, Clone)]
pub struct Session {
    pub email: String,
    pub expires_at: OffsetDateTime,
}
