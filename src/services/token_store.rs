use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::models::AuthToken;

/// マジックリンク検証の失敗理由
///
/// HTTP 境界ではすべて `AppError::InvalidLink` に畳み込む。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyFailure {
    Absent,
    Expired,
    AlreadyConsumed,
}

/// 32バイト（256ビット）のランダムトークンを生成
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// トークンをSHA256でハッシュ化
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Default)]
struct Inner {
    tokens: HashMap<String, AuthToken>,
    /// 有効期限順の最小ヒープ（削除・上書き済みのエントリは sweep 時に読み飛ばす）
    expiry: BinaryHeap<Reverse<(OffsetDateTime, String)>>,
}

/// 未使用の認証トークンを保持するプロセス内ストア
///
/// 再起動で消えるが、トークンは短命で再発行できるため永続化しない。
/// 1キーに対する「読み取り→検査→使用済みマーク」は同一ロック内で行う。
#[derive(Default)]
pub struct TokenStore {
    inner: Mutex<Inner>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 無条件に upsert（同じハッシュは同じトークンとして扱う）
    pub fn put(&self, record: AuthToken) {
        let mut inner = self.lock();
        inner
            .expiry
            .push(Reverse((record.expires_at, record.token_hash.clone())));
        inner.tokens.insert(record.token_hash.clone(), record);
    }

    pub fn get(&self, token_hash: &str) -> Option<AuthToken> {
        self.lock().tokens.get(token_hash).cloned()
    }

    pub fn delete(&self, token_hash: &str) {
        self.lock().tokens.remove(token_hash);
    }

    /// トークンを検査して使用済みにする
    ///
    /// 同一トークンへの同時呼び出しで成功するのは高々1つ。
    /// 期限切れのエントリはその場で削除する。
    pub fn consume(&self, token_hash: &str, now: OffsetDateTime) -> Result<String, VerifyFailure> {
        let mut inner = self.lock();

        let Some(record) = inner.tokens.get_mut(token_hash) else {
            return Err(VerifyFailure::Absent);
        };

        if record.is_expired(now) {
            inner.tokens.remove(token_hash);
            return Err(VerifyFailure::Expired);
        }

        if record.consumed {
            return Err(VerifyFailure::AlreadyConsumed);
        }

        record.consumed = true;
        Ok(record.email.clone())
    }

    /// `expires_at < now` のレコードをすべて削除
    pub fn sweep(&self, now: OffsetDateTime) {
        let mut inner = self.lock();
        let mut removed = 0usize;

        while let Some(Reverse((expires_at, _))) = inner.expiry.peek() {
            if *expires_at >= now {
                break;
            }
            let Some(Reverse((_, token_hash))) = inner.expiry.pop() else {
                break;
            };
            // 上書きで期限が延びたレコードは残す
            let expired = inner
                .tokens
                .get(&token_hash)
                .is_some_and(|record| record.expires_at < now);
            if expired {
                inner.tokens.remove(&token_hash);
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, remaining = inner.tokens.len(), "期限切れトークンを削除");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
