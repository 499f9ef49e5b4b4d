use serde::Serialize;

use crate::error::AppError;
use crate::models::Role;

/// リクエストに紐付いた認証済みの利用者
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub email: String,
    /// users テーブルに登録されていない場合は None
    pub role: Option<Role>,
}

/// リクエスト単位の認可ゲート
///
/// スーパーユーザーは設定された1アドレスとの完全一致のみ。
/// ドメインや前方一致では判定しない。
#[derive(Debug, Clone, Default)]
pub struct SessionGate {
    superuser_email: Option<String>,
}

impl SessionGate {
    pub fn new(superuser_email: Option<String>) -> Self {
        Self {
            superuser_email: superuser_email
                .map(|email| email.trim().to_lowercase())
                .filter(|email| !email.is_empty()),
        }
    }

    pub fn superuser_email(&self) -> Option<&str> {
        self.superuser_email.as_deref()
    }

    pub fn require_session<'a>(&self, identity: Option<&'a Identity>) -> Result<&'a Identity, AppError> {
        identity.ok_or(AppError::Unauthorized)
    }

    pub fn require_role(&self, identity: &Identity, allowed: &[Role]) -> Result<(), AppError> {
        if self.is_superuser(identity) {
            return Ok(());
        }

        match identity.role {
            Some(role) if allowed.contains(&role) => Ok(()),
            _ => {
                tracing::warn!(
                    email = %identity.email,
                    role = ?identity.role,
                    "権限不足"
                );
                Err(AppError::Forbidden)
            }
        }
    }

    fn is_superuser(&self, identity: &Identity) -> bool {
        self.superuser_email
            .as_deref()
            .is_some_and(|email| email == identity.email)
    }
}
