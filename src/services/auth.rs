use std::sync::Arc;

use secrecy::SecretString;
use time::{Duration, OffsetDateTime};

use crate::error::AppError;
use crate::models::AuthToken;
use crate::services::email::Mailer;
use crate::services::token_store::{TokenStore, VerifyFailure, generate_token, hash_token};

const LINK_SUBJECT: &str = "[광고 운영 콘솔] 로그인 링크";

/// 発行したマジックリンク
///
/// 平文トークンは配送を担う呼び出し元にだけ渡す。
pub struct IssuedLink {
    pub token: SecretString,
    pub expires_at: OffsetDateTime,
}

/// マジックリンク認証サービス
///
/// # Security
/// - 平文トークンは保存・ログ出力しない（SHA256 ハッシュのみ保持）
/// - セッション状態は持たない（検証成功後の確立は呼び出し側）
#[derive(Clone)]
pub struct AuthService {
    store: Arc<TokenStore>,
    mailer: Arc<dyn Mailer>,
    link_base_url: String,
    ttl: Duration,
    mail_timeout: std::time::Duration,
}

impl AuthService {
    /// 新しい AuthService を作成
    pub fn new(
        store: Arc<TokenStore>,
        mailer: Arc<dyn Mailer>,
        link_base_url: String,
        ttl: Duration,
        mail_timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            mailer,
            link_base_url,
            ttl,
            mail_timeout,
        }
    }

    /// ログインリンクを発行してメール送信
    ///
    /// トークンは送信前に保存するため、送信失敗時も期限までは有効なまま残る。
    pub async fn request_link(&self, email: &str) -> Result<IssuedLink, AppError> {
        let email = normalize_email(email)?;
        let now = OffsetDateTime::now_utc();

        let token = generate_token();
        let token_hash = hash_token(&token);
        let expires_at = now + self.ttl;

        self.store
            .put(AuthToken::new(token_hash, email.clone(), now, expires_at));

        let link = self.build_link(&token);
        let body = render_link_email(&link, self.ttl.whole_minutes());

        let sent = tokio::time::timeout(
            self.mail_timeout,
            self.mailer.send(&email, LINK_SUBJECT, &body),
        )
        .await;

        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(email = %email, error = %e, "ログインリンク送信失敗");
                let detail = match e {
                    AppError::MailDelivery(detail) => detail,
                    other => other.to_string(),
                };
                return Err(AppError::MailDelivery(detail));
            }
            Err(_) => {
                tracing::warn!(email = %email, "ログインリンク送信タイムアウト");
                return Err(AppError::MailDelivery("mailer timed out".to_string()));
            }
        }

        tracing::info!(email = %email, "ログインリンク送信完了");

        Ok(IssuedLink {
            token: SecretString::from(token),
            expires_at,
        })
    }

    /// 平文トークンを検証し、紐付くメールアドレスを返す
    pub fn verify(&self, raw_token: &str) -> Result<String, VerifyFailure> {
        self.verify_at(raw_token, OffsetDateTime::now_utc())
    }

    /// 時刻を指定して検証
    pub fn verify_at(&self, raw_token: &str, now: OffsetDateTime) -> Result<String, VerifyFailure> {
        let token_hash = hash_token(raw_token);
        let result = self.store.consume(&token_hash, now);

        match &result {
            Ok(email) => tracing::info!(email = %email, "マジックリンク認証成功"),
            Err(reason) => tracing::warn!(
                reason = ?reason,
                token_hash_prefix = %&token_hash[..8],
                "マジックリンク認証失敗"
            ),
        }

        result
    }

    fn build_link(&self, token: &str) -> String {
        format!(
            "{}/auth/verify?token={}",
            self.link_base_url.trim_end_matches('/'),
            token
        )
    }
}

impl From<VerifyFailure> for AppError {
    fn from(_: VerifyFailure) -> Self {
        AppError::InvalidLink
    }
}

/// メールアドレスを正規化（前後空白除去・小文字化）
pub fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    };
    if !valid {
        return Err(AppError::Validation(
            "email: 유효한 이메일 주소를 입력해 주세요".to_string(),
        ));
    }
    Ok(email)
}

fn render_link_email(link: &str, ttl_minutes: i64) -> String {
    format!(
        r#"<p>아래 링크를 눌러 로그인하세요. 링크는 {ttl_minutes}분 동안 한 번만 사용할 수 있습니다.</p>
<p><a href="{link}">로그인</a></p>
<p>본인이 요청하지 않았다면 이 메일을 무시하세요.</p>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use secrecy::ExposeSecret;
    use std::sync::Mutex;

    /// 送信内容を記録するテスト用メーラー
    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, _subject: &str, html_body: &str) -> Result<(), AppError> {
            if self.fail {
                return Err(AppError::MailDelivery("smtp down".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), html_body.to_string()));
            Ok(())
        }
    }

    fn service(mailer: Arc<RecordingMailer>) -> (AuthService, Arc<TokenStore>) {
        let store = Arc::new(TokenStore::new());
        let service = AuthService::new(
            store.clone(),
            mailer,
            "https://console.example.com/".to_string(),
            Duration::minutes(15),
            std::time::Duration::from_secs(5),
        );
        (service, store)
    }

    #[tokio::test]
    async fn test_request_then_verify_returns_email() {
        let mailer = Arc::new(RecordingMailer::default());
        let (service, _) = service(mailer.clone());

        let link = service.request_link("user@example.com").await.unwrap();
        let email = service.verify(link.token.expose_secret()).unwrap();

        assert_eq!(email, "user@example.com");
    }

    #[tokio::test]
    async fn test_mail_contains_link_but_store_has_only_hash() {
        let mailer = Arc::new(RecordingMailer::default());
        let (service, store) = service(mailer.clone());

        let link = service.request_link("User@Example.com ").await.unwrap();
        let raw = link.token.expose_secret();

        let sent = mailer.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "user@example.com");
        assert!(sent[0].1.contains(&format!(
            "https://console.example.com/auth/verify?token={}",
            raw
        )));

        assert!(store.get(raw).is_none());
        let record = store.get(&hash_token(raw)).unwrap();
        assert!(!record.consumed);
        assert_eq!(record.expires_at, link.expires_at);
    }

    #[tokio::test]
    async fn test_second_verify_is_already_consumed() {
        let (service, _) = service(Arc::new(RecordingMailer::default()));
        let link = service.request_link("user@example.com").await.unwrap();
        let raw = link.token.expose_secret();

        assert!(service.verify(raw).is_ok());
        assert_eq!(service.verify(raw), Err(VerifyFailure::AlreadyConsumed));
    }

    #[tokio::test]
    async fn test_verify_after_expiry_fails() {
        let (service, store) = service(Arc::new(RecordingMailer::default()));
        let link = service.request_link("user@example.com").await.unwrap();
        let raw = link.token.expose_secret();

        assert_eq!(
            service.verify_at(raw, link.expires_at),
            Err(VerifyFailure::Expired)
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_token_is_absent() {
        let (service, _) = service(Arc::new(RecordingMailer::default()));
        assert_eq!(service.verify("nope"), Err(VerifyFailure::Absent));
    }

    #[tokio::test]
    async fn test_mailer_failure_keeps_token_redeemable() {
        let mailer = Arc::new(RecordingMailer {
            fail: true,
            ..Default::default()
        });
        let (service, store) = service(mailer);

        let result = service.request_link("user@example.com").await;
        assert!(matches!(result, Err(AppError::MailDelivery(_))));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_email_rejected_before_side_effects() {
        let mailer = Arc::new(RecordingMailer::default());
        let (service, store) = service(mailer.clone());

        let result = service.request_link("not-an-email").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(store.is_empty());
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_all_failures_collapse_to_invalid_link() {
        for failure in [
            VerifyFailure::Absent,
            VerifyFailure::Expired,
            VerifyFailure::AlreadyConsumed,
        ] {
            assert!(matches!(AppError::from(failure), AppError::InvalidLink));
        }
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            normalize_email("  Admin@Example.COM ").unwrap(),
            "admin@example.com"
        );
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("user@localhost").is_err());
        assert!(normalize_email("").is_err());
    }
}
