use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::AppError;

/// 外部メール送信の境界
///
/// どのエラーも「リンク未送信」として扱われ、呼び出し側で再試行できる。
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), AppError>;
}

/// 開発用メーラー（ログ出力のみ）
///
/// 本文にはトークンが含まれるため宛先と件名だけを記録する。
#[derive(Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _html_body: &str) -> Result<(), AppError> {
        tracing::info!(to = %to, subject = %subject, "メール送信（開発モード）");
        Ok(())
    }
}

#[cfg(feature = "email")]
mod smtp {
    use async_trait::async_trait;
    use lettre::message::header::ContentType;
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

    use super::Mailer;
    use crate::error::AppError;

    /// SMTP メーラー（STARTTLS）
    #[derive(Clone)]
    pub struct SmtpMailer {
        transport: AsyncSmtpTransport<Tokio1Executor>,
        from: String,
    }

    impl SmtpMailer {
        pub fn new(
            host: &str,
            port: u16,
            username: String,
            password: String,
            from: String,
            timeout: std::time::Duration,
        ) -> Result<Self, AppError> {
            let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| {
                    tracing::error!(error = ?e, "SMTP トランスポートの初期化エラー");
                    AppError::Internal(anyhow::anyhow!("smtp transport error"))
                })?
                .port(port)
                .credentials(Credentials::new(username, password))
                .timeout(Some(timeout))
                .build();

            Ok(Self { transport, from })
        }
    }

    #[async_trait]
    impl Mailer for SmtpMailer {
        async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), AppError> {
            let from = self
                .from
                .parse()
                .map_err(|e| AppError::MailDelivery(format!("invalid from address: {e}")))?;
            let to_mailbox = to
                .parse()
                .map_err(|e| AppError::MailDelivery(format!("invalid recipient: {e}")))?;

            let message = Message::builder()
                .from(from)
                .to(to_mailbox)
                .subject(subject)
                .header(ContentType::TEXT_HTML)
                .body(html_body.to_string())
                .map_err(|e| AppError::MailDelivery(format!("message build error: {e}")))?;

            self.transport
                .send(message)
                .await
                .map_err(|e| AppError::MailDelivery(format!("smtp error: {e}")))?;

            tracing::info!(to = %to, "メール送信完了");
            Ok(())
        }
    }
}

#[cfg(feature = "email")]
pub use smtp::SmtpMailer;

/// 設定からメーラーを構築
///
/// SMTP 設定が揃っていて `email` 機能が有効な場合のみ SMTP を使う。
pub fn build_mailer(config: &Config) -> Result<Arc<dyn Mailer>, AppError> {
    if let Some(mailer) = smtp_mailer(config)? {
        return Ok(mailer);
    }

    let smtp_configured = config.smtp_host.is_some() && config.smtp_from_address.is_some();
    if smtp_configured {
        tracing::warn!("SMTP 設定が不完全、または email 機能が無効です（ログ出力のみ）");
    } else {
        tracing::info!("SMTP 未設定（ログ出力のみ）");
    }
    Ok(Arc::new(LogMailer))
}

#[cfg(feature = "email")]
fn smtp_mailer(config: &Config) -> Result<Option<Arc<dyn Mailer>>, AppError> {
    use secrecy::ExposeSecret;

    let (Some(host), Some(username), Some(password), Some(from)) = (
        &config.smtp_host,
        &config.smtp_username,
        &config.smtp_password,
        &config.smtp_from_address,
    ) else {
        return Ok(None);
    };

    tracing::info!(host = %host, "SMTP メーラーを初期化");
    let mailer = SmtpMailer::new(
        host,
        config.smtp_port,
        username.expose_secret().clone(),
        password.expose_secret().clone(),
        from.clone(),
        std::time::Duration::from_secs(config.mailer_timeout_secs),
    )?;
    Ok(Some(Arc::new(mailer)))
}

#[cfg(not(feature = "email"))]
fn smtp_mailer(_config: &Config) -> Result<Option<Arc<dyn Mailer>>, AppError> {
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_mailer_always_succeeds() {
        let mailer = LogMailer;
        let result = mailer
            .send("user@example.com", "로그인 링크", "<p>hidden</p>")
            .await;
        assert!(result.is_ok());
    }
}
