use std::sync::Arc;
use std::time::Duration as StdDuration;

use secrecy::{ExposeSecret, SecretBox};
use sqlx::PgPool;
use time::Duration;

use crate::config::Config;
use crate::error::AppError;
use crate::repositories::{TaxInvoiceRepository, UserRepository};
use crate::services::email::build_mailer;
use crate::services::{
    AuthService, FiscalClient, FiscalGateway, InvoiceLifecycleManager, SessionGate, SessionStore,
    TokenStore,
};

/// アプリケーション共有状態
///
/// axum の State として全ハンドラーで共有される。
/// Clone は必須（axum が内部で clone するため）。
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL コネクションプール
    pub db_pool: PgPool,
    /// アプリケーション設定（Arc で共有）
    pub config: Arc<Config>,
    /// マジックリンクトークンストア（スイーパーと共有）
    pub token_store: Arc<TokenStore>,
    /// ログインセッションストア
    pub session_store: Arc<SessionStore>,
    pub auth_service: AuthService,
    pub session_gate: SessionGate,
    /// ユーザーリポジトリ
    pub user_repo: UserRepository,
    /// 税金計算書の状態遷移
    pub invoice_manager: InvoiceLifecycleManager,
    /// 電子税金計算書サービス（事業者状態照会で直接使用）
    pub fiscal: Arc<dyn FiscalGateway>,
}

impl AppState {
    /// 新しい AppState を作成
    pub fn new(db_pool: PgPool, config: Config) -> Result<Self, AppError> {
        let config = Arc::new(config);

        let token_store = Arc::new(TokenStore::new());
        let session_store = Arc::new(SessionStore::new(Duration::seconds(
            config.session_ttl_secs,
        )));

        let mailer = build_mailer(&config)?;
        let auth_service = AuthService::new(
            token_store.clone(),
            mailer,
            config.app_base_url.clone(),
            Duration::seconds(config.magic_link_ttl_secs),
            StdDuration::from_secs(config.mailer_timeout_secs),
        );

        let session_gate = SessionGate::new(config.superuser_email.clone());
        let user_repo = UserRepository::new(db_pool.clone());

        let fiscal: Arc<dyn FiscalGateway> = Arc::new(FiscalClient::new(
            config.fiscal_api_url.clone(),
            SecretBox::new(Box::new(config.fiscal_api_key.expose_secret().clone())),
            config.fiscal_corp_num.clone(),
            StdDuration::from_secs(config.fiscal_timeout_secs),
        )?);
        tracing::info!(fiscal_api_url = %config.fiscal_api_url, "電子税金計算書クライアント初期化完了");

        let invoice_manager = InvoiceLifecycleManager::new(
            Arc::new(TaxInvoiceRepository::new(db_pool.clone())),
            fiscal.clone(),
        );

        Ok(Self {
            db_pool,
            config,
            token_store,
            session_store,
            auth_service,
            session_gate,
            user_repo,
            invoice_manager,
            fiscal,
        })
    }
}
