use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use http::HeaderValue;
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use adops_console::{
    config::Config, handlers, models::Role, services::sweeper::spawn_sweeper, state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ログ初期化（JSON形式、環境変数でレベル制御）
    init_tracing();

    tracing::info!("adops-console 起動中...");

    // 設定読み込み
    let config = Config::load().map_err(|e| {
        tracing::error!(error = ?e, "設定の読み込みに失敗");
        anyhow::anyhow!("Failed to load config: {}", e)
    })?;

    tracing::info!(host = %config.host, port = %config.port, "設定読み込み完了");

    // サーバーアドレスを先に構築（config が move される前に）
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| {
            tracing::error!(error = ?e, "アドレスのパースに失敗");
            anyhow::anyhow!("Failed to parse address: {}", e)
        })?;

    // データベース接続プール作成
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config.database_url.expose_secret())
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "データベース接続に失敗");
            anyhow::anyhow!("Failed to connect to database: {}", e)
        })?;

    tracing::info!("データベース接続完了");

    if config.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, "マイグレーションに失敗");
                anyhow::anyhow!("Failed to run migrations: {}", e)
            })?;
        tracing::info!("マイグレーション完了");
    }

    // AppState 構築
    let state = AppState::new(db_pool, config).map_err(|e| {
        tracing::error!(error = ?e, "AppState の構築に失敗");
        anyhow::anyhow!("Failed to create AppState: {}", e)
    })?;

    provision_superuser(&state).await?;

    // 期限切れトークン・セッションの定期削除
    let sweeper = spawn_sweeper(
        state.token_store.clone(),
        state.session_store.clone(),
        Duration::from_secs(state.config.token_sweep_interval_secs.max(1)),
    );

    // Router 構築
    let app = create_router(state)?;

    // サーバー起動
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        tracing::error!(error = ?e, addr = %addr, "ポートのバインドに失敗");
        anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
    })?;

    tracing::info!(addr = %addr, "サーバー起動");

    // Graceful shutdown 対応
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "サーバーエラー");
            anyhow::anyhow!("Server error: {}", e)
        })?;

    sweeper.abort();
    tracing::info!("サーバー終了");

    Ok(())
}

/// tracing の初期化（JSON形式）
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,adops_console=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// SUPERUSER_EMAIL を admin として登録
async fn provision_superuser(state: &AppState) -> anyhow::Result<()> {
    let Some(email) = state.session_gate.superuser_email() else {
        tracing::info!("SUPERUSER_EMAIL 未設定（スキップ）");
        return Ok(());
    };

    state
        .user_repo
        .upsert_role(email, Role::Admin)
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "スーパーユーザーの登録に失敗");
            anyhow::anyhow!("Failed to provision superuser: {}", e)
        })?;

    tracing::info!(email = %email, "スーパーユーザーを admin として登録");
    Ok(())
}

/// Router の構築
fn create_router(state: AppState) -> anyhow::Result<Router> {
    let cors_origin = state.config.cors_allowed_origin.clone();
    let router = handlers::router(state);

    match cors_origin {
        Some(origin) => {
            let origin = HeaderValue::from_str(&origin)
                .map_err(|e| anyhow::anyhow!("Invalid CORS_ALLOWED_ORIGIN: {}", e))?;
            tracing::info!(origin = ?origin, "CORS 有効");
            Ok(router.layer(
                CorsLayer::new()
                    .allow_origin(origin)
                    .allow_credentials(true)
                    .allow_methods([http::Method::GET, http::Method::POST])
                    .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE]),
            ))
        }
        None => Ok(router),
    }
}

/// Graceful shutdown シグナル待機
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = ?e, "Ctrl+C ハンドラーのインストールに失敗");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "SIGTERM ハンドラーのインストールに失敗");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("SIGTERM received, starting graceful shutdown");
        }
    }
}
