use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::state::AppState;

/// ヘルスチェックレスポンス
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    /// 未使用・未掃除のマジックリンク件数
    pub pending_links: usize,
}

impl HealthResponse {
    fn new(database_ok: bool, pending_links: usize) -> (StatusCode, Self) {
        let (code, status, database) = if database_ok {
            (StatusCode::OK, "ok", "up")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", "down")
        };
        (
            code,
            Self {
                status,
                version: env!("CARGO_PKG_VERSION"),
                database,
                pending_links,
            },
        )
    }
}

/// ヘルスチェックハンドラー
///
/// GET /api/health
///
/// ロードバランサーやモニタリングツールから呼び出される。
/// DB に接続できない場合は 503。
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_ok = match sqlx::query("SELECT 1").execute(&state.db_pool).await {
        Ok(_) => true,
        Err(e) => {
            tracing::error!(error = ?e, "ヘルスチェック: データベース接続エラー");
            false
        }
    };

    let (code, body) = HealthResponse::new(database_ok, state.token_store.len());
    (code, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_ok() {
        let (code, body) = HealthResponse::new(true, 3);
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.status, "ok");
        assert_eq!(body.database, "up");
        assert_eq!(body.pending_links, 3);
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_health_degraded_without_database() {
        let (code, body) = HealthResponse::new(false, 0);
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "degraded");
    }
}
