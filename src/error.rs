use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// 不存在・期限切れ・使用済みを区別せずに返す
    #[error("無効または期限切れのリンクです")]
    InvalidLink,

    #[error("セッションがありません")]
    Unauthorized,

    #[error("権限がありません")]
    Forbidden,

    #[error("{0} が見つかりません")]
    NotFound(&'static str),

    /// 発行済み請求書の再送信などワークフロー上の不整合
    #[error("状態不整合: {0}")]
    InvariantViolation(String),

    #[error("税金計算書サービスが発行を拒否: [{code}] {message}")]
    FiscalRejected { code: i64, message: String },

    #[error("税金計算書サービスに接続できません: {0}")]
    FiscalUnavailable(String),

    #[error("メール送信に失敗: {0}")]
    MailDelivery(String),

    #[error("データベースエラー")]
    Database(#[from] sqlx::Error),

    #[error("内部エラー")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::InvalidLink => (
                StatusCode::UNAUTHORIZED,
                "링크가 유효하지 않거나 만료되었습니다".to_string(),
            ),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "로그인이 필요합니다".to_string()),
            Self::Forbidden => (StatusCode::FORBIDDEN, "권한이 없습니다".to_string()),
            Self::NotFound(what) => (StatusCode::NOT_FOUND, format!("{}을(를) 찾을 수 없습니다", what)),
            Self::InvariantViolation(msg) => {
                tracing::error!(detail = %msg, "状態不整合の操作を拒否");
                (StatusCode::CONFLICT, msg.clone())
            }
            // 入力修正のためサービス側メッセージをそのまま返す
            Self::FiscalRejected { message, .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, message.clone())
            }
            Self::FiscalUnavailable(detail) => {
                tracing::error!(detail = %detail, "税金計算書サービス通信エラー");
                (
                    StatusCode::BAD_GATEWAY,
                    "세금계산서 서비스와 통신할 수 없습니다. 잠시 후 다시 시도해 주세요".to_string(),
                )
            }
            Self::MailDelivery(detail) => {
                tracing::error!(detail = %detail, "メール送信エラー");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "메일을 보내지 못했습니다. 잠시 후 다시 시도해 주세요".to_string(),
                )
            }
            Self::Database(e) => {
                tracing::error!(error = ?e, "データベースエラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "내부 오류가 발생했습니다".to_string(),
                )
            }
            Self::Internal(e) => {
                tracing::error!(error = ?e, "内部エラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "내부 오류가 발생했습니다".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_link_is_unauthorized() {
        let response = AppError::InvalidLink.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_fiscal_rejection_maps_to_unprocessable() {
        let response = AppError::FiscalRejected {
            code: -99999999,
            message: "사업자번호가 올바르지 않습니다".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_invariant_violation_is_conflict() {
        let response = AppError::InvariantViolation("already issued".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_transport_errors_status() {
        assert_eq!(
            AppError::FiscalUnavailable("timeout".into())
                .into_response()
                .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::MailDelivery("smtp down".into())
                .into_response()
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
