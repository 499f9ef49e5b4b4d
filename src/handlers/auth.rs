use axum::{
    Extension, Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::AppError;
use crate::handlers::middleware::{SESSION_COOKIE, extract_session_token};
use crate::services::Identity;
use crate::services::auth::normalize_email;
use crate::state::AppState;

/// ログインリンク要求
#[derive(Debug, Deserialize)]
pub struct RequestLinkRequest {
    pub email: String,
}

/// ログインリンク要求レスポンス
///
/// 登録有無にかかわらず同じ形で返す。
#[derive(Debug, Serialize)]
pub struct RequestLinkResponse {
    pub message: &'static str,
    /// ローカル開発用（DEV_EXPOSE_MAGIC_TOKEN=true の場合のみ）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_token: Option<String>,
}

const REQUEST_LINK_MESSAGE: &str = "등록된 이메일이라면 로그인 링크가 발송되었습니다";

/// ログインリンク要求ハンドラー
///
/// POST /api/auth/request-link
///
/// 処理フロー:
/// 1. メールアドレスの正規化・形式チェック
/// 2. 登録済みユーザーか確認（未登録なら送信せず同じレスポンス）
/// 3. トークン発行・メール送信
pub async fn request_link(
    State(state): State<AppState>,
    Json(request): Json<RequestLinkRequest>,
) -> Result<Json<RequestLinkResponse>, AppError> {
    // 1. 正規化
    let email = normalize_email(&request.email)?;

    // 2. 登録確認
    if state.user_repo.find_by_email(&email).await?.is_none() {
        tracing::info!("未登録アドレスへのリンク要求（送信なし）");
        return Ok(Json(RequestLinkResponse {
            message: REQUEST_LINK_MESSAGE,
            dev_token: None,
        }));
    }

    // 3. 発行・送信
    let issued = state.auth_service.request_link(&email).await?;

    let dev_token = state
        .config
        .dev_expose_magic_token
        .then(|| issued.token.expose_secret().to_string());

    Ok(Json(RequestLinkResponse {
        message: REQUEST_LINK_MESSAGE,
        dev_token,
    }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub token: Option<String>,
}

/// リンク検証レスポンス
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub email: String,
    pub session_token: String,
}

/// リンク検証ハンドラー
///
/// GET /api/auth/verify?token=
///
/// 成功時はセッションを発行し、レスポンスボディとクッキーの両方で返す。
/// 失敗理由（不存在・期限切れ・使用済み）はレスポンスでは区別しない。
pub async fn verify(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<impl IntoResponse, AppError> {
    let token = query
        .token
        .filter(|token| !token.trim().is_empty())
        .ok_or(AppError::InvalidLink)?;

    let email = state.auth_service.verify(token.trim())?;

    let session_token = state
        .session_store
        .create(&email, OffsetDateTime::now_utc());
    let session_token = session_token.expose_secret().to_string();

    tracing::info!(email = %email, "セッション発行");

    let cookie = session_cookie(&session_token, state.config.session_ttl_secs);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(VerifyResponse {
            email,
            session_token,
        }),
    ))
}

/// ログアウトハンドラー
///
/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        state.session_store.revoke(token);
    }

    tracing::info!(email = %identity.email, "ログアウト");

    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, session_cookie("", 0))],
    )
}

/// 現在のログインユーザー
///
/// GET /api/auth/me
pub async fn me(Extension(identity): Extension<Identity>) -> Json<Identity> {
    Json(identity)
}

fn session_cookie(value: &str, max_age_secs: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, value, max_age_secs
    )
}
