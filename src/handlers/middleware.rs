use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::Response,
};
use time::OffsetDateTime;

use crate::error::AppError;
use crate::services::Identity;
use crate::state::AppState;

/// セッションクッキー名
pub const SESSION_COOKIE: &str = "session";

/// セッション必須ミドルウェア
///
/// `Authorization: Bearer` または `session` クッキーからセッションを解決し、
/// `Identity` をリクエスト拡張に格納する。
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let email = extract_session_token(req.headers())
        .and_then(|token| state.session_store.resolve(token, OffsetDateTime::now_utc()));

    let identity = match email {
        Some(email) => {
            let role = state
                .user_repo
                .find_by_email(&email)
                .await?
                .map(|user| user.role);
            Some(Identity { email, role })
        }
        None => None,
    };

    let identity = state.session_gate.require_session(identity.as_ref())?.clone();
    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}

/// リクエストヘッダーからセッショントークンを取り出す
///
/// Bearer ヘッダーを優先し、なければクッキーを見る。
pub fn extract_session_token(headers: &HeaderMap) -> Option<&str> {
    bearer_token(headers).or_else(|| cookie_token(headers))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let token = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")?
        .trim();
    (!token.is_empty()).then_some(token)
}

fn cookie_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value)
}
