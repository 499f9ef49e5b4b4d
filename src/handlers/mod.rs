pub mod auth;
pub mod business;
pub mod health;
pub mod invoices;
pub mod middleware;

pub use auth::{logout, me, request_link, verify};
pub use business::business_status;
pub use health::health_check;
pub use invoices::{
    cancel_invoice, create_invoice, get_invoice, invoice_print_url, invoice_status,
    reconcile_invoice, submit_invoice,
};
pub use middleware::require_session;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// ルーティング定義（CORS などの外側のレイヤーは呼び出し側で付与）
///
/// `/auth/verify` はメールのリンク（`{APP_BASE_URL}/auth/verify`）を
/// 直接このサービスで受けるための別名。
pub fn router(state: AppState) -> Router {
    let session = axum::middleware::from_fn_with_state(state.clone(), require_session);

    let protected = Router::new()
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/invoices", post(create_invoice))
        .route("/api/invoices/{id}", get(get_invoice))
        .route("/api/invoices/{id}/submit", post(submit_invoice))
        .route("/api/invoices/{id}/status", get(invoice_status))
        .route("/api/invoices/{id}/reconcile", post(reconcile_invoice))
        .route("/api/invoices/{id}/print-url", get(invoice_print_url))
        .route("/api/invoices/{id}/cancel", post(cancel_invoice))
        .route("/api/business-status/{corp_num}", get(business_status))
        .route_layer(session);

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/auth/request-link", post(request_link))
        .route("/api/auth/verify", get(verify))
        .route("/auth/verify", get(verify))
        .merge(protected)
        .with_state(state)
}
