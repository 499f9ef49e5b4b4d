use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Role, TaxInvoice, TaxInvoiceDraft};
use crate::services::Identity;
use crate::services::invoice::InvoiceStatusView;
use crate::state::AppState;

/// 作成・発行・照会補正・取消が可能なロール
const MANAGE_ROLES: &[Role] = &[Role::Admin, Role::Manager];

#[derive(Debug, Serialize)]
pub struct PrintUrlResponse {
    pub url: String,
}

/// 税金計算書作成
///
/// POST /api/invoices
pub async fn create_invoice(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(draft): Json<TaxInvoiceDraft>,
) -> Result<(StatusCode, Json<TaxInvoice>), AppError> {
    state.session_gate.require_role(&identity, MANAGE_ROLES)?;

    let invoice = state
        .invoice_manager
        .create(draft, &identity.email)
        .await?;

    Ok((StatusCode::CREATED, Json(invoice)))
}

/// GET /api/invoices/{id}
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<TaxInvoice>, AppError> {
    let invoice = state.invoice_manager.get(invoice_id).await?;
    Ok(Json(invoice))
}

/// 発行
///
/// POST /api/invoices/{id}/submit
///
/// 業務的な拒否は 발행실패 の請求書を 200 で返す。
/// 通信失敗は 502（請求書は 작성중 のまま）。
pub async fn submit_invoice(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<TaxInvoice>, AppError> {
    state.session_gate.require_role(&identity, MANAGE_ROLES)?;

    tracing::info!(invoice_id = %invoice_id, email = %identity.email, "発行要求");
    let invoice = state.invoice_manager.submit(invoice_id).await?;
    Ok(Json(invoice))
}

/// GET /api/invoices/{id}/status
pub async fn invoice_status(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceStatusView>, AppError> {
    let view = state.invoice_manager.status(invoice_id).await?;
    Ok(Json(view))
}

/// 外部サービスの状態で補正
///
/// POST /api/invoices/{id}/reconcile
pub async fn reconcile_invoice(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<TaxInvoice>, AppError> {
    state.session_gate.require_role(&identity, MANAGE_ROLES)?;

    let invoice = state.invoice_manager.reconcile(invoice_id).await?;
    Ok(Json(invoice))
}

/// GET /api/invoices/{id}/print-url
pub async fn invoice_print_url(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<PrintUrlResponse>, AppError> {
    let url = state.invoice_manager.print_url(invoice_id).await?;
    Ok(Json(PrintUrlResponse { url }))
}

/// POST /api/invoices/{id}/cancel
pub async fn cancel_invoice(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<TaxInvoice>, AppError> {
    state.session_gate.require_role(&identity, MANAGE_ROLES)?;

    tracing::info!(invoice_id = %invoice_id, email = %identity.email, "取消要求");
    let invoice = state.invoice_manager.cancel(invoice_id).await?;
    Ok(Json(invoice))
}
