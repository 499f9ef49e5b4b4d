use axum::{
    Json,
    extract::{Path, State},
};

use crate::error::AppError;
use crate::models::tax_invoice::normalize_business_number;
use crate::services::fiscal::BusinessStatus;
use crate::state::AppState;

/// 事業者状態照会
///
/// GET /api/business-status/{corp_num}
///
/// 形式が不正な番号は外部サービスに問い合わせる前に 400 を返す。
pub async fn business_status(
    State(state): State<AppState>,
    Path(corp_num): Path<String>,
) -> Result<Json<BusinessStatus>, AppError> {
    let corp_num = normalize_business_number(&corp_num).ok_or_else(|| {
        AppError::Validation("corp_num: 사업자등록번호는 10자리 숫자여야 합니다".to_string())
    })?;

    let status = state.fiscal.check_business_status(&corp_num).await?;
    tracing::debug!(corp_num = %status.corp_num, status = %status.status, "事業者状態照会完了");
    Ok(Json(status))
}
