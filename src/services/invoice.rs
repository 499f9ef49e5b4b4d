use std::sync::Arc;

use garde::Validate;
use rand::RngCore;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{InvoiceStatus, InvoiceType, TaxInvoice, TaxInvoiceDraft};
use crate::repositories::tax_invoice::{
    InvoiceStore, NewTaxInvoice, StatusChange, is_mgt_key_conflict,
};
use crate::services::fiscal::{FiscalGateway, FiscalStatus, IssueOutcome};
use crate::services::keyed_lock::KeyedLocks;

/// mgt_key 衝突時の再生成回数
const MGT_KEY_ATTEMPTS: usize = 3;

/// 状態照会の結果（ローカルレコード + 外部サービス上の状態）
#[derive(Debug, Serialize)]
pub struct InvoiceStatusView {
    pub invoice: TaxInvoice,
    pub external: Option<FiscalStatus>,
}

/// 税金計算書の状態遷移を担う唯一のコンポーネント
///
/// 状態遷移:
/// - 작성중 → 발행완료 / 발행실패（発行 API の結果、または照会による補正）
/// - 작성중 / 발행실패 → 취소
///
/// 同一請求書に対する submit / reconcile / cancel は請求書IDごとのロックで直列化し、
/// 書き込みは現在の状態を条件にした更新で行う。
#[derive(Clone)]
pub struct InvoiceLifecycleManager {
    store: Arc<dyn InvoiceStore>,
    fiscal: Arc<dyn FiscalGateway>,
    locks: Arc<KeyedLocks>,
}

impl InvoiceLifecycleManager {
    /// 新しい InvoiceLifecycleManager を作成
    pub fn new(store: Arc<dyn InvoiceStore>, fiscal: Arc<dyn FiscalGateway>) -> Self {
        Self {
            store,
            fiscal,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// 作成中（작성중）の税金計算書を作成
    pub async fn create(
        &self,
        draft: TaxInvoiceDraft,
        created_by: &str,
    ) -> Result<TaxInvoice, AppError> {
        draft
            .validate()
            .map_err(|report| AppError::Validation(report.to_string()))?;
        draft.check_cross_fields().map_err(AppError::Validation)?;

        if !self.store.advertiser_exists(draft.advertiser_id).await? {
            return Err(AppError::Validation(
                "advertiser_id: 존재하지 않는 광고주입니다".to_string(),
            ));
        }

        let original_nts_confirm_num = match (draft.invoice_type, draft.original_invoice_id) {
            (InvoiceType::Amended, Some(original_id)) => {
                Some(self.original_confirm_num(original_id).await?)
            }
            _ => None,
        };

        let mut new_invoice = NewTaxInvoice {
            mgt_key: String::new(),
            advertiser_id: draft.advertiser_id,
            invoice_type: draft.invoice_type,
            tax_type: draft.tax_type,
            write_date: draft.write_date,
            supply_cost_total: draft.supply_cost_total(),
            tax_total: draft.tax_total(),
            issuer: draft.issuer,
            recipient: draft.recipient,
            items: draft.items,
            original_invoice_id: draft.original_invoice_id,
            original_nts_confirm_num,
            modify_code: draft.modify_code,
            remark: draft.remark,
            created_by: created_by.to_string(),
        };

        for attempt in 1..=MGT_KEY_ATTEMPTS {
            new_invoice.mgt_key = generate_mgt_key(OffsetDateTime::now_utc());

            match self.store.insert(&new_invoice).await {
                Ok(invoice) => {
                    tracing::info!(
                        invoice_id = %invoice.id,
                        mgt_key = %invoice.mgt_key,
                        created_by = %created_by,
                        "税金計算書を作成"
                    );
                    return Ok(invoice);
                }
                Err(e) if is_mgt_key_conflict(&e) && attempt < MGT_KEY_ATTEMPTS => {
                    tracing::warn!(attempt, "mgt_key 衝突、再生成");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Internal(anyhow::anyhow!(
            "failed to allocate a unique mgt_key"
        )))
    }

    pub async fn get(&self, invoice_id: Uuid) -> Result<TaxInvoice, AppError> {
        self.store
            .find_by_id(invoice_id)
            .await?
            .ok_or(AppError::NotFound("세금계산서"))
    }

    /// 発行 API に送信
    ///
    /// - 発行完了済みならネットワーク呼び出しの前に拒否する
    /// - 業務的な拒否は 발행실패 に遷移（エラーメッセージを保存）
    /// - 通信失敗時は 작성중 のまま、エラーを返して手動再試行に委ねる
    pub async fn submit(&self, invoice_id: Uuid) -> Result<TaxInvoice, AppError> {
        let _guard = self.locks.lock(invoice_id).await;
        let invoice = self.get(invoice_id).await?;

        match invoice.status {
            InvoiceStatus::Drafting => {}
            InvoiceStatus::Issued => {
                return Err(AppError::InvariantViolation(format!(
                    "{}: 이미 발행완료된 세금계산서는 다시 발행할 수 없습니다",
                    invoice.mgt_key
                )));
            }
            other => {
                return Err(AppError::InvariantViolation(format!(
                    "{}: {} 상태에서는 발행할 수 없습니다",
                    invoice.mgt_key, other
                )));
            }
        }

        tracing::info!(invoice_id = %invoice.id, mgt_key = %invoice.mgt_key, "発行リクエスト送信");

        match self.fiscal.issue(&invoice).await {
            Ok(IssueOutcome::Issued {
                nts_confirm_num, ..
            }) => {
                let change = StatusChange::issued(nts_confirm_num, OffsetDateTime::now_utc());
                self.apply(&invoice, change).await
            }
            Ok(IssueOutcome::Rejected { code, message }) => {
                tracing::warn!(
                    mgt_key = %invoice.mgt_key,
                    code,
                    message = %message,
                    "発行が拒否された"
                );
                let message = if message.trim().is_empty() {
                    format!("발행 거부 (code {})", code)
                } else {
                    message
                };
                self.apply(&invoice, StatusChange::failed(message)).await
            }
            Err(e) => {
                // 外部側で発行されたかは不明。ローカルは 작성중 のまま残し reconcile で補正する
                tracing::error!(
                    mgt_key = %invoice.mgt_key,
                    error = %e,
                    "発行リクエストの結果が不明（작성중 のまま）"
                );
                Err(e)
            }
        }
    }

    /// 外部サービスの状態でローカル状態を補正
    ///
    /// 外部で発行済みなら 발행완료 に遷移して承認番号を補完する。
    /// 見つからない・未発行の場合は何もしない。
    pub async fn reconcile(&self, invoice_id: Uuid) -> Result<TaxInvoice, AppError> {
        let _guard = self.locks.lock(invoice_id).await;
        let invoice = self.get(invoice_id).await?;

        match invoice.status {
            InvoiceStatus::Drafting => {}
            InvoiceStatus::Issued => return Ok(invoice),
            other => {
                return Err(AppError::InvariantViolation(format!(
                    "{}: {} 상태는 상태 동기화 대상이 아닙니다",
                    invoice.mgt_key, other
                )));
            }
        }

        let Some(external) = self.fiscal.get_status(&invoice.mgt_key).await? else {
            tracing::info!(mgt_key = %invoice.mgt_key, "外部サービスに文書なし（状態変更なし）");
            return Ok(invoice);
        };

        match external.issued_confirm_num() {
            Some(confirm_num) => {
                tracing::warn!(
                    mgt_key = %invoice.mgt_key,
                    state = %external.state,
                    "外部で発行済み、ローカル状態を補正"
                );
                let change = StatusChange::issued(confirm_num.to_string(), OffsetDateTime::now_utc());
                self.apply(&invoice, change).await
            }
            None => {
                tracing::info!(
                    mgt_key = %invoice.mgt_key,
                    state = %external.state,
                    "外部で未発行（状態変更なし）"
                );
                Ok(invoice)
            }
        }
    }

    /// ローカル状態と外部サービス上の状態を返す（状態は変更しない）
    pub async fn status(&self, invoice_id: Uuid) -> Result<InvoiceStatusView, AppError> {
        let invoice = self.get(invoice_id).await?;
        let external = self.fiscal.get_status(&invoice.mgt_key).await?;
        Ok(InvoiceStatusView { invoice, external })
    }

    /// 印刷用URLを取得（発行完了済みのみ）
    pub async fn print_url(&self, invoice_id: Uuid) -> Result<String, AppError> {
        let invoice = self.get(invoice_id).await?;
        if invoice.status != InvoiceStatus::Issued {
            return Err(AppError::InvariantViolation(format!(
                "{}: 발행완료된 세금계산서만 인쇄할 수 있습니다",
                invoice.mgt_key
            )));
        }
        self.fiscal.get_print_url(&invoice.mgt_key).await
    }

    /// 取消（작성중 / 발행실패 のみ）
    ///
    /// 発行完了した文書は修正税金計算書を新規作成して訂正する。
    pub async fn cancel(&self, invoice_id: Uuid) -> Result<TaxInvoice, AppError> {
        let _guard = self.locks.lock(invoice_id).await;
        let invoice = self.get(invoice_id).await?;

        if !invoice.status.is_cancellable() {
            return Err(AppError::InvariantViolation(format!(
                "{}: {} 상태의 세금계산서는 취소할 수 없습니다",
                invoice.mgt_key, invoice.status
            )));
        }

        let change = StatusChange::cancelled();
        let cancelled = self.apply(&invoice, change).await?;
        tracing::info!(mgt_key = %cancelled.mgt_key, "税金計算書を取消");
        Ok(cancelled)
    }

    /// 訂正対象の承認番号を取得（発行完了済みであること）
    async fn original_confirm_num(&self, original_id: Uuid) -> Result<String, AppError> {
        let original = self.store.find_by_id(original_id).await?.ok_or_else(|| {
            AppError::Validation("original_invoice_id: 존재하지 않는 세금계산서입니다".to_string())
        })?;

        match (original.status, original.nts_confirm_num) {
            (InvoiceStatus::Issued, Some(num)) => Ok(num),
            _ => Err(AppError::Validation(
                "original_invoice_id: 발행완료된 세금계산서만 수정할 수 있습니다".to_string(),
            )),
        }
    }

    /// 遷移先を検査してから条件付き更新で適用
    ///
    /// 検査に通らない遷移は書き込まない。
    async fn apply(
        &self,
        current: &TaxInvoice,
        change: StatusChange,
    ) -> Result<TaxInvoice, AppError> {
        change.check().map_err(|detail| {
            AppError::InvariantViolation(format!("{}: {}", current.mgt_key, detail))
        })?;

        let updated = self
            .store
            .transition(current.id, current.status, &change)
            .await?
            .ok_or_else(|| {
                AppError::InvariantViolation(format!(
                    "{}: 다른 작업이 상태를 먼저 변경했습니다 ({} → {})",
                    current.mgt_key, current.status, change.status
                ))
            })?;

        tracing::info!(
            mgt_key = %updated.mgt_key,
            from = %current.status,
            to = %updated.status,
            "状態遷移"
        );
        Ok(updated)
    }
}

/// `YYYYMMDD-<12桁hex>` 形式の mgt_key を生成（24文字以内）
pub fn generate_mgt_key(now: OffsetDateTime) -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    let suffix: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{:04}{:02}{:02}-{}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        suffix
    )
}
