use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::models::{
    InvoiceItem, InvoiceParty, InvoiceStatus, InvoiceType, TaxInvoice, TaxType,
};

/// 新規作成する税金計算書（状態は常に 작성중）
#[derive(Debug, Clone)]
pub struct NewTaxInvoice {
    pub mgt_key: String,
    pub advertiser_id: Uuid,
    pub invoice_type: InvoiceType,
    pub tax_type: TaxType,
    pub write_date: Date,
    pub issuer: InvoiceParty,
    pub recipient: InvoiceParty,
    pub items: Vec<InvoiceItem>,
    pub supply_cost_total: i64,
    pub tax_total: i64,
    pub original_invoice_id: Option<Uuid>,
    pub original_nts_confirm_num: Option<String>,
    pub modify_code: Option<i16>,
    pub remark: Option<String>,
    pub created_by: String,
}

/// 状態遷移で書き込む値
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: InvoiceStatus,
    pub nts_confirm_num: Option<String>,
    pub error_message: Option<String>,
    pub issued_at: Option<OffsetDateTime>,
}

impl StatusChange {
    pub fn issued(nts_confirm_num: String, at: OffsetDateTime) -> Self {
        Self {
            status: InvoiceStatus::Issued,
            nts_confirm_num: Some(nts_confirm_num),
            error_message: None,
            issued_at: Some(at),
        }
    }

    pub fn failed(error_message: String) -> Self {
        Self {
            status: InvoiceStatus::Failed,
            nts_confirm_num: None,
            error_message: Some(error_message),
            issued_at: None,
        }
    }

    /// 取消（エラーメッセージは 발행실패 にのみ持たせるため消す）
    pub fn cancelled() -> Self {
        Self {
            status: InvoiceStatus::Cancelled,
            nts_confirm_num: None,
            error_message: None,
            issued_at: None,
        }
    }

    /// 書き込む前に遷移先の形を検査
    ///
    /// 承認番号は 발행완료 のときだけ、エラーメッセージは 발행실패 のときだけ持つ。
    pub fn check(&self) -> Result<(), String> {
        let is_issued = self.status == InvoiceStatus::Issued;
        let is_failed = self.status == InvoiceStatus::Failed;

        let confirm_ok = match self.nts_confirm_num.as_deref() {
            Some(num) => is_issued && !num.trim().is_empty(),
            None => !is_issued,
        };
        if !confirm_ok {
            return Err(format!("{} 상태와 국세청 승인번호가 맞지 않습니다", self.status));
        }

        let error_ok = match self.error_message.as_deref() {
            Some(message) => is_failed && !message.trim().is_empty(),
            None => !is_failed,
        };
        if !error_ok {
            return Err(format!("{} 상태와 오류 메시지가 맞지 않습니다", self.status));
        }
        Ok(())
    }
}

/// 税金計算書のレコードストア
///
/// 状態の書き込みは現在の状態を比較する条件付き更新のみ。
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn advertiser_exists(&self, advertiser_id: Uuid) -> Result<bool, sqlx::Error>;

    async fn insert(&self, invoice: &NewTaxInvoice) -> Result<TaxInvoice, sqlx::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TaxInvoice>, sqlx::Error>;

    /// 現在の状態が `expected` の場合のみ更新し、更新後のレコードを返す
    ///
    /// 状態が一致しない（他の操作に先を越された）場合は `Ok(None)`。
    async fn transition(
        &self,
        id: Uuid,
        expected: InvoiceStatus,
        change: &StatusChange,
    ) -> Result<Option<TaxInvoice>, sqlx::Error>;
}

const SELECT_COLUMNS: &str = r#"
    id, mgt_key, advertiser_id, invoice_type, tax_type, status, write_date,
    issuer, recipient, items, supply_cost_total, tax_total,
    original_invoice_id, original_nts_confirm_num, modify_code, remark,
    nts_confirm_num, error_message, created_by, issued_at, created_at, updated_at
"#;

/// mgt_key の UNIQUE 制約名
pub const MGT_KEY_UNIQUE_CONSTRAINT: &str = "tax_invoices_mgt_key_key";

#[derive(Clone)]
pub struct TaxInvoiceRepository {
    pool: PgPool,
}

impl TaxInvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceStore for TaxInvoiceRepository {
    async fn advertiser_exists(&self, advertiser_id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(SELECT 1 FROM advertisers WHERE id = $1)
            "#,
        )
        .bind(advertiser_id)
        .fetch_one(&self.pool)
        .await
    }

    /// 新しい税金計算書を作成
    ///
    /// # Errors
    /// - mgt_key 重複時: `sqlx::Error::Database` (constraint = "tax_invoices_mgt_key_key")
    async fn insert(&self, invoice: &NewTaxInvoice) -> Result<TaxInvoice, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO tax_invoices (
                mgt_key, advertiser_id, invoice_type, tax_type, status, write_date,
                issuer, recipient, items, supply_cost_total, tax_total,
                original_invoice_id, original_nts_confirm_num, modify_code, remark, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {SELECT_COLUMNS}
            "#
        );

        sqlx::query_as::<_, TaxInvoice>(&sql)
            .bind(&invoice.mgt_key)
            .bind(invoice.advertiser_id)
            .bind(invoice.invoice_type.as_str())
            .bind(invoice.tax_type.as_str())
            .bind(InvoiceStatus::Drafting.as_str())
            .bind(invoice.write_date)
            .bind(Json(&invoice.issuer))
            .bind(Json(&invoice.recipient))
            .bind(Json(&invoice.items))
            .bind(invoice.supply_cost_total)
            .bind(invoice.tax_total)
            .bind(invoice.original_invoice_id)
            .bind(invoice.original_nts_confirm_num.as_deref())
            .bind(invoice.modify_code)
            .bind(invoice.remark.as_deref())
            .bind(&invoice.created_by)
            .fetch_one(&self.pool)
            .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TaxInvoice>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM tax_invoices
            WHERE id = $1
            "#
        );

        sqlx::query_as::<_, TaxInvoice>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: InvoiceStatus,
        change: &StatusChange,
    ) -> Result<Option<TaxInvoice>, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE tax_invoices
            SET status = $3,
                nts_confirm_num = $4,
                error_message = $5,
                issued_at = $6,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {SELECT_COLUMNS}
            "#
        );

        sqlx::query_as::<_, TaxInvoice>(&sql)
            .bind(id)
            .bind(expected.as_str())
            .bind(change.status.as_str())
            .bind(change.nts_confirm_num.as_deref())
            .bind(change.error_message.as_deref())
            .bind(change.issued_at)
            .fetch_optional(&self.pool)
            .await
    }
}

/// mgt_key の UNIQUE 制約違反かどうか
pub fn is_mgt_key_conflict(error: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = error
        && db_err.constraint() == Some(MGT_KEY_UNIQUE_CONSTRAINT)
    {
        return true;
    }
    false
}
