use garde::Validate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::UnknownVariant;

/// 税金計算書の状態
///
/// 値は外部サービス・画面と共通の文字列をそのまま使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    #[serde(rename = "작성중")]
    Drafting,
    #[serde(rename = "발행완료")]
    Issued,
    #[serde(rename = "발행실패")]
    Failed,
    #[serde(rename = "취소")]
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drafting => "작성중",
            Self::Issued => "발행완료",
            Self::Failed => "발행실패",
            Self::Cancelled => "취소",
        }
    }

    /// ローカル取消が可能な状態か
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Drafting | Self::Failed)
    }
}

impl TryFrom<String> for InvoiceStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "작성중" => Ok(Self::Drafting),
            "발행완료" => Ok(Self::Issued),
            "발행실패" => Ok(Self::Failed),
            "취소" => Ok(Self::Cancelled),
            _ => Err(UnknownVariant(value)),
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 文書種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceType {
    #[serde(rename = "세금계산서")]
    Standard,
    /// 発行済み文書を訂正する修正税金計算書
    #[serde(rename = "수정세금계산서")]
    Amended,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "세금계산서",
            Self::Amended => "수정세금계산서",
        }
    }
}

impl TryFrom<String> for InvoiceType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "세금계산서" => Ok(Self::Standard),
            "수정세금계산서" => Ok(Self::Amended),
            _ => Err(UnknownVariant(value)),
        }
    }
}

/// 課税区分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaxType {
    #[serde(rename = "과세")]
    Taxable,
    #[serde(rename = "영세")]
    ZeroRated,
    #[serde(rename = "면세")]
    Exempt,
}

impl TaxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Taxable => "과세",
            Self::ZeroRated => "영세",
            Self::Exempt => "면세",
        }
    }
}

impl TryFrom<String> for TaxType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "과세" => Ok(Self::Taxable),
            "영세" => Ok(Self::ZeroRated),
            "면세" => Ok(Self::Exempt),
            _ => Err(UnknownVariant(value)),
        }
    }
}

/// 供給者・供給を受ける者の情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct InvoiceParty {
    #[garde(custom(business_number))]
    pub corp_num: String,
    #[garde(length(min = 1, max = 200))]
    pub corp_name: String,
    #[garde(length(min = 1, max = 100))]
    pub ceo_name: String,
    #[garde(length(max = 300))]
    pub address: Option<String>,
    #[garde(length(max = 100))]
    pub biz_type: Option<String>,
    #[garde(length(max = 100))]
    pub biz_class: Option<String>,
    #[garde(length(max = 100))]
    pub contact_name: Option<String>,
    #[garde(custom(optional_email))]
    pub email: Option<String>,
}

/// 明細行（金額はウォン単位）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct InvoiceItem {
    #[garde(length(min = 1, max = 100))]
    pub name: String,
    #[garde(length(max = 60))]
    pub spec: Option<String>,
    #[garde(range(min = 1))]
    pub qty: i64,
    #[garde(range(min = 0))]
    pub unit_cost: i64,
    #[garde(range(min = 0))]
    pub supply_cost: i64,
    #[garde(range(min = 0))]
    pub tax: i64,
    #[garde(length(max = 100))]
    pub remark: Option<String>,
}

/// 作成リクエスト（画面で確定された請求データ）
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TaxInvoiceDraft {
    #[garde(skip)]
    pub advertiser_id: Uuid,
    #[garde(skip)]
    pub invoice_type: InvoiceType,
    #[garde(skip)]
    pub tax_type: TaxType,
    #[garde(skip)]
    pub write_date: Date,
    #[garde(dive)]
    pub issuer: InvoiceParty,
    #[garde(dive)]
    pub recipient: InvoiceParty,
    #[garde(length(min = 1, max = 99), dive)]
    pub items: Vec<InvoiceItem>,
    /// 修正税金計算書の場合のみ: 訂正対象の請求書
    #[serde(default)]
    #[garde(skip)]
    pub original_invoice_id: Option<Uuid>,
    /// 修正事由コード（1〜6）
    #[serde(default)]
    #[garde(range(min = 1, max = 6))]
    pub modify_code: Option<i16>,
    #[serde(default)]
    #[garde(length(max = 150))]
    pub remark: Option<String>,
}

impl TaxInvoiceDraft {
    pub fn supply_cost_total(&self) -> i64 {
        self.items.iter().map(|item| item.supply_cost).sum()
    }

    pub fn tax_total(&self) -> i64 {
        self.items.iter().map(|item| item.tax).sum()
    }

    /// フィールド単体では表現できない整合性チェック
    pub fn check_cross_fields(&self) -> Result<(), String> {
        if self.tax_type != TaxType::Taxable
            && let Some(pos) = self.items.iter().position(|item| item.tax != 0)
        {
            return Err(format!(
                "items[{}].tax: {} 건은 세액이 0이어야 합니다",
                pos,
                self.tax_type.as_str()
            ));
        }

        match self.invoice_type {
            InvoiceType::Standard => {
                if self.original_invoice_id.is_some() || self.modify_code.is_some() {
                    return Err(
                        "original_invoice_id: 수정세금계산서에서만 지정할 수 있습니다".to_string(),
                    );
                }
            }
            InvoiceType::Amended => {
                if self.original_invoice_id.is_none() {
                    return Err("original_invoice_id: 필수 항목입니다".to_string());
                }
                if self.modify_code.is_none() {
                    return Err("modify_code: 필수 항목입니다".to_string());
                }
            }
        }

        Ok(())
    }
}

/// 税金計算書レコード
///
/// 状態遷移は InvoiceLifecycleManager 経由でのみ行う。
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TaxInvoice {
    pub id: Uuid,
    pub mgt_key: String,
    pub advertiser_id: Uuid,
    #[sqlx(try_from = "String")]
    pub invoice_type: InvoiceType,
    #[sqlx(try_from = "String")]
    pub tax_type: TaxType,
    #[sqlx(try_from = "String")]
    pub status: InvoiceStatus,
    pub write_date: Date,
    #[sqlx(json)]
    pub issuer: InvoiceParty,
    #[sqlx(json)]
    pub recipient: InvoiceParty,
    #[sqlx(json)]
    pub items: Vec<InvoiceItem>,
    pub supply_cost_total: i64,
    pub tax_total: i64,
    pub original_invoice_id: Option<Uuid>,
    pub original_nts_confirm_num: Option<String>,
    pub modify_code: Option<i16>,
    pub remark: Option<String>,
    pub nts_confirm_num: Option<String>,
    pub error_message: Option<String>,
    pub created_by: String,
    pub issued_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TaxInvoice {
    /// 承認番号は発行完了時のみ、エラーメッセージは発行失敗時のみ存在する
    pub fn check_consistency(&self) -> Result<(), String> {
        let has_confirm = self
            .nts_confirm_num
            .as_deref()
            .is_some_and(|n| !n.is_empty());
        let has_error = self
            .error_message
            .as_deref()
            .is_some_and(|m| !m.is_empty());

        match self.status {
            InvoiceStatus::Issued if !has_confirm => {
                Err(format!("{}: 발행완료 상태에 국세청 승인번호가 없습니다", self.mgt_key))
            }
            InvoiceStatus::Failed if !has_error => {
                Err(format!("{}: 발행실패 상태에 오류 메시지가 없습니다", self.mgt_key))
            }
            InvoiceStatus::Issued | InvoiceStatus::Failed => {
                if has_confirm && has_error {
                    Err(format!("{}: 승인번호와 오류 메시지가 함께 존재합니다", self.mgt_key))
                } else if self.status == InvoiceStatus::Failed && has_confirm {
                    Err(format!("{}: 발행실패 상태에 승인번호가 있습니다", self.mgt_key))
                } else {
                    Ok(())
                }
            }
            InvoiceStatus::Drafting | InvoiceStatus::Cancelled if has_confirm => {
                Err(format!("{}: 미발행 상태에 승인번호가 있습니다", self.mgt_key))
            }
            InvoiceStatus::Drafting | InvoiceStatus::Cancelled if has_error => Err(format!(
                "{}: {} 상태에 오류 메시지가 있습니다",
                self.mgt_key, self.status
            )),
            _ => Ok(()),
        }
    }
}

/// 事業者登録番号（ハイフン除去後10桁）
pub fn normalize_business_number(value: &str) -> Option<String> {
    let digits: String = value.chars().filter(|c| *c != '-').collect();
    if digits.len() == 10 && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(digits)
    } else {
        None
    }
}

fn business_number(value: &str, _context: &()) -> garde::Result {
    match normalize_business_number(value) {
        Some(_) => Ok(()),
        None => Err(garde::Error::new("사업자등록번호는 10자리 숫자여야 합니다")),
    }
}

fn optional_email(value: &Option<String>, _context: &()) -> garde::Result {
    match value {
        Some(email) if email.trim().is_empty() || !email.contains('@') => {
            Err(garde::Error::new("유효한 이메일 주소가 아닙니다"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use time::macros::date;

    pub(crate) fn sample_party(corp_num: &str) -> InvoiceParty {
        InvoiceParty {
            corp_num: corp_num.to_string(),
            corp_name: "주식회사 테스트".to_string(),
            ceo_name: "홍길동".to_string(),
            address: Some("서울특별시 강남구".to_string()),
            biz_type: None,
            biz_class: None,
            contact_name: None,
            email: Some("billing@example.com".to_string()),
        }
    }

    pub(crate) fn sample_draft(advertiser_id: Uuid) -> TaxInvoiceDraft {
        TaxInvoiceDraft {
            advertiser_id,
            invoice_type: InvoiceType::Standard,
            tax_type: TaxType::Taxable,
            write_date: date!(2026 - 10 - 16),
            issuer: sample_party("123-45-67890"),
            recipient: sample_party("2208162517"),
            items: vec![InvoiceItem {
                name: "배너 광고 10월".to_string(),
                spec: None,
                qty: 1,
                unit_cost: 1_000_000,
                supply_cost: 1_000_000,
                tax: 100_000,
                remark: None,
            }],
            original_invoice_id: None,
            modify_code: None,
            remark: None,
        }
    }

    #[test]
    fn test_status_wire_strings() {
        assert_eq!(
            serde_json::to_string(&InvoiceStatus::Issued).unwrap(),
            "\"발행완료\""
        );
        assert_eq!(
            InvoiceStatus::try_from("작성중".to_string()).unwrap(),
            InvoiceStatus::Drafting
        );
        assert!(InvoiceStatus::try_from("draft".to_string()).is_err());
    }

    #[test]
    fn test_valid_draft_passes() {
        let draft = sample_draft(Uuid::new_v4());
        assert!(draft.validate().is_ok());
        assert!(draft.check_cross_fields().is_ok());
        assert_eq!(draft.supply_cost_total(), 1_000_000);
        assert_eq!(draft.tax_total(), 100_000);
    }

    #[test]
    fn test_bad_business_number_reports_field() {
        let mut draft = sample_draft(Uuid::new_v4());
        draft.recipient.corp_num = "12-345".to_string();
        let report = draft.validate().unwrap_err();
        assert!(report.to_string().contains("recipient.corp_num"));
    }

    #[test]
    fn test_empty_items_rejected() {
        let mut draft = sample_draft(Uuid::new_v4());
        draft.items.clear();
        assert!(draft.validate().is_err());
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut draft = sample_draft(Uuid::new_v4());
        draft.items[0].qty = 0;
        assert!(draft.validate().is_err());
    }

    #[test]
    fn test_exempt_invoice_with_tax_rejected() {
        let mut draft = sample_draft(Uuid::new_v4());
        draft.tax_type = TaxType::Exempt;
        assert!(draft.check_cross_fields().is_err());
    }

    #[test]
    fn test_amended_requires_original() {
        let mut draft = sample_draft(Uuid::new_v4());
        draft.invoice_type = InvoiceType::Amended;
        assert!(draft.check_cross_fields().is_err());

        draft.original_invoice_id = Some(Uuid::new_v4());
        draft.modify_code = Some(1);
        assert!(draft.check_cross_fields().is_ok());
    }

    #[test]
    fn test_normalize_business_number() {
        assert_eq!(
            normalize_business_number("123-45-67890").as_deref(),
            Some("1234567890")
        );
        assert!(normalize_business_number("12345678901").is_none());
        assert!(normalize_business_number("12345a7890").is_none());
    }

    fn record(status: InvoiceStatus, confirm: Option<&str>, error: Option<&str>) -> TaxInvoice {
        let draft = sample_draft(Uuid::new_v4());
        let now = OffsetDateTime::now_utc();
        TaxInvoice {
            id: Uuid::new_v4(),
            mgt_key: "20261016-0123456789ab".to_string(),
            advertiser_id: draft.advertiser_id,
            invoice_type: draft.invoice_type,
            tax_type: draft.tax_type,
            status,
            write_date: draft.write_date,
            issuer: draft.issuer,
            recipient: draft.recipient,
            items: draft.items,
            supply_cost_total: 1_000_000,
            tax_total: 100_000,
            original_invoice_id: None,
            original_nts_confirm_num: None,
            modify_code: None,
            remark: None,
            nts_confirm_num: confirm.map(str::to_string),
            error_message: error.map(str::to_string),
            created_by: "manager@example.com".to_string(),
            issued_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_check_consistency() {
        use InvoiceStatus::*;

        assert!(record(Drafting, None, None).check_consistency().is_ok());
        assert!(record(Issued, Some("2026-1"), None).check_consistency().is_ok());
        assert!(record(Failed, None, Some("bad")).check_consistency().is_ok());
        assert!(record(Cancelled, None, None).check_consistency().is_ok());

        assert!(record(Issued, None, None).check_consistency().is_err());
        assert!(record(Issued, Some(""), None).check_consistency().is_err());
        assert!(record(Failed, None, None).check_consistency().is_err());
        assert!(record(Issued, Some("2026-1"), Some("bad")).check_consistency().is_err());
        assert!(record(Failed, Some("2026-1"), Some("bad")).check_consistency().is_err());
        assert!(record(Drafting, Some("2026-1"), None).check_consistency().is_err());
        assert!(record(Drafting, None, Some("bad")).check_consistency().is_err());
        assert!(record(Cancelled, None, Some("bad")).check_consistency().is_err());
    }
}
