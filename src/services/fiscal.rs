use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretBox};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::TaxInvoice;
use crate::models::tax_invoice::normalize_business_number;

/// 発行結果（業務的な拒否を含む。通信失敗は Err で返す）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    Issued {
        code: i64,
        message: String,
        nts_confirm_num: String,
    },
    Rejected {
        code: i64,
        message: String,
    },
}

/// 外部サービス上の文書状態
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FiscalStatus {
    pub state: String,
    pub state_date_time: Option<String>,
    pub confirm_num: Option<String>,
}

impl FiscalStatus {
    /// 国税庁承認番号が付与済みなら発行完了とみなす
    pub fn issued_confirm_num(&self) -> Option<&str> {
        self.confirm_num.as_deref().filter(|n| !n.trim().is_empty())
    }
}

/// 事業者の営業状態
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusinessStatus {
    pub corp_num: String,
    pub status: String,
    pub company_name: Option<String>,
}

/// 電子税金計算書サービスとの境界
///
/// すべての呼び出しは1往復のネットワーク通信で、ローカル状態は持たない。
#[async_trait]
pub trait FiscalGateway: Send + Sync {
    async fn issue(&self, invoice: &TaxInvoice) -> Result<IssueOutcome, AppError>;

    /// 文書が存在しない場合は `Ok(None)`
    async fn get_status(&self, mgt_key: &str) -> Result<Option<FiscalStatus>, AppError>;

    async fn get_print_url(&self, mgt_key: &str) -> Result<String, AppError>;

    async fn check_business_status(&self, corp_num: &str) -> Result<BusinessStatus, AppError>;
}

// ============================================================================
// ワイヤー形式（フィールド名はサービス定義のまま）
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueRequest<'a> {
    mgt_key: &'a str,
    invoice_type: &'static str,
    tax_type: &'static str,
    write_date: String,
    invoicer: WireParty<'a>,
    invoicee: WireParty<'a>,
    supply_cost_total: String,
    tax_total: String,
    total_amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    modify_code: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    org_nts_confirm_num: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remark1: Option<&'a str>,
    detail_list: Vec<WireDetail<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireParty<'a> {
    corp_num: String,
    corp_name: &'a str,
    ceo_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    addr: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    biz_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    biz_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    contact_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireDetail<'a> {
    serial_num: usize,
    item_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    spec: Option<&'a str>,
    qty: String,
    unit_cost: String,
    supply_cost: String,
    tax: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remark: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueResponse {
    code: i64,
    #[serde(default)]
    message: String,
    nts_confirm_num: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateResponse {
    state: String,
    #[serde(rename = "stateDT")]
    state_dt: Option<String>,
    nts_confirm_num: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrintUrlResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BusinessStatusResponse {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    state: Option<String>,
    corp_name: Option<String>,
}

/// エラー時のレスポンスボディ
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    message: String,
}

fn to_wire_party(party: &crate::models::InvoiceParty) -> WireParty<'_> {
    WireParty {
        corp_num: normalize_business_number(&party.corp_num)
            .unwrap_or_else(|| party.corp_num.clone()),
        corp_name: &party.corp_name,
        ceo_name: &party.ceo_name,
        addr: party.address.as_deref(),
        biz_type: party.biz_type.as_deref(),
        biz_class: party.biz_class.as_deref(),
        contact_name: party.contact_name.as_deref(),
        email: party.email.as_deref(),
    }
}

fn build_issue_request(invoice: &TaxInvoice) -> IssueRequest<'_> {
    let write_date = format!(
        "{:04}{:02}{:02}",
        invoice.write_date.year(),
        u8::from(invoice.write_date.month()),
        invoice.write_date.day()
    );

    IssueRequest {
        mgt_key: &invoice.mgt_key,
        invoice_type: invoice.invoice_type.as_str(),
        tax_type: invoice.tax_type.as_str(),
        write_date,
        invoicer: to_wire_party(&invoice.issuer),
        invoicee: to_wire_party(&invoice.recipient),
        supply_cost_total: invoice.supply_cost_total.to_string(),
        tax_total: invoice.tax_total.to_string(),
        total_amount: (invoice.supply_cost_total + invoice.tax_total).to_string(),
        modify_code: invoice.modify_code,
        org_nts_confirm_num: invoice.original_nts_confirm_num.as_deref(),
        remark1: invoice.remark.as_deref(),
        detail_list: invoice
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| WireDetail {
                serial_num: i + 1,
                item_name: &item.name,
                spec: item.spec.as_deref(),
                qty: item.qty.to_string(),
                unit_cost: item.unit_cost.to_string(),
                supply_cost: item.supply_cost.to_string(),
                tax: item.tax.to_string(),
                remark: item.remark.as_deref(),
            })
            .collect(),
    }
}

/// 発行レスポンスの解釈
///
/// - code < 0: 業務的な拒否（メッセージはそのまま）
/// - code >= 0 かつ承認番号あり: 発行完了
/// - code >= 0 で承認番号なし: 不正なレスポンス（通信失敗と同じ扱い）
fn interpret_issue_response(response: IssueResponse) -> Result<IssueOutcome, AppError> {
    if response.code < 0 {
        return Ok(IssueOutcome::Rejected {
            code: response.code,
            message: response.message,
        });
    }

    match response.nts_confirm_num {
        Some(num) if !num.trim().is_empty() => Ok(IssueOutcome::Issued {
            code: response.code,
            message: response.message,
            nts_confirm_num: num,
        }),
        _ => Err(AppError::FiscalUnavailable(format!(
            "issue response without confirmation number (code {})",
            response.code
        ))),
    }
}

/// 電子税金計算書サービスの REST クライアント
#[derive(Clone)]
pub struct FiscalClient {
    client: reqwest::Client,
    base_url: String,
    api_key: std::sync::Arc<SecretBox<String>>,
    corp_num: String,
}

impl FiscalClient {
    /// 新しい FiscalClient を作成
    ///
    /// # Security
    /// `api_key` はログに出力しない
    pub fn new(
        base_url: String,
        api_key: SecretBox<String>,
        corp_num: String,
        timeout: std::time::Duration,
    ) -> Result<Self, AppError> {
        let corp_num = normalize_business_number(&corp_num).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("FISCAL_CORP_NUM must be 10 digits"))
        })?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                tracing::error!(error = ?e, "HTTP クライアントの初期化エラー");
                AppError::Internal(anyhow::anyhow!("failed to build http client"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: std::sync::Arc::new(api_key),
            corp_num,
        })
    }

    fn invoice_url(&self, mgt_key: &str, action: &str) -> String {
        format!(
            "{}/taxinvoices/{}/{}",
            self.base_url,
            urlencoding::encode(mgt_key),
            action
        )
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(self.api_key.expose_secret())
            .header("X-Corp-Num", &self.corp_num)
    }

    /// リクエストを送信し JSON をデコード
    ///
    /// 404 は `Ok(None)`、業務エラーボディ（code < 0）は `FiscalRejected`、
    /// それ以外の失敗はすべて `FiscalUnavailable`。
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<Option<T>, AppError> {
        let response = self.authorized(request).send().await.map_err(|e| {
            tracing::error!(error = ?e, operation, "税金計算書サービス通信エラー");
            AppError::FiscalUnavailable(format!("{operation}: {e}"))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            tracing::error!(error = ?e, operation, "レスポンス読み取りエラー");
            AppError::FiscalUnavailable(format!("{operation}: {e}"))
        })?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            if status.is_client_error()
                && let Ok(error) = serde_json::from_str::<ErrorBody>(&body)
                && error.code < 0
            {
                tracing::warn!(code = error.code, operation, "税金計算書サービスが要求を拒否");
                return Err(AppError::FiscalRejected {
                    code: error.code,
                    message: error.message,
                });
            }
            tracing::error!(status = %status, operation, "税金計算書サービスがエラーを返却");
            return Err(AppError::FiscalUnavailable(format!(
                "{operation}: status {status}"
            )));
        }

        serde_json::from_str::<T>(&body).map(Some).map_err(|e| {
            tracing::error!(error = ?e, operation, "税金計算書サービスのレスポンスのパースエラー");
            AppError::FiscalUnavailable(format!("{operation}: malformed response"))
        })
    }
}

#[async_trait]
impl FiscalGateway for FiscalClient {
    async fn issue(&self, invoice: &TaxInvoice) -> Result<IssueOutcome, AppError> {
        let url = self.invoice_url(&invoice.mgt_key, "issue");
        let body = build_issue_request(invoice);

        let response = match self
            .send_json::<IssueResponse>(self.client.post(&url).json(&body), "issue")
            .await
        {
            Ok(Some(response)) => response,
            Ok(None) => {
                return Err(AppError::FiscalUnavailable(
                    "issue: endpoint returned 404".to_string(),
                ));
            }
            Err(AppError::FiscalRejected { code, message }) => {
                return Ok(IssueOutcome::Rejected { code, message });
            }
            Err(e) => return Err(e),
        };

        let outcome = interpret_issue_response(response)?;
        tracing::info!(mgt_key = %invoice.mgt_key, outcome = ?outcome, "発行リクエスト完了");
        Ok(outcome)
    }

    async fn get_status(&self, mgt_key: &str) -> Result<Option<FiscalStatus>, AppError> {
        let url = self.invoice_url(mgt_key, "state");
        let response = self
            .send_json::<StateResponse>(self.client.get(&url), "get_status")
            .await?;

        tracing::debug!(mgt_key = %mgt_key, found = response.is_some(), "状態照会完了");

        Ok(response.map(|r| FiscalStatus {
            state: r.state,
            state_date_time: r.state_dt,
            confirm_num: r.nts_confirm_num,
        }))
    }

    async fn get_print_url(&self, mgt_key: &str) -> Result<String, AppError> {
        let url = self.invoice_url(mgt_key, "print-url");
        let response = self
            .send_json::<PrintUrlResponse>(self.client.get(&url), "get_print_url")
            .await?
            .ok_or(AppError::NotFound("세금계산서"))?;
        Ok(response.url)
    }

    async fn check_business_status(&self, corp_num: &str) -> Result<BusinessStatus, AppError> {
        let corp_num = normalize_business_number(corp_num).ok_or_else(|| {
            AppError::Validation("corp_num: 사업자등록번호는 10자리 숫자여야 합니다".to_string())
        })?;

        let url = format!("{}/business-status/{}", self.base_url, corp_num);
        let response = self
            .send_json::<BusinessStatusResponse>(self.client.get(&url), "check_business_status")
            .await?
            .ok_or(AppError::NotFound("사업자"))?;

        if let Some(code) = response.code
            && code < 0
        {
            return Err(AppError::FiscalRejected {
                code,
                message: response.message.unwrap_or_default(),
            });
        }

        let status = response.state.ok_or_else(|| {
            AppError::FiscalUnavailable("check_business_status: missing state".to_string())
        })?;

        Ok(BusinessStatus {
            corp_num,
            status,
            company_name: response.corp_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tax_invoice::tests::sample_draft;
    use crate::models::{InvoiceStatus, InvoiceType, TaxType};
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn sample_invoice() -> TaxInvoice {
        let draft = sample_draft(Uuid::new_v4());
        let now = OffsetDateTime::now_utc();
        TaxInvoice {
            id: Uuid::new_v4(),
            mgt_key: "20261016-abcdef012345".to_string(),
            advertiser_id: draft.advertiser_id,
            invoice_type: InvoiceType::Standard,
            tax_type: TaxType::Taxable,
            status: InvoiceStatus::Drafting,
            write_date: draft.write_date,
            issuer: draft.issuer.clone(),
            recipient: draft.recipient.clone(),
            supply_cost_total: draft.supply_cost_total(),
            tax_total: draft.tax_total(),
            items: draft.items,
            original_invoice_id: None,
            original_nts_confirm_num: None,
            modify_code: None,
            remark: None,
            nts_confirm_num: None,
            error_message: None,
            created_by: "manager@example.com".to_string(),
            issued_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_issue_request_wire_format() {
        let invoice = sample_invoice();
        let value = serde_json::to_value(build_issue_request(&invoice)).unwrap();

        assert_eq!(value["mgtKey"], "20261016-abcdef012345");
        assert_eq!(value["invoiceType"], "세금계산서");
        assert_eq!(value["taxType"], "과세");
        assert_eq!(value["writeDate"], "20261016");
        assert_eq!(value["invoicer"]["corpNum"], "1234567890");
        assert_eq!(value["totalAmount"], "1100000");
        assert_eq!(value["detailList"][0]["serialNum"], 1);
        assert!(value.get("orgNtsConfirmNum").is_none());
    }

    #[test]
    fn test_negative_code_is_rejection_with_verbatim_message() {
        let outcome = interpret_issue_response(IssueResponse {
            code: -11000001,
            message: "공급받는자 사업자번호가 유효하지 않습니다".to_string(),
            nts_confirm_num: None,
        })
        .unwrap();

        assert_eq!(
            outcome,
            IssueOutcome::Rejected {
                code: -11000001,
                message: "공급받는자 사업자번호가 유효하지 않습니다".to_string(),
            }
        );
    }

    #[test]
    fn test_success_requires_confirm_number() {
        let issued = interpret_issue_response(IssueResponse {
            code: 1,
            message: "발행 완료".to_string(),
            nts_confirm_num: Some("20261016-41000042-12345678".to_string()),
        })
        .unwrap();
        assert!(matches!(issued, IssueOutcome::Issued { .. }));

        let malformed = interpret_issue_response(IssueResponse {
            code: 1,
            message: String::new(),
            nts_confirm_num: Some("  ".to_string()),
        });
        assert!(matches!(malformed, Err(AppError::FiscalUnavailable(_))));
    }

    #[test]
    fn test_state_response_field_names() {
        let parsed: StateResponse = serde_json::from_str(
            r#"{"state":"발행완료","stateDT":"20261016103000","ntsConfirmNum":"2026-1"}"#,
        )
        .unwrap();
        assert_eq!(parsed.state, "발행완료");
        assert_eq!(parsed.state_dt.as_deref(), Some("20261016103000"));
        assert_eq!(parsed.nts_confirm_num.as_deref(), Some("2026-1"));
    }

    #[test]
    fn test_fiscal_status_issued_confirm_num() {
        let status = FiscalStatus {
            state: "발행완료".to_string(),
            state_date_time: None,
            confirm_num: Some(String::new()),
        };
        assert!(status.issued_confirm_num().is_none());
    }

    #[test]
    fn test_client_rejects_bad_corp_num() {
        let result = FiscalClient::new(
            "https://fiscal.example.com".to_string(),
            SecretBox::new(Box::new("key".to_string())),
            "123".to_string(),
            std::time::Duration::from_secs(30),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let client = FiscalClient::new(
            "http://127.0.0.1:9".to_string(),
            SecretBox::new(Box::new("key".to_string())),
            "1234567890".to_string(),
            std::time::Duration::from_secs(2),
        )
        .unwrap();

        let result = client.get_status("20261016-abcdef012345").await;
        assert!(matches!(result, Err(AppError::FiscalUnavailable(_))));
    }

    #[tokio::test]
    async fn test_business_status_validates_before_network() {
        let client = FiscalClient::new(
            "http://127.0.0.1:9".to_string(),
            SecretBox::new(Box::new("key".to_string())),
            "1234567890".to_string(),
            std::time::Duration::from_secs(2),
        )
        .unwrap();

        let result = client.check_business_status("12-34").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    /// パスごとに決まったステータスとボディを返すローカルのスタブサーバー
    async fn spawn_stub(routes: Vec<(&'static str, u16, &'static str)>) -> FiscalClient {
        use axum::http::{StatusCode, Uri};

        let routes = std::sync::Arc::new(routes);
        let app = axum::Router::new().fallback(move |uri: Uri| {
            let routes = routes.clone();
            async move {
                routes
                    .iter()
                    .find(|(path, _, _)| *path == uri.path())
                    .map(|(_, status, body)| {
                        (StatusCode::from_u16(*status).unwrap(), body.to_string())
                    })
                    .unwrap_or((StatusCode::NOT_FOUND, String::new()))
            }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        FiscalClient::new(
            format!("http://{addr}"),
            SecretBox::new(Box::new("key".to_string())),
            "1234567890".to_string(),
            std::time::Duration::from_secs(5),
        )
        .unwrap()
    }

    fn invoice_with_key(mgt_key: &str) -> TaxInvoice {
        let mut invoice = sample_invoice();
        invoice.mgt_key = mgt_key.to_string();
        invoice
    }

    #[tokio::test]
    async fn test_state_not_found_is_none() {
        let client = spawn_stub(vec![]).await;
        let result = client.get_status("20261016-000000000001").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_state_success_is_decoded() {
        let client = spawn_stub(vec![(
            "/taxinvoices/20261016-000000000002/state",
            200,
            r#"{"state":"발행완료","stateDT":"20261016103000","ntsConfirmNum":"2026-2"}"#,
        )])
        .await;

        let status = client
            .get_status("20261016-000000000002")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.issued_confirm_num(), Some("2026-2"));
        assert_eq!(status.state_date_time.as_deref(), Some("20261016103000"));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let client = spawn_stub(vec![
            ("/taxinvoices/20261016-000000000003/state", 500, "oops"),
            (
                "/taxinvoices/20261016-000000000003/issue",
                503,
                r#"{"code":-99999999,"message":"점검 중"}"#,
            ),
        ])
        .await;

        assert!(matches!(
            client.get_status("20261016-000000000003").await,
            Err(AppError::FiscalUnavailable(_))
        ));
        // 5xx は業務エラーの形をしていても拒否として扱わない
        assert!(matches!(
            client.issue(&invoice_with_key("20261016-000000000003")).await,
            Err(AppError::FiscalUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_undecodable_success_body_is_unavailable() {
        let client = spawn_stub(vec![
            ("/taxinvoices/20261016-000000000004/state", 200, "<html>gateway</html>"),
            ("/taxinvoices/20261016-000000000004/issue", 200, r#"{"unexpected":true}"#),
        ])
        .await;

        assert!(matches!(
            client.get_status("20261016-000000000004").await,
            Err(AppError::FiscalUnavailable(_))
        ));
        assert!(matches!(
            client.issue(&invoice_with_key("20261016-000000000004")).await,
            Err(AppError::FiscalUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_client_error_with_negative_code_is_rejection() {
        let client = spawn_stub(vec![
            (
                "/taxinvoices/20261016-000000000005/issue",
                400,
                r#"{"code":-11000001,"message":"공급받는자 사업자번호가 유효하지 않습니다"}"#,
            ),
            ("/taxinvoices/20261016-000000000006/issue", 400, "bad request"),
        ])
        .await;

        let outcome = client
            .issue(&invoice_with_key("20261016-000000000005"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            IssueOutcome::Rejected {
                code: -11000001,
                message: "공급받는자 사업자번호가 유효하지 않습니다".to_string(),
            }
        );

        // 業務エラーのボディでない 4xx は通信失敗扱い
        assert!(matches!(
            client.issue(&invoice_with_key("20261016-000000000006")).await,
            Err(AppError::FiscalUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_issue_success_and_missing_endpoint() {
        let client = spawn_stub(vec![(
            "/taxinvoices/20261016-000000000007/issue",
            200,
            r#"{"code":1,"message":"","ntsConfirmNum":"20261016-41000042-00000007"}"#,
        )])
        .await;

        let outcome = client
            .issue(&invoice_with_key("20261016-000000000007"))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            IssueOutcome::Issued { ref nts_confirm_num, .. } if nts_confirm_num == "20261016-41000042-00000007"
        ));

        // issue の 404 は「見つからない」ではなく通信失敗
        assert!(matches!(
            client.issue(&invoice_with_key("20261016-000000000008")).await,
            Err(AppError::FiscalUnavailable(_))
        ));
    }
}
