//! Payment Gateway Client
//!
//! # Interview Q&A
//!
//! Q: 게이트웨이 응답은 어떻게 성공/실패를 판단하는가?
//! A: 두 단계로 판단
//!
//!    1. HTTP status: 2xx 가 아니면 실패
//!    2. envelope 의 `response_code`: "200" 으로 시작하거나 비어 있으면 성공
//!       (예: "2000100" = token, "2001100" = QRIS, "2001200" = VA)
//!
//! Q: access token 을 매번 발급받는가?
//! A: 아니다. `expires_in` 보다 조금 일찍 만료되도록 캐시한다
//!    - 캐시 읽기는 RwLock read, 갱신만 write
//!    - 만료 직전 토큰으로 요청하다 401 받는 경우를 피하기 위해 60초 여유
//!
//! Q: timeout 이 났는데 게이트웨이 쪽에서는 성공했다면?
//! A: 로컬 작업은 실패로 끝나고 아무것도 저장하지 않는다.
//!    원격 성공에 대한 보상 처리는 하지 않는다 (운영자가 대사로 확인).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::GatewayConfig;
use crate::types::Money;

/// 게이트웨이 charge 만료 요청값 (초)
pub const CHARGE_EXPIRES_SECS: i64 = 900;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Network(String),

    #[error("gateway returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("gateway response could not be parsed: {0}")]
    InvalidBody(String),

    #[error("gateway rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("gateway credentials are not configured")]
    MissingCredentials,

    #[error("gateway returned an empty access token")]
    EmptyToken,
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Network(err.to_string())
    }
}

/// response code 가 "200" prefix 이거나 비어 있으면 성공
pub fn is_success_code(code: &str) -> bool {
    let code = code.trim();
    code.is_empty() || code.starts_with("200")
}

/// 게이트웨이 만료 시각 파싱 (RFC 3339, 소수 초 유무 무관)
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

// ============ Payment methods ============

/// 지원 VA 은행 코드
pub const BANK_CHANNELS: [&str; 6] = ["BCA", "BRI", "BNI", "MANDIRI", "PERMATA", "BNC"];

/// 결제 수단
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentMethod {
    Qris,
    /// 은행 가상계좌. channel 은 `BANK_CHANNELS` 중 하나.
    Bank { channel: String },
}

impl PaymentMethod {
    /// QRIS 최대 결제 금액
    pub const QRIS_MAX: Money = Money::from_major(10_000_000);
    /// 가상계좌 최소 결제 금액
    pub const BANK_MIN: Money = Money::from_major(10_000);

    /// 요청 값 파싱. 공백 제거 후 대문자로 비교한다.
    pub fn parse(method: &str, channel: Option<&str>) -> Result<Self, String> {
        match method.trim().to_uppercase().as_str() {
            "QRIS" => Ok(PaymentMethod::Qris),
            "BANK" => {
                let channel = channel.unwrap_or_default().trim().to_uppercase();
                if BANK_CHANNELS.contains(&channel.as_str()) {
                    Ok(PaymentMethod::Bank { channel })
                } else {
                    Err(format!("unsupported bank channel '{}'", channel))
                }
            }
            other => Err(format!("unsupported payment method '{}'", other)),
        }
    }

    /// 결제 수단별 금액 제약
    pub fn check_amount(&self, amount: Money) -> Result<(), String> {
        match self {
            PaymentMethod::Qris if amount > Self::QRIS_MAX => {
                Err(format!("QRIS payments are limited to {}", Self::QRIS_MAX))
            }
            PaymentMethod::Bank { .. } if amount < Self::BANK_MIN => {
                Err(format!("bank transfers require at least {}", Self::BANK_MIN))
            }
            _ => Ok(()),
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            PaymentMethod::Qris => "QRIS",
            PaymentMethod::Bank { .. } => "BANK",
        }
    }

    pub fn channel(&self) -> Option<&str> {
        match self {
            PaymentMethod::Qris => None,
            PaymentMethod::Bank { channel } => Some(channel),
        }
    }
}

// ============ Requests / responses ============

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub reference_id: String,
    pub amount: Money,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, Default)]
pub struct ChargeResponse {
    pub gateway_id: Option<String>,
    /// QR string 또는 VA 번호
    pub payment_code: Option<String>,
    pub checkout_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PayoutRequest {
    pub reference_id: String,
    pub amount: Money,
    pub description: String,
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct PayoutResponse {
    pub payout_id: Option<String>,
    pub status: Option<String>,
}

/// 게이트웨이 호출 seam. 서비스는 이 trait 에만 의존한다.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError>;
    async fn create_payout(&self, request: &PayoutRequest) -> Result<PayoutResponse, GatewayError>;
}

// ============ Wire format ============

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    response_code: String,
    #[serde(default)]
    response_message: String,
    response_data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ChargePaymentData {
    qr_string: Option<String>,
    account_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChargeData {
    id: Option<String>,
    #[serde(default)]
    payment_data: ChargePaymentData,
    checkout_url: Option<String>,
    expires_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PayoutData {
    id: Option<String>,
    status: Option<String>,
}

#[derive(Serialize)]
struct ChargeBody<'a> {
    reference_id: &'a str,
    amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    bank_code: Option<&'a str>,
    notify_url: &'a str,
    success_url: &'a str,
    failed_url: &'a str,
    expires_time: i64,
}

#[derive(Serialize)]
struct PayoutDestination<'a> {
    code: &'a str,
    account_number: &'a str,
    account_name: &'a str,
}

#[derive(Serialize)]
struct PayoutBody<'a> {
    reference_id: &'a str,
    amount: i64,
    description: &'a str,
    destination: PayoutDestination<'a>,
    notify_url: &'a str,
}

enum Auth<'a> {
    Basic(&'a str, &'a str),
    Bearer(&'a str),
}

// ============ HTTP client ============

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// reqwest 기반 게이트웨이 클라이언트
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
    /// 캐시된 access token
    token: RwLock<Option<CachedToken>>,
}

impl GatewayClient {
    /// 만료 전 토큰 갱신 여유
    const TOKEN_MARGIN: Duration = Duration::from_secs(60);

    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            config,
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// access token 조회 (캐시 우선)
    pub async fn access_token(&self) -> Result<String, GatewayError> {
        // 캐시 확인
        {
            let cache = self.token.read().await;
            if let Some(cached) = cache.as_ref() {
                if Instant::now() < cached.expires_at {
                    return Ok(cached.token.clone());
                }
            }
        }

        let (client_id, client_secret) = match (&self.config.client_id, &self.config.client_secret) {
            (Some(id), Some(secret)) => (id.as_str(), secret.as_str()),
            _ => return Err(GatewayError::MissingCredentials),
        };

        let data: TokenData = self
            .post(
                "/access-token",
                Auth::Basic(client_id, client_secret),
                &serde_json::json!({ "grant_type": "client_credentials" }),
            )
            .await?
            .into_data()?;

        if data.access_token.is_empty() {
            return Err(GatewayError::EmptyToken);
        }

        let ttl = Duration::from_secs(data.expires_in).saturating_sub(Self::TOKEN_MARGIN);
        if !ttl.is_zero() {
            let mut cache = self.token.write().await;
            *cache = Some(CachedToken {
                token: data.access_token.clone(),
                expires_at: Instant::now() + ttl,
            });
        }

        tracing::debug!(ttl_secs = ttl.as_secs(), "Gateway access token refreshed");
        Ok(data.access_token)
    }

    async fn post<B, T>(&self, path: &str, auth: Auth<'_>, body: &B) -> Result<Envelope<T>, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self
            .http
            .post(self.url(path))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body);

        let request = match auth {
            Auth::Basic(id, secret) => {
                let encoded = STANDARD.encode(format!("{}:{}", id, secret));
                request.header(reqwest::header::AUTHORIZATION, format!("Basic {}", encoded))
            }
            Auth::Bearer(token) => request.bearer_auth(token),
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        read_envelope(status, text)
    }
}

/// HTTP 상태 + envelope 응답 코드 검사
///
/// `response_data` 유무는 호출자가 판단한다. payout 은 코드만으로도 접수된 것으로 본다.
fn read_envelope<T: DeserializeOwned>(status: StatusCode, text: String) -> Result<Envelope<T>, GatewayError> {
    let parsed: Result<Envelope<T>, _> = serde_json::from_str(&text);

    if !status.is_success() {
        let message = match &parsed {
            Ok(envelope) if !envelope.response_message.is_empty() => envelope.response_message.clone(),
            _ if !text.is_empty() && text.len() < 500 => text,
            _ => status.canonical_reason().unwrap_or("unknown").to_string(),
        };
        return Err(GatewayError::Status { status: status.as_u16(), message });
    }

    let envelope = parsed.map_err(|e| GatewayError::InvalidBody(e.to_string()))?;

    if !is_success_code(&envelope.response_code) {
        return Err(GatewayError::Rejected {
            code: envelope.response_code,
            message: envelope.response_message,
        });
    }

    Ok(envelope)
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, GatewayError> {
        self.response_data
            .ok_or_else(|| GatewayError::InvalidBody("missing response_data".to_string()))
    }
}

/// payout 접수 결과. 데이터 없이 성공 코드만 온 경우 id/status 는 비어 있다.
fn payout_response(envelope: Envelope<PayoutData>) -> PayoutResponse {
    let data = envelope.response_data.unwrap_or_default();
    PayoutResponse {
        payout_id: data.id,
        status: data.status,
    }
}

#[async_trait]
impl PaymentGateway for GatewayClient {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        let token = self.access_token().await?;

        let (path, bank_code) = match &request.method {
            PaymentMethod::Qris => ("/payments/create/qris", None),
            PaymentMethod::Bank { channel } => ("/payments/create/va", Some(channel.as_str())),
        };

        let body = ChargeBody {
            reference_id: &request.reference_id,
            amount: request.amount.whole_units(),
            bank_code,
            notify_url: &self.config.notify_url,
            success_url: &self.config.success_url,
            failed_url: &self.config.failed_url,
            expires_time: CHARGE_EXPIRES_SECS,
        };

        let data: ChargeData = self.post(path, Auth::Bearer(&token), &body).await?.into_data()?;

        tracing::info!(
            reference_id = %request.reference_id,
            method = request.method.method_name(),
            "Gateway charge created"
        );

        Ok(ChargeResponse {
            gateway_id: data.id,
            payment_code: data.payment_data.qr_string.or(data.payment_data.account_number),
            checkout_url: data.checkout_url,
            expires_at: data.expires_at.as_deref().and_then(parse_expiry),
        })
    }

    async fn create_payout(&self, request: &PayoutRequest) -> Result<PayoutResponse, GatewayError> {
        let token = self.access_token().await?;

        let body = PayoutBody {
            reference_id: &request.reference_id,
            amount: request.amount.whole_units(),
            description: &request.description,
            destination: PayoutDestination {
                code: &request.bank_code,
                account_number: &request.account_number,
                account_name: &request.account_name,
            },
            notify_url: &self.config.payout_notify_url,
        };

        let envelope = self.post("/payouts/transfers", Auth::Bearer(&token), &body).await?;
        let payout = payout_response(envelope);

        tracing::info!(
            reference_id = %request.reference_id,
            payout_id = ?payout.payout_id,
            "Gateway payout requested"
        );

        Ok(payout)
    }
}

// 테스트용 Mock 구현:

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// 호출을 기록하고, `fail` 이 켜져 있으면 Rejected 를 돌려주는 게이트웨이
    #[derive(Default)]
    pub struct MockGateway {
        fail: AtomicBool,
        pub charges: Mutex<Vec<ChargeRequest>>,
        pub payouts: Mutex<Vec<PayoutRequest>>,
    }

    impl MockGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            let gateway = Self::default();
            gateway.set_failing(true);
            gateway
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn charge_count(&self) -> usize {
            self.charges.lock().unwrap().len()
        }

        pub fn payout_count(&self) -> usize {
            self.payouts.lock().unwrap().len()
        }

        fn rejected() -> GatewayError {
            GatewayError::Rejected {
                code: "5001100".to_string(),
                message: "mock failure".to_string(),
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError> {
            self.charges.lock().unwrap().push(request.clone());
            if self.fail.load(Ordering::SeqCst) {
                return Err(Self::rejected());
            }
            Ok(ChargeResponse {
                gateway_id: Some(format!("GW-{}", request.reference_id)),
                payment_code: Some("00020101021226".to_string()),
                checkout_url: Some(format!("https://pay.test/{}", request.reference_id)),
                expires_at: None,
            })
        }

        async fn create_payout(&self, request: &PayoutRequest) -> Result<PayoutResponse, GatewayError> {
            self.payouts.lock().unwrap().push(request.clone());
            if self.fail.load(Ordering::SeqCst) {
                return Err(Self::rejected());
            }
            Ok(PayoutResponse {
                payout_id: Some(format!("PO-{}", request.reference_id)),
                status: Some("PROCESSING".to_string()),
            })
        }
    }
}
