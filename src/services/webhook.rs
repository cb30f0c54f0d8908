//! Inbound webhook primitives
//!
//! # Interview Q&A
//!
//! Q: 게이트웨이가 같은 callback 을 여러 번 보내면?
//! A: 두 겹으로 막는다
//!
//!    1. `webhook_receipts` (source, event key, status) unique 기록
//!       → 같은 키가 이미 있으면 아무것도 하지 않고 200
//!    2. 대상 row 를 lock 한 뒤 상태 확인 (Pending 이 아니면 무시)
//!       → 키가 다른 재전송이라도 효과는 한 번만
//!
//!    receipt 기록은 상태 변경과 같은 트랜잭션이므로, 처리 중 실패하면
//!    receipt 도 함께 롤백되어 재시도가 가능하다.

use serde::Serialize;

pub const PAYMENT_SOURCE: &str = "payment";
pub const PAYOUT_SOURCE: &str = "payout";

/// 게이트웨이가 보낸 상태 문자열의 해석
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    Failure,
    /// PENDING, PROCESSING 등 종결되지 않은 상태
    Other(String),
}

impl GatewayStatus {
    const SUCCESS: [&'static str; 4] = ["SUCCESS", "PAID", "COMPLETED", "SETTLED"];
    const FAILURE: [&'static str; 7] = [
        "FAILED", "FAILURE", "EXPIRED", "CANCELLED", "CANCELED", "REJECTED", "ERROR",
    ];

    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_uppercase();
        if Self::SUCCESS.contains(&normalized.as_str()) {
            GatewayStatus::Success
        } else if Self::FAILURE.contains(&normalized.as_str()) {
            GatewayStatus::Failure
        } else {
            GatewayStatus::Other(normalized)
        }
    }

    /// receipt 키에 쓰는 정규화된 이름
    pub fn key(&self) -> &str {
        match self {
            GatewayStatus::Success => "SUCCESS",
            GatewayStatus::Failure => "FAILED",
            GatewayStatus::Other(raw) => raw,
        }
    }
}

/// 게이트웨이 event id 가 있으면 그것을, 없으면 reference id 를 receipt 키로 쓴다
pub fn event_key<'a>(gateway_id: Option<&'a str>, reference_id: &'a str) -> &'a str {
    gateway_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(reference_id)
}

/// webhook 처리 결과. 어느 경우든 게이트웨이에는 200 으로 응답한다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "lowercase")]
pub enum WebhookOutcome {
    Applied,
    Duplicate,
    Ignored(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_synonyms() {
        assert_eq!(GatewayStatus::parse("paid"), GatewayStatus::Success);
        assert_eq!(GatewayStatus::parse(" Success "), GatewayStatus::Success);
        assert_eq!(GatewayStatus::parse("COMPLETED"), GatewayStatus::Success);
        assert_eq!(GatewayStatus::parse("expired"), GatewayStatus::Failure);
        assert_eq!(GatewayStatus::parse("CANCELED"), GatewayStatus::Failure);
        assert_eq!(
            GatewayStatus::parse("processing"),
            GatewayStatus::Other("PROCESSING".to_string())
        );
    }

    #[test]
    fn test_event_key_fallback() {
        assert_eq!(event_key(Some("GW-1"), "INV1"), "GW-1");
        assert_eq!(event_key(Some("  "), "INV1"), "INV1");
        assert_eq!(event_key(None, "INV1"), "INV1");
    }
}
